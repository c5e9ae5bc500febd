//! C ABI entry points for whatever channel drives the module (JNI, a local
//! socket daemon, ...). All of them are no-ops returning failure until a
//! [`Context`] is installed.

use std::slice;

use nfcd_config::{AnticolParams, Config};
use tracing::warn;

use crate::{consts::NFC_STATUS_FAILED, context::Context};

/// # Safety
/// A non-null `ptr` must be valid for reads of `len` bytes.
unsafe fn bytes<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    match (ptr.is_null(), len) {
        (_, 0) => Some(&[]),
        (true, _) => None,
        (false, _) => Some(unsafe { slice::from_raw_parts(ptr, len) }),
    }
}

/// Replaces the enforced options with the TLV stream at `data`.
///
/// # Safety
/// A non-null `data` must be valid for reads of `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nfcd_upload_config(data: *const u8, len: usize) -> bool {
    let Some(ctx) = Context::global() else {
        return false;
    };
    match unsafe { Config::parse_raw(len, data) } {
        Ok(config) => {
            ctx.upload_config(config);
            true
        }
        Err(err) => {
            warn!(%err, "rejected uploaded config");
            false
        }
    }
}

/// Replaces the enforced options with listen mode A anticollision values.
///
/// # Safety
/// Non-null `hist` and `uid` must be valid for reads of `hist_len` and
/// `uid_len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn nfcd_upload_anticol(
    atqa: u8,
    sak: u8,
    hist: *const u8,
    hist_len: usize,
    uid: *const u8,
    uid_len: usize,
) -> bool {
    let Some(ctx) = Context::global() else {
        return false;
    };
    let (Some(hist), Some(uid)) = (unsafe { bytes(hist, hist_len) }, unsafe { bytes(uid, uid_len) })
    else {
        warn!("anticollision upload without data");
        return false;
    };
    let params = AnticolParams {
        atqa,
        sak,
        hist: hist.to_vec(),
        uid: uid.to_vec(),
    };
    match params.to_config() {
        Ok(config) => {
            ctx.upload_config(config);
            true
        }
        Err(err) => {
            warn!(%err, "rejected anticollision values");
            false
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn nfcd_enable_patch() -> u8 {
    Context::global().map_or(NFC_STATUS_FAILED, Context::enable_patch)
}

#[unsafe(no_mangle)]
pub extern "C" fn nfcd_disable_patch() -> u8 {
    Context::global().map_or(NFC_STATUS_FAILED, Context::disable_patch)
}

#[unsafe(no_mangle)]
pub extern "C" fn nfcd_is_enabled() -> bool {
    Context::global().is_some_and(Context::is_enabled)
}
