//! Replacements installed over the NFC stack functions.
//!
//! Each entry point brackets its body with the hook's call guard and keeps the
//! exact C signature of the function it replaces. The decisions they make are
//! in plain functions over [`PatchState`] so they can be exercised without a
//! live stack.

#![allow(non_snake_case)]

use nfcd_config::{Config, Hex};
use tracing::{Level, debug, span, trace, warn};

use crate::{
    consts::{CE_T4T_STATUS_OFFSET, CE_T4T_STATUS_WILDCARD_AID_SELECTED, NFC_STATUS_FAILED},
    context::{Context, PatchState, submit},
};

/// Stream to hand to the original `NFC_SetConfig` instead of the caller's,
/// or `None` to pass the caller's through untouched.
///
/// While the patch is enabled, options whose tag is enforced are dropped from
/// the stream and remembered in `orig_values`, one value per tag, the latest
/// write winning.
pub fn rewrite_set_config(state: &mut PatchState, incoming: &Config) -> Option<Vec<u8>> {
    if !state.hook_enabled {
        return None;
    }
    let (outgoing, displaced) = incoming.filter_against(&state.hook_values);
    if displaced.is_empty() {
        return None;
    }
    for option in &displaced {
        debug!(%option, "held back enforced option");
        state.orig_values.replace(option.clone());
    }
    Some(outgoing.to_bytes())
}

/// Lets any AID through without an ISO 7816 SELECT while the patch is enabled.
pub fn force_wildcard_aid(state: &PatchState, t4t_status: &mut u8) -> bool {
    if !state.hook_enabled {
        return false;
    }
    *t4t_status |= CE_T4T_STATUS_WILDCARD_AID_SELECTED;
    true
}

pub unsafe extern "C" fn hook_NFC_SetConfig(size: u8, tlv: *mut u8) -> u8 {
    let Some(ctx) = Context::global() else {
        return NFC_STATUS_FAILED;
    };
    let guard = ctx.set_config.precall();
    let _span = span!(Level::DEBUG, "NFC_SetConfig", size).entered();

    let rewritten = match unsafe { Config::parse_raw(usize::from(size), tlv) } {
        Ok(incoming) => {
            trace!(options = incoming.len(), stream = %Hex(&incoming.to_bytes()), "NfcSetConfig IN");
            rewrite_set_config(&mut ctx.state(), &incoming)
        }
        Err(err) => {
            warn!(%err, "passing malformed config through");
            None
        }
    };

    let status = match rewritten {
        Some(mut stream) => {
            trace!(stream = %Hex(&stream), "NfcSetConfig OUT");
            submit(guard.original(), &mut stream)
        }
        None => unsafe { guard.original()(size, tlv) },
    };
    debug!(status, "NFC_SetConfig returned");
    guard.postcall();
    status
}

pub unsafe extern "C" fn hook_ce_select_t4t() -> u8 {
    let Some(ctx) = Context::global() else {
        return NFC_STATUS_FAILED;
    };
    let guard = ctx.select_t4t.precall();
    let _span = span!(Level::DEBUG, "ce_select_t4t").entered();

    let status = unsafe { guard.original()() };
    let state = ctx.state();
    let t4t_status = unsafe { &mut *ctx.ce_cb().add(CE_T4T_STATUS_OFFSET) };
    if force_wildcard_aid(&state, t4t_status) {
        debug!(t4t_status = *t4t_status, "wildcard AID selected");
    }
    drop(state);
    guard.postcall();
    status
}

macro_rules! pass_through {
    ($handler:ident, $hook:ident, $symbol:literal ( $($arg:ident : $ty:ty),* )) => {
        pub unsafe extern "C" fn $handler($($arg: $ty),*) -> u8 {
            let Some(ctx) = Context::global() else {
                return NFC_STATUS_FAILED;
            };
            let guard = ctx.$hook.precall();
            debug!(symbol = $symbol, $($arg,)* "called");
            let status = unsafe { guard.original()($($arg),*) };
            debug!(symbol = $symbol, status, "returned");
            guard.postcall();
            status
        }
    };
}

pass_through!(hook_NFC_Deactivate, deactivate, "NFC_Deactivate"(deactivate_type: u8));
pass_through!(hook_NFA_StopRfDiscovery, stop_rf_discovery, "NFA_StopRfDiscovery"());
pass_through!(hook_NFA_DisablePolling, disable_polling, "NFA_DisablePolling"());
pass_through!(hook_NFA_StartRfDiscovery, start_rf_discovery, "NFA_StartRfDiscovery"());
pass_through!(hook_NFA_EnablePolling, enable_polling, "NFA_EnablePolling"(poll_mask: u8));
