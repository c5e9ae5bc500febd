//! In-process interception layer for the Android NFC stack (`libnfc-nci`).
//!
//! Loaded into the NFC service, the module resolves stack functions (exported
//! or not), redirects a few of them to the handlers in [`handlers`], and
//! rewrites the configuration the stack pushes to the controller so that
//! values uploaded through [`control`] stay in effect.

pub mod bootstrap;
pub mod consts;
pub mod context;
pub mod control;
pub mod error;
pub mod handlers;
pub mod hook;
pub mod symbol_table;

pub use context::{Context, HookOptions, PatchState};
pub use error::{Error, Result};
pub use hook::{CallGuard, FnPtr, Hook, Library};
pub use nfcd_config as config;
pub use symbol_table::{SymbolEntry, SymbolTable};

pub(crate) fn page_size() -> usize {
    match nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        _ => 4096,
    }
}
