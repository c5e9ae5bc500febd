use std::env;

use nfcd_config::{Config, Hex};
use spin::{Mutex, MutexGuard, Once};
use tracing::{debug, info, warn};

use crate::{
    consts::{ENVNAME_DEBUG_HOOKS, MAX_SET_CONFIG_LEN, NFC_STATUS_FAILED, NFC_STATUS_OK},
    error::Result,
    handlers,
    hook::{CallGuard, Hook, Library, Opaque},
    symbol_table::SymbolTable,
};

pub type SetConfigFn = unsafe extern "C" fn(u8, *mut u8) -> u8;
pub type StatusFn = unsafe extern "C" fn() -> u8;
pub type ByteArgFn = unsafe extern "C" fn(u8) -> u8;

static GLOBAL: Once<Context> = Once::new();

#[derive(Debug, Clone, Copy, Default)]
pub struct HookOptions {
    /// Redirect the NFA/NFC functions that are only logged.
    pub debug_hooks: bool,
}

impl HookOptions {
    pub fn from_env() -> Self {
        let debug_hooks = match env::var(ENVNAME_DEBUG_HOOKS) {
            Ok(value) => value == "1",
            Err(_) => cfg!(feature = "debug-hooks"),
        };
        Self { debug_hooks }
    }
}

#[derive(Debug, Default)]
pub struct PatchState {
    pub hook_enabled: bool,
    /// Options the host tried to set while they were enforced.
    pub orig_values: Config,
    /// Options this module enforces.
    pub hook_values: Config,
}

/// Everything the handlers need, built once at startup.
pub struct Context {
    pub(crate) set_config: Hook<SetConfigFn>,
    pub(crate) select_t4t: Hook<StatusFn>,
    pub(crate) ce_cb: Hook,
    pub(crate) deactivate: Hook<ByteArgFn>,
    pub(crate) stop_rf_discovery: Hook<StatusFn>,
    pub(crate) disable_polling: Hook<StatusFn>,
    pub(crate) start_rf_discovery: Hook<StatusFn>,
    pub(crate) enable_polling: Hook<ByteArgFn>,
    state: Mutex<PatchState>,
    symbols: &'static SymbolTable,
    library: Library,
}

impl Context {
    /// Resolves every hooked symbol. Nothing is redirected until
    /// [`Context::install_global`].
    pub fn new(library: Library, symbols: &'static SymbolTable, options: HookOptions) -> Result<Self> {
        let lib = &library;
        let table = Some(symbols);
        let debug = options.debug_hooks;
        // Signatures follow libnfc-nci's nfc_api.h, nfa_api.h and ce_int.h.
        let (set_config, select_t4t, ce_cb, deactivate) = unsafe {
            (
                Hook::prepare(
                    lib,
                    table,
                    "NFC_SetConfig",
                    Some(handlers::hook_NFC_SetConfig as SetConfigFn),
                )?,
                Hook::prepare(
                    lib,
                    table,
                    "ce_select_t4t",
                    Some(handlers::hook_ce_select_t4t as StatusFn),
                )?,
                Hook::<Opaque>::prepare(lib, table, "ce_cb", None)?,
                Hook::prepare(
                    lib,
                    table,
                    "NFC_Deactivate",
                    debug.then_some(handlers::hook_NFC_Deactivate as ByteArgFn),
                )?,
            )
        };
        let (stop_rf_discovery, disable_polling, start_rf_discovery, enable_polling) = unsafe {
            (
                Hook::prepare(
                    lib,
                    table,
                    "NFA_StopRfDiscovery",
                    debug.then_some(handlers::hook_NFA_StopRfDiscovery as StatusFn),
                )?,
                Hook::prepare(
                    lib,
                    table,
                    "NFA_DisablePolling",
                    debug.then_some(handlers::hook_NFA_DisablePolling as StatusFn),
                )?,
                Hook::prepare(
                    lib,
                    table,
                    "NFA_StartRfDiscovery",
                    debug.then_some(handlers::hook_NFA_StartRfDiscovery as StatusFn),
                )?,
                Hook::prepare(
                    lib,
                    table,
                    "NFA_EnablePolling",
                    debug.then_some(handlers::hook_NFA_EnablePolling as ByteArgFn),
                )?,
            )
        };
        Ok(Self {
            set_config,
            select_t4t,
            ce_cb,
            deactivate,
            stop_rf_discovery,
            disable_polling,
            start_rf_discovery,
            enable_polling,
            state: Mutex::new(PatchState::default()),
            symbols,
            library,
        })
    }

    /// Publishes the context to the handlers, then redirects the hooked
    /// functions. Only the first context ever installed is kept.
    pub fn install_global(self) -> &'static Context {
        let mut fresh = false;
        let ctx = GLOBAL.call_once(|| {
            fresh = true;
            self
        });
        if fresh {
            ctx.attach_all();
        } else {
            warn!("context already installed, keeping the existing one");
        }
        ctx
    }

    pub fn global() -> Option<&'static Context> {
        GLOBAL.get()
    }

    pub fn attach_all(&self) {
        self.set_config.attach();
        self.select_t4t.attach();
        self.deactivate.attach();
        self.stop_rf_discovery.attach();
        self.disable_polling.attach();
        self.start_rf_discovery.attach();
        self.enable_polling.attach();
    }

    pub fn detach_all(&self) {
        self.set_config.detach();
        self.select_t4t.detach();
        self.deactivate.detach();
        self.stop_rf_discovery.detach();
        self.disable_polling.detach();
        self.start_rf_discovery.detach();
        self.enable_polling.detach();
    }

    /// Names of the functions currently redirected.
    pub fn attached(&self) -> Vec<&str> {
        let hooks: [(&str, bool); 7] = [
            (self.set_config.name(), self.set_config.is_attached()),
            (self.select_t4t.name(), self.select_t4t.is_attached()),
            (self.deactivate.name(), self.deactivate.is_attached()),
            (self.stop_rf_discovery.name(), self.stop_rf_discovery.is_attached()),
            (self.disable_polling.name(), self.disable_polling.is_attached()),
            (self.start_rf_discovery.name(), self.start_rf_discovery.is_attached()),
            (self.enable_polling.name(), self.enable_polling.is_attached()),
        ];
        hooks
            .into_iter()
            .filter_map(|(name, attached)| attached.then_some(name))
            .collect()
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn symbols(&self) -> &'static SymbolTable {
        self.symbols
    }

    /// Address of the card emulation control block.
    pub fn ce_cb(&self) -> *mut u8 {
        self.ce_cb.symbol().cast()
    }

    pub fn state(&self) -> MutexGuard<'_, PatchState> {
        self.state.lock()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().hook_enabled
    }

    pub fn upload_config(&self, config: Config) {
        info!(options = config.len(), "enforced config replaced");
        self.state.lock().hook_values = config;
    }

    /// Pushes the uploaded options to the stack and starts enforcing them.
    /// The patch stays disabled if the stack rejects any of them.
    pub fn enable_patch(&self) -> u8 {
        let guard = self.set_config.precall();
        let config = self.state.lock().hook_values.clone();
        let status = push_config(&guard, &config);
        if status == NFC_STATUS_OK {
            self.state.lock().hook_enabled = true;
            info!(options = config.len(), "patch enabled");
        } else {
            warn!(status, "stack rejected enforced config, patch stays disabled");
        }
        status
    }

    /// Pushes back what the host had tried to set and stops enforcing.
    /// On failure the patch stays enabled and `orig_values` are kept, so the
    /// call can be repeated.
    pub fn disable_patch(&self) -> u8 {
        let guard = self.set_config.precall();
        let config = self.state.lock().orig_values.clone();
        let status = push_config(&guard, &config);
        if status == NFC_STATUS_OK {
            let mut state = self.state.lock();
            state.hook_enabled = false;
            state.orig_values.clear();
            info!(restored = config.len(), "patch disabled");
        } else {
            warn!(status, "stack rejected restored config, patch stays enabled");
        }
        status
    }
}

/// Sends `config` through the original `NFC_SetConfig`, in as many calls as
/// its length field requires. Stops at the first failing call.
fn push_config(guard: &CallGuard<'_, SetConfigFn>, config: &Config) -> u8 {
    let batches = match config.batches(MAX_SET_CONFIG_LEN) {
        Ok(batches) => batches,
        Err(err) => {
            warn!(%err, "config cannot be passed to NFC_SetConfig");
            return NFC_STATUS_FAILED;
        }
    };
    for mut batch in batches {
        debug!(stream = %Hex(&batch), "pushing config");
        let status = submit(guard.original(), &mut batch);
        if status != NFC_STATUS_OK {
            return status;
        }
    }
    NFC_STATUS_OK
}

/// One `NFC_SetConfig` call, refusing streams its length field cannot carry.
pub(crate) fn submit(set_config: SetConfigFn, stream: &mut [u8]) -> u8 {
    let Ok(total) = u8::try_from(stream.len()) else {
        warn!(len = stream.len(), "config stream too long for NFC_SetConfig");
        return NFC_STATUS_FAILED;
    };
    unsafe { set_config(total, stream.as_mut_ptr()) }
}
