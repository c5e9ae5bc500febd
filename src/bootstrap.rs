use std::{
    env,
    fs::File,
    io::Write as _,
    mem::ManuallyDrop,
    os::fd::FromRawFd as _,
    path::PathBuf,
};

use anyhow::Context as _;
use nix::unistd::{AccessFlags, access};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{
    consts::{DEFAULT_LIBNFC_PATH, ENVNAME_LIBNFC_PATH, ENVNAME_LOG},
    context::{Context, HookOptions},
    hook::Library,
    symbol_table::SymbolTable,
};

pub fn library_path() -> PathBuf {
    env::var_os(ENVNAME_LIBNFC_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LIBNFC_PATH))
}

/// Installs a stderr subscriber unless the host already has one.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(ENVNAME_LOG).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Locates the NFC stack inside this process and hooks it.
pub fn hook_native() -> anyhow::Result<&'static Context> {
    let path = library_path();
    info!(path = %path.display(), "library expected");
    access(path.as_path(), AccessFlags::R_OK)
        .with_context(|| format!("library {} not accessible", path.display()))?;

    let library = Library::open_loaded(&path).context("could not obtain library handle")?;
    let symbols = SymbolTable::create(&path).context("could not build symbol table")?;
    let ctx = Context::new(library, symbols, HookOptions::from_env())
        .context("could not resolve hooked functions")?;
    Ok(ctx.install_global())
}

pub fn abort_with(err: &anyhow::Error) -> ! {
    error!("{err:#}");
    let mut stderr = ManuallyDrop::new(unsafe { File::from_raw_fd(libc::STDERR_FILENO) });
    let _ = writeln!(stderr, "nfcd: {err:#}");
    unsafe { libc::abort() }
}

#[cfg(all(feature = "bootstrap", not(test)))]
#[ctor::ctor]
fn hook_on_load() {
    init_logging();
    if let Err(err) = hook_native() {
        abort_with(&err);
    }
}
