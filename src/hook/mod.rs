//! Interception of whole functions inside a loaded library.
//!
//! A [`Hook`] resolves a symbol through the dynamic linker, falling back to the
//! [`SymbolTable`] for local symbols, and can redirect the function's entry to a
//! replacement. The original stays callable through [`CallGuard::original`]:
//! taking the guard puts the saved entry bytes back, dropping it re-applies the
//! redirection, and the hook's lock is held in between.

mod library;
pub mod patch;

use std::{
    ffi::{CString, c_void},
    fmt,
    marker::PhantomData,
    mem::transmute_copy,
    ptr::NonNull,
};

use spin::{Mutex, MutexGuard};
use tracing::{debug, info};

pub use library::Library;
use patch::{EntryPatch, STUB_LEN};

use crate::{
    error::{Error, Result},
    symbol_table::SymbolTable,
};

mod sealed {
    pub trait Sealed {}
}

/// C ABI function pointer types a [`Hook`] can be typed with.
pub trait FnPtr: sealed::Sealed + Copy + Send + Sync + 'static {
    /// # Safety
    /// `ptr` must point to a function with exactly this signature.
    unsafe fn from_ptr(ptr: *const c_void) -> Self;
    fn as_ptr(self) -> *const c_void;
}

macro_rules! impl_fn_ptr {
    ($($arg:ident),*) => {
        impl<R, $($arg),*> sealed::Sealed for unsafe extern "C" fn($($arg),*) -> R {}
        impl<R: 'static, $($arg: 'static),*> FnPtr for unsafe extern "C" fn($($arg),*) -> R {
            unsafe fn from_ptr(ptr: *const c_void) -> Self {
                unsafe { transmute_copy::<*const c_void, Self>(&ptr) }
            }
            fn as_ptr(self) -> *const c_void {
                self as *const c_void
            }
        }
    };
}

impl_fn_ptr!();
impl_fn_ptr!(A);
impl_fn_ptr!(A, B);
impl_fn_ptr!(A, B, C);
impl_fn_ptr!(A, B, C, D);
impl_fn_ptr!(A, B, C, D, E);
impl_fn_ptr!(A, B, C, D, E, G);

/// Signature used for hooks that only locate data.
pub type Opaque = unsafe extern "C" fn();

#[derive(Debug)]
struct Redirect {
    patch: Option<EntryPatch>,
    attached: bool,
}

pub struct Hook<F: FnPtr = Opaque> {
    name: String,
    address: NonNull<c_void>,
    redirect: Mutex<Redirect>,
    _signature: PhantomData<F>,
}

// `address` is a code or data address inside a library mapped for the
// lifetime of the process. Entry rewrites happen under `redirect`.
unsafe impl<F: FnPtr> Send for Hook<F> {}
unsafe impl<F: FnPtr> Sync for Hook<F> {}

impl<F: FnPtr> Hook<F> {
    /// Resolves `name` and, given a replacement, redirects it right away.
    ///
    /// # Safety
    /// `name` must be a function of signature `F` (or data, when `replacement`
    /// is `None`), and `replacement` must have the same signature.
    pub unsafe fn install(
        library: &Library,
        symbols: Option<&SymbolTable>,
        name: &str,
        replacement: Option<F>,
    ) -> Result<Self> {
        let hook = unsafe { Self::prepare(library, symbols, name, replacement) }?;
        hook.attach();
        Ok(hook)
    }

    /// Like [`Hook::install`], but a symbol missing from both lookup paths
    /// yields `Ok(None)` instead of an error.
    ///
    /// # Safety
    /// Same as [`Hook::install`].
    pub unsafe fn optional(
        library: &Library,
        symbols: Option<&SymbolTable>,
        name: &str,
        replacement: Option<F>,
    ) -> Result<Option<Self>> {
        match resolve(library, symbols, name) {
            Ok(_) => unsafe { Self::install(library, symbols, name, replacement) }.map(Some),
            Err(Error::SymbolNotFound(_)) => {
                debug!(symbol = name, "optional symbol absent");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Resolves `name` and readies the redirection without applying it.
    ///
    /// # Safety
    /// Same as [`Hook::install`].
    pub unsafe fn prepare(
        library: &Library,
        symbols: Option<&SymbolTable>,
        name: &str,
        replacement: Option<F>,
    ) -> Result<Self> {
        let failure = |reason: String| Error::InstallationFailure {
            symbol: name.to_owned(),
            reason,
        };
        let address = resolve(library, symbols, name).map_err(|err| failure(err.to_string()))?;
        let patch = match replacement {
            None => None,
            Some(replacement) => {
                if replacement.as_ptr() == address.as_ptr().cast_const() {
                    return Err(failure("replacement is the target itself".to_owned()));
                }
                let too_short = |&size: &u64| size != 0 && size < STUB_LEN as u64;
                if let Some(size) = known_size(symbols, name, address).filter(too_short) {
                    return Err(failure(format!(
                        "function is {size} bytes, the entry stub needs {STUB_LEN}"
                    )));
                }
                let patch = unsafe { EntryPatch::prepare(address, replacement.as_ptr()) }
                    .map_err(|errno| failure(format!("cannot make entry writable: {errno}")))?;
                Some(patch)
            }
        };
        info!(
            symbol = name,
            address = format_args!("{:p}", address),
            redirect = patch.is_some(),
            "hook resolved"
        );
        Ok(Self {
            name: name.to_owned(),
            address,
            redirect: Mutex::new(Redirect {
                patch,
                attached: false,
            }),
            _signature: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved address, fixed for the lifetime of the hook.
    pub fn symbol(&self) -> *mut c_void {
        self.address.as_ptr()
    }

    /// Whether a replacement was given.
    pub fn redirects(&self) -> bool {
        self.redirect.lock().patch.is_some()
    }

    pub fn is_attached(&self) -> bool {
        self.redirect.lock().attached
    }

    /// Points the entry at the replacement. A no-op for resolution-only hooks.
    pub fn attach(&self) {
        let mut guard = self.redirect.lock();
        let redirect = &mut *guard;
        if redirect.attached {
            return;
        }
        if let Some(patch) = &redirect.patch {
            unsafe { patch.redirect() };
            redirect.attached = true;
            debug!(symbol = %self.name, "redirection attached");
        }
    }

    /// Puts the original entry back until the next [`Hook::attach`].
    pub fn detach(&self) {
        let mut redirect = self.redirect.lock();
        if !redirect.attached {
            return;
        }
        if let Some(patch) = &redirect.patch {
            unsafe { patch.restore() };
        }
        redirect.attached = false;
        debug!(symbol = %self.name, "redirection detached");
    }

    /// Opens a call-through window. Every other `precall` on this hook waits
    /// until the returned guard is dropped.
    ///
    /// The original entry bytes are back in place for the lifetime of the
    /// guard. A call to the target from another thread in that window, one
    /// that does not go through `precall` itself, runs the original directly
    /// and skips the replacement. The window spans one call of the original.
    pub fn precall(&self) -> CallGuard<'_, F> {
        let redirect = self.redirect.lock();
        if redirect.attached {
            if let Some(patch) = &redirect.patch {
                unsafe { patch.restore() };
            }
        }
        CallGuard {
            hook: self,
            redirect,
        }
    }
}

impl<F: FnPtr> fmt::Debug for Hook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Held across one invocation of a replacement. Dropping it is the
/// `postcall`.
pub struct CallGuard<'a, F: FnPtr> {
    hook: &'a Hook<F>,
    redirect: MutexGuard<'a, Redirect>,
}

impl<F: FnPtr> CallGuard<'_, F> {
    /// The function at the address captured at resolution time.
    pub fn original(&self) -> F {
        unsafe { F::from_ptr(self.hook.address.as_ptr()) }
    }

    pub fn postcall(self) {}
}

impl<F: FnPtr> Drop for CallGuard<'_, F> {
    fn drop(&mut self) {
        if self.redirect.attached {
            if let Some(patch) = &self.redirect.patch {
                unsafe { patch.redirect() };
            }
        }
    }
}

fn resolve(
    library: &Library,
    symbols: Option<&SymbolTable>,
    name: &str,
) -> Result<NonNull<c_void>> {
    let c_name = CString::new(name).map_err(|_| Error::SymbolNotFound(name.to_owned()))?;
    if let Some(address) = library.symbol(&c_name) {
        return Ok(address);
    }
    symbols
        .ok_or_else(|| Error::SymbolNotFound(name.to_owned()))?
        .resolve(name)
}

/// Size recorded for `name` in the symbol table, when the table entry is the
/// one `address` was resolved to.
fn known_size(symbols: Option<&SymbolTable>, name: &str, address: NonNull<c_void>) -> Option<u64> {
    let symbols = symbols?;
    let entry = symbols.lookup(name)?;
    let runtime = symbols.bias().wrapping_add(entry.value as usize);
    (runtime == address.as_ptr() as usize).then_some(entry.size)
}

#[cfg(test)]
mod tests {
    use super::*;

    type Strlen = unsafe extern "C" fn(*const libc::c_char) -> libc::size_t;

    #[test]
    fn resolution_only_hook_is_stable() {
        let process = Library::this_process().unwrap();
        let hook = unsafe { Hook::<Strlen>::install(&process, None, "strlen", None) }.unwrap();
        assert!(!hook.redirects());
        assert!(!hook.is_attached());
        assert_eq!(hook.symbol(), hook.symbol());
        hook.attach();
        assert!(!hook.is_attached());

        let guard = hook.precall();
        assert_eq!(unsafe { guard.original()(c"nfcd".as_ptr()) }, 4);
        guard.postcall();
    }

    #[test]
    fn missing_symbol() {
        let process = Library::this_process().unwrap();
        let err = unsafe { Hook::<Opaque>::install(&process, None, "ce_cb", None) }.unwrap_err();
        assert!(matches!(err, Error::InstallationFailure { ref symbol, .. } if symbol == "ce_cb"));
        let hook = unsafe { Hook::<Opaque>::optional(&process, None, "ce_cb", None) }.unwrap();
        assert!(hook.is_none());
    }

    #[test]
    fn self_redirect_is_refused() {
        let process = Library::this_process().unwrap();
        let strlen = process.symbol(c"strlen").unwrap();
        let replacement = unsafe { <Strlen as FnPtr>::from_ptr(strlen.as_ptr()) };
        let err = unsafe { Hook::install(&process, None, "strlen", Some(replacement)) }.unwrap_err();
        assert!(matches!(err, Error::InstallationFailure { .. }));
    }
}
