use std::{
    ffi::{CStr, CString, c_void},
    os::unix::ffi::OsStrExt as _,
    path::{Path, PathBuf},
    ptr::{NonNull, null},
};

use crate::error::{Error, Result};

/// `dlopen` handle of a library that is already mapped into the process.
#[derive(Debug)]
pub struct Library {
    handle: NonNull<c_void>,
    path: Option<PathBuf>,
}

// The handle is an opaque token into the dynamic linker, which does its own locking.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    /// Opens `path` without loading it. Fails when it is not mapped yet.
    pub fn open_loaded(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let unavailable = |reason: String| Error::LibraryUnavailable {
            path: path.to_owned(),
            reason,
        };
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| unavailable("path contains a nul byte".to_owned()))?;
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_NOLOAD) };
        let handle = NonNull::new(handle).ok_or_else(|| unavailable(dlerror()))?;
        Ok(Self {
            handle,
            path: Some(path.to_owned()),
        })
    }

    /// The main program and everything it loaded.
    pub fn this_process() -> Result<Self> {
        let handle = unsafe { libc::dlopen(null(), libc::RTLD_NOW) };
        let handle = NonNull::new(handle).ok_or_else(|| Error::LibraryUnavailable {
            path: PathBuf::new(),
            reason: dlerror(),
        })?;
        Ok(Self { handle, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Exported symbol lookup through the dynamic linker.
    pub fn symbol(&self, name: &CStr) -> Option<NonNull<c_void>> {
        NonNull::new(unsafe { libc::dlsym(self.handle.as_ptr(), name.as_ptr()) })
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe { libc::dlclose(self.handle.as_ptr()) };
    }
}

fn dlerror() -> String {
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        "unknown dlopen failure".to_owned()
    } else {
        unsafe { CStr::from_ptr(message) }
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unloaded_library_is_unavailable() {
        let err = Library::open_loaded("/nonexistent/libnfc-nci.so").unwrap_err();
        assert!(matches!(err, Error::LibraryUnavailable { .. }));
    }

    #[test]
    fn process_handle_sees_libc() {
        let process = Library::this_process().unwrap();
        assert!(process.path().is_none());
        assert!(process.symbol(c"malloc").is_some());
        assert!(process.symbol(c"nfcd_no_such_symbol").is_none());
    }
}
