//! Entry point rewriting. Everything in the crate that writes to executable
//! memory goes through [`EntryPatch`].

use std::{
    ffi::c_void,
    ptr::{self, NonNull},
};

use nix::sys::mman::{ProtFlags, mprotect};

use crate::page_size;

/// `movabs rax, imm64; jmp rax`
#[cfg(target_arch = "x86_64")]
pub const STUB_LEN: usize = 12;

#[cfg(target_arch = "x86_64")]
fn jump_stub(destination: usize) -> [u8; STUB_LEN] {
    let mut stub = [0u8; STUB_LEN];
    stub[..2].copy_from_slice(&[0x48, 0xb8]);
    stub[2..10].copy_from_slice(&(destination as u64).to_le_bytes());
    stub[10..].copy_from_slice(&[0xff, 0xe0]);
    stub
}

/// `ldr x16, #8; br x16; .quad imm64`
#[cfg(target_arch = "aarch64")]
pub const STUB_LEN: usize = 16;

#[cfg(target_arch = "aarch64")]
fn jump_stub(destination: usize) -> [u8; STUB_LEN] {
    let mut stub = [0u8; STUB_LEN];
    stub[..4].copy_from_slice(&0x5800_0050u32.to_le_bytes());
    stub[4..8].copy_from_slice(&0xd61f_0200u32.to_le_bytes());
    stub[8..].copy_from_slice(&(destination as u64).to_le_bytes());
    stub
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const STUB_LEN: usize = 0;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn jump_stub(_destination: usize) -> [u8; STUB_LEN] {
    []
}

pub const SUPPORTED: bool = STUB_LEN != 0;

#[cfg(target_arch = "aarch64")]
unsafe extern "C" {
    fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
}

/// A function entry that can be flipped between its original bytes and a
/// jump to a replacement.
#[derive(Debug)]
pub struct EntryPatch {
    entry: NonNull<u8>,
    saved: [u8; STUB_LEN],
    stub: [u8; STUB_LEN],
}

// Points into a code page mapped for the lifetime of the process.
unsafe impl Send for EntryPatch {}

impl EntryPatch {
    /// Saves the first [`STUB_LEN`] bytes at `entry` and makes the pages they
    /// span writable. They stay writable for the lifetime of the process.
    ///
    /// # Safety
    /// `entry` must be the start of a function at least [`STUB_LEN`] bytes
    /// long that does not branch back into its own first [`STUB_LEN`] bytes.
    pub unsafe fn prepare(entry: NonNull<c_void>, destination: *const c_void) -> nix::Result<Self> {
        if !SUPPORTED {
            return Err(nix::Error::ENOTSUP);
        }
        let entry = entry.cast::<u8>();
        unsafe { unprotect(entry, STUB_LEN)? };
        let mut saved = [0u8; STUB_LEN];
        unsafe { ptr::copy_nonoverlapping(entry.as_ptr(), saved.as_mut_ptr(), STUB_LEN) };
        Ok(Self {
            entry,
            saved,
            stub: jump_stub(destination as usize),
        })
    }

    /// The write is not atomic: a thread that is inside the first
    /// [`STUB_LEN`] bytes of the entry while they change can execute a mix of
    /// old and new bytes.
    ///
    /// # Safety
    /// The caller must rule that out or accept it, and serialize writes to the
    /// same entry.
    pub unsafe fn redirect(&self) {
        unsafe { self.write(&self.stub) }
    }

    /// # Safety
    /// Same as [`EntryPatch::redirect`].
    pub unsafe fn restore(&self) {
        unsafe { self.write(&self.saved) }
    }

    unsafe fn write(&self, bytes: &[u8; STUB_LEN]) {
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.entry.as_ptr(), STUB_LEN);
            flush_icache(self.entry, STUB_LEN);
        }
    }
}

unsafe fn unprotect(start: NonNull<u8>, len: usize) -> nix::Result<()> {
    let page = page_size();
    let first = start.as_ptr() as usize & !(page - 1);
    let last = (start.as_ptr() as usize + len + page - 1) & !(page - 1);
    let Some(first_page) = NonNull::new(first as *mut c_void) else {
        return Err(nix::Error::EFAULT);
    };
    unsafe {
        mprotect(
            first_page,
            last - first,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
        )
    }
}

#[cfg(target_arch = "aarch64")]
unsafe fn flush_icache(start: NonNull<u8>, len: usize) {
    let begin = start.as_ptr().cast::<libc::c_char>();
    unsafe { __clear_cache(begin, begin.add(len)) }
}

#[cfg(not(target_arch = "aarch64"))]
unsafe fn flush_icache(_start: NonNull<u8>, _len: usize) {}

#[cfg(all(test, any(target_arch = "x86_64", target_arch = "aarch64")))]
mod tests {
    use super::*;

    #[test]
    fn stub_embeds_destination() {
        let stub = jump_stub(0x1122_3344_5566_7788);
        assert_eq!(stub.len(), STUB_LEN);
        let destination = 0x1122_3344_5566_7788u64.to_le_bytes();
        assert!(stub.windows(8).any(|window| window == destination));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn x86_64_stub_layout() {
        let stub = jump_stub(0x1234);
        assert_eq!(&stub[..2], &[0x48, 0xb8]);
        assert_eq!(&stub[10..], &[0xff, 0xe0]);
    }

    #[test]
    fn patch_round_trips_writable_memory() {
        let mut buf = vec![0x90u8; 64];
        let entry = NonNull::new(buf.as_mut_ptr().cast::<c_void>()).unwrap();
        let patch = unsafe { EntryPatch::prepare(entry, 0xdead_beef as *const c_void) }.unwrap();
        unsafe { patch.redirect() };
        assert_eq!(&buf[..STUB_LEN], &jump_stub(0xdead_beef));
        unsafe { patch.restore() };
        assert!(buf.iter().all(|&b| b == 0x90));
    }
}
