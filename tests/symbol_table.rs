use std::{
    hint::black_box,
    ptr,
    sync::atomic::{AtomicBool, Ordering::SeqCst},
};

use assertables::{assert_gt, assert_lt};
use nfcd::{
    Error, Hook, Library, SymbolTable,
    hook::{Opaque, patch::STUB_LEN},
};

#[unsafe(no_mangle)]
#[inline(never)]
pub extern "C" fn nfcd_table_probe(x: u32) -> u32 {
    black_box(x).wrapping_mul(3)
}

#[unsafe(no_mangle)]
#[inline(never)]
pub extern "C" fn nfcd_table_thunk() {}

#[used]
static KEEP_THUNK: extern "C" fn() = nfcd_table_thunk;

static THUNK_REPLACED: AtomicBool = AtomicBool::new(false);

unsafe extern "C" fn thunk_replacement() {
    THUNK_REPLACED.store(true, SeqCst);
}

#[unsafe(no_mangle)]
pub static mut NFCD_TABLE_STATE: [u8; 16] = [0; 16];

fn table() -> &'static SymbolTable {
    SymbolTable::create("/proc/self/exe").unwrap()
}

#[test]
fn resolves_function_of_running_image() {
    let address = table().resolve("nfcd_table_probe").unwrap();
    assert_eq!(address.as_ptr() as usize, nfcd_table_probe as usize);
    assert_gt!(table().lookup("nfcd_table_probe").unwrap().size, 0);
}

#[test]
fn resolves_data_of_running_image() {
    let address = table().resolve("NFCD_TABLE_STATE").unwrap();
    assert_eq!(address.as_ptr().cast_const().cast::<u8>(), (&raw const NFCD_TABLE_STATE).cast::<u8>());
    assert_eq!(table().lookup("NFCD_TABLE_STATE").unwrap().size, 16);
}

#[test]
fn absent_symbol() {
    assert!(matches!(table().resolve("ce_cb"), Err(Error::SymbolNotFound(name)) if name == "ce_cb"));
    assert!(table().lookup("ce_cb").is_none());
}

#[test]
fn built_once() {
    let first = table();
    let second = SymbolTable::create("/some/other/library.so").unwrap();
    assert!(ptr::eq(first, second));
    assert!(ptr::eq(first, SymbolTable::instance().unwrap()));
    assert!(!first.is_empty());
}

#[test]
fn resolution_only_hook_falls_back_to_table() {
    let process = Library::this_process().unwrap();
    let hook = unsafe { Hook::<Opaque>::install(&process, Some(table()), "NFCD_TABLE_STATE", None) }
        .unwrap();
    let first = hook.symbol();
    assert_eq!(first, hook.symbol());
    assert_eq!(first.cast_const().cast::<u8>(), (&raw const NFCD_TABLE_STATE).cast::<u8>());
    assert!(!hook.is_attached());

    unsafe { first.cast::<u8>().add(3).write(0x5a) };
    assert_eq!(unsafe { (&raw const NFCD_TABLE_STATE).cast::<u8>().add(3).read() }, 0x5a);
}

#[test]
fn mandatory_and_optional_missing_symbol() {
    let process = Library::this_process().unwrap();
    let err = unsafe { Hook::<Opaque>::install(&process, Some(table()), "ce_cb", None) }.unwrap_err();
    assert!(matches!(err, Error::InstallationFailure { .. }));
    let hook = unsafe { Hook::<Opaque>::optional(&process, Some(table()), "ce_cb", None) }.unwrap();
    assert!(hook.is_none());
}

#[test]
fn entry_shorter_than_stub_is_refused() {
    let size = table().lookup("nfcd_table_thunk").unwrap().size;
    assert_gt!(size, 0);
    assert_lt!(size, STUB_LEN as u64);

    let process = Library::this_process().unwrap();
    let err = unsafe {
        Hook::install(
            &process,
            Some(table()),
            "nfcd_table_thunk",
            Some(thunk_replacement as Opaque),
        )
    }
    .unwrap_err();
    assert!(
        matches!(err, Error::InstallationFailure { ref reason, .. } if reason.contains("entry stub"))
    );

    black_box(KEEP_THUNK)();
    assert!(!THUNK_REPLACED.load(SeqCst));
}
