pub const ENVNAME_LIBNFC_PATH: &str = "NFCD_LIBNFC_PATH";
pub const ENVNAME_LOG: &str = "NFCD_LOG";
pub const ENVNAME_DEBUG_HOOKS: &str = "NFCD_DEBUG_HOOKS";

#[cfg(target_pointer_width = "64")]
pub const DEFAULT_LIBNFC_PATH: &str = "/system/lib64/libnfc-nci.so";
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_LIBNFC_PATH: &str = "/system/lib/libnfc-nci.so";

pub const NFC_STATUS_OK: u8 = 0x00;
pub const NFC_STATUS_FAILED: u8 = 0x03;

/// `NFC_SetConfig` takes the stream length as a `uint8_t`.
pub const MAX_SET_CONFIG_LEN: usize = u8::MAX as usize;

/// `tCE_CB.mem.t4t.status`, the first byte of the control block.
pub const CE_T4T_STATUS_OFFSET: usize = 0;
pub const CE_T4T_STATUS_WILDCARD_AID_SELECTED: u8 = 0x40;
