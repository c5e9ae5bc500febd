//! Name to address index built from a library's on-disk image.
//!
//! `dlsym` only sees the dynamic symbol table. The static control blocks and
//! internal helpers of the NFC stack are local symbols that live in `.symtab`
//! alone, so the file itself is parsed and its link-time values are shifted by
//! the bias the library was actually loaded at.

use std::{
    ffi::c_void,
    fs,
    path::{Path, PathBuf},
    ptr::NonNull,
};

use elf::{ElfBytes, abi, endian::AnyEndian};
use spin::Once;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    page_size,
};

static INSTANCE: Once<SymbolTable> = Once::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name: String,
    /// Link-time value, relative to the image.
    pub value: u64,
    pub size: u64,
}

#[derive(Debug)]
pub struct SymbolTable {
    path: PathBuf,
    bias: usize,
    /// Sorted by name, one entry per name.
    entries: Vec<SymbolEntry>,
}

impl SymbolTable {
    /// Builds the process-wide table on first use. Later calls return the
    /// existing table whatever `path` they pass.
    pub fn create(path: impl AsRef<Path>) -> Result<&'static SymbolTable> {
        let path = path.as_ref();
        let table = INSTANCE.try_call_once(|| Self::load(path))?;
        if table.path != path {
            warn!(
                existing = %table.path.display(),
                requested = %path.display(),
                "symbol table already built for another library"
            );
        }
        Ok(table)
    }

    pub fn instance() -> Option<&'static SymbolTable> {
        INSTANCE.get()
    }

    /// Parses the image at `path`, which must already be mapped into this
    /// process.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = fs::read(path).map_err(|err| Error::LibraryUnavailable {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
        let base = mapped_base(path)?;
        let bias = base.wrapping_sub(first_load_vaddr(path, &image)?);
        Self::from_image(path, &image, bias)
    }

    pub fn from_image(path: impl AsRef<Path>, image: &[u8], bias: usize) -> Result<Self> {
        let path = path.as_ref();
        let malformed = |err: elf::ParseError| Error::MalformedImage {
            path: path.to_owned(),
            reason: err.to_string(),
        };
        let file = ElfBytes::<'_, AnyEndian>::minimal_parse(image).map_err(malformed)?;

        let mut entries = Vec::new();
        let tables = [
            file.symbol_table().map_err(malformed)?,
            file.dynamic_symbol_table().map_err(malformed)?,
        ];
        for (symbols, strings) in tables.into_iter().flatten() {
            for symbol in symbols.iter() {
                if symbol.is_undefined() || symbol.st_name == 0 {
                    continue;
                }
                if !matches!(
                    symbol.st_symtype(),
                    abi::STT_FUNC | abi::STT_OBJECT | abi::STT_NOTYPE
                ) {
                    continue;
                }
                let name = strings.get(symbol.st_name as usize).map_err(malformed)?;
                if name.is_empty() {
                    continue;
                }
                entries.push(SymbolEntry {
                    name: name.to_owned(),
                    value: symbol.st_value,
                    size: symbol.st_size,
                });
            }
        }
        // Stable, so `.symtab` wins over `.dynsym` for the same name.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries.dedup_by(|later, earlier| later.name == earlier.name);

        debug!(
            path = %path.display(),
            bias = format_args!("{bias:#x}"),
            symbols = entries.len(),
            "symbol table built"
        );
        Ok(Self {
            path: path.to_owned(),
            bias,
            entries,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<&SymbolEntry> {
        self.entries
            .binary_search_by(|entry| entry.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// Runtime address of `name`.
    pub fn resolve(&self, name: &str) -> Result<NonNull<c_void>> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| Error::SymbolNotFound(name.to_owned()))?;
        let address = self.bias.wrapping_add(entry.value as usize);
        NonNull::new(address as *mut c_void).ok_or_else(|| Error::SymbolNotFound(name.to_owned()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bias(&self) -> usize {
        self.bias
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn first_load_vaddr(path: &Path, image: &[u8]) -> Result<usize> {
    let malformed = |reason: String| Error::MalformedImage {
        path: path.to_owned(),
        reason,
    };
    let file =
        ElfBytes::<'_, AnyEndian>::minimal_parse(image).map_err(|err| malformed(err.to_string()))?;
    let load = file
        .segments()
        .and_then(|segments| segments.iter().find(|phdr| phdr.p_type == abi::PT_LOAD))
        .ok_or_else(|| malformed("no PT_LOAD segment".to_owned()))?;
    Ok(load.p_vaddr as usize & !(page_size() - 1))
}

/// Start of the mapping that covers file offset zero of `path`.
fn mapped_base(path: &Path) -> Result<usize> {
    let unavailable = |reason: String| Error::LibraryUnavailable {
        path: path.to_owned(),
        reason,
    };
    let maps = fs::read_to_string("/proc/self/maps").map_err(|err| unavailable(err.to_string()))?;
    let wanted = fs::canonicalize(path).unwrap_or_else(|_| path.to_owned());
    base_from_maps(&maps, &wanted)
        .ok_or_else(|| unavailable("not mapped into this process".to_owned()))
}

fn base_from_maps(maps: &str, path: &Path) -> Option<usize> {
    maps.lines()
        .filter_map(|line| {
            let mut fields = line.split_ascii_whitespace();
            let (start, _end) = fields.next()?.split_once('-')?;
            let _perms = fields.next()?;
            let offset = fields.next()?;
            let _dev = fields.next()?;
            let _inode = fields.next()?;
            let pathname = fields.collect::<Vec<_>>().join(" ");
            if Path::new(&pathname) != path || u64::from_str_radix(offset, 16).ok()? != 0 {
                return None;
            }
            usize::from_str_radix(start, 16).ok()
        })
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
5f1e2c000000-5f1e2c001000 r--p 00000000 fd:01 42   /usr/bin/cat
7a3c40000000-7a3c40010000 r--p 00000000 fd:01 1337 /system/lib64/libnfc-nci.so
7a3c40010000-7a3c40080000 r-xp 00010000 fd:01 1337 /system/lib64/libnfc-nci.so
7a3c40090000-7a3c40092000 rw-p 00080000 fd:01 1337 /system/lib64/libnfc-nci.so
7a3c50000000-7a3c50021000 rw-p 00000000 00:00 0
7ffd0c000000-7ffd0c021000 rw-p 00000000 00:00 0    [stack]
";

    #[test]
    fn base_is_offset_zero_mapping() {
        assert_eq!(
            base_from_maps(MAPS, Path::new("/system/lib64/libnfc-nci.so")),
            Some(0x7a3c4000_0000)
        );
        assert_eq!(base_from_maps(MAPS, Path::new("/usr/bin/cat")), Some(0x5f1e2c00_0000));
    }

    #[test]
    fn unmapped_library() {
        assert_eq!(base_from_maps(MAPS, Path::new("/system/lib64/libc.so")), None);
        assert_eq!(base_from_maps("", Path::new("/usr/bin/cat")), None);
    }

    #[test]
    fn garbage_image() {
        let err = SymbolTable::from_image("/tmp/garbage", b"definitely not an elf", 0).unwrap_err();
        assert!(matches!(err, Error::MalformedImage { .. }));
    }

    #[test]
    fn missing_image() {
        let err = SymbolTable::load("/nonexistent/libnfc-nci.so").unwrap_err();
        assert!(matches!(err, Error::LibraryUnavailable { .. }));
    }
}
