//! Symbol table entries and the collector that selects which ones to remove.

use crate::error::Error;
use crate::ident::ElfClass;
use crate::primitive::{read_cstring_at, Endian};
use crate::section::SectionRef;
use crate::Result;
use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

/// `STT_FUNC`: the only symbol type this tool ever removes.
pub const STT_FUNC: u8 = 2;

/// Reserved names the collector never selects, matching the original's
/// `_blacklist`.
pub const BLACKLIST: [&str; 2] = ["_init", "_fini"];

/// One raw `Elf32_Sym`/`Elf64_Sym` entry, decoded just enough to drive
/// collection and removal.
#[derive(Debug, Clone)]
pub struct RawSymbol {
    /// Index of this entry within its owning table.
    pub index: usize,
    /// `st_name`: byte offset into `.dynstr`/`.strtab`.
    pub st_name: u32,
    /// `st_value`: symbol address.
    pub st_value: u64,
    /// `st_size`: size in bytes of the object/function this symbol describes.
    pub st_size: u64,
    /// `st_info`: packed `(bind << 4) | type`.
    pub st_info: u8,
    /// `st_shndx`: owning section index, or `SHN_UNDEF` (0) for an import.
    pub st_shndx: u16,
    /// The decoded name (read from the string table at collection time).
    pub name: String,
}

impl RawSymbol {
    /// `ELF32_ST_TYPE`/`ELF64_ST_TYPE`: low 4 bits of `st_info`.
    pub fn symbol_type(&self) -> u8 {
        self.st_info & 0xF
    }

    /// `ELF32_ST_BIND`/`ELF64_ST_BIND`: high 4 bits of `st_info`.
    pub fn bind(&self) -> u8 {
        self.st_info >> 4
    }

    /// Whether `st_shndx` is `SHN_UNDEF`, i.e. this is an unresolved import.
    pub fn is_undefined(&self) -> bool {
        self.st_shndx == 0
    }
}

/// Identity of a symbol captured for later removal: everything the cascade
/// needs, decoupled from the table it was read from so later steps don't
/// have to re-read it (and so renamed/relocated `.dynstr` offsets never
/// desync the in-flight name).
#[derive(Debug, Clone)]
pub struct SymbolRef {
    /// Symbol name, captured at collection time.
    pub name: String,
    /// Index in the owning table at collection time.
    pub index: usize,
    /// `st_name` at collection time (offset into the string table).
    pub name_offset: u32,
    /// `st_value` (address).
    pub value: u64,
    /// `st_size`.
    pub size: u64,
    /// The owning section's version counter at collection time. See
    /// [`SectionRef::version`].
    pub sec_version: u64,
}

/// Reads every entry of a symbol table (`.dynsym`/`.symtab`), resolving each
/// entry's name against the given string-table section.
pub fn read_symbols<S: Read + Seek>(
    stream: &mut S,
    table: &SectionRef,
    class: ElfClass,
    endian: Endian,
    strtab_offset: u64,
) -> Result<Vec<RawSymbol>> {
    let is64 = matches!(class, ElfClass::Elf64);
    let count = table.entry_count() as usize;
    let mut out = Vec::with_capacity(count);
    for index in 0..count {
        stream.seek(SeekFrom::Start(table.offset + index as u64 * table.entsize))?;
        let sym = if is64 {
            let st_name = endian.read_u32(stream)?;
            let st_info = {
                let mut b = [0u8; 1];
                stream.read_exact(&mut b)?;
                b[0]
            };
            let _st_other = {
                let mut b = [0u8; 1];
                stream.read_exact(&mut b)?;
                b[0]
            };
            let st_shndx = endian.read_u16(stream)?;
            let st_value = endian.read_u64(stream)?;
            let st_size = endian.read_u64(stream)?;
            (st_name, st_info, st_shndx, st_value, st_size)
        } else {
            let st_name = endian.read_u32(stream)?;
            let st_value = endian.read_u32(stream)? as u64;
            let st_size = endian.read_u32(stream)? as u64;
            let st_info = {
                let mut b = [0u8; 1];
                stream.read_exact(&mut b)?;
                b[0]
            };
            let _st_other = {
                let mut b = [0u8; 1];
                stream.read_exact(&mut b)?;
                b[0]
            };
            let st_shndx = endian.read_u16(stream)?;
            (st_name, st_info, st_shndx, st_value, st_size)
        };
        let (st_name, st_info, st_shndx, st_value, st_size) = sym;
        let name_bytes = read_cstring_at(stream, strtab_offset + st_name as u64)?;
        let name = std::str::from_utf8(&name_bytes).map_err(Error::Utf8)?.to_string();
        out.push(RawSymbol {
            index,
            st_name,
            st_value,
            st_size,
            st_info,
            st_shndx,
            name,
        });
    }
    Ok(out)
}

/// Selection criteria for the collector: either a set of names or a set of
/// addresses, optionally inverted.
pub enum SymbolQuery<'a> {
    /// Select symbols whose name is (or, complemented, is not) in the set.
    Names(&'a HashSet<String>),
    /// Select symbols whose `st_value` is (or, complemented, is not) in the set.
    Addresses(&'a HashSet<u64>),
}

/// Selects `SymbolRef`s out of an already-decoded symbol table per
/// [`SymbolQuery`], matching the original's `collect_symbols_by_name` /
/// `collect_symbols_by_address`: function-typed, non-blacklisted entries
/// whose name/address membership (subject to `complement`) matches.
pub fn collect(
    symbols: &[RawSymbol],
    query: &SymbolQuery<'_>,
    complement: bool,
    sec_version: u64,
) -> Vec<SymbolRef> {
    let mut out = Vec::new();
    for sym in symbols {
        if BLACKLIST.contains(&sym.name.as_str()) {
            continue;
        }
        let matches = match query {
            SymbolQuery::Names(set) => set.contains(&sym.name),
            SymbolQuery::Addresses(set) => set.contains(&sym.st_value),
        };
        if matches == complement {
            continue;
        }
        if sym.symbol_type() != STT_FUNC {
            continue;
        }
        out.push(SymbolRef {
            name: sym.name.clone(),
            index: sym.index,
            name_offset: sym.st_name,
            value: sym.st_value,
            size: sym.st_size,
            sec_version,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::ElfDataEncoding;
    use std::io::Cursor;

    fn func(index: usize, name: &str, value: u64) -> RawSymbol {
        RawSymbol {
            index,
            st_name: 0,
            st_value: value,
            st_size: 16,
            st_info: (1 << 4) | STT_FUNC, // STB_GLOBAL
            st_shndx: 1,
            name: name.to_string(),
        }
    }

    fn object(index: usize, name: &str) -> RawSymbol {
        RawSymbol {
            index,
            st_name: 0,
            st_value: 0x100,
            st_size: 8,
            st_info: (1 << 4) | 1, // STT_OBJECT
            st_shndx: 1,
            name: name.to_string(),
        }
    }

    #[test]
    fn collect_by_name_skips_blacklisted_and_non_function_symbols() {
        let symbols = vec![
            func(0, "foo", 0x10),
            func(1, "_init", 0x20),
            object(2, "bar", 0),
            func(3, "baz", 0x30),
        ];
        let mut names = HashSet::new();
        names.insert("foo".to_string());
        names.insert("_init".to_string());
        names.insert("bar".to_string());

        let selected = collect(&symbols, &SymbolQuery::Names(&names), false, 0);
        let names: Vec<&str> = selected.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["foo"]);
    }

    #[test]
    fn collect_by_address_complement_selects_everything_else() {
        let symbols = vec![func(0, "foo", 0x10), func(1, "baz", 0x30)];
        let mut addrs = HashSet::new();
        addrs.insert(0x10u64);

        let selected = collect(&symbols, &SymbolQuery::Addresses(&addrs), true, 0);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "baz");
    }

    #[test]
    fn raw_symbol_decodes_bind_and_type_from_st_info() {
        let s = func(0, "foo", 0);
        assert_eq!(s.symbol_type(), STT_FUNC);
        assert_eq!(s.bind(), 1);
        assert!(!s.is_undefined());
    }

    #[test]
    fn read_symbols_decodes_one_entry_and_resolves_its_name() {
        let endian = Endian(ElfDataEncoding::LittleEndian);
        let strtab_offset = 32u64;
        let mut buf = vec![0u8; strtab_offset as usize + 5];
        buf[0..4].copy_from_slice(&1u32.to_le_bytes()); // st_name
        buf[4] = (1 << 4) | STT_FUNC; // st_info: STB_GLOBAL | STT_FUNC
        buf[6..8].copy_from_slice(&1u16.to_le_bytes()); // st_shndx
        buf[8..16].copy_from_slice(&0x1000u64.to_le_bytes()); // st_value
        buf[16..24].copy_from_slice(&16u64.to_le_bytes()); // st_size
        buf[strtab_offset as usize + 1..strtab_offset as usize + 4].copy_from_slice(b"foo");

        let table = SectionRef {
            kind: crate::section::SectionKind::DynSym,
            index: 0,
            offset: 0,
            size: 24,
            entsize: 24,
            is_rela: false,
            version: 0,
        };
        let mut cur = Cursor::new(buf);
        let symbols =
            read_symbols(&mut cur, &table, ElfClass::Elf64, endian, strtab_offset).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "foo");
        assert_eq!(symbols[0].st_value, 0x1000);
    }

    #[test]
    fn read_symbols_reports_invalid_utf8_names_instead_of_substituting() {
        let endian = Endian(ElfDataEncoding::LittleEndian);
        let strtab_offset = 32u64;
        let mut buf = vec![0u8; strtab_offset as usize + 3];
        buf[0..4].copy_from_slice(&1u32.to_le_bytes()); // st_name
        buf[4] = (1 << 4) | STT_FUNC;
        buf[6..8].copy_from_slice(&1u16.to_le_bytes());
        // invalid UTF-8 byte followed by the terminating NUL
        buf[strtab_offset as usize + 1] = 0xFF;

        let table = SectionRef {
            kind: crate::section::SectionKind::DynSym,
            index: 0,
            offset: 0,
            size: 24,
            entsize: 24,
            is_rela: false,
            version: 0,
        };
        let mut cur = Cursor::new(buf);
        let err = read_symbols(&mut cur, &table, ElfClass::Elf64, endian, strtab_offset).unwrap_err();
        assert!(matches!(err, crate::error::Error::Utf8(_)));
    }
}
