//! `.dynamic` section / `PT_DYNAMIC` segment tag access.
//!
//! Ground truth for `DF_BIND_NOW`/`DF_1_NOW` bit values: the GNU/SysV ABI.
//! Represented with `bitflags`, matching how ABI flag sets are modeled
//! elsewhere in this crate's dependency layer.

use crate::ident::ElfClass;
use crate::primitive::Endian;
use crate::Result;
use bitflags::bitflags;
use std::io::{Read, Seek, SeekFrom, Write};

/// The `d_tag` values this tool reads or writes.
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DynTag {
    /// Marks the end of the `_DYNAMIC` array.
    Null = 0,
    /// String table offset of a needed library's name.
    Needed = 1,
    /// Size in bytes of the PLT relocation table.
    PltRelSz = 2,
    /// Address/offset of the PLT relocation table (`.rel.plt`/`.rela.plt`).
    JmpRel = 23,
    /// Address/offset of the string table (`.dynstr`).
    StrTab = 5,
    /// Address/offset of the symbol table (`.dynsym`).
    SymTab = 6,
    /// Address/offset of the relocation table with implicit addends (`.rel.dyn`).
    Rel = 17,
    /// Size in bytes of [`DynTag::Rel`].
    RelSz = 18,
    /// Address/offset of the relocation table with explicit addends (`.rela.dyn`).
    Rela = 7,
    /// Size in bytes of [`DynTag::Rela`].
    RelaSz = 8,
    /// Size in bytes of the string table.
    StrSz = 10,
    /// String table offset of this object's `SONAME`.
    Soname = 14,
    /// String table offset of the `RPATH` string.
    Rpath = 15,
    /// String table offset of the `RUNPATH` string.
    Runpath = 29,
    /// Number of `R_*_RELATIVE` relocations at the head of [`DynTag::Rel`].
    RelCount = 0x6ffffffa,
    /// Number of `R_*_RELATIVE` relocations at the head of [`DynTag::Rela`].
    RelaCount = 0x6ffffff9,
    /// Address/offset of the SysV `.hash` section.
    Hash = 4,
    /// Address/offset of the GNU `.gnu.hash` section.
    GnuHash = 0x6ffffef5,
    /// Address/offset of the `.gnu.version` section.
    VerSym = 0x6ffffff0,
    /// Address/offset of the `.gnu.version_d` section.
    VerDef = 0x6ffffffc,
    /// Number of entries in `.gnu.version_d`.
    VerDefNum = 0x6ffffffd,
    /// Address/offset of the `.gnu.version_r` section.
    VerNeed = 0x6ffffffe,
    /// Number of entries in `.gnu.version_r`.
    VerNeedNum = 0x6fffffff,
    /// State flags (`DF_*`).
    Flags = 30,
    /// Extra state flags (`DF_1_*`).
    Flags1 = 0x6ffffffb,
    /// Eager-binding marker tag (presence alone matters).
    BindNow = 24,
}

bitflags! {
    /// `DT_FLAGS` bit values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DfFlags: u64 {
        /// Perform complete relocation processing (eager binding) at load time.
        const BIND_NOW = 0x8;
    }
}

bitflags! {
    /// `DT_FLAGS_1` bit values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DfFlags1: u64 {
        /// Same meaning as `DF_BIND_NOW` but in the extended flags word.
        const NOW = 0x1;
    }
}

/// One `(d_tag, d_val)` pair together with its index in the array, needed to
/// seek back and overwrite a single entry without rewriting the whole table.
#[derive(Debug, Clone, Copy)]
pub struct DynEntry {
    /// Index of this entry within the `_DYNAMIC` array.
    pub index: usize,
    /// The raw tag value (signed, since processor/OS-specific tags use the
    /// high end of the range).
    pub tag: i64,
    /// The tag's value or pointer payload.
    pub val: u64,
}

/// Reads every entry of the `.dynamic` table (stopping at `DT_NULL`).
pub fn read_entries<S: Read + Seek>(
    stream: &mut S,
    offset: u64,
    class: ElfClass,
    endian: Endian,
) -> Result<Vec<DynEntry>> {
    let is64 = matches!(class, ElfClass::Elf64);
    let entsize: u64 = if is64 { 16 } else { 8 };
    let mut out = Vec::new();
    let mut idx = 0usize;
    loop {
        stream.seek(SeekFrom::Start(offset + idx as u64 * entsize))?;
        let tag = if is64 {
            endian.read_i64(stream)?
        } else {
            endian.read_i32(stream)? as i64
        };
        let val = if is64 {
            endian.read_u64(stream)?
        } else {
            endian.read_u32(stream)? as u64
        };
        out.push(DynEntry { index: idx, tag, val });
        idx += 1;
        if tag == DynTag::Null as i64 {
            break;
        }
    }
    Ok(out)
}

/// Overwrites the value word of the dynamic entry at `index`, leaving its tag
/// untouched.
pub fn write_value_at<S: Write + Seek>(
    stream: &mut S,
    table_offset: u64,
    index: usize,
    class: ElfClass,
    endian: Endian,
    value: u64,
) -> Result<()> {
    let is64 = matches!(class, ElfClass::Elf64);
    let entsize: u64 = if is64 { 16 } else { 8 };
    let tag_size: u64 = if is64 { 8 } else { 4 };
    stream.seek(SeekFrom::Start(
        table_offset + index as u64 * entsize + tag_size,
    ))?;
    endian.write_word_sized(stream, is64, value)
}

/// Finds the first entry with the given tag, if any.
pub fn find_tag(entries: &[DynEntry], tag: DynTag) -> Option<DynEntry> {
    entries.iter().copied().find(|e| e.tag == tag as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::ElfDataEncoding;
    use std::io::Cursor;

    #[test]
    fn read_entries_stops_at_null_64bit() {
        let endian = Endian(ElfDataEncoding::LittleEndian);
        let mut buf = Vec::new();
        buf.extend_from_slice(&(DynTag::SymTab as i64).to_le_bytes());
        buf.extend_from_slice(&0x1000u64.to_le_bytes());
        buf.extend_from_slice(&(DynTag::Null as i64).to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        // trailing garbage that must not be read past DT_NULL
        buf.extend_from_slice(&0xFFu64.to_le_bytes());
        buf.extend_from_slice(&0xFFu64.to_le_bytes());

        let mut cur = Cursor::new(buf);
        let entries = read_entries(&mut cur, 0, ElfClass::Elf64, endian).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tag, DynTag::SymTab as i64);
        assert_eq!(entries[0].val, 0x1000);
        assert_eq!(entries[1].tag, DynTag::Null as i64);
    }

    #[test]
    fn write_value_at_overwrites_only_the_value_word() {
        let endian = Endian(ElfDataEncoding::LittleEndian);
        let mut buf = Vec::new();
        buf.extend_from_slice(&(DynTag::StrSz as i64).to_le_bytes());
        buf.extend_from_slice(&100u64.to_le_bytes());
        let mut cur = Cursor::new(buf);

        write_value_at(&mut cur, 0, 0, ElfClass::Elf64, endian, 42).unwrap();

        let out = cur.into_inner();
        let tag = i64::from_le_bytes(out[0..8].try_into().unwrap());
        let val = u64::from_le_bytes(out[8..16].try_into().unwrap());
        assert_eq!(tag, DynTag::StrSz as i64);
        assert_eq!(val, 42);
    }

    #[test]
    fn find_tag_returns_first_match() {
        let entries = vec![
            DynEntry { index: 0, tag: DynTag::Needed as i64, val: 1 },
            DynEntry { index: 1, tag: DynTag::SymTab as i64, val: 2 },
        ];
        let found = find_tag(&entries, DynTag::SymTab).unwrap();
        assert_eq!(found.val, 2);
        assert!(find_tag(&entries, DynTag::Hash).is_none());
    }
}
