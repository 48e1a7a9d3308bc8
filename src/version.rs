//! `.gnu.version` compaction and `.gnu.version_r`/`.gnu.version_d` auxiliary
//! name-index fixups.
//!
//! Grounded on `_batch_remove_gnu_versions`/`_fix_version_structs` in the
//! original project. Entry layouts (`Elf_Verneed`/`Elf_Vernaux`/
//! `Elf_Verdef`/`Elf_Verdaux`) are fixed-size regardless of ELF class, unlike
//! most other ELF structures.

use crate::primitive::Endian;
use crate::symbol::SymbolRef;
use crate::Result;
use std::io::{Read, Seek, SeekFrom, Write};

/// Removes one `Elf32_Half`/`Elf64_Half` version entry per symbol in
/// `removed_symbols` from `versions`, by index. `removed_symbols` must be
/// sorted by descending `index` so each `remove` doesn't invalidate the
/// indices of entries not yet processed.
pub fn compact(versions: &mut Vec<u16>, removed_symbols: &[SymbolRef]) {
    for symbol in removed_symbols {
        if symbol.index < versions.len() {
            versions.remove(symbol.index);
        }
    }
}

/// Reads the whole `.gnu.version` array (one `u16` per `.dynsym` entry).
pub fn read_versions<S: Read + Seek>(
    stream: &mut S,
    offset: u64,
    dynsym_count: u32,
    endian: Endian,
) -> Result<Vec<u16>> {
    stream.seek(SeekFrom::Start(offset))?;
    let mut out = Vec::with_capacity(dynsym_count as usize);
    for _ in 0..dynsym_count {
        out.push(endian.read_u16(stream)?);
    }
    Ok(out)
}

/// Writes the compacted version array back, zero-filling the tail freed by
/// the removal.
pub fn write_versions<S: Write + Seek>(
    stream: &mut S,
    offset: u64,
    versions: &[u16],
    original_count: usize,
    endian: Endian,
) -> Result<()> {
    stream.seek(SeekFrom::Start(offset))?;
    for v in versions {
        endian.write_u16(stream, *v)?;
    }
    let missing = original_count.saturating_sub(versions.len());
    if missing > 0 {
        stream.write_all(&vec![0u8; missing * 2])?;
    }
    Ok(())
}

/// Which flavor of version structure a section holds; the aux record's name
/// field sits at a different byte offset in each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSectionKind {
    /// `.gnu.version_r`: `Elf_Verneed`/`Elf_Vernaux`, 16-byte entries, name at aux+8.
    Need,
    /// `.gnu.version_d`: `Elf_Verdef`/`Elf_Verdaux`, aux is 8 bytes, name at aux+0.
    Def,
}

impl VersionSectionKind {
    fn aux_name_offset(self) -> u64 {
        match self {
            VersionSectionKind::Need => 8,
            VersionSectionKind::Def => 0,
        }
    }

    fn aux_entry_size(self) -> u64 {
        match self {
            VersionSectionKind::Need => 16,
            VersionSectionKind::Def => 8,
        }
    }
}

/// Rewrites every aux name-index field (and, for `.gnu.version_r`, the
/// `vn_file` string index) through `index_map`, walking the chained entry/aux
/// list the way the verneed/verdef section is laid out on disk.
///
/// `entry_count` is the section's "how many top-level entries" count
/// (`.gnu.version_r`'s `DT_VERNEEDNUM` / `.gnu.version_d`'s `DT_VERDEFNUM`).
pub fn fix_version_structs<S: Read + Write + Seek>(
    stream: &mut S,
    section_offset: u64,
    entry_count: u32,
    kind: VersionSectionKind,
    endian: Endian,
    index_map: &std::collections::HashMap<u32, u32>,
) -> Result<()> {
    let mut entry_offset = section_offset;
    for _ in 0..entry_count {
        stream.seek(SeekFrom::Start(entry_offset))?;
        let _version = endian.read_u16(stream)?;
        let cnt = endian.read_u16(stream)?;

        let (file_field, aux_field, next_field) = match kind {
            VersionSectionKind::Need => {
                stream.seek(SeekFrom::Start(entry_offset + 4))?;
                let vn_file = endian.read_u32(stream)?;
                let vn_aux = endian.read_u32(stream)?;
                let vn_next = endian.read_u32(stream)?;
                (Some(vn_file), vn_aux, vn_next)
            }
            VersionSectionKind::Def => {
                stream.seek(SeekFrom::Start(entry_offset + 4))?;
                let _vd_hash = endian.read_u32(stream)?;
                let vd_aux = endian.read_u32(stream)?;
                let vd_next = endian.read_u32(stream)?;
                (None, vd_aux, vd_next)
            }
        };

        if let (VersionSectionKind::Need, Some(old_file)) = (kind, file_field) {
            if let Some(&new_value) = index_map.get(&old_file) {
                stream.seek(SeekFrom::Start(entry_offset + 4))?;
                endian.write_u32(stream, new_value)?;
            }
        }

        let mut aux_offset = entry_offset + aux_field as u64;
        for _ in 0..cnt {
            stream.seek(SeekFrom::Start(aux_offset + kind.aux_name_offset()))?;
            let old_idx = endian.read_u32(stream)?;
            if let Some(&new_value) = index_map.get(&old_idx) {
                stream.seek(SeekFrom::Start(aux_offset + kind.aux_name_offset()))?;
                endian.write_u32(stream, new_value)?;
            }
            stream.seek(SeekFrom::Start(
                aux_offset + kind.aux_entry_size() - 4,
            ))?;
            let aux_next = endian.read_u32(stream)?;
            aux_offset += aux_next as u64;
        }

        entry_offset += next_field as u64;
        if next_field == 0 {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::ElfDataEncoding;
    use std::io::Cursor;

    fn sym(index: usize) -> SymbolRef {
        SymbolRef {
            name: String::new(),
            index,
            name_offset: 0,
            value: 0,
            size: 0,
            sec_version: 0,
        }
    }

    #[test]
    fn compact_removes_by_descending_index() {
        let mut versions = vec![1u16, 2, 3, 4];
        let removed = [sym(3), sym(1)];
        compact(&mut versions, &removed);
        assert_eq!(versions, vec![1, 3]);
    }

    #[test]
    fn read_write_versions_round_trip_and_zero_fill_tail() {
        let endian = Endian(ElfDataEncoding::LittleEndian);
        let mut cur = Cursor::new(vec![0u8; 8]);
        write_versions(&mut cur, 0, &[5, 6], 4, endian).unwrap();
        let bytes = cur.into_inner();
        assert_eq!(bytes, vec![5, 0, 6, 0, 0, 0, 0, 0]);

        let mut cur = Cursor::new(bytes);
        let versions = read_versions(&mut cur, 0, 4, endian).unwrap();
        assert_eq!(versions, vec![5, 6, 0, 0]);
    }

    #[test]
    fn fix_version_structs_rewrites_verneed_aux_name_index() {
        let endian = Endian(ElfDataEncoding::LittleEndian);
        // One Elf_Verneed (16 bytes) with one Elf_Vernaux (16 bytes) right
        // after it: vn_version, vn_cnt=1, vn_file, vn_aux=16, vn_next=0,
        // then vna_hash, vna_flags, vna_other, vna_name, vna_next=0.
        let mut buf = vec![0u8; 32];
        buf[2..4].copy_from_slice(&1u16.to_le_bytes()); // vn_cnt
        buf[8..12].copy_from_slice(&16u32.to_le_bytes()); // vn_aux
        buf[12..16].copy_from_slice(&0u32.to_le_bytes()); // vn_next
        buf[24..28].copy_from_slice(&42u32.to_le_bytes()); // vna_name (old)
        buf[28..32].copy_from_slice(&0u32.to_le_bytes()); // vna_next

        let mut cur = Cursor::new(buf);
        let mut index_map = std::collections::HashMap::new();
        index_map.insert(42u32, 7u32);

        fix_version_structs(&mut cur, 0, 1, VersionSectionKind::Need, endian, &index_map).unwrap();

        let out = cur.into_inner();
        let new_name = u32::from_le_bytes(out[24..28].try_into().unwrap());
        assert_eq!(new_name, 7);
    }
}
