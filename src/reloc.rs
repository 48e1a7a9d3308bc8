//! Relocation table reading, compaction and index renumbering.
//!
//! Grounded directly on `_batch_remove_relocs`/`_edit_rel_sect` in the
//! original project: the two-mode (push/zero) compactor, the
//! `(r_info_sym, addend)` sort key, and the descending-order renumbering
//! pass are all straight translations of that algorithm into owned `Vec`
//! operations instead of Python's `bisect` over parallel lists.

use crate::ident::ElfClass;
use crate::primitive::Endian;
use crate::section::SectionRef;
use crate::symbol::SymbolRef;
use crate::Result;
use std::io::{Read, Seek, SeekFrom, Write};

/// `R_X86_64_RELATIVE` / `R_386_RELATIVE`: both machines happen to use the
/// same numeric value for this relocation type.
pub const R_RELATIVE: u32 = 8;

/// One decoded relocation table entry.
#[derive(Debug, Clone, Copy)]
pub struct Relocation {
    /// `r_offset`: the address (or file-relative offset, pre-link) to patch.
    pub r_offset: u64,
    /// Symbol table index extracted from `r_info`.
    pub r_sym: u64,
    /// Relocation type extracted from `r_info`.
    pub r_type: u32,
    /// The addend: explicit `r_addend` for RELA, or the inline word read
    /// from the image at `r_offset` for REL.
    pub addend: i64,
}

impl Relocation {
    fn pack_info(&self, is64: bool) -> u64 {
        if is64 {
            (self.r_sym << 32) | (self.r_type as u64 & 0xFFFF_FFFF)
        } else {
            (self.r_sym << 8) | (self.r_type as u64 & 0xFF)
        }
    }
}

/// Whether a relocation table section is addend-explicit (RELA) or
/// addend-implicit (REL); derived from the section's own layout rather than
/// assumed from the machine, since a machine's default convention isn't a
/// hard guarantee for every section.
pub fn rel_entry_size(class: ElfClass, is_rela: bool) -> u64 {
    match (class, is_rela) {
        (ElfClass::Elf32, false) => 8,
        (ElfClass::Elf32, true) => 12,
        (ElfClass::Elf64, false) => 16,
        (ElfClass::Elf64, true) => 24,
    }
}

fn unpack_info(raw: u64, is64: bool) -> (u64, u32) {
    if is64 {
        (raw >> 32, (raw & 0xFFFF_FFFF) as u32)
    } else {
        (raw >> 8, (raw & 0xFF) as u32)
    }
}

/// Translates a virtual address to a file offset, as resolved from the
/// program header table. Implemented by [`crate::file::ElfFile`].
pub trait AddressTranslator {
    /// Returns the file offset backing virtual address `addr`.
    fn addr_to_offset(&self, addr: u64) -> Result<u64>;
}

/// Reads every entry of a relocation section.
pub fn read_relocations<S: Read + Seek, T: AddressTranslator>(
    stream: &mut S,
    section: &SectionRef,
    class: ElfClass,
    endian: Endian,
    translator: &T,
) -> Result<Vec<Relocation>> {
    let is64 = matches!(class, ElfClass::Elf64);
    let count = section.entry_count() as usize;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        stream.seek(SeekFrom::Start(section.offset + i as u64 * section.entsize))?;
        let r_offset = endian.read_word_sized(stream, is64)?;
        let raw_info = endian.read_word_sized(stream, is64)?;
        let (r_sym, r_type) = unpack_info(raw_info, is64);
        let addend = if section.is_rela {
            endian.read_word_sized(stream, is64)? as i64
        } else {
            let off = translator.addr_to_offset(r_offset)?;
            stream.seek(SeekFrom::Start(off))?;
            endian.read_u32(stream)? as i64
        };
        out.push(Relocation {
            r_offset,
            r_sym,
            r_type,
            addend,
        });
    }
    Ok(out)
}

/// Whether to physically shrink the table (`Push`) or keep every entry slot
/// occupied, zeroing matched ones in place (`Zero`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Remove matched entries and compact the survivors forward.
    Push,
    /// Zero out `r_info_sym`/addend of matched entries, keep their slot.
    Zero,
}

/// Result of one compaction pass.
pub struct CompactResult {
    /// Number of entries removed (zero under [`Mode::Zero`]).
    pub removed: usize,
    /// Number of `R_*_RELATIVE` entries among the survivors.
    pub relative_count: usize,
}

/// Finds the first index `i` in `sorted` with `key(sorted[i]) >= target`.
fn lower_bound<T>(sorted: &[T], target: (u64, i64), key: impl Fn(&T) -> (u64, i64)) -> usize {
    sorted.partition_point(|item| key(item) < target)
}

/// Implements `_edit_rel_sect`: given relocations sorted ascending by
/// `(r_sym, addend)`, finds and marks every entry matching `symbol`
/// (by index for ordinary symbols, or by addend for `R_*_RELATIVE` entries),
/// starting from the first candidate located via binary search.
///
/// `relocs`/`keys` are mutated in lockstep: under [`Mode::Push`] matched
/// entries are removed from both; under [`Mode::Zero`] they are rewritten in
/// place and the keys refreshed to `(0, 0)`.
fn edit_one_symbol(
    relocs: &mut Vec<Relocation>,
    keys: &mut Vec<(u64, i64)>,
    symbol: &SymbolRef,
    mode: Mode,
    is_symtab: bool,
) -> usize {
    let mut removed = 0usize;
    let mut cur = lower_bound(keys, (0, symbol.value as i64), |k| *k);
    if !is_symtab && keys.get(cur).map(|k| k.1) != Some(symbol.value as i64) {
        cur = lower_bound(keys, (symbol.index as u64, 0), |k| *k);
    }

    loop {
        if cur >= relocs.len() {
            break;
        }
        let r_sym = relocs[cur].r_sym;
        let addend = relocs[cur].addend;

        let is_match = (!is_symtab && r_sym == symbol.index as u64)
            || (addend == symbol.value as i64 && symbol.value > 0);

        if is_match {
            match mode {
                Mode::Push => {
                    relocs.remove(cur);
                    keys.remove(cur);
                    removed += 1;
                    continue;
                }
                Mode::Zero => {
                    relocs[cur].r_sym = 0;
                    relocs[cur].addend = 0;
                    keys[cur] = (0, 0);
                }
            }
        } else if is_symtab && (addend > symbol.value as i64 || r_sym > 0) {
            break;
        } else if r_sym > symbol.index as u64 {
            break;
        } else if !is_symtab && mode == Mode::Push {
            cur = lower_bound(keys, (symbol.index as u64, 0), |k| *k);
            continue;
        }

        cur += 1;
    }

    removed
}

/// Compacts `relocations` against `removed_symbols` (must be in descending
/// index order, as produced by [`crate::symbol::collect`] plus a
/// sort-by-descending-index step).
///
/// Returns the surviving relocations in their *original relative order*
/// (stable by `r_offset`, matching the original's explicit order-restoring
/// pass) together with removal/relative-count statistics.
pub fn compact(
    relocations: &[Relocation],
    removed_symbols: &[SymbolRef],
    mode: Mode,
    is_symtab: bool,
) -> (Vec<Relocation>, CompactResult) {
    let original_order: Vec<u64> = relocations.iter().map(|r| r.r_offset).collect();

    let mut indexed: Vec<(usize, Relocation)> = relocations.iter().copied().enumerate().collect();
    indexed.sort_by_key(|(_, r)| (r.r_sym, r.addend));

    let mut relocs: Vec<Relocation> = indexed.iter().map(|(_, r)| *r).collect();
    let mut keys: Vec<(u64, i64)> = relocs.iter().map(|r| (r.r_sym, r.addend)).collect();

    let mut sym_nrs: std::collections::HashSet<u64> = relocs.iter().map(|r| r.r_sym).collect();
    let mut sym_addrs: std::collections::HashSet<i64> = relocs.iter().map(|r| r.addend).collect();

    let mut removed = 0usize;
    for symbol in removed_symbols {
        if !sym_addrs.contains(&(symbol.value as i64)) {
            if is_symtab {
                continue;
            }
            if !sym_nrs.contains(&(symbol.index as u64)) {
                continue;
            }
        }
        removed += edit_one_symbol(&mut relocs, &mut keys, symbol, mode, is_symtab);
        if !is_symtab {
            sym_nrs.remove(&(symbol.index as u64));
        }
        sym_addrs.remove(&(symbol.value as i64));
    }

    if !is_symtab {
        renumber(&mut relocs, removed_symbols, mode == Mode::Push);
    }

    // Restore original relative order (stable on r_offset) among survivors.
    let by_offset: std::collections::HashMap<u64, Relocation> =
        relocs.iter().map(|r| (r.r_offset, *r)).collect();
    let mut seen: std::collections::HashSet<u64> = std::collections::HashSet::new();
    let mut ordered = Vec::with_capacity(relocs.len());
    for offset in &original_order {
        if seen.contains(offset) {
            continue;
        }
        if let Some(r) = by_offset.get(offset) {
            ordered.push(*r);
            seen.insert(*offset);
        }
    }

    let relative_count = ordered.iter().filter(|r| r.r_type == R_RELATIVE).count();

    (
        ordered,
        CompactResult {
            removed,
            relative_count,
        },
    )
}

/// Implements the index-renumbering pass: walking the
/// symbol-sorted relocation list from the back, subtract from each
/// surviving entry's `r_sym` the number of removed symbols with a lower
/// original index.
fn renumber(relocs: &mut [Relocation], removed_symbols: &[SymbolRef], push: bool) {
    if removed_symbols.is_empty() {
        return;
    }
    let mut cur_symbol_idx = 0usize;
    let mut cur_symbol = &removed_symbols[cur_symbol_idx];
    let mut cur_reloc_idx = relocs.len() as i64 - 1;
    let mut num_earlier_removed = removed_symbols.len();

    while cur_reloc_idx >= 0 {
        let i = cur_reloc_idx as usize;
        let r_sym = relocs[i].r_sym;

        if r_sym == 0 {
            if push {
                break;
            }
        } else if r_sym <= cur_symbol.index as u64 {
            num_earlier_removed -= 1;
            if num_earlier_removed == 0 {
                break;
            }
            cur_symbol_idx += 1;
            cur_symbol = &removed_symbols[cur_symbol_idx];
            continue;
        }

        let new_sym = if r_sym == 0 {
            0
        } else {
            r_sym - num_earlier_removed as u64
        };
        relocs[i].r_sym = new_sym;
        cur_reloc_idx -= 1;
    }
}

/// Writes `relocations` to `section`'s offset, filling the freed tail either
/// with zero bytes (ordinary case) or a duplicate of the last surviving
/// entry (`need_continuous_relocations`, keeping the section's byte length
/// constant).
pub fn write_relocations<S: Write + Seek, T: AddressTranslator>(
    stream: &mut S,
    section: &SectionRef,
    relocations: &[Relocation],
    original_count: usize,
    class: ElfClass,
    endian: Endian,
    need_continuous: bool,
    translator: &T,
) -> Result<()> {
    let is64 = matches!(class, ElfClass::Elf64);
    stream.seek(SeekFrom::Start(section.offset))?;

    let write_one = |stream: &mut S, r: &Relocation| -> Result<()> {
        endian.write_word_sized(stream, is64, r.r_offset)?;
        endian.write_word_sized(stream, is64, r.pack_info(is64))?;
        if section.is_rela {
            endian.write_word_sized(stream, is64, r.addend as u64)?;
        }
        Ok(())
    };

    for r in relocations {
        write_one(stream, r)?;
    }

    let missing = original_count.saturating_sub(relocations.len());
    if missing > 0 {
        if need_continuous {
            let last = *relocations
                .last()
                .expect("continuous-relocation mode implies at least one survivor");
            for _ in 0..missing {
                write_one(stream, &last)?;
            }
        } else {
            let entsize = rel_entry_size(class, section.is_rela) as usize;
            let zeros = vec![0u8; entsize * missing];
            stream.write_all(&zeros)?;
        }
    }

    // REL addends live inline in the image, not in the relocation table
    // itself; rewrite every survivor's addend word at its target address.
    if !section.is_rela {
        for r in relocations {
            let off = translator.addr_to_offset(r.r_offset)?;
            stream.seek(SeekFrom::Start(off))?;
            endian.write_u32(stream, r.addend as u32)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reloc(r_sym: u64, addend: i64, r_offset: u64) -> Relocation {
        Relocation {
            r_offset,
            r_sym,
            r_type: 1,
            addend,
        }
    }

    fn sym(index: usize, value: u64) -> SymbolRef {
        SymbolRef {
            name: String::new(),
            index,
            name_offset: 0,
            value,
            size: 0,
            sec_version: 0,
        }
    }

    #[test]
    fn rel_entry_size_matches_class_and_flavor() {
        assert_eq!(rel_entry_size(ElfClass::Elf32, false), 8);
        assert_eq!(rel_entry_size(ElfClass::Elf32, true), 12);
        assert_eq!(rel_entry_size(ElfClass::Elf64, false), 16);
        assert_eq!(rel_entry_size(ElfClass::Elf64, true), 24);
    }

    #[test]
    fn compact_push_removes_matching_symbol_relocations_by_index() {
        // Three relocations referencing dynsym indices 1, 2 and 3.
        let relocations = vec![reloc(1, 0, 0x1000), reloc(2, 0, 0x1008), reloc(3, 0, 0x1010)];
        let removed = [sym(2, 0)];

        let (out, result) = compact(&relocations, &removed, Mode::Push, false);

        assert_eq!(result.removed, 1);
        assert_eq!(out.len(), 2);
        // survivors keep original relative order by r_offset
        assert_eq!(out[0].r_offset, 0x1000);
        assert_eq!(out[1].r_offset, 0x1010);
        // index 3 is renumbered down to 2 since one earlier symbol (index 2) was removed
        assert_eq!(out[1].r_sym, 2);
    }

    #[test]
    fn compact_symtab_matches_by_addend_value_not_index() {
        let relocations = vec![reloc(0, 0x2000, 0x10), reloc(0, 0x3000, 0x20)];
        let removed = [sym(0, 0x2000)];

        let (out, result) = compact(&relocations, &removed, Mode::Push, true);

        assert_eq!(result.removed, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].addend, 0x3000);
    }

    #[test]
    fn compact_zero_mode_keeps_slot_count_but_clears_matched_entry() {
        let relocations = vec![reloc(1, 0, 0x10), reloc(2, 0, 0x20)];
        let removed = [sym(1, 0)];

        let (out, result) = compact(&relocations, &removed, Mode::Zero, false);

        assert_eq!(result.removed, 0, "Zero mode doesn't report a removal count");
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|r| r.r_sym == 0 && r.addend == 0));
    }

    struct UnusedTranslator;
    impl AddressTranslator for UnusedTranslator {
        fn addr_to_offset(&self, _addr: u64) -> Result<u64> {
            unreachable!("RELA addends never need address translation")
        }
    }

    #[test]
    fn write_relocations_duplicates_last_survivor_to_keep_section_size_fixed() {
        use crate::ident::ElfDataEncoding;
        use crate::section::SectionKind;
        use std::io::Cursor;

        let section = SectionRef {
            kind: SectionKind::RelDyn,
            index: 0,
            offset: 0,
            size: 3 * 24,
            entsize: 24,
            is_rela: true,
            version: 0,
        };
        let survivor = reloc(1, 0x5, 0x1000);
        let mut buf = vec![0u8; section.size as usize];
        let mut cur = Cursor::new(&mut buf);
        write_relocations(
            &mut cur,
            &section,
            &[survivor],
            3,
            ElfClass::Elf64,
            Endian(ElfDataEncoding::LittleEndian),
            true,
            &UnusedTranslator,
        )
        .unwrap();

        // every one of the three original slots now holds the lone survivor
        assert_eq!(&buf[0..24], &buf[24..48]);
        assert_eq!(&buf[0..24], &buf[48..72]);
    }
}
