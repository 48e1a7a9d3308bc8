//! SysV `.hash` computation and rebuild.
//!
//! Grounded on `_elfhash`/`_recreate_elf_hash`/`_calc_nbuckets` in the
//! original project: unlike `.gnu.hash`, the SysV table is always rebuilt
//! from scratch after a removal pass rather than edited in place, since its
//! bucket/chain layout has no stable ordering to preserve.

use crate::ident::ElfClass;
use crate::primitive::Endian;
use crate::symbol::RawSymbol;
use crate::Result;
use std::io::{Seek, SeekFrom, Write};

/// The classic ELF string hash (`elf_hash` in the System V ABI).
pub fn elf_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &byte in name {
        h = (h << 4).wrapping_add(byte as u32);
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

/// Bucket counts the reference linker steps through as the symbol count
/// grows, taken verbatim from `_calc_nbuckets`'s table so the rebuilt table's
/// shape matches what a linker would have produced for the same symbol count.
const NBUCKETS_OPTIONS: &[u32] = &[
    1, 3, 17, 37, 67, 97, 131, 197, 263, 521, 1031, 2053, 4099, 8209, 16411, 32771, 65537, 131101,
    262147,
];

/// Picks the bucket count for `nchain` symbols, mirroring `_calc_nbuckets`'s
/// `bisect.bisect(options, n) - 1` lookup (including its `n == 0` wraparound
/// to the last table entry, since Python indexing with `-1` falls back to the
/// list's tail rather than raising there).
fn calc_nbuckets(nchain: u32) -> u32 {
    let ins_point = NBUCKETS_OPTIONS.partition_point(|&v| v <= nchain);
    if ins_point == 0 {
        *NBUCKETS_OPTIONS.last().unwrap()
    } else {
        NBUCKETS_OPTIONS[ins_point - 1]
    }
}

/// Rebuilds a SysV `.hash` table from scratch for the (already rewritten)
/// symbol table `symbols`, writing `nbucket`, `nchain`, the bucket array and
/// the chain array at `offset`.
///
/// `symbols` must be indexed exactly as the on-disk `.dynsym` is: `symbols[i]`
/// is the entry hashed into bucket `elf_hash(name) % nbucket`, chained via
/// `chain[i]`.
pub fn rebuild<S: Write + Seek>(
    stream: &mut S,
    offset: u64,
    symbols: &[RawSymbol],
    class: ElfClass,
    endian: Endian,
) -> Result<()> {
    let is64 = matches!(class, ElfClass::Elf64);
    let nchain = symbols.len() as u32;
    let nbucket = calc_nbuckets(nchain);

    let mut buckets = vec![0u32; nbucket as usize];
    let mut chain = vec![0u32; nchain as usize];

    for sym in symbols {
        let b = (elf_hash(sym.name.as_bytes()) % nbucket) as usize;
        chain[sym.index] = buckets[b];
        buckets[b] = sym.index as u32;
    }

    stream.seek(SeekFrom::Start(offset))?;
    endian.write_word_sized(stream, is64, nbucket as u64)?;
    endian.write_word_sized(stream, is64, nchain as u64)?;
    for b in &buckets {
        endian.write_word_sized(stream, is64, *b as u64)?;
    }
    for c in &chain {
        endian.write_word_sized(stream, is64, *c as u64)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paste::paste;

    #[test]
    fn elf_hash_matches_known_vectors() {
        assert_eq!(elf_hash(b""), 0);
        // Reference value for "main" under the classic ELF string hash.
        assert_eq!(elf_hash(b"main"), 0x0007_37fe);
        assert_eq!(elf_hash(b"main"), elf_hash(b"main"));
        assert_ne!(elf_hash(b"main"), elf_hash(b"exit"));
    }

    macro_rules! nbuckets_case {
        ($name:ident, $nchain:expr, $expected:expr) => {
            paste! {
                #[test]
                fn [<nbuckets_schedule_ $name>]() {
                    assert_eq!(calc_nbuckets($nchain), $expected);
                }
            }
        };
    }

    nbuckets_case!(empty_table_uses_the_largest_bucket_count, 0, 262_147);
    nbuckets_case!(one_chain, 1, 1);
    nbuckets_case!(two_chains, 2, 1);
    nbuckets_case!(three_chains, 3, 3);
    nbuckets_case!(sixteen_chains_stays_on_the_three_bucket_step, 16, 3);
    nbuckets_case!(seventeen_chains_steps_up, 17, 17);
    nbuckets_case!(sixty_seven_chains, 67, 67);
}
