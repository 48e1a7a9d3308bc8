//! GNU `.gnu.hash` table editing.
//!
//! Grounded on `_gnuhash`/`_batch_remove_gnu_hashtable`/`_edit_gnu_hashtable`
//! in the original project. Unlike SysV `.hash` this table is edited in
//! place rather than rebuilt: its chain array's end-of-chain marker bit and
//! bucket head pointers are patched per removed symbol, which is why removed
//! symbols must be processed in descending bucket order (the original raises
//! if that invariant is violated; this port returns
//! [`crate::error::Error::IntegrityViolation`] instead).

use crate::error::Error;
use crate::ident::ElfMachine;
use crate::primitive::Endian;
use crate::symbol::SymbolRef;
use crate::Result;
use std::io::{Read, Seek, SeekFrom, Write};

/// The GNU hash function (djb2 variant used by `.gnu.hash`).
pub fn gnu_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 5381;
    for &byte in name {
        h = h
            .wrapping_shl(5)
            .wrapping_add(h)
            .wrapping_add(byte as u32);
    }
    h
}

/// The decoded, mutable parameter block of a `.gnu.hash` section, as read
/// from the file and progressively edited by [`remove_symbols`].
#[derive(Debug, Clone)]
pub struct GnuHashParams {
    pub nbuckets: u32,
    pub symoffset: u32,
    pub bloom_size: u32,
    pub bloom_entry_size: u32,
    pub buckets: Vec<u32>,
    pub chains: Vec<u32>,
}

/// Reads a `.gnu.hash` section's header, bloom filter size and bucket array;
/// the chain array is read separately by the caller since its length depends
/// on the (possibly synthetic) `.dynsym` entry count.
pub fn read_params<S: Read + Seek>(
    stream: &mut S,
    offset: u64,
    machine: ElfMachine,
    endian: Endian,
) -> Result<GnuHashParams> {
    stream.seek(SeekFrom::Start(offset))?;
    let nbuckets = endian.read_u32(stream)?;
    let symoffset = endian.read_u32(stream)?;
    let bloom_size = endian.read_u32(stream)?;
    let _bloom_shift = endian.read_u32(stream)?;

    let bloom_entry_size: u32 = if matches!(machine, ElfMachine::I386) {
        4
    } else {
        8
    };

    stream.seek(SeekFrom::Start(
        offset + 16 + bloom_size as u64 * bloom_entry_size as u64,
    ))?;
    let mut buckets = Vec::with_capacity(nbuckets as usize);
    for _ in 0..nbuckets {
        buckets.push(endian.read_u32(stream)?);
    }

    Ok(GnuHashParams {
        nbuckets,
        symoffset,
        bloom_size,
        bloom_entry_size,
        buckets,
        chains: Vec::new(),
    })
}

/// Reads the chain array, which spans every `.dynsym` entry from `symoffset`
/// to `dynsym_count`.
pub fn read_chains<S: Read + Seek>(
    stream: &mut S,
    offset: u64,
    params: &GnuHashParams,
    dynsym_count: u32,
    endian: Endian,
) -> Result<Vec<u32>> {
    let chain_start = offset
        + 16
        + params.bloom_size as u64 * params.bloom_entry_size as u64
        + params.nbuckets as u64 * 4;
    stream.seek(SeekFrom::Start(chain_start))?;
    let nchains = dynsym_count - params.symoffset;
    let mut out = Vec::with_capacity(nchains as usize);
    for _ in 0..nchains {
        out.push(endian.read_u32(stream)?);
    }
    Ok(out)
}

/// Implements `_edit_gnu_hashtable`: pops one chain entry for the removed
/// symbol at `dynsym_nr` (whose precomputed hash is `func_hash`), and fixes
/// up the end-of-chain marker bit on the neighboring entry or bucket head.
fn edit_one(params: &mut GnuHashParams, dynsym_nr: usize, func_hash: u32) -> Result<()> {
    let sym_nr = dynsym_nr as i64 - params.symoffset as i64;
    if sym_nr < 0 {
        return Err(Error::IntegrityViolation(format!(
            "gnu.hash index out of bounds: {sym_nr}"
        )));
    }
    let sym_nr = sym_nr as usize;

    let bucket_hash = params.chains[sym_nr];
    if (bucket_hash & !1) != (func_hash & !1) {
        return Err(Error::IntegrityViolation(format!(
            "gnu.hash mismatch: calculated {func_hash:#x}, stored {bucket_hash:#x}"
        )));
    }

    params.chains.remove(sym_nr);

    if (bucket_hash & 1) == 1 {
        let bucket = (func_hash % params.nbuckets) as usize;
        if sym_nr != 0 {
            if params.chains[sym_nr - 1] & 1 == 1 {
                params.buckets[bucket] = 0;
            } else {
                params.chains[sym_nr - 1] |= 1;
            }
        } else {
            params.buckets[bucket] = 0;
        }
    }

    Ok(())
}

/// Removes `removed_symbols` from an already-read `.gnu.hash` parameter
/// block, in place. `removed_symbols` must be sorted by descending bucket
/// number for the bucket-offset-adjustment pass below to be correct, matching
/// the original's own precondition check.
///
/// `dynsym_size` is the `.dynsym` entry count *before* this removal batch.
pub fn remove_symbols(
    params: &mut GnuHashParams,
    removed_symbols: &[SymbolRef],
    dynsym_size: u32,
) -> Result<()> {
    let (undef_symbols, defined_symbols): (Vec<&SymbolRef>, Vec<&SymbolRef>) = removed_symbols
        .iter()
        .partition(|s| s.value == 0 && s.size == 0 && (s.index as u32) < params.symoffset);

    let func_hashes: Vec<u32> = defined_symbols
        .iter()
        .map(|s| gnu_hash(s.name.as_bytes()))
        .collect();
    let func_buckets: Vec<u32> = func_hashes.iter().map(|h| h % params.nbuckets).collect();

    let mut sorted_desc = func_buckets.clone();
    sorted_desc.sort_unstable_by(|a, b| b.cmp(a));
    if sorted_desc != func_buckets {
        return Err(Error::IntegrityViolation(
            "bucket numbers of symbols to be deleted are not sorted in descending order".into(),
        ));
    }

    for (idx, symbol) in defined_symbols.iter().enumerate() {
        edit_one(params, symbol.index, func_hashes[idx])?;
    }

    // Fix bucket indices accounting for deleted symbols, walking from the
    // back since later buckets need a larger subtraction.
    let mut max_idx = params.nbuckets as i64 - 1;
    let mut cur_sym = 0usize;
    let mut num_earlier_removed = defined_symbols.len() as i64;
    while max_idx >= 0 {
        while num_earlier_removed > 0 && func_buckets.get(cur_sym).copied().unwrap_or(0) as i64 >= max_idx {
            cur_sym += 1;
            num_earlier_removed -= 1;
        }
        if num_earlier_removed == 0 {
            break;
        }
        let i = max_idx as usize;
        params.buckets[i] = (params.buckets[i] as i64 - num_earlier_removed).max(0) as u32;
        max_idx -= 1;
    }

    // Zero out trailing buckets whose only symbol(s) were just deleted from
    // the tail of .dynsym.
    let mut tail_idx = params.nbuckets as i64 - 1;
    let tail_value = dynsym_size - defined_symbols.len() as u32;
    while tail_idx >= 0 && params.buckets[tail_idx as usize] == tail_value {
        params.buckets[tail_idx as usize] = 0;
        tail_idx -= 1;
    }

    // Removed SHN_UNDEF symbols shift every bucket pointer and symoffset
    // back by their count.
    for b in params.buckets.iter_mut() {
        *b = (*b as i64 - undef_symbols.len() as i64).max(0) as u32;
    }
    params.symoffset -= undef_symbols.len() as u32;

    Ok(())
}

/// Writes `symoffset`, the bucket array and the chain array back to the
/// section, zero-filling the bytes freed by the now-shorter chain array.
pub fn write_params<S: Write + Seek>(
    stream: &mut S,
    offset: u64,
    params: &GnuHashParams,
    original_nchains: usize,
    endian: Endian,
) -> Result<()> {
    stream.seek(SeekFrom::Start(offset + 4))?;
    endian.write_u32(stream, params.symoffset)?;

    let bucket_start = offset + 16 + params.bloom_size as u64 * params.bloom_entry_size as u64;
    stream.seek(SeekFrom::Start(bucket_start))?;
    for b in &params.buckets {
        endian.write_u32(stream, *b)?;
    }
    for c in &params.chains {
        endian.write_u32(stream, *c)?;
    }
    let missing = original_nchains.saturating_sub(params.chains.len());
    if missing > 0 {
        stream.write_all(&vec![0u8; missing * 4])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gnu_hash_matches_reference_vectors() {
        assert_eq!(gnu_hash(b""), 5381);
        // Known djb2-style GNU hash value, per the GNU ABI documentation.
        assert_eq!(gnu_hash(b"printf"), 0x156b_2bb8);
    }

    fn undef_sym(index: usize) -> SymbolRef {
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
    fn remove_symbols_shifts_symoffset_and_bucket_starts_for_an_undefined_removal() {
        let mut params = GnuHashParams {
            nbuckets: 2,
            symoffset: 5,
            bloom_size: 0,
            bloom_entry_size: 8,
            buckets: vec![2, 0],
            chains: vec![0; 3],
        };
        // dynsym index 3 is below symoffset 5, i.e. undefined.
        let removed = [undef_sym(3)];

        remove_symbols(&mut params, &removed, 8).unwrap();

        assert_eq!(params.symoffset, 4);
        assert_eq!(params.buckets, vec![1, 0]);
    }
}
