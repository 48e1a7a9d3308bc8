//! `.dynstr` compaction: tracking every live byte range (symbol names,
//! `DT_SONAME`/`DT_NEEDED`/`DT_RPATH`/`DT_RUNPATH`, and version aux names) as
//! a refcounted multiset, then rebuilding the table with removed-symbol
//! ranges dropped and suffix aliases (`foo` inside `barfoo`) folded together.
//!
//! Grounded on `_parse_dynstr`/`_build_new_dynstr` in the original project.

use crate::primitive::read_cstring_at;
use crate::symbol::SymbolRef;
use crate::Result;
use std::collections::HashMap;
use std::io::{Read, Seek};

/// A byte range `[start, end)` within `.dynstr`, `end` being the offset one
/// past the entry's terminating NUL.
pub type StringRange = (u32, u32);

/// Tracks how many live references point at each string range, so a range
/// can be dropped from the rebuilt table only once every referencing symbol
/// has been removed (two live symbols may alias the same string offset).
#[derive(Debug, Clone, Default)]
pub struct DynstrRanges {
    counts: HashMap<StringRange, u32>,
}

impl DynstrRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one more live reference to `range`.
    pub fn add(&mut self, range: StringRange) {
        *self.counts.entry(range).or_insert(0) += 1;
    }

    /// Drops one reference to `range`; once it reaches zero the range is no
    /// longer considered live and won't appear in the rebuilt table.
    pub fn release(&mut self, range: StringRange) {
        if let Some(count) = self.counts.get_mut(&range) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&range);
            }
        }
    }

    pub fn contains(&self, range: StringRange) -> bool {
        self.counts.contains_key(&range)
    }
}

/// Reads the NUL-terminated string at `start` and returns its range.
pub fn string_range_at<S: Read + Seek>(
    stream: &mut S,
    dynstr_offset: u64,
    start: u32,
) -> Result<StringRange> {
    let bytes = read_cstring_at(stream, dynstr_offset + start as u64)?;
    Ok((start, start + bytes.len() as u32 + 1))
}

/// Rebuilds `.dynstr`'s contents after releasing `removed_symbols`' name
/// ranges from `ranges`.
///
/// Returns the new byte buffer (always starting with the empty string at
/// offset 0) and the old-offset -> new-offset map needed to fix up every
/// remaining `st_name`/`DT_SONAME`-style reference and every version aux
/// name index.
///
/// Implements `_build_new_dynstr`'s suffix-alias handling: when two live
/// ranges overlap because one string is a suffix of the string immediately
/// preceding it in file order (a common linker space-saving trick), the
/// alias is preserved by mapping its start to the corresponding offset
/// inside the already-copied superstring instead of copying it again.
pub fn rebuild<S: Read + Seek>(
    stream: &mut S,
    dynstr_offset: u64,
    ranges: &DynstrRanges,
    removed_symbols: &[SymbolRef],
) -> Result<(Vec<u8>, HashMap<u32, u32>)> {
    let mut ranges = ranges.clone();
    for symbol in removed_symbols {
        let range = string_range_at(stream, dynstr_offset, symbol.name_offset)?;
        ranges.release(range);
    }

    let mut sorted: Vec<StringRange> = ranges.counts.keys().copied().collect();
    sorted.sort_unstable();

    let mut index_map: HashMap<u32, u32> = HashMap::new();
    let mut out = vec![0u8];
    index_map.insert(0, 0);

    // Tracks the original (start, end) of the most recently *copied* range,
    // so a later range can be recognized as a suffix alias of it (`foo`
    // inside the tail of `barfoo`) instead of being copied again.
    let mut last_copied: Option<StringRange> = None;

    for &(start, end) in &sorted {
        if index_map.contains_key(&start) {
            continue;
        }
        if let Some((prev_start, prev_end)) = last_copied {
            if start < prev_end {
                debug_assert_eq!(prev_end, end, "overlapping dynstr ranges must share an end");
                let offset_in_string = start - prev_start;
                let new_start = index_map[&prev_start] + offset_in_string;
                index_map.insert(start, new_start);
                continue;
            }
        }

        let length = end - start;
        let new_start = out.len() as u32;
        index_map.insert(start, new_start);

        let mut buf = vec![0u8; length as usize];
        stream.seek(std::io::SeekFrom::Start(dynstr_offset + start as u64))?;
        stream.read_exact(&mut buf)?;
        out.extend_from_slice(&buf);

        last_copied = Some((start, end));
    }

    Ok((out, index_map))
}
