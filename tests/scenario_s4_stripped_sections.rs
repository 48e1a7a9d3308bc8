//! End to end: a shared object with no section header table at all. The
//! tool has to fall back to the `PT_DYNAMIC`-derived view for every table,
//! and since none of those tables have a real `sh_size` to persist, the
//! symbol table's physical entries are never deleted or shifted - only
//! counted as removed.

mod common;

use common::*;
use elfremove::{Config, ElfFile, SymbolQuery};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;

const QUUX_SIZE: u64 = 8;

fn build() -> (Vec<u8>, u64 /* quux addr */, u64 /* dynsym offset */) {
    let mut buf = Vec::new();
    push_elf_header(&mut buf, 2); // e_shnum/e_shoff/e_shstrndx stay zero: stripped

    let phdr_table_at = buf.len();
    buf.resize(phdr_table_at + 112, 0);

    align8(&mut buf);
    let quux_addr = buf.len() as u64;
    buf.extend(std::iter::repeat(0x90u8).take(QUUX_SIZE as usize));

    // .dynsym immediately followed by .dynstr, with no gap: the
    // dynamic-segment reconstruction path infers the symbol count from the
    // distance between DT_SYMTAB and DT_STRTAB.
    align8(&mut buf);
    let dynsym_offset = buf.len() as u64;
    push_sym(&mut buf, 0, 0, 0, 0, 0, 0); // null entry
    const STB_GLOBAL: u8 = 1;
    const STT_FUNC: u8 = 2;
    push_sym(&mut buf, 1, STB_GLOBAL, STT_FUNC, 1, quux_addr, QUUX_SIZE); // "quux", name at dynstr+1

    let dynstr_offset = buf.len() as u64;
    let mut dynstr = vec![0u8];
    dynstr.extend_from_slice(b"quux\0");
    let dynstr_size = dynstr.len() as u64;
    buf.extend_from_slice(&dynstr);

    align8(&mut buf);
    let dynamic_offset = buf.len() as u64;
    let mut dyn_entries = Vec::new();
    push_i64(&mut dyn_entries, DT_SYMTAB);
    push_u64(&mut dyn_entries, dynsym_offset);
    push_i64(&mut dyn_entries, DT_STRTAB);
    push_u64(&mut dyn_entries, dynstr_offset);
    push_i64(&mut dyn_entries, DT_STRSZ);
    push_u64(&mut dyn_entries, dynstr_size);
    push_i64(&mut dyn_entries, DT_NULL);
    push_u64(&mut dyn_entries, 0);
    let dynamic_size = dyn_entries.len() as u64;
    buf.extend_from_slice(&dyn_entries);

    let mut phdrs = Vec::new();
    push_phdr(&mut phdrs, PT_LOAD, 0, 0, 0x10_0000);
    push_phdr(&mut phdrs, PT_DYNAMIC, dynamic_offset, dynamic_offset, dynamic_size);
    buf[phdr_table_at..phdr_table_at + 112].copy_from_slice(&phdrs);

    (buf, quux_addr, dynsym_offset)
}

#[test]
fn stripped_binary_removal_leaves_synthetic_table_entries_physically_intact() {
    let (bytes, quux_addr, dynsym_offset) = build();
    let before = bytes.clone();

    let cursor = Cursor::new(bytes);
    let config = Config::builder().build();
    let mut file = ElfFile::from_stream(cursor, Path::new("libstripped.so"), config).unwrap();

    let mut names = HashSet::new();
    names.insert("quux".to_string());
    file.collect_symbols_in_dynsym(&SymbolQuery::Names(&names), false).unwrap();
    let removed = file.remove_symbols_from_dynsym(true).unwrap();
    assert_eq!(removed, 1);

    let out = file.into_inner().into_inner();

    // quux's code is untouched: a synthetic section is never physically
    // compacted, so `overwrite` must not fire for it either.
    assert_eq!(
        &out[quux_addr as usize..(quux_addr + QUUX_SIZE) as usize],
        &before[quux_addr as usize..(quux_addr + QUUX_SIZE) as usize]
    );

    // Both Elf64_Sym entries (the null entry and quux's) keep their
    // st_info/st_other/st_shndx/st_value/st_size bytes exactly as written:
    // with no section header to hold a size, the table is never compacted.
    let entry = |b: &[u8], i: usize| &b[dynsym_offset as usize + i * 24 + 4..dynsym_offset as usize + i * 24 + 24];
    assert_eq!(entry(&out, 0), entry(&before, 0));
    assert_eq!(entry(&out, 1), entry(&before, 1));
}
