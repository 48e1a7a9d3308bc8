//! Byte-assembly helpers shared by the end-to-end scenario tests: little bits
//! of an ELF64/x86-64 shared object, built up by hand rather than produced by
//! a real linker, so each scenario can control exactly the bytes the tool
//! will see.

pub const EM_X86_64: u16 = 62;
pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const ET_DYN: u16 = 3;

pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;

pub const DT_NULL: i64 = 0;
pub const DT_STRTAB: i64 = 5;
pub const DT_SYMTAB: i64 = 6;
pub const DT_STRSZ: i64 = 10;
pub const DT_GNU_HASH: i64 = 0x6ffffef5;
pub const DT_VERSYM: i64 = 0x6ffffff0;

/// Pads `buf` to the next multiple of 8 bytes.
pub fn align8(buf: &mut Vec<u8>) {
    while buf.len() % 8 != 0 {
        buf.push(0);
    }
}

pub fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}
pub fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
pub fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
pub fn push_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Appends a 64-byte Elf64_Ehdr. `e_shoff`/`e_shnum`/`e_shstrndx` are zero
/// (patched in by the caller once the rest of the layout is known, or left
/// zero for a section-header-stripped fixture).
pub fn push_elf_header(buf: &mut Vec<u8>, e_phnum: u16) {
    buf.extend_from_slice(b"\x7fELF");
    buf.push(ELFCLASS64);
    buf.push(ELFDATA2LSB);
    buf.push(1); // EI_VERSION
    buf.extend_from_slice(&[0u8; 9]); // padding
    push_u16(buf, ET_DYN);
    push_u16(buf, EM_X86_64);
    push_u32(buf, 1); // e_version
    push_u64(buf, 0); // e_entry
    push_u64(buf, 64); // e_phoff, right after the header
    push_u64(buf, 0); // e_shoff, patched later
    push_u32(buf, 0); // e_flags
    push_u16(buf, 64); // e_ehsize
    push_u16(buf, 56); // e_phentsize
    push_u16(buf, e_phnum);
    push_u16(buf, 64); // e_shentsize
    push_u16(buf, 0); // e_shnum, patched later
    push_u16(buf, 0); // e_shstrndx, patched later
}

pub fn patch_u16(buf: &mut [u8], offset: usize, v: u16) {
    buf[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
}
pub fn patch_u64(buf: &mut [u8], offset: usize, v: u64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}

pub const E_SHOFF: usize = 40;
pub const E_SHNUM: usize = 60;
pub const E_SHSTRNDX: usize = 62;

/// Appends one Elf64_Phdr (56 bytes).
pub fn push_phdr(buf: &mut Vec<u8>, p_type: u32, offset: u64, vaddr: u64, filesz: u64) {
    push_u32(buf, p_type);
    push_u32(buf, 0); // p_flags
    push_u64(buf, offset);
    push_u64(buf, vaddr);
    push_u64(buf, vaddr); // p_paddr
    push_u64(buf, filesz);
    push_u64(buf, filesz); // p_memsz
    push_u64(buf, 1); // p_align
}

/// Appends one Elf64_Sym (24 bytes). `shndx` of 1 marks a defined (non-`SHN_UNDEF`) symbol.
pub fn push_sym(buf: &mut Vec<u8>, st_name: u32, bind: u8, sym_type: u8, shndx: u16, value: u64, size: u64) {
    push_u32(buf, st_name);
    buf.push((bind << 4) | sym_type);
    buf.push(0); // st_other
    push_u16(buf, shndx);
    push_u64(buf, value);
    push_u64(buf, size);
}

/// Appends one Elf64_Shdr (64 bytes).
#[allow(clippy::too_many_arguments)]
pub fn push_shdr(buf: &mut Vec<u8>, name_idx: u32, sh_type: u32, offset: u64, size: u64, entsize: u64) {
    push_u32(buf, name_idx);
    push_u32(buf, sh_type);
    push_u64(buf, 0); // sh_flags
    push_u64(buf, offset); // sh_addr == sh_offset, identity-mapped PT_LOAD
    push_u64(buf, offset);
    push_u64(buf, size);
    push_u32(buf, 0); // sh_link
    push_u32(buf, 0); // sh_info
    push_u64(buf, 1); // sh_addralign
    push_u64(buf, entsize);
}

/// Builds a `.shstrtab` blob plus each pushed name's offset, NUL-prefixed so
/// offset 0 is the conventional empty name.
pub struct ShStrTab {
    pub bytes: Vec<u8>,
}

impl ShStrTab {
    pub fn new() -> Self {
        ShStrTab { bytes: vec![0u8] }
    }

    pub fn push(&mut self, name: &str) -> u32 {
        let idx = self.bytes.len() as u32;
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.push(0);
        idx
    }
}

/// One `.gnu.hash`-sized bucket/chain layout for a set of names, all landing
/// in distinct buckets so every chain is a singleton (end-of-chain bit set
/// on every entry) - avoids needing multi-entry chain bookkeeping in a test
/// fixture.
pub struct GnuHashLayout {
    pub nbuckets: u32,
    pub symoffset: u32,
    /// `dynsym` order the hashed names must appear in (ascending bucket).
    pub order: Vec<usize>,
    pub buckets: Vec<u32>,
    pub chains: Vec<u32>,
}

/// Lays out a `.gnu.hash` table for `names` (all treated as defined/exported,
/// starting right after `symoffset` reserved/undefined dynsym slots), using
/// one bucket per name so bucket assignment is injective and the resulting
/// table needs no multi-entry chain walking.
pub fn build_gnu_hash_layout(names: &[&str], symoffset: u32) -> GnuHashLayout {
    let nbuckets = (names.len() as u32).max(1) * 2 + 1;
    let mut by_bucket: Vec<(u32, usize)> = names
        .iter()
        .enumerate()
        .map(|(i, n)| (elfremove::gnuhash::gnu_hash(n.as_bytes()) % nbuckets, i))
        .collect();
    by_bucket.sort_by_key(|&(b, _)| b);

    let mut buckets = vec![0u32; nbuckets as usize];
    let mut chains = vec![0u32; names.len()];
    let mut order = Vec::with_capacity(names.len());
    for (slot, &(bucket, name_idx)) in by_bucket.iter().enumerate() {
        order.push(name_idx);
        buckets[bucket as usize] = symoffset + slot as u32;
        let hash = elfremove::gnuhash::gnu_hash(names[name_idx].as_bytes());
        chains[slot] = hash | 1; // singleton chain: end-of-chain bit always set
    }

    GnuHashLayout {
        nbuckets,
        symoffset,
        order,
        buckets,
        chains,
    }
}

/// Serializes a `.gnu.hash` section with no bloom filter words (`bloom_size = 0`).
pub fn push_gnu_hash(buf: &mut Vec<u8>, layout: &GnuHashLayout) {
    push_u32(buf, layout.nbuckets);
    push_u32(buf, layout.symoffset);
    push_u32(buf, 0); // bloom_size
    push_u32(buf, 0); // bloom_shift
    for b in &layout.buckets {
        push_u32(buf, *b);
    }
    for c in &layout.chains {
        push_u32(buf, *c);
    }
}
