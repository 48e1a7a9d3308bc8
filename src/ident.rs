//! Identification values from the ELF header, read at runtime rather than
//! baked into const generics: the files this crate edits are chosen at
//! runtime, so class and encoding are runtime enums dispatched on once at
//! `ElfFile::open`, not compile-time parameters threaded through every type.

use num_derive::{FromPrimitive, ToPrimitive};

/// `EI_CLASS`: whether the object is 32- or 64-bit.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum ElfClass {
    /// `ELFCLASS32`
    Elf32 = 1,
    /// `ELFCLASS64`
    Elf64 = 2,
}

impl ElfClass {
    /// Size in bytes of an `Elf_Addr`/`Elf_Off`/`Elf_Word`-family word for this class
    /// where the ABI widens the field (addresses, offsets).
    pub const fn address_size(self) -> usize {
        match self {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        }
    }
}

/// `EI_DATA`: byte order of multi-byte fields.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum ElfDataEncoding {
    /// `ELFDATA2LSB`
    LittleEndian = 1,
    /// `ELFDATA2MSB`
    BigEndian = 2,
}

/// The subset of `e_machine` values this tool accepts; everything else is an
/// `UnsupportedArchitecture` error before any section is even looked up.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum ElfMachine {
    /// `EM_386`
    I386 = 3,
    /// `EM_X86_64`
    X86_64 = 62,
}

impl ElfMachine {
    /// Whether relocation sections on this machine are always the explicit-addend
    /// (`RELA`) flavor. Used only as a hint; the actual format is read from each
    /// section's own `sh_type`/`sh_entsize`, see [`crate::reloc`].
    pub const fn is_rela_only(self) -> bool {
        matches!(self, ElfMachine::X86_64)
    }
}
