//! In-place surgical removal of unused function symbols from shared ELF
//! libraries: strip a chosen set of exported or local functions from
//! `.dynsym`/`.symtab` and every table that references them by index
//! (relocations, hash tables, symbol versions, `.dynstr`), without disturbing
//! any surviving symbol's address or the file's overall layout.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod config;
pub mod dynamic;
pub mod dynstr;
pub mod error;
pub mod file;
pub mod gnuhash;
pub mod hash;
pub mod ident;
pub mod primitive;
pub mod reloc;
pub mod section;
pub mod symbol;
pub mod version;

pub use config::Config;
pub use error::{Error, Result};
pub use file::ElfFile;
pub use symbol::SymbolQuery;
