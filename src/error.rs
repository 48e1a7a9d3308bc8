//! Error taxonomy for the removal core.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while inspecting or rewriting an ELF file.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// `e_machine` is neither `EM_386` nor `EM_X86_64`.
    #[error("unsupported architecture: e_machine = {e_machine:#x}")]
    UnsupportedArchitecture {
        /// The raw `e_machine` value read from the file.
        e_machine: u16,
    },

    /// The first four bytes of the file are not `\x7fELF`.
    #[error("not an ELF file: bad magic {magic:02x?}")]
    InvalidMagic {
        /// The bytes actually read where `\x7fELF` was expected.
        magic: [u8; 4],
    },

    /// A required section is absent and no synthetic fallback could be built.
    #[error("required section '{name}' is not present in the file")]
    MissingSection {
        /// Conventional section name, e.g. `.dynsym`.
        name: &'static str,
    },

    /// A `SymbolRef` was collected before a mutation bumped its section's version.
    #[error("symbol collection for section '{section}' is stale (collected at version {collected}, now at {current})")]
    StaleCollection {
        /// Name of the owning section.
        section: String,
        /// Version counter captured at collection time.
        collected: u64,
        /// The section's current version counter.
        current: u64,
    },

    /// An on-disk structure disagrees with a value this implementation recomputed.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// A requested size decrement would drive a section's `sh_size` negative.
    #[error("size underflow: section '{section}' has size {current} but a decrement of {amount} was requested")]
    SizeUnderflow {
        /// Name of the section being shrunk.
        section: String,
        /// Current on-disk size.
        current: u64,
        /// Amount the caller tried to subtract.
        amount: u64,
    },

    /// A string read from `.dynstr` (or supplied on the CLI) was not valid UTF-8.
    #[error("invalid UTF-8 in ELF string table: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Underlying I/O failure.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying error.
        #[from]
        source: std::io::Error,
    },

    /// A companion debug-info file could not be opened even though its path was resolved.
    #[error("failed to open external symbol table at {path}: {source}")]
    ExternalSymtab {
        /// Path that failed to open.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}
