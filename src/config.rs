//! Configuration surface threaded through [`crate::ElfFile::open`] and the
//! external-symtab search, built with `typed-builder`.

use std::path::PathBuf;
use typed_builder::TypedBuilder;

/// Tunables for one [`crate::ElfFile`] session.
///
/// `Config::default()` seeds every field that the original project reads
/// from the process environment (`EXTERNAL_DEBUG_DIR`, `EXTERNAL_BUILDID_DIR`,
/// `USE_DEBUGINFOD`, `LD_BUGGY`); fields with no environment counterpart keep
/// their builder defaults and are only ever set by the caller.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Config {
    /// Overwrite removed function bodies with `0xCC`. Default `true`.
    #[builder(default = true)]
    pub overwrite_code: bool,

    /// Caller-supplied path to a companion file carrying a `.symtab`, tried
    /// before any directory search.
    #[builder(default, setter(into, strip_option))]
    pub external_symtab_path: Option<PathBuf>,

    /// Directories searched (in order) for `<basename>` / `<basename>.debug`
    /// before falling back to the well-known system debug directory.
    /// Seeded from `EXTERNAL_DEBUG_DIR` (colon-separated).
    #[builder(default, setter(into))]
    pub external_debug_dir: Vec<PathBuf>,

    /// Root directory of a build-id-indexed debug store, tried before the
    /// well-known `/usr/lib/debug/.build-id`. Seeded from
    /// `EXTERNAL_BUILDID_DIR`.
    #[builder(default, setter(into, strip_option))]
    pub external_buildid_dir: Option<PathBuf>,

    /// Consult a debuginfod-style lookup service as a last resort when a
    /// build id was found but no path-based candidate worked. Seeded from
    /// the mere presence of `USE_DEBUGINFOD`.
    #[builder(default)]
    pub use_debuginfod: bool,

    /// Force `need_continuous_relocations` regardless of what the dynamic
    /// tags and ABI note say. Seeded from the mere presence of `LD_BUGGY`.
    #[builder(default)]
    pub force_continuous_relocations: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Config {
    /// Builds a `Config` by reading the same environment variables the
    /// original `ELFRemove.__init__` consults.
    pub fn from_env() -> Self {
        let external_debug_dir = std::env::var("EXTERNAL_DEBUG_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.split(':').map(PathBuf::from).collect())
            .unwrap_or_default();
        let external_buildid_dir = std::env::var("EXTERNAL_BUILDID_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let use_debuginfod = std::env::var_os("USE_DEBUGINFOD").is_some();
        let force_continuous_relocations = std::env::var_os("LD_BUGGY").is_some();

        Config::builder()
            .external_debug_dir(external_debug_dir)
            .external_buildid_dir(external_buildid_dir)
            .use_debuginfod(use_debuginfod)
            .force_continuous_relocations(force_continuous_relocations)
            .build()
    }
}
