//! Section bookkeeping: a small enumeration of the section kinds this tool
//! cares about, plus the located, versioned handle ([`SectionRef`]) the rest
//! of the crate passes around instead of re-resolving sections by name.
//!
//! This replaces the original's duck-typed `sect.name == '.gnu.hash'` chain
//! with a lookup table keyed on a closed enum: synthetic (stripped-header)
//! sections reuse the same variant with the header-index sentinel rather
//! than a parallel type.

/// The conventional section kinds this tool locates and may rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    /// `.dynsym`
    DynSym,
    /// `.symtab`
    SymTab,
    /// `.dynstr`
    DynStr,
    /// `.gnu.hash`
    GnuHash,
    /// `.hash`
    SysvHash,
    /// `.gnu.version`
    GnuVersion,
    /// `.gnu.version_r`
    GnuVersionNeed,
    /// `.gnu.version_d`
    GnuVersionDef,
    /// `.rel.plt` / `.rela.plt`
    RelPlt,
    /// `.rel.dyn` / `.rela.dyn`
    RelDyn,
    /// `.dynamic`
    Dynamic,
}

impl SectionKind {
    /// Maps a conventional on-disk section name to its kind, the way the
    /// inspector's section-table walk classifies each entry.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            ".dynsym" => SectionKind::DynSym,
            ".symtab" => SectionKind::SymTab,
            ".dynstr" => SectionKind::DynStr,
            ".gnu.hash" => SectionKind::GnuHash,
            ".hash" => SectionKind::SysvHash,
            ".gnu.version" => SectionKind::GnuVersion,
            ".gnu.version_r" => SectionKind::GnuVersionNeed,
            ".gnu.version_d" => SectionKind::GnuVersionDef,
            ".rel.plt" | ".rela.plt" => SectionKind::RelPlt,
            ".rel.dyn" | ".rela.dyn" => SectionKind::RelDyn,
            ".dynamic" => SectionKind::Dynamic,
            _ => return None,
        })
    }

    /// A human-readable conventional name, used in log messages and errors.
    pub fn canonical_name(self) -> &'static str {
        match self {
            SectionKind::DynSym => ".dynsym",
            SectionKind::SymTab => ".symtab",
            SectionKind::DynStr => ".dynstr",
            SectionKind::GnuHash => ".gnu.hash",
            SectionKind::SysvHash => ".hash",
            SectionKind::GnuVersion => ".gnu.version",
            SectionKind::GnuVersionNeed => ".gnu.version_r",
            SectionKind::GnuVersionDef => ".gnu.version_d",
            SectionKind::RelPlt => ".rel[a].plt",
            SectionKind::RelDyn => ".rel[a].dyn",
            SectionKind::Dynamic => ".dynamic",
        }
    }
}

/// A located section: either backed by a real section-header-table entry, or
/// synthesized from `DT_*` dynamic tags when the section header table has
/// been stripped.
///
/// `index == -1` marks a synthetic section: its header does not exist on
/// disk, so [`SectionRef::persist_header`]-class operations must be skipped,
/// but its contents can still be read and (for writable tables) mutated in
/// place by file offset.
#[derive(Debug, Clone)]
pub struct SectionRef {
    /// Which conventional section this is.
    pub kind: SectionKind,
    /// Section-header-table index, or `-1` if synthesized from dynamic tags.
    pub index: i64,
    /// File offset of the section's contents (`sh_offset`).
    pub offset: u64,
    /// Size in bytes of the section's contents (`sh_size`).
    pub size: u64,
    /// Size in bytes of one entry, for table-shaped sections (`sh_entsize`).
    pub entsize: u64,
    /// Whether the underlying relocation/string format is the RELA (explicit
    /// addend) flavor. Only meaningful for [`SectionKind::RelPlt`] /
    /// [`SectionKind::RelDyn`].
    pub is_rela: bool,
    /// Monotonic version counter. Bumped every time this section's contents
    /// are mutated; any [`crate::symbol::SymbolRef`] captured at an earlier
    /// version is stale and must not be used, see
    /// [`crate::error::Error::StaleCollection`].
    pub version: u64,
}

impl SectionRef {
    /// True if this section exists only as a view over dynamic-segment data
    /// and has no on-disk section header to update.
    pub fn is_synthetic(&self) -> bool {
        self.index < 0
    }

    /// Number of entries, given a fixed `entsize`. Panics-free: returns 0 if
    /// `entsize` is 0 (never constructed that way in practice).
    pub fn entry_count(&self) -> u64 {
        if self.entsize == 0 {
            0
        } else {
            self.size / self.entsize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ref(index: i64, size: u64, entsize: u64) -> SectionRef {
        SectionRef {
            kind: SectionKind::DynSym,
            index,
            offset: 0,
            size,
            entsize,
            is_rela: false,
            version: 0,
        }
    }

    #[test]
    fn from_name_maps_conventional_names_and_rejects_unknown_ones() {
        assert_eq!(SectionKind::from_name(".dynsym"), Some(SectionKind::DynSym));
        assert_eq!(SectionKind::from_name(".rela.plt"), Some(SectionKind::RelPlt));
        assert_eq!(SectionKind::from_name(".rel.plt"), Some(SectionKind::RelPlt));
        assert_eq!(SectionKind::from_name(".text"), None);
    }

    #[test]
    fn is_synthetic_reflects_negative_index() {
        assert!(make_ref(-1, 24, 24).is_synthetic());
        assert!(!make_ref(3, 24, 24).is_synthetic());
    }

    #[test]
    fn entry_count_divides_by_entsize_and_never_panics_on_zero() {
        assert_eq!(make_ref(0, 240, 24).entry_count(), 10);
        assert_eq!(make_ref(0, 240, 0).entry_count(), 0);
    }
}
