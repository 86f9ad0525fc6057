//! Process-wide, read-once environment configuration (spec.md §6, §9).
//!
//! Each variable is parsed lazily on first use and cached for the lifetime
//! of the process, the same "init-at-first-read, no teardown" contract the
//! original library uses for its process-wide knobs.

use std::sync::OnceLock;

/// Default on-disk format chosen by [`crate::set::IpSet::write_default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordVersion {
    /// Let the writer choose based on the set's content (v2 for pure IPv4,
    /// v3 otherwise).
    Auto,
    V2,
    V3,
    V4,
    V5,
}

/// In-memory representation the set facade defaults new IPv4 sets to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncoreFormat {
    Flat,
    Radix,
}

fn record_version_cell() -> &'static OnceLock<RecordVersion> {
    static CELL: OnceLock<RecordVersion> = OnceLock::new();
    &CELL
}

fn incore_format_cell() -> &'static OnceLock<IncoreFormat> {
    static CELL: OnceLock<IncoreFormat> = OnceLock::new();
    &CELL
}

fn destroy_print_cell() -> &'static OnceLock<bool> {
    static CELL: OnceLock<bool> = OnceLock::new();
    &CELL
}

fn print_read_error_cell() -> &'static OnceLock<bool> {
    static CELL: OnceLock<bool> = OnceLock::new();
    &CELL
}

/// `SILK_IPSET_RECORD_VERSION`: default write version, `{0, 2, 3, 4, 5}`.
pub fn record_version() -> RecordVersion {
    *record_version_cell().get_or_init(|| match std::env::var("SILK_IPSET_RECORD_VERSION") {
        Ok(v) => match v.trim() {
            "2" => RecordVersion::V2,
            "3" => RecordVersion::V3,
            "4" => RecordVersion::V4,
            "5" => RecordVersion::V5,
            _ => RecordVersion::Auto,
        },
        Err(_) => RecordVersion::Auto,
    })
}

/// `SKIPSET_INCORE_FORMAT`: `"iptree"` (flat) or `"radix"`; default flat.
pub fn incore_format() -> IncoreFormat {
    *incore_format_cell().get_or_init(|| match std::env::var("SKIPSET_INCORE_FORMAT") {
        Ok(v) if v.eq_ignore_ascii_case("radix") => IncoreFormat::Radix,
        _ => IncoreFormat::Flat,
    })
}

/// `SKIPSET_DESTROY_PRINT`: dump structural diagnostics on drop when set.
pub fn destroy_print() -> bool {
    *destroy_print_cell()
        .get_or_init(|| std::env::var_os("SKIPSET_DESTROY_PRINT").is_some())
}

/// `SILK_IPSET_PRINT_READ_ERROR`: print read-error detail when set and
/// non-zero.
pub fn print_read_error() -> bool {
    *print_read_error_cell().get_or_init(|| {
        matches!(std::env::var("SILK_IPSET_PRINT_READ_ERROR"), Ok(v) if v.trim() != "0" && !v.trim().is_empty())
    })
}
