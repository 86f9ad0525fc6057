//! Error taxonomy shared by every public entry point (spec.md §4.8, §7).

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IpSetError>;

/// Every outcome a public `IpSet`/codec operation can report.
///
/// `Subset` and `MultiLeaf` are internal signals surfaced only by the
/// low-level find/insert machinery in [`crate::radix`]; they never escape
/// a public method on [`crate::set::IpSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpSetError {
    /// Prefix was 0 with a non-zero address, or greater than the address
    /// family's width.
    Prefix,
    /// The requested block/address is not present in the set.
    NotFound,
    /// Arena or mapping allocation failed (capacity overflow, OOM).
    Alloc,
    /// Caller-supplied argument was structurally invalid.
    BadInput,
    /// The underlying stream returned an I/O error.
    FileIo,
    /// The file's magic bytes didn't match this crate's format family.
    FileType,
    /// The file header was truncated or internally inconsistent.
    FileHeader,
    /// The file declared a format version this crate doesn't support.
    FileVersion,
    /// IPv6 content was asked to go into an IPv4-only container or file
    /// format with autoconvert disabled.
    Ipv6,
    /// The tree or file content violates a structural invariant.
    Corrupt,
    /// The operation requires a clean set (see [`crate::set::IpSet::clean`]).
    RequireClean,
    /// Internal: the found block is a strict superset of the request.
    Subset,
    /// Internal: no leaf or node occupies a spanned child slot.
    MultiLeaf,
}

impl fmt::Display for IpSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpSetError::Prefix => write!(f, "prefix length out of range for address family"),
            IpSetError::NotFound => write!(f, "address or block not found in set"),
            IpSetError::Alloc => write!(f, "allocation failed"),
            IpSetError::BadInput => write!(f, "invalid argument"),
            IpSetError::FileIo => write!(f, "I/O error on underlying stream"),
            IpSetError::FileType => write!(f, "file is not an ipsetstore file"),
            IpSetError::FileHeader => write!(f, "malformed file header"),
            IpSetError::FileVersion => write!(f, "unsupported file format version"),
            IpSetError::Ipv6 => write!(f, "IPv6 content incompatible with IPv4-only target"),
            IpSetError::Corrupt => write!(f, "set or file content violates an invariant"),
            IpSetError::RequireClean => write!(f, "operation requires a clean set"),
            IpSetError::Subset => write!(f, "internal: request is a subset of an existing block"),
            IpSetError::MultiLeaf => write!(f, "internal: spanned child slot is unoccupied"),
        }
    }
}

impl std::error::Error for IpSetError {}

impl From<std::io::Error> for IpSetError {
    fn from(_: std::io::Error) -> Self {
        IpSetError::FileIo
    }
}
