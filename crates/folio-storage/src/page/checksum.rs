//! Page checksum utilities.
//!
//! Pages written to the log carry a CRC32 of their contents so that restore
//! can detect a torn tail left by a crash in the middle of a write.

/// Offset of the checksum field in the page header.
pub const CHECKSUM_OFFSET: usize = 28;

/// Computes a checksum for a page, excluding the checksum field itself.
///
/// # Example
///
/// ```rust
/// use folio_storage::page::{compute_page_checksum, CHECKSUM_OFFSET};
///
/// let page = vec![7u8; 8192];
/// let checksum = compute_page_checksum(&page);
/// assert_ne!(checksum, 0);
/// # let _ = CHECKSUM_OFFSET;
/// ```
#[must_use]
pub fn compute_page_checksum(page_data: &[u8]) -> u32 {
    debug_assert!(CHECKSUM_OFFSET + 4 <= page_data.len());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_data[..CHECKSUM_OFFSET]);
    hasher.update(&page_data[CHECKSUM_OFFSET + 4..]);
    hasher.finalize()
}

/// Reads the checksum stored in the page header.
#[must_use]
pub fn stored_checksum(page_data: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&page_data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4]);
    u32::from_le_bytes(raw)
}

/// Computes and stores the page checksum.
pub fn write_page_checksum(page_data: &mut [u8]) {
    let checksum = compute_page_checksum(page_data);
    page_data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
}

/// Returns true if the stored checksum matches the page contents.
#[must_use]
pub fn verify_page_checksum(page_data: &[u8]) -> bool {
    compute_page_checksum(page_data) == stored_checksum(page_data)
}
