//! System-wide constants for Folio.
//!
//! This module defines the on-disk layout sizes and the engine limits shared
//! by every crate in the workspace.

// =============================================================================
// Page Layout Constants
// =============================================================================

/// Page size in bytes (8 KB). Every page in the data and log files has
/// exactly this size.
pub const PAGE_SIZE: usize = 8192;

/// Page header size in bytes.
///
/// The header contains: page_id (4), page_type (1), prev_page_id (4),
/// next_page_id (4), page_list_slot (1), items_count (1), highest_index (1),
/// used_bytes (2), fragmented_bytes (2), next_free_position (2),
/// transaction_id (4), is_confirmed (1), reserved (1), checksum (4) = 32 bytes.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Size of one footer slot: position (2) + length (2).
pub const SLOT_SIZE: usize = 4;

/// Serialized size of a page address: page id (4) + slot index (1).
pub const PAGE_ADDRESS_SIZE: usize = 5;

/// Highest slot index a page can hold. `u8::MAX` itself marks "no slot".
pub const MAX_ITEMS_PER_PAGE: usize = 255;

/// Number of free-list buckets kept per collection for data and index pages.
pub const PAGE_FREE_LIST_SLOTS: usize = 5;

/// Marker for a page that is not linked into any free-list bucket.
pub const NO_FREE_LIST_SLOT: u8 = u8::MAX;

// =============================================================================
// Data Block Constants
// =============================================================================

/// Fixed bytes of a data block: extend flag (1) + next block address (5).
pub const DATA_BLOCK_FIXED_SIZE: usize = 1 + PAGE_ADDRESS_SIZE;

/// Largest payload a single data block can carry.
pub const MAX_DATA_BYTES_PER_PAGE: usize =
    PAGE_SIZE - PAGE_HEADER_SIZE - SLOT_SIZE - DATA_BLOCK_FIXED_SIZE;

/// Maximum number of full pages a single document may span.
pub const MAX_DOCUMENT_PAGES: usize = 250;

/// Maximum encoded document size in bytes.
pub const MAX_DOCUMENT_SIZE: usize = MAX_DOCUMENT_PAGES * MAX_DATA_BYTES_PER_PAGE;

// =============================================================================
// Index Constants
// =============================================================================

/// Maximum number of skip-list levels.
pub const MAX_LEVEL_LENGTH: u8 = 32;

/// Maximum encoded index key length in bytes.
pub const MAX_INDEX_KEY_LENGTH: usize = 255;

/// Fixed bytes of an index node: slot (1) + levels (1) + data block (5) +
/// next node (5).
pub const INDEX_NODE_FIXED_SIZE: usize = 2 + PAGE_ADDRESS_SIZE * 2;

/// Name of the primary key index present in every collection.
pub const PRIMARY_KEY_INDEX: &str = "_id";

/// Maximum length of a collection or index name.
pub const MAX_NAME_LENGTH: usize = 60;

// =============================================================================
// Transaction Constants
// =============================================================================

/// Default number of pages a transaction may hold in memory before a
/// safepoint flushes them to the log.
pub const MAX_TRANSACTION_SIZE: usize = 10_000;

/// Default number of log pages after which a commit triggers a checkpoint.
pub const DEFAULT_CHECKPOINT_SIZE: usize = 1000;

/// Default number of pages held by the buffer pool.
pub const DEFAULT_CACHE_SIZE: usize = 4096;

// =============================================================================
// File Constants
// =============================================================================

/// Magic string stored at the start of the header page.
pub const HEADER_INFO: &[u8; 27] = b"** This is a Folio file **\0";

/// Current data file format version.
pub const FILE_VERSION: u8 = 1;

/// Size of the salt field reserved in the header page.
pub const ENCRYPTION_SALT_SIZE: usize = 16;
