//! Page layouts and on-disk format for Folio.
//!
//! Every page is 8 KB and starts with the same 32-byte header (see
//! [`BasePage`]). The content area depends on the page type:
//!
//! - **Header** (page 0): file identity, allocation state and the
//!   collection catalog
//! - **Collection**: free-list heads and index definitions
//! - **Index**: slotted segments holding skip-list [`IndexNode`]s
//! - **Data**: slotted segments holding document [`DataBlock`]s
//! - **Empty**: pages waiting in the free-empty list
//!
//! A page is always stored in the data file at `page_id * PAGE_SIZE`; newer
//! versions live in the log until a checkpoint copies them back.

mod base;
mod checksum;
mod collection;
mod data;
mod header;
mod index;
mod types;

pub use base::{free_index_slot, minimum_index_slot, BasePage, PAGE_AVAILABLE_BYTES};
pub use checksum::{
    compute_page_checksum, stored_checksum, verify_page_checksum, write_page_checksum,
    CHECKSUM_OFFSET,
};
pub use collection::{CollectionIndex, CollectionPage, FreeListKind, INDEXES_SIZE};
pub use data::DataBlock;
pub use header::{validate_name, HeaderPage, HeaderSavepoint, COLLECTIONS_SIZE};
pub use index::IndexNode;
pub use types::PageType;

#[cfg(test)]
mod tests {
    use super::*;
    use folio_common::{PAGE_HEADER_SIZE, PAGE_SIZE};

    #[test]
    fn test_page_constants() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert_eq!(PAGE_AVAILABLE_BYTES, PAGE_SIZE - PAGE_HEADER_SIZE);
        assert!(CHECKSUM_OFFSET + 4 <= PAGE_HEADER_SIZE);
        assert!(COLLECTIONS_SIZE > 0 && INDEXES_SIZE > 0);
    }
}
