//! Collection page: free-list heads and index definitions.
//!
//! ```text
//! 32   free data page list heads (5 x u32)
//! 52   free index page list heads (5 x u32)
//! 72   index count (u8)
//! 73   indexes: [slot u8][name len u8][name][expr len u16][expr]
//!               [unique u8][head 5][tail 5][max level u8] ...
//! ```

use std::collections::BTreeMap;

use folio_common::{
    FolioError, FolioResult, PageAddress, PageId, MAX_ITEMS_PER_PAGE, PAGE_ADDRESS_SIZE,
    PAGE_FREE_LIST_SLOTS, PAGE_SIZE, PRIMARY_KEY_INDEX,
};

use super::base::BasePage;
use super::header::validate_name;
use super::types::PageType;
use crate::buffer::PageBuffer;

const P_FREE_DATA_PAGE_LIST: usize = 32;
const P_FREE_INDEX_PAGE_LIST: usize = P_FREE_DATA_PAGE_LIST + PAGE_FREE_LIST_SLOTS * 4;
const P_INDEX_COUNT: usize = P_FREE_INDEX_PAGE_LIST + PAGE_FREE_LIST_SLOTS * 4;
const P_INDEXES: usize = P_INDEX_COUNT + 1;

/// Bytes available for index definitions.
pub const INDEXES_SIZE: usize = PAGE_SIZE - P_INDEXES;

/// Which of a collection's two free-page list families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FreeListKind {
    /// Data pages holding document blocks.
    Data,
    /// Index pages holding skip-list nodes.
    Index,
}

/// Definition of one skip-list index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionIndex {
    /// Slot number tagging this index's nodes.
    pub slot: u8,
    /// Index name.
    pub name: String,
    /// Source expression handed to the key extractor.
    pub expression: String,
    /// Whether keys must be unique.
    pub unique: bool,
    /// Head sentinel (MinValue).
    pub head: PageAddress,
    /// Tail sentinel (MaxValue).
    pub tail: PageAddress,
    /// Highest level any node of this index reaches.
    pub max_level: u8,
}

impl CollectionIndex {
    /// Creates an index definition without sentinels.
    #[must_use]
    pub fn new(slot: u8, name: &str, expression: &str, unique: bool) -> Self {
        Self {
            slot,
            name: name.to_string(),
            expression: expression.to_string(),
            unique,
            head: PageAddress::EMPTY,
            tail: PageAddress::EMPTY,
            max_level: 1,
        }
    }

    /// Returns true for the primary key index.
    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.slot == 0
    }

    /// Serialized length.
    #[must_use]
    pub fn length(&self) -> usize {
        1 + 1 + self.name.len() + 2 + self.expression.len() + 1 + PAGE_ADDRESS_SIZE * 2 + 1
    }

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut offset = 0;
        buf[offset] = self.slot;
        buf[offset + 1] = self.name.len() as u8;
        offset += 2;
        buf[offset..offset + self.name.len()].copy_from_slice(self.name.as_bytes());
        offset += self.name.len();
        buf[offset..offset + 2].copy_from_slice(&(self.expression.len() as u16).to_le_bytes());
        offset += 2;
        buf[offset..offset + self.expression.len()].copy_from_slice(self.expression.as_bytes());
        offset += self.expression.len();
        buf[offset] = u8::from(self.unique);
        offset += 1;
        self.head.write_to(&mut buf[offset..]);
        offset += PAGE_ADDRESS_SIZE;
        self.tail.write_to(&mut buf[offset..]);
        offset += PAGE_ADDRESS_SIZE;
        buf[offset] = self.max_level;
        offset + 1
    }

    fn read(buf: &[u8]) -> FolioResult<(Self, usize)> {
        let malformed = || FolioError::corruption("malformed index definition");
        let text = |bytes: &[u8]| {
            std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|_| malformed())
        };

        let slot = *buf.first().ok_or_else(malformed)?;
        let name_len = *buf.get(1).ok_or_else(malformed)? as usize;
        let mut offset = 2;
        let name = text(buf.get(offset..offset + name_len).ok_or_else(malformed)?)?;
        offset += name_len;
        let expr_len = buf
            .get(offset..offset + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
            .ok_or_else(malformed)?;
        offset += 2;
        let expression = text(buf.get(offset..offset + expr_len).ok_or_else(malformed)?)?;
        offset += expr_len;

        let fixed = buf
            .get(offset..offset + 1 + PAGE_ADDRESS_SIZE * 2 + 1)
            .ok_or_else(malformed)?;
        let index = Self {
            slot,
            name,
            expression,
            unique: fixed[0] != 0,
            head: PageAddress::read_from(&fixed[1..]),
            tail: PageAddress::read_from(&fixed[1 + PAGE_ADDRESS_SIZE..]),
            max_level: fixed[1 + PAGE_ADDRESS_SIZE * 2],
        };
        Ok((index, offset + fixed.len()))
    }
}

/// One collection's page.
#[derive(Debug)]
pub struct CollectionPage {
    page: BasePage,
    free_data_page_list: [PageId; PAGE_FREE_LIST_SLOTS],
    free_index_page_list: [PageId; PAGE_FREE_LIST_SLOTS],
    indexes: BTreeMap<String, CollectionIndex>,
}

impl CollectionPage {
    /// Initializes an empty collection page.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] if the buffer is shared.
    pub fn new(buffer: PageBuffer, page_id: PageId) -> FolioResult<Self> {
        let page = BasePage::new(buffer, page_id, PageType::Collection)?;
        Ok(Self {
            page,
            free_data_page_list: [PageId::INVALID; PAGE_FREE_LIST_SLOTS],
            free_index_page_list: [PageId::INVALID; PAGE_FREE_LIST_SLOTS],
            indexes: BTreeMap::new(),
        })
    }

    /// Decodes a collection page.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::PageTypeMismatch`] for other page types and
    /// [`FolioError::Corruption`] for a malformed index area.
    pub fn read(buffer: PageBuffer) -> FolioResult<Self> {
        let page = BasePage::read_as(buffer, PageType::Collection)?;
        let data = page.buffer().as_slice();

        let read_list = |start: usize| {
            let mut list = [PageId::INVALID; PAGE_FREE_LIST_SLOTS];
            for (i, head) in list.iter_mut().enumerate() {
                let offset = start + i * 4;
                *head = PageId::from_le_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                ]);
            }
            list
        };
        let free_data_page_list = read_list(P_FREE_DATA_PAGE_LIST);
        let free_index_page_list = read_list(P_FREE_INDEX_PAGE_LIST);

        let mut indexes = BTreeMap::new();
        let mut offset = P_INDEXES;
        for _ in 0..data[P_INDEX_COUNT] {
            let (index, len) = CollectionIndex::read(&data[offset..])?;
            offset += len;
            indexes.insert(index.name.clone(), index);
        }

        Ok(Self {
            page,
            free_data_page_list,
            free_index_page_list,
            indexes,
        })
    }

    /// Writes the free lists and index definitions into the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] if the buffer is shared.
    pub fn update_buffer(&mut self) -> FolioResult<&PageBuffer> {
        let data = self.page.data_mut()?;
        for i in 0..PAGE_FREE_LIST_SLOTS {
            let offset = P_FREE_DATA_PAGE_LIST + i * 4;
            data[offset..offset + 4].copy_from_slice(&self.free_data_page_list[i].to_le_bytes());
            let offset = P_FREE_INDEX_PAGE_LIST + i * 4;
            data[offset..offset + 4].copy_from_slice(&self.free_index_page_list[i].to_le_bytes());
        }

        data[P_INDEX_COUNT] = self.indexes.len() as u8;
        data[P_INDEXES..].fill(0);
        let mut offset = P_INDEXES;
        let mut ordered: Vec<&CollectionIndex> = self.indexes.values().collect();
        ordered.sort_by_key(|index| index.slot);
        for index in ordered {
            offset += index.write(&mut data[offset..]);
        }

        self.page.update_buffer()
    }

    /// Writes the page and hands the buffer back.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] if the buffer is shared.
    pub fn into_buffer(mut self) -> FolioResult<PageBuffer> {
        self.update_buffer()?;
        self.page.into_buffer()
    }

    /// The underlying page.
    #[must_use]
    pub fn page(&self) -> &BasePage {
        &self.page
    }

    /// Mutable access to the underlying page.
    pub fn page_mut(&mut self) -> &mut BasePage {
        &mut self.page
    }

    /// Unwraps the underlying page without writing the collection area.
    /// Used when the page is being released as empty.
    #[must_use]
    pub fn into_page(self) -> BasePage {
        self.page
    }

    /// Page id of this collection page.
    #[must_use]
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    /// Returns true if the page was modified.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.page.is_dirty()
    }

    /// Head of the free list `slot` of `kind`.
    #[must_use]
    pub fn free_list_head(&self, kind: FreeListKind, slot: u8) -> PageId {
        match kind {
            FreeListKind::Data => self.free_data_page_list[slot as usize],
            FreeListKind::Index => self.free_index_page_list[slot as usize],
        }
    }

    /// Sets the head of the free list `slot` of `kind`.
    pub fn set_free_list_head(&mut self, kind: FreeListKind, slot: u8, page_id: PageId) {
        match kind {
            FreeListKind::Data => self.free_data_page_list[slot as usize] = page_id,
            FreeListKind::Index => self.free_index_page_list[slot as usize] = page_id,
        }
        self.page.set_dirty(true);
    }

    /// Index definition by name.
    #[must_use]
    pub fn get_index(&self, name: &str) -> Option<&CollectionIndex> {
        self.indexes.get(name)
    }

    /// Index definition by slot.
    #[must_use]
    pub fn get_index_by_slot(&self, slot: u8) -> Option<&CollectionIndex> {
        self.indexes.values().find(|index| index.slot == slot)
    }

    /// The primary key index.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] when it is missing.
    pub fn pk_index(&self) -> FolioResult<&CollectionIndex> {
        self.get_index(PRIMARY_KEY_INDEX).ok_or_else(|| {
            FolioError::corruption(format!(
                "collection page {} has no primary key index",
                self.page_id()
            ))
        })
    }

    /// Index definitions ordered by slot, primary key first.
    #[must_use]
    pub fn indexes(&self) -> Vec<&CollectionIndex> {
        let mut ordered: Vec<&CollectionIndex> = self.indexes.values().collect();
        ordered.sort_by_key(|index| index.slot);
        ordered
    }

    /// Adds an index definition on the first free slot. Sentinels are set
    /// by the index service afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::IndexAlreadyExists`] for a duplicate name,
    /// [`FolioError::InvalidName`] for an invalid one and
    /// [`FolioError::CollectionFull`] when no slot or space is left.
    pub fn insert_collection_index(
        &mut self,
        name: &str,
        expression: &str,
        unique: bool,
    ) -> FolioResult<&mut CollectionIndex> {
        if name != PRIMARY_KEY_INDEX {
            validate_name(name)?;
        }
        if self.indexes.contains_key(name) {
            return Err(FolioError::IndexAlreadyExists {
                collection: self.page_id().to_string(),
                index: name.to_string(),
            });
        }
        if expression.len() > u16::MAX as usize {
            return Err(FolioError::invalid_argument("index expression is too long"));
        }

        let full = || FolioError::CollectionFull {
            collection: name.to_string(),
        };
        let slot = (0..MAX_ITEMS_PER_PAGE as u8)
            .find(|slot| self.get_index_by_slot(*slot).is_none())
            .ok_or_else(full)?;
        let index = CollectionIndex::new(slot, name, expression, unique);
        if index.length() > self.available_index_space() {
            return Err(full());
        }

        self.page.set_dirty(true);
        Ok(self.indexes.entry(name.to_string()).or_insert(index))
    }

    /// Mutable access to an index definition, marking the page dirty.
    pub fn update_collection_index(&mut self, name: &str) -> Option<&mut CollectionIndex> {
        let index = self.indexes.get_mut(name)?;
        self.page.set_dirty(true);
        Some(index)
    }

    /// Removes an index definition.
    pub fn delete_collection_index(&mut self, name: &str) -> Option<CollectionIndex> {
        let removed = self.indexes.remove(name);
        if removed.is_some() {
            self.page.set_dirty(true);
        }
        removed
    }

    /// Bytes still free for index definitions.
    #[must_use]
    pub fn available_index_space(&self) -> usize {
        let used: usize = self.indexes.values().map(CollectionIndex::length).sum();
        INDEXES_SIZE.saturating_sub(used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection() -> CollectionPage {
        CollectionPage::new(PageBuffer::zeroed(), PageId::new(1)).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let mut page = collection();
        page.set_free_list_head(FreeListKind::Data, 2, PageId::new(8));
        page.set_free_list_head(FreeListKind::Index, 0, PageId::new(3));
        {
            let pk = page.insert_collection_index("_id", "$._id", true).unwrap();
            pk.head = PageAddress::new(PageId::new(3), 0);
            pk.tail = PageAddress::new(PageId::new(3), 1);
        }
        page.insert_collection_index("by_age", "$.age", false).unwrap();
        page.update_collection_index("by_age").unwrap().max_level = 5;

        let buffer = page.into_buffer().unwrap();
        let page = CollectionPage::read(buffer).unwrap();

        assert_eq!(page.free_list_head(FreeListKind::Data, 2), PageId::new(8));
        assert_eq!(page.free_list_head(FreeListKind::Data, 0), PageId::INVALID);
        assert_eq!(page.free_list_head(FreeListKind::Index, 0), PageId::new(3));

        let pk = page.pk_index().unwrap();
        assert!(pk.is_primary_key());
        assert!(pk.unique);
        assert_eq!(pk.tail, PageAddress::new(PageId::new(3), 1));

        let age = page.get_index("by_age").unwrap();
        assert_eq!(age.slot, 1);
        assert_eq!(age.expression, "$.age");
        assert_eq!(age.max_level, 5);
        assert_eq!(page.get_index_by_slot(1).map(|i| i.name.as_str()), Some("by_age"));
    }

    #[test]
    fn test_slot_reuse_after_delete() {
        let mut page = collection();
        page.insert_collection_index("_id", "$._id", true).unwrap();
        page.insert_collection_index("a", "$.a", false).unwrap();
        page.insert_collection_index("b", "$.b", false).unwrap();

        let removed = page.delete_collection_index("a").unwrap();
        assert_eq!(removed.slot, 1);

        let c = page.insert_collection_index("c", "$.c", false).unwrap();
        assert_eq!(c.slot, 1);
        let slots: Vec<u8> = page.indexes().iter().map(|i| i.slot).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn test_duplicate_index() {
        let mut page = collection();
        page.insert_collection_index("_id", "$._id", true).unwrap();
        assert!(matches!(
            page.insert_collection_index("_id", "$._id", true),
            Err(FolioError::IndexAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_collection_full() {
        let mut page = collection();
        let expression = "x".repeat(1000);
        let err = (0..20)
            .find_map(|i| {
                page.insert_collection_index(&format!("ix{i}"), &expression, false)
                    .err()
            })
            .unwrap();
        assert!(matches!(err, FolioError::CollectionFull { .. }));
    }
}
