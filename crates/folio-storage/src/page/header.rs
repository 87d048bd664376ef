//! Header page (page 0).
//!
//! ```text
//! 32   file info string (27 bytes)
//! 59   file version (u8)
//! 60   free empty page list head (u32)
//! 64   last page id (u32)
//! 68   creation time, unix millis (u64)
//! 76   user version (i32)
//! 80   salt (16 bytes, zero when unencrypted)
//! 100  collection count (u16)
//! 102  collections: [name len u8][name][page id u32] ...
//! ```

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use folio_common::{
    FolioError, FolioResult, PageId, TxnId, ENCRYPTION_SALT_SIZE, FILE_VERSION, HEADER_INFO,
    MAX_NAME_LENGTH, PAGE_SIZE,
};

use super::base::BasePage;
use super::types::PageType;
use crate::buffer::PageBuffer;

const P_HEADER_INFO: usize = 32;
const P_FILE_VERSION: usize = P_HEADER_INFO + HEADER_INFO.len();
const P_FREE_EMPTY_PAGE_ID: usize = 60;
const P_LAST_PAGE_ID: usize = 64;
const P_CREATION_TIME: usize = 68;
const P_USER_VERSION: usize = 76;
const P_ENCRYPTION_SALT: usize = 80;
const P_COLLECTION_COUNT: usize = 100;
const P_COLLECTIONS: usize = 102;

/// Bytes available for the collection map.
pub const COLLECTIONS_SIZE: usize = PAGE_SIZE - P_COLLECTIONS;

/// Snapshot of the mutable header fields, restored when a commit fails
/// halfway through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSavepoint {
    free_empty_page_list: PageId,
    last_page_id: PageId,
    user_version: i32,
    collections: BTreeMap<String, (String, PageId)>,
}

/// The file header: allocation state and the collection catalog.
#[derive(Debug)]
pub struct HeaderPage {
    page: BasePage,
    free_empty_page_list: PageId,
    last_page_id: PageId,
    creation_time: u64,
    user_version: i32,
    salt: [u8; ENCRYPTION_SALT_SIZE],
    /// Lowercase name to (original name, collection page id).
    collections: BTreeMap<String, (String, PageId)>,
}

impl HeaderPage {
    /// Initializes a new header for an empty file.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] if the buffer is shared.
    pub fn new(buffer: PageBuffer) -> FolioResult<Self> {
        let page = BasePage::new(buffer, PageId::HEADER, PageType::Header)?;
        let creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);

        let mut header = Self {
            page,
            free_empty_page_list: PageId::INVALID,
            last_page_id: PageId::HEADER,
            creation_time,
            user_version: 0,
            salt: [0u8; ENCRYPTION_SALT_SIZE],
            collections: BTreeMap::new(),
        };
        header.update_buffer()?;
        Ok(header)
    }

    /// Decodes a header page. A shared buffer is copied so the header can be
    /// modified in memory.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] when the file info string or the
    /// version do not match, or the collection map is malformed.
    pub fn load(buffer: PageBuffer) -> FolioResult<Self> {
        let buffer = if buffer.is_shared() {
            buffer.to_exclusive()
        } else {
            buffer
        };
        let page = BasePage::read_as(buffer, PageType::Header)?;
        let data = page.buffer().as_slice();

        if &data[P_HEADER_INFO..P_FILE_VERSION] != HEADER_INFO {
            return Err(FolioError::corruption("file is not a Folio data file"));
        }
        if data[P_FILE_VERSION] != FILE_VERSION {
            return Err(FolioError::corruption(format!(
                "unsupported file version {}",
                data[P_FILE_VERSION]
            )));
        }

        let read_u32 = |offset: usize| {
            u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
        };
        let mut time = [0u8; 8];
        time.copy_from_slice(&data[P_CREATION_TIME..P_CREATION_TIME + 8]);
        let mut user_version = [0u8; 4];
        user_version.copy_from_slice(&data[P_USER_VERSION..P_USER_VERSION + 4]);
        let mut salt = [0u8; ENCRYPTION_SALT_SIZE];
        salt.copy_from_slice(&data[P_ENCRYPTION_SALT..P_ENCRYPTION_SALT + ENCRYPTION_SALT_SIZE]);

        let count = u16::from_le_bytes([data[P_COLLECTION_COUNT], data[P_COLLECTION_COUNT + 1]]);
        let mut collections = BTreeMap::new();
        let mut offset = P_COLLECTIONS;
        for _ in 0..count {
            let len = data[offset] as usize;
            let end = offset + 1 + len + 4;
            if len == 0 || end > PAGE_SIZE {
                return Err(FolioError::corruption("malformed collection map in header"));
            }
            let name = std::str::from_utf8(&data[offset + 1..offset + 1 + len])
                .map_err(|_| FolioError::corruption("collection name is not UTF-8"))?
                .to_string();
            let page_id = PageId::new(read_u32(offset + 1 + len));
            collections.insert(name.to_lowercase(), (name, page_id));
            offset = end;
        }

        Ok(Self {
            free_empty_page_list: PageId::new(read_u32(P_FREE_EMPTY_PAGE_ID)),
            last_page_id: PageId::new(read_u32(P_LAST_PAGE_ID)),
            creation_time: u64::from_le_bytes(time),
            user_version: i32::from_le_bytes(user_version),
            salt,
            collections,
            page,
        })
    }

    /// Writes every field into the page buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::HeaderFull`] if the catalog no longer fits.
    pub fn update_buffer(&mut self) -> FolioResult<&PageBuffer> {
        if self.collections_size() > COLLECTIONS_SIZE {
            return Err(FolioError::HeaderFull {
                collection: String::new(),
            });
        }

        let data = self.page.data_mut()?;
        data[P_HEADER_INFO..P_FILE_VERSION].copy_from_slice(HEADER_INFO);
        data[P_FILE_VERSION] = FILE_VERSION;
        data[P_FREE_EMPTY_PAGE_ID..P_FREE_EMPTY_PAGE_ID + 4]
            .copy_from_slice(&self.free_empty_page_list.to_le_bytes());
        data[P_LAST_PAGE_ID..P_LAST_PAGE_ID + 4].copy_from_slice(&self.last_page_id.to_le_bytes());
        data[P_CREATION_TIME..P_CREATION_TIME + 8].copy_from_slice(&self.creation_time.to_le_bytes());
        data[P_USER_VERSION..P_USER_VERSION + 4].copy_from_slice(&self.user_version.to_le_bytes());
        data[P_ENCRYPTION_SALT..P_ENCRYPTION_SALT + ENCRYPTION_SALT_SIZE].copy_from_slice(&self.salt);
        data[P_COLLECTION_COUNT..P_COLLECTION_COUNT + 2]
            .copy_from_slice(&(self.collections.len() as u16).to_le_bytes());

        data[P_COLLECTIONS..].fill(0);
        let mut offset = P_COLLECTIONS;
        for (name, page_id) in self.collections.values() {
            let bytes = name.as_bytes();
            data[offset] = bytes.len() as u8;
            data[offset + 1..offset + 1 + bytes.len()].copy_from_slice(bytes);
            offset += 1 + bytes.len();
            data[offset..offset + 4].copy_from_slice(&page_id.to_le_bytes());
            offset += 4;
        }

        self.page.update_buffer()
    }

    /// Copies the current header into `target`, stamped with `txn_id` and
    /// the confirmed flag, for writing to the log. The in-memory header is
    /// left unconfirmed.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::ReadOnlyPage`] if `target` is shared.
    pub fn write_clone(&mut self, mut target: PageBuffer, txn_id: TxnId) -> FolioResult<PageBuffer> {
        self.page.set_transaction_id(txn_id);
        self.page.set_confirmed(true);
        let result = self
            .update_buffer()
            .map(|source| source.as_slice().to_vec())
            .and_then(|bytes| {
                target.as_mut_slice()?.copy_from_slice(&bytes);
                Ok(())
            });
        self.page.set_confirmed(false);
        self.page.set_dirty(false);
        result.map(|()| target)
    }

    /// The underlying page.
    #[must_use]
    pub fn page(&self) -> &BasePage {
        &self.page
    }

    /// Head of the free empty page list.
    #[inline]
    #[must_use]
    pub fn free_empty_page_list(&self) -> PageId {
        self.free_empty_page_list
    }

    /// Sets the head of the free empty page list.
    pub fn set_free_empty_page_list(&mut self, page_id: PageId) {
        self.free_empty_page_list = page_id;
        self.page.set_dirty(true);
    }

    /// Highest page id ever allocated.
    #[inline]
    #[must_use]
    pub fn last_page_id(&self) -> PageId {
        self.last_page_id
    }

    /// Sets the last allocated page id.
    pub fn set_last_page_id(&mut self, page_id: PageId) {
        self.last_page_id = page_id;
        self.page.set_dirty(true);
    }

    /// File creation time in unix milliseconds.
    #[must_use]
    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    /// Application-defined version number.
    #[must_use]
    pub fn user_version(&self) -> i32 {
        self.user_version
    }

    /// Sets the application-defined version number.
    pub fn set_user_version(&mut self, version: i32) {
        self.user_version = version;
        self.page.set_dirty(true);
    }

    /// Reserved encryption salt. All zero for unencrypted files.
    #[must_use]
    pub fn salt(&self) -> &[u8; ENCRYPTION_SALT_SIZE] {
        &self.salt
    }

    /// Collection page id for `name`, compared case-insensitively.
    #[must_use]
    pub fn get_collection_page_id(&self, name: &str) -> Option<PageId> {
        self.collections
            .get(&name.to_lowercase())
            .map(|(_, page_id)| *page_id)
    }

    /// Collection names as they were created.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.values().map(|(name, _)| name.clone()).collect()
    }

    /// Registers a collection.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidName`] for an invalid or duplicate name
    /// and [`FolioError::HeaderFull`] when the catalog has no room left.
    pub fn insert_collection(&mut self, name: &str, page_id: PageId) -> FolioResult<()> {
        validate_name(name)?;
        let key = name.to_lowercase();
        if self.collections.contains_key(&key) {
            return Err(FolioError::InvalidName {
                name: name.to_string(),
                reason: "collection already exists".to_string(),
            });
        }
        if name.len() + 5 > self.available_collection_space() {
            return Err(FolioError::HeaderFull {
                collection: name.to_string(),
            });
        }
        self.collections.insert(key, (name.to_string(), page_id));
        self.page.set_dirty(true);
        Ok(())
    }

    /// Removes a collection from the catalog. Returns its page id.
    pub fn delete_collection(&mut self, name: &str) -> Option<PageId> {
        let removed = self.collections.remove(&name.to_lowercase());
        if removed.is_some() {
            self.page.set_dirty(true);
        }
        removed.map(|(_, page_id)| page_id)
    }

    /// Bytes still free in the collection catalog.
    #[must_use]
    pub fn available_collection_space(&self) -> usize {
        COLLECTIONS_SIZE.saturating_sub(self.collections_size())
    }

    fn collections_size(&self) -> usize {
        self.collections
            .values()
            .map(|(name, _)| 1 + name.len() + 4)
            .sum()
    }

    /// Captures the mutable fields.
    #[must_use]
    pub fn savepoint(&self) -> HeaderSavepoint {
        HeaderSavepoint {
            free_empty_page_list: self.free_empty_page_list,
            last_page_id: self.last_page_id,
            user_version: self.user_version,
            collections: self.collections.clone(),
        }
    }

    /// Restores fields captured by [`HeaderPage::savepoint`].
    pub fn restore(&mut self, savepoint: HeaderSavepoint) {
        self.free_empty_page_list = savepoint.free_empty_page_list;
        self.last_page_id = savepoint.last_page_id;
        self.user_version = savepoint.user_version;
        self.collections = savepoint.collections;
        self.page.set_dirty(true);
    }
}

/// Checks a collection or index name: 1 to 60 bytes of ASCII letters,
/// digits, `_` or `-`, not starting with `$`.
///
/// # Errors
///
/// Returns [`FolioError::InvalidName`] describing the violation.
pub fn validate_name(name: &str) -> FolioResult<()> {
    let invalid = |reason: &str| FolioError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid("name is too long"));
    }
    if name.starts_with('$') {
        return Err(invalid("names starting with '$' are reserved"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid("only letters, digits, '_' and '-' are allowed"));
    }
    Ok(())
}
