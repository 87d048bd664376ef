//! Skip-list index service.
//!
//! Every index is a skip list of [`IndexNode`]s stored in the collection's
//! index pages, bracketed by a head (`MinValue`) and a tail (`MaxValue`)
//! sentinel of full height:
//!
//! ```text
//!   level 2   head ─────────────────▶ 8 ──────────────────▶ ∅
//!   level 1   head ──────▶ 3 ───────▶ 8 ──────────────────▶ ∅
//!   level 0   head ◀──▶ 1 ◀──▶ 3 ◀──▶ 5 ◀──▶ 8 ◀──▶ tail
//! ```
//!
//! Level 0 is a complete, sorted, doubly linked list. Higher levels are
//! sparse shortcuts. Every node also carries a `next_node` link chaining
//! all index nodes of the same document, starting at its primary key node.

use std::cmp::Ordering;
use std::collections::HashSet;

use rand::Rng;
use tracing::{debug, trace};

use folio_common::{
    FolioError, FolioResult, IndexKey, Order, PageAddress, PageId, MAX_LEVEL_LENGTH, SLOT_SIZE,
};
use folio_storage::{BasePage, CollectionIndex, FreeListKind, IndexNode, PageType};
use folio_txn::Snapshot;

/// Index operations over one write or read snapshot.
pub struct IndexService<'a> {
    snapshot: &'a mut Snapshot,
}

impl<'a> IndexService<'a> {
    /// Creates a service over `snapshot`.
    pub fn new(snapshot: &'a mut Snapshot) -> Self {
        Self { snapshot }
    }

    fn page(&mut self, page_id: PageId) -> FolioResult<&mut BasePage> {
        self.snapshot.get_page_as(page_id, PageType::Index)
    }

    /// Reads the node at `address`, or `None` for the empty address.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] when the address holds no node.
    pub fn get_node(&mut self, address: PageAddress) -> FolioResult<Option<IndexNode>> {
        if address.is_empty() {
            return Ok(None);
        }
        let page = self.page(address.page_id)?;
        IndexNode::read(page, address.index).map(Some)
    }

    fn node(&mut self, address: PageAddress) -> FolioResult<IndexNode> {
        self.get_node(address)?
            .ok_or_else(|| FolioError::corruption("index link points to an empty address"))
    }

    fn set_next(&mut self, node: &mut IndexNode, level: u8, address: PageAddress) -> FolioResult<()> {
        let page = self.snapshot.get_page(node.position().page_id)?;
        node.set_next(page, level, address)
    }

    fn set_prev(&mut self, node: &mut IndexNode, level: u8, address: PageAddress) -> FolioResult<()> {
        let page = self.snapshot.get_page(node.position().page_id)?;
        node.set_prev(page, level, address)
    }

    fn set_next_node(&mut self, node: &mut IndexNode, address: PageAddress) -> FolioResult<()> {
        let page = self.snapshot.get_page(node.position().page_id)?;
        node.set_next_node(page, address)
    }

    /// Deletes the segment of `address` and moves its page to the right
    /// free-list bucket.
    fn free_node(&mut self, address: PageAddress) -> FolioResult<()> {
        self.page(address.page_id)?.delete(address.index)?;
        self.snapshot
            .add_or_remove_free_list(FreeListKind::Index, address.page_id)
    }

    /// Creates a new index: allocates the head and tail sentinels, links
    /// them at level 0 and registers the definition in the collection page.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::IndexAlreadyExists`] for a taken name and
    /// [`FolioError::CollectionFull`] when the collection page has no room.
    pub fn create_index(&mut self, name: &str, expression: &str, unique: bool) -> FolioResult<CollectionIndex> {
        let length = IndexNode::node_length(MAX_LEVEL_LENGTH, &IndexKey::MinValue);
        let page_id = self
            .snapshot
            .get_free_page(FreeListKind::Index, length * 2 + SLOT_SIZE)?;

        let slot = self
            .snapshot
            .collection_page_mut()?
            .insert_collection_index(name, expression, unique)?
            .slot;

        let page = self.page(page_id)?;
        let mut head = IndexNode::insert(page, slot, MAX_LEVEL_LENGTH, IndexKey::MinValue, PageAddress::EMPTY)?;
        let mut tail = IndexNode::insert(page, slot, MAX_LEVEL_LENGTH, IndexKey::MaxValue, PageAddress::EMPTY)?;
        head.set_next(page, 0, tail.position())?;
        tail.set_prev(page, 0, head.position())?;
        self.snapshot
            .add_or_remove_free_list(FreeListKind::Index, page_id)?;

        let index = self
            .snapshot
            .collection_page_mut()?
            .update_collection_index(name)
            .ok_or_else(|| FolioError::internal(format!("index '{name}' vanished while created")))?;
        index.head = head.position();
        index.tail = tail.position();

        debug!(index = name, slot, expression, unique, "index created");
        Ok(index.clone())
    }

    /// Random node height: 1 plus the number of leading heads in a row of
    /// fair coin flips, capped at [`MAX_LEVEL_LENGTH`].
    #[must_use]
    pub fn flip_coin() -> u8 {
        let mut rng = rand::thread_rng();
        let mut level = 1;
        while level < MAX_LEVEL_LENGTH && rng.gen::<bool>() {
            level += 1;
        }
        level
    }

    /// Inserts `key` pointing at `data_block`. When `last` is given, the
    /// new node is chained after it as the next node of the same document.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidIndexKey`] for a sentinel key,
    /// [`FolioError::IndexKeyTooLong`] for an oversized key and
    /// [`FolioError::DuplicateKey`] when a unique index already holds `key`.
    pub fn add_node(
        &mut self,
        index: &mut CollectionIndex,
        key: IndexKey,
        data_block: PageAddress,
        last: Option<&mut IndexNode>,
    ) -> FolioResult<IndexNode> {
        if key.is_sentinel() {
            return Err(FolioError::InvalidIndexKey {
                message: "MinValue and MaxValue cannot be stored in an index".to_string(),
            });
        }
        key.validate_length()?;

        if index.unique && self.find(index, &key, false, Order::Ascending)?.is_some() {
            return Err(FolioError::DuplicateKey {
                index: index.name.clone(),
                key: key.to_string(),
            });
        }

        if let Some(stored) = self
            .snapshot
            .collection_page()
            .and_then(|page| page.get_index(&index.name))
        {
            index.max_level = index.max_level.max(stored.max_level);
        }

        let level = Self::flip_coin();
        if level > index.max_level {
            index.max_level = level;
            if let Some(stored) = self
                .snapshot
                .collection_page_mut()?
                .update_collection_index(&index.name)
            {
                stored.max_level = level;
            }
        }

        self.add_node_at_level(index, key, data_block, level, last)
    }

    fn add_node_at_level(
        &mut self,
        index: &CollectionIndex,
        key: IndexKey,
        data_block: PageAddress,
        level: u8,
        last: Option<&mut IndexNode>,
    ) -> FolioResult<IndexNode> {
        let length = IndexNode::node_length(level, &key);
        let page_id = self.snapshot.get_free_page(FreeListKind::Index, length)?;
        let mut node = IndexNode::insert(self.page(page_id)?, index.slot, level, key, data_block)?;
        self.snapshot
            .add_or_remove_free_list(FreeListKind::Index, page_id)?;

        let mut cur = self.node(index.head)?;
        for i in (0..index.max_level).rev() {
            loop {
                let next_address = cur.next(i);
                if next_address.is_empty() {
                    break;
                }
                let next = self.node(next_address)?;
                if next.key().cmp(node.key()) == Ordering::Greater {
                    break;
                }
                cur = next;
            }

            if i < level {
                let next_address = cur.next(i);
                self.set_next(&mut node, i, next_address)?;
                self.set_prev(&mut node, i, cur.position())?;
                self.set_next(&mut cur, i, node.position())?;
                if let Some(mut next) = self.get_node(next_address)? {
                    self.set_prev(&mut next, i, node.position())?;
                }
            }
        }

        if let Some(last) = last {
            if !last.next_node().is_empty() {
                return Err(FolioError::internal(format!(
                    "index node {} already has a next node",
                    last.position()
                )));
            }
            self.set_next_node(last, node.position())?;
        }

        trace!(index = %index.name, position = %node.position(), level, "index node added");
        Ok(node)
    }

    /// Every node of a document, starting at `pk_node`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a broken chain.
    pub fn get_node_list(&mut self, pk_node: &IndexNode) -> FolioResult<Vec<IndexNode>> {
        let mut nodes = vec![pk_node.clone()];
        let mut next = pk_node.next_node();
        while let Some(node) = self.get_node(next)? {
            next = node.next_node();
            nodes.push(node);
        }
        Ok(nodes)
    }

    fn unlink(&mut self, node: &IndexNode) -> FolioResult<()> {
        for i in (0..node.levels()).rev() {
            if let Some(mut prev) = self.get_node(node.prev(i))? {
                self.set_next(&mut prev, i, node.next(i))?;
            }
            if let Some(mut next) = self.get_node(node.next(i))? {
                self.set_prev(&mut next, i, node.prev(i))?;
            }
        }
        Ok(())
    }

    /// Unlinks and frees a single node. The caller fixes the document's
    /// node chain.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] when `address` holds no node.
    pub fn delete(&mut self, address: PageAddress) -> FolioResult<()> {
        let node = self.node(address)?;
        self.unlink(&node)?;
        self.free_node(address)
    }

    /// Deletes every node of the document whose primary key node is at
    /// `pk_address`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a broken chain.
    pub fn delete_all(&mut self, pk_address: PageAddress) -> FolioResult<()> {
        let mut next = pk_address;
        while let Some(node) = self.get_node(next)? {
            self.unlink(&node)?;
            self.free_node(node.position())?;
            next = node.next_node();
        }
        Ok(())
    }

    /// Deletes the nodes at `to_delete` from the document chain starting at
    /// `pk_address`, relinking the survivors. Returns the last surviving
    /// node.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a broken chain.
    pub fn delete_list(
        &mut self,
        pk_address: PageAddress,
        to_delete: &HashSet<PageAddress>,
    ) -> FolioResult<IndexNode> {
        let mut last = self.node(pk_address)?;
        let mut next = last.next_node();

        while let Some(node) = self.get_node(next)? {
            next = node.next_node();
            if to_delete.contains(&node.position()) {
                self.unlink(&node)?;
                self.free_node(node.position())?;
                self.set_next_node(&mut last, next)?;
            } else {
                last = node;
            }
        }
        Ok(last)
    }

    /// Removes every node of `index`, its sentinels and its definition.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidArgument`] for the primary key index.
    pub fn drop_index(&mut self, index: &CollectionIndex) -> FolioResult<()> {
        if index.is_primary_key() {
            return Err(FolioError::invalid_argument("the primary key index cannot be dropped"));
        }
        let pk = self
            .snapshot
            .collection_page()
            .ok_or_else(|| FolioError::internal("dropping an index of a missing collection"))?
            .pk_index()?
            .clone();

        let mut removed = 0usize;
        for pk_node in self.find_all(&pk, Order::Ascending)? {
            let mut last = pk_node.clone();
            let mut next = pk_node.next_node();
            while let Some(node) = self.get_node(next)? {
                next = node.next_node();
                if node.slot() == index.slot {
                    self.free_node(node.position())?;
                    self.set_next_node(&mut last, next)?;
                    removed += 1;
                } else {
                    last = node;
                }
            }
        }

        self.free_node(index.head)?;
        self.free_node(index.tail)?;
        self.snapshot
            .collection_page_mut()?
            .delete_collection_index(&index.name);

        debug!(index = %index.name, nodes = removed, "index dropped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Find
    // ------------------------------------------------------------------

    /// The node after `node` at level 0 in `order`, or `None` at a
    /// sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a broken link.
    pub fn next_in_order(&mut self, node: &IndexNode, order: Order) -> FolioResult<Option<IndexNode>> {
        let forward = order == Order::Ascending;
        match self.get_node(node.next_prev(0, forward))? {
            Some(next) if !next.key().is_sentinel() => Ok(Some(next)),
            _ => Ok(None),
        }
    }

    /// The first node of `index` in `order`, or `None` when it is empty.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a broken link.
    pub fn first(&mut self, index: &CollectionIndex, order: Order) -> FolioResult<Option<IndexNode>> {
        let start = match order {
            Order::Ascending => index.head,
            Order::Descending => index.tail,
        };
        let sentinel = self.node(start)?;
        self.next_in_order(&sentinel, order)
    }

    /// Every node of `index` in `order`, sentinels excluded.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a broken link.
    pub fn find_all(&mut self, index: &CollectionIndex, order: Order) -> FolioResult<Vec<IndexNode>> {
        let mut nodes = Vec::new();
        let mut cur = self.first(index, order)?;
        while let Some(node) = cur {
            cur = self.next_in_order(&node, order)?;
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Finds a node holding `key`. On a non-unique index any of the equal
    /// nodes may be returned. With `sibling`, a miss returns the nearest
    /// node past `key` in `order` instead of `None`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a broken link.
    pub fn find(
        &mut self,
        index: &CollectionIndex,
        key: &IndexKey,
        sibling: bool,
        order: Order,
    ) -> FolioResult<Option<IndexNode>> {
        let forward = order == Order::Ascending;
        let overshoot = order.overshoot();
        let mut cur = self.node(if forward { index.head } else { index.tail })?;

        for i in (0..index.max_level).rev() {
            loop {
                let address = cur.next_prev(i, forward);
                if address.is_empty() {
                    break;
                }
                let next = self.node(address)?;
                let diff = next.key().cmp(key);

                if diff == overshoot {
                    if i == 0 && sibling {
                        return Ok((!next.key().is_sentinel()).then_some(next));
                    }
                    break;
                }
                if diff == Ordering::Equal {
                    return Ok((!next.key().is_sentinel()).then_some(next));
                }
                cur = next;
            }
        }
        Ok(None)
    }

    /// The first node equal to `key` in `order`, stepping back over equal
    /// neighbours of the node the descent hit.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a broken link.
    pub fn first_equal(
        &mut self,
        index: &CollectionIndex,
        key: &IndexKey,
        order: Order,
    ) -> FolioResult<Option<IndexNode>> {
        let Some(mut first) = self.find(index, key, false, order)? else {
            return Ok(None);
        };
        if !index.unique {
            while let Some(prev) = self.next_in_order(&first, order.reverse())? {
                if prev.key() != key {
                    break;
                }
                first = prev;
            }
        }
        Ok(Some(first))
    }

    /// Every node of `index` equal to `key`, in `order`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for a broken link.
    pub fn find_equal(
        &mut self,
        index: &CollectionIndex,
        key: &IndexKey,
        order: Order,
    ) -> FolioResult<Vec<IndexNode>> {
        let mut nodes = Vec::new();
        let mut cur = self.first_equal(index, key, order)?;
        while let Some(node) = cur {
            if node.key() != key {
                break;
            }
            cur = if index.unique {
                None
            } else {
                self.next_in_order(&node, order)?
            };
            nodes.push(node);
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::context;
    use folio_common::CancellationToken;
    use folio_txn::{LockMode, Transaction};
    use std::sync::Arc;

    fn keys(nodes: &[IndexNode]) -> Vec<IndexKey> {
        nodes.iter().map(|n| n.key().clone()).collect()
    }

    fn with_index<F>(unique: bool, f: F)
    where
        F: FnOnce(&mut IndexService<'_>, &mut CollectionIndex),
    {
        let ctx = context();
        let mut txn = Transaction::begin(Arc::clone(&ctx), CancellationToken::new()).unwrap();
        let snapshot = txn.create_snapshot(LockMode::Write, "items", true).unwrap();
        let mut service = IndexService::new(snapshot);
        let mut index = service.create_index("by_key", "$.key", unique).unwrap();
        f(&mut service, &mut index);
    }

    /// Walks level 0 both ways and checks ordering and back links.
    fn assert_level_zero(service: &mut IndexService<'_>, index: &CollectionIndex) {
        let mut cur = service.get_node(index.head).unwrap().unwrap();
        let mut previous_key = IndexKey::MinValue;
        loop {
            let next = service.get_node(cur.next(0)).unwrap().unwrap();
            assert_eq!(next.prev(0), cur.position());
            assert!(next.key() >= &previous_key);
            previous_key = next.key().clone();
            if next.position() == index.tail {
                break;
            }
            cur = next;
        }
    }

    #[test]
    fn test_create_index_links_sentinels() {
        with_index(true, |service, index| {
            let head = service.get_node(index.head).unwrap().unwrap();
            let tail = service.get_node(index.tail).unwrap().unwrap();
            assert_eq!(head.key(), &IndexKey::MinValue);
            assert_eq!(tail.key(), &IndexKey::MaxValue);
            assert_eq!(head.next(0), tail.position());
            assert_eq!(tail.prev(0), head.position());
            assert_eq!(head.levels(), MAX_LEVEL_LENGTH);
            assert!(service.find_all(index, Order::Ascending).unwrap().is_empty());
        });
    }

    #[test]
    fn test_insert_find_and_delete() {
        with_index(true, |service, index| {
            let mut addresses = Vec::new();
            for key in [5i64, 3, 8, 1] {
                let node = service
                    .add_node(index, IndexKey::from(key), PageAddress::EMPTY, None)
                    .unwrap();
                addresses.push((key, node.position()));
            }

            let ascending = service.find_all(index, Order::Ascending).unwrap();
            assert_eq!(
                keys(&ascending),
                vec![1i64, 3, 5, 8].into_iter().map(IndexKey::from).collect::<Vec<_>>()
            );
            let descending = service.find_all(index, Order::Descending).unwrap();
            assert_eq!(
                keys(&descending),
                vec![8i64, 5, 3, 1].into_iter().map(IndexKey::from).collect::<Vec<_>>()
            );

            let three = addresses.iter().find(|(k, _)| *k == 3).unwrap().1;
            service.delete(three).unwrap();
            assert!(service
                .find(index, &IndexKey::from(3i64), false, Order::Ascending)
                .unwrap()
                .is_none());

            let remaining = service.find_all(index, Order::Ascending).unwrap();
            assert_eq!(
                keys(&remaining),
                vec![1i64, 5, 8].into_iter().map(IndexKey::from).collect::<Vec<_>>()
            );
            assert_eq!(remaining[0].next(0), remaining[1].position());
            assert_eq!(remaining[1].prev(0), remaining[0].position());
            assert_level_zero(service, index);
        });
    }

    #[test]
    fn test_unique_rejects_duplicates() {
        with_index(true, |service, index| {
            service
                .add_node(index, IndexKey::from("a"), PageAddress::EMPTY, None)
                .unwrap();
            let err = service
                .add_node(index, IndexKey::from("a"), PageAddress::EMPTY, None)
                .unwrap_err();
            assert!(matches!(err, FolioError::DuplicateKey { .. }));
        });
    }

    #[test]
    fn test_rejects_sentinels_and_long_keys() {
        with_index(false, |service, index| {
            assert!(matches!(
                service.add_node(index, IndexKey::MaxValue, PageAddress::EMPTY, None),
                Err(FolioError::InvalidIndexKey { .. })
            ));
            let long = IndexKey::from("x".repeat(300));
            assert!(matches!(
                service.add_node(index, long, PageAddress::EMPTY, None),
                Err(FolioError::IndexKeyTooLong { .. })
            ));
        });
    }

    #[test]
    fn test_non_unique_find_equal_and_sibling() {
        with_index(false, |service, index| {
            for key in [4i64, 2, 4, 9, 4, 2] {
                service
                    .add_node(index, IndexKey::from(key), PageAddress::EMPTY, None)
                    .unwrap();
            }
            let fours = service
                .find_equal(index, &IndexKey::from(4i64), Order::Ascending)
                .unwrap();
            assert_eq!(fours.len(), 3);

            let near = service
                .find(index, &IndexKey::from(5i64), true, Order::Ascending)
                .unwrap()
                .unwrap();
            assert_eq!(near.key(), &IndexKey::from(9i64));
            assert!(service
                .find(index, &IndexKey::from(10i64), true, Order::Ascending)
                .unwrap()
                .is_none());
            assert_level_zero(service, index);
        });
    }

    #[test]
    fn test_many_keys_stay_sorted() {
        with_index(false, |service, index| {
            let mut rng = rand::thread_rng();
            let mut inserted = Vec::new();
            for _ in 0..500 {
                let key: i64 = rng.gen_range(0..200);
                let node = service
                    .add_node(index, IndexKey::from(key), PageAddress::EMPTY, None)
                    .unwrap();
                inserted.push(node.position());
            }
            for address in inserted.iter().step_by(3) {
                service.delete(*address).unwrap();
            }
            assert_level_zero(service, index);
            let remaining = service.find_all(index, Order::Ascending).unwrap();
            assert_eq!(remaining.len(), inserted.len() - inserted.iter().step_by(3).count());
        });
    }

    #[test]
    fn test_document_chain() {
        with_index(false, |service, index| {
            let mut pk = service
                .add_node(index, IndexKey::from(1i64), PageAddress::EMPTY, None)
                .unwrap();
            let mut second = service
                .add_node(index, IndexKey::from(2i64), PageAddress::EMPTY, Some(&mut pk))
                .unwrap();
            let third = service
                .add_node(index, IndexKey::from(3i64), PageAddress::EMPTY, Some(&mut second))
                .unwrap();

            let chain = service.get_node_list(&pk).unwrap();
            assert_eq!(chain.len(), 3);

            let survivor = service
                .delete_list(pk.position(), &HashSet::from([second.position()]))
                .unwrap();
            assert_eq!(survivor.position(), third.position());
            let pk = service.get_node(pk.position()).unwrap().unwrap();
            assert_eq!(pk.next_node(), third.position());

            service.delete_all(pk.position()).unwrap();
            assert!(service.find_all(index, Order::Ascending).unwrap().is_empty());
        });
    }

    #[test]
    fn test_flip_coin_range() {
        for _ in 0..1000 {
            let level = IndexService::flip_coin();
            assert!((1..=MAX_LEVEL_LENGTH).contains(&level));
        }
    }
}
