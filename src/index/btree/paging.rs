//! Page-oriented B-tree persistence.
//!
//! Each node is written to its own page through the buffer pool:
//!
//! ```text
//! ┌────────────────────┬──────────────────────────────────────┐
//! │ PageHeader (13 B)  │ node body (see Node::encode_body)    │
//! │ BTreeLeaf/Internal │ child references are page ids        │
//! └────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! Page ids come from a [`FreeList`]. The root page id is all a caller needs
//! to keep to load the tree again.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{BTree, Node, NodeId};
use crate::buffer::BufferPoolManager;
use crate::common::{Error, PageId, Result};
use crate::storage::page::{Page, PageHeader, PageType};
use crate::storage::FreeList;

/// Write every node of `tree` to freshly allocated pages.
///
/// Returns the root's page id. Pages are written into the pool as dirty;
/// call [`BufferPoolManager::flush_dirty_pages`] to make them durable.
///
/// # Errors
/// `PageOverflow` if a node does not fit into one page. No page is written
/// and every allocated id is returned to the free list in that case.
pub fn save_tree(tree: &BTree, pool: &BufferPoolManager, free_list: &mut FreeList) -> Result<PageId> {
    let order = tree.reachable();
    let page_ids: HashMap<NodeId, PageId> =
        order.iter().map(|&id| (id, free_list.allocate_page())).collect();

    let mut pages = Vec::with_capacity(order.len());
    for &id in &order {
        match encode_node(&tree.nodes[id], page_ids[&id], &page_ids, pool.page_size()) {
            Ok(page) => pages.push((page_ids[&id], page)),
            Err(e) => {
                for &page_id in page_ids.values() {
                    free_list.free_page(page_id);
                }
                return Err(e);
            }
        }
    }

    for (page_id, page) in &pages {
        pool.put_page(*page_id, page.as_slice())?;
    }

    let root = page_ids[&tree.root];
    debug!(nodes = pages.len(), %root, "saved b-tree");
    Ok(root)
}

/// Rebuild a tree of `order` from the pages rooted at `root`.
///
/// # Errors
/// - `ChecksumMismatch` if a node page fails verification
/// - `CorruptPage` if a page is not a B-tree node, is referenced twice, or
///   the nodes do not form a valid tree of `order`
pub fn load_tree(pool: &BufferPoolManager, root: PageId, order: usize) -> Result<BTree> {
    let mut nodes = Vec::new();
    let mut visited = HashSet::new();
    let root_id = load_node(pool, root, &mut nodes, &mut visited)?;

    let tree = BTree::from_arena(nodes, root_id, order)?;
    tree.check_invariants()
        .map_err(|reason| Error::CorruptPage { page_id: root, reason })?;

    debug!(nodes = visited.len(), %root, "loaded b-tree");
    Ok(tree)
}

/// Return every page of the tree rooted at `root` to `free_list` and drop
/// them from the pool. Returns the number of pages released.
pub fn release_tree(pool: &BufferPoolManager, root: PageId, free_list: &mut FreeList) -> Result<usize> {
    let pages = tree_pages(pool, root)?;
    for &page_id in &pages {
        pool.delete_page(page_id)?;
        free_list.free_page(page_id);
    }
    Ok(pages.len())
}

/// Ids of every page of the tree rooted at `root`.
///
/// # Errors
/// `CorruptPage` if a page is not a B-tree node or is referenced twice.
pub fn tree_pages(pool: &BufferPoolManager, root: PageId) -> Result<HashSet<PageId>> {
    let mut pages = HashSet::new();
    let mut stack = vec![root];

    while let Some(page_id) = stack.pop() {
        if !pages.insert(page_id) {
            return Err(Error::CorruptPage {
                page_id,
                reason: "page referenced twice".into(),
            });
        }
        let (_, children) = {
            let page = pool.fetch_page_read(page_id)?;
            decode_page(page_id, &page)?
        };
        stack.extend(children.into_iter().map(PageId::new));
    }
    Ok(pages)
}

/// Rewrite child references after [`BufferPoolManager::compact_page_space`].
///
/// `root` is the tree's root id before compaction and `remap` the mapping
/// compaction returned. Returns the root's new page id.
///
/// # Errors
/// `CorruptPage` if a page of the tree is missing from `remap`.
pub fn relink_tree(
    pool: &BufferPoolManager,
    root: PageId,
    remap: &HashMap<PageId, PageId>,
) -> Result<PageId> {
    let lookup = |page_id: PageId| {
        remap.get(&page_id).copied().ok_or_else(|| Error::CorruptPage {
            page_id,
            reason: "page missing from compaction remap".into(),
        })
    };

    let new_root = lookup(root)?;
    let mut stack = vec![new_root];
    while let Some(page_id) = stack.pop() {
        let mut page = pool.fetch_page_write(page_id)?;
        let (node, children) = decode_page(page_id, &page)?;
        let children = children
            .into_iter()
            .map(|c| lookup(PageId::new(c)).map(PageId::as_u32))
            .collect::<Result<Vec<u32>>>()?;

        let mut body = Vec::with_capacity(node.encoded_len() + children.len() * 4);
        node.encode_body(&children, &mut body);
        page.as_mut_slice()[PageHeader::SIZE..PageHeader::SIZE + body.len()].copy_from_slice(&body);
        page.update_checksum();
        drop(page);

        stack.extend(children.into_iter().map(PageId::new));
    }
    Ok(new_root)
}

fn encode_node(
    node: &Node,
    page_id: PageId,
    page_ids: &HashMap<NodeId, PageId>,
    page_size: usize,
) -> Result<Page> {
    let needed = PageHeader::SIZE + node.encoded_len();
    if needed > page_size {
        return Err(Error::PageOverflow {
            page_id,
            needed,
            capacity: page_size,
        });
    }

    let children: Vec<u32> = node.children.iter().map(|c| page_ids[c].as_u32()).collect();
    let mut body = Vec::with_capacity(needed - PageHeader::SIZE);
    node.encode_body(&children, &mut body);

    let page_type = if node.is_leaf {
        PageType::BTreeLeaf
    } else {
        PageType::BTreeInternal
    };
    let mut page = Page::new(page_size);
    page.set_header(&PageHeader::new(page_type));
    page.as_mut_slice()[PageHeader::SIZE..PageHeader::SIZE + body.len()].copy_from_slice(&body);
    page.update_checksum();
    Ok(page)
}

fn decode_page(page_id: PageId, page: &Page) -> Result<(Node, Vec<u32>)> {
    if !page.verify_checksum() {
        return Err(Error::ChecksumMismatch(page_id));
    }

    let is_leaf = match page.header().page_type {
        PageType::BTreeLeaf => true,
        PageType::BTreeInternal => false,
        other => {
            return Err(Error::CorruptPage {
                page_id,
                reason: format!("expected a b-tree node, found {:?}", other),
            })
        }
    };

    Node::decode_body(&page.as_slice()[PageHeader::SIZE..], is_leaf).ok_or_else(|| {
        Error::CorruptPage {
            page_id,
            reason: "truncated node body".into(),
        }
    })
}

fn load_node(
    pool: &BufferPoolManager,
    page_id: PageId,
    nodes: &mut Vec<Node>,
    visited: &mut HashSet<PageId>,
) -> Result<NodeId> {
    if !visited.insert(page_id) {
        return Err(Error::CorruptPage {
            page_id,
            reason: "page referenced twice".into(),
        });
    }

    let (mut node, children) = {
        let page = pool.fetch_page_read(page_id)?;
        decode_page(page_id, &page)?
    };

    let id = nodes.len();
    nodes.push(Node::default());
    for child in children {
        let child_id = load_node(pool, PageId::new(child), nodes, visited)?;
        node.children.push(child_id);
    }
    nodes[id] = node;
    Ok(id)
}
