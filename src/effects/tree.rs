//! Parent-indexed item tree
//!
//! Items live in an id-keyed table. Each item stores its ordered child ids
//! and the id of its parent; the parent link is only resolved through the
//! table, so a stale link simply fails to resolve. The tree is purely
//! structural: planting is driven by the stack's register/deregister hooks.

use std::collections::HashMap;

use super::item::{EffectGroup, EffectNode};
use super::types::ItemId;

/// One registered item
#[derive(Debug, Clone)]
pub struct TreeItem {
    id: ItemId,
    parent: Option<ItemId>,
    children: Vec<ItemId>,
    pub node: EffectNode,
}

impl TreeItem {
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Parent id; resolve with [`EffectTree::get`]
    pub fn parent_id(&self) -> Option<ItemId> {
        self.parent
    }

    pub fn children(&self) -> &[ItemId] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// An item (and its subtree) removed from the tree, kept for re-insertion
#[derive(Debug, Clone, PartialEq)]
pub struct DetachedItem {
    pub id: ItemId,
    pub node: EffectNode,
    pub children: Vec<DetachedItem>,
}

impl DetachedItem {
    pub fn new(id: ItemId, node: EffectNode) -> Self {
        Self { id, node, children: Vec::new() }
    }

    /// Ids of this item and all descendants in pre-order
    pub fn ids(&self) -> Vec<ItemId> {
        let mut ids = vec![self.id];
        for child in &self.children {
            ids.extend(child.ids());
        }
        ids
    }
}

/// Item tree rooted at a single group
#[derive(Debug, Clone)]
pub struct EffectTree {
    items: HashMap<ItemId, TreeItem>,
    next_id: u32,
}

impl EffectTree {
    /// Create a tree holding only the root group
    pub fn new(root_label: impl Into<String>) -> Self {
        let mut items = HashMap::new();
        items.insert(
            ItemId::ROOT,
            TreeItem {
                id: ItemId::ROOT,
                parent: None,
                children: Vec::new(),
                node: EffectNode::Group(EffectGroup::new(root_label)),
            },
        );
        Self {
            items,
            next_id: ItemId::ROOT.raw() + 1,
        }
    }

    pub fn root(&self) -> ItemId {
        ItemId::ROOT
    }

    /// Hand out a fresh id. Ids are never recycled.
    pub fn allocate_id(&mut self) -> ItemId {
        let id = ItemId::new(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn get(&self, id: ItemId) -> Option<&TreeItem> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut TreeItem> {
        self.items.get_mut(&id)
    }

    pub fn node(&self, id: ItemId) -> Option<&EffectNode> {
        self.items.get(&id).map(|item| &item.node)
    }

    pub fn node_mut(&mut self, id: ItemId) -> Option<&mut EffectNode> {
        self.items.get_mut(&id).map(|item| &mut item.node)
    }

    /// Parent item, if the link still resolves
    pub fn parent(&self, id: ItemId) -> Option<&TreeItem> {
        self.get(id)?.parent.and_then(|parent| self.get(parent))
    }

    pub fn child_count(&self, parent: ItemId) -> usize {
        self.get(parent).map_or(0, TreeItem::child_count)
    }

    pub fn child(&self, parent: ItemId, row: usize) -> Option<ItemId> {
        self.get(parent)?.children.get(row).copied()
    }

    /// Row of an item within its parent
    pub fn row(&self, id: ItemId) -> Option<usize> {
        self.parent(id)?.children.iter().position(|child| *child == id)
    }

    /// Nesting depth (root children are at depth 1)
    pub fn depth(&self, id: ItemId) -> usize {
        let mut depth = 0;
        let mut current = self.get(id).and_then(|item| item.parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.get(parent).and_then(|item| item.parent);
        }
        depth
    }

    /// Number of items excluding the root
    pub fn len(&self) -> usize {
        self.items.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All descendants of `id` in pre-order, `id` itself excluded
    pub fn descendants(&self, id: ItemId) -> Vec<ItemId> {
        let mut out = Vec::new();
        self.collect_descendants(id, &mut out);
        out
    }

    fn collect_descendants(&self, id: ItemId, out: &mut Vec<ItemId>) {
        if let Some(item) = self.get(id) {
            for child in &item.children {
                out.push(*child);
                self.collect_descendants(*child, out);
            }
        }
    }

    /// Every non-root item in pre-order (tree order)
    pub fn preorder(&self) -> Vec<ItemId> {
        self.descendants(ItemId::ROOT)
    }

    /// Insert a detached subtree under `parent` at `row`.
    ///
    /// Returns the inserted ids in pre-order, or gives the subtree back if
    /// the parent is unknown, the row is past the end, or an id clashes.
    pub fn insert(&mut self, detached: DetachedItem, parent: ItemId, row: usize) -> Result<Vec<ItemId>, DetachedItem> {
        let Some(parent_item) = self.items.get(&parent) else {
            return Err(detached);
        };
        if row > parent_item.children.len() || detached.ids().iter().any(|id| self.items.contains_key(id)) {
            return Err(detached);
        }
        if let Some(parent_item) = self.items.get_mut(&parent) {
            parent_item.children.insert(row, detached.id);
        }
        let mut inserted = Vec::new();
        self.insert_subtree(detached, parent, &mut inserted);
        Ok(inserted)
    }

    fn insert_subtree(&mut self, detached: DetachedItem, parent: ItemId, inserted: &mut Vec<ItemId>) {
        let DetachedItem { id, node, children } = detached;
        self.next_id = self.next_id.max(id.raw() + 1);
        inserted.push(id);
        self.items.insert(
            id,
            TreeItem {
                id,
                parent: Some(parent),
                children: children.iter().map(|child| child.id).collect(),
                node,
            },
        );
        for child in children {
            self.insert_subtree(child, id, inserted);
        }
    }

    /// Remove an item and its subtree
    pub fn detach(&mut self, id: ItemId) -> Option<DetachedItem> {
        if id == ItemId::ROOT {
            return None;
        }
        let parent = self.get(id)?.parent;
        if let Some(parent) = parent.and_then(|parent| self.items.get_mut(&parent)) {
            parent.children.retain(|child| *child != id);
        }
        self.take_subtree(id)
    }

    fn take_subtree(&mut self, id: ItemId) -> Option<DetachedItem> {
        let item = self.items.remove(&id)?;
        let children = item
            .children
            .iter()
            .filter_map(|child| self.take_subtree(*child))
            .collect();
        Some(DetachedItem {
            id,
            node: item.node,
            children,
        })
    }

    /// Move an item within its parent's child list
    pub fn move_child(&mut self, id: ItemId, dest_row: usize) -> bool {
        let Some(parent) = self.get(id).and_then(|item| item.parent) else {
            return false;
        };
        let Some(parent) = self.items.get_mut(&parent) else {
            return false;
        };
        if dest_row >= parent.children.len() {
            return false;
        }
        let Some(current) = parent.children.iter().position(|child| *child == id) else {
            return false;
        };
        let id = parent.children.remove(current);
        parent.children.insert(dest_row, id);
        true
    }

    /// Re-parent an item (and its subtree) to `parent` at `row`
    pub fn reparent(&mut self, id: ItemId, parent: ItemId, row: usize) -> bool {
        if id == ItemId::ROOT
            || !self.contains(id)
            || !self.contains(parent)
            || row > self.child_count(parent)
            || parent == id
            || self.descendants(id).contains(&parent)
        {
            return false;
        }
        let Some(old_parent) = self.get(id).and_then(|item| item.parent) else {
            return false;
        };
        if let Some(old) = self.items.get_mut(&old_parent) {
            old.children.retain(|child| *child != id);
        }
        let row = row.min(self.child_count(parent));
        if let Some(new) = self.items.get_mut(&parent) {
            new.children.insert(row, id);
        }
        if let Some(item) = self.items.get_mut(&id) {
            item.parent = Some(parent);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{AssetType, EffectItem, EffectParameters};

    fn effect_node(asset: &str) -> EffectNode {
        EffectNode::Effect(EffectItem::new(asset, AssetType::Video, EffectParameters::new()))
    }

    fn add(tree: &mut EffectTree, parent: ItemId, asset: &str) -> ItemId {
        let id = tree.allocate_id();
        let row = tree.child_count(parent);
        tree.insert(DetachedItem::new(id, effect_node(asset)), parent, row).unwrap();
        id
    }

    #[test]
    fn test_new_tree_has_only_root() {
        let tree = EffectTree::new("root");
        assert!(tree.is_empty());
        assert!(tree.contains(ItemId::ROOT));
        assert_eq!(tree.child_count(ItemId::ROOT), 0);
    }

    #[test]
    fn test_ids_are_not_recycled() {
        let mut tree = EffectTree::new("root");
        let a = add(&mut tree, ItemId::ROOT, "a");
        tree.detach(a).unwrap();
        let b = add(&mut tree, ItemId::ROOT, "b");
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_rows_and_parent_lookup() {
        let mut tree = EffectTree::new("root");
        let a = add(&mut tree, ItemId::ROOT, "a");
        let b = add(&mut tree, ItemId::ROOT, "b");

        assert_eq!(tree.row(a), Some(0));
        assert_eq!(tree.row(b), Some(1));
        assert_eq!(tree.parent(b).map(TreeItem::id), Some(ItemId::ROOT));
        assert_eq!(tree.depth(b), 1);
    }

    #[test]
    fn test_detach_and_reinsert_subtree() {
        let mut tree = EffectTree::new("root");
        let group = tree.allocate_id();
        tree.insert(
            DetachedItem::new(group, EffectNode::Group(EffectGroup::new("group"))),
            ItemId::ROOT,
            0,
        )
        .unwrap();
        let child = add(&mut tree, group, "a");

        let detached = tree.detach(group).unwrap();
        assert_eq!(detached.ids(), vec![group, child]);
        assert!(tree.is_empty());

        let inserted = tree.insert(detached, ItemId::ROOT, 0).unwrap();
        assert_eq!(inserted, vec![group, child]);
        assert_eq!(tree.parent(child).map(TreeItem::id), Some(group));
    }

    #[test]
    fn test_insert_rejects_bad_row() {
        let mut tree = EffectTree::new("root");
        let id = tree.allocate_id();
        let result = tree.insert(DetachedItem::new(id, effect_node("a")), ItemId::ROOT, 1);
        assert!(result.is_err());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_move_child() {
        let mut tree = EffectTree::new("root");
        let a = add(&mut tree, ItemId::ROOT, "a");
        let b = add(&mut tree, ItemId::ROOT, "b");
        let c = add(&mut tree, ItemId::ROOT, "c");

        assert!(tree.move_child(c, 0));
        assert_eq!(tree.preorder(), vec![c, a, b]);
        assert!(!tree.move_child(a, 3));
    }

    #[test]
    fn test_reparent_refuses_cycles() {
        let mut tree = EffectTree::new("root");
        let group = tree.allocate_id();
        tree.insert(
            DetachedItem::new(group, EffectNode::Group(EffectGroup::new("group"))),
            ItemId::ROOT,
            0,
        )
        .unwrap();
        let a = add(&mut tree, ItemId::ROOT, "a");

        assert!(tree.reparent(a, group, 0));
        assert_eq!(tree.preorder(), vec![group, a]);
        assert!(!tree.reparent(group, a, 0));
        assert!(!tree.reparent(ItemId::ROOT, group, 0));
    }
}
