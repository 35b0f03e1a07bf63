//! Effect stack orchestrator
//!
//! An [`EffectStack`] owns the item tree of one timeline object and keeps the
//! live service's filter chain in step with it. Edits are applied directly,
//! then recorded as an undo/redo closure pair. The closures reach the stack
//! through a weak self reference and fail cleanly once it is dropped.
//!
//! Change events and render refreshes are queued while the stack is
//! borrowed. [`EffectStack::flush`] delivers them; undo and redo steps
//! flush on their own.
//!
//! # Usage
//!
//! ```ignore
//! let chain = FilterChain::shared();
//! let history = Rc::new(RefCell::new(UndoStack::new(100)));
//! let context = EffectContext::new(Rc::new(EffectRepository::with_builtin()), history.clone(), Rc::new(NoRefresh));
//! let stack = EffectStack::construct(service_ref(&chain), OwnerId::clip(3), context);
//!
//! let id = stack.borrow_mut().append_effect("sepia")?;
//! EffectStack::flush(&stack);
//! history.borrow_mut().undo();
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::events::{Observers, RefreshSink, StackEvent, SubscriptionId};
use super::item::{EffectGroup, EffectItem, EffectNode};
use super::repository::AssetRepository;
use super::service::{with_service, ServiceRef};
use super::tree::{DetachedItem, EffectTree};
use super::types::{EffectParameters, ItemId, OwnerId, ParameterValue};
use crate::error::{EffectStackError, Result};
use crate::undo::{noop, update_undo_redo, Fun, UndoLog};

/// Service property holding the active effect row
pub const ACTIVE_EFFECT_PROPERTY: &str = "kdenlive:activeeffect";

/// Returned by [`EffectStack::active_effect`] when the service is gone
pub const NO_ACTIVE_EFFECT: i32 = -1;

/// Label of groups created by [`EffectStack::create_group`]
pub const GROUP_LABEL: &str = "group";

const ROOT_LABEL: &str = "root";

/// Shared handle to a stack
pub type SharedEffectStack = Rc<RefCell<EffectStack>>;

/// Holds a subtree while it is out of the tree, between undo and redo
type DetachedSlot = Rc<RefCell<Option<DetachedItem>>>;

/// Collaborators injected into a stack
#[derive(Clone)]
pub struct EffectContext {
    pub repository: Rc<dyn AssetRepository>,
    pub undo: Rc<RefCell<dyn UndoLog>>,
    pub refresh: Rc<dyn RefreshSink>,
}

impl EffectContext {
    pub fn new(
        repository: Rc<dyn AssetRepository>,
        undo: Rc<RefCell<dyn UndoLog>>,
        refresh: Rc<dyn RefreshSink>,
    ) -> Self {
        Self {
            repository,
            undo,
            refresh,
        }
    }
}

/// Ordered effects of one timeline object, bound to its live service
pub struct EffectStack {
    tree: EffectTree,
    service: ServiceRef,
    effect_stack_enabled: bool,
    owner: OwnerId,
    context: EffectContext,
    observers: Rc<Observers>,
    self_ref: Weak<RefCell<EffectStack>>,
}

impl std::fmt::Debug for EffectStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectStack")
            .field("owner", &self.owner)
            .field("effect_stack_enabled", &self.effect_stack_enabled)
            .field("items", &self.tree.len())
            .field("service_alive", &(self.service.strong_count() > 0))
            .finish()
    }
}

/// Run `f` against the stack behind `weak` if it is alive and not borrowed,
/// then deliver what it queued
fn with_stack(weak: &Weak<RefCell<EffectStack>>, f: impl FnOnce(&mut EffectStack) -> bool) -> bool {
    let Some(cell) = weak.upgrade() else {
        return false;
    };
    let applied = match cell.try_borrow_mut() {
        Ok(mut stack) => f(&mut stack),
        Err(_) => {
            tracing::warn!("Effect stack is busy, step skipped");
            return false;
        }
    };
    EffectStack::flush(&cell);
    applied
}

impl EffectStack {
    /// Create an empty stack for `owner`
    pub fn construct(service: ServiceRef, owner: OwnerId, context: EffectContext) -> SharedEffectStack {
        tracing::debug!(%owner, "Effect stack created");
        Rc::new_cyclic(|self_ref| {
            RefCell::new(Self {
                tree: EffectTree::new(ROOT_LABEL),
                service,
                effect_stack_enabled: true,
                owner,
                context,
                observers: Rc::new(Observers::new()),
                self_ref: self_ref.clone(),
            })
        })
    }

    /// Deliver queued change events and refresh requests.
    ///
    /// Call with the stack not borrowed. Returns the number of notices
    /// delivered, or 0 if the stack is currently borrowed.
    pub fn flush(stack: &SharedEffectStack) -> usize {
        let Ok(guard) = stack.try_borrow() else {
            return 0;
        };
        let observers = guard.observers.clone();
        let refresh = guard.context.refresh.clone();
        let owner = guard.owner;
        drop(guard);
        observers.deliver(refresh.as_ref(), owner)
    }

    /// Notices waiting for [`EffectStack::flush`]
    pub fn pending_notifications(&self) -> usize {
        self.observers.pending()
    }

    // ==================== Accessors ====================

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn service(&self) -> &ServiceRef {
        &self.service
    }

    pub fn context(&self) -> &EffectContext {
        &self.context
    }

    pub fn tree(&self) -> &EffectTree {
        &self.tree
    }

    /// Number of top-level rows
    pub fn row_count(&self) -> usize {
        self.tree.child_count(ItemId::ROOT)
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Item at a top-level row
    pub fn effect_stack_row(&self, row: usize) -> Option<ItemId> {
        self.tree.child(ItemId::ROOT, row)
    }

    pub fn node(&self, id: ItemId) -> Option<&EffectNode> {
        self.tree.node(id)
    }

    pub fn effect(&self, id: ItemId) -> Option<&EffectItem> {
        self.tree.node(id).and_then(EffectNode::as_effect)
    }

    /// Effect ids in tree order, groups skipped
    pub fn effect_ids(&self) -> Vec<ItemId> {
        self.tree
            .preorder()
            .into_iter()
            .filter(|id| self.is_plantable(*id))
            .collect()
    }

    /// Effect ids currently attached to the service, in tree order
    pub fn planted_effects(&self) -> Vec<ItemId> {
        self.effect_ids()
            .into_iter()
            .filter(|id| self.effect(*id).is_some_and(EffectItem::is_planted))
            .collect()
    }

    pub fn is_effect_stack_enabled(&self) -> bool {
        self.effect_stack_enabled
    }

    pub fn subscribe(&self, callback: impl FnMut(&StackEvent) + 'static) -> SubscriptionId {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    // ==================== Structural edits ====================

    /// Append a new effect built from the repository defaults as the last
    /// top-level row
    pub fn append_effect(&mut self, asset_id: &str) -> Result<ItemId> {
        let effect = self.build_effect(asset_id)?;
        self.ensure_undo_log()?;
        let label = format!("Add effect {}", self.asset_name(asset_id));
        let id = self.append_node(EffectNode::Effect(effect), label)?;
        tracing::debug!(owner = %self.owner, %id, asset = asset_id, "Effect appended");
        Ok(id)
    }

    /// Remove an item (and its subtree)
    pub fn remove_effect(&mut self, id: ItemId) -> Result<()> {
        if id == ItemId::ROOT {
            return Err(EffectStackError::RootItem);
        }
        let label = match self.tree.node(id) {
            Some(EffectNode::Effect(effect)) => format!("Delete effect {}", self.asset_name(effect.asset_id())),
            Some(EffectNode::Group(group)) => format!("Delete group {}", group.label),
            None => return Err(EffectStackError::ItemNotFound(id)),
        };
        let (parent, row) = self.location(id).ok_or(EffectStackError::ItemNotFound(id))?;
        self.ensure_undo_log()?;
        let detached = self.deregister_subtree(id).ok_or(EffectStackError::ItemNotFound(id))?;

        let slot: DetachedSlot = Rc::new(RefCell::new(Some(detached)));
        let undo = self.add_item_lambda(slot.clone(), parent, row);
        let redo = self.remove_item_lambda(id, slot);
        self.push_undo(undo, redo, label);
        tracing::debug!(owner = %self.owner, %id, "Effect removed");
        Ok(())
    }

    /// Append a deep copy of one of this stack's effects
    pub fn duplicate_effect(&mut self, id: ItemId) -> Result<ItemId> {
        let node = self.tree.node(id).cloned();
        self.copy_node(id, node)
    }

    /// Append a deep copy of an effect owned by another stack
    pub fn copy_effect(&mut self, source: &EffectStack, id: ItemId) -> Result<ItemId> {
        self.copy_node(id, source.node(id).cloned())
    }

    /// Move an effect to `dest_row` within its parent
    pub fn move_effect(&mut self, dest_row: usize, id: ItemId) -> Result<()> {
        if id == ItemId::ROOT {
            return Err(EffectStackError::RootItem);
        }
        let label = match self.tree.node(id) {
            Some(EffectNode::Effect(effect)) => format!("Move effect {}", self.asset_name(effect.asset_id())),
            Some(EffectNode::Group(_)) => {
                tracing::warn!(owner = %self.owner, %id, "Moving a group is not supported");
                return Err(EffectStackError::Unsupported {
                    operation: "move",
                    item: id,
                });
            }
            None => return Err(EffectStackError::ItemNotFound(id)),
        };
        let (parent, old_row) = self.location(id).ok_or(EffectStackError::ItemNotFound(id))?;
        let count = self.tree.child_count(parent);
        if dest_row >= count {
            return Err(EffectStackError::InvalidRow { row: dest_row, count });
        }
        if dest_row == old_row {
            return Ok(());
        }
        self.ensure_undo_log()?;

        self.relocate(id, dest_row);
        let undo = self.move_item_lambda(id, old_row);
        let redo = self.move_item_lambda(id, dest_row);
        self.push_undo(undo, redo, label);
        Ok(())
    }

    /// Wrap a top-level effect in a new group appended to the root
    pub fn create_group(&mut self, effect_id: ItemId) -> Result<ItemId> {
        self.effect_ref(effect_id)?;
        let (parent, old_row) = self.location(effect_id).ok_or(EffectStackError::ItemNotFound(effect_id))?;
        if parent != ItemId::ROOT {
            tracing::warn!(owner = %self.owner, id = %effect_id, "Nested groups are not supported");
            return Err(EffectStackError::Unsupported {
                operation: "group",
                item: effect_id,
            });
        }
        self.ensure_undo_log()?;

        let mut undo = noop();
        let mut redo = noop();
        let group_id = self.append_node_with(EffectNode::Group(EffectGroup::new(GROUP_LABEL)), &mut undo, &mut redo)?;
        if !self.reparent_item(effect_id, group_id, 0) {
            self.deregister_subtree(group_id);
            return Err(EffectStackError::ItemNotFound(effect_id));
        }
        update_undo_redo(
            self.reparent_lambda(effect_id, group_id, 0),
            self.reparent_lambda(effect_id, parent, old_row),
            &mut undo,
            &mut redo,
        );
        self.push_undo(undo, redo, "Group effect".to_string());
        Ok(group_id)
    }

    /// Copy every top-level effect of `source`, accumulating the steps into
    /// the caller's undo/redo pair. Groups are skipped.
    ///
    /// `source` must be a different stack.
    pub fn import_effects_with(&mut self, source: &EffectStack, undo: &mut Fun, redo: &mut Fun) -> Vec<ItemId> {
        let mut imported = Vec::new();
        for row in 0..source.row_count() {
            let Some(child) = source.effect_stack_row(row) else {
                continue;
            };
            match source.node(child) {
                Some(EffectNode::Effect(effect)) => {
                    let copy = clone_effect(effect);
                    match self.append_node_with(EffectNode::Effect(copy), undo, redo) {
                        Ok(id) => imported.push(id),
                        Err(err) => tracing::warn!(owner = %self.owner, error = %err, "Import step failed"),
                    }
                }
                Some(EffectNode::Group(_)) => {
                    tracing::debug!(owner = %self.owner, item = %child, "Skipping group on import");
                }
                None => {}
            }
        }
        tracing::info!(owner = %self.owner, from = %source.owner, count = imported.len(), "Effects imported");
        imported
    }

    /// Import with its own "Import effects" undo entry
    pub fn import_effects(&mut self, source: &EffectStack) -> Result<Vec<ItemId>> {
        self.ensure_undo_log()?;
        let mut undo = noop();
        let mut redo = noop();
        let imported = self.import_effects_with(source, &mut undo, &mut redo);
        if !imported.is_empty() {
            self.push_undo(undo, redo, "Import effects".to_string());
        }
        Ok(imported)
    }

    // ==================== Per-effect edits ====================

    /// Set the persisted enabled flag of an effect
    pub fn set_effect_enabled(&mut self, id: ItemId, enabled: bool) -> Result<()> {
        if self.effect_ref(id)?.is_enabled() == enabled {
            return Ok(());
        }
        self.ensure_undo_log()?;
        self.apply_enabled(id, enabled);
        let undo = self.enabled_lambda(id, !enabled);
        let redo = self.enabled_lambda(id, enabled);
        let label = if enabled { "Enable effect" } else { "Disable effect" };
        self.push_undo(undo, redo, label.to_string());
        Ok(())
    }

    /// Set one parameter of an effect
    pub fn set_parameter(&mut self, id: ItemId, name: &str, value: ParameterValue) -> Result<()> {
        let previous = self.effect_ref(id)?.parameter(name).cloned();
        if previous.as_ref() == Some(&value) {
            return Ok(());
        }
        self.ensure_undo_log()?;
        self.apply_parameter(id, name, Some(value.clone()));
        let undo = self.parameter_lambda(id, name, previous);
        let redo = self.parameter_lambda(id, name, Some(value));
        self.push_undo(undo, redo, format!("Change {name}"));
        Ok(())
    }

    // ==================== Service state ====================

    pub fn set_active_effect(&self, index: i32) {
        let stored = with_service(&self.service, |s| s.set_property(ACTIVE_EFFECT_PROPERTY, index.to_string()));
        if stored.is_none() {
            tracing::trace!(owner = %self.owner, index, "No live service for active effect");
        }
    }

    /// Active row stored on the service; 0 when unset
    pub fn active_effect(&self) -> i32 {
        with_service(&self.service, |s| s.property(ACTIVE_EFFECT_PROPERTY))
            .map_or(NO_ACTIVE_EFFECT, |value| value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Enable or bypass the whole stack. Persisted per-effect flags are kept.
    pub fn set_effect_stack_enabled(&mut self, enabled: bool) {
        self.effect_stack_enabled = enabled;
        for id in self.tree.preorder() {
            if let Some(EffectNode::Effect(effect)) = self.tree.node_mut(id) {
                effect.set_effect_stack_enabled(enabled);
                effect.sync_filter(id, &self.service);
            }
        }
        let count = self.row_count();
        if count > 0 {
            self.observers.emit(StackEvent::DataChanged {
                parent: ItemId::ROOT,
                first_row: 0,
                last_row: count - 1,
            });
        }
        self.request_refresh();
        tracing::debug!(owner = %self.owner, enabled, "Effect stack enabled changed");
    }

    /// Bind to a new service and replant every effect in tree order
    pub fn reset_service(&mut self, service: ServiceRef) {
        let effects = self.effect_ids();
        for id in &effects {
            self.unplant_item(*id);
        }
        self.service = service;
        for id in &effects {
            self.plant_item(*id);
        }
        self.request_refresh();
        tracing::debug!(owner = %self.owner, effects = effects.len(), "Service reset");
    }

    // ==================== Loading ====================

    pub(crate) fn allocate_id(&mut self) -> ItemId {
        self.tree.allocate_id()
    }

    /// Append a prepared subtree without recording undo
    pub(crate) fn attach_loaded(&mut self, detached: DetachedItem) -> bool {
        let row = self.row_count();
        self.register_subtree(detached, ItemId::ROOT, row).is_ok()
    }

    /// Build an effect for `asset_id` with the repository defaults
    pub(crate) fn build_effect(&self, asset_id: &str) -> Result<EffectItem> {
        let repository = &self.context.repository;
        if !repository.exists(asset_id) {
            tracing::warn!(owner = %self.owner, asset = asset_id, "Unknown effect asset");
            return Err(EffectStackError::UnknownAsset(asset_id.to_string()));
        }
        let asset_type = repository.asset_type(asset_id).unwrap_or_default();
        let parameters = repository.default_parameters(asset_id).unwrap_or_default();
        Ok(EffectItem::new(asset_id, asset_type, parameters))
    }

    // ==================== Internals ====================

    fn asset_name(&self, asset_id: &str) -> String {
        self.context
            .repository
            .name(asset_id)
            .unwrap_or_else(|| asset_id.to_string())
    }

    fn is_plantable(&self, id: ItemId) -> bool {
        self.tree.node(id).is_some_and(EffectNode::is_plantable)
    }

    fn effect_ref(&self, id: ItemId) -> Result<&EffectItem> {
        match self.tree.node(id) {
            Some(EffectNode::Effect(effect)) => Ok(effect),
            Some(EffectNode::Group(_)) => Err(EffectStackError::NotAnEffect(id)),
            None => Err(EffectStackError::ItemNotFound(id)),
        }
    }

    /// Parent id and row of a registered item
    fn location(&self, id: ItemId) -> Option<(ItemId, usize)> {
        let parent = self.tree.get(id)?.parent_id()?;
        Some((parent, self.tree.row(id)?))
    }

    /// Record an entry; callers checked the log with `ensure_undo_log`
    fn push_undo(&self, undo: Fun, redo: Fun, label: String) {
        match self.context.undo.try_borrow_mut() {
            Ok(mut log) => log.push_undo(undo, redo, label),
            Err(_) => tracing::error!(label = %label, "Undo log borrowed mid-edit, entry lost"),
        }
    }

    fn request_refresh(&self) {
        self.observers.request_refresh();
    }

    /// Fail before mutating if the undo entry could not be recorded
    fn ensure_undo_log(&self) -> Result<()> {
        if self.context.undo.try_borrow_mut().is_err() {
            tracing::warn!(owner = %self.owner, "Undo log is busy, edit refused");
            return Err(EffectStackError::UndoLogBusy);
        }
        Ok(())
    }

    fn notify_data_changed(&mut self, id: ItemId) {
        if let Some((parent, row)) = self.location(id) {
            self.observers.emit(StackEvent::DataChanged {
                parent,
                first_row: row,
                last_row: row,
            });
        }
    }

    fn copy_node(&mut self, source_id: ItemId, node: Option<EffectNode>) -> Result<ItemId> {
        let source = match node {
            Some(EffectNode::Effect(effect)) => effect,
            Some(EffectNode::Group(_)) => {
                tracing::warn!(owner = %self.owner, id = %source_id, "Copying a group is not supported");
                return Err(EffectStackError::Unsupported {
                    operation: "copy",
                    item: source_id,
                });
            }
            None => return Err(EffectStackError::ItemNotFound(source_id)),
        };
        self.ensure_undo_log()?;
        let label = format!("Copy effect {}", self.asset_name(source.asset_id()));
        self.append_node(EffectNode::Effect(clone_effect(&source)), label)
    }

    fn append_node(&mut self, node: EffectNode, label: String) -> Result<ItemId> {
        let mut undo = noop();
        let mut redo = noop();
        let id = self.append_node_with(node, &mut undo, &mut redo)?;
        self.push_undo(undo, redo, label);
        Ok(id)
    }

    /// Register `node` as the last top-level row; the inverse goes into the
    /// caller's pair
    fn append_node_with(&mut self, node: EffectNode, undo: &mut Fun, redo: &mut Fun) -> Result<ItemId> {
        let id = self.tree.allocate_id();
        let row = self.row_count();
        self.register_subtree(DetachedItem::new(id, node), ItemId::ROOT, row)
            .map_err(|_| EffectStackError::InvalidRow { row, count: row })?;
        let slot: DetachedSlot = Rc::new(RefCell::new(None));
        update_undo_redo(
            self.add_item_lambda(slot.clone(), ItemId::ROOT, row),
            self.remove_item_lambda(id, slot),
            undo,
            redo,
        );
        Ok(id)
    }

    /// Number of planted effects ahead of `id` in tree order
    fn plant_index(&self, id: ItemId) -> usize {
        self.tree
            .preorder()
            .into_iter()
            .take_while(|other| *other != id)
            .filter(|other| self.effect(*other).is_some_and(EffectItem::is_planted))
            .count()
    }

    /// Effects in the subtrees of `parent`'s children from `first_row` on
    fn effects_from_row(&self, parent: ItemId, first_row: usize) -> Vec<ItemId> {
        let Some(item) = self.tree.get(parent) else {
            return Vec::new();
        };
        item.children()
            .iter()
            .skip(first_row)
            .flat_map(|child| std::iter::once(*child).chain(self.tree.descendants(*child)))
            .filter(|id| self.is_plantable(*id))
            .collect()
    }

    fn subtree_effects(&self, id: ItemId) -> Vec<ItemId> {
        std::iter::once(id)
            .chain(self.tree.descendants(id))
            .filter(|item| self.is_plantable(*item))
            .collect()
    }

    fn plant_item(&mut self, id: ItemId) -> bool {
        let index = self.plant_index(id);
        let enabled = self.effect_stack_enabled;
        let Some(EffectNode::Effect(effect)) = self.tree.node_mut(id) else {
            return false;
        };
        effect.set_effect_stack_enabled(enabled);
        effect.plant(id, &self.service, index);
        effect.is_planted()
    }

    fn unplant_item(&mut self, id: ItemId) {
        if let Some(EffectNode::Effect(effect)) = self.tree.node_mut(id) {
            effect.unplant(id, &self.service);
        }
    }

    /// Plant a freshly attached effect and announce it
    fn register_item(&mut self, id: ItemId) {
        let Some(is_audio) = self.effect(id).map(EffectItem::is_audio) else {
            return;
        };
        self.plant_item(id);
        self.notify_data_changed(id);
        if !is_audio {
            self.request_refresh();
        }
    }

    /// Unplant an effect about to leave the tree
    fn deregister_item(&mut self, id: ItemId) {
        let Some(is_audio) = self.effect(id).map(EffectItem::is_audio) else {
            return;
        };
        self.unplant_item(id);
        if !is_audio {
            self.request_refresh();
        }
    }

    fn register_subtree(
        &mut self,
        detached: DetachedItem,
        parent: ItemId,
        row: usize,
    ) -> std::result::Result<Vec<ItemId>, DetachedItem> {
        let ids = self.tree.insert(detached, parent, row)?;
        self.observers.emit(StackEvent::RowsInserted { parent, row });
        for id in &ids {
            self.register_item(*id);
        }
        Ok(ids)
    }

    fn deregister_subtree(&mut self, id: ItemId) -> Option<DetachedItem> {
        if id == ItemId::ROOT {
            return None;
        }
        let (parent, row) = self.location(id)?;
        let mut ids = vec![id];
        ids.extend(self.tree.descendants(id));
        for item in ids.iter().rev() {
            self.deregister_item(*item);
        }
        let detached = self.tree.detach(id)?;
        self.observers.emit(StackEvent::RowsRemoved { parent, row });
        Some(detached)
    }

    /// Reposition within the parent. Every effect from the first affected
    /// row on is unplanted, then replanted in the new order.
    fn relocate(&mut self, id: ItemId, dest_row: usize) -> bool {
        let Some((parent, old_row)) = self.location(id) else {
            return false;
        };
        let first_row = old_row.min(dest_row);
        for item in self.effects_from_row(parent, first_row) {
            self.unplant_item(item);
        }
        let moved = self.tree.move_child(id, dest_row);
        for item in self.effects_from_row(parent, first_row) {
            self.plant_item(item);
        }
        if moved {
            let last_row = self.tree.child_count(parent).saturating_sub(1);
            self.observers.emit(StackEvent::DataChanged {
                parent,
                first_row,
                last_row,
            });
            self.request_refresh();
            tracing::debug!(owner = %self.owner, %id, from = old_row, to = dest_row, "Effect moved");
        }
        moved
    }

    fn reparent_item(&mut self, id: ItemId, parent: ItemId, row: usize) -> bool {
        let Some((old_parent, old_row)) = self.location(id) else {
            return false;
        };
        let effects = self.subtree_effects(id);
        for item in &effects {
            self.unplant_item(*item);
        }
        let moved = self.tree.reparent(id, parent, row);
        let mut needs_refresh = false;
        for item in &effects {
            self.plant_item(*item);
            needs_refresh |= self.effect(*item).is_some_and(|effect| !effect.is_audio());
        }
        if !moved {
            return false;
        }
        self.observers.emit(StackEvent::RowsRemoved {
            parent: old_parent,
            row: old_row,
        });
        let new_row = self.tree.row(id).unwrap_or(row);
        self.observers.emit(StackEvent::RowsInserted { parent, row: new_row });
        if needs_refresh {
            self.request_refresh();
        }
        true
    }

    fn apply_enabled(&mut self, id: ItemId, enabled: bool) -> bool {
        let Some(EffectNode::Effect(effect)) = self.tree.node_mut(id) else {
            return false;
        };
        effect.set_enabled(enabled);
        effect.sync_filter(id, &self.service);
        let is_audio = effect.is_audio();
        self.notify_data_changed(id);
        if !is_audio {
            self.request_refresh();
        }
        true
    }

    /// Set or (with `None`) remove a parameter
    fn apply_parameter(&mut self, id: ItemId, name: &str, value: Option<ParameterValue>) -> bool {
        let Some(EffectNode::Effect(effect)) = self.tree.node_mut(id) else {
            return false;
        };
        match value {
            Some(value) => {
                effect.set_parameter(name, value);
            }
            None => {
                effect.remove_parameter(name);
            }
        }
        effect.sync_filter(id, &self.service);
        let is_audio = effect.is_audio();
        self.notify_data_changed(id);
        if !is_audio {
            self.request_refresh();
        }
        true
    }

    // ==================== Undo closures ====================

    fn add_item_lambda(&self, slot: DetachedSlot, parent: ItemId, row: usize) -> Fun {
        let weak = self.self_ref.clone();
        Box::new(move || {
            with_stack(&weak, |stack| {
                let taken = slot.borrow_mut().take();
                let Some(detached) = taken else {
                    return false;
                };
                match stack.register_subtree(detached, parent, row) {
                    Ok(_) => true,
                    Err(detached) => {
                        *slot.borrow_mut() = Some(detached);
                        false
                    }
                }
            })
        })
    }

    fn remove_item_lambda(&self, id: ItemId, slot: DetachedSlot) -> Fun {
        let weak = self.self_ref.clone();
        Box::new(move || {
            with_stack(&weak, |stack| match stack.deregister_subtree(id) {
                Some(detached) => {
                    *slot.borrow_mut() = Some(detached);
                    true
                }
                None => false,
            })
        })
    }

    fn move_item_lambda(&self, id: ItemId, row: usize) -> Fun {
        let weak = self.self_ref.clone();
        Box::new(move || with_stack(&weak, |stack| stack.relocate(id, row)))
    }

    fn reparent_lambda(&self, id: ItemId, parent: ItemId, row: usize) -> Fun {
        let weak = self.self_ref.clone();
        Box::new(move || with_stack(&weak, |stack| stack.reparent_item(id, parent, row)))
    }

    fn enabled_lambda(&self, id: ItemId, enabled: bool) -> Fun {
        let weak = self.self_ref.clone();
        Box::new(move || with_stack(&weak, |stack| stack.apply_enabled(id, enabled)))
    }

    fn parameter_lambda(&self, id: ItemId, name: &str, value: Option<ParameterValue>) -> Fun {
        let weak = self.self_ref.clone();
        let name = name.to_string();
        Box::new(move || with_stack(&weak, |stack| stack.apply_parameter(id, &name, value.clone())))
    }
}

/// Fresh effect with the same asset and an independent parameter copy
fn clone_effect(source: &EffectItem) -> EffectItem {
    let mut effect = EffectItem::new(source.asset_id(), source.asset_type(), EffectParameters::new());
    effect.set_parameters(source.all_parameters());
    effect
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::service::{service_ref, FilterChain};
    use std::cell::Cell;
    use crate::effects::EffectRepository;
    use crate::undo::UndoStack;

    #[derive(Default)]
    struct RecordingRefresh(RefCell<Vec<OwnerId>>);

    impl RefreshSink for RecordingRefresh {
        fn refresh(&self, owner: OwnerId) {
            self.0.borrow_mut().push(owner);
        }
    }

    struct Fixture {
        chain: Rc<RefCell<FilterChain>>,
        history: Rc<RefCell<UndoStack>>,
        refresh: Rc<RecordingRefresh>,
        stack: SharedEffectStack,
    }

    fn fixture() -> Fixture {
        let chain = FilterChain::shared();
        let history = Rc::new(RefCell::new(UndoStack::new(100)));
        let refresh = Rc::new(RecordingRefresh::default());
        let context = EffectContext::new(Rc::new(EffectRepository::with_builtin()), history.clone(), refresh.clone());
        let stack = EffectStack::construct(service_ref(&chain), OwnerId::clip(1), context);
        Fixture {
            chain,
            history,
            refresh,
            stack,
        }
    }

    fn append(f: &Fixture, asset: &str) -> ItemId {
        let id = f.stack.borrow_mut().append_effect(asset).unwrap();
        EffectStack::flush(&f.stack);
        id
    }

    /// Refreshes recorded while running `edit`
    fn refreshes_during(f: &Fixture, edit: impl FnOnce(&mut EffectStack)) -> Vec<OwnerId> {
        EffectStack::flush(&f.stack);
        f.refresh.0.borrow_mut().clear();
        edit(&mut f.stack.borrow_mut());
        EffectStack::flush(&f.stack);
        f.refresh.0.borrow().clone()
    }

    #[test]
    fn test_append_plants_and_undo_unplants() {
        let f = fixture();
        let id = append(&f, "sepia");

        assert_eq!(f.stack.borrow().row_count(), 1);
        assert_eq!(f.chain.borrow().plant_order(), vec![id]);
        assert!(f.stack.borrow().effect(id).unwrap().is_planted());
        assert_eq!(f.history.borrow().undo_text(), Some("Add effect Sepia"));

        assert!(f.history.borrow_mut().undo());
        assert!(f.stack.borrow().is_empty());
        assert!(f.chain.borrow().is_empty());

        assert!(f.history.borrow_mut().redo());
        assert_eq!(f.stack.borrow().effect_stack_row(0), Some(id));
        assert_eq!(f.chain.borrow().plant_order(), vec![id]);
    }

    #[test]
    fn test_move_reorders_service() {
        let f = fixture();
        let a = append(&f, "brightness");
        let b = append(&f, "sepia");

        f.stack.borrow_mut().move_effect(0, b).unwrap();
        assert_eq!(f.stack.borrow().effect_ids(), vec![b, a]);
        assert_eq!(f.chain.borrow().plant_order(), vec![b, a]);

        assert!(f.history.borrow_mut().undo());
        assert_eq!(f.stack.borrow().effect_ids(), vec![a, b]);
        assert_eq!(f.chain.borrow().plant_order(), vec![a, b]);
    }

    #[test]
    fn test_move_to_same_row_pushes_nothing() {
        let f = fixture();
        let a = append(&f, "brightness");
        append(&f, "sepia");
        let depth = f.history.borrow().len();

        f.stack.borrow_mut().move_effect(0, a).unwrap();
        assert_eq!(f.history.borrow().len(), depth);
        assert!(matches!(
            f.stack.borrow_mut().move_effect(2, a),
            Err(EffectStackError::InvalidRow { row: 2, count: 2 })
        ));
    }

    #[test]
    fn test_remove_undo_restores_position() {
        let f = fixture();
        let a = append(&f, "brightness");
        let b = append(&f, "sepia");
        let c = append(&f, "invert");

        f.stack.borrow_mut().remove_effect(b).unwrap();
        assert_eq!(f.chain.borrow().plant_order(), vec![a, c]);
        assert_eq!(f.history.borrow().undo_text(), Some("Delete effect Sepia"));

        assert!(f.history.borrow_mut().undo());
        assert_eq!(f.stack.borrow().effect_ids(), vec![a, b, c]);
        assert_eq!(f.chain.borrow().plant_order(), vec![a, b, c]);
    }

    #[test]
    fn test_active_effect_on_expired_service() {
        let f = fixture();
        assert_eq!(f.stack.borrow().active_effect(), 0);
        f.stack.borrow().set_active_effect(2);
        assert_eq!(f.stack.borrow().active_effect(), 2);

        let Fixture { chain, stack, .. } = f;
        drop(chain);
        assert_eq!(stack.borrow().active_effect(), NO_ACTIVE_EFFECT);
        stack.borrow().set_active_effect(1);
    }

    #[test]
    fn test_group_copy_and_move_are_unsupported() {
        let f = fixture();
        let a = append(&f, "brightness");
        let group = f.stack.borrow_mut().create_group(a).unwrap();
        let items = f.stack.borrow().tree().len();
        let depth = f.history.borrow().len();

        let copied = f.stack.borrow_mut().duplicate_effect(group);
        assert_eq!(
            copied,
            Err(EffectStackError::Unsupported {
                operation: "copy",
                item: group
            })
        );
        assert!(f.stack.borrow_mut().move_effect(0, group).is_err());
        assert_eq!(f.stack.borrow().tree().len(), items);
        assert_eq!(f.history.borrow().len(), depth);
    }

    #[test]
    fn test_create_group_keeps_plant_order() {
        let f = fixture();
        let a = append(&f, "brightness");
        let b = append(&f, "sepia");

        let group = f.stack.borrow_mut().create_group(a).unwrap();
        assert_eq!(f.stack.borrow().tree().preorder(), vec![b, group, a]);
        assert_eq!(f.chain.borrow().plant_order(), vec![b, a]);
        assert_eq!(f.history.borrow().undo_text(), Some("Group effect"));

        assert!(f.history.borrow_mut().undo());
        assert_eq!(f.stack.borrow().tree().preorder(), vec![a, b]);
        assert_eq!(f.chain.borrow().plant_order(), vec![a, b]);

        assert!(f.history.borrow_mut().redo());
        assert_eq!(f.stack.borrow().tree().preorder(), vec![b, group, a]);
    }

    #[test]
    fn test_stack_enabled_round_trip() {
        let f = fixture();
        let a = append(&f, "brightness");

        f.stack.borrow_mut().set_effect_stack_enabled(false);
        assert!(f.chain.borrow().filter(a).unwrap().disabled);
        assert!(f.stack.borrow().effect(a).unwrap().is_enabled());

        f.stack.borrow_mut().set_effect_stack_enabled(true);
        assert!(!f.chain.borrow().filter(a).unwrap().disabled);
    }

    #[test]
    fn test_effect_enabled_is_undoable() {
        let f = fixture();
        let a = append(&f, "brightness");

        f.stack.borrow_mut().set_effect_enabled(a, false).unwrap();
        assert!(f.chain.borrow().filter(a).unwrap().disabled);
        assert_eq!(f.history.borrow().undo_text(), Some("Disable effect"));

        assert!(f.history.borrow_mut().undo());
        assert!(f.stack.borrow().effect(a).unwrap().is_enabled());
        assert!(!f.chain.borrow().filter(a).unwrap().disabled);
    }

    #[test]
    fn test_set_parameter_updates_filter_and_undoes() {
        let f = fixture();
        let a = append(&f, "brightness");

        f.stack
            .borrow_mut()
            .set_parameter(a, "level", ParameterValue::Float(0.5))
            .unwrap();
        let level = |f: &Fixture| f.chain.borrow().filter(a).unwrap().parameters.get("level").cloned();
        assert_eq!(level(&f), Some(ParameterValue::Float(0.5)));
        assert_eq!(f.history.borrow().undo_text(), Some("Change level"));

        assert!(f.history.borrow_mut().undo());
        assert_eq!(level(&f), Some(ParameterValue::Float(1.0)));
    }

    #[test]
    fn test_duplicate_is_independent() {
        let f = fixture();
        let a = append(&f, "brightness");
        let copy = f.stack.borrow_mut().duplicate_effect(a).unwrap();

        f.stack
            .borrow_mut()
            .set_parameter(copy, "level", ParameterValue::Float(0.2))
            .unwrap();
        let stack = f.stack.borrow();
        assert_eq!(stack.effect(a).unwrap().parameter("level"), Some(&ParameterValue::Float(1.0)));
        assert_eq!(f.chain.borrow().plant_order(), vec![a, copy]);
    }

    #[test]
    fn test_import_effects_single_undo_entry() {
        let source = fixture();
        append(&source, "brightness");
        append(&source, "volume");
        let target = fixture();

        let imported = target.stack.borrow_mut().import_effects(&source.stack.borrow()).unwrap();
        assert_eq!(imported.len(), 2);
        assert_eq!(target.chain.borrow().plant_order(), imported);
        assert_eq!(target.history.borrow().len(), 1);
        assert_eq!(target.history.borrow().undo_text(), Some("Import effects"));

        assert!(target.history.borrow_mut().undo());
        assert!(target.stack.borrow().is_empty());
        assert_eq!(source.stack.borrow().row_count(), 2);
    }

    #[test]
    fn test_reset_service_replants_in_tree_order() {
        let f = fixture();
        let a = append(&f, "brightness");
        let b = append(&f, "sepia");
        let next = FilterChain::shared();

        f.stack.borrow_mut().reset_service(service_ref(&next));
        assert!(f.chain.borrow().is_empty());
        assert_eq!(next.borrow().plant_order(), vec![a, b]);
    }

    #[test]
    fn test_unknown_asset_changes_nothing() {
        let f = fixture();
        let result = f.stack.borrow_mut().append_effect("nope");
        assert_eq!(result, Err(EffectStackError::UnknownAsset("nope".into())));
        assert!(f.stack.borrow().is_empty());
        assert!(!f.history.borrow().can_undo());
    }

    #[test]
    fn test_audio_effects_skip_refresh() {
        let f = fixture();
        append(&f, "volume");
        assert!(f.refresh.0.borrow().is_empty());
        append(&f, "sepia");
        assert_eq!(*f.refresh.0.borrow(), vec![OwnerId::clip(1)]);
    }

    #[test]
    fn test_append_emits_insert_then_data_changed() {
        let f = fixture();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        f.stack.borrow_mut().subscribe(move |event| sink.borrow_mut().push(*event));

        append(&f, "sepia");
        assert_eq!(
            *seen.borrow(),
            vec![
                StackEvent::RowsInserted {
                    parent: ItemId::ROOT,
                    row: 0
                },
                StackEvent::DataChanged {
                    parent: ItemId::ROOT,
                    first_row: 0,
                    last_row: 0
                },
            ]
        );
    }

    #[test]
    fn test_notifications_wait_for_flush() {
        let f = fixture();
        let seen = Rc::new(Cell::new(0));
        let count = seen.clone();
        f.stack.borrow().subscribe(move |_| count.set(count.get() + 1));

        f.stack.borrow_mut().append_effect("sepia").unwrap();
        assert_eq!(seen.get(), 0);
        assert!(f.refresh.0.borrow().is_empty());
        assert_eq!(f.stack.borrow().pending_notifications(), 3);

        assert_eq!(EffectStack::flush(&f.stack), 3);
        assert_eq!(seen.get(), 2);
        assert_eq!(f.refresh.0.borrow().len(), 1);
        assert_eq!(f.stack.borrow().pending_notifications(), 0);
    }

    /// Refresh sink that reads the stack it is refreshing
    #[derive(Default)]
    struct ReadingRefresh {
        stack: RefCell<Weak<RefCell<EffectStack>>>,
        planted: RefCell<Vec<usize>>,
    }

    impl RefreshSink for ReadingRefresh {
        fn refresh(&self, _owner: OwnerId) {
            let Some(stack) = self.stack.borrow().upgrade() else {
                return;
            };
            let planted = stack.try_borrow().map(|s| s.planted_effects().len()).unwrap_or(usize::MAX);
            self.planted.borrow_mut().push(planted);
        }
    }

    #[test]
    fn test_callbacks_can_read_the_stack() {
        let chain = FilterChain::shared();
        let history = Rc::new(RefCell::new(UndoStack::new(100)));
        let refresh = Rc::new(ReadingRefresh::default());
        let context = EffectContext::new(Rc::new(EffectRepository::with_builtin()), history.clone(), refresh.clone());
        let stack = EffectStack::construct(service_ref(&chain), OwnerId::clip(1), context);
        *refresh.stack.borrow_mut() = Rc::downgrade(&stack);

        let rows = Rc::new(RefCell::new(Vec::new()));
        let weak = Rc::downgrade(&stack);
        let sink = rows.clone();
        stack.borrow().subscribe(move |_| {
            let Some(stack) = weak.upgrade() else {
                return;
            };
            let rows = stack.try_borrow().map(|s| s.row_count()).ok();
            sink.borrow_mut().push(rows);
        });

        stack.borrow_mut().append_effect("sepia").unwrap();
        EffectStack::flush(&stack);
        assert_eq!(*rows.borrow(), vec![Some(1), Some(1)]);
        assert_eq!(*refresh.planted.borrow(), vec![1]);

        // undo delivers on its own once the stack is released
        assert!(history.borrow_mut().undo());
        assert_eq!(rows.borrow().last(), Some(&Some(0)));
        assert_eq!(*refresh.planted.borrow(), vec![1, 0]);
    }

    #[test]
    fn test_busy_undo_log_refuses_edit() {
        let f = fixture();
        let guard = f.history.borrow();
        let result = f.stack.borrow_mut().append_effect("sepia");
        assert_eq!(result, Err(EffectStackError::UndoLogBusy));
        assert!(f.stack.borrow().is_empty());
        assert!(f.chain.borrow().is_empty());
        assert_eq!(f.stack.borrow().pending_notifications(), 0);
        drop(guard);
        assert!(!f.history.borrow().can_undo());

        let a = append(&f, "brightness");
        let b = append(&f, "sepia");
        let depth = f.history.borrow().len();
        let guard = f.history.borrow_mut();
        let mut stack = f.stack.borrow_mut();
        assert_eq!(stack.move_effect(0, b), Err(EffectStackError::UndoLogBusy));
        assert_eq!(stack.remove_effect(a), Err(EffectStackError::UndoLogBusy));
        assert_eq!(
            stack.set_parameter(a, "level", ParameterValue::Float(0.1)),
            Err(EffectStackError::UndoLogBusy)
        );
        assert_eq!(stack.set_effect_enabled(a, false), Err(EffectStackError::UndoLogBusy));
        assert_eq!(stack.create_group(a), Err(EffectStackError::UndoLogBusy));
        assert_eq!(stack.effect_ids(), vec![a, b]);
        assert_eq!(stack.effect(a).unwrap().parameter("level"), Some(&ParameterValue::Float(1.0)));
        drop(stack);
        drop(guard);
        assert_eq!(f.chain.borrow().plant_order(), vec![a, b]);
        assert_eq!(f.history.borrow().len(), depth);
    }

    #[test]
    fn test_move_requests_one_refresh() {
        let f = fixture();
        append(&f, "brightness");
        append(&f, "invert");
        let c = append(&f, "sepia");

        let refreshes = refreshes_during(&f, |stack| stack.move_effect(0, c).unwrap());
        assert_eq!(refreshes, vec![OwnerId::clip(1)]);
    }

    #[test]
    fn test_remove_refreshes_only_for_video() {
        let f = fixture();
        let sepia = append(&f, "sepia");
        let volume = append(&f, "volume");

        let refreshes = refreshes_during(&f, |stack| stack.remove_effect(sepia).unwrap());
        assert_eq!(refreshes, vec![OwnerId::clip(1)]);

        let refreshes = refreshes_during(&f, |stack| stack.remove_effect(volume).unwrap());
        assert!(refreshes.is_empty());
    }

    #[test]
    fn test_undo_after_stack_dropped_fails() {
        let f = fixture();
        append(&f, "sepia");
        let Fixture { history, stack, .. } = f;
        drop(stack);
        assert!(!history.borrow_mut().undo());
        assert!(history.borrow().can_undo());
    }
}
