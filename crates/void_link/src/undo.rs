//! Undo adapter for structural link edits.
//!
//! Every public edit on [`LinkManager`] hands exactly one inverse
//! [`LinkOperation`] to the configured [`UndoSink`]. Applying an operation
//! goes through the manager's internal mutators, so nothing is recorded
//! while undoing, and yields the operation that reverses it again.

use parking_lot::Mutex;

use crate::error::Result;
use crate::id::LinkRef;
use crate::manager::LinkManager;
use crate::property::{self, PropertyIndex};

/// A reversible structural edit
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkOperation {
    /// Point `start`'s property back at `previous`
    RestorePreviousTarget {
        start: LinkRef,
        previous: LinkRef,
        index: PropertyIndex,
    },
    /// Clear the link at `index` that points at `end`
    DeleteLink {
        start: LinkRef,
        end: LinkRef,
        index: PropertyIndex,
    },
    /// Write `end` back at `index`
    ReAddLink {
        start: LinkRef,
        end: LinkRef,
        index: PropertyIndex,
    },
    /// Swap one back link of `target` for another
    UpdateBackLinkMapping {
        target: LinkRef,
        removed: Option<LinkRef>,
        added: Option<LinkRef>,
    },
}

impl LinkOperation {
    pub fn description(&self) -> &'static str {
        match self {
            LinkOperation::RestorePreviousTarget { .. } => "Restore Link Target",
            LinkOperation::DeleteLink { .. } => "Delete Link",
            LinkOperation::ReAddLink { .. } => "Add Link",
            LinkOperation::UpdateBackLinkMapping { .. } => "Update Back Link",
        }
    }

    /// Perform the operation and return its inverse
    pub fn apply(&self, manager: &LinkManager) -> Result<LinkOperation> {
        match self {
            LinkOperation::RestorePreviousTarget { start, previous, index } => {
                let start_linkable = manager.resolve(start)?;
                let previous_linkable = manager.resolve(previous)?;
                let replaced =
                    manager.add_link_internal(&start_linkable, &previous_linkable, *index, true)?;
                Ok(match replaced {
                    Some(replaced) if replaced != *previous => {
                        LinkOperation::RestorePreviousTarget {
                            start: start.clone(),
                            previous: replaced,
                            index: *index,
                        }
                    }
                    _ => LinkOperation::DeleteLink {
                        start: start.clone(),
                        end: previous.clone(),
                        index: *index,
                    },
                })
            }
            LinkOperation::DeleteLink { start, end, index } => {
                let start_linkable = manager.resolve(start)?;
                let stored = start_linkable
                    .item()
                    .and_then(|item| property::read_link(item.properties(), *index))
                    .unwrap_or_else(|| end.clone());
                let target = manager.force_load(stored.id, &stored.partition);
                manager.delete_link_internal(&start_linkable, target.as_ref(), *index)?;
                Ok(LinkOperation::ReAddLink {
                    start: start.clone(),
                    end: stored,
                    index: *index,
                })
            }
            LinkOperation::ReAddLink { start, end, index } => {
                let start_linkable = manager.resolve(start)?;
                manager.write_link_internal(&start_linkable, end, *index)?;
                Ok(LinkOperation::DeleteLink {
                    start: start.clone(),
                    end: end.clone(),
                    index: *index,
                })
            }
            LinkOperation::UpdateBackLinkMapping { target, removed, added } => {
                let target_linkable = manager.resolve(target)?;
                manager.remap_back_link_internal(
                    &target_linkable,
                    removed.as_ref(),
                    added.as_ref(),
                );
                Ok(LinkOperation::UpdateBackLinkMapping {
                    target: target.clone(),
                    removed: added.clone(),
                    added: removed.clone(),
                })
            }
        }
    }
}

/// Receiver of the inverse of every structural edit
pub trait UndoSink: Send + Sync {
    fn push_inverse(&self, operation: LinkOperation);
}

/// Sink that drops every operation
#[derive(Debug, Default)]
pub struct NullUndo;

impl UndoSink for NullUndo {
    fn push_inverse(&self, _operation: LinkOperation) {}
}

/// Operations undone or redone as one unit
#[derive(Clone, Debug)]
struct HistoryEntry {
    name: String,
    operations: Vec<LinkOperation>,
}

#[derive(Default)]
struct HistoryState {
    undo_stack: Vec<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    transaction: Option<HistoryEntry>,
    dirty: bool,
}

/// Undo/redo history of link edits with transaction support.
pub struct LinkHistory {
    state: Mutex<HistoryState>,
    max_size: usize,
}

impl Default for LinkHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkHistory {
    /// Default maximum history size.
    pub const DEFAULT_MAX_SIZE: usize = 100;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_MAX_SIZE)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            state: Mutex::new(HistoryState::default()),
            max_size: max_size.max(1),
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.state.lock().undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.state.lock().redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.state.lock().undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.state.lock().redo_stack.len()
    }

    /// Name of the next unit to undo
    pub fn undo_description(&self) -> Option<String> {
        self.state.lock().undo_stack.last().map(|e| e.name.clone())
    }

    /// Name of the next unit to redo
    pub fn redo_description(&self) -> Option<String> {
        self.state.lock().redo_stack.last().map(|e| e.name.clone())
    }

    /// Operations of the next unit to undo
    pub fn peek_undo(&self) -> Option<Vec<LinkOperation>> {
        self.state
            .lock()
            .undo_stack
            .last()
            .map(|e| e.operations.clone())
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    pub fn mark_saved(&self) {
        self.state.lock().dirty = false;
    }

    /// Begin a transaction. Operations pushed until it is committed are
    /// undone as one unit.
    pub fn begin_transaction(&self, name: impl Into<String>) {
        let mut state = self.state.lock();
        if state.transaction.is_some() {
            log::warn!("Beginning transaction while one is already open");
        }
        state.transaction = Some(HistoryEntry {
            name: name.into(),
            operations: Vec::new(),
        });
    }

    pub fn commit_transaction(&self) {
        let mut state = self.state.lock();
        if let Some(transaction) = state.transaction.take() {
            if !transaction.operations.is_empty() {
                self.push_entry(&mut state, transaction);
            }
        }
    }

    /// Drop the open transaction. Edits already made stay in place.
    pub fn rollback_transaction(&self) {
        self.state.lock().transaction = None;
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().transaction.is_some()
    }

    pub fn clear(&self) {
        *self.state.lock() = HistoryState::default();
    }

    /// Undo the last unit. Returns false if there was nothing to undo.
    ///
    /// A unit that fails partway is reverted and stays on the undo stack.
    pub fn undo(&self, manager: &LinkManager) -> Result<bool> {
        let Some(entry) = self.state.lock().undo_stack.pop() else {
            return Ok(false);
        };
        match Self::apply_entry(&entry, manager) {
            Ok(inverse) => {
                let mut state = self.state.lock();
                state.redo_stack.push(inverse);
                state.dirty = true;
                Ok(true)
            }
            Err(e) => {
                self.state.lock().undo_stack.push(entry);
                Err(e)
            }
        }
    }

    /// Redo the last undone unit. Returns false if there was nothing to
    /// redo.
    pub fn redo(&self, manager: &LinkManager) -> Result<bool> {
        let Some(entry) = self.state.lock().redo_stack.pop() else {
            return Ok(false);
        };
        match Self::apply_entry(&entry, manager) {
            Ok(inverse) => {
                let mut state = self.state.lock();
                state.undo_stack.push(inverse);
                state.dirty = true;
                Ok(true)
            }
            Err(e) => {
                self.state.lock().redo_stack.push(entry);
                Err(e)
            }
        }
    }

    /// Apply a unit's operations last to first. On failure the operations
    /// already applied are reversed again.
    fn apply_entry(entry: &HistoryEntry, manager: &LinkManager) -> Result<HistoryEntry> {
        let mut operations = Vec::with_capacity(entry.operations.len());
        for operation in entry.operations.iter().rev() {
            match operation.apply(manager) {
                Ok(inverse) => operations.push(inverse),
                Err(e) => {
                    log::error!("Failed to apply '{}': {}", operation.description(), e);
                    for applied in operations.iter().rev() {
                        if let Err(e) = applied.apply(manager) {
                            log::error!("Failed to revert '{}': {}", applied.description(), e);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(HistoryEntry {
            name: entry.name.clone(),
            operations,
        })
    }

    fn push_entry(&self, state: &mut HistoryState, entry: HistoryEntry) {
        state.undo_stack.push(entry);
        state.redo_stack.clear();
        state.dirty = true;

        while state.undo_stack.len() > self.max_size {
            state.undo_stack.remove(0);
        }
    }
}

impl UndoSink for LinkHistory {
    fn push_inverse(&self, operation: LinkOperation) {
        let mut state = self.state.lock();
        if let Some(transaction) = state.transaction.as_mut() {
            transaction.operations.push(operation);
            return;
        }
        let entry = HistoryEntry {
            name: operation.description().to_string(),
            operations: vec![operation],
        };
        self.push_entry(&mut state, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkDirection;
    use crate::property::PropertyStore;
    use crate::testing::{id, link, manager_with, PropertyValue, TestItem, TestLoader};

    #[test]
    fn test_history_basic() {
        let history = LinkHistory::new();
        assert!(!history.can_undo());
        assert!(!history.can_redo());

        history.push_inverse(LinkOperation::UpdateBackLinkMapping {
            target: link(1, "cell").unwrap(),
            removed: None,
            added: None,
        });
        assert!(history.can_undo());
        assert!(history.is_dirty());
        assert_eq!(history.undo_description().as_deref(), Some("Update Back Link"));

        history.mark_saved();
        assert!(!history.is_dirty());
    }

    #[test]
    fn test_size_limit() {
        let history = LinkHistory::with_capacity(2);
        for word in 1..=3 {
            history.push_inverse(LinkOperation::UpdateBackLinkMapping {
                target: link(word, "cell").unwrap(),
                removed: None,
                added: None,
            });
        }
        assert_eq!(history.undo_count(), 2);
    }

    #[test]
    fn test_undo_redo_add_link() {
        let loader = TestLoader::new();
        let (manager, history) = manager_with(&loader);
        let a = TestItem::data_object(id(1), "cell", vec![PropertyValue::Link(None)]);
        let b = TestItem::data_object(id(2), "cell", vec![]);
        a.linkable().attach(&manager).unwrap();
        b.linkable().attach(&manager).unwrap();

        manager
            .add_link(a.linkable(), b.linkable(), PropertyIndex::single(0))
            .unwrap();

        assert!(history.undo(&manager).unwrap());
        assert_eq!(a.value(PropertyIndex::single(0)), None);
        assert!(a.linkable().links().is_empty());
        assert!(!b.linkable().has_back_link(id(1)));
        assert_eq!(history.redo_count(), 1);

        assert!(history.redo(&manager).unwrap());
        assert_eq!(a.value(PropertyIndex::single(0)), link(2, "cell"));
        assert_eq!(
            a.linkable()
                .link_to(b.linkable())
                .unwrap()
                .direction_from(a.linkable()),
            LinkDirection::StartToEnd
        );
        assert!(b.linkable().has_back_link(id(1)));
        assert!(!history.redo(&manager).unwrap());
    }

    #[test]
    fn test_undo_restores_previous_target() {
        let loader = TestLoader::new();
        let (manager, history) = manager_with(&loader);
        let a = TestItem::data_object(id(1), "cell", vec![PropertyValue::Link(None)]);
        let b = TestItem::data_object(id(2), "cell", vec![]);
        let c = TestItem::data_object(id(3), "cell", vec![]);
        for item in [&a, &b, &c] {
            item.linkable().attach(&manager).unwrap();
        }

        manager.add_link(a.linkable(), b.linkable(), PropertyIndex::single(0)).unwrap();
        manager.add_link(a.linkable(), c.linkable(), PropertyIndex::single(0)).unwrap();

        history.undo(&manager).unwrap();
        assert_eq!(a.value(PropertyIndex::single(0)), link(2, "cell"));
        assert!(b.linkable().has_back_link(id(1)));
        assert!(!c.linkable().has_back_link(id(1)));

        history.undo(&manager).unwrap();
        assert_eq!(a.value(PropertyIndex::single(0)), None);
        assert_eq!(b.linkable().back_link_count(), 0);

        history.redo(&manager).unwrap();
        history.redo(&manager).unwrap();
        assert_eq!(a.value(PropertyIndex::single(0)), link(3, "cell"));
        assert!(c.linkable().has_back_link(id(1)));
        assert!(!b.linkable().has_back_link(id(1)));
    }

    #[test]
    fn test_transaction_undoes_as_one_unit() {
        let loader = TestLoader::new();
        let (manager, history) = manager_with(&loader);
        let a = TestItem::data_object(id(1), "cell", vec![PropertyValue::Array(vec![])]);
        let b = TestItem::data_object(id(2), "cell", vec![]);
        let c = TestItem::data_object(id(3), "cell", vec![]);
        for item in [&a, &b, &c] {
            item.linkable().attach(&manager).unwrap();
        }

        history.begin_transaction("Link Both");
        manager.append_link(a.linkable(), b.linkable(), 0).unwrap();
        manager.append_link(a.linkable(), c.linkable(), 0).unwrap();
        history.commit_transaction();
        assert_eq!(history.undo_count(), 1);
        assert_eq!(history.undo_description().as_deref(), Some("Link Both"));

        history.undo(&manager).unwrap();
        assert!(a.store().link_array(0).is_empty());
        assert_eq!(b.linkable().back_link_count(), 0);
        assert_eq!(c.linkable().back_link_count(), 0);

        history.redo(&manager).unwrap();
        assert_eq!(a.store().link_array(0), vec![link(2, "cell"), link(3, "cell")]);
    }

    #[test]
    fn test_failed_undo_reverts_and_keeps_unit() {
        let loader = TestLoader::new();
        let (manager, history) = manager_with(&loader);
        let a = TestItem::data_object(id(1), "cell", vec![PropertyValue::Array(vec![])]);
        let b = TestItem::data_object(id(2), "cell", vec![]);
        let c = TestItem::data_object(id(3), "cell", vec![]);
        for item in [&a, &b, &c] {
            item.linkable().attach(&manager).unwrap();
        }

        history.begin_transaction("Link Both");
        manager.append_link(a.linkable(), b.linkable(), 0).unwrap();
        manager.append_link(a.linkable(), c.linkable(), 0).unwrap();
        history.commit_transaction();

        b.store().set_editable(false);
        assert!(history.undo(&manager).is_err());
        assert_eq!(a.store().link_array(0), vec![link(2, "cell"), link(3, "cell")]);
        assert!(c.linkable().has_back_link(id(1)));
        assert!(a.linkable().is_linked_to(id(3)));
        assert!(history.can_undo());
        assert!(!history.can_redo());

        b.store().set_editable(true);
        assert!(history.undo(&manager).unwrap());
        assert!(a.store().link_array(0).is_empty());
        assert!(history.can_redo());
    }

    #[test]
    fn test_undo_delete_link() {
        let loader = TestLoader::new();
        let (manager, history) = manager_with(&loader);
        let a = TestItem::data_object(id(1), "cell", vec![PropertyValue::Array(vec![])]);
        let b = TestItem::data_object(id(2), "cell", vec![]);
        a.linkable().attach(&manager).unwrap();
        b.linkable().attach(&manager).unwrap();

        let index = manager.append_link(a.linkable(), b.linkable(), 0).unwrap();
        manager.delete_link(a.linkable(), Some(b.linkable()), index).unwrap();
        assert!(a.store().link_array(0).is_empty());

        history.undo(&manager).unwrap();
        assert_eq!(a.store().link_array(0), vec![link(2, "cell")]);
        assert!(b.linkable().has_back_link(id(1)));
        assert!(a.linkable().is_linked_to(id(2)));
    }

    #[test]
    fn test_undo_back_link_mapping() {
        let loader = TestLoader::new();
        let (manager, history) = manager_with(&loader);
        let a = TestItem::data_object(id(1), "cell", vec![]);
        a.linkable().attach(&manager).unwrap();
        a.linkable().add_back_link(id(5), crate::testing::partition("far"));

        manager
            .remap_back_link(a.linkable(), link(5, "far"), link(6, "far"))
            .unwrap();
        assert!(a.linkable().has_back_link(id(6)));

        history.undo(&manager).unwrap();
        assert!(a.linkable().has_back_link(id(5)));
        assert!(!a.linkable().has_back_link(id(6)));
    }
}
