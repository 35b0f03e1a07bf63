//! Closure-based undo/redo history.
//!
//! Every reversible edit is a pair of closures: `redo` applies the change,
//! `undo` reverts it. Both return `false` when they cannot apply (for
//! instance because the stack they target was dropped).
//!
//! - Undo/redo stacks of closure pairs
//! - Batch grouping to collapse several edits into one undo step
//! - Configurable maximum history depth
//!
//! # Usage
//!
//! ```ignore
//! let undo_stack = Rc::new(RefCell::new(UndoStack::new(100)));
//! // ... stacks push pairs through the UndoLog trait ...
//! undo_stack.borrow_mut().undo();
//! undo_stack.borrow_mut().redo();
//! ```

/// A reversible step
pub type Fun = Box<dyn FnMut() -> bool>;

/// A step that does nothing and succeeds
pub fn noop() -> Fun {
    Box::new(|| true)
}

/// Run `first`, then `then`. Stops at the first failure.
pub fn push_lambda(mut first: Fun, mut then: Fun) -> Fun {
    Box::new(move || first() && then())
}

/// Append one step to an accumulating undo/redo pair.
///
/// `redo_op` runs after everything already in `redo`; `undo_op` runs before
/// everything already in `undo`, so the accumulated undo unwinds in reverse.
pub fn update_undo_redo(redo_op: Fun, undo_op: Fun, undo: &mut Fun, redo: &mut Fun) {
    let previous_redo = std::mem::replace(redo, noop());
    *redo = push_lambda(previous_redo, redo_op);
    let previous_undo = std::mem::replace(undo, noop());
    *undo = push_lambda(undo_op, previous_undo);
}

/// Sink for undo/redo pairs
pub trait UndoLog {
    /// Record an already-applied change
    fn push_undo(&mut self, undo: Fun, redo: Fun, description: String);
}

/// A single entry in the undo/redo history
pub struct UndoEntry {
    /// Human-readable label ("Add effect Sepia")
    pub label: String,
    undo: Fun,
    redo: Fun,
}

impl std::fmt::Debug for UndoEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoEntry").field("label", &self.label).finish()
    }
}

/// Bounded undo/redo history of closure pairs
///
/// - Pushing a new entry clears the redo stack
/// - Batch mode collects pushes and creates a single entry on end
/// - Pushes made while an entry is being applied are ignored
pub struct UndoStack {
    undo_stack: Vec<UndoEntry>,
    redo_stack: Vec<UndoEntry>,
    max_entries: usize,
    /// Label and accumulated pair while batching
    batch: Option<(String, Fun, Fun)>,
    /// Number of pushes collected into the open batch
    batch_steps: usize,
    /// Whether an undo/redo is currently being applied
    is_applying: bool,
}

impl std::fmt::Debug for UndoStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoStack")
            .field("undo_stack", &self.undo_stack)
            .field("redo_stack", &self.redo_stack)
            .field("max_entries", &self.max_entries)
            .field("batch", &self.batch.as_ref().map(|(label, _, _)| label))
            .field("is_applying", &self.is_applying)
            .finish()
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(100)
    }
}

impl UndoStack {
    /// Create a history with the given maximum number of undo entries
    pub fn new(max_entries: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_entries: max_entries.max(1),
            batch: None,
            batch_steps: 0,
            is_applying: false,
        }
    }

    fn push_entry(&mut self, entry: UndoEntry) {
        self.redo_stack.clear();
        self.undo_stack.push(entry);
        while self.undo_stack.len() > self.max_entries {
            self.undo_stack.remove(0);
        }
        tracing::debug!(undo_depth = self.undo_stack.len(), "Undo entry pushed");
    }

    /// Revert the last entry. Returns false if there was nothing to undo or
    /// the entry failed to apply (it then stays on the undo stack).
    pub fn undo(&mut self) -> bool {
        if self.batch.is_some() {
            tracing::warn!("Ending open batch before undo");
            self.end_batch();
        }
        let Some(mut entry) = self.undo_stack.pop() else {
            return false;
        };

        self.is_applying = true;
        let ok = (entry.undo)();
        self.is_applying = false;

        tracing::debug!(label = %entry.label, ok, undo_remaining = self.undo_stack.len(), "Undo");
        if ok {
            self.redo_stack.push(entry);
        } else {
            self.undo_stack.push(entry);
        }
        ok
    }

    /// Re-apply the last undone entry
    pub fn redo(&mut self) -> bool {
        if self.batch.is_some() {
            tracing::warn!("Ending open batch before redo");
            self.end_batch();
        }
        let Some(mut entry) = self.redo_stack.pop() else {
            return false;
        };

        self.is_applying = true;
        let ok = (entry.redo)();
        self.is_applying = false;

        tracing::debug!(label = %entry.label, ok, redo_remaining = self.redo_stack.len(), "Redo");
        if ok {
            self.undo_stack.push(entry);
        } else {
            self.redo_stack.push(entry);
        }
        ok
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Label of the entry that would be undone next
    pub fn undo_text(&self) -> Option<&str> {
        self.undo_stack.last().map(|e| e.label.as_str())
    }

    /// Label of the entry that would be redone next
    pub fn redo_text(&self) -> Option<&str> {
        self.redo_stack.last().map(|e| e.label.as_str())
    }

    /// Number of entries on the undo stack
    pub fn len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo_stack.is_empty()
    }

    /// Start collecting pushes into a single entry
    pub fn start_batch(&mut self, label: &str) {
        if self.batch.is_some() {
            tracing::warn!(label, "start_batch called while already batching, ignoring");
            return;
        }
        self.batch = Some((label.to_string(), noop(), noop()));
        self.batch_steps = 0;
        tracing::debug!(label, "Batch started");
    }

    /// Close the current batch. An empty batch pushes nothing.
    pub fn end_batch(&mut self) {
        let Some((label, undo, redo)) = self.batch.take() else {
            return;
        };
        if self.batch_steps == 0 {
            tracing::debug!(label = %label, "Empty batch discarded");
            return;
        }
        self.push_entry(UndoEntry { label, undo, redo });
    }

    pub fn is_batching(&self) -> bool {
        self.batch.is_some()
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.batch = None;
        tracing::debug!("History cleared");
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

impl UndoLog for UndoStack {
    fn push_undo(&mut self, undo: Fun, redo: Fun, description: String) {
        if self.is_applying {
            tracing::debug!(label = %description, "Push suppressed: undo/redo in progress");
            return;
        }
        if let Some((_, batch_undo, batch_redo)) = self.batch.as_mut() {
            update_undo_redo(redo, undo, batch_undo, batch_redo);
            self.batch_steps += 1;
            return;
        }
        self.push_entry(UndoEntry {
            label: description,
            undo,
            redo,
        });
    }
}
