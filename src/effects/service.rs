//! Live service binding
//!
//! A live service is the running processing object that renders one
//! timeline object. Effects are planted into its filter chain as
//! [`Filter`]s. The stack only ever holds a weak [`ServiceRef`]; the owning
//! collaborator may tear the service down at any time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::types::{EffectParameters, ItemId};

/// Snapshot of a planted effect as seen by the live service
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Tree item the filter belongs to
    pub id: ItemId,
    /// Effect asset id
    pub asset_id: String,
    /// Parameter values at plant/update time
    pub parameters: EffectParameters,
    /// Whether processing is disabled (effect or stack disabled)
    pub disabled: bool,
}

/// Processing chain an effect stack plants into
pub trait LiveService {
    /// Attach a filter at `index` in the chain (clamped to the chain length)
    fn plant(&mut self, filter: Filter, index: usize);

    /// Detach a filter. Returns false if it was not attached.
    fn unplant(&mut self, id: ItemId) -> bool;

    /// Replace parameters/disabled state of an attached filter
    fn update_filter(&mut self, filter: Filter);

    fn property(&self, key: &str) -> Option<String>;

    fn set_property(&mut self, key: &str, value: String);
}

/// Strong handle held by the service owner
pub type SharedService = Rc<RefCell<dyn LiveService>>;

/// Weak handle held by effect stacks
pub type ServiceRef = Weak<RefCell<dyn LiveService>>;

/// Downgrade a concrete service into a [`ServiceRef`]
pub fn service_ref<S: LiveService + 'static>(service: &Rc<RefCell<S>>) -> ServiceRef {
    let shared: SharedService = service.clone();
    Rc::downgrade(&shared)
}

/// A reference that never resolves, for stacks built before their service
pub fn detached_service() -> ServiceRef {
    Weak::<RefCell<FilterChain>>::new()
}

/// Run `f` against the service if it is still alive
pub(crate) fn with_service<R>(service: &ServiceRef, f: impl FnOnce(&mut dyn LiveService) -> R) -> Option<R> {
    let service = service.upgrade()?;
    let mut guard = service.try_borrow_mut().ok()?;
    Some(f(&mut *guard))
}

/// In-memory live service: an ordered filter chain plus string properties
#[derive(Debug, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
    properties: HashMap<String, String>,
    plant_count: usize,
    unplant_count: usize,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chain already wrapped for sharing with stacks
    pub fn shared() -> Rc<RefCell<FilterChain>> {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Item ids in chain (plant) order
    pub fn plant_order(&self) -> Vec<ItemId> {
        self.filters.iter().map(|f| f.id).collect()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn filter(&self, id: ItemId) -> Option<&Filter> {
        self.filters.iter().find(|f| f.id == id)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Total number of attach calls received
    pub fn plant_count(&self) -> usize {
        self.plant_count
    }

    /// Total number of successful detach calls received
    pub fn unplant_count(&self) -> usize {
        self.unplant_count
    }
}

impl LiveService for FilterChain {
    fn plant(&mut self, filter: Filter, index: usize) {
        self.filters.retain(|f| f.id != filter.id);
        let index = index.min(self.filters.len());
        self.filters.insert(index, filter);
        self.plant_count += 1;
    }

    fn unplant(&mut self, id: ItemId) -> bool {
        let before = self.filters.len();
        self.filters.retain(|f| f.id != id);
        let removed = self.filters.len() != before;
        if removed {
            self.unplant_count += 1;
        }
        removed
    }

    fn update_filter(&mut self, filter: Filter) {
        if let Some(existing) = self.filters.iter_mut().find(|f| f.id == filter.id) {
            *existing = filter;
        }
    }

    fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }

    fn set_property(&mut self, key: &str, value: String) {
        self.properties.insert(key.to_string(), value);
    }
}
