//! Effect stack model
//!
//! This module provides the per-object effect stack with:
//! - An ordered tree of effects and single-level groups
//! - Live binding to the processing service (plant/unplant)
//! - Closure-based undo for every structural and per-effect edit
//!
//! # Architecture
//!
//! - **Types** (`types.rs`): ids, owners, asset types and parameter values
//! - **Repository** (`repository.rs`): effect assets and catalog loading
//! - **Builtin** (`builtin.rs`): the standard effect catalog
//! - **Service** (`service.rs`): the live service trait and the in-memory
//!   `FilterChain`
//! - **Item / Tree** (`item.rs`, `tree.rs`): node payloads and the
//!   parent-indexed item table
//! - **Events** (`events.rs`): change notifications and render refresh
//! - **Stack** (`stack.rs`): the orchestrator
//!
//! # Usage
//!
//! ```ignore
//! let chain = FilterChain::shared();
//! let history = Rc::new(RefCell::new(UndoStack::default()));
//! let context = EffectContext::new(Rc::new(EffectRepository::with_builtin()), history.clone(), Rc::new(NoRefresh));
//! let stack = EffectStack::construct(service_ref(&chain), OwnerId::track(2), context);
//!
//! let blur = stack.borrow_mut().append_effect("boxblur")?;
//! stack.borrow_mut().set_parameter(blur, "hori", ParameterValue::Int(4))?;
//! EffectStack::flush(&stack);
//! history.borrow_mut().undo();
//! ```

mod types;
mod repository;
mod service;
mod item;
mod tree;
mod events;
mod stack;
pub mod builtin;

pub use types::*;
pub use repository::*;
pub use service::*;
pub use item::*;
pub use tree::*;
pub use events::*;
pub use stack::*;
