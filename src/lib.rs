//! Effect Stack Library
//!
//! The per-object effect stack of a video editor timeline: an ordered tree of
//! effects kept in sync with a live processing service, with closure-based
//! undo/redo and XML persistence.

pub mod document;
pub mod effects;
pub mod error;
pub mod settings;
pub mod telemetry;
pub mod undo;

pub use document::StackDocument;
pub use effects::{
    EffectContext, EffectItem, EffectNode, EffectRepository, EffectStack, FilterChain, ItemId, OwnerId,
    ParameterValue, SharedEffectStack, StackEvent,
};
pub use error::{DocumentError, EffectStackError, Result, SettingsError};
pub use settings::StackSettings;
pub use undo::{UndoLog, UndoStack};
