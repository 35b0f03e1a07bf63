//! Error types for the effect stack
//!
//! Structural operations either apply fully or return one of these errors
//! with the model left untouched. An expired live service is not an error:
//! operations against it degrade to no-ops.

use thiserror::Error;

use crate::effects::ItemId;

/// Result type for effect stack operations
pub type Result<T> = std::result::Result<T, EffectStackError>;

/// Errors returned by [`crate::effects::EffectStack`] operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EffectStackError {
    /// The asset repository does not know this effect id
    #[error("Unknown effect asset '{0}'")]
    UnknownAsset(String),

    /// No item with this id is registered in the stack
    #[error("Item {0} is not registered in this stack")]
    ItemNotFound(ItemId),

    /// The item exists but is a group where an effect was required
    #[error("Item {0} is not an effect")]
    NotAnEffect(ItemId),

    /// The operation is not supported for this item (grouped copy/move)
    #[error("{operation} is not supported for item {item}")]
    Unsupported { operation: &'static str, item: ItemId },

    /// Destination row is outside the parent's child range
    #[error("Row {row} is out of range (parent has {count} children)")]
    InvalidRow { row: usize, count: usize },

    /// The root item cannot be removed or moved
    #[error("The root item cannot be modified")]
    RootItem,

    /// The undo log is borrowed elsewhere, so the edit could not be recorded
    #[error("The undo log is busy; nothing was changed")]
    UndoLogBusy,
}

/// Errors raised while reading or writing stack documents and effect catalogs
#[derive(Debug, Error)]
pub enum DocumentError {
    /// File could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// XML could not be parsed
    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),

    /// XML could not be produced
    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),

    /// The document references something the stack rejects
    #[error(transparent)]
    Stack(#[from] EffectStackError),

    /// A parameter value does not match its declared type
    #[error("Invalid value '{value}' for {kind} parameter '{name}'")]
    InvalidParameter {
        name: String,
        kind: String,
        value: String,
    },
}

/// Settings-related errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),

    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),

    #[error("Could not find config directory")]
    NoConfigDir,
}
