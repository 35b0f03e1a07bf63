//! Core effect data types
//!
//! Identifiers, owner keys and the parameter model shared by the tree,
//! the live service and the persistence layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DocumentError;

/// Identifier of a tree item, unique within one effect stack
///
/// Ids are handed out once and never recycled while the stack exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u32);

impl ItemId {
    /// Id reserved for the root group of every stack
    pub const ROOT: ItemId = ItemId(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of timeline object owning an effect stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerKind {
    /// Clip placed on the timeline
    #[serde(rename = "clip")]
    TimelineClip,
    /// Whole timeline track
    #[serde(rename = "track")]
    TimelineTrack,
    /// Master output
    #[serde(rename = "master")]
    Master,
    /// Clip in the project bin
    #[serde(rename = "bin")]
    BinClip,
}

/// Identity of the timeline object that owns an effect stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId {
    #[serde(rename = "@kind")]
    pub kind: OwnerKind,
    #[serde(rename = "@id")]
    pub id: i32,
}

impl OwnerId {
    pub fn clip(id: i32) -> Self {
        Self { kind: OwnerKind::TimelineClip, id }
    }

    pub fn track(id: i32) -> Self {
        Self { kind: OwnerKind::TimelineTrack, id }
    }

    pub fn master() -> Self {
        Self { kind: OwnerKind::Master, id: -1 }
    }

    pub fn bin_clip(id: i32) -> Self {
        Self { kind: OwnerKind::BinClip, id }
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OwnerKind::TimelineClip => write!(f, "Clip {}", self.id),
            OwnerKind::TimelineTrack => write!(f, "Track {}", self.id),
            OwnerKind::Master => write!(f, "Master"),
            OwnerKind::BinClip => write!(f, "Bin clip {}", self.id),
        }
    }
}

/// Media type an effect processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AssetType {
    #[default]
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "audio")]
    Audio,
}

impl AssetType {
    pub fn is_audio(self) -> bool {
        self == AssetType::Audio
    }

    pub fn name(self) -> &'static str {
        match self {
            AssetType::Video => "video",
            AssetType::Audio => "audio",
        }
    }
}

/// Parameter value types supported by effects
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// Floating point value
    Float(f64),
    /// Integer value
    Int(i64),
    /// Boolean value
    Bool(bool),
    /// RGBA color, one byte per channel
    Color([u8; 4]),
    /// String value (file paths, text, keyframe strings)
    String(String),
}

impl ParameterValue {
    /// Type tag used in catalogs and documents
    pub fn kind(&self) -> &'static str {
        match self {
            ParameterValue::Float(_) => "float",
            ParameterValue::Int(_) => "int",
            ParameterValue::Bool(_) => "bool",
            ParameterValue::Color(_) => "color",
            ParameterValue::String(_) => "string",
        }
    }

    /// Get the value as f64 (returns 0.0 for non-numeric types)
    pub fn as_f64(&self) -> f64 {
        match self {
            ParameterValue::Float(v) => *v,
            ParameterValue::Int(v) => *v as f64,
            ParameterValue::Bool(v) => if *v { 1.0 } else { 0.0 },
            _ => 0.0,
        }
    }

    /// Get the value as i64 (returns 0 for non-numeric types)
    pub fn as_i64(&self) -> i64 {
        match self {
            ParameterValue::Int(v) => *v,
            ParameterValue::Float(v) => *v as i64,
            ParameterValue::Bool(v) => if *v { 1 } else { 0 },
            _ => 0,
        }
    }

    /// Get the value as bool (returns false for non-bool types)
    pub fn as_bool(&self) -> bool {
        match self {
            ParameterValue::Bool(v) => *v,
            ParameterValue::Float(v) => *v > 0.5,
            ParameterValue::Int(v) => *v != 0,
            _ => false,
        }
    }

    /// Get the value as &str (returns empty string for non-string types)
    pub fn as_str(&self) -> &str {
        match self {
            ParameterValue::String(v) => v.as_str(),
            _ => "",
        }
    }

    /// Textual form stored in XML attributes
    pub fn encode(&self) -> String {
        match self {
            ParameterValue::Float(v) => v.to_string(),
            ParameterValue::Int(v) => v.to_string(),
            ParameterValue::Bool(v) => if *v { "1".into() } else { "0".into() },
            ParameterValue::Color([r, g, b, a]) => format!("#{r:02x}{g:02x}{b:02x}{a:02x}"),
            ParameterValue::String(v) => v.clone(),
        }
    }

    /// Parse the textual form written by [`ParameterValue::encode`]
    pub fn parse(name: &str, kind: &str, value: &str) -> Result<Self, DocumentError> {
        let invalid = || DocumentError::InvalidParameter {
            name: name.to_string(),
            kind: kind.to_string(),
            value: value.to_string(),
        };
        match kind {
            "float" => value.trim().parse().map(ParameterValue::Float).map_err(|_| invalid()),
            "int" => value.trim().parse().map(ParameterValue::Int).map_err(|_| invalid()),
            "bool" => match value.trim() {
                "1" | "true" => Ok(ParameterValue::Bool(true)),
                "0" | "false" => Ok(ParameterValue::Bool(false)),
                _ => Err(invalid()),
            },
            "color" => parse_color(value).map(ParameterValue::Color).ok_or_else(invalid),
            "string" => Ok(ParameterValue::String(value.to_string())),
            _ => Err(invalid()),
        }
    }
}

fn parse_color(value: &str) -> Option<[u8; 4]> {
    let hex = value.trim().strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        6 => Some([channel(0)?, channel(2)?, channel(4)?, 0xff]),
        8 => Some([channel(0)?, channel(2)?, channel(4)?, channel(6)?]),
        _ => None,
    }
}

/// A named parameter value
#[derive(Debug, Clone, PartialEq)]
pub struct EffectParameter {
    pub name: String,
    pub value: ParameterValue,
}

/// Ordered parameter set of an effect (name -> value)
///
/// Order is the declaration order from the repository; setting an unknown
/// name appends it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EffectParameters {
    params: Vec<EffectParameter>,
}

impl EffectParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Set a value, replacing in place if the name exists.
    /// Returns the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: ParameterValue) -> Option<ParameterValue> {
        let name = name.into();
        if let Some(param) = self.params.iter_mut().find(|p| p.name == name) {
            Some(std::mem::replace(&mut param.value, value))
        } else {
            self.params.push(EffectParameter { name, value });
            None
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<ParameterValue> {
        let pos = self.params.iter().position(|p| p.name == name)?;
        Some(self.params.remove(pos).value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectParameter> {
        self.params.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl FromIterator<(String, ParameterValue)> for EffectParameters {
    fn from_iter<I: IntoIterator<Item = (String, ParameterValue)>>(iter: I) -> Self {
        let mut params = EffectParameters::new();
        for (name, value) in iter {
            params.set(name, value);
        }
        params
    }
}
