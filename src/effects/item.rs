//! Tree item payloads: effects and groups
//!
//! An [`EffectItem`] owns one effect's parameter set and its binding to the
//! live service. A [`EffectGroup`] is a transparent container with nothing to
//! plant. [`EffectNode`] is the tagged union stored in the tree.

use super::service::{with_service, Filter, ServiceRef};
use super::types::{AssetType, EffectParameters, ItemId, ParameterValue};

/// Variant tag of a tree item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectItemType {
    Effect,
    Group,
}

/// One effect in the stack
///
/// `enabled` is the persisted per-effect flag. `effect_stack_enabled` mirrors
/// the owning stack and is never saved. The live filter is disabled unless
/// both are set.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectItem {
    asset_id: String,
    asset_type: AssetType,
    parameters: EffectParameters,
    enabled: bool,
    effect_stack_enabled: bool,
    planted: bool,
}

impl EffectItem {
    /// Create a detached effect
    pub fn new(asset_id: impl Into<String>, asset_type: AssetType, parameters: EffectParameters) -> Self {
        Self {
            asset_id: asset_id.into(),
            asset_type,
            parameters,
            enabled: true,
            effect_stack_enabled: true,
            planted: false,
        }
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    pub fn is_audio(&self) -> bool {
        self.asset_type.is_audio()
    }

    /// Whether the effect is currently attached to a live service
    pub fn is_planted(&self) -> bool {
        self.planted
    }

    /// Persisted per-effect flag
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the effect actually processes (effect and stack enabled)
    pub fn is_active(&self) -> bool {
        self.enabled && self.effect_stack_enabled
    }

    pub fn is_effect_stack_enabled(&self) -> bool {
        self.effect_stack_enabled
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters.get(name)
    }

    /// Copy of the full parameter set
    pub fn all_parameters(&self) -> EffectParameters {
        self.parameters.clone()
    }

    /// Replace the parameter set wholesale
    pub fn set_parameters(&mut self, parameters: EffectParameters) {
        self.parameters = parameters;
    }

    /// Set one parameter and return the previous value
    pub fn set_parameter(&mut self, name: &str, value: ParameterValue) -> Option<ParameterValue> {
        self.parameters.set(name, value)
    }

    pub fn remove_parameter(&mut self, name: &str) -> Option<ParameterValue> {
        self.parameters.remove(name)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Mirror the stack flag without touching the persisted flag
    pub fn set_effect_stack_enabled(&mut self, enabled: bool) {
        self.effect_stack_enabled = enabled;
    }

    /// Filter snapshot for the live service
    pub fn filter(&self, id: ItemId) -> Filter {
        Filter {
            id,
            asset_id: self.asset_id.clone(),
            parameters: self.parameters.clone(),
            disabled: !self.is_active(),
        }
    }

    /// Attach to the service at `index`.
    ///
    /// Re-planting an attached effect detaches it first. With an expired
    /// service the effect stays unplanted.
    pub fn plant(&mut self, id: ItemId, service: &ServiceRef, index: usize) {
        let filter = self.filter(id);
        let planted = with_service(service, |s| {
            if self.planted {
                s.unplant(id);
            }
            s.plant(filter, index);
        });
        self.planted = planted.is_some();
        tracing::trace!(%id, index, planted = self.planted, asset = %self.asset_id, "plant");
    }

    /// Detach from the service. A no-op for unplanted effects.
    pub fn unplant(&mut self, id: ItemId, service: &ServiceRef) {
        if !self.planted {
            return;
        }
        with_service(service, |s| s.unplant(id));
        self.planted = false;
        tracing::trace!(%id, asset = %self.asset_id, "unplant");
    }

    /// Push current parameters and enabled state to the planted filter
    pub fn sync_filter(&self, id: ItemId, service: &ServiceRef) {
        if self.planted {
            let filter = self.filter(id);
            with_service(service, |s| s.update_filter(filter));
        }
    }
}

/// Group of effects
#[derive(Debug, Clone, PartialEq)]
pub struct EffectGroup {
    pub label: String,
}

impl EffectGroup {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

/// Payload of a tree item
#[derive(Debug, Clone, PartialEq)]
pub enum EffectNode {
    Effect(EffectItem),
    Group(EffectGroup),
}

impl EffectNode {
    pub fn item_type(&self) -> EffectItemType {
        match self {
            EffectNode::Effect(_) => EffectItemType::Effect,
            EffectNode::Group(_) => EffectItemType::Group,
        }
    }

    /// Only effects attach to the live service
    pub fn is_plantable(&self) -> bool {
        matches!(self, EffectNode::Effect(_))
    }

    pub fn as_effect(&self) -> Option<&EffectItem> {
        match self {
            EffectNode::Effect(effect) => Some(effect),
            EffectNode::Group(_) => None,
        }
    }
}
