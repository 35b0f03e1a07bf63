//! Built-in effects
//!
//! The standard effects that are always available, independent of any
//! catalog file.

use super::repository::{EffectAsset, EffectRepository};
use super::types::{AssetType, ParameterValue};

/// Register all built-in effects with the repository
pub fn register_builtin_effects(repository: &mut EffectRepository) {
    repository.register(
        EffectAsset::new("brightness", "Brightness", "Color", AssetType::Video)
            .param("level", ParameterValue::Float(1.0)),
    );
    repository.register(
        EffectAsset::new("sepia", "Sepia", "Color", AssetType::Video)
            .param("u", ParameterValue::Int(75))
            .param("v", ParameterValue::Int(150)),
    );
    repository.register(
        EffectAsset::new("invert", "Invert", "Color", AssetType::Video)
            .param("alpha", ParameterValue::Bool(false)),
    );
    repository.register(
        EffectAsset::new("boxblur", "Box Blur", "Blur", AssetType::Video)
            .param("hori", ParameterValue::Int(2))
            .param("vert", ParameterValue::Int(2)),
    );
    repository.register(
        EffectAsset::new("affine", "Transform", "Motion", AssetType::Video)
            .param("rect", ParameterValue::String("0 0 100% 100% 100%".into()))
            .param("background", ParameterValue::Color([0, 0, 0, 0])),
    );
    repository.register(
        EffectAsset::new("fadein", "Fade In", "Transitions", AssetType::Video)
            .param("duration", ParameterValue::Int(25)),
    );
    repository.register(
        EffectAsset::new("volume", "Volume", "Audio", AssetType::Audio)
            .param("gain", ParameterValue::Float(0.0))
            .param("normalize", ParameterValue::Bool(false)),
    );
    repository.register(
        EffectAsset::new("panner", "Pan", "Audio", AssetType::Audio)
            .param("start", ParameterValue::Float(0.5)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::AssetRepository;

    #[test]
    fn test_builtin_effects_registered() {
        let repository = EffectRepository::with_builtin();
        assert!(repository.exists("brightness"));
        assert_eq!(repository.asset_type("volume"), Some(AssetType::Audio));
        assert_eq!(repository.name("boxblur").as_deref(), Some("Box Blur"));
        assert!(repository.categories().contains(&"Audio".to_string()));
    }
}
