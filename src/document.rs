//! Stack documents
//!
//! Loading and saving of an effect stack as XML. A document records the
//! owner, the stack enabled flag and the top-level rows with their
//! parameters. Live state (planted flags, ids) is not saved.
//!
//! ```xml
//! <EffectStackDocument enabled="true">
//!   <owner kind="clip" id="4"/>
//!   <effect asset="sepia" enabled="true">
//!     <param name="u" type="int" value="75"/>
//!   </effect>
//!   <group label="group">
//!     <effect asset="invert" enabled="false"/>
//!   </group>
//! </EffectStackDocument>
//! ```

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::effects::{
    DetachedItem, EffectGroup, EffectItem, EffectNode, EffectParameters, EffectStack, ItemId, OwnerId, ParameterValue,
};
use crate::error::DocumentError;

/// Serialized form of one effect stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "EffectStackDocument")]
pub struct StackDocument {
    #[serde(rename = "@enabled", default = "default_enabled")]
    pub enabled: bool,

    pub owner: OwnerId,

    #[serde(rename = "$value", default)]
    pub nodes: Vec<DocumentNode>,
}

/// A top-level row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocumentNode {
    #[serde(rename = "effect")]
    Effect(DocumentEffect),
    #[serde(rename = "group")]
    Group(DocumentGroup),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEffect {
    #[serde(rename = "@asset")]
    pub asset: String,

    #[serde(rename = "@enabled", default = "default_enabled")]
    pub enabled: bool,

    #[serde(rename = "param", default)]
    pub params: Vec<DocumentParam>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentParam {
    #[serde(rename = "@name")]
    pub name: String,

    #[serde(rename = "@type")]
    pub kind: String,

    #[serde(rename = "@value")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentGroup {
    #[serde(rename = "@label")]
    pub label: String,

    #[serde(rename = "effect", default)]
    pub effects: Vec<DocumentEffect>,
}

fn default_enabled() -> bool {
    true
}

impl StackDocument {
    /// Empty document for `owner`
    pub fn new(owner: OwnerId) -> Self {
        Self {
            enabled: true,
            owner,
            nodes: Vec::new(),
        }
    }

    /// Snapshot the top-level rows of `stack`
    pub fn from_stack(stack: &EffectStack) -> Self {
        let tree = stack.tree();
        let nodes = (0..stack.row_count())
            .filter_map(|row| stack.effect_stack_row(row))
            .filter_map(|id| match stack.node(id)? {
                EffectNode::Effect(effect) => Some(DocumentNode::Effect(DocumentEffect::from_item(effect))),
                EffectNode::Group(group) => {
                    let effects = tree
                        .get(id)?
                        .children()
                        .iter()
                        .filter_map(|child| stack.effect(*child))
                        .map(DocumentEffect::from_item)
                        .collect();
                    Some(DocumentNode::Group(DocumentGroup {
                        label: group.label.clone(),
                        effects,
                    }))
                }
            })
            .collect();
        Self {
            enabled: stack.is_effect_stack_enabled(),
            owner: stack.owner(),
            nodes,
        }
    }

    pub fn from_xml(xml: &str) -> Result<Self, DocumentError> {
        Ok(from_str(xml)?)
    }

    pub fn to_xml(&self) -> Result<String, DocumentError> {
        let xml = to_string(self)?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml))
    }

    /// Load a document from an XML file
    pub fn load_from_file(path: &Path) -> Result<Self, DocumentError> {
        let contents = fs::read_to_string(path)?;
        let document = Self::from_xml(&contents)?;
        tracing::info!(path = %path.display(), rows = document.nodes.len(), "Stack document loaded");
        Ok(document)
    }

    /// Save the document to an XML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), DocumentError> {
        fs::write(path, self.to_xml()?)?;
        tracing::info!(path = %path.display(), rows = self.nodes.len(), "Stack document saved");
        Ok(())
    }
}

impl DocumentEffect {
    fn from_item(effect: &EffectItem) -> Self {
        Self {
            asset: effect.asset_id().to_string(),
            enabled: effect.is_enabled(),
            params: effect
                .all_parameters()
                .iter()
                .map(|param| DocumentParam {
                    name: param.name.clone(),
                    kind: param.value.kind().to_string(),
                    value: param.value.encode(),
                })
                .collect(),
        }
    }

    /// Repository defaults overlaid with the saved values
    fn to_item(&self, stack: &EffectStack) -> Result<EffectItem, DocumentError> {
        let mut effect = stack.build_effect(&self.asset)?;
        let mut parameters: EffectParameters = effect.all_parameters();
        for param in &self.params {
            parameters.set(param.name.as_str(), ParameterValue::parse(&param.name, &param.kind, &param.value)?);
        }
        effect.set_parameters(parameters);
        effect.set_enabled(self.enabled);
        Ok(effect)
    }
}

impl EffectStack {
    /// Document of this stack's current rows
    pub fn to_document(&self) -> StackDocument {
        StackDocument::from_stack(self)
    }

    /// Append the rows of `document` through the registration path.
    ///
    /// The whole document is validated before anything is attached, and no
    /// undo entry is recorded. Returns the ids of the new top-level rows.
    pub fn load_document(&mut self, document: &StackDocument) -> Result<Vec<ItemId>, DocumentError> {
        if document.owner != self.owner() {
            tracing::warn!(owner = %self.owner(), document = %document.owner, "Loading a document saved for another owner");
        }

        let mut prepared = Vec::with_capacity(document.nodes.len());
        for node in &document.nodes {
            let entry = match node {
                DocumentNode::Effect(effect) => (EffectNode::Effect(effect.to_item(self)?), Vec::new()),
                DocumentNode::Group(group) => {
                    let children = group
                        .effects
                        .iter()
                        .map(|effect| effect.to_item(self).map(EffectNode::Effect))
                        .collect::<Result<Vec<_>, _>>()?;
                    (EffectNode::Group(EffectGroup::new(group.label.clone())), children)
                }
            };
            prepared.push(entry);
        }

        if document.enabled != self.is_effect_stack_enabled() {
            self.set_effect_stack_enabled(document.enabled);
        }

        let mut rows = Vec::with_capacity(prepared.len());
        for (node, children) in prepared {
            let id = self.allocate_id();
            let mut detached = DetachedItem::new(id, node);
            for child in children {
                let child_id = self.allocate_id();
                detached.children.push(DetachedItem::new(child_id, child));
            }
            if self.attach_loaded(detached) {
                rows.push(id);
            }
        }
        tracing::info!(owner = %self.owner(), rows = rows.len(), "Stack document applied");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{service_ref, AssetType, EffectContext, EffectRepository, FilterChain, NoRefresh};
    use crate::undo::UndoStack;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn stack_with(chain: &Rc<RefCell<FilterChain>>, history: &Rc<RefCell<UndoStack>>) -> crate::effects::SharedEffectStack {
        let context = EffectContext::new(Rc::new(EffectRepository::with_builtin()), history.clone(), Rc::new(NoRefresh));
        EffectStack::construct(service_ref(chain), OwnerId::clip(4), context)
    }

    #[test]
    fn test_document_xml_round_trip() {
        let mut document = StackDocument::new(OwnerId::track(2));
        document.enabled = false;
        document.nodes.push(DocumentNode::Effect(DocumentEffect {
            asset: "sepia".into(),
            enabled: true,
            params: vec![DocumentParam {
                name: "u".into(),
                kind: "int".into(),
                value: "80".into(),
            }],
        }));
        document.nodes.push(DocumentNode::Group(DocumentGroup {
            label: "group".into(),
            effects: vec![DocumentEffect {
                asset: "invert".into(),
                enabled: false,
                params: Vec::new(),
            }],
        }));

        let xml = document.to_xml().unwrap();
        assert!(xml.starts_with("<?xml"));
        assert_eq!(StackDocument::from_xml(&xml).unwrap(), document);
    }

    #[test]
    fn test_missing_attributes_use_defaults() {
        let xml = r#"<EffectStackDocument><owner kind="master" id="-1"/><effect asset="volume"/></EffectStackDocument>"#;
        let document = StackDocument::from_xml(xml).unwrap();
        assert!(document.enabled);
        assert_eq!(document.owner, OwnerId::master());
        assert!(matches!(&document.nodes[0], DocumentNode::Effect(effect) if effect.enabled && effect.params.is_empty()));
    }

    #[test]
    fn test_load_document_plants_without_undo() {
        let chain = FilterChain::shared();
        let history = Rc::new(RefCell::new(UndoStack::new(10)));
        let stack = stack_with(&chain, &history);
        let xml = r#"<EffectStackDocument enabled="true">
            <owner kind="clip" id="4"/>
            <effect asset="brightness"><param name="level" type="float" value="0.25"/></effect>
            <group label="group"><effect asset="volume" enabled="false"/></group>
        </EffectStackDocument>"#;

        let rows = stack.borrow_mut().load_document(&StackDocument::from_xml(xml).unwrap()).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(!history.borrow().can_undo());

        let stack = stack.borrow();
        let effects = stack.effect_ids();
        assert_eq!(chain.borrow().plant_order(), effects);
        let brightness = stack.effect(effects[0]).unwrap();
        assert_eq!(brightness.parameter("level"), Some(&ParameterValue::Float(0.25)));
        let volume = stack.effect(effects[1]).unwrap();
        assert_eq!(volume.asset_type(), AssetType::Audio);
        assert!(!volume.is_enabled());
        // defaults fill parameters the document leaves out
        assert!(volume.parameter("gain").is_some());
    }

    #[test]
    fn test_load_document_is_all_or_nothing() {
        let chain = FilterChain::shared();
        let history = Rc::new(RefCell::new(UndoStack::new(10)));
        let stack = stack_with(&chain, &history);
        let mut document = StackDocument::new(OwnerId::clip(4));
        for asset in ["sepia", "no-such-effect"] {
            document.nodes.push(DocumentNode::Effect(DocumentEffect {
                asset: asset.into(),
                enabled: true,
                params: Vec::new(),
            }));
        }

        let result = stack.borrow_mut().load_document(&document);
        assert!(matches!(result, Err(DocumentError::Stack(_))));
        assert!(stack.borrow().is_empty());
        assert!(chain.borrow().is_empty());
    }

    #[test]
    fn test_stack_to_document_and_back() {
        let chain = FilterChain::shared();
        let history = Rc::new(RefCell::new(UndoStack::new(10)));
        let stack = stack_with(&chain, &history);
        {
            let mut stack = stack.borrow_mut();
            let blur = stack.append_effect("boxblur").unwrap();
            stack.set_parameter(blur, "hori", ParameterValue::Int(6)).unwrap();
            let invert = stack.append_effect("invert").unwrap();
            stack.create_group(invert).unwrap();
        }
        let document = stack.borrow().to_document();

        let other_chain = FilterChain::shared();
        let other = stack_with(&other_chain, &history);
        other.borrow_mut().load_document(&document).unwrap();
        assert_eq!(other.borrow().to_document(), document);
        assert_eq!(other_chain.borrow().len(), 2);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.xml");
        let mut document = StackDocument::new(OwnerId::bin_clip(7));
        document.nodes.push(DocumentNode::Effect(DocumentEffect {
            asset: "fadein".into(),
            enabled: true,
            params: Vec::new(),
        }));

        document.save_to_file(&path).unwrap();
        assert_eq!(StackDocument::load_from_file(&path).unwrap(), document);
    }
}
