use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::errors::{Result, SafetyError};

/// Method family, as written in the `type` field of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodType {
    Nn,
    Ns,
    Vlm,
}

/// One entry of `methods_metadata.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodEntry {
    #[serde(rename = "type")]
    pub method_type: MethodType,
    pub name: String,
    #[serde(rename = "model-hfmi", default)]
    pub model_id: Option<String>,
    #[serde(rename = "preprompt-filename", default)]
    pub preprompt_filename: Option<String>,
}

/// Neuro-symbolic method variants: the human-in-the-loop program and its
/// ablations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsVariant {
    Hitl,
    Direct,
    DirectPlus,
    CodeAsPolicies,
    NoTraj,
}

/// Sketch key used by every ablation table.
const ABLATION_SKETCH_KEY: u32 = 29;

impl NsVariant {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "ns-hitl" => Some(Self::Hitl),
            "ns-direct" => Some(Self::Direct),
            "ns-directplus" => Some(Self::DirectPlus),
            "ns-code-as-policies" => Some(Self::CodeAsPolicies),
            "ns-notraj" => Some(Self::NoTraj),
            _ => None,
        }
    }

    /// Sketch table location relative to the repository root.
    pub fn sketch_table(&self) -> PathBuf {
        let base = Path::new("scripts/llm");
        let dir = match self {
            Self::Hitl => base.to_path_buf(),
            Self::Direct => base.join("ablation_direct"),
            Self::DirectPlus => base.join("ablation_directplus"),
            Self::CodeAsPolicies => base.join("ablation_cap"),
            Self::NoTraj => base.join("ablation_notraj"),
        };
        dir.join("seqn_filled_lfps_sketches.json")
    }

    /// Key into the sketch table. Only the human-in-the-loop variant honours
    /// the requested sketch number.
    pub fn sketch_key(&self, requested: u32) -> String {
        match self {
            Self::Hitl => requested.to_string(),
            _ => ABLATION_SKETCH_KEY.to_string(),
        }
    }

    pub const fn scene_flavor(&self) -> SceneFlavor {
        match self {
            Self::CodeAsPolicies => SceneFlavor::CodeAsPolicies,
            _ => SceneFlavor::Standard,
        }
    }
}

/// Which family of scene queries a neuro-symbolic program runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneFlavor {
    Standard,
    CodeAsPolicies,
}

/// A registry entry resolved to exactly one predictor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    NeuralNet { model: String, depth: bool },
    NeuroSymbolic(NsVariant),
    VlmGrid { preprompt: String },
    Visprog { prompted: bool },
}

/// Method registry keyed by method number. Entries are kept as raw JSON and
/// only the selected one is interpreted, so unrelated entries of other
/// method types never affect a run.
#[derive(Debug, Clone, Default)]
pub struct MethodRegistry {
    entries: HashMap<String, Value>,
}

impl MethodRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| SafetyError::file_system(path, "method registry read", e))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let entries: HashMap<String, Value> = serde_json::from_str(text)?;
        Ok(Self { entries })
    }

    pub fn entry(&self, method_num: u32) -> Result<MethodEntry> {
        let raw = self.entries.get(&method_num.to_string()).ok_or_else(|| {
            SafetyError::configuration(format!("method {method_num} is not registered"))
        })?;
        MethodEntry::deserialize(raw).map_err(|e| {
            SafetyError::configuration(format!("method {method_num} has an invalid entry: {e}"))
        })
    }

    pub fn resolve(&self, method_num: u32) -> Result<Method> {
        let entry = self.entry(method_num)?;
        let name = entry.name.as_str();

        match entry.method_type {
            MethodType::Nn => {
                let model = entry.model_id.clone().ok_or_else(|| {
                    SafetyError::configuration(format!("method {method_num} ({name}) has no model-hfmi"))
                })?;
                Ok(Method::NeuralNet {
                    model,
                    depth: name.contains("depth"),
                })
            }
            MethodType::Ns => NsVariant::from_name(name)
                .map(Method::NeuroSymbolic)
                .ok_or_else(|| {
                    SafetyError::configuration(format!("unknown neuro-symbolic method {name}"))
                }),
            MethodType::Vlm if name.contains("gpt4v") => {
                let preprompt = entry.preprompt_filename.clone().ok_or_else(|| {
                    SafetyError::configuration(format!(
                        "method {method_num} ({name}) has no preprompt-filename"
                    ))
                })?;
                Ok(Method::VlmGrid { preprompt })
            }
            MethodType::Vlm if name.contains("visprog") => Ok(Method::Visprog {
                prompted: name.contains("prompted"),
            }),
            MethodType::Vlm => Err(SafetyError::configuration(format!(
                "unknown vision-language method {name}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"{
        "1": {"type": "nn", "name": "segformer", "model-hfmi": "models/segformer.onnx"},
        "2": {"type": "nn", "name": "segformer-depth", "model-hfmi": "models/segformer_depth.onnx"},
        "3": {"type": "ns", "name": "ns-hitl"},
        "4": {"type": "ns", "name": "ns-code-as-policies"},
        "5": {"type": "vlm", "name": "gpt4v-grid", "preprompt-filename": "gpt4v_grid.txt"},
        "6": {"type": "vlm", "name": "visprog"},
        "7": {"type": "vlm", "name": "visprog-prompted"},
        "8": {"type": "vlm", "name": "llava"},
        "9": {"type": "nn", "name": "no-model"}
    }"#;

    #[test]
    fn test_resolve_every_family() -> Result<()> {
        let registry = MethodRegistry::from_json(REGISTRY)?;

        assert_eq!(
            registry.resolve(1)?,
            Method::NeuralNet {
                model: "models/segformer.onnx".to_string(),
                depth: false
            }
        );
        assert_eq!(
            registry.resolve(2)?,
            Method::NeuralNet {
                model: "models/segformer_depth.onnx".to_string(),
                depth: true
            }
        );
        assert_eq!(registry.resolve(3)?, Method::NeuroSymbolic(NsVariant::Hitl));
        assert_eq!(
            registry.resolve(4)?,
            Method::NeuroSymbolic(NsVariant::CodeAsPolicies)
        );
        assert_eq!(
            registry.resolve(5)?,
            Method::VlmGrid {
                preprompt: "gpt4v_grid.txt".to_string()
            }
        );
        assert_eq!(registry.resolve(6)?, Method::Visprog { prompted: false });
        assert_eq!(registry.resolve(7)?, Method::Visprog { prompted: true });
        Ok(())
    }

    #[test]
    fn test_unresolvable_entries_are_configuration_errors() -> Result<()> {
        let registry = MethodRegistry::from_json(REGISTRY)?;
        for method_num in [8, 9, 42] {
            assert!(matches!(
                registry.resolve(method_num),
                Err(SafetyError::Configuration { .. })
            ));
        }
        Ok(())
    }

    #[test]
    fn test_unrelated_entries_do_not_block_resolution() -> Result<()> {
        let registry = MethodRegistry::from_json(
            r#"{
                "1": {"type": "nn", "name": "segformer", "model-hfmi": "models/segformer.onnx"},
                "20": {"type": "human", "name": "annotator"},
                "21": {"type": "ns"},
                "22": "not an entry"
            }"#,
        )?;
        assert_eq!(
            registry.resolve(1)?,
            Method::NeuralNet {
                model: "models/segformer.onnx".to_string(),
                depth: false
            }
        );
        for method_num in [20, 21, 22] {
            assert!(matches!(
                registry.resolve(method_num),
                Err(SafetyError::Configuration { .. })
            ));
        }
        Ok(())
    }

    #[test]
    fn test_registry_must_be_an_object() {
        assert!(MethodRegistry::from_json(r#"[1, 2]"#).is_err());
    }

    #[test]
    fn test_sketch_locations() {
        assert_eq!(
            NsVariant::Hitl.sketch_table(),
            Path::new("scripts/llm/seqn_filled_lfps_sketches.json")
        );
        assert_eq!(
            NsVariant::NoTraj.sketch_table(),
            Path::new("scripts/llm/ablation_notraj/seqn_filled_lfps_sketches.json")
        );
        assert_eq!(NsVariant::Hitl.sketch_key(12), "12");
        assert_eq!(NsVariant::DirectPlus.sketch_key(12), "29");
        assert_eq!(
            NsVariant::CodeAsPolicies.scene_flavor(),
            SceneFlavor::CodeAsPolicies
        );
        assert_eq!(NsVariant::Direct.scene_flavor(), SceneFlavor::Standard);
    }
}
