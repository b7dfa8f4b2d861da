use std::path::{Path, PathBuf};

use clap::Parser;

use crate::dataset::LocalDataset;
use crate::registry::NsVariant;
use crate::vlm::{DEFAULT_VLM_BASE_URL, DEFAULT_VLM_MODEL};

#[derive(Parser, Clone, Debug)]
#[command(
    version,
    about = "Generate per-pixel safety predictions for one method over an evaluation dataset",
    long_about = None
)]
pub struct Config {
    /// Evaluation dataset: a directory, or a name under `<repo>/datasets/`.
    #[arg(long, alias = "eval_di", default_value = "sam1120/safety-utcustom-TEST")]
    pub eval_di: String,

    /// Evaluation directory under `evals_data_safety/utcustom/`.
    #[arg(long, alias = "root_dirname", default_value = "test")]
    pub root_dirname: String,

    #[arg(long, alias = "method_num", default_value_t = 1)]
    pub method_num: u32,

    /// Sketch to evaluate for the human-in-the-loop neuro-symbolic method.
    #[arg(long, alias = "ns_sketch_num", default_value_t = 29)]
    pub ns_sketch_num: u32,

    #[arg(long, default_value_t = 0)]
    pub start: usize,

    #[arg(long, alias = "step_size", default_value_t = 1, value_parser = check_step_size)]
    pub step_size: usize,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    #[arg(long, env = "NSPL_REPO")]
    pub repo_root: PathBuf,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub vlm_api_key: Option<String>,

    #[arg(long, env = "VLM_BASE_URL", default_value = DEFAULT_VLM_BASE_URL)]
    pub vlm_base_url: String,

    #[arg(long, default_value = DEFAULT_VLM_MODEL)]
    pub vlm_model: String,

    #[arg(long, env = "VISPROG_ENDPOINT")]
    pub visprog_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self::parse()
    }

    pub fn eval_root(&self) -> PathBuf {
        self.repo_root
            .join("evals_data_safety")
            .join("utcustom")
            .join(&self.root_dirname)
    }

    pub fn predictions_dir(&self) -> PathBuf {
        self.eval_root()
            .join("methods_preds")
            .join(self.method_num.to_string())
    }

    pub fn dataset_root(&self) -> PathBuf {
        LocalDataset::resolve(&self.repo_root, &self.eval_di)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.repo_root.join("scripts/safety/methods_metadata.json")
    }

    pub fn domain_path(&self) -> PathBuf {
        self.repo_root.join("scripts/llm/state.json")
    }

    pub fn preprompt_path(&self, file_name: &str) -> PathBuf {
        self.repo_root.join("scripts/llm/preprompts").join(file_name)
    }

    pub fn sketch_table_path(&self, variant: NsVariant) -> PathBuf {
        self.repo_root.join(variant.sketch_table())
    }

    /// Model identifiers are ONNX paths, relative to the repository root
    /// unless absolute.
    pub fn model_path(&self, model_id: &str) -> PathBuf {
        let path = Path::new(model_id);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.repo_root.join(path)
        }
    }
}

fn check_step_size(s: &str) -> Result<usize, String> {
    let step: usize = s
        .parse()
        .map_err(|_| format!("{s} is not a non-negative integer"))?;
    if step == 0 {
        return Err("step size must be at least 1".to_string());
    }
    Ok(step)
}
