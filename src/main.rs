use std::fs;

use anyhow::{ensure, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use nspl_safety::{
    export_ground_truth, run_predictor,
    scene::{load_sketch_text, CachedScene, Domain},
    sketch::{QueryTable, Sketch},
    visprog::HttpProgramEngine,
    vlm::OpenAiVisionClient,
    Config, LocalDataset, Method, MethodRegistry, NeuralNetPredictor, NeuroSymbolicPredictor,
    Predictor, SegFormerModel, VisprogPredictor, VlmGridPredictor,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::new();
    ensure!(
        config.repo_root.is_dir(),
        "Repository root does not exist: {}",
        config.repo_root.display()
    );

    let dataset_root = config.dataset_root();
    let dataset = LocalDataset::open(&dataset_root)
        .with_context(|| format!("Failed to open dataset: {}", dataset_root.display()))?;
    let eval_root = config.eval_root();
    fs::create_dir_all(&eval_root)
        .with_context(|| format!("Failed to create eval directory: {}", eval_root.display()))?;

    if export_ground_truth(&dataset, &eval_root).context("Failed to export ground truth")? {
        info!(root = %config.root_dirname, "ground truth saved");
    }

    let registry = MethodRegistry::load(&config.registry_path())?;
    let method = registry.resolve(config.method_num)?;
    info!(method_num = config.method_num, ?method, "resolved method");

    let mut predictor = build_predictor(&config, method)?;
    let written = run_predictor(
        &dataset,
        predictor.as_mut(),
        &config.predictions_dir(),
        config.start,
        config.step_size,
    )
    .with_context(|| format!("Method {} failed", config.method_num))?;

    info!(written, out_dir = %config.predictions_dir().display(), "done");
    Ok(())
}

fn build_predictor(config: &Config, method: Method) -> Result<Box<dyn Predictor>> {
    let eval_root = config.eval_root();
    let predictor: Box<dyn Predictor> = match method {
        Method::NeuralNet { model, depth } => {
            let model_path = config.model_path(&model);
            ensure!(
                model_path.exists(),
                "Model path does not exist: {}",
                model_path.display()
            );
            let model = SegFormerModel::new(&model_path, config.device_id)?;
            if depth {
                Box::new(NeuralNetPredictor::with_depth(model, &eval_root))
            } else {
                Box::new(NeuralNetPredictor::new(model))
            }
        }
        Method::NeuroSymbolic(variant) => {
            let domain = Domain::load(&config.domain_path())?;
            let table_path = config.sketch_table_path(variant);
            let text = load_sketch_text(&table_path, &variant.sketch_key(config.ns_sketch_num))?;
            let sketch = Sketch::compile(&text, &QueryTable::for_domain(&domain))
                .with_context(|| format!("Invalid sketch in {}", table_path.display()))?;
            let scene = CachedScene::new(variant.scene_flavor());
            Box::new(NeuroSymbolicPredictor::new(sketch, scene, &eval_root))
        }
        Method::VlmGrid { preprompt } => {
            let preprompt_path = config.preprompt_path(&preprompt);
            let preprompt = fs::read_to_string(&preprompt_path).with_context(|| {
                format!("Failed to read preprompt: {}", preprompt_path.display())
            })?;
            let api_key = config
                .vlm_api_key
                .clone()
                .context("OPENAI_API_KEY is required for vision-language methods")?;
            let client = OpenAiVisionClient::new(api_key, &config.vlm_base_url, &config.vlm_model)?;
            Box::new(VlmGridPredictor::new(client, preprompt))
        }
        Method::Visprog { prompted } => {
            let endpoint = config
                .visprog_endpoint
                .as_deref()
                .context("VISPROG_ENDPOINT is required for visual program methods")?;
            Box::new(VisprogPredictor::new(HttpProgramEngine::new(endpoint)?, prompted))
        }
    };
    Ok(predictor)
}
