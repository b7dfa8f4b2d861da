pub mod config;
pub mod dataset;
pub mod errors;
pub mod grid;
pub mod ground_truth;
pub mod labels;
pub mod model;
pub mod predictors;
pub mod registry;
pub mod scene;
pub mod serializer;
pub mod sketch;
pub mod traits;
pub mod visprog;
pub mod vlm;

pub mod mocks;

mod progress;

pub use config::Config;
pub use dataset::{Dataset, LocalDataset, Sample};
pub use errors::{Result, SafetyError};
pub use ground_truth::export_ground_truth;
pub use labels::{finalize_prediction, LabelMap, BACKGROUND, SAFE, UNSAFE};
pub use model::SegFormerModel;
pub use predictors::{
    run_predictor, NeuralNetPredictor, NeuroSymbolicPredictor, Predictor, VisprogPredictor,
    VlmGridPredictor,
};
pub use registry::{Method, MethodRegistry, NsVariant};
pub use traits::*;
