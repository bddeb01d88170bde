pub mod config;
pub mod image;
pub mod models;
pub mod prediction;
pub mod utils;
pub mod web;

// 重新导出主要类型
pub use config::Config;
pub use models::{FloodClassifier, ModelManager, ModelProfile};
pub use prediction::{PredictResponse, Prediction};
pub use utils::error::ClassifierError;

pub type Result<T> = std::result::Result<T, ClassifierError>;
