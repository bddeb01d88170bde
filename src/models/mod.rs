pub mod backend;
pub mod classifier;
pub mod manager;
pub mod profile;

pub use backend::{Device, InferenceBackend, OnnxBackend};
pub use classifier::FloodClassifier;
pub use manager::{ModelHealth, ModelManager, ModelStats};
pub use profile::{Architecture, ModelProfile, ProfilePreset};
