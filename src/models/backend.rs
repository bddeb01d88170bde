use crate::config::{DevicePreference, OnnxConfig};
use crate::utils::error::ClassifierError;
use crate::Result;
use ndarray::{Array2, Array4, Ix2};
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider},
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;

/// 后端运行的计算设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

/// 已加载的网络，将 `[1, 3, R, R]` 输入映射为 `[1, N]` logits
pub trait InferenceBackend: Send + Sync {
    fn forward(&self, input: Array4<f32>) -> Result<Array2<f32>>;

    fn device(&self) -> Device;
}

/// 持有导出分类模型的ONNX Runtime会话
pub struct OnnxBackend {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    device: Device,
}

impl OnnxBackend {
    pub fn load(model_path: &Path, config: &OnnxConfig) -> Result<Self> {
        if !model_path.exists() {
            return Err(ClassifierError::ModelLoad(format!(
                "Weights file not found: {}",
                model_path.display()
            )));
        }

        let device = select_device(config.device)?;
        tracing::info!(
            "Loading classifier weights from: {} (device: {:?})",
            model_path.display(),
            device
        );

        let mut builder = Session::builder()?
            .with_optimization_level(optimization_level(config))?
            .with_intra_threads(config.intra_threads)?;

        if device == Device::Cuda {
            builder = builder.with_execution_providers([CUDAExecutionProvider::default()
                .build()
                .error_on_failure()])?;
        }

        let session = builder.commit_from_file(model_path).map_err(|e| {
            ClassifierError::ModelLoad(format!(
                "Failed to load {}: {}",
                model_path.display(),
                e
            ))
        })?;

        let input_name = match session.inputs.first() {
            Some(input) => input.name.clone(),
            None => {
                return Err(ClassifierError::ModelLoad(
                    "Classifier graph has no inputs".to_string(),
                ))
            }
        };

        let output_name = match session.outputs.first() {
            Some(output) => output.name.clone(),
            None => {
                return Err(ClassifierError::ModelLoad(
                    "Classifier graph has no outputs".to_string(),
                ))
            }
        };

        tracing::info!(
            "Classifier graph input: '{}', output: '{}'",
            input_name,
            output_name
        );
        for (i, output) in session.outputs.iter().enumerate() {
            tracing::debug!("Classifier output[{}]: '{}'", i, output.name);
        }

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            device,
        })
    }
}

impl InferenceBackend for OnnxBackend {
    fn forward(&self, input: Array4<f32>) -> Result<Array2<f32>> {
        let input_tensor = Tensor::from_array(input)?;

        let logits = {
            let mut session = self.session.lock();
            let outputs = session.run(inputs![self.input_name.as_str() => input_tensor])?;

            match outputs.get(&self.output_name) {
                Some(output) => output.try_extract_array::<f32>()?.into_owned(),
                None => {
                    let available_outputs: Vec<String> =
                        outputs.keys().map(|s| s.to_string()).collect();
                    return Err(ClassifierError::Inference(format!(
                        "Output '{}' not found. Available outputs: {:?}",
                        self.output_name, available_outputs
                    )));
                }
            }
        };

        logits.into_dimensionality::<Ix2>().map_err(|e| {
            ClassifierError::Inference(format!("Expected [batch, classes] logits: {}", e))
        })
    }

    fn device(&self) -> Device {
        self.device
    }
}

fn select_device(preference: DevicePreference) -> Result<Device> {
    let cuda_available = || {
        CUDAExecutionProvider::default()
            .is_available()
            .unwrap_or(false)
    };

    match preference {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Cuda => {
            if cuda_available() {
                Ok(Device::Cuda)
            } else {
                Err(ClassifierError::ModelLoad(
                    "CUDA requested but the CUDA execution provider is unavailable".to_string(),
                ))
            }
        }
        DevicePreference::Auto => {
            if cuda_available() {
                Ok(Device::Cuda)
            } else {
                tracing::info!("CUDA unavailable, running on CPU");
                Ok(Device::Cpu)
            }
        }
    }
}

fn optimization_level(config: &OnnxConfig) -> GraphOptimizationLevel {
    match config.optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    }
}
