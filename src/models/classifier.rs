use crate::image::{ImageLoader, ImagePreprocessor};
use crate::models::backend::{Device, InferenceBackend};
use crate::models::ModelProfile;
use crate::prediction::{OutputDecoder, Prediction};
use crate::utils::error::ClassifierError;
use crate::Result;
use image::DynamicImage;
use ndarray::Axis;

/// 洪水分类器：预处理、一次前向推理和输出解码
pub struct FloodClassifier {
    profile: ModelProfile,
    preprocessor: ImagePreprocessor,
    decoder: OutputDecoder,
    backend: Box<dyn InferenceBackend>,
    num_outputs: usize,
}

impl FloodClassifier {
    /// 封装已加载的后端，并试跑一次以获取输出层大小
    ///
    /// 输出无法解码为配置的标签时返回 `ModelLabelMismatch`，
    /// 模型不接受配置的输入分辨率时返回 `ModelLoad`。
    pub fn new(profile: ModelProfile, backend: Box<dyn InferenceBackend>) -> Result<Self> {
        profile.validate()?;

        let preprocessor = ImagePreprocessor::for_profile(&profile);
        let probe = backend.forward(preprocessor.probe_input()).map_err(|e| {
            ClassifierError::ModelLoad(format!(
                "Probe forward pass at {}x{} failed: {}",
                profile.input_resolution, profile.input_resolution, e
            ))
        })?;

        if probe.nrows() != 1 {
            return Err(ClassifierError::ModelLoad(format!(
                "Expected one output row for a single image, got {}",
                probe.nrows()
            )));
        }

        let num_outputs = probe.ncols();
        let decoder = OutputDecoder::new(
            profile.decode_policy,
            profile.rounding,
            num_outputs,
            profile.labels.len(),
        )?;

        tracing::info!(
            "Classifier ready: profile={}, architecture={}, input={}x{}, outputs={}, labels={:?}, policy={}",
            profile.name,
            profile.architecture.as_str(),
            profile.input_resolution,
            profile.input_resolution,
            num_outputs,
            profile.labels,
            profile.decode_policy.as_str()
        );

        Ok(Self {
            profile,
            preprocessor,
            decoder,
            backend,
            num_outputs,
        })
    }

    /// 对上传的单张图片解码、预处理、推理并打标签
    pub fn predict_bytes(&self, loader: &ImageLoader, bytes: &[u8]) -> Result<Prediction> {
        let image = loader.decode(bytes)?;
        tracing::debug!("Decoded image: {}x{}", image.width(), image.height());
        self.predict(&image)
    }

    pub fn predict(&self, image: &DynamicImage) -> Result<Prediction> {
        let input = self.preprocessor.preprocess(image);
        let logits = self.backend.forward(input)?;

        if logits.nrows() != 1 || logits.ncols() != self.num_outputs {
            return Err(ClassifierError::Inference(format!(
                "Expected logits of shape [1, {}], got {:?}",
                self.num_outputs,
                logits.shape()
            )));
        }

        let row = logits.index_axis(Axis(0), 0);
        let decoded = self.decoder.decode(row)?;

        let label = self
            .profile
            .labels
            .get(decoded.index)
            .cloned()
            .ok_or_else(|| {
                ClassifierError::Internal(format!("Label index {} out of range", decoded.index))
            })?;

        Ok(Prediction {
            index: decoded.index,
            label,
            logits: row.to_vec(),
            expected_severity: decoded.expected_severity,
        })
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    pub fn device(&self) -> Device {
        self.backend.device()
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }
}
