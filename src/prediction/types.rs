use serde::{Deserialize, Serialize};

/// 单张图片的分类结果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub index: usize,
    pub label: String,
    /// 该批次行的原始输出得分
    pub logits: Vec<f32>,
    pub expected_severity: Option<f32>,
}

/// `POST /predict` 的响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub class: String,
}

impl From<Prediction> for PredictResponse {
    fn from(prediction: Prediction) -> Self {
        Self {
            class: prediction.label,
        }
    }
}
