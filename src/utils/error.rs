use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Model is not ready: {0}")]
    ModelNotReady(String),

    #[error("Classification head produces {outputs} outputs, which does not fit {labels} labels under the {policy} policy")]
    ModelLabelMismatch {
        outputs: usize,
        labels: usize,
        policy: &'static str,
    },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upload exceeds the {0} byte limit")]
    FileTooLarge(usize),

    #[error("Server busy: {0} requests already admitted")]
    Busy(usize),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ClassifierError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ClassifierError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ClassifierError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ClassifierError::FileTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ClassifierError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            ClassifierError::ModelNotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            ClassifierError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ClassifierError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            ClassifierError::ModelNotReady(_) => "MODEL_NOT_READY",
            ClassifierError::ModelLabelMismatch { .. } => "MODEL_LABEL_MISMATCH",
            ClassifierError::InvalidImage(_) => "INVALID_IMAGE",
            ClassifierError::InvalidInput(_) => "INVALID_INPUT",
            ClassifierError::FileTooLarge(_) => "FILE_TOO_LARGE",
            ClassifierError::Busy(_) => "SERVER_BUSY",
            ClassifierError::Inference(_) => "INFERENCE_ERROR",
            ClassifierError::Config(_) => "CONFIG_ERROR",
            ClassifierError::Io(_) => "IO_ERROR",
            ClassifierError::Ort(_) => "ORT_ERROR",
            ClassifierError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 响应中 `error` 字段使用的简短固定描述
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierError::InvalidImage(_) => "invalid image",
            ClassifierError::InvalidInput(_) => "invalid request",
            ClassifierError::FileTooLarge(_) => "file too large",
            ClassifierError::ModelLoad(_) | ClassifierError::ModelNotReady(_) => "model not ready",
            ClassifierError::Busy(_) => "server busy",
            _ => "internal error",
        }
    }
}

impl IntoResponse for ClassifierError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = serde_json::json!({
            "error": self.kind(),
            "code": self.error_code(),
            "message": self.to_string(),
        });

        if status.is_server_error() {
            tracing::error!("Request failed: {} ({})", self, status);
        } else {
            tracing::warn!("Request rejected: {} ({})", self, status);
        }

        (status, axum::Json(error_response)).into_response()
    }
}
