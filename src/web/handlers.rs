use crate::{
    prediction::PredictResponse,
    utils::error::ClassifierError,
    web::{extractors::RequestId, AppState},
    Result,
};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::Json,
};
use std::sync::Arc;
use std::time::Instant;

/// 承载图片的multipart字段名
pub const FILE_FIELD: &str = "file";

/// 文件上传预测处理器：输入一张图片，返回一个标签
pub async fn predict_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>> {
    let start_time = Instant::now();
    tracing::info!("Processing predict request: request_id={}", request_id);

    let classifier = state.models.classifier()?;
    let admission = state.limiter.admit()?;

    let mut multipart = multipart.map_err(|e| {
        ClassifierError::InvalidInput(format!("Expected a multipart form upload: {}", e))
    })?;
    let image_data = read_image_field(&mut multipart, state.max_request_size).await?;
    tracing::debug!(
        "Received file: {} bytes, request_id={}",
        image_data.len(),
        request_id
    );

    let permit = admission.acquire_slot().await?;
    let loader = Arc::clone(&state.loader);
    let prediction = tokio::task::spawn_blocking(move || {
        // 槽位随推理任务释放，请求超时被丢弃时也不提前归还
        let _permit = permit;
        classifier.predict_bytes(&loader, &image_data)
    })
    .await
    .map_err(|e| ClassifierError::Internal(format!("Inference task failed: {}", e)))??;

    tracing::debug!(
        "Logits: request_id={}, logits={:?}",
        request_id,
        prediction.logits
    );

    tracing::info!(
        "Predict completed: request_id={}, class={}, index={}, expected_severity={:?}, time={:.3}s",
        request_id,
        prediction.label,
        prediction.index,
        prediction.expected_severity,
        start_time.elapsed().as_secs_f32()
    );

    Ok(Json(PredictResponse::from(prediction)))
}

/// 从表单中取出图片数据
///
/// 优先使用 `file` 字段；没有时取第一个带文件名的字段，其余字段忽略。
async fn read_image_field(multipart: &mut Multipart, max_size: usize) -> Result<Bytes> {
    let mut fallback: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ClassifierError::FileTooLarge(max_size)
        } else {
            ClassifierError::InvalidInput(format!("Failed to read multipart field: {}", e))
        }
    })? {
        let field_name = field.name().unwrap_or("unknown").to_string();
        let is_file_field = field_name == FILE_FIELD;
        let has_filename = field.file_name().is_some();

        if !is_file_field && (!has_filename || fallback.is_some()) {
            tracing::debug!("Ignoring field: {}", field_name);
            continue;
        }

        if let Some(content_type) = field.content_type() {
            tracing::debug!("Field '{}' content type: {}", field_name, content_type);
        }

        let data = field.bytes().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ClassifierError::FileTooLarge(max_size)
            } else {
                ClassifierError::InvalidInput(format!("Failed to read file data: {}", e))
            }
        })?;

        if is_file_field {
            if data.is_empty() {
                return Err(ClassifierError::InvalidInput("Empty file".to_string()));
            }
            return Ok(data);
        }
        fallback = Some(data);
    }

    match fallback {
        Some(data) if !data.is_empty() => Ok(data),
        Some(_) => Err(ClassifierError::InvalidInput("Empty file".to_string())),
        None => Err(ClassifierError::InvalidInput(format!(
            "No image file provided in field '{}'",
            FILE_FIELD
        ))),
    }
}
