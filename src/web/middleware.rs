use crate::utils::error::ClassifierError;
use crate::Result;
use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 请求日志中间件
pub async fn request_logging(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let start_time = Instant::now();
    tracing::debug!("Request started: {} {} - User-Agent: {}", method, uri, user_agent);

    let response = next.run(req).await;

    tracing::info!(
        "Request completed: {} {} - {} - {}ms",
        method,
        uri,
        response.status(),
        start_time.elapsed().as_millis()
    );

    response
}

/// 安全头中间件
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));

    response
}

/// 推理请求的有界准入控制
///
/// 同时最多 `max_concurrent` 个请求持有推理槽位，另有最多 `max_queued` 个请求排队等待，
/// 超出部分直接返回 `Busy`。
#[derive(Debug, Clone)]
pub struct InferenceLimiter {
    admission: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// 已进入队列、尚未拿到推理槽位的请求
#[derive(Debug)]
pub struct Admission {
    admission: OwnedSemaphorePermit,
    slots: Arc<Semaphore>,
}

/// 在解码和推理期间持有
#[derive(Debug)]
pub struct InferencePermit {
    _admission: OwnedSemaphorePermit,
    _slot: OwnedSemaphorePermit,
}

impl InferenceLimiter {
    pub fn new(max_concurrent: usize, max_queued: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let capacity = max_concurrent + max_queued;
        Self {
            admission: Arc::new(Semaphore::new(capacity)),
            slots: Arc::new(Semaphore::new(max_concurrent)),
            capacity,
        }
    }

    /// 不等待地占用一个排队位置
    pub fn admit(&self) -> Result<Admission> {
        let admission = Arc::clone(&self.admission)
            .try_acquire_owned()
            .map_err(|_| ClassifierError::Busy(self.capacity))?;

        Ok(Admission {
            admission,
            slots: Arc::clone(&self.slots),
        })
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Admission {
    /// 等待推理槽位
    pub async fn acquire_slot(self) -> Result<InferencePermit> {
        let slot = self
            .slots
            .acquire_owned()
            .await
            .map_err(|_| ClassifierError::Internal("Inference limiter closed".to_string()))?;

        Ok(InferencePermit {
            _admission: self.admission,
            _slot: slot,
        })
    }
}
