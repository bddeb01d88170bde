use crate::config::StartupMode;
use crate::models::backend::{Device, OnnxBackend};
use crate::models::{FloodClassifier, ModelProfile};
use crate::utils::error::ClassifierError;
use crate::{Config, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// 分类器加载状态
enum ModelStatus {
    Ready {
        classifier: Arc<FloodClassifier>,
        loaded_at: DateTime<Utc>,
    },
    Unready {
        reason: String,
        since: DateTime<Utc>,
    },
}

/// 模型管理器：持有分类器并跟踪是否可以提供服务
pub struct ModelManager {
    profile: ModelProfile,
    status: RwLock<ModelStatus>,
}

impl ModelManager {
    pub fn ready(classifier: FloodClassifier) -> Self {
        Self {
            profile: classifier.profile().clone(),
            status: RwLock::new(ModelStatus::Ready {
                classifier: Arc::new(classifier),
                loaded_at: Utc::now(),
            }),
        }
    }

    pub fn unready(profile: ModelProfile, reason: impl Into<String>) -> Self {
        Self {
            profile,
            status: RwLock::new(ModelStatus::Unready {
                reason: reason.into(),
                since: Utc::now(),
            }),
        }
    }

    /// 按 `config` 加载权重，并应用其启动模式
    pub fn load(config: &Config) -> Result<Self> {
        tracing::info!("Initializing model manager...");
        let result = load_classifier(config);
        Self::from_load_result(config.profile.clone(), config.startup_mode, result)
    }

    /// 根据加载结果构建管理器
    ///
    /// 配置错误（配置非法、输出与标签不匹配）总是致命的。其他失败在fail-fast模式下
    /// 直接退出，在degraded模式下保持未就绪。
    pub fn from_load_result(
        profile: ModelProfile,
        mode: StartupMode,
        result: Result<FloodClassifier>,
    ) -> Result<Self> {
        match result {
            Ok(classifier) => {
                tracing::info!("Model manager initialized successfully");
                Ok(Self::ready(classifier))
            }
            Err(e) if is_fatal(&e) => {
                tracing::error!("Model configuration rejected: {}", e);
                Err(e)
            }
            Err(e) => match mode {
                StartupMode::FailFast => {
                    tracing::error!("Failed to load model, refusing to start: {}", e);
                    Err(e)
                }
                StartupMode::Degraded => {
                    tracing::error!("Failed to load model, serving as unready: {}", e);
                    Ok(Self::unready(profile, e.to_string()))
                }
            },
        }
    }

    /// 启动失败后重试加载，已就绪时不做任何事
    pub fn try_reload(&self, config: &Config) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        match load_classifier(config) {
            Ok(classifier) => {
                self.mark_ready(classifier);
                tracing::info!("Model loaded on retry, service is ready");
                Ok(())
            }
            Err(e) => {
                *self.status.write() = ModelStatus::Unready {
                    reason: e.to_string(),
                    since: Utc::now(),
                };
                Err(e)
            }
        }
    }

    pub fn mark_ready(&self, classifier: FloodClassifier) {
        *self.status.write() = ModelStatus::Ready {
            classifier: Arc::new(classifier),
            loaded_at: Utc::now(),
        };
    }

    /// 获取分类器，未就绪时返回 `ModelNotReady`
    pub fn classifier(&self) -> Result<Arc<FloodClassifier>> {
        match &*self.status.read() {
            ModelStatus::Ready { classifier, .. } => Ok(Arc::clone(classifier)),
            ModelStatus::Unready { reason, .. } => {
                Err(ClassifierError::ModelNotReady(reason.clone()))
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.status.read(), ModelStatus::Ready { .. })
    }

    pub fn health(&self) -> ModelHealth {
        match &*self.status.read() {
            ModelStatus::Ready {
                classifier,
                loaded_at,
            } => ModelHealth {
                ready: true,
                reason: None,
                since: *loaded_at,
                device: Some(classifier.device()),
            },
            ModelStatus::Unready { reason, since } => ModelHealth {
                ready: false,
                reason: Some(reason.clone()),
                since: *since,
                device: None,
            },
        }
    }

    pub fn get_stats(&self) -> ModelStats {
        let (ready, device, num_outputs) = match &*self.status.read() {
            ModelStatus::Ready { classifier, .. } => {
                (true, Some(classifier.device()), Some(classifier.num_outputs()))
            }
            ModelStatus::Unready { .. } => (false, None, None),
        };

        ModelStats {
            profile: self.profile.clone(),
            ready,
            device,
            num_outputs,
        }
    }
}

/// `/health` 返回的就绪状态
#[derive(Debug, Clone, Serialize)]
pub struct ModelHealth {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub since: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
}

/// `/api/info` 返回的模型信息
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub profile: ModelProfile,
    pub ready: bool,
    pub device: Option<Device>,
    pub num_outputs: Option<usize>,
}

/// 构建ONNX后端，并按配置封装为分类器
pub fn load_classifier(config: &Config) -> Result<FloodClassifier> {
    let backend = OnnxBackend::load(&config.weights_path, &config.onnx_config)?;
    FloodClassifier::new(config.profile.clone(), Box::new(backend))
}

/// 后台持续重试加载，直到成功
pub fn spawn_reload_task(
    manager: Arc<ModelManager>,
    config: Config,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        while !manager.is_ready() {
            ticker.tick().await;
            tracing::info!("Retrying model load from {}", config.weights_path.display());

            let manager = Arc::clone(&manager);
            let config = config.clone();
            let outcome =
                tokio::task::spawn_blocking(move || manager.try_reload(&config)).await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) if is_fatal(&e) => {
                    tracing::error!("Model configuration rejected, giving up retries: {}", e);
                    break;
                }
                Ok(Err(e)) => tracing::warn!("Model still unavailable: {}", e),
                Err(e) => tracing::error!("Reload task panicked: {}", e),
            }
        }
    })
}

fn is_fatal(err: &ClassifierError) -> bool {
    matches!(
        err,
        ClassifierError::Config(_) | ClassifierError::ModelLabelMismatch { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classifier::tests::FixedLogits;
    use crate::models::ProfilePreset;

    fn missing_weights() -> Result<FloodClassifier> {
        Err(ClassifierError::ModelLoad("Weights file not found: model.onnx".into()))
    }

    fn water_depth_classifier() -> FloodClassifier {
        let backend = FixedLogits {
            resolution: 224,
            logits: vec![0.0, 2.0, 1.0],
        };
        FloodClassifier::new(ModelProfile::preset(ProfilePreset::WaterDepth), Box::new(backend))
            .unwrap()
    }

    #[test]
    fn fail_fast_propagates_load_errors() {
        let result = ModelManager::from_load_result(
            ModelProfile::default(),
            StartupMode::FailFast,
            missing_weights(),
        );
        assert!(matches!(result, Err(ClassifierError::ModelLoad(_))));
    }

    #[test]
    fn degraded_mode_starts_unready() {
        let manager = ModelManager::from_load_result(
            ModelProfile::default(),
            StartupMode::Degraded,
            missing_weights(),
        )
        .unwrap();

        assert!(!manager.is_ready());
        assert!(matches!(
            manager.classifier(),
            Err(ClassifierError::ModelNotReady(_))
        ));

        let health = manager.health();
        assert!(!health.ready);
        assert!(health.reason.unwrap().contains("model.onnx"));
    }

    #[test]
    fn label_mismatch_is_fatal_even_when_degraded() {
        let result = ModelManager::from_load_result(
            ModelProfile::default(),
            StartupMode::Degraded,
            Err(ClassifierError::ModelLabelMismatch {
                outputs: 7,
                labels: 4,
                policy: "severity-sum",
            }),
        );
        assert!(result.is_err());
    }

    #[test]
    fn becomes_ready_once_marked() {
        let manager = ModelManager::unready(
            ModelProfile::preset(ProfilePreset::WaterDepth),
            "weights missing",
        );
        manager.mark_ready(water_depth_classifier());

        assert!(manager.is_ready());
        let health = manager.health();
        assert!(health.ready);
        assert_eq!(health.device, Some(Device::Cpu));
        assert_eq!(manager.get_stats().num_outputs, Some(3));
    }

    #[test]
    fn reload_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.weights_path = dir.path().join("absent.onnx");

        let manager = ModelManager::unready(config.profile.clone(), "not loaded yet");
        assert!(manager.try_reload(&config).is_err());
        assert!(manager.health().reason.unwrap().contains("absent.onnx"));
    }
}
