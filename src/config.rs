use crate::models::ModelProfile;
use crate::utils::error::ClassifierError;
use crate::Result;
use clap::ValueEnum;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// 导出权重的默认位置，与训练输出放在一起
pub const DEFAULT_WEIGHTS_PATH: &str = "../training/seeflood_model.onnx";

pub const MAX_OPTIMIZATION_LEVEL: u8 = 3;

#[derive(Debug, Clone)]
pub struct Config {
    /// 服务器绑定地址
    pub bind_addr: String,

    /// 导出的分类模型
    pub weights_path: PathBuf,

    /// 工作线程数量
    pub workers: usize,

    /// 开发模式
    pub dev_mode: bool,

    /// 权重无法加载时的处理方式
    pub startup_mode: StartupMode,

    /// 未就绪时的重新加载间隔（仅degraded模式）
    pub retry_interval: Option<Duration>,

    /// 部署模型的架构、标签和解码策略
    pub profile: ModelProfile,

    pub onnx_config: OnnxConfig,

    pub server_config: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// CPU线程数
    pub intra_threads: usize,

    /// 图优化级别（0为关闭，3为全部启用）
    pub optimization_level: u8,

    pub device: DevicePreference,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    /// 请求超时时间（秒）
    pub request_timeout: u64,

    /// 最大请求体大小（字节）
    pub max_request_size: usize,

    /// 同时解码或推理的请求数
    pub max_concurrent_inferences: usize,

    /// 允许排队等待推理槽位的请求数
    pub max_queued_requests: usize,

    /// 允许的最大图片宽高
    pub max_image_dimension: u32,
}

/// 启动时权重加载失败的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StartupMode {
    /// 拒绝启动
    #[default]
    FailFast,
    /// 以未就绪状态启动：模型加载前 `/predict` 返回503
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DevicePreference {
    /// 有CUDA时用CUDA，否则用CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl Config {
    pub fn new(
        bind_addr: String,
        weights_path: impl Into<PathBuf>,
        workers: Option<usize>,
        dev_mode: bool,
    ) -> Result<Self> {
        let cpu_cores = num_cpus::get();
        let workers = workers.unwrap_or(cpu_cores);
        if workers == 0 {
            return Err(ClassifierError::Config(
                "Worker count must be at least 1".to_string(),
            ));
        }

        let onnx_config = OnnxConfig {
            intra_threads: (cpu_cores * 3 / 4).max(1),
            ..OnnxConfig::default()
        };

        let server_config = ServerConfig {
            request_timeout: if dev_mode { 300 } else { 60 },
            ..ServerConfig::default()
        };

        Ok(Self {
            bind_addr,
            weights_path: weights_path.into(),
            workers,
            dev_mode,
            startup_mode: StartupMode::default(),
            retry_interval: None,
            profile: ModelProfile::default(),
            onnx_config,
            server_config,
        })
    }

    pub fn with_profile(mut self, profile: ModelProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_startup_mode(mut self, mode: StartupMode, retry_interval: Option<Duration>) -> Self {
        self.startup_mode = mode;
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.onnx_config.device = device;
        self
    }

    pub fn with_optimization_level(mut self, level: u8) -> Self {
        self.onnx_config.optimization_level = level;
        self
    }

    /// 加载权重前完成所有可做的校验
    pub fn validate(&self) -> Result<SocketAddr> {
        self.profile.validate()?;

        let server = &self.server_config;
        if server.max_concurrent_inferences == 0 {
            return Err(ClassifierError::Config(
                "max_concurrent_inferences must be at least 1".to_string(),
            ));
        }
        if server.max_request_size == 0 || server.request_timeout == 0 {
            return Err(ClassifierError::Config(
                "Request size and timeout limits must be positive".to_string(),
            ));
        }
        if self.onnx_config.optimization_level > MAX_OPTIMIZATION_LEVEL {
            return Err(ClassifierError::Config(format!(
                "Optimization level must be between 0 and {}, got {}",
                MAX_OPTIMIZATION_LEVEL, self.onnx_config.optimization_level
            )));
        }
        if self.retry_interval.is_some() && self.startup_mode == StartupMode::FailFast {
            tracing::warn!("Retry interval ignored in fail-fast mode");
        }

        self.bind_addr.parse().map_err(|e| {
            ClassifierError::Config(format!("Invalid bind address {}: {}", self.bind_addr, e))
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            weights_path: PathBuf::from(DEFAULT_WEIGHTS_PATH),
            workers: num_cpus::get(),
            dev_mode: false,
            startup_mode: StartupMode::default(),
            retry_interval: None,
            profile: ModelProfile::default(),
            onnx_config: OnnxConfig::default(),
            server_config: ServerConfig::default(),
        }
    }
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            intra_threads: 1,
            optimization_level: MAX_OPTIMIZATION_LEVEL,
            device: DevicePreference::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout: 60,
            max_request_size: 20 * 1024 * 1024, // 20MB
            max_concurrent_inferences: 4,
            max_queued_requests: 32,
            max_image_dimension: crate::image::loader::DEFAULT_MAX_DIMENSION,
        }
    }
}
