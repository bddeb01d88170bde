use anyhow::{Context, Result};
use clap::Parser;
use flood_classifier::{
    config::{
        Config, DevicePreference, StartupMode, DEFAULT_WEIGHTS_PATH, MAX_OPTIMIZATION_LEVEL,
    },
    models::{Architecture, ModelProfile, ProfilePreset},
    prediction::{DecodePolicy, RoundingRule},
    web::serve,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flood-classifier")]
#[command(about = "Flood severity image classification service")]
struct Args {
    /// Server bind address
    #[arg(long, env = "FLOOD_BIND", default_value = "0.0.0.0:5000")]
    bind: String,

    /// Exported ONNX classifier
    #[arg(long, env = "FLOOD_WEIGHTS", default_value = DEFAULT_WEIGHTS_PATH)]
    weights: String,

    /// Deployment profile
    #[arg(long, env = "FLOOD_PROFILE", value_enum, default_value_t = ProfilePreset::Seeflood)]
    profile: ProfilePreset,

    /// Override the profile's backbone
    #[arg(long, env = "FLOOD_ARCHITECTURE", value_enum)]
    architecture: Option<Architecture>,

    /// Override the square input resolution
    #[arg(long, env = "FLOOD_RESOLUTION")]
    resolution: Option<u32>,

    /// Override the class labels (comma separated, in head order)
    #[arg(long, env = "FLOOD_LABELS", value_delimiter = ',')]
    labels: Option<Vec<String>>,

    /// Override the output decode policy
    #[arg(long, env = "FLOOD_DECODE_POLICY", value_enum)]
    decode_policy: Option<DecodePolicy>,

    /// Override the severity-sum rounding rule
    #[arg(long, env = "FLOOD_ROUNDING", value_enum)]
    rounding: Option<RoundingRule>,

    /// Compute device
    #[arg(long, env = "FLOOD_DEVICE", value_enum, default_value_t = DevicePreference::Auto)]
    device: DevicePreference,

    /// ONNX Runtime graph optimization level (0 disables)
    #[arg(
        long,
        env = "FLOOD_OPTIMIZATION_LEVEL",
        default_value_t = MAX_OPTIMIZATION_LEVEL,
        value_parser = clap::value_parser!(u8).range(0..=3)
    )]
    optimization_level: u8,

    /// Behaviour when the weights cannot be loaded
    #[arg(long, env = "FLOOD_STARTUP_MODE", value_enum, default_value_t = StartupMode::FailFast)]
    startup_mode: StartupMode,

    /// Seconds between load retries while unready (degraded mode)
    #[arg(long, env = "FLOOD_RETRY_INTERVAL")]
    retry_interval: Option<u64>,

    /// Number of worker threads
    #[arg(long, env = "FLOOD_WORKERS")]
    workers: Option<usize>,

    /// Requests decoding or running inference at once
    #[arg(long, env = "FLOOD_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    /// Requests allowed to wait for an inference slot
    #[arg(long, env = "FLOOD_MAX_QUEUED")]
    max_queued: Option<usize>,

    /// Request timeout in seconds
    #[arg(long, env = "FLOOD_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Max request body size in bytes
    #[arg(long, env = "FLOOD_MAX_REQUEST_SIZE")]
    max_request_size: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable development mode
    #[arg(long)]
    dev: bool,
}

impl Args {
    fn profile(&self) -> ModelProfile {
        let mut profile = ModelProfile::preset(self.profile);
        if let Some(architecture) = self.architecture {
            profile = profile.with_architecture(architecture);
        }
        if let Some(resolution) = self.resolution {
            profile = profile.with_resolution(resolution);
        }
        if let Some(labels) = &self.labels {
            profile = profile.with_labels(labels.clone());
        }
        if let Some(policy) = self.decode_policy {
            profile = profile.with_decode_policy(policy);
        }
        if let Some(rounding) = self.rounding {
            profile = profile.with_rounding(rounding);
        }
        profile
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting flood classifier service...");
    tracing::info!("Bind address: {}", args.bind);
    tracing::info!("Weights: {}", args.weights);

    let mut config = Config::new(args.bind.clone(), &args.weights, args.workers, args.dev)?
        .with_profile(args.profile())
        .with_device(args.device)
        .with_optimization_level(args.optimization_level)
        .with_startup_mode(args.startup_mode, args.retry_interval.map(Duration::from_secs));

    if let Some(max_concurrent) = args.max_concurrent {
        config.server_config.max_concurrent_inferences = max_concurrent;
    }
    if let Some(max_queued) = args.max_queued {
        config.server_config.max_queued_requests = max_queued;
    }
    if let Some(request_timeout) = args.request_timeout {
        config.server_config.request_timeout = request_timeout;
    }
    if let Some(max_request_size) = args.max_request_size {
        config.server_config.max_request_size = max_request_size;
    }

    tracing::info!(
        "Profile: {} ({}, {}x{}, {})",
        config.profile.name,
        config.profile.architecture.as_str(),
        config.profile.input_resolution,
        config.profile.input_resolution,
        config.profile.decode_policy.as_str()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(serve(config))?;

    Ok(())
}
