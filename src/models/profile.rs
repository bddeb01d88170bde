use crate::prediction::{DecodePolicy, RoundingRule};
use crate::utils::error::ClassifierError;
use crate::Result;
use clap::ValueEnum;
use serde::Serialize;
use std::collections::HashSet;

/// 支持的骨干网络共用的ImageNet通道统计值
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

const MAX_RESOLUTION: u32 = 2048;

/// 导出模型所用的骨干网络
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Architecture {
    EfficientnetB0,
    Resnet18,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::EfficientnetB0 => "efficientnet-b0",
            Architecture::Resnet18 => "resnet18",
        }
    }

    /// 骨干网络的原生训练分辨率
    pub fn default_resolution(&self) -> u32 {
        224
    }
}

/// 内置部署配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ProfilePreset {
    /// EfficientNet-B0，320px，有序severity-sum输出
    #[default]
    Seeflood,
    /// 相对人体的水深，argmax
    WaterDepth,
    /// 四级严重度，argmax
    FloodSeverity,
}

/// 区分不同部署模型的全部参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelProfile {
    pub name: String,
    pub architecture: Architecture,
    pub input_resolution: u32,
    pub labels: Vec<String>,
    pub decode_policy: DecodePolicy,
    pub rounding: RoundingRule,
}

impl ModelProfile {
    pub fn preset(preset: ProfilePreset) -> Self {
        match preset {
            ProfilePreset::Seeflood => Self {
                name: "seeflood".to_string(),
                architecture: Architecture::EfficientnetB0,
                input_resolution: 320,
                labels: labels(&["none", "light", "moderate", "severe"]),
                decode_policy: DecodePolicy::SeveritySum,
                rounding: RoundingRule::HalfEven,
            },
            ProfilePreset::WaterDepth => Self {
                name: "water-depth".to_string(),
                architecture: Architecture::Resnet18,
                input_resolution: Architecture::Resnet18.default_resolution(),
                labels: labels(&["none", "ankle_deep", "knee_deep"]),
                decode_policy: DecodePolicy::Argmax,
                rounding: RoundingRule::HalfEven,
            },
            ProfilePreset::FloodSeverity => Self {
                name: "flood-severity".to_string(),
                architecture: Architecture::Resnet18,
                input_resolution: Architecture::Resnet18.default_resolution(),
                labels: labels(&["no flood", "light", "moderate", "severe"]),
                decode_policy: DecodePolicy::Argmax,
                rounding: RoundingRule::HalfEven,
            },
        }
    }

    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.input_resolution = resolution;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels.into_iter().map(|l| l.trim().to_string()).collect();
        self
    }

    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }

    pub fn with_rounding(mut self, rounding: RoundingRule) -> Self {
        self.rounding = rounding;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(ClassifierError::Config(format!(
                "Profile '{}' has no class labels",
                self.name
            )));
        }

        if self.labels.iter().any(|l| l.trim().is_empty()) {
            return Err(ClassifierError::Config(format!(
                "Profile '{}' contains a blank label",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for label in &self.labels {
            if !seen.insert(label.as_str()) {
                return Err(ClassifierError::Config(format!(
                    "Profile '{}' repeats label '{}'",
                    self.name, label
                )));
            }
        }

        if self.input_resolution == 0 || self.input_resolution > MAX_RESOLUTION {
            return Err(ClassifierError::Config(format!(
                "Input resolution {} out of range 1..={}",
                self.input_resolution, MAX_RESOLUTION
            )));
        }

        Ok(())
    }
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self::preset(ProfilePreset::default())
    }
}

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
