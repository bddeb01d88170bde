use crate::utils::error::ClassifierError;
use crate::Result;
use clap::ValueEnum;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// 输出层得分到标签索引的解码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DecodePolicy {
    /// 取最大logit
    Argmax,
    /// 各类sigmoid求和，取整并截断到有序等级
    SeveritySum,
}

impl DecodePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodePolicy::Argmax => "argmax",
            DecodePolicy::SeveritySum => "severity-sum",
        }
    }

    /// 输出数为 `outputs` 的模型能否解码为 `labels` 个类别
    ///
    /// `n` 个sigmoid之和落在 `[0, n]`，可对应 `n + 1` 个有序等级，或截断最高档后的 `n` 个等级。
    pub fn accepts(&self, outputs: usize, labels: usize) -> bool {
        match self {
            DecodePolicy::Argmax => outputs > 0 && outputs == labels,
            DecodePolicy::SeveritySum => outputs > 0 && (outputs == labels || outputs + 1 == labels),
        }
    }
}

/// 截断前对期望严重度的取整规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RoundingRule {
    /// 恰为.5时取偶数（2.5 -> 2, 3.5 -> 4）
    #[default]
    HalfEven,
    /// 恰为.5时向上取整（2.5 -> 3）
    HalfUp,
}

impl RoundingRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundingRule::HalfEven => "half-even",
            RoundingRule::HalfUp => "half-up",
        }
    }

    pub fn apply(&self, value: f32) -> f32 {
        match self {
            RoundingRule::HalfEven => value.round_ties_even(),
            RoundingRule::HalfUp => value.round(),
        }
    }
}

/// 单行logits的解码结果
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub index: usize,
    /// 取整前的sigmoid之和，仅severity-sum策略下有值
    pub expected_severity: Option<f32>,
}

/// 绑定标签数量的输出解码器
#[derive(Debug, Clone)]
pub struct OutputDecoder {
    policy: DecodePolicy,
    rounding: RoundingRule,
    num_labels: usize,
}

impl OutputDecoder {
    /// 校验输出层大小与标签列表后构建解码器
    pub fn new(
        policy: DecodePolicy,
        rounding: RoundingRule,
        num_outputs: usize,
        num_labels: usize,
    ) -> Result<Self> {
        if !policy.accepts(num_outputs, num_labels) {
            return Err(ClassifierError::ModelLabelMismatch {
                outputs: num_outputs,
                labels: num_labels,
                policy: policy.as_str(),
            });
        }

        Ok(Self {
            policy,
            rounding,
            num_labels,
        })
    }

    pub fn decode(&self, logits: ArrayView1<f32>) -> Result<Decoded> {
        if logits.is_empty() {
            return Err(ClassifierError::Inference("Empty logits".to_string()));
        }
        if logits.iter().any(|v| v.is_nan()) {
            return Err(ClassifierError::Inference(
                "Model produced NaN logits".to_string(),
            ));
        }

        let decoded = match self.policy {
            DecodePolicy::Argmax => Decoded {
                index: argmax(logits),
                expected_severity: None,
            },
            DecodePolicy::SeveritySum => {
                let expected: f32 = logits.iter().map(|&v| sigmoid(v)).sum();
                let rounded = self.rounding.apply(expected);
                let max_index = (self.num_labels - 1) as f32;
                Decoded {
                    index: rounded.clamp(0.0, max_index) as usize,
                    expected_severity: Some(expected),
                }
            }
        };

        Ok(decoded)
    }
}

/// 逻辑函数
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// 最大值的索引，相等时取第一个
pub fn argmax(values: ArrayView1<f32>) -> usize {
    let mut best_idx = 0;
    let mut best = f32::NEG_INFINITY;

    for (i, &v) in values.iter().enumerate() {
        if v > best {
            best = v;
            best_idx = i;
        }
    }

    best_idx
}
