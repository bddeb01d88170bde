use crate::models::profile::{ModelProfile, IMAGENET_MEAN, IMAGENET_STD};
use image::{imageops, imageops::FilterType, DynamicImage};
use ndarray::Array4;

/// 将解码后的图片转换为网络所需的 `[1, 3, R, R]` 张量
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    resolution: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImagePreprocessor {
    pub fn new(resolution: u32, mean: [f32; 3], std: [f32; 3]) -> Self {
        Self {
            resolution,
            mean,
            std,
        }
    }

    pub fn for_profile(profile: &ModelProfile) -> Self {
        Self::new(profile.input_resolution, IMAGENET_MEAN, IMAGENET_STD)
    }

    /// 转RGB、缩放为正方形（不保持宽高比）、缩放到 `[0, 1]` 并按通道标准化，
    /// 输出CHW顺序并带批次维度
    pub fn preprocess(&self, image: &DynamicImage) -> Array4<f32> {
        let size = self.resolution;
        let resized = imageops::resize(&image.to_rgb8(), size, size, FilterType::Triangle);

        let side = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (value - self.mean[c]) / self.std[c];
            }
        }

        tensor
    }

    /// 形状正确的全零输入，用于检查新加载的模型
    pub fn probe_input(&self) -> Array4<f32> {
        let side = self.resolution as usize;
        Array4::<f32>::zeros((1, 3, side, side))
    }
}
