// 该文件是 Huishou （回收分拣） 项目的一部分。
// src/frame.rs - NCHW 张量与预处理
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{RgbImage, imageops::FilterType};

use crate::config::Preprocess;

const RGB_CHANNELS: usize = 3;

/// 单张 RGB 图像的 `[1, 3, H, W]` 浮点张量
#[derive(Debug, Clone)]
pub struct NchwTensor {
  data: Box<[f32]>,
  width: u32,
  height: u32,
}

impl NchwTensor {
  /// HWC → CHW，并按 `(v / 255 - mean) / std` 归一化
  pub fn from_rgb(image: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> Self {
    let (width, height) = image.dimensions();
    let plane = width as usize * height as usize;
    let mut data = vec![0.0f32; RGB_CHANNELS * plane];

    for (idx, pixel) in image.pixels().enumerate() {
      for c in 0..RGB_CHANNELS {
        data[c * plane + idx] = (pixel[c] as f32 / 255.0 - mean[c]) / std[c];
      }
    }

    Self {
      data: data.into_boxed_slice(),
      width,
      height,
    }
  }

  /// 仅缩放到 `[0, 1]`，检测器使用
  pub fn from_rgb_unit(image: &RgbImage) -> Self {
    Self::from_rgb(image, [0.0; 3], [1.0; 3])
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, self.height as usize, self.width as usize]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn into_vec(self) -> Vec<f32> {
    self.data.into_vec()
  }
}

/// 按分类器的预处理参数缩放裁剪图像
///
/// 未设置 `resize_shorter` 时直接拉伸到目标尺寸；
/// 否则先按短边等比缩放，再居中裁剪。
pub fn resize_for(image: &RgbImage, preprocess: &Preprocess) -> RgbImage {
  let (target_w, target_h) = (preprocess.width(), preprocess.height());

  let Some(shorter) = preprocess.resize_shorter else {
    return image::imageops::resize(image, target_w, target_h, FilterType::Triangle);
  };

  let (w, h) = image.dimensions();
  let scale = shorter as f32 / w.min(h).max(1) as f32;
  let scaled_w = ((w as f32 * scale).round() as u32).max(target_w);
  let scaled_h = ((h as f32 * scale).round() as u32).max(target_h);
  let scaled = image::imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);

  let x = (scaled_w - target_w) / 2;
  let y = (scaled_h - target_h) / 2;
  image::imageops::crop_imm(&scaled, x, y, target_w, target_h).to_image()
}

/// 分类器输入：缩放、裁剪并归一化
pub fn classifier_input(image: &RgbImage, preprocess: &Preprocess) -> NchwTensor {
  let resized = resize_for(image, preprocess);
  NchwTensor::from_rgb(&resized, preprocess.mean, preprocess.std)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn channels_are_planar_and_normalized() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([255, 0, 0]));
    image.put_pixel(1, 0, Rgb([0, 255, 51]));

    let tensor = NchwTensor::from_rgb_unit(&image);
    assert_eq!(tensor.shape(), [1, 3, 1, 2]);
    assert_eq!(tensor.as_slice(), &[1.0, 0.0, 0.0, 1.0, 0.0, 0.2]);

    let tensor = NchwTensor::from_rgb(&image, [0.5; 3], [0.5; 3]);
    assert_eq!(&tensor.as_slice()[..2], &[1.0, -1.0]);
  }

  #[test]
  fn exact_resize_ignores_aspect_ratio() {
    let image = RgbImage::new(300, 120);
    let preprocess = Preprocess {
      size: [224, 224],
      ..Preprocess::default()
    };
    assert_eq!(resize_for(&image, &preprocess).dimensions(), (224, 224));
  }

  #[test]
  fn shorter_side_resize_then_center_crop() {
    let mut image = RgbImage::new(200, 100);
    for x in 90..110 {
      for y in 0..100 {
        image.put_pixel(x, y, Rgb([255, 255, 255]));
      }
    }
    let preprocess = Preprocess {
      size: [384, 384],
      resize_shorter: Some(420),
      ..Preprocess::default()
    };

    let out = resize_for(&image, &preprocess);
    assert_eq!(out.dimensions(), (384, 384));
    // 中心白条应保持在裁剪结果的中央
    assert_eq!(out.get_pixel(192, 192)[0], 255);
    assert_eq!(out.get_pixel(10, 192)[0], 0);
  }
}
