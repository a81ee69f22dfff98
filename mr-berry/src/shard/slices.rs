//! 从训练体中按掩膜覆盖率选取水平切片.

use std::path::Path;

use ndarray::{s, Array2, Array3, ArrayView2};

use crate::config::SliceSpec;
use crate::consts::gray;
use crate::{BrainMask, Idx2d, Idx3d, MrScan, NiftiHeaderAttr, PrepError, PrepResult};

/// 一个训练体中选出的切片组.
#[derive(Clone, Debug)]
pub struct SliceSample {
    /// 强度切片, `(count, H, W)`.
    pub image: Array3<f32>,
    /// 掩膜切片, `(count, H, W)`, 取值 0/1.
    pub mask: Array3<u8>,
    /// 选中的深度索引, 单调不减.
    pub indices: Vec<usize>,
    /// 每个深度索引的掩膜覆盖率.
    pub coverage: Vec<f32>,
}

impl SliceSample {
    /// 切片组形状 `(count, H, W)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.image.dim()
    }
}

/// 覆盖率可用区间 `[z_start, z_end]`.
///
/// `z_start` 是第一个覆盖率不低于 `start_thr` 的索引, `z_end` 是最后一个覆盖率不低于
/// `end_thr` 的索引. 任一端不存在时返回 `None`. 两端阈值不同可能使 `z_end < z_start`,
/// 此时交换两端.
pub fn coverage_band(coverage: &[f32], start_thr: f32, end_thr: f32) -> Option<(usize, usize)> {
    let a = coverage.iter().position(|c| *c >= start_thr)?;
    let b = coverage.iter().rposition(|c| *c >= end_thr)?;
    Some(if b < a { (b, a) } else { (a, b) })
}

/// 四舍六入五成双.
#[inline]
fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
        r - x.signum()
    } else {
        r
    }
}

/// 在 `[a, b]` 上 (含两端) 等距选取 `count` 个整数索引. 区间窄于 `count` 时索引会重复.
pub fn spaced_indices(a: usize, b: usize, count: usize) -> Vec<usize> {
    match count {
        0 => vec![],
        1 => vec![a],
        _ => {
            let step = (b as f64 - a as f64) / (count - 1) as f64;
            (0..count)
                .map(|i| round_half_even(a as f64 + i as f64 * step) as usize)
                .collect()
        }
    }
}

/// 角点对齐的缩放比例: 输出首尾像素对应输入首尾像素.
#[inline]
fn corner_scale(n_in: usize, n_out: usize) -> f64 {
    if n_out > 1 {
        (n_in - 1) as f64 / (n_out - 1) as f64
    } else {
        0.0
    }
}

/// 双线性缩放.
fn resize_linear(src: ArrayView2<'_, f32>, (th, tw): Idx2d) -> Array2<f32> {
    let (sh, sw) = src.dim();
    let (fy, fx) = (corner_scale(sh, th), corner_scale(sw, tw));
    Array2::from_shape_fn((th, tw), |(y, x)| {
        let (sy, sx) = (y as f64 * fy, x as f64 * fx);
        let (y0, x0) = (sy.floor() as usize, sx.floor() as usize);
        let (y1, x1) = ((y0 + 1).min(sh - 1), (x0 + 1).min(sw - 1));
        let (dy, dx) = (sy - y0 as f64, sx - x0 as f64);
        let top = src[(y0, x0)] as f64 * (1.0 - dx) + src[(y0, x1)] as f64 * dx;
        let bottom = src[(y1, x0)] as f64 * (1.0 - dx) + src[(y1, x1)] as f64 * dx;
        (top * (1.0 - dy) + bottom * dy) as f32
    })
}

/// 最近邻缩放后以 0.5 为阈值重新二值化.
fn resize_mask(src: ArrayView2<'_, u8>, (th, tw): Idx2d) -> Array2<u8> {
    let (sh, sw) = src.dim();
    let (fy, fx) = (corner_scale(sh, th), corner_scale(sw, tw));
    Array2::from_shape_fn((th, tw), |(y, x)| {
        let sy = ((y as f64 * fy).round() as usize).min(sh - 1);
        let sx = ((x as f64 * fx).round() as usize).min(sw - 1);
        if src[(sy, sx)] as f32 > 0.5 {
            gray::MASK_BRAIN
        } else {
            gray::MASK_BACKGROUND
        }
    })
}

/// 从训练体 `train` 与会话掩膜 `mask` 中提取 `spec.count` 张切片.
///
/// - 两者网格不一致时返回 [`PrepError::ShapeMismatch`];
/// - 没有满足覆盖率阈值的深度索引时返回 [`PrepError::NoCoverage`] (软错误).
///
/// `source` 只用于错误信息.
pub fn extract(
    train: &MrScan,
    mask: &BrainMask,
    spec: &SliceSpec,
    source: &Path,
) -> PrepResult<SliceSample> {
    if train.shape() != mask.shape() {
        return Err(PrepError::ShapeMismatch {
            expected: mask.shape(),
            actual: train.shape(),
        });
    }
    let coverage = mask.coverage();
    let (start_thr, end_thr) = spec.thresholds();
    let (a, b) = coverage_band(&coverage, start_thr, end_thr)
        .ok_or_else(|| PrepError::NoCoverage(source.to_path_buf()))?;
    let indices = spaced_indices(a, b, spec.count);

    let native = train.slice_shape();
    let (h, w) = spec.target_size.unwrap_or(native);
    let resize = native != (h, w);
    let mut image = Array3::zeros((indices.len(), h, w));
    let mut out_mask = Array3::zeros((indices.len(), h, w));
    for (i, &z) in indices.iter().enumerate() {
        let (img, m) = (train.slice_at(z), mask.slice_at(z));
        if resize {
            image.slice_mut(s![i, .., ..]).assign(&resize_linear(img, (h, w)));
            out_mask.slice_mut(s![i, .., ..]).assign(&resize_mask(m, (h, w)));
        } else {
            image.slice_mut(s![i, .., ..]).assign(&img);
            out_mask.slice_mut(s![i, .., ..]).assign(&m);
        }
    }
    Ok(SliceSample {
        image,
        mask: out_mask,
        indices,
        coverage,
    })
}
