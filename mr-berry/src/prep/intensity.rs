//! 基于脑掩膜的鲁棒强度归一化.

use serde::Serialize;

use crate::consts::*;
use crate::data::window::{percentile_sorted, sorted_finite};
use crate::{BrainMask, MrScan, NiftiHeaderAttr, PrepError, PrepResult};

/// 归一化统计量与 QC 信号. 同时作为边车文件内容.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NormStats {
    /// 掩膜中的体素个数 (回退之前).
    pub mask_voxels: usize,
    /// 掩膜过小, 统计量取自整个体数据.
    pub whole_volume_fallback: bool,
    /// 第 0.5 与第 99.5 百分位数.
    pub p0p5_p99p5: [f64; 2],
    /// 截断后的均值与标准差 (已加下限).
    pub mean_std: [f64; 2],
    /// 截断前的中位数与中位数绝对偏差.
    #[serde(rename = "median_MAD")]
    pub median_mad: [f64; 2],
    /// 归一化后掩膜内的标准差.
    pub post_std: f64,
    /// 首个方向轴不是 R.
    pub lr_flip_suspect: bool,
    /// QC 警告. 不会中断流水线.
    pub warnings: Vec<String>,
}

/// 总体均值与标准差.
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// 中位数与中位数绝对偏差.
fn median_mad(sorted: &[f32]) -> (f64, f64) {
    let Some(median) = percentile_sorted(sorted, 50.0) else {
        return (0.0, 0.0);
    };
    let dev = sorted_finite(sorted.iter().map(|v| (*v as f64 - median).abs() as f32));
    (median, percentile_sorted(&dev, 50.0).unwrap_or(0.0))
}

/// 对 `scan` 做鲁棒 z-score 归一化.
///
/// 1. 统计区域为掩膜内体素; 掩膜体素少于 [`NORM_MIN_MASK_VOXELS`] 时退化为整个体数据;
/// 2. 取统计区域的 0.5 与 99.5 百分位数, 对 **整个** 体数据截断;
/// 3. 以截断后统计区域的均值与标准差 (加上 [`NORM_STD_FLOOR`]) 做 z-score.
///
/// 掩膜与体数据网格不一致时返回 [`PrepError::ShapeMismatch`].
pub fn robust_normalize(scan: &MrScan, mask: &BrainMask) -> PrepResult<(MrScan, NormStats)> {
    if scan.shape() != mask.shape() {
        return Err(PrepError::ShapeMismatch {
            expected: scan.shape(),
            actual: mask.shape(),
        });
    }
    let mask_voxels = mask.count();
    let fallback = mask_voxels < NORM_MIN_MASK_VOXELS;
    let selected = |m: u8| fallback || gray::is_brain(m);

    let region: Vec<f32> = scan
        .data()
        .iter()
        .zip(mask.data().iter())
        .filter(|(_, m)| selected(**m))
        .map(|(v, _)| *v)
        .collect();
    let sorted = sorted_finite(region.iter().copied());
    let lo = percentile_sorted(&sorted, NORM_LOWER_PERCENTILE).unwrap_or(0.0);
    let hi = percentile_sorted(&sorted, NORM_UPPER_PERCENTILE).unwrap_or(0.0);
    let (median, mad) = median_mad(&sorted);

    let clipped: Vec<f64> = region.iter().map(|v| (*v as f64).clamp(lo, hi)).collect();
    let (mean, std) = mean_std(&clipped);
    let std = std + NORM_STD_FLOOR;

    let out = scan.data().mapv(|v| (((v as f64).clamp(lo, hi) - mean) / std) as f32);
    let post: Vec<f64> = out
        .iter()
        .zip(mask.data().iter())
        .filter(|(_, m)| selected(**m))
        .map(|(v, _)| *v as f64)
        .collect();
    let (_, post_std) = mean_std(&post);

    let lr_flip_suspect = scan
        .axcodes()
        .map_or(false, |codes| !codes.starts_with('R'));

    let mut warnings = vec![];
    if mask_voxels < QC_MIN_MASK_VOXELS {
        warnings.push("Very small mask voxel count".to_string());
    }
    if mask.fraction() > QC_MAX_MASK_FRACTION {
        warnings.push("Mask covers >90% of volume".to_string());
    }
    if post_std < QC_MIN_POST_STD {
        warnings.push("Low intensity variance after normalization".to_string());
    }
    if lr_flip_suspect {
        warnings.push("Leading orientation axis is not R".to_string());
    }

    let stats = NormStats {
        mask_voxels,
        whole_volume_fallback: fallback,
        p0p5_p99p5: [lo, hi],
        mean_std: [mean, std],
        median_mad: [median, mad],
        post_std,
        lr_flip_suspect,
        warnings,
    };
    Ok((scan.with_data(out), stats))
}
