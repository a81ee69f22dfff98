//! 每个处理步骤的 JSON 边车文件.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{Idx3d, PrepResult};

/// 以缩进 JSON 写出 `record`, 必要时创建父目录.
pub fn write_sidecar<S: Serialize + ?Sized>(path: &Path, record: &S) -> PrepResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(record)?)?;
    Ok(())
}

/// 重定向步骤.
#[derive(Debug, Serialize)]
pub struct ReorientRecord {
    /// 原始输入.
    pub input_file: PathBuf,
    /// 重定向结果.
    pub ras: PathBuf,
    /// 原始形状 `(z, H, W)`.
    pub original_shape: Idx3d,
    /// 原始方向编码.
    pub original_axcodes: String,
}

/// 配准步骤. 对参考体本身只记录恒等占位.
#[derive(Debug, Serialize)]
pub struct RegistrationRecord {
    /// 移动体.
    pub moving: PathBuf,
    /// 参考体.
    pub target: PathBuf,
    /// 配准后的体数据.
    pub output: PathBuf,
    /// 正向变换.
    pub forward_transform: PathBuf,
    /// 逆变换. 参考体没有逆变换.
    pub inverse_transform: Option<PathBuf>,
    /// 是否为参考体自身.
    pub is_target: bool,
    /// 依次执行的命令行.
    pub commands: Vec<String>,
}

/// 偏置场校正步骤.
#[derive(Debug, Serialize)]
pub struct BiasRecord {
    /// 输入.
    pub input: PathBuf,
    /// 输出.
    pub output: PathBuf,
    /// 耗时 (秒).
    pub elapsed_sec: f64,
    /// 形状 `(z, H, W)`.
    pub image_size: Idx3d,
    /// 间距 `[z, H, W]`.
    pub image_spacing: [f64; 3],
}

/// 掩膜步骤.
#[derive(Debug, Serialize)]
pub struct MaskRecord {
    /// 计算掩膜所用的参考体.
    pub reference: PathBuf,
    /// 掩膜.
    pub output: PathBuf,
    /// 膨胀力度.
    pub aggressiveness: String,
    /// 膨胀半径.
    pub radius: usize,
    /// 膨胀前体素个数.
    pub voxels_before: usize,
    /// 膨胀后体素个数.
    pub voxels_after: usize,
}

/// 归一化步骤. 统计量平铺在同一层.
#[derive(Debug, Serialize)]
pub struct NormRecord<'a> {
    /// 输入.
    pub input: &'a Path,
    /// 输出.
    pub output: &'a Path,
    /// 统计量与 QC 信号.
    #[serde(flatten)]
    pub stats: &'a super::intensity::NormStats,
}

/// 各向同性重采样与裁剪/填充步骤.
#[derive(Debug, Serialize)]
pub struct GeometryRecord<'a> {
    /// 输入.
    pub input: &'a Path,
    /// 输出.
    pub output: &'a Path,
    /// 处理前形状.
    pub shape_before: Idx3d,
    /// 处理后形状.
    pub shape_after: Idx3d,
    /// 各向同性间距 (毫米).
    pub iso_mm: f64,
    /// 是否保留深度.
    pub keep_depth: bool,
}
