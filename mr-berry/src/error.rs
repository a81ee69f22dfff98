//! 运行时错误.

use std::path::PathBuf;
use thiserror::Error;

/// 流水线错误.
///
/// 前两类 (`MissingInput`, `ExternalTool`) 对所在 session 是致命的;
/// `ShapeMismatch` 出现在切片阶段时只影响单个样本; `NoCoverage` 是软错误,
/// 样本会被跳过但不计为失败.
#[derive(Error, Debug)]
pub enum PrepError {
    /// session 目录或所请求的模态不存在.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// 外部工具返回非零状态 (或无法启动).
    #[error("external tool `{tool}` failed: {status}")]
    ExternalTool {
        /// 工具名.
        tool: String,
        /// 退出状态描述.
        status: String,
    },

    /// 训练体与掩膜网格不一致.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// 期望形状 `(z, h, w)`.
        expected: crate::Idx3d,
        /// 实际形状 `(z, h, w)`.
        actual: crate::Idx3d,
    },

    /// 没有任何深度索引满足覆盖率阈值.
    #[error("no depth index meets coverage thresholds in {0}")]
    NoCoverage(PathBuf),

    /// 所需外部工具不在搜索路径上.
    #[error("required tool `{0}` not found (tools dir or PATH)")]
    MissingTool(String),

    /// 仿射奇异, 无法确定体数据方向.
    #[error("cannot determine orientation of {0}")]
    Orientation(String),

    /// 配置不合法.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// session 内部 panic, 已在 session 边界被捕获.
    #[error("session panicked: {0}")]
    Panicked(String),

    /// 底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// nifti 读写错误.
    #[error("nifti: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// JSON 边车文件错误.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// 分片记录编解码错误.
    #[error("record: {0}")]
    Bincode(#[from] bincode::Error),

    /// npy 负载读取错误.
    #[error("npy read: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    /// npy 负载写入错误.
    #[error("npy write: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    /// QC 图像写出错误.
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

impl PrepError {
    /// 是否为软错误 (只需记录, 不计为失败).
    #[inline]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::NoCoverage(_))
    }

    /// 构造外部工具错误.
    pub(crate) fn tool(tool: impl Into<String>, status: impl ToString) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            status: status.to_string(),
        }
    }
}

/// 流水线运行时结果.
pub type PrepResult<T> = Result<T, PrepError>;

#[cfg(test)]
mod tests {
    use super::PrepError;
    use std::path::PathBuf;

    #[test]
    fn test_only_no_coverage_is_soft() {
        assert!(PrepError::NoCoverage(PathBuf::from("a.nii.gz")).is_soft());
        assert!(!PrepError::MissingInput("x".into()).is_soft());
        assert!(!PrepError::tool("mri_coreg", "exit status: 1").is_soft());
    }

    #[test]
    fn test_display_carries_identity() {
        let e = PrepError::tool("mri_vol2vol", "exit status: 2");
        assert_eq!(e.to_string(), "external tool `mri_vol2vol` failed: exit status: 2");

        let e = PrepError::ShapeMismatch {
            expected: (3, 4, 5),
            actual: (3, 4, 6),
        };
        assert!(e.to_string().contains("(3, 4, 6)"));
    }
}
