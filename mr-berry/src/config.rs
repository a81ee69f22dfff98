//! 流水线配置.
//!
//! 所有配置都是不可变的值, 在调度前构造一次, 以 `Arc` 的形式分发给各个 worker.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_MODALITIES;
use crate::{Idx2d, Modality, PrepError, PrepResult};

/// 掩膜膨胀力度.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskAggressiveness {
    /// 半径 3.
    #[default]
    Liberal,
    /// 半径 2.
    Medium,
    /// 半径 1.
    Conservative,
    /// 不膨胀.
    Off,
}

impl MaskAggressiveness {
    /// 膨胀所用球结构元的半径 (体素).
    #[inline]
    pub const fn radius(self) -> usize {
        match self {
            Self::Liberal => 3,
            Self::Medium => 2,
            Self::Conservative => 1,
            Self::Off => 0,
        }
    }

    /// 小写名称.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Liberal => "liberal",
            Self::Medium => "medium",
            Self::Conservative => "conservative",
            Self::Off => "off",
        }
    }
}

impl FromStr for MaskAggressiveness {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "liberal" => Ok(Self::Liberal),
            "medium" => Ok(Self::Medium),
            "conservative" => Ok(Self::Conservative),
            "off" | "none" => Ok(Self::Off),
            other => Err(PrepError::InvalidConfig(format!(
                "unknown mask aggressiveness `{other}`"
            ))),
        }
    }
}

/// 单个 session 标准化流水线的配置.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcConfig {
    /// 原始数据根目录, 其下为 `<subject>/<session>/anat/`.
    pub input_dir: PathBuf,
    /// 输出根目录.
    pub output_dir: PathBuf,
    /// 要处理的模态, 按此顺序处理.
    pub modalities: Vec<Modality>,
    /// 是否做偏置场校正.
    pub bias_correct: bool,
    /// 是否做鲁棒强度归一化.
    pub normalize: bool,
    /// 各向同性体素边长 (毫米).
    pub iso_mm: f64,
    /// 规范形状 `(D, H, W)`. `D <= 1` 视为占位, 深度不裁剪.
    pub out_shape: [usize; 3],
    /// 是否保留原深度.
    pub keep_depth: bool,
    /// 掩膜膨胀力度.
    pub mask_aggressiveness: MaskAggressiveness,
    /// 外部工具目录. `None` 时只在 `PATH` 中查找.
    pub tools_dir: Option<PathBuf>,
    /// 每个任务中外部工具可用的数值线程数.
    pub omp_threads: usize,
    /// 并行 worker 个数. 为 1 时串行执行.
    pub jobs: usize,
    /// 只计算路径, 不调用外部工具也不写文件.
    pub dry_run: bool,
}

impl Default for ProcConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            modalities: DEFAULT_MODALITIES.iter().map(|m| Modality::from(*m)).collect(),
            bias_correct: true,
            normalize: true,
            iso_mm: 1.0,
            out_shape: [1, 256, 256],
            keep_depth: true,
            mask_aggressiveness: MaskAggressiveness::Liberal,
            tools_dir: None,
            omp_threads: 6,
            jobs: 4,
            dry_run: false,
        }
    }
}

impl ProcConfig {
    /// 检查配置是否合理.
    pub fn validate(&self) -> PrepResult<()> {
        let bad = |msg: &str| Err(PrepError::InvalidConfig(msg.to_string()));
        if self.modalities.is_empty() {
            return bad("at least one modality is required");
        }
        if !(self.iso_mm.is_finite() && self.iso_mm > 0.0) {
            return bad("iso_mm must be a positive number");
        }
        if self.out_shape[1] == 0 || self.out_shape[2] == 0 {
            return bad("out_shape H and W must be >= 1");
        }
        if self.omp_threads == 0 {
            return bad("omp_threads must be >= 1");
        }
        if self.jobs == 0 {
            return bad("jobs must be >= 1");
        }
        Ok(())
    }

    /// 各向同性间距在文件名中的写法, 如 `1`, `0.8`.
    pub fn iso_tag(&self) -> String {
        format!("{}", self.iso_mm)
    }

    /// 深度是否保持不变.
    #[inline]
    pub fn preserves_depth(&self) -> bool {
        self.keep_depth || self.out_shape[0] <= 1
    }

    /// 以 JSON 格式保存.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> PrepResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// 读取 JSON 配置并检查.
    pub fn load_json<P: AsRef<Path>>(path: P) -> PrepResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: ProcConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}

/// 切片提取配置.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SliceSpec {
    /// 每个体数据提取的切片数.
    pub count: usize,
    /// 起始端覆盖率阈值.
    pub start_thr: f32,
    /// 结束端覆盖率阈值.
    pub end_thr: f32,
    /// 输出切片大小 `(H, W)`. `None` 表示保持原大小.
    pub target_size: Option<Idx2d>,
}

impl Default for SliceSpec {
    fn default() -> Self {
        Self {
            count: 16,
            start_thr: 0.08,
            end_thr: 0.08,
            target_size: None,
        }
    }
}

impl SliceSpec {
    /// 截断到 `[0, 1]` 的两端阈值. NaN 视为 0.
    pub fn thresholds(&self) -> (f32, f32) {
        let clamp = |t: f32| if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        (clamp(self.start_thr), clamp(self.end_thr))
    }

    /// 检查配置是否合理.
    pub fn validate(&self) -> PrepResult<()> {
        if self.count == 0 {
            return Err(PrepError::InvalidConfig("slice count must be >= 1".into()));
        }
        if matches!(self.target_size, Some((h, w)) if h == 0 || w == 0) {
            return Err(PrepError::InvalidConfig("slice size must be >= 1x1".into()));
        }
        Ok(())
    }
}

/// 分片打包配置.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardSpec {
    /// 每个分片的样本容量.
    pub shard_size: usize,
    /// 分片文件名前缀.
    pub prefix: String,
    /// 第一个分片的编号.
    pub start_index: usize,
    /// 是否尽量让同一 subject 的样本位于同一分片.
    pub group_by_subject: bool,
    /// 只报告样本与分片个数, 不写文件.
    pub dry_run: bool,
}

impl Default for ShardSpec {
    fn default() -> Self {
        Self {
            shard_size: 100,
            prefix: "ADNI".to_string(),
            start_index: 1,
            group_by_subject: false,
            dry_run: false,
        }
    }
}

impl ShardSpec {
    /// 检查配置是否合理.
    pub fn validate(&self) -> PrepResult<()> {
        if self.shard_size == 0 {
            return Err(PrepError::InvalidConfig("shard size must be >= 1".into()));
        }
        if self.prefix.is_empty() || self.prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(PrepError::InvalidConfig(format!(
                "invalid shard prefix `{}`",
                self.prefix
            )));
        }
        Ok(())
    }

    /// 第 `index` 个分片的文件名.
    pub fn shard_name(&self, index: usize) -> String {
        format!("{}_{index:03}.shard", self.prefix)
    }
}

/// 解析 `HxW` 形式的尺寸, 如 `256x256`.
pub fn parse_hw(s: &str) -> PrepResult<Idx2d> {
    let parts: Vec<&str> = s.trim().split(['x', 'X']).collect();
    let parse = |p: &str| p.trim().parse::<usize>().ok().filter(|v| *v > 0);
    match parts.as_slice() {
        [h, w] => match (parse(h), parse(w)) {
            (Some(h), Some(w)) => Ok((h, w)),
            _ => Err(PrepError::InvalidConfig(format!("bad size `{s}`"))),
        },
        _ => Err(PrepError::InvalidConfig(format!(
            "size must be HxW, e.g. 256x256, got `{s}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggressiveness_radius() {
        assert_eq!(MaskAggressiveness::default().radius(), 3);
        assert_eq!("Medium".parse::<MaskAggressiveness>().unwrap().radius(), 2);
        assert_eq!(MaskAggressiveness::Conservative.radius(), 1);
        assert_eq!(MaskAggressiveness::Off.radius(), 0);
        assert!("wild".parse::<MaskAggressiveness>().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let cfg = ProcConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.modalities, vec![Modality::T1w, Modality::T2w, Modality::Flair]);
        assert!(cfg.preserves_depth());
        assert_eq!(cfg.iso_tag(), "1");

        let cfg = ProcConfig {
            iso_mm: 0.0,
            ..ProcConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PrepError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("structprep_config.json");
        let cfg = ProcConfig {
            iso_mm: 0.8,
            out_shape: [160, 224, 224],
            keep_depth: false,
            mask_aggressiveness: MaskAggressiveness::Medium,
            ..ProcConfig::default()
        };
        cfg.save_json(&p).unwrap();
        assert_eq!(ProcConfig::load_json(&p).unwrap(), cfg);
        assert_eq!(cfg.iso_tag(), "0.8");

        // 缺省字段取默认值.
        std::fs::write(&p, r#"{ "jobs": 1, "mask_aggressiveness": "conservative" }"#).unwrap();
        let partial = ProcConfig::load_json(&p).unwrap();
        assert_eq!(partial.jobs, 1);
        assert_eq!(partial.mask_aggressiveness, MaskAggressiveness::Conservative);
        assert_eq!(partial.out_shape, [1, 256, 256]);
    }

    #[test]
    fn test_slice_spec_thresholds() {
        let spec = SliceSpec {
            start_thr: -0.5,
            end_thr: 1.5,
            ..SliceSpec::default()
        };
        assert_eq!(spec.thresholds(), (0.0, 1.0));
        assert!(SliceSpec { count: 0, ..spec }.validate().is_err());
    }

    #[test]
    fn test_parse_hw_and_shard_name() {
        assert_eq!(parse_hw("256x256").unwrap(), (256, 256));
        assert_eq!(parse_hw(" 224X192 ").unwrap(), (224, 192));
        assert!(parse_hw("256").is_err());
        assert!(parse_hw("0x3").is_err());
        assert_eq!(ShardSpec::default().shard_name(7), "ADNI_007.shard");
        assert!(ShardSpec {
            shard_size: 0,
            ..ShardSpec::default()
        }
        .validate()
        .is_err());
    }
}
