//! 外部工具集的调用能力.
//!
//! 数值上较重的步骤 (颅骨剥离, 仿射配准, 重采样, 变换求逆, 偏置场校正) 全部委托给外部可执行文件.
//! 流水线只依赖 [`ToolRunner`] trait: [`CommandRunner`] 真正启动子进程,
//! [`FakeRunner`] 用确定性的替身输出代替外部工具, 便于测试.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use once_cell::sync::OnceCell;

use crate::consts::{MASK_BINARIZE_MIN, WATERSHED_PREFLOOD};
use crate::{PrepError, PrepResult};

mod command;
mod fake;

pub use command::CommandRunner;
pub use fake::FakeRunner;

/// 外部工具种类.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tool {
    /// 分水岭颅骨剥离.
    SkullStrip,
    /// 掩膜二值化.
    Binarize,
    /// 仿射配准.
    Coregister,
    /// 体到体重采样.
    Resample,
    /// 变换求逆.
    InvertTransform,
    /// 偏置场校正.
    BiasCorrect,
}

impl Tool {
    /// 全部工具.
    pub const ALL: [Tool; 6] = [
        Tool::SkullStrip,
        Tool::Binarize,
        Tool::Coregister,
        Tool::Resample,
        Tool::InvertTransform,
        Tool::BiasCorrect,
    ];

    /// 可执行文件名.
    pub const fn binary(self) -> &'static str {
        match self {
            Tool::SkullStrip => "mri_watershed",
            Tool::Binarize => "mri_binarize",
            Tool::Coregister => "mri_coreg",
            Tool::Resample => "mri_vol2vol",
            Tool::InvertTransform => "lta_convert",
            Tool::BiasCorrect => "N4BiasFieldCorrection",
        }
    }

    /// 按流水线配置求所需工具. 关闭偏置场校正时不需要对应工具.
    pub fn required(bias_correct: bool) -> Vec<Tool> {
        Self::ALL
            .into_iter()
            .filter(|t| bias_correct || *t != Tool::BiasCorrect)
            .collect()
    }
}

/// 重采样插值方式.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interp {
    /// 三线性.
    Trilinear,
    /// 最近邻.
    Nearest,
}

impl Interp {
    /// 命令行写法.
    pub const fn name(self) -> &'static str {
        match self {
            Interp::Trilinear => "trilinear",
            Interp::Nearest => "nearest",
        }
    }
}

/// 一次外部工具调用. 每个变体都对应固定的参数形状.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolRequest {
    /// `input` 颅骨剥离后写到 `output`.
    SkullStrip {
        /// 强度体.
        input: PathBuf,
        /// 分割体.
        output: PathBuf,
    },
    /// 强度不低于 `min` 的体素置 1.
    Binarize {
        /// 分割体.
        input: PathBuf,
        /// 二值掩膜.
        output: PathBuf,
        /// 强度阈值.
        min: u32,
    },
    /// 估计 `moving -> reference` 的仿射, 写到 `transform`.
    Coregister {
        /// 移动体.
        moving: PathBuf,
        /// 参考体.
        reference: PathBuf,
        /// 变换文件 (LTA).
        transform: PathBuf,
        /// 工具可用的线程数.
        threads: usize,
    },
    /// 用 `transform` 将 `moving` 重采样到 `reference` 的网格.
    Resample {
        /// 移动体.
        moving: PathBuf,
        /// 参考体.
        reference: PathBuf,
        /// 变换文件.
        transform: PathBuf,
        /// 输出体.
        output: PathBuf,
        /// 插值方式.
        interp: Interp,
    },
    /// 对变换求逆.
    InvertTransform {
        /// 正向变换.
        input: PathBuf,
        /// 逆变换.
        output: PathBuf,
    },
    /// 偏置场校正.
    BiasCorrect {
        /// 强度体.
        input: PathBuf,
        /// 校正后的强度体.
        output: PathBuf,
    },
}

impl ToolRequest {
    /// 颅骨剥离请求.
    pub fn skull_strip(input: &Path, output: &Path) -> Self {
        Self::SkullStrip {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
        }
    }

    /// 二值化请求, 使用默认阈值.
    pub fn binarize(input: &Path, output: &Path) -> Self {
        Self::Binarize {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            min: MASK_BINARIZE_MIN,
        }
    }

    /// 所属工具.
    pub fn tool(&self) -> Tool {
        match self {
            Self::SkullStrip { .. } => Tool::SkullStrip,
            Self::Binarize { .. } => Tool::Binarize,
            Self::Coregister { .. } => Tool::Coregister,
            Self::Resample { .. } => Tool::Resample,
            Self::InvertTransform { .. } => Tool::InvertTransform,
            Self::BiasCorrect { .. } => Tool::BiasCorrect,
        }
    }

    /// 该请求产出的主文件.
    pub fn output(&self) -> &Path {
        match self {
            Self::SkullStrip { output, .. }
            | Self::Binarize { output, .. }
            | Self::Resample { output, .. }
            | Self::InvertTransform { output, .. }
            | Self::BiasCorrect { output, .. } => output,
            Self::Coregister { transform, .. } => transform,
        }
    }

    /// 命令行参数 (不含可执行文件名).
    pub fn args(&self) -> Vec<OsString> {
        let p = |p: &PathBuf| p.as_os_str().to_os_string();
        let s = |s: &str| OsString::from(s);
        match self {
            Self::SkullStrip { input, output } => vec![
                s("-h"),
                s(&WATERSHED_PREFLOOD.to_string()),
                s("-atlas"),
                p(input),
                p(output),
            ],
            Self::Binarize { input, output, min } => vec![
                s("--i"),
                p(input),
                s("--min"),
                s(&min.to_string()),
                s("--o"),
                p(output),
            ],
            Self::Coregister {
                moving,
                reference,
                transform,
                ..
            } => vec![
                s("--mov"),
                p(moving),
                s("--ref"),
                p(reference),
                s("--reg"),
                p(transform),
            ],
            Self::Resample {
                moving,
                reference,
                transform,
                output,
                interp,
            } => vec![
                s("--mov"),
                p(moving),
                s("--targ"),
                p(reference),
                s("--lta"),
                p(transform),
                s("--o"),
                p(output),
                s("--interp"),
                s(interp.name()),
            ],
            Self::InvertTransform { input, output } => vec![
                s("-invert"),
                s("-inlta"),
                p(input),
                s("-outlta"),
                p(output),
            ],
            Self::BiasCorrect { input, output } => {
                vec![s("-d"), s("3"), s("-i"), p(input), s("-o"), p(output)]
            }
        }
    }

    /// 可读的完整命令行, 用于日志与边车文件.
    pub fn command_line(&self) -> String {
        let args = self.args();
        let args = args.iter().map(|a| a.to_string_lossy()).join(" ");
        format!("{} {args}", self.tool().binary())
    }
}

/// 外部工具调用能力.
///
/// 实现必须是阻塞的: 返回时输出文件已经写好. 非零退出返回 [`PrepError::ExternalTool`].
pub trait ToolRunner: Send + Sync {
    /// 执行一次调用.
    fn run(&self, request: &ToolRequest) -> PrepResult<()>;
}

/// 外部数值库的线程数环境变量.
pub const THREAD_ENV_VARS: [&str; 5] = [
    "OMP_NUM_THREADS",
    "OPENBLAS_NUM_THREADS",
    "MKL_NUM_THREADS",
    "NUMEXPR_NUM_THREADS",
    "ITK_GLOBAL_DEFAULT_NUMBER_OF_THREADS",
];

/// 子进程线程数配置. 只在启动时读取一次宿主环境, 之后不可变.
///
/// 该配置只作用于每个被启动的子进程, 不会修改本进程的环境变量.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadEnv {
    vars: Vec<(&'static str, String)>,
}

static HOST_THREAD_ENV: OnceCell<ThreadEnv> = OnceCell::new();

impl ThreadEnv {
    /// 由宿主环境构造: 宿主已设置的变量保持原值, 否则取默认值.
    /// `OMP_NUM_THREADS` 与 ITK 默认为 `omp_threads`, 其余默认为 1.
    pub fn from_lookup<F>(omp_threads: usize, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let omp = omp_threads.max(1).to_string();
        let vars = THREAD_ENV_VARS
            .into_iter()
            .map(|name| {
                let default = match name {
                    "OMP_NUM_THREADS" | "ITK_GLOBAL_DEFAULT_NUMBER_OF_THREADS" => omp.clone(),
                    _ => "1".to_string(),
                };
                let value = lookup(name).filter(|v| !v.is_empty()).unwrap_or(default);
                (name, value)
            })
            .collect();
        Self { vars }
    }

    /// 进程级配置. 第一次调用时读取宿主环境, 之后的调用返回同一个值 (忽略参数).
    pub fn startup(omp_threads: usize) -> &'static ThreadEnv {
        HOST_THREAD_ENV.get_or_init(|| Self::from_lookup(omp_threads, |k| env::var(k).ok()))
    }

    /// 全部变量.
    pub fn vars(&self) -> &[(&'static str, String)] {
        &self.vars
    }

    /// 某个变量的值.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// 外部工具的查找路径.
///
/// 优先在工具目录下查找, 然后在 `PATH` 中查找.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolPaths {
    dir: Option<PathBuf>,
}

impl ToolPaths {
    /// 显式指定工具目录.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// 工具目录依次取 `cli`, `$FREESURFER_HOME_BIN`, `$FREESURFER_HOME/bin`.
    pub fn resolve(cli: Option<PathBuf>) -> Self {
        let nonempty = |k: &str| env::var_os(k).filter(|v| !v.is_empty());
        let dir = cli
            .or_else(|| nonempty("FREESURFER_HOME_BIN").map(PathBuf::from))
            .or_else(|| nonempty("FREESURFER_HOME").map(|h| PathBuf::from(h).join("bin")));
        Self { dir }
    }

    /// 工具目录.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// 查找可执行文件. 找不到时返回 `None`.
    pub fn locate(&self, binary: &str) -> Option<PathBuf> {
        let in_dir = self.dir.iter().map(|d| d.join(binary));
        let in_path = env::var_os("PATH")
            .map(|p| env::split_paths(&p).map(|d| d.join(binary)).collect::<Vec<_>>())
            .unwrap_or_default();
        in_dir.chain(in_path).find(|p| p.is_file())
    }

    /// 确保 `tools` 全部可以找到, 否则返回第一个缺失的工具.
    pub fn ensure_available(&self, tools: &[Tool]) -> PrepResult<()> {
        for t in tools {
            if self.locate(t.binary()).is_none() {
                return Err(PrepError::MissingTool(t.binary().to_string()));
            }
        }
        Ok(())
    }
}
