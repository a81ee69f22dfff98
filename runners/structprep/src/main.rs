//! 结构 MRI 会话标准化.

use clap::Parser;
use std::path::PathBuf;

mod result;
mod runner;

/// 将 `<input>/<subject>/<session>/anat` 中的结构像标准化为训练体.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// 原始数据根目录. 默认 `$STRUCTPREP_INPUT_DIR` 或 `$HOME/dataset/raw`.
    #[arg(long)]
    pub input_dir: Option<PathBuf>,

    /// 输出根目录. 默认 `$STRUCTPREP_OUTPUT_DIR` 或 `$HOME/dataset/derivatives`.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// JSON 配置文件. 命令行参数会覆盖其中的目录, 任务与线程设置.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 要处理的 subject, 逗号分隔. 默认为输入目录下全部 `sub-*`.
    #[arg(long, value_delimiter = ',')]
    pub subjects: Vec<String>,

    /// 对所有 subject 统一使用的 session, 逗号分隔. 默认逐个发现.
    #[arg(long, value_delimiter = ',')]
    pub sessions: Vec<String>,

    /// 模态, 逗号分隔.
    #[arg(long, value_delimiter = ',', default_value = "T1w,T2w,FLAIR")]
    pub modalities: Vec<String>,

    /// 跳过偏置场校正.
    #[arg(long)]
    pub no_bias: bool,

    /// 跳过强度归一化.
    #[arg(long)]
    pub no_normalize: bool,

    /// 各向同性体素边长 (毫米).
    #[arg(long, default_value_t = 1.0)]
    pub iso: f64,

    /// 规范的切片大小 `HxW`.
    #[arg(long, default_value = "256x256")]
    pub shape: String,

    /// 规范深度. 只在 `--no-keep-depth` 时生效.
    #[arg(long, default_value_t = 1)]
    pub depth: usize,

    /// 将深度裁剪/填充到 `--depth`.
    #[arg(long)]
    pub no_keep_depth: bool,

    /// 掩膜膨胀力度: liberal, medium, conservative, off.
    #[arg(long, default_value = "liberal")]
    pub mask_aggressiveness: String,

    /// 外部工具目录. 默认 `$FREESURFER_HOME_BIN` 或 `$FREESURFER_HOME/bin`.
    #[arg(long)]
    pub fs_bin: Option<PathBuf>,

    /// 每个任务的数值线程数.
    #[arg(long, default_value_t = 6)]
    pub omp: usize,

    /// 并行任务数. 为 1 时串行.
    #[arg(long, default_value_t = 4)]
    pub n_jobs: usize,

    /// 只推导路径, 不调用外部工具, 不写文件.
    #[arg(long)]
    pub dry_run: bool,

    /// 日志详细程度, 可重复.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    utils::init_logger(args.verbose);
    let summary = runner::run(&args)?;
    result::report(&summary);
    Ok(())
}
