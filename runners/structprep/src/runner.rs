//! 程序运行函数.

use std::sync::Arc;

use anyhow::{bail, Context};
use log::info;
use mr_berry::config::{parse_hw, MaskAggressiveness, ProcConfig};
use mr_berry::dataset::bids::find_subjects;
use mr_berry::scheduler::{self, RunSummary};
use mr_berry::tools::{CommandRunner, ThreadEnv, Tool, ToolPaths, ToolRunner};
use mr_berry::Modality;
use utils::loader;

use crate::Args;

/// 有效配置的文件名, 写在输出根目录下.
const PROVENANCE: &str = "structprep_config.json";

/// 由命令行参数 (及可选的配置文件) 构造配置.
fn build_config(args: &Args) -> anyhow::Result<ProcConfig> {
    let mut cfg = match &args.config {
        Some(p) => ProcConfig::load_json(p).with_context(|| format!("loading {}", p.display()))?,
        None => {
            let (h, w) = parse_hw(&args.shape)?;
            ProcConfig {
                modalities: args.modalities.iter().map(|m| Modality::from(m.as_str())).collect(),
                bias_correct: !args.no_bias,
                normalize: !args.no_normalize,
                iso_mm: args.iso,
                out_shape: [args.depth, h, w],
                keep_depth: !args.no_keep_depth,
                mask_aggressiveness: args.mask_aggressiveness.parse::<MaskAggressiveness>()?,
                ..ProcConfig::default()
            }
        }
    };
    if let Some(d) = args.input_dir.clone().or_else(loader::input_dir_from_env_or_home) {
        cfg.input_dir = d;
    }
    if let Some(d) = args.output_dir.clone().or_else(loader::output_dir_from_env_or_home) {
        cfg.output_dir = d;
    }
    let cli_tools = args.fs_bin.clone().or_else(|| cfg.tools_dir.take());
    cfg.tools_dir = ToolPaths::resolve(cli_tools).dir().map(Into::into);
    cfg.omp_threads = args.omp;
    cfg.jobs = args.n_jobs;
    cfg.dry_run = args.dry_run;
    cfg.validate()?;
    Ok(cfg)
}

/// 实际运行.
pub fn run(args: &Args) -> anyhow::Result<RunSummary> {
    let cfg = build_config(args)?;
    if !cfg.input_dir.is_dir() {
        bail!("input directory {} does not exist", cfg.input_dir.display());
    }

    let paths = ToolPaths::new(cfg.tools_dir.clone());
    if !cfg.dry_run {
        paths.ensure_available(&Tool::required(cfg.bias_correct))?;
        cfg.save_json(cfg.output_dir.join(PROVENANCE))?;
    }

    let subjects = if args.subjects.is_empty() {
        find_subjects(&cfg.input_dir)?
    } else {
        args.subjects.clone()
    };
    let sessions = (!args.sessions.is_empty()).then_some(args.sessions.as_slice());
    let items = scheduler::enumerate_work(&cfg.input_dir, &subjects, sessions);
    info!(
        "{} subjects, {} sessions, {} cores",
        subjects.len(),
        items.len(),
        utils::cpus()
    );

    let env = ThreadEnv::startup(cfg.omp_threads).clone();
    let runner: Arc<dyn ToolRunner> = Arc::new(CommandRunner::new(paths, env));
    Ok(scheduler::run(Arc::new(cfg), runner, items))
}
