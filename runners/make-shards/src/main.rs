//! 将训练体的切片打包为定长分片.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use log::info;
use mr_berry::config::{parse_hw, ShardSpec, SliceSpec};
use mr_berry::dataset::derivatives::{discover, DiscoverFilter};
use mr_berry::shard::{self, PackSummary};
use mr_berry::Modality;
use utils::loader;

/// 从 `<derivatives>/<subject>/<session>/anat/final` 提取切片并写出分片.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// 流水线输出根目录. 默认 `$STRUCTPREP_OUTPUT_DIR` 或 `$HOME/dataset/derivatives`.
    #[arg(long)]
    deriv_dir: Option<PathBuf>,

    /// 分片输出目录.
    #[arg(long)]
    out_dir: PathBuf,

    /// 只保留这些 subject, 逗号分隔.
    #[arg(long, value_delimiter = ',')]
    subjects: Vec<String>,

    /// 只保留这些 session, 逗号分隔.
    #[arg(long, value_delimiter = ',')]
    sessions: Vec<String>,

    /// 只保留这些模态, 逗号分隔.
    #[arg(long, value_delimiter = ',', default_value = "T1w,FLAIR")]
    modalities: Vec<String>,

    /// 每个训练体提取的切片数.
    #[arg(long, default_value_t = 16)]
    slices: usize,

    /// 起始端覆盖率阈值.
    #[arg(long, default_value_t = 0.08)]
    start_thr: f32,

    /// 结束端覆盖率阈值.
    #[arg(long, default_value_t = 0.08)]
    end_thr: f32,

    /// 输出切片大小 `HxW`. 默认保持原大小.
    #[arg(long)]
    size: Option<String>,

    /// 每个分片的样本数.
    #[arg(long, default_value_t = 100)]
    shard_size: usize,

    /// 分片文件名前缀.
    #[arg(long, default_value = "ADNI")]
    prefix: String,

    /// 第一个分片的编号.
    #[arg(long, default_value_t = 1)]
    start_index: usize,

    /// 尽量让同一 subject 的样本位于同一分片.
    #[arg(long)]
    group_by_subject: bool,

    /// 只报告样本数与分片数.
    #[arg(long)]
    dry_run: bool,

    /// 日志详细程度, 可重复.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    (!v.is_empty()).then_some(v)
}

fn report(summary: &PackSummary, spec: &ShardSpec) {
    utils::sep();
    if spec.dry_run {
        println!(
            "[dry-run] {} samples -> {} shard(s) of at most {}",
            summary.samples, summary.planned, spec.shard_size
        );
    } else {
        println!(
            "{} shard(s): {} written, {} skipped (no coverage), {} failed",
            summary.shards.len(),
            summary.written(),
            summary.skipped(),
            summary.failed()
        );
        for s in summary.shards.iter() {
            for (key, msg) in s.failed.iter() {
                println!("  ✗ {key}: {msg}");
            }
        }
    }
    utils::sep();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    utils::init_logger(args.verbose);

    let Some(deriv) = args.deriv_dir.clone().or_else(loader::output_dir_from_env_or_home) else {
        bail!("cannot determine the derivatives directory");
    };
    let filter = DiscoverFilter {
        subjects: non_empty(args.subjects),
        sessions: non_empty(args.sessions),
        modalities: non_empty(args.modalities)
            .map(|v| v.iter().map(|m| Modality::from(m.as_str())).collect()),
    };
    let slices = SliceSpec {
        count: args.slices,
        start_thr: args.start_thr,
        end_thr: args.end_thr,
        target_size: args.size.as_deref().map(parse_hw).transpose()?,
    };
    let spec = ShardSpec {
        shard_size: args.shard_size,
        prefix: args.prefix,
        start_index: args.start_index,
        group_by_subject: args.group_by_subject,
        dry_run: args.dry_run,
    };

    let volumes = discover(&deriv, &filter)
        .with_context(|| format!("discovering {}", deriv.display()))?;
    info!("Found {} training volumes under {}", volumes.len(), deriv.display());
    let summary = shard::pack(&volumes, &args.out_dir, &slices, &spec)?;
    report(&summary, &spec);
    Ok(())
}
