//! 分片规划与写出.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use super::record::SliceRecord;
use super::slices::extract;
use crate::config::{ShardSpec, SliceSpec};
use crate::dataset::derivatives::DerivedVolume;
use crate::{BrainMask, MrScan, PrepResult};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 一个分片的计划: 编号与成员 (输入列表中的下标).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardPlan {
    /// 分片编号.
    pub index: usize,
    /// 成员下标, 保持发现次序.
    pub members: Vec<usize>,
}

/// 平铺模式: 按发现次序每 `size` 个一组.
pub fn plan_flat(n: usize, size: usize) -> Vec<Vec<usize>> {
    assert!(size > 0);
    (0..n)
        .collect::<Vec<_>>()
        .chunks(size)
        .map(<[usize]>::to_vec)
        .collect()
}

/// 按 subject 分组模式.
///
/// subject 按字典序处理. 加入某个 subject 前, 若缓冲区非空且加入后会超出容量, 先将缓冲区
/// 写成一个分片; 之后若该 subject 单独就超出容量, 则它单独成为一个超限分片, 否则并入缓冲区.
pub fn plan_grouped(subjects: &[&str], size: usize) -> Vec<Vec<usize>> {
    assert!(size > 0);
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, s) in subjects.iter().enumerate() {
        groups.entry(*s).or_default().push(i);
    }

    let mut ans = vec![];
    let mut current: Vec<usize> = vec![];
    for (_, members) in groups {
        if !current.is_empty() && current.len() + members.len() > size {
            ans.push(std::mem::take(&mut current));
        }
        if members.len() > size && current.is_empty() {
            ans.push(members);
        } else {
            current.extend(members);
        }
    }
    if !current.is_empty() {
        ans.push(current);
    }
    ans
}

/// 按 `spec` 规划全部分片. 纯函数, 不读取任何文件.
pub fn plan_shards(volumes: &[DerivedVolume], spec: &ShardSpec) -> Vec<ShardPlan> {
    let groups = if spec.group_by_subject {
        let subjects: Vec<&str> = volumes.iter().map(|v| v.subject.as_str()).collect();
        plan_grouped(&subjects, spec.shard_size)
    } else {
        plan_flat(volumes.len(), spec.shard_size)
    };
    groups
        .into_iter()
        .enumerate()
        .map(|(i, members)| ShardPlan {
            index: spec.start_index + i,
            members,
        })
        .collect()
}

/// 单个分片的写出结果.
#[derive(Clone, Debug, Default)]
pub struct ShardOutcome {
    /// 分片文件.
    pub path: PathBuf,
    /// 写入的记录数.
    pub written: usize,
    /// 因覆盖率不足而跳过的样本.
    pub skipped: Vec<String>,
    /// 失败的样本及错误信息.
    pub failed: Vec<(String, String)>,
}

/// 一次打包的汇总.
#[derive(Clone, Debug, Default)]
pub struct PackSummary {
    /// 输入样本数.
    pub samples: usize,
    /// 计划的分片数.
    pub planned: usize,
    /// 各分片的写出结果, 按编号排列. 演练模式下为空.
    pub shards: Vec<ShardOutcome>,
}

impl PackSummary {
    /// 写入的记录总数.
    pub fn written(&self) -> usize {
        self.shards.iter().map(|s| s.written).sum()
    }

    /// 跳过的样本总数.
    pub fn skipped(&self) -> usize {
        self.shards.iter().map(|s| s.skipped.len()).sum()
    }

    /// 失败的样本总数.
    pub fn failed(&self) -> usize {
        self.shards.iter().map(|s| s.failed.len()).sum()
    }
}

/// 读取并提取一个样本.
fn load_record(volume: &DerivedVolume, slices: &SliceSpec) -> PrepResult<SliceRecord> {
    let train = MrScan::open(&volume.train)?;
    let mask = BrainMask::open(&volume.mask)?;
    let sample = extract(&train, &mask, slices, &volume.train)?;
    SliceRecord::new(volume, &sample)
}

/// 依次写出 `plan` 的全部成员. 样本级错误只记录, 不中断分片.
fn write_shard(
    volumes: &[DerivedVolume],
    plan: &ShardPlan,
    out_dir: &Path,
    slices: &SliceSpec,
    spec: &ShardSpec,
) -> PrepResult<ShardOutcome> {
    let path = out_dir.join(spec.shard_name(plan.index));
    let mut w = BufWriter::new(File::create(&path)?);
    let mut outcome = ShardOutcome {
        path,
        ..ShardOutcome::default()
    };
    for &i in plan.members.iter() {
        let volume = &volumes[i];
        let key = volume.key();
        match load_record(volume, slices) {
            Ok(record) => {
                bincode::serialize_into(&mut w, &record)?;
                outcome.written += 1;
            }
            Err(e) if e.is_soft() => {
                info!("Skip {key}: {e}");
                outcome.skipped.push(key);
            }
            Err(e) => {
                warn!("Sample {key} failed: {e}");
                outcome.failed.push((key, e.to_string()));
            }
        }
    }
    w.flush()?;
    info!(
        "Wrote {} ({} records)",
        outcome.path.display(),
        outcome.written
    );
    Ok(outcome)
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        fn write_all(
            volumes: &[DerivedVolume],
            plans: &[ShardPlan],
            out_dir: &Path,
            slices: &SliceSpec,
            spec: &ShardSpec,
        ) -> PrepResult<Vec<ShardOutcome>> {
            plans
                .par_iter()
                .map(|p| write_shard(volumes, p, out_dir, slices, spec))
                .collect()
        }
    } else {
        fn write_all(
            volumes: &[DerivedVolume],
            plans: &[ShardPlan],
            out_dir: &Path,
            slices: &SliceSpec,
            spec: &ShardSpec,
        ) -> PrepResult<Vec<ShardOutcome>> {
            plans
                .iter()
                .map(|p| write_shard(volumes, p, out_dir, slices, spec))
                .collect()
        }
    }
}

/// 规划并写出分片到 `out_dir`.
///
/// 分片之间并行写出, 分片内部的记录次序与计划一致. 演练模式下只报告样本数与分片数.
/// 分片文件本身的 I/O 错误会中止打包.
pub fn pack(
    volumes: &[DerivedVolume],
    out_dir: &Path,
    slices: &SliceSpec,
    spec: &ShardSpec,
) -> PrepResult<PackSummary> {
    slices.validate()?;
    spec.validate()?;
    let plans = plan_shards(volumes, spec);
    let mut summary = PackSummary {
        samples: volumes.len(),
        planned: plans.len(),
        shards: vec![],
    };
    if spec.dry_run {
        info!(
            "[dry-run] {} samples -> {} shards of at most {}",
            summary.samples, summary.planned, spec.shard_size
        );
        return Ok(summary);
    }
    fs::create_dir_all(out_dir)?;
    summary.shards = write_all(volumes, &plans, out_dir, slices, spec)?;
    Ok(summary)
}
