//! 会话级调度.
//!
//! 每个 `(subject, session)` 是一个独立任务, 读写互不相交的路径. 任务在有界工作池中执行,
//! 结果按完成次序汇总. 单个任务的错误与 panic 都在任务边界被捕获, 不影响其他任务.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{mpsc, Arc};

use log::{info, warn};
use threadpool::ThreadPool;

use crate::config::ProcConfig;
use crate::dataset::bids::find_sessions;
use crate::prep::{process_session, SessionReport};
use crate::tools::ToolRunner;
use crate::{PrepError, PrepResult};

/// 一个待处理的会话.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkItem {
    /// subject 标识.
    pub subject: String,
    /// session 标识.
    pub session: String,
}

impl WorkItem {
    /// 创建任务.
    pub fn new(subject: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            session: session.into(),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.subject, self.session)
    }
}

/// 枚举任务: `subjects` 与会话的笛卡尔积.
///
/// 显式给出 `sessions` 时对所有 subject 统一使用; 否则逐个 subject 发现其 `ses-*` 目录.
/// 目录不存在的 subject 被跳过并告警.
pub fn enumerate_work(
    input_dir: &Path,
    subjects: &[String],
    sessions: Option<&[String]>,
) -> Vec<WorkItem> {
    let mut ans = vec![];
    for subject in subjects {
        let found;
        let list = match sessions {
            Some(s) => s,
            None => match find_sessions(&input_dir.join(subject)) {
                Ok(s) => {
                    found = s;
                    found.as_slice()
                }
                Err(e) => {
                    warn!("Skip {subject}: {e}");
                    continue;
                }
            },
        };
        ans.extend(list.iter().map(|ses| WorkItem::new(subject.as_str(), ses.as_str())));
    }
    ans
}

/// 一次运行的汇总.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// 成功的会话, 按完成次序.
    pub completed: Vec<SessionReport>,
    /// 失败的会话及其错误信息, 按完成次序.
    pub failed: Vec<(WorkItem, String)>,
}

impl RunSummary {
    /// 是否全部成功.
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }

    /// 任务总数.
    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    fn record(&mut self, item: WorkItem, result: PrepResult<SessionReport>) {
        match result {
            Ok(report) => {
                info!("✓ Completed {item}");
                self.completed.push(report);
            }
            Err(e) => {
                warn!("✗ Failed {item}: {e}");
                self.failed.push((item, e.to_string()));
            }
        }
    }
}

/// 从 panic 负载中取出消息.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 执行单个会话, panic 转换为 [`PrepError::Panicked`].
fn run_isolated(cfg: &ProcConfig, runner: &dyn ToolRunner, item: &WorkItem) -> PrepResult<SessionReport> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        process_session(cfg, runner, &item.subject, &item.session)
    }))
    .unwrap_or_else(|payload| Err(PrepError::Panicked(panic_message(payload))))
}

/// `jobs * omp_threads` 是否超出 `cpus`.
#[inline]
pub fn oversubscribed(jobs: usize, omp_threads: usize, cpus: usize) -> bool {
    jobs.saturating_mul(omp_threads) > cpus
}

/// 执行全部任务.
///
/// `cfg.jobs == 1` 时按枚举次序串行执行; 否则使用 `cfg.jobs` 个 worker, 结果按完成次序汇总.
/// 线程预算 (`jobs * omp_threads` 不超过可用核心数) 由调用方保证, 这里超出时只告警.
pub fn run(cfg: Arc<ProcConfig>, runner: Arc<dyn ToolRunner>, items: Vec<WorkItem>) -> RunSummary {
    let cpus = std::thread::available_parallelism().map_or(1, usize::from);
    if oversubscribed(cfg.jobs, cfg.omp_threads, cpus) {
        warn!(
            "{} jobs x {} threads exceeds {cpus} available cores",
            cfg.jobs, cfg.omp_threads
        );
    }
    info!("Scheduling {} sessions on {} worker(s)", items.len(), cfg.jobs);

    let mut summary = RunSummary::default();
    if cfg.jobs <= 1 {
        for item in items {
            let result = run_isolated(&cfg, runner.as_ref(), &item);
            summary.record(item, result);
        }
        return summary;
    }

    let pool = ThreadPool::with_name("structprep".into(), cfg.jobs);
    let (tx, rx) = mpsc::channel();
    for item in items {
        let (cfg, runner, tx) = (Arc::clone(&cfg), Arc::clone(&runner), tx.clone());
        pool.execute(move || {
            let result = run_isolated(&cfg, runner.as_ref(), &item);
            // 接收端只会在所有任务结束后才关闭.
            let _ = tx.send((item, result));
        });
    }
    drop(tx);
    for (item, result) in rx.iter() {
        summary.record(item, result);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FakeRunner, Tool};
    use crate::MrScan;
    use ndarray::Array3;
    use std::fs;

    /// 在 `raw/<sub>/<ses>/anat` 下写出一个 T1w.
    fn write_session(raw: &Path, sub: &str, ses: &str) {
        let data = Array3::from_shape_fn((8, 12, 12), |(z, h, w)| {
            if (2..6).contains(&z) && (3..9).contains(&h) && (3..9).contains(&w) {
                100.0 + (z + h + w) as f32
            } else {
                0.0
            }
        });
        MrScan::fake(data, [1.0; 3])
            .save(raw.join(sub).join(ses).join("anat").join(format!("{sub}_{ses}_T1w.nii.gz")))
            .unwrap();
    }

    fn config(root: &Path, jobs: usize) -> ProcConfig {
        ProcConfig {
            input_dir: root.join("raw"),
            output_dir: root.join("out"),
            out_shape: [1, 10, 10],
            jobs,
            omp_threads: 1,
            ..ProcConfig::default()
        }
    }

    #[test]
    fn test_enumerate_work() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path();
        fs::create_dir_all(raw.join("sub-01/ses-02")).unwrap();
        fs::create_dir_all(raw.join("sub-01/ses-01")).unwrap();
        fs::create_dir_all(raw.join("sub-02/ses-01")).unwrap();
        let subjects = ["sub-01", "sub-02", "sub-09"].map(String::from);

        let items = enumerate_work(raw, &subjects, None);
        assert_eq!(
            items,
            vec![
                WorkItem::new("sub-01", "ses-01"),
                WorkItem::new("sub-01", "ses-02"),
                WorkItem::new("sub-02", "ses-01"),
            ]
        );

        let sessions = ["ses-x".to_string()];
        let items = enumerate_work(raw, &subjects, Some(&sessions));
        assert_eq!(items.len(), 3);
        assert_eq!(items[2], WorkItem::new("sub-09", "ses-x"));
    }

    #[test]
    fn test_oversubscription() {
        assert!(!oversubscribed(4, 6, 24));
        assert!(oversubscribed(4, 6, 16));
    }

    fn check_isolation(jobs: usize) {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        for sub in ["sub-01", "sub-02", "sub-03"] {
            write_session(&raw, sub, "ses-01");
        }
        let cfg = Arc::new(config(dir.path(), jobs));
        let runner = Arc::new(
            FakeRunner::new()
                .failing(Tool::BiasCorrect, "sub-02")
                .panicking(Tool::SkullStrip, "sub-03"),
        );
        let mut items = enumerate_work(&raw, &["sub-01", "sub-02", "sub-03"].map(String::from), None);
        items.push(WorkItem::new("sub-04", "ses-01"));

        let summary = run(cfg, runner, items);
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.completed.len(), 1);
        assert_eq!(summary.completed[0].subject, "sub-01");
        assert!(dir
            .path()
            .join("out/sub-01/ses-01/anat/final/sub-01_ses-01_desc-brain_mask_space-iso1mm.nii.gz")
            .is_file());

        let mut failed: Vec<_> = summary
            .failed
            .iter()
            .map(|(item, msg)| (item.subject.as_str(), msg.as_str()))
            .collect();
        failed.sort();
        assert!(failed[0].1.contains("N4BiasFieldCorrection"));
        assert!(failed[1].1.contains("injected panic"));
        assert!(failed[2].1.contains("missing input"));
    }

    #[test]
    fn test_serial_failure_isolation() {
        check_isolation(1);
    }

    #[test]
    fn test_parallel_failure_isolation() {
        check_isolation(3);
    }
}
