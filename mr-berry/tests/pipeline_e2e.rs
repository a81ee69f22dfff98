//! 端到端: 原始会话 → 标准化 → 切片 → 分片, 外部工具由 `FakeRunner` 替代.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mr_berry::config::{ProcConfig, ShardSpec, SliceSpec};
use mr_berry::dataset::derivatives::{discover, DiscoverFilter};
use mr_berry::scheduler::{self, WorkItem};
use mr_berry::shard::{self, ShardReader};
use mr_berry::tools::{FakeRunner, Tool, ToolRequest, ToolRunner};
use mr_berry::{BrainMask, Modality, MrScan, NiftiHeaderAttr};
use ndarray::Array3;

const SUB: &str = "sub-01";
const SES: &str = "ses-01";

fn init_logger() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init();
}

/// 世界坐标 (毫米) 中的椭球 "脑", 中心 `(60, 60, 21)`, 半轴 `(50, 50, 15)`.
fn phantom(shape: (usize, usize, usize), spacing: [f64; 3], base: f32) -> MrScan {
    let [sz, sh, sw] = spacing;
    let data = Array3::from_shape_fn(shape, |(z, h, w)| {
        let x = (w as f64 * sw - 60.0) / 50.0;
        let y = (h as f64 * sh - 60.0) / 50.0;
        let k = (z as f64 * sz - 21.0) / 15.0;
        let r = x * x + y * y + k * k;
        if r <= 1.0 {
            base + (20.0 * (1.0 - r)) as f32 + ((z + h + w) % 7) as f32
        } else {
            0.0
        }
    });
    MrScan::fake(data, spacing)
}

/// 在 `raw/<SUB>/<SES>/anat` 下写出一个模态.
fn write_modality(raw: &Path, modality: &str, shape: (usize, usize, usize), spacing: [f64; 3], base: f32) {
    let anat = raw.join(SUB).join(SES).join("anat");
    phantom(shape, spacing, base)
        .save(anat.join(format!("{SUB}_{SES}_{modality}.nii.gz")))
        .unwrap();
}

/// 一个 subject, 一个会话: T1w (1mm 各向同性) 与 FLAIR (0.9 x 0.9 x 3mm).
fn write_raw(raw: &Path) {
    write_modality(raw, "T1w", (42, 120, 120), [1.0, 1.0, 1.0], 100.0);
    write_modality(raw, "FLAIR", (14, 134, 134), [3.0, 0.9, 0.9], 300.0);
}

fn config(root: &Path) -> ProcConfig {
    ProcConfig {
        input_dir: root.join("raw"),
        output_dir: root.join("derivatives"),
        jobs: 1,
        omp_threads: 2,
        ..ProcConfig::default()
    }
}

fn run(cfg: ProcConfig, runner: Arc<FakeRunner>) -> scheduler::RunSummary {
    let items = vec![WorkItem::new(SUB, SES)];
    scheduler::run(Arc::new(cfg), runner as Arc<dyn ToolRunner>, items)
}

#[test]
fn test_session_end_to_end() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    write_raw(&dir.path().join("raw"));

    // 演练: 只推导路径.
    let dry_runner = Arc::new(FakeRunner::new());
    let dry = run(
        ProcConfig {
            dry_run: true,
            ..config(dir.path())
        },
        Arc::clone(&dry_runner),
    );
    assert!(dry.all_ok(), "{:?}", dry.failed);
    assert!(dry_runner.calls().is_empty());
    assert!(!dir.path().join("derivatives").exists());

    let runner = Arc::new(FakeRunner::new());
    let summary = run(config(dir.path()), Arc::clone(&runner));
    assert!(summary.all_ok(), "{:?}", summary.failed);
    let report = &summary.completed[0];
    let planned = &dry.completed[0];
    assert_eq!(report.training, planned.training);
    assert_eq!(report.final_mask, planned.final_mask);
    assert_eq!(report.target, planned.target);

    // 参考体取体素体积最小者: T1w 为 1 x 1 x 1 = 1.0 立方毫米, FLAIR 为 0.9 x 0.9 x 3 = 2.43,
    // 因此 T1w 是参考体, FLAIR 被配准到 T1w 网格.
    assert!(report.target.to_string_lossy().ends_with("_T1w_desc-ras.nii.gz"));
    assert_eq!(runner.count(Tool::Coregister), 1);
    assert_eq!(runner.count(Tool::Resample), 1);
    assert_eq!(runner.count(Tool::InvertTransform), 1);
    assert_eq!(runner.count(Tool::SkullStrip), 1);
    assert_eq!(runner.count(Tool::Binarize), 1);
    // 掩膜参考 (T1w) 只校正一次.
    assert_eq!(runner.count(Tool::BiasCorrect), 2);
    assert!(report
        .mask_reference
        .to_string_lossy()
        .contains("_T1w_space-sesTarget_desc-biascorr"));

    let final_dir = dir.path().join("derivatives").join(SUB).join(SES).join("anat").join("final");
    let work_dir = final_dir.with_file_name("work");
    let mask = BrainMask::open(&report.final_mask).unwrap();
    assert!(report.final_mask.starts_with(&final_dir));
    assert_eq!(mask.shape(), (42, 256, 256));
    assert!(mask.is_binary());

    assert_eq!(report.training.len(), 2);
    for (modality, path) in report.training.iter() {
        assert!(path.starts_with(&final_dir));
        let train = MrScan::open(path).unwrap();
        assert_eq!(train.shape(), (42, 256, 256), "{modality}");
        let stem = path.file_name().unwrap().to_string_lossy().replace(".nii.gz", "");
        assert!(work_dir.join(format!("{stem}_desc-qc_mosaic.png")).is_file());
    }
    assert_eq!(report.training[0].0, Modality::T1w);
    assert_eq!(report.training[1].0, Modality::Flair);

    // 掩膜中间产物已删除, 边车文件保留.
    let leftovers: Vec<PathBuf> = std::fs::read_dir(&work_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().contains("_desc-brain_mask") && p.to_string_lossy().ends_with(".nii.gz"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");

    // 切片提取.
    for (_, path) in report.training.iter() {
        let train = MrScan::open(path).unwrap();
        let sample = shard::extract(&train, &mask, &SliceSpec::default(), path).unwrap();
        assert_eq!(sample.image.dim(), (16, 256, 256));
        assert_eq!(sample.mask.dim(), (16, 256, 256));
        assert!(sample.indices.windows(2).all(|p| p[0] <= p[1]));
        assert!(*sample.indices.last().unwrap() < 42);
    }
}

#[test]
fn test_shards_from_derivatives() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    write_raw(&dir.path().join("raw"));
    let summary = run(
        ProcConfig {
            out_shape: [1, 128, 128],
            ..config(dir.path())
        },
        Arc::new(FakeRunner::new()),
    );
    assert!(summary.all_ok(), "{:?}", summary.failed);

    let volumes = discover(&dir.path().join("derivatives"), &DiscoverFilter::default()).unwrap();
    assert_eq!(volumes.len(), 2);
    assert_eq!(volumes[0].modality, Modality::Flair);

    let out = dir.path().join("shards");
    let slices = SliceSpec {
        count: 8,
        target_size: Some((64, 64)),
        ..SliceSpec::default()
    };
    let spec = ShardSpec {
        shard_size: 1,
        prefix: "TEST".into(),
        ..ShardSpec::default()
    };

    let dry = shard::pack(&volumes, &out, &slices, &ShardSpec { dry_run: true, ..spec.clone() }).unwrap();
    assert_eq!((dry.samples, dry.planned), (2, 2));
    assert!(!out.exists());

    let packed = shard::pack(&volumes, &out, &slices, &spec).unwrap();
    assert_eq!(packed.written(), 2);
    assert_eq!(packed.skipped() + packed.failed(), 0);
    assert!(packed.shards.iter().all(|s| s.written <= spec.shard_size));

    let first = ShardReader::read_all(out.join("TEST_001.shard")).unwrap();
    assert_eq!(first.len(), 1);
    let rec = &first[0];
    assert_eq!(rec.key, volumes[0].key());
    assert_eq!(rec.meta.subject, SUB);
    assert_eq!(rec.meta.modality, Modality::Flair);
    assert_eq!(rec.meta.slices_shape, [8, 64, 64]);
    assert_eq!(rec.meta.coverage_per_slice.len(), 42);
    assert_eq!(rec.image().unwrap().dim(), (8, 64, 64));
    assert!(rec.mask().unwrap().iter().all(|v| *v <= 1));
    assert_eq!(ShardReader::read_all(out.join("TEST_002.shard")).unwrap().len(), 1);
}

fn names_in(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn test_session_without_bias_or_normalization() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    write_raw(&dir.path().join("raw"));
    let runner = Arc::new(FakeRunner::new());
    let summary = run(
        ProcConfig {
            bias_correct: false,
            normalize: false,
            ..config(dir.path())
        },
        Arc::clone(&runner),
    );
    assert!(summary.all_ok(), "{:?}", summary.failed);
    let report = &summary.completed[0];

    assert_eq!(runner.count(Tool::BiasCorrect), 0);
    assert_eq!(runner.count(Tool::SkullStrip), 1);
    assert!(!report.mask_reference.to_string_lossy().contains("biascorr"));

    let anat = dir.path().join("derivatives").join(SUB).join(SES).join("anat");
    let produced: Vec<String> = names_in(&anat.join("work"))
        .into_iter()
        .chain(names_in(&anat.join("final")))
        .collect();
    assert!(produced.iter().all(|n| !n.contains("_desc-norm")), "{produced:?}");
    assert!(produced.iter().all(|n| !n.contains("_desc-biascorr")), "{produced:?}");
    for (_, path) in report.training.iter() {
        assert_eq!(MrScan::open(path).unwrap().shape(), (42, 256, 256));
    }
}

#[test]
fn test_mask_reference_falls_back_to_target() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw");
    write_modality(&raw, "T2w", (42, 120, 120), [1.0, 1.0, 1.0], 200.0);
    write_modality(&raw, "FLAIR", (14, 134, 134), [3.0, 0.9, 0.9], 300.0);
    let runner = Arc::new(FakeRunner::new());
    let summary = run(config(dir.path()), Arc::clone(&runner));
    assert!(summary.all_ok(), "{:?}", summary.failed);
    let report = &summary.completed[0];

    assert!(report.target.to_string_lossy().ends_with("_T2w_desc-ras.nii.gz"));
    let strips: Vec<PathBuf> = runner
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ToolRequest::SkullStrip { input, .. } => Some(input),
            _ => None,
        })
        .collect();
    assert_eq!(strips.len(), 1);
    assert_eq!(strips[0], report.mask_reference);
    let name = strips[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.contains("_T2w_space-sesTarget_desc-biascorr"), "{name}");
    // 参考体只校正一次.
    assert_eq!(runner.count(Tool::BiasCorrect), 2);
    assert_eq!(report.training.len(), 2);
}
