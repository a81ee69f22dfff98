//! 单个会话的标准化流水线.
//!
//! 各阶段严格串行:
//!
//! 1. 全部输入重定向到 RAS;
//! 2. 选出参考体 ([`target`]);
//! 3. 其余体配准并重采样到参考网格 ([`register`]);
//! 4. 选出掩膜参考 (优先 T1w), 偏置场校正后计算并膨胀掩膜 ([`bias`], [`mask`]);
//! 5. 掩膜各向同性重采样并裁剪/填充, 写出会话级最终掩膜;
//! 6. 每个配准后的体: 偏置场校正 → 归一化 ([`intensity`]) → 各向同性重采样 →
//!   裁剪/填充 ([`resample`]), 写出训练体与 QC 拼图;
//! 7. 删除掩膜中间产物.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::config::ProcConfig;
use crate::consts::{QC_MOSAIC_COLUMNS, QC_MOSAIC_SLICES};
use crate::data::read_header;
use crate::dataset::bids::list_modality_files;
use crate::tools::ToolRunner;
use crate::{BrainMask, Modality, MrScan, NiftiHeaderAttr, PrepError, PrepResult};

pub mod bias;
pub mod intensity;
pub mod mask;
pub mod naming;
pub mod register;
pub mod resample;
pub mod sidecar;
pub mod target;

use naming::{sidecar_of, SessionPaths};
use sidecar::{write_sidecar, GeometryRecord, NormRecord, ReorientRecord};
use target::{select_target, TargetCandidate};

/// 一个会话中某个模态的一次采集.
#[derive(Clone, Debug)]
struct SessionVolume {
    modality: Modality,
    input: PathBuf,
    ras: PathBuf,
}

/// 一个会话的产出.
#[derive(Clone, Debug, Serialize)]
pub struct SessionReport {
    /// subject 标识.
    pub subject: String,
    /// session 标识.
    pub session: String,
    /// 被选为参考体的重定向结果.
    pub target: PathBuf,
    /// 计算掩膜所用的体.
    pub mask_reference: PathBuf,
    /// 会话级最终掩膜.
    pub final_mask: PathBuf,
    /// 每个模态实例的训练体, 按输入次序.
    pub training: Vec<(Modality, PathBuf)>,
    /// QC 警告条数.
    pub qc_warnings: usize,
}

/// 重定向 `input` 并写出边车文件.
fn reorient(paths: &SessionPaths, input: &Path, dry_run: bool) -> PrepResult<PathBuf> {
    let output = paths.ras(input);
    if dry_run {
        return Ok(output);
    }
    let scan = MrScan::open(input)?;
    let (ras, original_axcodes) = scan
        .to_ras()
        .map_err(|_| PrepError::Orientation(input.display().to_string()))?;
    ras.save(&output)?;
    write_sidecar(
        &sidecar_of(&output),
        &ReorientRecord {
            input_file: input.to_path_buf(),
            ras: output.clone(),
            original_shape: scan.shape(),
            original_axcodes,
        },
    )?;
    Ok(output)
}

/// 归一化 `input` 并写出统计量边车. 返回输出路径与 QC 警告条数.
fn normalize(
    paths: &SessionPaths,
    input: &Path,
    mask: &Path,
    dry_run: bool,
) -> PrepResult<(PathBuf, usize)> {
    let output = paths.normalized(input);
    if dry_run {
        return Ok((output, 0));
    }
    let scan = MrScan::open(input)?;
    let mask = BrainMask::open(mask)?;
    let (normed, stats) = intensity::robust_normalize(&scan, &mask)?;
    for w in stats.warnings.iter() {
        warn!("QC {}: {w}", input.display());
    }
    normed.save(&output)?;
    write_sidecar(
        &sidecar_of(&output),
        &NormRecord {
            input,
            output: &output,
            stats: &stats,
        },
    )?;
    Ok((output, stats.warnings.len()))
}

/// 各向同性重采样, 再裁剪/填充到规范形状, 写出训练体与 QC 拼图.
fn canonicalize(cfg: &ProcConfig, paths: &SessionPaths, input: &Path) -> PrepResult<PathBuf> {
    let iso_path = paths.isotropic(input);
    let train_path = paths.training(&iso_path);
    if cfg.dry_run {
        return Ok(train_path);
    }
    let scan = MrScan::open(input)?;
    let iso = resample::resample_isotropic(&scan, cfg.iso_mm);
    iso.save(&iso_path)?;
    let train = resample::crop_or_pad(&iso, cfg.out_shape, cfg.keep_depth);
    train.save(&train_path)?;
    write_sidecar(
        &paths.crop_sidecar(&train_path),
        &GeometryRecord {
            input,
            output: &train_path,
            shape_before: scan.shape(),
            shape_after: train.shape(),
            iso_mm: cfg.iso_mm,
            keep_depth: cfg.preserves_depth(),
        },
    )?;
    train.save_mosaic(paths.mosaic(&train_path), QC_MOSAIC_SLICES, QC_MOSAIC_COLUMNS)?;
    Ok(train_path)
}

/// 会话级最终掩膜. 返回最终掩膜与各向同性中间掩膜的路径.
fn finalize_mask(cfg: &ProcConfig, paths: &SessionPaths, mask: &Path) -> PrepResult<(PathBuf, PathBuf)> {
    let iso_path = paths.isotropic_mask(mask);
    let final_path = paths.final_mask();
    if cfg.dry_run {
        return Ok((final_path, iso_path));
    }
    let iso = resample::resample_isotropic_mask(&BrainMask::open(mask)?, cfg.iso_mm);
    iso.save(&iso_path)?;
    resample::crop_or_pad(&iso, cfg.out_shape, cfg.keep_depth).save(&final_path)?;
    Ok((final_path, iso_path))
}

/// 执行单个会话 `input_dir/<subject>/<session>/anat` 的完整流水线.
///
/// 任一阶段失败即中止本会话并返回错误; 调用方负责隔离.
/// `cfg.dry_run` 为真时只推导路径, 不调用外部工具, 不写任何文件.
pub fn process_session(
    cfg: &ProcConfig,
    runner: &dyn ToolRunner,
    subject: &str,
    session: &str,
) -> PrepResult<SessionReport> {
    let session_dir = cfg.input_dir.join(subject).join(session);
    if !session_dir.is_dir() {
        return Err(PrepError::MissingInput(format!(
            "session directory {} does not exist",
            session_dir.display()
        )));
    }
    let inputs = list_modality_files(&session_dir.join("anat"), &cfg.modalities)?;
    let paths = SessionPaths::new(cfg, subject, session);
    let dry = cfg.dry_run;
    if !dry {
        fs::create_dir_all(paths.work())?;
        fs::create_dir_all(paths.final_dir())?;
    }

    let mut volumes = vec![];
    for (modality, files) in inputs {
        for input in files {
            let ras = reorient(&paths, &input, dry)?;
            volumes.push(SessionVolume {
                modality: modality.clone(),
                input,
                ras,
            });
        }
    }

    // 演练模式下重定向结果不存在, 用输入 header 代替. 重定向不改变体素体积与个数.
    let mut candidates = vec![];
    for v in volumes.iter() {
        let header = read_header(if dry { &v.input } else { &v.ras })?;
        candidates.push(TargetCandidate::of(&header));
    }
    let t = select_target(&candidates);
    let target = volumes[t].ras.clone();
    info!("{subject} {session}: target {}", target.display());

    let mut aligned = vec![];
    for (i, v) in volumes.iter().enumerate() {
        let out = if i == t {
            register::align_target(&paths, &v.ras, dry)?
        } else {
            register::align_to_target(runner, &paths, &v.ras, &target, cfg.omp_threads, dry)?
        };
        aligned.push(out);
    }

    let r = volumes
        .iter()
        .position(|v| v.modality == Modality::T1w)
        .unwrap_or(t);
    let mask_reference = if cfg.bias_correct {
        bias::bias_correct(runner, &paths, &aligned[r], dry)?
    } else {
        aligned[r].clone()
    };
    let work_mask = mask::compute_mask(
        runner,
        &paths,
        &mask_reference,
        cfg.mask_aggressiveness,
        dry,
    )?;
    let (final_mask, iso_mask) = finalize_mask(cfg, &paths, &work_mask)?;

    let mut training = vec![];
    let mut qc_warnings = 0;
    for (i, v) in volumes.iter().enumerate() {
        let mut current = aligned[i].clone();
        if cfg.bias_correct {
            current = if i == r {
                mask_reference.clone()
            } else {
                bias::bias_correct(runner, &paths, &current, dry)?
            };
        }
        if cfg.normalize {
            let (normed, warnings) = normalize(&paths, &current, &work_mask, dry)?;
            qc_warnings += warnings;
            current = normed;
        }
        let train = canonicalize(cfg, &paths, &current)?;
        info!("{subject} {session}: {} -> {}", v.modality, train.display());
        training.push((v.modality.clone(), train));
    }

    if !dry {
        for p in [&work_mask, &iso_mask] {
            if p.exists() {
                fs::remove_file(p)?;
            }
        }
    }

    Ok(SessionReport {
        subject: subject.to_string(),
        session: session.to_string(),
        target,
        mask_reference,
        final_mask,
        training,
        qc_warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::FakeRunner;

    #[test]
    fn test_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ProcConfig {
            input_dir: dir.path().join("raw"),
            output_dir: dir.path().join("out"),
            ..ProcConfig::default()
        };
        let runner = FakeRunner::new();
        let err = process_session(&cfg, &runner, "sub-01", "ses-01").unwrap_err();
        assert!(matches!(err, PrepError::MissingInput(_)));

        fs::create_dir_all(cfg.input_dir.join("sub-01/ses-01/anat")).unwrap();
        fs::write(cfg.input_dir.join("sub-01/ses-01/anat/s_PD.nii.gz"), b"").unwrap();
        let err = process_session(&cfg, &runner, "sub-01", "ses-01").unwrap_err();
        assert!(matches!(err, PrepError::MissingInput(_)));
        assert!(runner.calls().is_empty());
        assert!(!cfg.output_dir.exists());
    }
}
