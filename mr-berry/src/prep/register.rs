//! 将会话内所有体数据对齐到参考体网格.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::naming::{sidecar_of, SessionPaths};
use super::sidecar::{write_sidecar, RegistrationRecord};
use crate::tools::{Interp, ToolRequest, ToolRunner};
use crate::PrepResult;

/// 参考体的恒等变换占位. 只为与其他体的产物保持对称, 不会被应用.
const IDENTITY_PLACEHOLDER: &str = "# identity placeholder for target\n";

/// 参考体: 原样复制到配准结果路径, 并写出恒等变换占位.
pub fn align_target(paths: &SessionPaths, target: &Path, dry_run: bool) -> PrepResult<PathBuf> {
    let output = paths.aligned(target);
    if dry_run {
        return Ok(output);
    }
    let forward = paths.forward_transform(target);
    fs::create_dir_all(paths.work())?;
    fs::copy(target, &output)?;
    fs::write(&forward, IDENTITY_PLACEHOLDER)?;
    write_sidecar(
        &sidecar_of(&output),
        &RegistrationRecord {
            moving: target.to_path_buf(),
            target: target.to_path_buf(),
            output: output.clone(),
            forward_transform: forward,
            inverse_transform: None,
            is_target: true,
            commands: vec![],
        },
    )?;
    Ok(output)
}

/// 非参考体: 估计仿射, 用三线性插值重采样到参考网格, 再求逆变换留档.
///
/// `threads` 是配准工具可用的线程数. 任一工具失败即返回错误.
pub fn align_to_target(
    runner: &dyn ToolRunner,
    paths: &SessionPaths,
    moving: &Path,
    target: &Path,
    threads: usize,
    dry_run: bool,
) -> PrepResult<PathBuf> {
    let output = paths.aligned(moving);
    if dry_run {
        return Ok(output);
    }
    fs::create_dir_all(paths.work())?;
    let forward = paths.forward_transform(moving);
    let inverse = paths.inverse_transform(moving);
    let requests = [
        ToolRequest::Coregister {
            moving: moving.to_path_buf(),
            reference: target.to_path_buf(),
            transform: forward.clone(),
            threads,
        },
        ToolRequest::Resample {
            moving: moving.to_path_buf(),
            reference: target.to_path_buf(),
            transform: forward.clone(),
            output: output.clone(),
            interp: Interp::Trilinear,
        },
        ToolRequest::InvertTransform {
            input: forward.clone(),
            output: inverse.clone(),
        },
    ];
    for request in requests.iter() {
        runner.run(request)?;
    }
    debug!("Aligned {} -> {}", moving.display(), output.display());

    write_sidecar(
        &sidecar_of(&output),
        &RegistrationRecord {
            moving: moving.to_path_buf(),
            target: target.to_path_buf(),
            output: output.clone(),
            forward_transform: forward,
            inverse_transform: Some(inverse),
            is_target: false,
            commands: requests.iter().map(ToolRequest::command_line).collect(),
        },
    )?;
    Ok(output)
}
