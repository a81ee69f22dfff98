//! 会话级脑掩膜: 颅骨剥离, 二值化, 膨胀.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::naming::{sidecar_of, SessionPaths};
use super::sidecar::{write_sidecar, MaskRecord};
use crate::config::MaskAggressiveness;
use crate::tools::{ToolRequest, ToolRunner};
use crate::{BrainMask, PrepResult};

/// 在 `reference` 上计算脑掩膜并按 `aggressiveness` 膨胀, 返回掩膜路径.
///
/// 每个会话只调用一次. 颅骨剥离的中间分割体在二值化后删除.
pub fn compute_mask(
    runner: &dyn ToolRunner,
    paths: &SessionPaths,
    reference: &Path,
    aggressiveness: MaskAggressiveness,
    dry_run: bool,
) -> PrepResult<PathBuf> {
    let output = paths.mask(reference);
    if dry_run {
        return Ok(output);
    }
    let segmentation = paths.mask_segmentation(reference);
    runner.run(&ToolRequest::skull_strip(reference, &segmentation))?;
    runner.run(&ToolRequest::binarize(&segmentation, &output))?;
    if segmentation.exists() {
        fs::remove_file(&segmentation)?;
    }

    let mask = BrainMask::open(&output)?;
    let radius = aggressiveness.radius();
    let voxels_before = mask.count();
    let mask = if radius > 0 {
        let dilated = mask.dilated(radius);
        dilated.save(&output)?;
        dilated
    } else {
        mask
    };
    let voxels_after = mask.count();
    debug!("Mask voxels {voxels_before} -> {voxels_after} (radius {radius})");
    info!(
        "Mask computed on {} ({})",
        reference.display(),
        aggressiveness.name()
    );

    write_sidecar(
        &sidecar_of(&output),
        &MaskRecord {
            reference: reference.to_path_buf(),
            output: output.clone(),
            aggressiveness: aggressiveness.name().to_string(),
            radius,
            voxels_before,
            voxels_after,
        },
    )?;
    Ok(output)
}
