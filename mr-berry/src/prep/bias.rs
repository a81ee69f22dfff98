//! 偏置场校正.

use std::path::{Path, PathBuf};
use std::time::Instant;

use log::debug;

use super::naming::{sidecar_of, SessionPaths};
use super::sidecar::{write_sidecar, BiasRecord};
use crate::data::read_header;
use crate::tools::{ToolRequest, ToolRunner};
use crate::{NiftiHeaderAttr, PrepResult};

/// 对 `input` 做偏置场校正, 返回校正结果路径. 同时写出带耗时与几何信息的边车文件.
pub fn bias_correct(
    runner: &dyn ToolRunner,
    paths: &SessionPaths,
    input: &Path,
    dry_run: bool,
) -> PrepResult<PathBuf> {
    let output = paths.bias_corrected(input);
    if dry_run {
        return Ok(output);
    }
    let start = Instant::now();
    runner.run(&ToolRequest::BiasCorrect {
        input: input.to_path_buf(),
        output: output.clone(),
    })?;
    let elapsed_sec = start.elapsed().as_secs_f64();
    debug!("Bias-corrected {} in {elapsed_sec:.1}s", input.display());

    let header = read_header(&output)?;
    write_sidecar(
        &sidecar_of(&output),
        &BiasRecord {
            input: input.to_path_buf(),
            output: output.clone(),
            elapsed_sec,
            image_size: header.shape(),
            image_spacing: header.pix_dim(),
        },
    )?;
    Ok(output)
}
