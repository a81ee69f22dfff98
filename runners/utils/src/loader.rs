//! 默认数据目录.

use std::env;
use std::path::PathBuf;

/// 环境变量非空时取其值, 否则取 `$HOME/dataset/<rest>`.
fn env_or_home(var: &str, rest: &[&str]) -> Option<PathBuf> {
    match env::var_os(var) {
        Some(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => mr_berry::dataset::home_dataset_dir_with(rest),
    }
}

/// 获取原始数据根目录.
///
/// 1. 若环境变量 `$STRUCTPREP_INPUT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/raw`.
pub fn input_dir_from_env_or_home() -> Option<PathBuf> {
    env_or_home("STRUCTPREP_INPUT_DIR", &["raw"])
}

/// 获取输出 (derivatives) 根目录.
///
/// 1. 若环境变量 `$STRUCTPREP_OUTPUT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/derivatives`.
pub fn output_dir_from_env_or_home() -> Option<PathBuf> {
    env_or_home("STRUCTPREP_OUTPUT_DIR", &["derivatives"])
}
