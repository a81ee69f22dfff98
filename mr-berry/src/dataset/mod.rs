//! 数据集目录操作.
//!
//! - [`bids`]: 原始数据 `<root>/<subject>/<session>/anat/*_<modality>.nii.gz`;
//! - [`derivatives`]: 流水线输出 `<root>/<subject>/<session>/anat/final/`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::PrepResult;

pub mod bids;
pub mod derivatives;

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// `dir` 下名称以 `prefix` 开头的子目录名, 按字典序排列.
pub(crate) fn sorted_subdirs(dir: &Path, prefix: &str) -> PrepResult<Vec<String>> {
    let mut ans = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(prefix) {
                ans.push(name.to_string());
            }
        }
    }
    ans.sort_unstable();
    Ok(ans)
}

/// `dir` 下满足 `pred` 的文件, 按文件名字典序排列.
pub(crate) fn sorted_files(dir: &Path, pred: impl Fn(&str) -> bool) -> PrepResult<Vec<PathBuf>> {
    let mut ans = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_str().map_or(false, &pred) {
            ans.push(entry.path());
        }
    }
    ans.sort_unstable();
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_dir() {
        if let Some(p) = home_dataset_dir_with(["adni", "raw"]) {
            assert!(p.ends_with("dataset/adni/raw"));
        }
    }

    #[test]
    fn test_sorted_listing() {
        let dir = tempfile::tempdir().unwrap();
        for d in ["ses-02", "ses-01", "extra"] {
            fs::create_dir(dir.path().join(d)).unwrap();
        }
        fs::write(dir.path().join("ses-03"), b"").unwrap();
        assert_eq!(sorted_subdirs(dir.path(), "ses-").unwrap(), vec!["ses-01", "ses-02"]);
        assert_eq!(sorted_files(dir.path(), |n| n.starts_with("ses-")).unwrap().len(), 1);
    }
}
