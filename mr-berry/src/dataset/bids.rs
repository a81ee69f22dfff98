//! 原始数据发现.

use std::path::{Path, PathBuf};

use super::{sorted_files, sorted_subdirs};
use crate::{Modality, PrepError, PrepResult};

/// `input_dir` 下的全部 `sub-*` 目录.
pub fn find_subjects(input_dir: &Path) -> PrepResult<Vec<String>> {
    if !input_dir.is_dir() {
        return Err(PrepError::MissingInput(format!(
            "input directory {} does not exist",
            input_dir.display()
        )));
    }
    sorted_subdirs(input_dir, "sub-")
}

/// 某个 subject 目录下的全部 `ses-*` 目录.
pub fn find_sessions(subject_dir: &Path) -> PrepResult<Vec<String>> {
    if !subject_dir.is_dir() {
        return Err(PrepError::MissingInput(format!(
            "subject directory {} does not exist",
            subject_dir.display()
        )));
    }
    sorted_subdirs(subject_dir, "ses-")
}

/// 文件名是否形如 `*_<suffix>.nii.gz` 或 `*_<suffix>.nii`.
fn is_modality_file(name: &str, suffix: &str) -> bool {
    let stem = name
        .strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"));
    matches!(stem, Some(s) if s.ends_with(&format!("_{suffix}")))
}

/// 在 `anat` 目录中按 `modalities` 的次序列出各模态的文件.
///
/// 同一模态的文件按文件名排序. 没有任何文件的模态被丢弃.
/// 目录不存在或所有模态都没有文件时返回 [`PrepError::MissingInput`].
pub fn list_modality_files(
    anat: &Path,
    modalities: &[Modality],
) -> PrepResult<Vec<(Modality, Vec<PathBuf>)>> {
    if !anat.is_dir() {
        return Err(PrepError::MissingInput(format!(
            "anat directory {} does not exist",
            anat.display()
        )));
    }
    let mut ans = vec![];
    for m in modalities {
        let files = sorted_files(anat, |name| is_modality_file(name, m.suffix()))?;
        if !files.is_empty() {
            ans.push((m.clone(), files));
        }
    }
    if ans.is_empty() {
        return Err(PrepError::MissingInput(format!(
            "no {} volume under {}",
            modalities.iter().map(Modality::suffix).collect::<Vec<_>>().join("/"),
            anat.display()
        )));
    }
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_modality_matching() {
        assert!(is_modality_file("sub-01_ses-01_T1w.nii.gz", "T1w"));
        assert!(is_modality_file("sub-01_ses-01_run-2_T1w.nii", "T1w"));
        assert!(!is_modality_file("sub-01_ses-01_T1w.json", "T1w"));
        assert!(!is_modality_file("sub-01_ses-01_T1w_mask.nii.gz", "T1w"));
        assert!(!is_modality_file("sub-01_ses-01_FLAIR.nii.gz", "T1w"));
    }

    #[test]
    fn test_list_modality_files() {
        let dir = tempfile::tempdir().unwrap();
        let anat = dir.path();
        for f in [
            "s_run-2_T1w.nii.gz",
            "s_run-1_T1w.nii.gz",
            "s_FLAIR.nii",
            "s_T1w.json",
        ] {
            fs::write(anat.join(f), b"").unwrap();
        }
        let found =
            list_modality_files(anat, &[Modality::Flair, Modality::T2w, Modality::T1w]).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, Modality::Flair);
        assert_eq!(found[1].0, Modality::T1w);
        assert!(found[1].1[0].ends_with("s_run-1_T1w.nii.gz"));

        assert!(matches!(
            list_modality_files(anat, &[Modality::T2w]),
            Err(PrepError::MissingInput(_))
        ));
        assert!(matches!(
            list_modality_files(&anat.join("nope"), &[Modality::T1w]),
            Err(PrepError::MissingInput(_))
        ));
    }

    #[test]
    fn test_find_sessions() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub-01/ses-b")).unwrap();
        fs::create_dir_all(dir.path().join("sub-01/ses-a")).unwrap();
        fs::create_dir_all(dir.path().join("sub-02")).unwrap();
        fs::create_dir_all(dir.path().join("derivatives")).unwrap();
        assert_eq!(find_subjects(dir.path()).unwrap(), vec!["sub-01", "sub-02"]);
        assert_eq!(
            find_sessions(&dir.path().join("sub-01")).unwrap(),
            vec!["ses-a", "ses-b"]
        );
        assert!(find_sessions(&dir.path().join("sub-03")).is_err());
    }
}
