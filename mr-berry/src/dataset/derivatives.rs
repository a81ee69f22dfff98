//! 流水线输出 (训练体与会话掩膜) 的发现.

use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use super::{sorted_files, sorted_subdirs};
use crate::{Modality, PrepError, PrepResult};

/// 无法从文件名推断模态时使用的标签.
pub const UNKNOWN_MODALITY: &str = "UNK";

/// 一个训练体及其所在会话的掩膜.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedVolume {
    /// subject 标识, 如 `sub-01`.
    pub subject: String,
    /// session 标识, 如 `ses-01`.
    pub session: String,
    /// 从文件名推断的模态.
    pub modality: Modality,
    /// 训练体.
    pub train: PathBuf,
    /// 会话掩膜.
    pub mask: PathBuf,
}

impl DerivedVolume {
    /// 记录键: 训练体文件名去掉 `.nii.gz`.
    pub fn key(&self) -> String {
        crate::prep::naming::nii_stem(&self.train)
    }
}

/// 发现阶段的过滤条件. `None` 表示不过滤.
#[derive(Clone, Debug, Default)]
pub struct DiscoverFilter {
    /// 只保留这些 subject.
    pub subjects: Option<Vec<String>>,
    /// 只保留这些 session.
    pub sessions: Option<Vec<String>>,
    /// 只保留这些模态.
    pub modalities: Option<Vec<Modality>>,
}

fn keep<T: PartialEq>(filter: &Option<Vec<T>>, value: &T) -> bool {
    filter.as_ref().map_or(true, |f| f.contains(value))
}

fn is_session_mask(name: &str) -> bool {
    name.contains("_desc-brain_mask_space-iso") && name.ends_with("mm.nii.gz")
}

fn is_training_volume(name: &str) -> bool {
    name.ends_with("_desc-train.nii.gz") && !name.contains("_desc-mask_")
}

/// 遍历 `<root>/sub-*/ses-*/anat/final`, 按 subject, session, 文件名的次序返回训练体.
///
/// 缺少掩膜或训练体的会话被跳过并记录.
pub fn discover(root: &Path, filter: &DiscoverFilter) -> PrepResult<Vec<DerivedVolume>> {
    if !root.is_dir() {
        return Err(PrepError::MissingInput(format!(
            "derivatives directory {} does not exist",
            root.display()
        )));
    }
    let mut ans = vec![];
    for subject in sorted_subdirs(root, "sub-")? {
        if !keep(&filter.subjects, &subject) {
            continue;
        }
        for session in sorted_subdirs(&root.join(&subject), "ses-")? {
            if !keep(&filter.sessions, &session) {
                continue;
            }
            let final_dir = root.join(&subject).join(&session).join("anat").join("final");
            if !final_dir.is_dir() {
                info!("Skip {subject} {session}: no final directory");
                continue;
            }
            let Some(mask) = sorted_files(&final_dir, is_session_mask)?.into_iter().next() else {
                info!("Skip {subject} {session}: no session mask");
                continue;
            };
            let trains = sorted_files(&final_dir, is_training_volume)?;
            if trains.is_empty() {
                info!("Skip {subject} {session}: no training volume");
                continue;
            }
            for train in trains {
                let name = train
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let modality =
                    Modality::infer(&name).unwrap_or_else(|| Modality::from(UNKNOWN_MODALITY));
                if !keep(&filter.modalities, &modality) {
                    continue;
                }
                ans.push(DerivedVolume {
                    subject: subject.clone(),
                    session: session.clone(),
                    modality,
                    train,
                    mask: mask.clone(),
                });
            }
        }
    }
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"").unwrap();
    }

    #[test]
    fn test_discover_with_filters() {
        let dir = tempfile::tempdir().unwrap();
        let r = dir.path();
        let f = "anat/final";
        touch(r, &format!("sub-01/ses-01/{f}/sub-01_ses-01_desc-brain_mask_space-iso1mm.nii.gz"));
        touch(r, &format!("sub-01/ses-01/{f}/a_T1w_space-iso1mm_desc-train.nii.gz"));
        touch(r, &format!("sub-01/ses-01/{f}/a_FLAIR_space-iso1mm_desc-train.nii.gz"));
        touch(r, &format!("sub-01/ses-01/{f}/a_PD_space-iso1mm_desc-train.nii.gz"));
        touch(r, &format!("sub-01/ses-01/{f}/a_space-iso1mm_desc-mask_desc-train.nii.gz"));
        // 没有掩膜.
        touch(r, &format!("sub-02/ses-01/{f}/b_T1w_desc-train.nii.gz"));
        // 没有训练体.
        touch(r, &format!("sub-03/ses-01/{f}/sub-03_ses-01_desc-brain_mask_space-iso1mm.nii.gz"));

        let all = discover(r, &DiscoverFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].modality, Modality::Flair);
        assert_eq!(all[1].modality, Modality::Other(UNKNOWN_MODALITY.into()));
        assert_eq!(all[2].modality, Modality::T1w);
        assert_eq!(all[2].key(), "a_T1w_space-iso1mm_desc-train");
        assert!(all.iter().all(|v| v.mask.ends_with("sub-01_ses-01_desc-brain_mask_space-iso1mm.nii.gz")));

        let filter = DiscoverFilter {
            modalities: Some(vec![Modality::T1w]),
            ..DiscoverFilter::default()
        };
        assert_eq!(discover(r, &filter).unwrap().len(), 1);

        let filter = DiscoverFilter {
            subjects: Some(vec!["sub-02".into()]),
            ..DiscoverFilter::default()
        };
        assert!(discover(r, &filter).unwrap().is_empty());
    }
}
