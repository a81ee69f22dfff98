//! 输出路径与文件名约定.
//!
//! 文件名后缀记录了处理阶段, 只看文件名即可还原中间产物的来历:
//!
//! | 阶段 | 后缀 |
//! |---|---|
//! | 重定向 | `_desc-ras` |
//! | 配准到参考体 | `_space-sesTarget` (替换 `_desc-ras`) |
//! | 偏置场校正 | `_desc-biascorr` |
//! | 脑掩膜 | `_desc-brain_mask` |
//! | 强度归一化 | `_desc-norm` |
//! | 各向同性 | `_space-iso{iso}mm` |
//! | 规范形状 | `_desc-train` |

use std::path::{Path, PathBuf};

use crate::config::ProcConfig;

/// NIfTI 扩展名.
const NII_GZ: &str = ".nii.gz";

/// 去掉 `.nii.gz` 或 `.nii` 扩展名后的文件名.
pub fn nii_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(NII_GZ)
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(&name)
        .to_string()
}

/// `dir/{stem}{suffix}.nii.gz`.
fn derive(dir: &Path, src: &Path, suffix: &str) -> PathBuf {
    dir.join(format!("{}{suffix}{NII_GZ}", nii_stem(src)))
}

/// 与体数据同名的 JSON 边车文件.
pub fn sidecar_of(path: &Path) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    dir.join(format!("{}.json", nii_stem(path)))
}

/// 去掉重定向后缀的基础名.
fn base_of_ras(ras: &Path) -> String {
    let stem = nii_stem(ras);
    stem.strip_suffix("_desc-ras").unwrap_or(&stem).to_string()
}

/// 单个 session 的输出目录与各阶段文件路径.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionPaths {
    subject: String,
    session: String,
    work: PathBuf,
    final_dir: PathBuf,
    iso_tag: String,
}

impl SessionPaths {
    /// `output/<subject>/<session>/anat/{work,final}`.
    pub fn new(cfg: &ProcConfig, subject: &str, session: &str) -> Self {
        let anat = cfg.output_dir.join(subject).join(session).join("anat");
        Self {
            subject: subject.to_string(),
            session: session.to_string(),
            work: anat.join("work"),
            final_dir: anat.join("final"),
            iso_tag: cfg.iso_tag(),
        }
    }

    /// 中间产物目录.
    pub fn work(&self) -> &Path {
        &self.work
    }

    /// 训练体与最终掩膜目录.
    pub fn final_dir(&self) -> &Path {
        &self.final_dir
    }

    /// 重定向结果.
    pub fn ras(&self, input: &Path) -> PathBuf {
        derive(&self.work, input, "_desc-ras")
    }

    /// 配准到参考体网格的结果.
    pub fn aligned(&self, ras: &Path) -> PathBuf {
        self.work
            .join(format!("{}_space-sesTarget{NII_GZ}", base_of_ras(ras)))
    }

    /// 正向 (移动体到参考体) 变换.
    pub fn forward_transform(&self, ras: &Path) -> PathBuf {
        self.work.join(format!(
            "{}_space-sesTarget_desc-affineToTarget_xfm.lta",
            base_of_ras(ras)
        ))
    }

    /// 逆向 (参考体到移动体) 变换.
    pub fn inverse_transform(&self, ras: &Path) -> PathBuf {
        self.work.join(format!(
            "{}_space-sesTarget_desc-targetToMov_xfm.lta",
            base_of_ras(ras)
        ))
    }

    /// 偏置场校正结果.
    pub fn bias_corrected(&self, input: &Path) -> PathBuf {
        derive(&self.work, input, "_desc-biascorr")
    }

    /// 工作目录中的脑掩膜.
    pub fn mask(&self, reference: &Path) -> PathBuf {
        derive(&self.work, reference, "_desc-brain_mask")
    }

    /// 颅骨剥离的临时分割体.
    pub fn mask_segmentation(&self, reference: &Path) -> PathBuf {
        self.work
            .join(format!("{}_desc-brain_mask.mgz", nii_stem(reference)))
    }

    /// 归一化结果.
    pub fn normalized(&self, input: &Path) -> PathBuf {
        derive(&self.work, input, "_desc-norm")
    }

    /// 各向同性重采样结果.
    pub fn isotropic(&self, input: &Path) -> PathBuf {
        derive(&self.work, input, &format!("_space-iso{}mm", self.iso_tag))
    }

    /// 各向同性重采样后的掩膜.
    pub fn isotropic_mask(&self, mask: &Path) -> PathBuf {
        derive(
            &self.work,
            mask,
            &format!("_space-iso{}mm_desc-mask", self.iso_tag),
        )
    }

    /// 规范形状的训练体.
    pub fn training(&self, isotropic: &Path) -> PathBuf {
        derive(&self.final_dir, isotropic, "_desc-train")
    }

    /// session 级最终掩膜, 名称与各模态的训练体不同.
    pub fn final_mask(&self) -> PathBuf {
        self.final_dir.join(format!(
            "{}_{}_desc-brain_mask_space-iso{}mm{NII_GZ}",
            self.subject, self.session, self.iso_tag
        ))
    }

    /// QC 拼图.
    pub fn mosaic(&self, training: &Path) -> PathBuf {
        self.work
            .join(format!("{}_desc-qc_mosaic.png", nii_stem(training)))
    }

    /// 裁剪/填充边车文件. 写在工作目录, 使 `final/` 只包含体数据.
    pub fn crop_sidecar(&self, training: &Path) -> PathBuf {
        self.work.join(format!("{}.json", nii_stem(training)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> SessionPaths {
        let cfg = ProcConfig {
            output_dir: PathBuf::from("/out"),
            ..ProcConfig::default()
        };
        SessionPaths::new(&cfg, "sub-01", "ses-01")
    }

    #[test]
    fn test_stem() {
        assert_eq!(nii_stem(Path::new("/a/sub-01_T1w.nii.gz")), "sub-01_T1w");
        assert_eq!(nii_stem(Path::new("sub-01_T1w.nii")), "sub-01_T1w");
        assert_eq!(sidecar_of(Path::new("/w/x_desc-norm.nii.gz")), PathBuf::from("/w/x_desc-norm.json"));
    }

    #[test]
    fn test_lineage() {
        let p = paths();
        let input = Path::new("/in/sub-01/ses-01/anat/sub-01_ses-01_FLAIR.nii.gz");
        let ras = p.ras(input);
        assert_eq!(
            ras,
            PathBuf::from("/out/sub-01/ses-01/anat/work/sub-01_ses-01_FLAIR_desc-ras.nii.gz")
        );
        let aligned = p.aligned(&ras);
        assert_eq!(aligned.file_name().unwrap(), "sub-01_ses-01_FLAIR_space-sesTarget.nii.gz");
        assert_eq!(
            p.forward_transform(&ras).file_name().unwrap(),
            "sub-01_ses-01_FLAIR_space-sesTarget_desc-affineToTarget_xfm.lta"
        );
        assert_eq!(
            p.inverse_transform(&ras).file_name().unwrap(),
            "sub-01_ses-01_FLAIR_space-sesTarget_desc-targetToMov_xfm.lta"
        );

        let bias = p.bias_corrected(&aligned);
        let norm = p.normalized(&bias);
        let iso = p.isotropic(&norm);
        let train = p.training(&iso);
        assert_eq!(
            train,
            PathBuf::from(
                "/out/sub-01/ses-01/anat/final/\
                 sub-01_ses-01_FLAIR_space-sesTarget_desc-biascorr_desc-norm_space-iso1mm_desc-train.nii.gz"
            )
        );
        assert_eq!(
            p.final_mask().file_name().unwrap(),
            "sub-01_ses-01_desc-brain_mask_space-iso1mm.nii.gz"
        );

        let mask = p.mask(&bias);
        assert_eq!(
            p.mask_segmentation(&bias).file_name().unwrap(),
            "sub-01_ses-01_FLAIR_space-sesTarget_desc-biascorr_desc-brain_mask.mgz"
        );
        assert_eq!(
            p.isotropic_mask(&mask).file_name().unwrap(),
            "sub-01_ses-01_FLAIR_space-sesTarget_desc-biascorr_desc-brain_mask_space-iso1mm_desc-mask.nii.gz"
        );
    }
}
