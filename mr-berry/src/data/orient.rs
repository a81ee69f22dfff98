//! 重定向到最接近的规范 RAS 空间.

use ndarray::Axis;

use super::affine::{Affine, AxisCodeError};
use crate::{NiftiHeaderAttr, Volume};

impl<T: Copy> Volume<T> {
    /// 通过轴置换与翻转, 将体数据重定向到最接近的规范 RAS 方向.
    ///
    /// 返回重定向后的体数据, 以及原始方向编码 (如 `"LPS"`). 原本已是 RAS 时直接复制.
    ///
    /// # 注意
    ///
    /// 只做整数网格上的重排, 不插值. 物理空间中每个体素的位置不变.
    pub fn to_ras(&self) -> Result<(Volume<T>, String), AxisCodeError> {
        let affine = self.affine();
        let ornt = affine.orientation()?;
        let codes = affine.axcodes()?;
        if ornt == [(0, true), (1, true), (2, true)] {
            return Ok((self.clone(), codes));
        }

        // src[w]: 指向世界轴 w 的原 nifti 轴.
        let mut src = [0usize; 3];
        for (j, &(w, _)) in ornt.iter().enumerate() {
            src[w] = j;
        }

        // 数组轴 a 对应 nifti 轴 2 - a.
        let perm = [0, 1, 2].map(|a| 2 - src[2 - a]);
        let mut data = self.data().to_owned().permuted_axes(perm);
        for a in 0..3 {
            if !ornt[src[2 - a]].1 {
                data.invert_axis(Axis(a));
            }
        }
        let data = data.as_standard_layout().into_owned();

        let (z, h, w) = self.shape();
        let dims = [w, h, z];
        let mut m = [[0.0; 4]; 3];
        for (row, o) in m.iter_mut().zip(affine.origin()) {
            row[3] = o;
        }
        for (new_j, &old_j) in src.iter().enumerate() {
            let col = affine.column(old_j);
            let positive = ornt[old_j].1;
            for i in 0..3 {
                if positive {
                    m[i][new_j] = col[i];
                } else {
                    m[i][new_j] = -col[i];
                    m[i][3] += col[i] * (dims[old_j] as f64 - 1.0);
                }
            }
        }
        Ok((self.with_grid(data, &Affine(m)), codes))
    }
}
