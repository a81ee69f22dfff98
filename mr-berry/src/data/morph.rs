//! 3D 形态学操作.

use crate::consts::gray::*;
use crate::{BrainMask, Idx3d, NiftiHeaderAttr};

/// 半径为 `radius` 的离散球结构元, 即满足 `dz² + dh² + dw² <= radius²` 的全部偏移.
pub fn ball(radius: usize) -> Vec<(isize, isize, isize)> {
    let r = radius as isize;
    let r2 = r * r;
    let mut ans = Vec::new();
    for dz in -r..=r {
        for dh in -r..=r {
            for dw in -r..=r {
                if dz * dz + dh * dh + dw * dw <= r2 {
                    ans.push((dz, dh, dw));
                }
            }
        }
    }
    ans
}

impl BrainMask {
    /// 以半径为 `radius` 的球结构元对掩膜做二值膨胀, 返回新掩膜.
    /// `radius == 0` 时返回副本.
    ///
    /// # 注意
    ///
    /// 只从表面体素 (至少一个六邻域为背景) 向外扩散. 对于任意被内部体素的球覆盖的点,
    /// 沿单调路径从中心走向该点时遇到的最后一个前景体素必然是表面体素,
    /// 且离该点不远于球心, 因此结果与逐体素膨胀一致.
    pub fn dilated(&self, radius: usize) -> BrainMask {
        let mut out = self.data().to_owned();
        if radius == 0 {
            return self.with_data(out);
        }
        let offsets = ball(radius);
        let (dz, dh, dw) = self.shape();
        let bounds = (dz as isize, dh as isize, dw as isize);

        for pos in self.surface() {
            let (z, h, w) = (pos.0 as isize, pos.1 as isize, pos.2 as isize);
            for &(oz, oh, ow) in offsets.iter() {
                let (nz, nh, nw) = (z + oz, h + oh, w + ow);
                if (0..bounds.0).contains(&nz)
                    && (0..bounds.1).contains(&nh)
                    && (0..bounds.2).contains(&nw)
                {
                    out[(nz as usize, nh as usize, nw as usize)] = MASK_BRAIN;
                }
            }
        }
        self.with_data(out)
    }

    /// 收集所有表面体素. 位于体数据边界但六邻域全在前景内的体素不算表面.
    fn surface(&self) -> Vec<Idx3d> {
        self.data()
            .indexed_iter()
            .filter(|(_, p)| is_brain(**p))
            .filter(|(pos, _)| {
                self.diamond_neighbours(*pos)
                    .into_iter()
                    .any(|n| is_background(self[n]))
            })
            .map(|(pos, _)| pos)
            .collect()
    }

    /// 获取 `pos` 上下前后左右六个点的坐标.
    ///
    /// 在数据范围外的坐标会被过滤掉, 不会包含在返回值中.
    fn diamond_neighbours(&self, (z, h, w): Idx3d) -> Vec<Idx3d> {
        let (dz, dh, dw) = self.shape();
        [
            (z.wrapping_sub(1), h, w),
            (z.saturating_add(1), h, w),
            (z, h.wrapping_sub(1), w),
            (z, h.saturating_add(1), w),
            (z, h, w.wrapping_sub(1)),
            (z, h, w.saturating_add(1)),
        ]
        .into_iter()
        .filter(|&(z, h, w)| z < dz && h < dh && w < dw)
        .collect()
    }
}
