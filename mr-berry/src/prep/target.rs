//! 会话参考体 (target) 的选择.

use std::cmp::Ordering;

use crate::consts::{VOXEL_VOLUME_ATOL, VOXEL_VOLUME_RTOL};
use crate::NiftiHeaderAttr;

/// 参考体候选的几何摘要.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TargetCandidate {
    /// 体素体积 (立方毫米).
    pub voxel_volume: f64,
    /// 体素总个数.
    pub voxel_count: usize,
}

impl TargetCandidate {
    /// 从任意带 header 的对象提取摘要.
    pub fn of<H: NiftiHeaderAttr + ?Sized>(h: &H) -> Self {
        Self {
            voxel_volume: h.voxel(),
            voxel_count: h.size(),
        }
    }
}

/// `numpy.isclose` 语义的浮点相等.
#[inline]
fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= VOXEL_VOLUME_ATOL + VOXEL_VOLUME_RTOL * b.abs()
}

/// `a` 是否严格优于 `b`: 体素体积更小; 体积相等 (容差内) 时体素个数更多.
fn better(a: &TargetCandidate, b: &TargetCandidate) -> bool {
    if is_close(a.voxel_volume, b.voxel_volume) {
        a.voxel_count > b.voxel_count
    } else {
        a.voxel_volume.partial_cmp(&b.voxel_volume) == Some(Ordering::Less)
    }
}

/// 选择空间分辨率最高的候选, 返回其下标.
///
/// 体素体积最小者优先; 体积相等时体素个数多者优先; 仍相等时取靠前者.
///
/// # 注意
///
/// 上游的输入发现保证候选非空. 传入空列表是调用方的逻辑错误, 程序会 panic.
pub fn select_target(candidates: &[TargetCandidate]) -> usize {
    assert!(!candidates.is_empty(), "会话中没有任何参考体候选");
    let mut best = 0;
    for (i, c) in candidates.iter().enumerate().skip(1) {
        if better(c, &candidates[best]) {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    fn c(voxel_volume: f64, voxel_count: usize) -> TargetCandidate {
        TargetCandidate {
            voxel_volume,
            voxel_count,
        }
    }

    #[test]
    fn test_min_voxel_volume_wins_regardless_of_order() {
        let items = [c(1.0, 100), c(2.43, 10_000), c(0.5, 10), c(0.9, 1 << 20)];
        for perm in items.iter().copied().permutations(items.len()) {
            let i = select_target(&perm);
            assert_eq!(perm[i], c(0.5, 10));
        }
    }

    #[test]
    fn test_tie_breaks() {
        // 体积在容差内相等: 体素个数多者优先.
        let items = [c(1.0, 100), c(1.0 + 1e-9, 200), c(3.0, 1000)];
        assert_eq!(select_target(&items), 1);

        // 完全相同: 第一个优先.
        let items = [c(1.0, 100), c(1.0, 100)];
        assert_eq!(select_target(&items), 0);
    }

    #[test]
    #[should_panic]
    fn test_empty_candidates_panics() {
        select_target(&[]);
    }
}
