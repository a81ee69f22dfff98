//! 各向同性重采样与中心裁剪/填充.
//!
//! 两者都保持原点和方向不变, 只改变网格. 重采样保持视野:
//! 新尺寸为 `round(n * s / iso)`, 第 `o` 个输出体素对应输入连续索引 `o * iso / s`.

use ndarray::{Array3, ArrayView3, ArrayViewMut2, Axis};

use crate::{BrainMask, Idx3d, MrScan, NiftiHeaderAttr, Volume};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 一维线性插值的取样位置: 两个相邻索引与权重.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Tap {
    lo: usize,
    hi: usize,
    frac: f64,
}

/// 计算一个轴上每个输出索引的取样位置. 落在 `[-0.5, n - 0.5]` 之外的为 `None`.
fn axis_taps(n_in: usize, s_in: f64, iso: f64, n_out: usize) -> Vec<Option<Tap>> {
    let last = n_in.saturating_sub(1) as f64;
    (0..n_out)
        .map(|o| {
            let x = o as f64 * iso / s_in;
            if n_in == 0 || x < -0.5 || x > last + 0.5 {
                return None;
            }
            let x = x.clamp(0.0, last);
            let lo = x.floor() as usize;
            let hi = (lo + 1).min(n_in - 1);
            Some(Tap {
                lo,
                hi,
                frac: x - lo as f64,
            })
        })
        .collect()
}

/// 各向同性网格的形状. 每个维度至少为 1.
pub fn iso_shape((z, h, w): Idx3d, [sz, sh, sw]: [f64; 3], iso: f64) -> Idx3d {
    let f = |n: usize, s: f64| ((n as f64 * s / iso).round() as usize).max(1);
    (f(z, sz), f(h, sh), f(w, sw))
}

/// 按 z 切片并行填充输出数组.
#[cfg(feature = "rayon")]
fn fill_by_slice<T, F>(out: &mut Array3<T>, op: F)
where
    T: Send + Sync,
    F: Fn(usize, ArrayViewMut2<'_, T>) + Sync + Send,
{
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(z, s)| op(z, s));
}

/// 按 z 切片填充输出数组.
#[cfg(not(feature = "rayon"))]
fn fill_by_slice<T, F>(out: &mut Array3<T>, op: F)
where
    F: Fn(usize, ArrayViewMut2<'_, T>),
{
    out.axis_iter_mut(Axis(0))
        .enumerate()
        .for_each(|(z, s)| op(z, s));
}

/// 在 `(z, h, w)` 三个方向的取样位置上做三线性插值.
#[inline]
fn trilinear(data: &ArrayView3<'_, f32>, tz: &Tap, th: &Tap, tw: &Tap) -> f32 {
    let mut acc = 0.0f64;
    for (z, wz) in [(tz.lo, 1.0 - tz.frac), (tz.hi, tz.frac)] {
        for (h, wh) in [(th.lo, 1.0 - th.frac), (th.hi, th.frac)] {
            for (w, ww) in [(tw.lo, 1.0 - tw.frac), (tw.hi, tw.frac)] {
                let weight = wz * wh * ww;
                if weight != 0.0 {
                    acc += weight * data[(z, h, w)] as f64;
                }
            }
        }
    }
    acc as f32
}

/// 最近邻: 取权重较大的一侧, 恰好一半时取较大索引.
#[inline]
fn nearest(t: &Tap) -> usize {
    if t.frac >= 0.5 {
        t.hi
    } else {
        t.lo
    }
}

/// 为 `vol` 计算各向同性网格与每个轴的取样位置.
fn iso_grid<T>(vol: &Volume<T>, iso: f64) -> (Idx3d, [Vec<Option<Tap>>; 3]) {
    let shape = vol.shape();
    let spacing = vol.pix_dim();
    let out = iso_shape(shape, spacing, iso);
    let taps = [
        axis_taps(shape.0, spacing[0], iso, out.0),
        axis_taps(shape.1, spacing[1], iso, out.1),
        axis_taps(shape.2, spacing[2], iso, out.2),
    ];
    (out, taps)
}

/// 新网格的仿射: 每列乘以 `iso / s`, 原点不变.
fn iso_affine<T>(vol: &Volume<T>, iso: f64) -> crate::data::Affine {
    let [sz, sh, sw] = vol.pix_dim();
    let f = |s: f64| if s > 0.0 { iso / s } else { 1.0 };
    vol.affine().scaled([f(sw), f(sh), f(sz)])
}

/// 以三线性插值将强度体重采样到 `iso` 毫米各向同性网格. 视野之外填 0.
pub fn resample_isotropic(scan: &MrScan, iso: f64) -> MrScan {
    assert!(iso > 0.0);
    let (shape, [tz, th, tw]) = iso_grid(scan, iso);
    let data = scan.data();
    let mut out = Array3::<f32>::zeros(shape);
    fill_by_slice(&mut out, |z, mut slice| {
        let Some(tz) = &tz[z] else {
            return;
        };
        for ((h, w), v) in slice.indexed_iter_mut() {
            if let (Some(th), Some(tw)) = (&th[h], &tw[w]) {
                *v = trilinear(&data, tz, th, tw);
            }
        }
    });
    scan.with_grid(out, &iso_affine(scan, iso))
}

/// 以最近邻将掩膜重采样到 `iso` 毫米各向同性网格, 结果仍是二值的.
pub fn resample_isotropic_mask(mask: &BrainMask, iso: f64) -> BrainMask {
    assert!(iso > 0.0);
    let (shape, [tz, th, tw]) = iso_grid(mask, iso);
    let data = mask.data();
    let mut out = Array3::<u8>::zeros(shape);
    fill_by_slice(&mut out, |z, mut slice| {
        let Some(tz) = &tz[z] else {
            return;
        };
        let zi = nearest(tz);
        for ((h, w), v) in slice.indexed_iter_mut() {
            if let (Some(th), Some(tw)) = (&th[h], &tw[w]) {
                *v = data[(zi, nearest(th), nearest(tw))];
            }
        }
    });
    mask.with_grid(out, &iso_affine(mask, iso))
}

/// 中心裁剪/填充的几何: 目标形状以及输出索引到输入索引的偏移 (`input = output + shift`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CropPad {
    /// 输出形状.
    pub shape: Idx3d,
    /// 每个轴的偏移 `start - pad_before`.
    pub shift: [isize; 3],
}

impl CropPad {
    /// 由当前形状和目标形状 `(D, H, W)` 计算几何.
    ///
    /// `keep_depth` 为真或 `D <= 1` 时保持当前深度.
    pub fn plan(current: Idx3d, target: [usize; 3], keep_depth: bool) -> Self {
        let cur = [current.0, current.1, current.2];
        let mut tgt = target;
        if keep_depth || tgt[0] <= 1 {
            tgt[0] = cur[0];
        }
        let mut shift = [0isize; 3];
        for a in 0..3 {
            let pad = tgt[a].saturating_sub(cur[a]);
            let before = pad / 2;
            let padded = cur[a] + pad;
            let start = (padded - tgt[a]) / 2;
            shift[a] = start as isize - before as isize;
        }
        Self {
            shape: (tgt[0], tgt[1], tgt[2]),
            shift,
        }
    }

    /// 按几何裁剪/填充数组, 填充值为 `T::default()`.
    pub fn apply<T: Copy + Default>(&self, data: &ArrayView3<'_, T>) -> Array3<T> {
        let (dz, dh, dw) = data.dim();
        let dims = [dz as isize, dh as isize, dw as isize];
        Array3::from_shape_fn(self.shape, |(z, h, w)| {
            let src = [z as isize + self.shift[0], h as isize + self.shift[1], w as isize + self.shift[2]];
            if (0..3).all(|a| (0..dims[a]).contains(&src[a])) {
                data[(src[0] as usize, src[1] as usize, src[2] as usize)]
            } else {
                T::default()
            }
        })
    }
}

/// 将体数据中心裁剪/填充到 `target`, 仿射原点随偏移平移.
pub fn crop_or_pad<T: Copy + Default>(vol: &Volume<T>, target: [usize; 3], keep_depth: bool) -> Volume<T> {
    let plan = CropPad::plan(vol.shape(), target, keep_depth);
    let data = plan.apply(&vol.data());
    let [sz, sh, sw] = plan.shift.map(|s| s as f64);
    let affine = vol.affine().translated([sw, sh, sz]);
    vol.with_grid(data, &affine)
}
