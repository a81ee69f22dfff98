//! QC 图像的持久化存储.
//!
//! 图像仅用于人工检查, 以 "可视化友好" 的方式保存, 而不是 "as is" 的方式.

use std::path::Path;

use image::{GrayImage, Luma};
use ndarray::ArrayView2;

use crate::consts::gray::BLACK;
use crate::{IntensityWindow, MrScan, NiftiHeaderAttr, PrepResult};

/// 显示窗口所取的下分位数.
const VIS_LOWER_PERCENTILE: f64 = 1.0;

/// 显示窗口所取的上分位数.
const VIS_UPPER_PERCENTILE: f64 = 99.0;

/// 将水平切片按窗口映射为灰度值后画到 `buf` 的 `(left, top)` 处.
///
/// 切片上下翻转后显示, 使前方 (A) 朝上.
fn paint_slice(
    buf: &mut GrayImage,
    slice: ArrayView2<'_, f32>,
    window: Option<&IntensityWindow>,
    (left, top): (u32, u32),
) {
    let (height, _) = slice.dim();
    for ((h, w), &v) in slice.indexed_iter() {
        let gray = window.and_then(|win| win.eval(v)).unwrap_or(BLACK);
        let row = (height - 1 - h) as u32;
        buf.put_pixel(left + w as u32, top + row, Luma([gray]));
    }
}

/// 在 `[0, n - 1]` 上均匀选取 `count` 个索引, 向零取整.
pub(crate) fn mosaic_indices(n: usize, count: usize) -> Vec<usize> {
    if n == 0 || count == 0 {
        return vec![];
    }
    if count == 1 {
        return vec![0];
    }
    let step = (n - 1) as f64 / (count - 1) as f64;
    (0..count).map(|i| (i as f64 * step) as usize).collect()
}

impl MrScan {
    /// 将 `n_slices` 张等距水平切片排成每行 `n_cols` 张的拼图, 以 PNG 格式保存到 `path`.
    ///
    /// 显示窗口取整个体数据的 1% 与 99% 分位数. 空位填充黑色.
    pub fn save_mosaic<P: AsRef<Path>>(
        &self,
        path: P,
        n_slices: usize,
        n_cols: usize,
    ) -> PrepResult<()> {
        assert!(n_cols > 0);
        let (_, height, width) = self.shape();
        let indices = mosaic_indices(self.len_z(), n_slices);
        let n_rows = (indices.len() + n_cols - 1) / n_cols;
        let window = IntensityWindow::from_percentiles(
            self.data().iter().copied(),
            VIS_LOWER_PERCENTILE,
            VIS_UPPER_PERCENTILE,
        );

        let mut buf = GrayImage::new((n_cols * width) as u32, (n_rows.max(1) * height) as u32);
        for (i, &z) in indices.iter().enumerate() {
            let origin = (((i % n_cols) * width) as u32, ((i / n_cols) * height) as u32);
            paint_slice(&mut buf, self.slice_at(z), window.as_ref(), origin);
        }
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        buf.save(path)?;
        Ok(())
    }
}
