use ordered_float::OrderedFloat;

/// 灰度显示窗口, 由强度下界和上界确定.
///
/// MRI 强度没有绝对刻度, 因此窗口通常由体数据自身的分位数求得,
/// 见 [`IntensityWindow::from_percentiles`].
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug)]
pub struct IntensityWindow {
    lower: f32,
    upper: f32,
}

impl IntensityWindow {
    /// 构建窗口.
    ///
    /// 要求两个边界都是有限数且 `lower < upper`, 否则返回 `None`.
    pub fn new(lower: f32, upper: f32) -> Option<IntensityWindow> {
        if lower.is_finite() && upper.is_finite() && lower < upper {
            Some(Self { lower, upper })
        } else {
            None
        }
    }

    /// 以 `values` 的第 `lo` 与第 `hi` 百分位数 (0~100) 作为窗口.
    ///
    /// 非有限值被忽略. 数据为空或两个分位数相等时返回 `None`.
    pub fn from_percentiles<I>(values: I, lo: f64, hi: f64) -> Option<IntensityWindow>
    where
        I: IntoIterator<Item = f32>,
    {
        let sorted = sorted_finite(values);
        let lower = percentile_sorted(&sorted, lo)?;
        let upper = percentile_sorted(&sorted, hi)?;
        Self::new(lower as f32, upper as f32)
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.lower
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.upper
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.upper - self.lower
    }

    /// 求在当前窗口设置下, 强度 `v` 对应的灰度图像素整数值 (0 <= value <= 255)
    ///
    /// 如果 `v` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval(&self, v: f32) -> Option<u8> {
        self.eval_f32(v).map(|g| g as u8)
    }

    /// 求在当前窗口设置下, 强度 `v` 对应的灰度图像素分布点 (0.0 <= value <= 255.0).
    ///
    /// 如果 `v` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval_f32(&self, v: f32) -> Option<f32> {
        if !v.is_finite() {
            return None;
        }
        if v <= self.lower {
            Some(0.0)
        } else if v >= self.upper {
            Some(255.0)
        } else {
            // 255, not 256.
            Some((v - self.lower) / self.width() * 255.0)
        }
    }
}

/// 过滤非有限值后升序排序.
pub fn sorted_finite<I: IntoIterator<Item = f32>>(values: I) -> Vec<f32> {
    let mut v: Vec<f32> = values.into_iter().filter(|x| x.is_finite()).collect();
    v.sort_unstable_by_key(|x| OrderedFloat(*x));
    v
}

/// 已排序数据的第 `q` 百分位数 (0~100), 在相邻秩之间线性插值 (numpy 默认规则).
///
/// 数据为空时返回 `None`.
pub fn percentile_sorted(sorted: &[f32], q: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let rank = q.clamp(0.0, 100.0) / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    let (a, b) = (sorted[lo] as f64, sorted[hi] as f64);
    Some(a + (b - a) * frac)
}
