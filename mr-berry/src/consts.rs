//! 通用常量.

/// 单通道颜色与掩膜体素值.
pub mod gray {
    /// 掩膜中背景的体素值.
    pub const MASK_BACKGROUND: u8 = 0;

    /// 掩膜中脑组织的体素值.
    pub const MASK_BRAIN: u8 = 1;

    /// 单通道黑色.
    pub const BLACK: u8 = 0b_0000_0000;

    /// 单通道白色.
    pub const WHITE: u8 = 0b_1111_1111;

    /// 体素是否是脑组织?
    #[inline]
    pub const fn is_brain(p: u8) -> bool {
        p != MASK_BACKGROUND
    }

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        p == MASK_BACKGROUND
    }
}

/// 强度归一化时使用的下分位数 (百分比).
pub const NORM_LOWER_PERCENTILE: f64 = 0.5;

/// 强度归一化时使用的上分位数 (百分比).
pub const NORM_UPPER_PERCENTILE: f64 = 99.5;

/// 掩膜体素少于该值时, 归一化退化为整体统计.
pub const NORM_MIN_MASK_VOXELS: usize = 10;

/// 加到标准差上的正下限, 避免除零.
pub const NORM_STD_FLOOR: f64 = 1e-6;

/// QC: 掩膜体素个数下限.
pub const QC_MIN_MASK_VOXELS: usize = 10_000;

/// QC: 掩膜占体积的比例上限.
pub const QC_MAX_MASK_FRACTION: f64 = 0.9;

/// QC: 归一化后掩膜内标准差下限.
pub const QC_MIN_POST_STD: f64 = 1e-4;

/// 颅骨剥离后二值化所用的强度阈值.
pub const MASK_BINARIZE_MIN: u32 = 1;

/// 分水岭颅骨剥离的预洪泛高度.
pub const WATERSHED_PREFLOOD: u32 = 30;

/// 目标选择时判断体素体积 "相等" 的相对容差.
pub const VOXEL_VOLUME_RTOL: f64 = 1e-5;

/// 目标选择时判断体素体积 "相等" 的绝对容差.
pub const VOXEL_VOLUME_ATOL: f64 = 1e-8;

/// QC 拼图的切片个数.
pub const QC_MOSAIC_SLICES: usize = 12;

/// QC 拼图每行的切片个数.
pub const QC_MOSAIC_COLUMNS: usize = 6;

/// 默认模态列表.
pub const DEFAULT_MODALITIES: [&str; 3] = ["T1w", "T2w", "FLAIR"];
