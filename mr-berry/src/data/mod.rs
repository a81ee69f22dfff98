use std::fmt;
use std::ops::{Index, IndexMut};
use std::path::Path;
use std::str::FromStr;

use ndarray::{Array3, ArrayView2, ArrayView3, ArrayViewMut3, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use serde::{Deserialize, Serialize};

use crate::consts::gray::*;
use crate::{Idx2d, Idx3d, PrepError, PrepResult};

pub mod affine;
pub mod morph;
pub mod orient;
pub mod save;
pub mod window;

pub use affine::Affine;
pub use window::IntensityWindow;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 3D MRI nii 文件 header 的共用属性和部分通用操作.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取数据水平切片形状大小.
    #[inline]
    fn slice_shape(&self) -> Idx2d {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表空间 (相邻切片方向),
    /// 高 (自然图像的垂直方向), 宽 (自然图像的水平方向).
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64].map(f64::abs)
    }

    /// 体素分辨率在三个维度上是否是各向同的?
    #[inline]
    fn is_isotropic(&self) -> bool {
        let [z, h, w] = self.pix_dim();
        z == h && z == w
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 体素到物理空间的仿射.
    #[inline]
    fn affine(&self) -> Affine {
        Affine::from_header(self.header())
    }

    /// 方向编码, 如 `"RAS"`. 仿射奇异时返回 `None`.
    #[inline]
    fn axcodes(&self) -> Option<String> {
        self.affine().axcodes().ok()
    }
}

impl NiftiHeaderAttr for NiftiHeader {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        self
    }
}

/// 仅读取 nii 文件 header. 不加载体数据.
#[inline]
pub fn read_header<P: AsRef<Path>>(path: P) -> PrepResult<NiftiHeader> {
    Ok(NiftiHeader::from_file(path.as_ref())?)
}

/// nii 格式 3D 体数据, 包括 header 和体素数组.
///
/// 数组按 `(z, H, W)` 存储, header 中的 `dim` 始终与数组形状保持一致.
#[derive(Debug, Clone)]
pub struct Volume<T> {
    header: BoxedHeader,
    data: Array3<T>,
}

/// 强度体数据. 体素值以 `f32` 保存.
pub type MrScan = Volume<f32>;

/// 二值脑掩膜. 体素值为 [`MASK_BACKGROUND`] 或 [`MASK_BRAIN`].
pub type BrainMask = Volume<u8>;

impl<T> NiftiHeaderAttr for Volume<T> {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<Idx3d> for Volume<T> {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

/// 读取任意数据类型的 nii 文件, 转为 `f32` 的 `(z, H, W)` 数组.
///
/// 高于三维的数据只保留第一帧.
fn read_f32<P: AsRef<Path>>(path: P) -> PrepResult<(BoxedHeader, Array3<f32>)> {
    let obj = ReaderOptions::new().read_file(path.as_ref())?;
    let header = Box::new(obj.header().clone());

    let mut data = obj.into_volume().into_ndarray::<f32>()?;
    while data.ndim() > 3 {
        let last = data.ndim() - 1;
        data = data.index_axis_move(Axis(last), 0);
    }
    let data = data.into_dimensionality::<Ix3>().map_err(|e| {
        crate::PrepError::MissingInput(format!("{} is not a 3D volume: {e}", path.as_ref().display()))
    })?;

    // [W, H, z] -> [z, H, W].
    // hint: 原第一维向下增长, 原第二维向右增长.
    let data = data.permuted_axes([2, 1, 0]).as_standard_layout().into_owned();
    Ok((header, data))
}

impl<T: Copy> Volume<T> {
    /// 由 header 和 `(z, H, W)` 数组直接组装. header 的 `dim` 会按数组形状重写.
    pub fn from_parts(mut header: NiftiHeader, data: Array3<T>) -> Self {
        sync_header(&mut header, data.dim());
        Self {
            header: Box::new(header),
            data,
        }
    }

    /// 以本体的 header 为参考, 换用新的数组与仿射, 生成新体数据.
    ///
    /// 用于重采样、裁剪等会改变网格的操作.
    pub fn with_grid<U: Copy>(&self, data: Array3<U>, affine: &Affine) -> Volume<U> {
        let mut header = (*self.header).clone();
        affine.write_to_header(&mut header);
        Volume::from_parts(header, data)
    }

    /// 替换体素数组, 网格不变. 若形状不一致则程序 panic.
    pub fn with_data<U: Copy>(&self, data: Array3<U>) -> Volume<U> {
        assert_eq!(self.data.dim(), data.dim(), "体数据形状不一致");
        Volume::from_parts((*self.header).clone(), data)
    }

    /// 消费自我, 获得 header 与底层数组.
    #[inline]
    pub fn into_parts(self) -> (NiftiHeader, Array3<T>) {
        (*self.header, self.data)
    }

    /// 获取 3D 体数据 z 空间的第 `z_index` 层切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView2<'_, T> {
        self.data.index_axis(Axis(0), z_index)
    }

    /// 获取能按升序迭代水平切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = ArrayView2<'_, T>> {
        self.data.axis_iter(Axis(0))
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, T> {
        self.data.view_mut()
    }
}

/// `(z, H, W)` 形状对应的 nifti `dim` 字段. 任一维超出 `u16` 时返回错误.
fn nifti_dim((z, h, w): Idx3d) -> PrepResult<[u16; 8]> {
    let narrow = |n: usize| {
        u16::try_from(n).map_err(|_| {
            PrepError::InvalidConfig(format!("dimension {n} of shape {:?} exceeds nifti limit", (z, h, w)))
        })
    };
    let mut dim = [1u16; 8];
    dim[0] = 3;
    dim[1] = narrow(w)?;
    dim[2] = narrow(h)?;
    dim[3] = narrow(z)?;
    Ok(dim)
}

/// 将 header 的 `dim` 与 `(z, H, W)` 形状对齐.
///
/// 内存中的数据已经应用过强度缩放, 因此同时重置 `scl_slope` / `scl_inter`.
/// 超出 nifti 范围的形状保留原 `dim`, 在保存时报错.
fn sync_header(header: &mut NiftiHeader, shape: Idx3d) {
    if let Ok(dim) = nifti_dim(shape) {
        header.dim = dim;
    }
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
}

macro_rules! impl_volume_save {
    ($($t: ty),+) => {
        $(
            impl Volume<$t> {
                /// 以 nii 格式保存到 `path`. 扩展名为 `.nii.gz` 时自动压缩.
                pub fn save<P: AsRef<Path>>(&self, path: P) -> PrepResult<()> {
                    nifti_dim(self.data.dim())?;
                    if let Some(parent) = path.as_ref().parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    // (z, H, W) -> [W, H, z]
                    let view = self.data.view().permuted_axes([2, 1, 0]);
                    WriterOptions::new(path.as_ref())
                        .reference_header(&self.header)
                        .write_nifti(&view)?;
                    Ok(())
                }
            }
        )+
    };
}

impl_volume_save!(f32, u8);

impl MrScan {
    /// 打开 nii 文件格式的 3D MRI 扫描. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> PrepResult<Self> {
        let (header, data) = read_f32(path)?;
        Ok(Self::from_parts(*header, data))
    }

    /// 根据裸数据和体素间距直接创建扫描. `data` 按 `(z, H, W)` 组织,
    /// `spacing` 按 `[z, H, W]` 次序给出, 仿射为对角阵 (即 RAS).
    ///
    /// # 注意
    ///
    /// 该方法主要用于实验和测试.
    pub fn fake(data: Array3<f32>, spacing: [f64; 3]) -> Self {
        Self::fake_with_affine(data, &Affine::diagonal([spacing[2], spacing[1], spacing[0]]))
    }

    /// 与 [`Self::fake`] 相同, 但显式指定仿射.
    pub fn fake_with_affine(data: Array3<f32>, affine: &Affine) -> Self {
        let mut header = NiftiHeader::default();
        header.sform_code = 1;
        header.qform_code = 1;
        affine.write_to_header(&mut header);
        header.intent_name[..4].copy_from_slice(b"fake");
        Self::from_parts(header, data)
    }

    /// 判断该结构是否是由 `fake_*` 方法手动拼接的.
    pub fn is_faked(&self) -> bool {
        self.header.intent_name.starts_with(b"fake")
    }
}

impl BrainMask {
    /// 打开 nii 文件格式的掩膜. 任何大于 0 的体素都视为脑组织.
    pub fn open<P: AsRef<Path>>(path: P) -> PrepResult<Self> {
        let (header, data) = read_f32(path)?;
        Ok(Self::from_parts(
            *header,
            data.mapv(|v| if v > 0.0 { MASK_BRAIN } else { MASK_BACKGROUND }),
        ))
    }

    /// 以 `scan` 的网格为参考, 按谓词 `pred` 构造掩膜.
    pub fn from_predicate(scan: &MrScan, pred: impl Fn(f32) -> bool) -> Self {
        scan.with_data(
            scan.data()
                .mapv(|v| if pred(v) { MASK_BRAIN } else { MASK_BACKGROUND }),
        )
    }

    /// 获取掩膜中脑组织体素的个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.data.iter().filter(|p| is_brain(**p)).count()
    }

    /// 脑组织体素占整体的比例. 空体数据返回 0.
    #[inline]
    pub fn fraction(&self) -> f64 {
        self.count() as f64 / self.size().max(1) as f64
    }

    /// 每个深度索引上的覆盖率, 即该水平切片中脑组织像素所占比例.
    pub fn coverage(&self) -> Vec<f32> {
        self.slice_iter()
            .map(|s| {
                let n = s.len();
                if n == 0 {
                    0.0
                } else {
                    s.iter().filter(|p| is_brain(**p)).count() as f32 / n as f32
                }
            })
            .collect()
    }

    /// 掩膜是否严格二值?
    pub fn is_binary(&self) -> bool {
        self.data
            .iter()
            .all(|p| matches!(*p, MASK_BACKGROUND | MASK_BRAIN))
    }
}

/// 成像模态标签. 序列化为 BIDS 后缀字符串.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Modality {
    /// T1 加权.
    T1w,
    /// T2 加权.
    T2w,
    /// 液体衰减反转恢复.
    Flair,
    /// 其他 BIDS 后缀.
    Other(String),
}

impl Modality {
    /// BIDS 文件名后缀.
    pub fn suffix(&self) -> &str {
        match self {
            Self::T1w => "T1w",
            Self::T2w => "T2w",
            Self::Flair => "FLAIR",
            Self::Other(s) => s.as_str(),
        }
    }

    /// 从文件名推断模态. 依次检查 T1w, T2w, FLAIR.
    pub fn infer(filename: &str) -> Option<Self> {
        [Self::T1w, Self::T2w, Self::Flair]
            .into_iter()
            .find(|m| filename.contains(m.suffix()))
    }
}

impl From<&str> for Modality {
    fn from(s: &str) -> Self {
        match s.trim() {
            "T1w" => Self::T1w,
            "T2w" => Self::T2w,
            "FLAIR" | "flair" | "Flair" => Self::Flair,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for Modality {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<Modality> for String {
    fn from(m: Modality) -> Self {
        m.suffix().to_string()
    }
}

impl FromStr for Modality {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_fake_scan_geometry() {
        let s = MrScan::fake(Array3::zeros((4, 5, 6)), [3.0, 0.9, 0.9]);
        assert_eq!(s.shape(), (4, 5, 6));
        assert_eq!(s.slice_shape(), (5, 6));
        assert!((s.voxel() - 3.0 * 0.81).abs() < 1e-6);
        assert!(!s.is_isotropic());
        assert_eq!(s.axcodes().as_deref(), Some("RAS"));
        assert!(s.is_faked());
    }

    #[test]
    fn test_mask_coverage_and_count() {
        let mut data = Array3::<f32>::zeros((3, 2, 2));
        data[(1, 0, 0)] = 1.0;
        data[(2, 0, 0)] = 1.0;
        data[(2, 1, 1)] = 1.0;
        let scan = MrScan::fake(data, [1.0, 1.0, 1.0]);
        let mask = BrainMask::from_predicate(&scan, |v| v > 0.5);
        assert_eq!(mask.count(), 3);
        assert_eq!(mask.coverage(), vec![0.0, 0.25, 0.5]);
        assert!(mask.is_binary());
        assert!((mask.fraction() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("sub-01_ses-01_T1w.nii.gz");
        let data = Array3::from_shape_fn((3, 4, 5), |(z, h, w)| (z * 100 + h * 10 + w) as f32);
        let scan = MrScan::fake(data.clone(), [2.0, 1.0, 0.5]);
        scan.save(&p).unwrap();

        let back = MrScan::open(&p).unwrap();
        assert_eq!(back.shape(), (3, 4, 5));
        assert_eq!(back.data(), data.view());
        assert_eq!(back.pix_dim(), [2.0, 1.0, 0.5]);

        let header = read_header(&p).unwrap();
        assert_eq!(header.shape(), (3, 4, 5));
    }

    #[test]
    fn test_save_rejects_oversized_dim() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("wide.nii.gz");
        let scan = MrScan::fake(Array3::zeros((1, 1, 70_000)), [1.0; 3]);
        let err = scan.save(&p).unwrap_err();
        assert!(matches!(err, PrepError::InvalidConfig(_)), "{err}");
        assert!(!p.exists());
        assert!(nifti_dim((1, 1, usize::from(u16::MAX))).is_ok());
    }

    #[test]
    fn test_modality_parse() {
        assert_eq!("FLAIR".parse::<Modality>().unwrap(), Modality::Flair);
        assert_eq!(Modality::infer("sub-1_ses-1_T2w_desc-train.nii.gz"), Some(Modality::T2w));
        assert_eq!(Modality::infer("sub-1_ses-1_PDw.nii.gz"), None);
        assert_eq!(Modality::Other("PDw".into()).to_string(), "PDw");
        assert_eq!(serde_json::to_string(&Modality::Flair).unwrap(), r#""FLAIR""#);
        assert_eq!(serde_json::from_str::<Modality>(r#""T2w""#).unwrap(), Modality::T2w);
    }
}
