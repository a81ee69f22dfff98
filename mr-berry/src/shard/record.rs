//! 分片中的单条记录.

use std::io::{Read, Write};
use std::path::PathBuf;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::{Array3, ArrayBase, Data, Ix3};
use ndarray_npy::{ReadNpyExt, ReadableElement, WritableElement, WriteNpyExt};
use serde::{Deserialize, Serialize};

use super::slices::SliceSample;
use crate::dataset::derivatives::DerivedVolume;
use crate::{Modality, PrepResult};

/// zlib 压缩的 `.npy` 负载; 不透明类型.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactArray {
    /// 压缩的不透明字节流.
    buf: Vec<u8>,
}

impl CompactArray {
    /// 以 `.npy` 格式编码后压缩.
    pub fn compress<A, S>(data: &ArrayBase<S, Ix3>) -> PrepResult<Self>
    where
        A: WritableElement,
        S: Data<Elem = A>,
    {
        let mut npy = Vec::with_capacity(128 + data.len() * std::mem::size_of::<A>());
        data.write_npy(&mut npy)?;
        let mut e = ZlibEncoder::new(Vec::with_capacity(npy.len() / 4), Compression::default());
        e.write_all(&npy)?;
        Ok(Self { buf: e.finish()? })
    }

    /// 解压并解码.
    pub fn decompress<A: ReadableElement>(&self) -> PrepResult<Array3<A>> {
        let mut npy = Vec::with_capacity(self.buf.len() * 4);
        ZlibDecoder::new(self.buf.as_slice()).read_to_end(&mut npy)?;
        Ok(Array3::<A>::read_npy(npy.as_slice())?)
    }

    /// 压缩后的字节数.
    #[inline]
    pub fn compressed_len(&self) -> usize {
        self.buf.len()
    }
}

/// 样本的来源与切片选取信息.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleMeta {
    /// subject 标识.
    pub subject: String,
    /// session 标识.
    pub session: String,
    /// 模态.
    pub modality: Modality,
    /// 训练体路径.
    pub train_path: PathBuf,
    /// 会话掩膜路径.
    pub mask_path: PathBuf,
    /// 选中的深度索引.
    pub indices: Vec<usize>,
    /// 每个深度索引的掩膜覆盖率.
    pub coverage_per_slice: Vec<f32>,
    /// 切片组形状 `(count, H, W)`.
    pub slices_shape: [usize; 3],
}

/// 一个样本: 强度切片组, 掩膜切片组, 元数据.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SliceRecord {
    /// 记录键, 即训练体文件名去掉扩展名.
    pub key: String,
    /// 强度切片组, `f32`.
    pub image: CompactArray,
    /// 掩膜切片组, `u8`.
    pub mask: CompactArray,
    /// 元数据.
    pub meta: SampleMeta,
}

impl SliceRecord {
    /// 由训练体描述与提取结果构造记录.
    pub fn new(volume: &DerivedVolume, sample: &SliceSample) -> PrepResult<Self> {
        let (n, h, w) = sample.shape();
        Ok(Self {
            key: volume.key(),
            image: CompactArray::compress(&sample.image)?,
            mask: CompactArray::compress(&sample.mask)?,
            meta: SampleMeta {
                subject: volume.subject.clone(),
                session: volume.session.clone(),
                modality: volume.modality.clone(),
                train_path: volume.train.clone(),
                mask_path: volume.mask.clone(),
                indices: sample.indices.clone(),
                coverage_per_slice: sample.coverage.clone(),
                slices_shape: [n, h, w],
            },
        })
    }

    /// 强度切片组.
    #[inline]
    pub fn image(&self) -> PrepResult<Array3<f32>> {
        self.image.decompress()
    }

    /// 掩膜切片组.
    #[inline]
    pub fn mask(&self) -> PrepResult<Array3<u8>> {
        self.mask.decompress()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_array_is_npy() {
        let a = Array3::from_shape_fn((2, 3, 4), |(z, h, w)| (z * 12 + h * 4 + w) as f32 * 0.5);
        let c = CompactArray::compress(&a).unwrap();
        let mut npy = vec![];
        ZlibDecoder::new(c.buf.as_slice()).read_to_end(&mut npy).unwrap();
        assert!(npy.starts_with(b"\x93NUMPY"));
        assert_eq!(c.decompress::<f32>().unwrap(), a);

        // 元素类型不符时报错而不是误读.
        assert!(c.decompress::<u8>().is_err());
    }

    #[test]
    fn test_record_from_sample() {
        let sample = SliceSample {
            image: Array3::from_elem((2, 4, 4), 1.5),
            mask: Array3::from_elem((2, 4, 4), 1),
            indices: vec![3, 7],
            coverage: vec![0.0, 0.5],
        };
        let volume = DerivedVolume {
            subject: "sub-01".into(),
            session: "ses-01".into(),
            modality: Modality::T1w,
            train: "/d/final/a_T1w_desc-train.nii.gz".into(),
            mask: "/d/final/m.nii.gz".into(),
        };
        let rec = SliceRecord::new(&volume, &sample).unwrap();
        assert_eq!(rec.key, "a_T1w_desc-train");
        assert_eq!(rec.meta.slices_shape, [2, 4, 4]);
        assert_eq!(rec.mask().unwrap(), sample.mask);

        let bytes = bincode::serialize(&rec).unwrap();
        let back: SliceRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, rec);
    }
}
