//! 顺序读取分片.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::record::SliceRecord;
use crate::PrepResult;

/// 分片记录迭代器. 记录按写入次序返回.
pub struct ShardReader {
    reader: BufReader<File>,
}

impl ShardReader {
    /// 打开分片文件.
    pub fn open<P: AsRef<Path>>(path: P) -> PrepResult<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
        })
    }

    /// 读出全部记录.
    pub fn read_all<P: AsRef<Path>>(path: P) -> PrepResult<Vec<SliceRecord>> {
        Self::open(path)?.collect()
    }
}

impl Iterator for ShardReader {
    type Item = PrepResult<SliceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let at_end = match self.reader.fill_buf() {
            Ok(buf) => buf.is_empty(),
            Err(e) => return Some(Err(e.into())),
        };
        if at_end {
            return None;
        }
        Some(bincode::deserialize_from(&mut self.reader).map_err(Into::into))
    }
}
