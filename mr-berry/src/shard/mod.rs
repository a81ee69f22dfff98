//! 切片提取与分片打包.
//!
//! 分片文件 `<prefix>_<NNN>.shard` 是若干条 `bincode` 编码的 [`SliceRecord`] 首尾相接,
//! 用 [`ShardReader`] 依次读回.

pub mod pack;
pub mod reader;
pub mod record;
pub mod slices;

pub use pack::{pack, plan_shards, PackSummary, ShardOutcome, ShardPlan};
pub use reader::ShardReader;
pub use record::{CompactArray, SampleMeta, SliceRecord};
pub use slices::{extract, SliceSample};
