#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 将按 subject/session 组织的原始结构 MRI 扫描标准化为配准、偏置场校正、
//! 强度归一化、几何规范化后的训练体数据, 并将其中的 2D 切片打包为定长二进制分片.
//!
//! 数值上较重的部分 (仿射配准、偏置场校正、颅骨剥离) 全部委托给外部工具集,
//! 通过 [`tools::ToolRunner`] 调用. 本 crate 负责其余所有控制流.
//!
//! # 注意
//!
//! 1. 体数据在内存中统一按 `(z, H, W)` 组织, 与 nifti 文件中的 `[W, H, z]` 相反.
//!   `z` 即轴向切片方向, 也是切片提取所沿的深度轴.
//! 2. 在非期望情况下 (违反内部不变量), 程序会直接 panic, 而不会导致内存错误.
//!   所有可预期的失败都通过 [`PrepError`] 返回.
//!
//! # 开发计划
//!
//! ### 会话参考体选择 ✅
//!
//! 体素体积最小者优先, 然后体素个数最多者优先, 最后按输入顺序.
//!
//! 实现位于 `mr-berry/src/prep/target.rs`.
//!
//! ### 仿射配准与重采样编排 ✅
//!
//! 目标体只复制并写出恒等变换占位; 其余体调用外部配准、重采样和求逆工具.
//!
//! 实现位于 `mr-berry/src/prep/register.rs`.
//!
//! ### 标准化阶段 ✅
//!
//! 偏置场校正 → 脑掩膜 (只算一次) + 膨胀 → 鲁棒 z-score → 各向同性重采样 →
//! 中心裁剪/填充.
//!
//! 实现位于 `mr-berry/src/prep/*`.
//!
//! ### 并行调度 ✅
//!
//! 有界工作池消费 session 队列, 每个任务返回带标签的成功/失败结果. 单个 session
//! 的失败 (包括 panic) 不会影响其他 session.
//!
//! 实现位于 `mr-berry/src/scheduler.rs`.
//!
//! ### 切片提取与分片打包 ✅
//!
//! 实现位于 `mr-berry/src/shard/*`.
//!
//! ### QC 拼图 ✅
//!
//! 每个训练体写出一张 12 切片的灰度 PNG 拼图, 仅用于人工检查.
//!
//! 实现位于 `mr-berry/src/data/save.rs`.
//!
//! ### 外部工具的超时与看门狗 ⌛️
//!
//! 目前卡死的外部工具会无限期阻塞所在 worker.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引 `(z, h, w)`, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 3D MRI nii 文件基础数据结构.
pub mod data;

pub use data::{BrainMask, IntensityWindow, Modality, MrScan, NiftiHeaderAttr, Volume};

pub mod config;
pub mod consts;
pub mod dataset;
mod error;
pub mod prep;
pub mod prelude;
pub mod scheduler;
pub mod shard;
pub mod tools;

pub use error::{PrepError, PrepResult};
