//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::{Affine, BrainMask, Modality, MrScan, NiftiHeaderAttr, Volume};
pub use crate::{PrepError, PrepResult};

pub use crate::config::{MaskAggressiveness, ProcConfig, ShardSpec, SliceSpec};

pub use crate::dataset::derivatives::{discover, DerivedVolume, DiscoverFilter};
pub use crate::dataset::home_dataset_dir_with;

pub use crate::prep::{process_session, SessionReport};
pub use crate::scheduler::{enumerate_work, RunSummary, WorkItem};

pub use crate::shard::{pack, ShardReader, SliceRecord};
pub use crate::tools::{CommandRunner, FakeRunner, ThreadEnv, ToolPaths, ToolRunner};
