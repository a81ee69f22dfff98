//! 命令行工具依赖的通用组件.

use log::LevelFilter;
use simple_logger::SimpleLogger;

pub mod loader;

/// 运行汇总的边框.
const SUMMARY_RULE: &str = "========================================================";

/// 在标准输出打印汇总边框. `structprep` 与 `make-shards` 用它包围最终的会话/分片汇总,
/// 使其与日志输出区分开.
#[inline]
pub fn sep() {
    println!("{SUMMARY_RULE}");
}

/// 主机可用核心数, 用于 `structprep` 启动时报告 `jobs * omp` 的线程预算.
///
/// 优先使用标准库的可用并行度 (会考虑 cgroup 限额), 失败时退回 `num_cpus`.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 安装全局日志. `verbose` 为 0 时只输出 info 及以上, 1 时输出 debug, 更多时输出 trace.
pub fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // 重复安装只会失败, 不影响已有的日志.
    let _ = SimpleLogger::new().with_level(level).init();
}
