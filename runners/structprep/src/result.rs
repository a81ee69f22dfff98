//! 运行结果.

use mr_berry::scheduler::RunSummary;

/// 打印运行汇总. 失败的会话只汇总, 不影响退出状态.
pub fn report(summary: &RunSummary) {
    utils::sep();
    println!(
        "Sessions: {} completed, {} failed (of {})",
        summary.completed.len(),
        summary.failed.len(),
        summary.total()
    );
    for r in summary.completed.iter() {
        println!(
            "  ✓ {} {}: {} volume(s), {} QC warning(s)",
            r.subject,
            r.session,
            r.training.len(),
            r.qc_warnings
        );
    }
    for (item, msg) in summary.failed.iter() {
        println!("  ✗ {item}: {msg}");
    }
    utils::sep();
}
