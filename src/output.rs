//! Output formatting. Peripheral to the sampling engine, but the only
//! thing a human operator actually looks at.

use std::time::Duration;

use libc::pid_t;

use crate::histogram::Histogram;

/// Single-sample mode: for each attached tid, a blank line, `Thread: <tid>`,
/// then one `ip = <hex> <<name>>+<decimal-offset>` line per frame.
pub fn print_thread_backtrace(tid: pid_t, frames: &[(u64, String, u64)]) {
    println!();
    println!("Thread: {}", tid);
    for (ip, name, offset) in frames {
        println!("ip = {:x} <{}>+{}", ip, name, offset);
    }
}

/// Multi-sample aggregated report: blank-line separator, up to 20
/// `  <count>  <pct>%  <stack>` lines, then the suspension-ratio summary.
pub fn print_report(histogram: &Histogram, suspend_time: Duration, total_elapsed: Duration) {
    println!();
    let total = histogram.total_backtraces.max(1);
    for (key, count) in histogram.top_20() {
        let pct = 100.0 * count as f64 / total as f64;
        println!("  {}  {:.1}%  {}", count, pct, key);
    }

    let elapsed_secs = total_elapsed.as_secs_f64();
    let suspend_pct = if elapsed_secs > 0.0 {
        100.0 * suspend_time.as_secs_f64() / elapsed_secs
    } else {
        0.0
    };
    println!(
        "Target process suspended {:.2}% of {:.2} seconds",
        suspend_pct, elapsed_secs
    );
}
