//! Local in-process self-backtrace demo. Peripheral to the sampling engine,
//! kept only because it exercises the same `ip = <hex> <name>+<offset>`
//! formatting as `output::print_thread_backtrace` without requiring a
//! second process or ptrace at all.
//!
//! Grounded on the libunwind docs example this profiler's own test suite
//! traces to: `func` recurses a fixed number of times, then the leaf frame
//! walks its own stack and prints it.

fn show_backtrace() {
    backtrace::trace(|frame| {
        let ip = frame.ip() as usize;

        let mut name = "??".to_string();
        let mut offset = 0u64;
        backtrace::resolve_frame(frame, |symbol| {
            if let Some(symbol_name) = symbol.name() {
                name = symbol_name.to_string();
            }
            if let Some(addr) = symbol.addr() {
                offset = (ip as u64).saturating_sub(addr as u64);
            }
        });

        println!("ip = {:x} <{}>+{}", ip, name, offset);
        true // keep walking
    });
}

fn func(x: u32) {
    if x > 0 {
        func(x - 1);
    } else {
        show_backtrace();
    }
}

fn main() {
    let depth = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(3);
    func(depth);
}
