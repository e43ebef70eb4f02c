//! The two interchangeable unwinding strategies: a CFI-based walker
//! realizing the "Library Unwinder" contract, and a direct frame-pointer
//! chain walker.

pub mod frame_pointer;
pub mod library;

use crate::memory::Target;
use crate::modules::ModuleTable;

/// Per-thread persistent state. The library unwinder keeps a reusable CFI
/// scratch context here; the frame-pointer walker needs nothing beyond the
/// last captured sequence, which the Sampler tracks separately.
pub enum ThreadInfo {
    Library(library::UnwindContext),
    FramePointer,
}

impl ThreadInfo {
    pub fn new_for(method: Method) -> ThreadInfo {
        match method {
            Method::Library => ThreadInfo::Library(library::UnwindContext::new()),
            Method::FramePointer => ThreadInfo::FramePointer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Library,
    FramePointer,
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "library" | "libunwind" => Ok(Method::Library),
            "frame_pointer" | "framepointer" => Ok(Method::FramePointer),
            other => Err(format!("unknown unwind method {:?}", other)),
        }
    }
}

/// Produces a bounded, innermost-first sequence of instruction pointers
/// for one frozen thread. A failure to initialize aborts this thread's
/// backtrace only — the caller proceeds to the next thread.
pub fn unwind(
    method: Method,
    target: &mut Target,
    modules: &mut ModuleTable,
    tid: libc::pid_t,
    info: &mut ThreadInfo,
    frame_limit: usize,
) -> Vec<u64> {
    match (method, info) {
        (Method::Library, ThreadInfo::Library(ctx)) => {
            library::unwind(target, modules, tid, ctx, frame_limit)
        }
        (Method::FramePointer, ThreadInfo::FramePointer) => {
            frame_pointer::unwind(target, tid, frame_limit)
        }
        _ => {
            // A ThreadInfo created for the other method; shouldn't happen
            // since the Sampler always creates it for the active method,
            // but fail safe rather than panic on a frozen target.
            Vec::new()
        }
    }
}
