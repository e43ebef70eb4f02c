//! The x86_64 frame-pointer chain walker.
//!
//! Dramatically cheaper than CFI-based unwinding, but only correct when
//! the target was compiled with frame pointers retained
//! (`-fno-omit-frame-pointer`). Not portable to other architectures by
//! design — the calling convention it relies on (saved rbp at `[rbp]`,
//! return address at `[rbp+8]`) is x86_64-specific.

use crate::error::Result;
use crate::memory::{Target, WORD_SIZE};
use crate::registers::Registers;

/// Walks the saved-frame-pointer chain starting from the thread's current
/// registers, stopping at a null base pointer, an unreadable page (end of
/// stack, or a leaf function with no frame), or `frame_limit` frames.
///
/// The reference C implementation this is based on had an off-by-typo
/// guard (`--limit <- 0`, parsing as `--limit < -0`) that was almost
/// always false. This version uses explicit decrement-then-check
/// semantics so the cap is exact: `|backtrace| <= frame_limit` holds for
/// every call.
pub fn unwind(target: &mut Target, tid: libc::pid_t, frame_limit: usize) -> Vec<u64> {
    if frame_limit == 0 {
        return Vec::new();
    }

    let regs = match Registers::read(tid) {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };

    let mut ips = Vec::with_capacity(frame_limit);
    ips.push(regs.ip);
    let mut remaining = frame_limit - 1;
    let mut bp = regs.bp;

    while bp != 0 && remaining > 0 {
        match read_frame(target, bp) {
            Ok((new_bp, return_addr)) => {
                ips.push(return_addr);
                bp = new_bp;
                remaining -= 1;
            }
            Err(_) => break, // end of stack
        }
    }

    ips
}

fn read_frame(target: &mut Target, bp: u64) -> Result<(u64, u64)> {
    let new_bp = target.read_word(bp)?;
    let return_addr = target.read_word(bp + WORD_SIZE as u64)?;
    Ok((new_bp, return_addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_frame_limit_yields_empty_stack() {
        // Doesn't touch ptrace at all: frame_limit==0 must short-circuit
        // before any register read is attempted.
        let pid = std::process::id() as libc::pid_t;
        let mut target = Target::open(pid).expect("open /proc/self/mem");
        assert_eq!(unwind(&mut target, pid, 0), Vec::<u64>::new());
    }
}
