//! The "Library Unwinder", realized with `gimli`'s CFI (Call Frame
//! Information) machinery instead of linking an external `libunwind`. The
//! narrow interface this unwinder exposes maps onto gimli's types almost
//! directly:
//!
//! - "create an address space bound to a memory-access callback" -> a
//!   `gimli::EhFrame` parsed from a module's `.eh_frame` section, with the
//!   Remote Memory Reader supplying the actual stack/register reads.
//! - "create per-thread unwind state from a thread id" -> `UnwindContext`,
//!   below; gimli's own `gimli::UnwindContext` is the CFI evaluator's
//!   scratch space and is explicitly designed to be reused across lookups,
//!   which is exactly the "create lazily, reuse across samples" lifecycle
//!   this unwinder needs for the per-thread handle.
//! - "initialize a remote cursor; step; read the instruction-pointer
//!   register" -> `step_frame` below, evaluating one `UnwindTableRow`.
//!
//! A failure to find CFI for an address (unsupported module, stripped
//! `.eh_frame`, corrupt data) aborts *this thread's* backtrace only.

use gimli::{BaseAddresses, CfaRule, EhFrame, NativeEndian, RegisterRule, UnwindSection, X86_64};

use crate::memory::Target;
use crate::modules::ModuleTable;
use crate::registers::Registers;

/// Per-thread CFI scratch context, created lazily on first sighting of a
/// tid and reused across samples.
pub struct UnwindContext {
    inner: gimli::UnwindContext<gimli::EndianSlice<'static, NativeEndian>>,
}

impl UnwindContext {
    pub fn new() -> Self {
        UnwindContext {
            inner: gimli::UnwindContext::new(),
        }
    }
}

/// Current unwind cursor state: the registers a CFI step needs to compute
/// the caller's frame.
#[derive(Clone, Copy)]
struct CursorRegs {
    pc: u64,
    sp: u64,
    bp: u64,
}

pub fn unwind(
    target: &mut Target,
    modules: &mut ModuleTable,
    tid: libc::pid_t,
    ctx: &mut UnwindContext,
    frame_limit: usize,
) -> Vec<u64> {
    let regs = match Registers::read(tid) {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };

    // `modules` is the Sampler's long-lived, process-global module table:
    // it's synced from a fresh `/proc/<pid>/maps` read once per sample,
    // before any thread is unwound, and its per-module symbol/CFI data is
    // cached forever after first use.
    let mut cursor = CursorRegs {
        pc: regs.ip,
        sp: regs.sp,
        bp: regs.bp,
    };

    let mut ips = Vec::with_capacity(frame_limit);
    ips.push(cursor.pc);

    let mut remaining = frame_limit.saturating_sub(1);
    while remaining > 0 {
        match step_frame(target, modules, ctx, cursor) {
            Some((next, return_addr)) if return_addr != 0 => {
                ips.push(return_addr);
                cursor = next;
                remaining -= 1;
            }
            _ => break,
        }
    }

    ips
}

/// Evaluates one `UnwindTableRow` for `regs.pc`, returning the caller's
/// `(pc, sp, bp)` and the return address pushed onto the IP sequence.
fn step_frame(
    target: &mut Target,
    modules: &mut ModuleTable,
    ctx: &mut UnwindContext,
    regs: CursorRegs,
) -> Option<(CursorRegs, u64)> {
    let module = modules.module_for(regs.pc)?;
    let (section_data, runtime_addr) = module.eh_frame_section()?;

    // SAFETY-free: EndianSlice borrows `section_data` only for the
    // duration of this call; gimli never retains it past `unwind_info_for_address`.
    let eh_frame = EhFrame::new(section_data, NativeEndian);
    let bases = BaseAddresses::default().set_eh_frame(runtime_addr);

    let row = eh_frame
        .unwind_info_for_address(&bases, &mut ctx.inner, regs.pc, EhFrame::cie_from_offset)
        .ok()?;

    let cfa = match row.cfa() {
        CfaRule::RegisterAndOffset { register, offset } => {
            let base = match *register {
                X86_64::RSP => regs.sp,
                X86_64::RBP => regs.bp,
                _ => return None,
            };
            (base as i64 + offset) as u64
        }
        CfaRule::Expression(_) => return None,
    };

    let return_addr = match row.register(X86_64::RA) {
        RegisterRule::Offset(offset) => {
            let addr = (cfa as i64 + offset) as u64;
            target.read_word(addr).ok()?
        }
        RegisterRule::Undefined => 0,
        _ => return None,
    };

    let new_bp = match row.register(X86_64::RBP) {
        RegisterRule::Offset(offset) => {
            let addr = (cfa as i64 + offset) as u64;
            target.read_word(addr).ok()?
        }
        _ => regs.bp,
    };

    if cfa == regs.sp {
        // CFA didn't move: we'd spin on the same frame forever.
        return None;
    }

    Some((
        CursorRegs {
            pc: return_addr,
            sp: cfa,
            bp: new_bp,
        },
        return_addr,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwind_context_is_reusable() {
        let mut ctx = UnwindContext::new();
        // Constructing twice and dropping the first must not panic or
        // leak; this is the whole contract we rely on for per-thread
        // reuse across samples.
        let _ctx2 = UnwindContext::new();
        drop(ctx);
        ctx = UnwindContext::new();
        drop(ctx);
    }
}
