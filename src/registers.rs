//! Thin wrapper around `PTRACE_GETREGS` for the x86_64 register file.
//! Used by both unwinders: the frame-pointer walker needs `ip`/`bp`
//! directly; the library unwinder seeds its CFI cursor from the same
//! three fields (`ip`, `sp`, `bp`).

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::error::{ProfilerError, Result};

#[derive(Debug, Clone, Copy)]
pub struct Registers {
    pub ip: u64,
    pub sp: u64,
    pub bp: u64,
}

impl Registers {
    pub fn read(tid: libc::pid_t) -> Result<Registers> {
        let regs =
            ptrace::getregs(Pid::from_raw(tid)).map_err(|source| ProfilerError::AttachFailed {
                tid,
                source,
            })?;
        Ok(Registers {
            ip: regs.rip,
            sp: regs.rsp,
            bp: regs.rbp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_are_plain_copy_data() {
        let r = Registers {
            ip: 1,
            sp: 2,
            bp: 3,
        };
        let r2 = r;
        assert_eq!(r2.ip, 1);
    }
}
