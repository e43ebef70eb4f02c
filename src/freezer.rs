//! The Thread Freezer: attaches to every thread of a target process with
//! minimal wall-clock window, and detaches them all afterwards.

use std::collections::HashSet;
use std::fs;

use libc::pid_t;
use log::warn;
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;

use crate::error::{ProfilerError, Result};

/// The set of thread ids attached during the current freeze cycle.
/// Cleared at the start of every `freeze()` call and fully drained by
/// `thaw()`.
pub type ThreadSet = HashSet<pid_t>;

/// Lists the tids currently present in `/proc/<pid>/task`. A failure here
/// almost always means the target has exited; the caller decides whether
/// that's fatal.
fn list_tids(pid: pid_t) -> std::io::Result<HashSet<pid_t>> {
    let task_dir = format!("/proc/{}/task", pid);
    let mut tids = HashSet::new();
    for entry in fs::read_dir(task_dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Ok(tid) = name.parse::<pid_t>() {
                tids.insert(tid);
            }
        }
    }
    Ok(tids)
}

/// Repeatedly enumerates `/proc/<pid>/task`, attaching to tids not yet
/// seen, until a pass discovers zero new threads.
///
/// This races thread creation in the target: because attaches are sticky
/// (an already-attached thread can't un-appear from `/proc/<pid>/task`),
/// the loop is guaranteed to converge — every pass either attaches at
/// least one new thread or terminates.
pub fn freeze(pid: pid_t) -> Result<ThreadSet> {
    let mut attached: ThreadSet = HashSet::new();

    loop {
        let current = list_tids(pid).map_err(|source| ProfilerError::TargetInaccessible {
            pid,
            source,
        })?;

        let new_tids: Vec<pid_t> = current.difference(&attached).copied().collect();
        if new_tids.is_empty() {
            break;
        }

        for &tid in &new_tids {
            match ptrace::attach(Pid::from_raw(tid)) {
                Ok(()) => {
                    attached.insert(tid);
                }
                Err(Errno::ESRCH) => {
                    // Thread exited before we could attach; not an error.
                }
                Err(e) => {
                    thaw(&attached);
                    return Err(ProfilerError::AttachFailed { tid, source: e });
                }
            }
        }

        for &tid in &new_tids {
            if !attached.contains(&tid) {
                continue; // raced an exit during attach above
            }
            match waitpid(Pid::from_raw(tid), Some(WaitPidFlag::__WALL)) {
                Ok(_) => {}
                Err(e) => {
                    warn!("waitpid({}) failed during freeze: {}", tid, e);
                }
            }
        }
    }

    Ok(attached)
}

/// Detaches every tid in `attached`. Detach errors are logged and
/// swallowed — the target may have died, and a failed detach of a dead
/// thread isn't actionable.
pub fn thaw(attached: &ThreadSet) {
    for &tid in attached {
        if let Err(e) = ptrace::detach(Pid::from_raw(tid), None) {
            warn!("ptrace(PTRACE_DETACH, {}) returned error: {}", tid, e);
        }
    }
}
