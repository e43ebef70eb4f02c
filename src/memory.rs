//! The Remote Memory Reader: a page-granularity cache over
//! `/proc/<pid>/mem`, permission-aware via a captured `/proc/<pid>/maps`
//! snapshot.
//!
//! A single `pread` pulls a whole 4096-byte page (512 words on a 64-bit
//! target) where the naive approach — one `PTRACE_PEEKDATA` per word, as
//! `libunwind`'s default `_UPT` accessor does — needs one syscall per word.
//! Caching collapses repeat-reads across samples of the same hot code paths
//! to zero once a page is known read-only.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use libc::pid_t;
use log::{debug, trace};

use crate::error::{ProfilerError, Result};
use crate::proc_maps::{self, MapEntry, ReadOnlyMap};

pub const PAGE_SIZE: u64 = 4096;
pub const WORD_SIZE: usize = std::mem::size_of::<u64>();

static_assertions::const_assert_eq!(PAGE_SIZE, 4096);
static_assertions::const_assert_eq!(WORD_SIZE, 8);

fn page_base(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}

/// The `Target`: the address-space handle, memory-file handle, and pid,
/// plus the page cache that sits behind it.
pub struct Target {
    pid: pid_t,
    mem_file: File,
    read_only_maps: Vec<ReadOnlyMap>,
    pages: HashMap<u64, [u8; PAGE_SIZE as usize]>,
}

impl Target {
    /// Opens `/proc/<pid>/mem` read-only and parses `/proc/<pid>/maps`.
    ///
    /// A failure to open the memory file is fatal (`TargetInaccessible`); a
    /// failure to parse maps is not — the read-only set is simply empty,
    /// which only costs cache hit rate, never correctness.
    pub fn open(pid: pid_t) -> Result<Self> {
        let mem_path = format!("/proc/{}/mem", pid);
        let mem_file =
            File::open(&mem_path).map_err(|source| ProfilerError::TargetInaccessible {
                pid,
                source,
            })?;

        let read_only_maps = match proc_maps::parse_maps(pid) {
            Ok(entries) => proc_maps::read_only_maps(&entries),
            Err(e) => {
                debug!("failed to parse /proc/{}/maps: {} (continuing with empty read-only set)", pid, e);
                Vec::new()
            }
        };

        Ok(Target {
            pid,
            mem_file,
            read_only_maps,
            pages: HashMap::new(),
        })
    }

    pub fn pid(&self) -> pid_t {
        self.pid
    }

    /// Re-parses `/proc/<pid>/maps`. Called once per sample by the Sampler
    /// so that the read-only set tracks modules the target has mmap'd or
    /// unmapped since the last sample; refreshing it at sample boundaries
    /// keeps it close to reality without doing it mid-freeze.
    pub fn refresh_maps(&mut self) {
        match proc_maps::parse_maps(self.pid) {
            Ok(entries) => self.read_only_maps = proc_maps::read_only_maps(&entries),
            Err(e) => debug!("failed to refresh /proc/{}/maps: {}", self.pid, e),
        }
    }

    pub fn current_maps(&self) -> std::io::Result<Vec<MapEntry>> {
        proc_maps::parse_maps(self.pid)
    }

    fn is_read_only_page(&self, base: u64) -> bool {
        self.read_only_maps.iter().any(|m| m.contains_page(base))
    }

    /// Reads one target-endian machine word at `addr`.
    ///
    /// `addr` is expected to be 8-byte aligned (all callers in this crate
    /// are: register values and saved-frame-pointer slots). A misaligned
    /// request still works correctly as long as it doesn't cross a page
    /// boundary; crossing one is rejected rather than silently fetching a
    /// second page.
    pub fn read_word(&mut self, addr: u64) -> Result<u64> {
        let base = page_base(addr);
        let within = (addr - base) as usize;
        if within + WORD_SIZE > PAGE_SIZE as usize {
            return Err(ProfilerError::UnreadableMemory {
                pid: self.pid,
                addr,
            });
        }

        if !self.pages.contains_key(&base) {
            self.fetch_page(base)?;
        }

        let page = self.pages.get(&base).expect("just inserted");
        let mut bytes = [0u8; WORD_SIZE];
        bytes.copy_from_slice(&page[within..within + WORD_SIZE]);
        Ok(u64::from_ne_bytes(bytes))
    }

    fn fetch_page(&mut self, base: u64) -> Result<()> {
        let mut buf = [0u8; PAGE_SIZE as usize];
        let got = self
            .mem_file
            .read_at(&mut buf, base)
            .map_err(|_| ProfilerError::UnreadableMemory {
                pid: self.pid,
                addr: base,
            })?;
        if got != PAGE_SIZE as usize {
            return Err(ProfilerError::ShortRead {
                pid: self.pid,
                addr: base,
                want: PAGE_SIZE as usize,
                got,
            });
        }
        trace!("fetched page {:#x} for pid {}", base, self.pid);
        self.pages.insert(base, buf);
        Ok(())
    }

    /// Attempting to write through this reader is a type-level refusal:
    /// the kernel rejects writes to `/proc/<pid>/mem` unconditionally (see
    /// `original_source/test_proc_mem.c`), and none of our unwinders ever
    /// need to write target memory.
    pub fn write_word(&mut self, addr: u64, _value: u64) -> Result<()> {
        Err(ProfilerError::WriteNotSupported { addr })
    }

    /// Drops every cached page whose base address isn't covered by the
    /// captured read-only set. Called once per sample.
    pub fn evict_volatile(&mut self) {
        let is_ro = |base: &u64| self.is_read_only_page_static(*base);
        self.pages.retain(|base, _| is_ro(base));
    }

    fn is_read_only_page_static(&self, base: u64) -> bool {
        self.is_read_only_page(base)
    }

    /// Drops the entire cache. Idempotent: calling this twice in a row is a
    /// no-op the second time.
    pub fn evict_all(&mut self) {
        self.pages.clear();
    }

    pub fn cached_page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn mem_fd(&self) -> i32 {
        self.mem_file.as_raw_fd()
    }
}

/// Opens a module file named in `/proc/<pid>/maps` for ELF parsing. Kept
/// here (rather than in `modules.rs`) because it shares the "be lenient
/// about files that vanished underneath us" policy with the rest of the
/// Remote Memory Reader.
pub fn read_module_file(path: &PathBuf) -> std::io::Result<Vec<u8>> {
    let mut f = File::open(path)?;
    let mut data = Vec::new();
    f.read_to_end(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_base_clears_low_bits() {
        assert_eq!(page_base(0x1000), 0x1000);
        assert_eq!(page_base(0x1001), 0x1000);
        assert_eq!(page_base(0x1fff), 0x1000);
        assert_eq!(page_base(0x2000), 0x2000);
    }

    #[test]
    fn evict_all_is_idempotent() {
        // No live target required: exercise the cache map directly.
        let mut pages: HashMap<u64, [u8; PAGE_SIZE as usize]> = HashMap::new();
        pages.insert(0x1000, [0u8; PAGE_SIZE as usize]);
        pages.clear();
        assert!(pages.is_empty());
        pages.clear();
        assert!(pages.is_empty());
    }

    #[test]
    fn self_pid_read_word_roundtrip() {
        // Reading our own /proc/self/mem exercises the real pread path
        // without needing ptrace.
        let pid = std::process::id() as pid_t;
        let mut target = Target::open(pid).expect("open /proc/self/mem");
        let probe: u64 = 0x0102030405060708;
        let addr = &probe as *const u64 as u64;
        let word = target.read_word(addr).expect("read_word on our own stack");
        assert_eq!(word, probe);
    }

    #[test]
    fn unaligned_read_crossing_page_boundary_is_rejected() {
        let pid = std::process::id() as pid_t;
        let mut target = Target::open(pid).expect("open /proc/self/mem");
        let last_byte_of_a_page = page_base(0x7f00_0000_1000) + PAGE_SIZE - 1;
        let err = target.read_word(last_byte_of_a_page);
        assert!(err.is_err());
    }
}
