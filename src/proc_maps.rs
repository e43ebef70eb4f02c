//! Parses `/proc/<pid>/maps` into the set of mappings the rest of the
//! engine cares about: their address range, whether they're safe to cache
//! across samples (read-only, not writable), and which file backs them
//! (needed by the symbol resolver and the library unwinder to locate ELF
//! sections).

use std::fs;
use std::path::PathBuf;

use libc::pid_t;

/// One line of `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub start: u64,
    pub end: u64,
    /// True iff `perms` starts with `r` and the write bit is `-`.
    pub read_only: bool,
    /// Offset into `path` at which this mapping starts, or 0 for anonymous.
    pub file_offset: u64,
    /// Backing file, if any (`None` for anonymous/stack/heap mappings).
    pub path: Option<PathBuf>,
}

impl MapEntry {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// A mapping backed by a real, still-present regular file: one we can
    /// re-open from the filesystem to pull ELF symbol/debug sections out of.
    pub fn has_loadable_file(&self) -> bool {
        match &self.path {
            None => false,
            Some(p) => {
                let s = p.to_string_lossy();
                !s.starts_with('[') && !s.ends_with("(deleted)") && !s.starts_with("/memfd:")
            }
        }
    }
}

/// Read-only interval used by the page cache to decide what survives
/// `evict_volatile`. Kept distinct from `MapEntry` since it only ever
/// needs `{start, end}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOnlyMap {
    pub start: u64,
    pub end: u64,
}

impl ReadOnlyMap {
    pub fn contains_page(&self, page_base: u64) -> bool {
        page_base >= self.start && page_base < self.end
    }
}

/// Parse failures here are non-fatal to the caller: an empty map set just
/// means the page cache gets fully evicted every sample instead of keeping
/// code pages warm.
pub fn parse_maps(pid: pid_t) -> std::io::Result<Vec<MapEntry>> {
    let contents = fs::read_to_string(format!("/proc/{}/maps", pid))?;
    let mut entries = Vec::new();
    for line in contents.lines() {
        if let Some(entry) = parse_line(line) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

pub fn read_only_maps(entries: &[MapEntry]) -> Vec<ReadOnlyMap> {
    entries
        .iter()
        .filter(|e| e.read_only)
        .map(|e| ReadOnlyMap {
            start: e.start,
            end: e.end,
        })
        .collect()
}

fn parse_line(line: &str) -> Option<MapEntry> {
    // Format: "start-end perms offset dev inode path"
    let mut fields = line.splitn(6, ' ').filter(|s| !s.is_empty());
    let range = fields.next()?;
    let perms = fields.next()?;
    let offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;
    let path = fields.next().map(|s| s.trim_start());

    let (start_s, end_s) = range.split_once('-')?;
    let start = u64::from_str_radix(start_s, 16).ok()?;
    let end = u64::from_str_radix(end_s, 16).ok()?;
    let file_offset = u64::from_str_radix(offset, 16).ok()?;

    // A mapping is read-only iff perms[0] == 'r' and perms[1] == '-'.
    let perm_bytes = perms.as_bytes();
    let read_only = perm_bytes.first() == Some(&b'r') && perm_bytes.get(1) == Some(&b'-');

    Some(MapEntry {
        start,
        end,
        read_only,
        file_offset,
        path: path
            .filter(|p| !p.is_empty())
            .map(PathBuf::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_read_only_mapping() {
        let line = "55a1b9a4b000-55a1b9a4c000 r--p 00000000 08:01 123456 /usr/bin/sleep";
        let entry = parse_line(line).unwrap();
        assert_eq!(entry.start, 0x55a1b9a4b000);
        assert_eq!(entry.end, 0x55a1b9a4c000);
        assert!(entry.read_only);
        assert_eq!(entry.path, Some(PathBuf::from("/usr/bin/sleep")));
    }

    #[test]
    fn parses_writable_mapping_as_not_read_only() {
        let line = "7f0000000000-7f0000021000 rw-p 00000000 00:00 0 ";
        let entry = parse_line(line).unwrap();
        assert!(!entry.read_only);
    }

    #[test]
    fn executable_read_only_text_segment_is_still_read_only() {
        // perms[1] is the write bit; r-xp is read-only despite being executable.
        let line = "55a1b9a49000-55a1b9a4b000 r-xp 00000000 08:01 123456 /usr/bin/sleep";
        let entry = parse_line(line).unwrap();
        assert!(entry.read_only);
    }

    #[test]
    fn anonymous_mapping_has_no_path() {
        let line = "7ffe00000000-7ffe00021000 rw-p 00000000 00:00 0 [stack]";
        let entry = parse_line(line).unwrap();
        assert_eq!(entry.path, Some(PathBuf::from("[stack]")));
        assert!(!entry.has_loadable_file());
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        assert!(parse_line("garbage").is_none());
    }

    #[test]
    fn read_only_maps_projects_only_safe_intervals() {
        let entries = vec![
            MapEntry {
                start: 0x1000,
                end: 0x2000,
                read_only: true,
                file_offset: 0,
                path: None,
            },
            MapEntry {
                start: 0x2000,
                end: 0x3000,
                read_only: false,
                file_offset: 0,
                path: None,
            },
        ];
        let ro = read_only_maps(&entries);
        assert_eq!(ro.len(), 1);
        assert!(ro[0].contains_page(0x1000));
        assert!(!ro[0].contains_page(0x2000));
    }
}
