//! Resolves target virtual addresses to the ELF module (shared object or
//! main executable) that covers them, lazily loading each module's symbol
//! table and unwind (`.eh_frame`) section from its on-disk file the first
//! time an address inside it is needed.
//!
//! This is the address-space-global, process-wide table the Symbol
//! Resolver and Library Unwinder both consult: the routine consults the
//! target's loaded-module table, which is process-global, so thread choice
//! is immaterial.

use std::collections::HashMap;
use std::path::PathBuf;

use goblin::elf::Elf;
use log::debug;

use crate::memory::read_module_file;
use crate::proc_maps::MapEntry;

/// One ELF function symbol, in file-relative (svma) address space.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub value: u64,
    pub size: u64,
    pub name: String,
}

pub struct Module {
    pub path: PathBuf,
    pub start: u64,
    pub end: u64,
    /// `runtime_addr = file_vaddr + bias`
    pub bias: u64,
    symbols: Vec<Symbol>,
    /// Leaked for the engine's lifetime so `gimli::EndianSlice<'static, _>`
    /// can borrow it directly; bounded by the number of distinct modules
    /// the target ever maps, which is small and doesn't grow across
    /// samples (symbols never move and are never evicted once a module is
    /// mapped).
    eh_frame: Option<&'static [u8]>,
    eh_frame_runtime_addr: u64,
    loaded: bool,
}

impl Module {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;

        let data = match read_module_file(&self.path) {
            Ok(d) => d,
            Err(e) => {
                debug!("could not read module file {:?}: {}", self.path, e);
                return;
            }
        };

        let elf = match Elf::parse(&data) {
            Ok(e) => e,
            Err(e) => {
                debug!("could not parse ELF {:?}: {}", self.path, e);
                return;
            }
        };

        let mut symbols = Vec::new();
        for sym in elf.syms.iter().chain(elf.dynsyms.iter()) {
            if sym.st_value == 0 || sym.st_name == 0 {
                continue;
            }
            if let Some(name) = elf.strtab.get_at(sym.st_name).or_else(|| elf.dynstrtab.get_at(sym.st_name)) {
                symbols.push(Symbol {
                    value: sym.st_value,
                    size: sym.st_size,
                    name: name.to_string(),
                });
            }
        }
        symbols.sort_by_key(|s| s.value);
        self.symbols = symbols;

        if let Some(section) = elf
            .section_headers
            .iter()
            .find(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(".eh_frame"))
        {
            let start = section.sh_offset as usize;
            let end = start + section.sh_size as usize;
            if end <= data.len() {
                let owned: Vec<u8> = data[start..end].to_vec();
                self.eh_frame = Some(Box::leak(owned.into_boxed_slice()));
                self.eh_frame_runtime_addr = section.sh_addr + self.bias;
            }
        }
    }

    /// Finds the symbol whose `[value, value+size)` covers `svma`, or the
    /// nearest preceding symbol if sizes are unreliable (common for hand
    /// written assembly stubs with `st_size == 0`).
    fn resolve(&self, svma: u64) -> Option<(&str, u64)> {
        // Binary search for the last symbol whose value <= svma.
        let idx = self.symbols.partition_point(|s| s.value <= svma);
        if idx == 0 {
            return None;
        }
        let candidate = &self.symbols[idx - 1];
        if candidate.size != 0 && svma >= candidate.value + candidate.size {
            return None;
        }
        Some((candidate.name.as_str(), svma - candidate.value))
    }

    pub fn eh_frame_section(&self) -> Option<(&'static [u8], u64)> {
        self.eh_frame.map(|d| (d, self.eh_frame_runtime_addr))
    }
}

/// Process-global module table, built once from a `/proc/<pid>/maps`
/// snapshot and reused across samples (symbols and CFI data aren't
/// expected to move once a module is mapped).
#[derive(Default)]
pub struct ModuleTable {
    modules: Vec<Module>,
}

impl ModuleTable {
    pub fn new() -> Self {
        ModuleTable {
            modules: Vec::new(),
        }
    }

    /// Merges newly observed mappings into the table. Mappings for a path
    /// already tracked are ignored — we only need one `Module` per file,
    /// anchored at the lowest-addressed executable mapping we've seen for
    /// it, to compute a stable bias.
    pub fn sync(&mut self, entries: &[MapEntry]) {
        let mut by_path: HashMap<&PathBuf, Vec<&MapEntry>> = HashMap::new();
        for e in entries {
            if e.has_loadable_file() {
                if let Some(p) = &e.path {
                    by_path.entry(p).or_default().push(e);
                }
            }
        }

        for (path, maps) in by_path {
            if self.modules.iter().any(|m| &m.path == path) {
                continue;
            }
            let start = maps.iter().map(|m| m.start).min().unwrap();
            let end = maps.iter().map(|m| m.end).max().unwrap();
            // The mapping whose file_offset is 0 anchors the bias: its
            // runtime start corresponds to file-relative vaddr `start -
            // bias`, which for the canonical first LOAD segment is 0.
            let bias = maps
                .iter()
                .find(|m| m.file_offset == 0)
                .map(|m| m.start)
                .unwrap_or(start);

            self.modules.push(Module {
                path: path.clone(),
                start,
                end,
                bias,
                symbols: Vec::new(),
                eh_frame: None,
                eh_frame_runtime_addr: 0,
                loaded: false,
            });
        }
    }

    pub fn module_for(&mut self, addr: u64) -> Option<&mut Module> {
        let idx = self.modules.iter().position(|m| m.contains(addr))?;
        let module = &mut self.modules[idx];
        module.ensure_loaded();
        Some(module)
    }

    /// Resolves `addr` to `(name, offset)`, or `None` if no module covers
    /// it or the module carries no usable symbol table.
    pub fn resolve(&mut self, addr: u64) -> Option<(String, u64)> {
        let module = self.module_for(addr)?;
        let svma = addr.checked_sub(module.bias)?;
        module
            .resolve(svma)
            .map(|(name, offset)| (name.to_string(), offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(start: u64, end: u64, offset: u64, path: &str) -> MapEntry {
        MapEntry {
            start,
            end,
            read_only: true,
            file_offset: offset,
            path: Some(PathBuf::from(path)),
        }
    }

    #[test]
    fn sync_dedupes_by_path() {
        let mut table = ModuleTable::new();
        let entries = vec![
            entry(0x1000, 0x2000, 0, "/usr/bin/sleep"),
            entry(0x2000, 0x3000, 0x1000, "/usr/bin/sleep"),
        ];
        table.sync(&entries);
        assert_eq!(table.modules.len(), 1);
        assert_eq!(table.modules[0].start, 0x1000);
        assert_eq!(table.modules[0].end, 0x3000);
        assert_eq!(table.modules[0].bias, 0x1000);
    }

    #[test]
    fn sync_is_idempotent_for_known_modules() {
        let mut table = ModuleTable::new();
        let entries = vec![entry(0x1000, 0x2000, 0, "/usr/bin/sleep")];
        table.sync(&entries);
        table.sync(&entries);
        assert_eq!(table.modules.len(), 1);
    }

    #[test]
    fn module_for_returns_none_outside_any_mapping() {
        let mut table = ModuleTable::new();
        table.sync(&[entry(0x1000, 0x2000, 0, "/nonexistent/path")]);
        assert!(table.module_for(0x5000).is_none());
    }
}
