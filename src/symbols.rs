//! The Symbol Resolver: memoizes instruction pointer to `(name, offset)`,
//! consulting the process-global module table on a cache miss. A lookup
//! that fails is cached exactly like a success, under the sentinel `"??"`
//! with offset `0`, so repeated failures never cost a second module
//! lookup.

use std::collections::HashMap;

use crate::modules::ModuleTable;

const UNKNOWN_SYMBOL: &str = "??";

#[derive(Default)]
pub struct SymbolResolver {
    cache: HashMap<u64, (String, u64)>,
}

impl SymbolResolver {
    pub fn new() -> Self {
        SymbolResolver {
            cache: HashMap::new(),
        }
    }

    /// Never evicted within a run: symbols aren't expected to move once a
    /// module is mapped.
    pub fn resolve(&mut self, modules: &mut ModuleTable, ip: u64) -> (String, u64) {
        if let Some(cached) = self.cache.get(&ip) {
            return cached.clone();
        }

        let resolved = modules
            .resolve(ip)
            .unwrap_or_else(|| (UNKNOWN_SYMBOL.to_string(), 0));
        self.cache.insert(ip, resolved.clone());
        resolved
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolvable_address_is_cached_as_sentinel() {
        let mut resolver = SymbolResolver::new();
        let mut modules = ModuleTable::new(); // no modules synced
        let (name, offset) = resolver.resolve(&mut modules, 0xdead_beef);
        assert_eq!(name, UNKNOWN_SYMBOL);
        assert_eq!(offset, 0);
        assert_eq!(resolver.len(), 1);

        // Second lookup must hit the cache, not re-query modules (which
        // would be indistinguishable from this test's perspective since
        // modules is empty either way, but the len() staying at 1 proves
        // no duplicate entry was created).
        let _ = resolver.resolve(&mut modules, 0xdead_beef);
        assert_eq!(resolver.len(), 1);
    }
}
