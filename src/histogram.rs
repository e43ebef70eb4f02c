//! The aggregated-stacks half of the Sampler: a frequency histogram keyed
//! by colon-joined, innermost-first symbol names, plus the running total
//! that `histogram[k]` values must sum to.

use std::collections::HashMap;

#[derive(Default)]
pub struct Histogram {
    counts: HashMap<String, u64>,
    pub total_backtraces: u64,
}

impl Histogram {
    pub fn new() -> Self {
        Histogram {
            counts: HashMap::new(),
            total_backtraces: 0,
        }
    }

    /// Builds the stack key from resolved frame names, innermost first,
    /// and bumps its count plus the running total.
    pub fn record(&mut self, frame_names: &[String]) {
        let key = frame_names.join(":");
        *self.counts.entry(key).or_insert(0) += 1;
        self.total_backtraces += 1;
    }

    pub fn sum(&self) -> u64 {
        self.counts.values().sum()
    }

    /// The top-20 report entries: sorted ascending by count, then
    /// ascending lexicographically by key, so the most frequent entries
    /// fall at the end of the slice.
    pub fn top_20(&self) -> Vec<(&str, u64)> {
        let mut entries: Vec<(&str, u64)> = self
            .counts
            .iter()
            .map(|(k, &v)| (k.as_str(), v))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        let start = entries.len().saturating_sub(20);
        entries.split_off(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_of_histogram_equals_total_backtraces() {
        let mut h = Histogram::new();
        h.record(&["main".to_string(), "foo".to_string()]);
        h.record(&["main".to_string(), "foo".to_string()]);
        h.record(&["main".to_string(), "bar".to_string()]);
        assert_eq!(h.sum(), h.total_backtraces);
        assert_eq!(h.total_backtraces, 3);
    }

    #[test]
    fn top_20_sorts_ascending_by_count_then_key() {
        let mut h = Histogram::new();
        for _ in 0..5 {
            h.record(&["hot".to_string()]);
        }
        h.record(&["cold_b".to_string()]);
        h.record(&["cold_a".to_string()]);

        let top = h.top_20();
        // Ascending count: the two count==1 entries come first, ordered
        // by key; "hot" (count==5) comes last.
        assert_eq!(top[0], ("cold_a", 1));
        assert_eq!(top[1], ("cold_b", 1));
        assert_eq!(top[2], ("hot", 5));
    }

    #[test]
    fn top_20_truncates_to_last_20() {
        let mut h = Histogram::new();
        for i in 0..30 {
            h.record(&[format!("stack_{:02}", i)]);
        }
        let top = h.top_20();
        assert_eq!(top.len(), 20);
    }

    #[test]
    fn empty_histogram_has_zero_total() {
        let h = Histogram::new();
        assert_eq!(h.total_backtraces, 0);
        assert_eq!(h.sum(), 0);
        assert!(h.top_20().is_empty());
    }
}
