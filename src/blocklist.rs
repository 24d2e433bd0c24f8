use std::collections::HashSet;

/// Compact set of string prefixes allowing O(distinct lengths) membership
/// checks: a candidate matches iff its first `L` bytes are in the set for
/// one of the stored prefix lengths `L`.
#[derive(Debug, Clone)]
pub struct PrefixSet {
    prefixes: HashSet<String>,
    /// Sorted distinct prefix lengths, smallest first.
    lengths: Vec<usize>,
}

impl PrefixSet {
    /// Builds a set from the given prefixes; empty strings are discarded.
    /// Returns `None` when nothing usable remains.
    pub fn new<I, S>(prefixes: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = HashSet::new();
        let mut lengths = Vec::new();
        for p in prefixes {
            let p = p.into();
            if p.is_empty() {
                continue;
            }
            lengths.push(p.len());
            set.insert(p);
        }
        if set.is_empty() {
            return None;
        }
        lengths.sort_unstable();
        lengths.dedup();
        Some(PrefixSet {
            prefixes: set,
            lengths,
        })
    }

    /// Returns true when `s` starts with any stored prefix.
    pub fn matches(&self, s: &str) -> bool {
        if s.len() < self.lengths[0] {
            return false;
        }
        for &len in &self.lengths {
            if s.len() < len {
                // lengths are sorted, nothing longer can match
                return false;
            }
            if s.is_char_boundary(len) && self.prefixes.contains(&s[..len]) {
                return true;
            }
        }
        false
    }
}

/// Returns true when the lowercased title contains any of the (already
/// lowercase) blocklist substrings.
pub fn title_blocklisted(blocklist: &[String], title: &str) -> bool {
    if title.is_empty() || blocklist.is_empty() {
        return false;
    }
    let lowered = title.to_lowercase();
    blocklist.iter().any(|s| lowered.contains(s.as_str()))
}
