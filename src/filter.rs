#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use std::collections::{BTreeSet, HashMap};

use crate::config::SequenceSpec;

/// Match `input` against a wildcard pattern supporting `*` and `?`.
pub fn wildcard_match(pattern: &str, input: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = input.chars().collect();
    let (mut pi, mut si) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;
    while si < s.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = si;
            pi += 1;
        } else if let Some(sp) = star {
            pi = sp + 1;
            mark += 1;
            si = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Allow/deny name filter. A non-empty whitelist admits only matching names;
/// otherwise the blacklist rejects matching names.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    whitelist: Vec<String>,
    blacklist: Vec<String>,
}

impl NameFilter {
    pub fn new(whitelist: Vec<String>, blacklist: Vec<String>) -> Self {
        Self {
            whitelist,
            blacklist,
        }
    }

    pub fn admits(&self, name: &str) -> bool {
        if !self.whitelist.is_empty() {
            return self.whitelist.iter().any(|pat| wildcard_match(pat, name));
        }
        !self.blacklist.iter().any(|pat| wildcard_match(pat, name))
    }
}

const MAX_RANGE_SPAN: u64 = 1_000_000;

/// Per-channel sequence exclusion table, built from configuration.
#[derive(Debug, Clone, Default)]
pub struct ExcludedSequences {
    map: HashMap<String, BTreeSet<u64>>,
}

impl ExcludedSequences {
    pub fn from_config(raw: &HashMap<String, Vec<SequenceSpec>>) -> Result<Self> {
        let mut map: HashMap<String, BTreeSet<u64>> = HashMap::new();
        for (channel, specs) in raw {
            let set = map.entry(channel.clone()).or_default();
            for spec in specs {
                match spec {
                    SequenceSpec::Single(seq) => {
                        set.insert(*seq);
                    }
                    SequenceSpec::Range(range) => {
                        let (start, end) = range.split_once('-').with_context(|| {
                            format!("invalid sequence range for {channel}: {range}")
                        })?;
                        let start: u64 = start.trim().parse().with_context(|| {
                            format!("invalid sequence range for {channel}: {range}")
                        })?;
                        let end: u64 = end.trim().parse().with_context(|| {
                            format!("invalid sequence range for {channel}: {range}")
                        })?;
                        if start > end {
                            bail!("invalid sequence range for {channel}: {range}");
                        }
                        if end - start > MAX_RANGE_SPAN {
                            bail!("sequence range for {channel} too wide: {range}");
                        }
                        set.extend(start..=end);
                    }
                }
            }
        }
        Ok(Self { map })
    }

    pub fn is_excluded(&self, channel: &str, sequence: u64) -> bool {
        self.map
            .get(channel)
            .is_some_and(|set| set.contains(&sequence))
    }

    /// Drop excluded sequences from an observed set.
    pub fn retain(&self, channel: &str, sequences: Vec<u64>) -> Vec<u64> {
        match self.map.get(channel) {
            None => sequences,
            Some(set) => sequences
                .into_iter()
                .filter(|seq| !set.contains(seq))
                .collect(),
        }
    }
}
