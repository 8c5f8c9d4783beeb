//! Fuzzy grouping: pool candidates from every source into one group per offering.

use std::collections::{BTreeSet, HashMap};

use gmp_core::{normalize_name, CandidateRecord};

/// Similarity between two identity keys on a 0-100 scale.
pub trait NameScorer: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Token-set similarity over whitespace tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSetScorer;

impl NameScorer for TokenSetScorer {
    fn score(&self, a: &str, b: &str) -> f64 {
        token_set_ratio(a, b)
    }
}

/// Longest common subsequence length over chars.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut row = vec![0usize; b.len() + 1];
    for ca in a {
        let mut diag = 0;
        for (j, cb) in b.iter().enumerate() {
            let up = row[j + 1];
            row[j + 1] = if ca == cb { diag + 1 } else { up.max(row[j]) };
            diag = up;
        }
    }
    row[b.len()]
}

/// Normalized InDel similarity: `1 - (insertions + deletions) / (len_a + len_b)`.
fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    let indel = total - 2 * lcs_len(&a, &b);
    (1.0 - indel as f64 / total as f64) * 100.0
}

fn join_tokens<'a>(prefix: &str, tokens: impl Iterator<Item = &'a str>) -> String {
    let rest = tokens.collect::<Vec<_>>().join(" ");
    match (prefix.is_empty(), rest.is_empty()) {
        (true, _) => rest,
        (_, true) => prefix.to_string(),
        _ => format!("{prefix} {rest}"),
    }
}

/// Compare unique sorted token sets; a name whose tokens are a subset of the
/// other's scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let shared: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();
    if !shared.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let sect = shared.join(" ");
    let with_a = join_tokens(&sect, only_a.iter().copied());
    let with_b = join_tokens(&sect, only_b.iter().copied());
    if sect.is_empty() {
        return ratio(&with_a, &with_b);
    }
    ratio(&sect, &with_a)
        .max(ratio(&sect, &with_b))
        .max(ratio(&with_a, &with_b))
}

/// All candidates judged to describe the same offering.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    identity_key: String,
    members: Vec<CandidateRecord>,
}

impl Group {
    /// Normalized name of the candidate that opened the group.
    pub fn identity_key(&self) -> &str {
        &self.identity_key
    }

    /// Members in pooling order.
    pub fn members(&self) -> &[CandidateRecord] {
        &self.members
    }
}

/// Single ordered pass; the first candidate to introduce a key fixes it.
#[derive(Debug, Clone)]
pub struct GroupingEngine<S = TokenSetScorer> {
    scorer: S,
    threshold: f64,
}

impl GroupingEngine<TokenSetScorer> {
    pub fn new(threshold: f64) -> Self {
        Self::with_scorer(TokenSetScorer, threshold)
    }
}

impl<S: NameScorer> GroupingEngine<S> {
    pub fn with_scorer(scorer: S, threshold: f64) -> Self {
        Self { scorer, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Groups come back in the order their keys were introduced. Candidates
    /// whose name normalizes to nothing are dropped.
    pub fn group(&self, candidates: impl IntoIterator<Item = CandidateRecord>) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();

        for candidate in candidates {
            let key = normalize_name(candidate.name());
            if key.is_empty() {
                continue;
            }
            if let Some(&idx) = by_key.get(&key) {
                groups[idx].members.push(candidate);
                continue;
            }

            // Ties go to the earliest group.
            let mut best: Option<(usize, f64)> = None;
            for (idx, group) in groups.iter().enumerate() {
                let score = self.scorer.score(&key, &group.identity_key);
                if best.map_or(true, |(_, top)| score > top) {
                    best = Some((idx, score));
                }
            }

            match best {
                Some((idx, score)) if score >= self.threshold => groups[idx].members.push(candidate),
                _ => {
                    by_key.insert(key.clone(), groups.len());
                    groups.push(Group {
                        identity_key: key,
                        members: vec![candidate],
                    });
                }
            }
        }
        groups
    }
}
