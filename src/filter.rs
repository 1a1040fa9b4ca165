use serde::{Deserialize, Serialize};

use crate::trie::{NamePattern, NameTrie, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDecision {
    Include,
    Exclude,
    /// No rule spoke about the class. Distinct from `Exclude`: callers may apply a default.
    NoMatch,
}

impl From<Verdict> for FilterDecision {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Include => Self::Include,
            Verdict::Exclude => Self::Exclude,
        }
    }
}

/// How matches with different verdicts are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Precedence {
    /// Any matching exclude rule wins over every include rule.
    #[default]
    ExcludeVeto,
    /// The most specific matching rule wins; ties go to exclude.
    MostSpecific,
}

/// Three-way class-name decision over a compiled rule trie.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    trie: NameTrie,
    precedence: Precedence,
}

impl NameFilter {
    pub fn new<'a>(patterns: impl IntoIterator<Item = &'a NamePattern>, precedence: Precedence) -> Self {
        Self {
            trie: NameTrie::from_patterns(patterns),
            precedence,
        }
    }

    pub fn precedence(&self) -> Precedence {
        self.precedence
    }

    pub fn trie(&self) -> &NameTrie {
        &self.trie
    }

    pub fn decide(&self, name: &str) -> FilterDecision {
        match self.precedence {
            Precedence::ExcludeVeto => {
                let mut included = false;
                for found in self.trie.lookup(name) {
                    match found.verdict {
                        Verdict::Exclude => return FilterDecision::Exclude,
                        Verdict::Include => included = true,
                    }
                }
                if included {
                    FilterDecision::Include
                } else {
                    FilterDecision::NoMatch
                }
            }
            Precedence::MostSpecific => self
                .trie
                .best(name)
                .map_or(FilterDecision::NoMatch, |found| found.verdict.into()),
        }
    }
}
