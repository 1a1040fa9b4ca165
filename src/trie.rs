//! Compact, immutable class-name matcher.
//!
//! Patterns compile into two byte-level tries: a forward trie holding exact and prefix rules
//! and a reverse trie holding suffix rules. Package separators are ordinary branch points,
//! so all rules for one package share a path. A lookup walks each trie at most once along
//! the queried name; its cost depends on the name length and not on the number of rules.
//! `.` and `/` are the same separator everywhere.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PatternError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Include,
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// Matches names starting with the literal; written `com.example.*` or `com/example/Foo*`.
    Prefix,
    /// Matches names ending with the literal; written `*Test`.
    Suffix,
    /// Matches exactly the literal.
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamePattern {
    kind: PatternKind,
    literal: String,
    verdict: Verdict,
}

impl NamePattern {
    /// Parses `exact`, `prefix*`, `*suffix` or a lone `*`.
    pub fn parse(text: &str, verdict: Verdict) -> Result<Self, PatternError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PatternError::Empty);
        }
        let (kind, literal) = if let Some(rest) = text.strip_suffix('*') {
            (PatternKind::Prefix, rest)
        } else if let Some(rest) = text.strip_prefix('*') {
            (PatternKind::Suffix, rest)
        } else {
            (PatternKind::Exact, text)
        };
        if literal.contains('*') {
            return Err(PatternError::MisplacedWildcard(text.to_string()));
        }
        Ok(Self {
            kind,
            literal: literal.replace('.', "/"),
            verdict,
        })
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// The literal part in internal (slash) form.
    pub fn literal(&self) -> &str {
        &self.literal
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn specificity(&self) -> u32 {
        specificity(self.kind, self.literal.len())
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PatternKind::Exact => write!(f, "{}", self.literal),
            PatternKind::Prefix => write!(f, "{}*", self.literal),
            PatternKind::Suffix => write!(f, "*{}", self.literal),
        }
    }
}

/// Longer literals are more specific; an exact rule outranks a wildcard rule with the same
/// literal.
fn specificity(kind: PatternKind, literal_len: usize) -> u32 {
    let len = u32::try_from(literal_len).unwrap_or(u32::MAX).min(u32::MAX >> 1);
    len << 1 | u32::from(kind == PatternKind::Exact)
}

fn separator(byte: u8) -> u8 {
    if byte == b'.' { b'/' } else { byte }
}

/// One pattern that matched a looked-up name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Match {
    pub specificity: u32,
    pub verdict: Verdict,
    pub kind: PatternKind,
}

#[derive(Debug, Clone, Default)]
struct Node {
    /// Sorted by byte.
    edges: Vec<(u8, u32)>,
    terminals: Vec<Match>,
}

impl Node {
    fn child(&self, byte: u8) -> Option<u32> {
        self.edges
            .binary_search_by_key(&byte, |&(b, _)| b)
            .ok()
            .map(|i| self.edges[i].1)
    }
}

#[derive(Debug, Clone)]
struct Branches {
    nodes: Vec<Node>,
}

impl Default for Branches {
    fn default() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }
}

impl Branches {
    fn insert(&mut self, path: impl Iterator<Item = u8>, terminal: Match) {
        let mut node = 0usize;
        for byte in path {
            node = match self.nodes[node]
                .edges
                .binary_search_by_key(&byte, |&(b, _)| b)
            {
                Ok(i) => self.nodes[node].edges[i].1 as usize,
                Err(i) => {
                    let next = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[node].edges.insert(i, (byte, next as u32));
                    next
                }
            };
        }
        let terminals = &mut self.nodes[node].terminals;
        if !terminals.contains(&terminal) {
            terminals.push(terminal);
            terminals.sort_unstable();
        }
    }

    fn shrink(&mut self) {
        self.nodes.shrink_to_fit();
        for node in &mut self.nodes {
            node.edges.shrink_to_fit();
            node.terminals.shrink_to_fit();
        }
    }
}

#[derive(Debug, Default)]
pub struct NameTrieBuilder {
    forward: Branches,
    reverse: Branches,
    patterns: usize,
}

impl NameTrieBuilder {
    pub fn add(&mut self, pattern: &NamePattern) -> &mut Self {
        let terminal = Match {
            specificity: pattern.specificity(),
            verdict: pattern.verdict,
            kind: pattern.kind,
        };
        let literal = pattern.literal.bytes().map(separator);
        match pattern.kind {
            PatternKind::Exact | PatternKind::Prefix => self.forward.insert(literal, terminal),
            PatternKind::Suffix => self.reverse.insert(literal.rev(), terminal),
        }
        self.patterns += 1;
        self
    }

    pub fn build(mut self) -> NameTrie {
        self.forward.shrink();
        self.reverse.shrink();
        NameTrie {
            forward: self.forward,
            reverse: self.reverse,
            patterns: self.patterns,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NameTrie {
    forward: Branches,
    reverse: Branches,
    patterns: usize,
}

impl NameTrie {
    pub fn builder() -> NameTrieBuilder {
        NameTrieBuilder::default()
    }

    pub fn from_patterns<'a>(patterns: impl IntoIterator<Item = &'a NamePattern>) -> Self {
        let mut builder = Self::builder();
        for pattern in patterns {
            builder.add(pattern);
        }
        builder.build()
    }

    /// Number of patterns added, duplicates included.
    pub fn len(&self) -> usize {
        self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns == 0
    }

    /// Every pattern matching `name`: prefix and exact rules from the shortest literal to the
    /// longest, then suffix rules from the shortest literal to the longest.
    ///
    /// The iterator is lazy and borrows the trie read-only; call `lookup` again (or clone the
    /// iterator) to restart.
    pub fn lookup<'t, 'n>(&'t self, name: &'n str) -> Matches<'t, 'n> {
        Matches {
            trie: self,
            name: name.as_bytes(),
            phase: Phase::Forward,
            node: 0,
            depth: 0,
            terminal: 0,
        }
    }

    /// The single most specific match; on equal specificity `Exclude` wins.
    pub fn best(&self, name: &str) -> Option<Match> {
        self.lookup(name)
            .max_by_key(|m| (m.specificity, m.verdict))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Forward,
    Reverse,
    Done,
}

#[derive(Debug, Clone)]
pub struct Matches<'t, 'n> {
    trie: &'t NameTrie,
    name: &'n [u8],
    phase: Phase,
    node: u32,
    depth: usize,
    terminal: usize,
}

impl Iterator for Matches<'_, '_> {
    type Item = Match;

    fn next(&mut self) -> Option<Match> {
        let trie = self.trie;
        loop {
            let branches = match self.phase {
                Phase::Forward => &trie.forward,
                Phase::Reverse => &trie.reverse,
                Phase::Done => return None,
            };
            let node = &branches.nodes[self.node as usize];

            while let Some(&found) = node.terminals.get(self.terminal) {
                self.terminal += 1;
                if found.kind != PatternKind::Exact || self.depth == self.name.len() {
                    return Some(found);
                }
            }

            let child = if self.depth < self.name.len() {
                let byte = match self.phase {
                    Phase::Reverse => self.name[self.name.len() - 1 - self.depth],
                    _ => self.name[self.depth],
                };
                node.child(separator(byte))
            } else {
                None
            };

            match child {
                Some(child) => {
                    self.node = child;
                    self.depth += 1;
                }
                None => {
                    self.phase = match self.phase {
                        Phase::Forward => Phase::Reverse,
                        _ => Phase::Done,
                    };
                    self.node = 0;
                    self.depth = 0;
                }
            }
            self.terminal = 0;
        }
    }
}
