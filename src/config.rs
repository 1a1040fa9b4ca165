use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::error::PatternError;
use crate::filter::{NameFilter, Precedence};
use crate::rules::{RuleSet, StructuralRule};
use crate::trie::{NamePattern, Verdict};

pub const RULES_ENV: &str = "CLASS_MATCH_RULES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRule {
    pub pattern: String,
    pub verdict: Verdict,
}

/// Rules as written by a user, before compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub precedence: Precedence,
    pub rules: Vec<NameRule>,
    pub structural: Vec<StructuralRule>,
}

impl RulesConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Invalid rules JSON")
    }

    /// One rule per line: `+pattern`, `-pattern`, `include pattern` or `exclude pattern`,
    /// plus `precedence most-specific|exclude-veto`. `#` starts a comment.
    pub fn from_lines(text: &str) -> Result<Self> {
        let mut config = Self::default();
        for (number, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let rule = |verdict, pattern: &str| NameRule {
                pattern: pattern.trim().to_string(),
                verdict,
            };
            if let Some(pattern) = line.strip_prefix('+') {
                config.rules.push(rule(Verdict::Include, pattern));
            } else if let Some(pattern) = line.strip_prefix('-') {
                config.rules.push(rule(Verdict::Exclude, pattern));
            } else if let Some((keyword, value)) = line.split_once(char::is_whitespace) {
                match keyword {
                    "include" => config.rules.push(rule(Verdict::Include, value)),
                    "exclude" => config.rules.push(rule(Verdict::Exclude, value)),
                    "precedence" => {
                        config.precedence = match value.trim() {
                            "most-specific" => Precedence::MostSpecific,
                            "exclude-veto" => Precedence::ExcludeVeto,
                            other => anyhow::bail!("line {}: unknown precedence `{other}`", number + 1),
                        }
                    }
                    other => anyhow::bail!("line {}: unknown directive `{other}`", number + 1),
                }
            } else {
                anyhow::bail!("line {}: cannot read rule `{line}`", number + 1);
            }
        }
        Ok(config)
    }

    /// Reads a rules file; `.json` files are JSON, anything else uses the line format.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file: {}", path.display()))?;
        let config = if path.extension().is_some_and(|e| e == "json") {
            Self::from_json(&text)
        } else {
            Self::from_lines(&text)
        };
        config.with_context(|| format!("Failed to load rules file: {}", path.display()))
    }

    pub fn compile(&self) -> Result<RuleSet, PatternError> {
        let patterns = self
            .rules
            .iter()
            .map(|rule| NamePattern::parse(&rule.pattern, rule.verdict))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RuleSet::new(
            NameFilter::new(&patterns, self.precedence),
            self.structural.clone(),
        ))
    }
}

/// `--rules`, then `CLASS_MATCH_RULES`, then the per-user rules file if it exists.
pub fn resolve_rules_path(cli: &Cli) -> Result<Option<PathBuf>> {
    if let Some(p) = cli.rules.clone() {
        return Ok(Some(p));
    }

    if let Ok(p) = env::var(RULES_ENV) {
        return Ok(Some(PathBuf::from(p)));
    }

    let default_path = class_match_home()?.join("rules.json");
    Ok(default_path.exists().then_some(default_path))
}

pub fn load_rules(cli: &Cli) -> Result<RuleSet> {
    let config = match resolve_rules_path(cli)? {
        Some(path) => {
            log::debug!("loading rules from {}", path.display());
            RulesConfig::load(&path)?
        }
        None => RulesConfig::default(),
    };
    Ok(config.compile()?)
}

fn class_match_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("class-match"))
}
