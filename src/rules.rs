//! The active matching configuration and its atomically swappable handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::ClassFormatError;
use crate::filter::{FilterDecision, NameFilter};
use crate::header::ClassReader;
use crate::matcher::ClassMatcher;
use crate::outline::{AnnotationSet, ClassInfo};
use crate::trie::Verdict;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralRule {
    pub verdict: Verdict,
    pub matcher: ClassMatcher,
}

/// Name rules plus structural rules, immutable once built.
///
/// A class is excluded when the name filter or any structural exclude rule says so,
/// included when the name filter or any structural include rule says so, and otherwise
/// not matched.
#[derive(Debug, Default)]
pub struct RuleSet {
    generation: u64,
    names: NameFilter,
    structural: Vec<StructuralRule>,
    annotations: AnnotationSet,
    requires_outline: bool,
}

impl RuleSet {
    pub fn new(names: NameFilter, mut structural: Vec<StructuralRule>) -> Self {
        let mut annotations = AnnotationSet::default();
        for rule in &mut structural {
            rule.matcher.normalize();
            rule.matcher.collect_annotations(&mut annotations);
        }
        let requires_outline = structural.iter().any(|r| r.matcher.requires_outline());
        Self {
            generation: 0,
            names,
            structural,
            annotations,
            requires_outline,
        }
    }

    pub fn names(&self) -> &NameFilter {
        &self.names
    }

    pub fn structural(&self) -> &[StructuralRule] {
        &self.structural
    }

    /// Set when the rules were installed in a [`SharedRules`]; zero before that.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Annotation types the outline parser must record for these rules.
    pub fn annotations(&self) -> &AnnotationSet {
        &self.annotations
    }

    /// True when some structural rule looks at fields, methods or annotations.
    pub fn requires_outline(&self) -> bool {
        self.requires_outline
    }

    /// Whether a class with this name decision has to be parsed past its header.
    pub fn needs_outline(&self, by_name: FilterDecision) -> bool {
        self.requires_outline && by_name != FilterDecision::Exclude
    }

    pub fn decide(&self, name: &str, class: &ClassInfo) -> FilterDecision {
        self.decide_with(self.names.decide(name), class)
    }

    pub(crate) fn decide_with(&self, by_name: FilterDecision, class: &ClassInfo) -> FilterDecision {
        if by_name == FilterDecision::Exclude {
            return FilterDecision::Exclude;
        }
        let mut included = by_name == FilterDecision::Include;
        for rule in &self.structural {
            if rule.matcher.matches(class) {
                match rule.verdict {
                    Verdict::Exclude => return FilterDecision::Exclude,
                    Verdict::Include => included = true,
                }
            }
        }
        if included {
            FilterDecision::Include
        } else {
            FilterDecision::NoMatch
        }
    }

    /// Parses as much of `bytes` as these rules need and decides.
    ///
    /// Without a `name` the class is decided under the name found in its header.
    pub fn evaluate(
        &self,
        name: Option<&str>,
        bytes: &[u8],
    ) -> Result<(ClassInfo, FilterDecision), ClassFormatError> {
        let mut reader = ClassReader::open(bytes)?;
        let header = reader.read_header()?;
        let by_name = self.names.decide(name.unwrap_or(&header.class_name));
        let info = if self.needs_outline(by_name) {
            ClassInfo::Outline(reader.read_outline(header, &self.annotations)?)
        } else {
            ClassInfo::Header(header)
        };
        let decision = self.decide_with(by_name, &info);
        Ok((info, decision))
    }
}

/// Shared handle to the current [`RuleSet`].
///
/// Readers never block: [`SharedRules::current`] is a single atomic load, and a replacement
/// is a single pointer swap, so every lookup sees either the old or the new rules.
#[derive(Debug)]
pub struct SharedRules {
    current: ArcSwap<RuleSet>,
    next_generation: AtomicU64,
}

impl SharedRules {
    pub fn new(mut rules: RuleSet) -> Self {
        rules.generation = 1;
        Self {
            current: ArcSwap::from_pointee(rules),
            next_generation: AtomicU64::new(2),
        }
    }

    pub fn current(&self) -> Arc<RuleSet> {
        self.current.load_full()
    }

    /// Installs `rules` and returns the generation assigned to them.
    pub fn replace(&self, mut rules: RuleSet) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        rules.generation = generation;
        log::info!(
            "installing rule generation {generation}: {} name patterns, {} structural rules",
            rules.names.trie().len(),
            rules.structural.len()
        );
        self.current.store(Arc::new(rules));
        generation
    }
}

impl Default for SharedRules {
    fn default() -> Self {
        Self::new(RuleSet::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessFlags;
    use crate::filter::Precedence;
    use crate::fixture::ClassFileBuilder;
    use crate::trie::NamePattern;

    fn names(rules: &[(&str, Verdict)]) -> NameFilter {
        let patterns: Vec<_> = rules
            .iter()
            .map(|(text, verdict)| NamePattern::parse(text, *verdict).unwrap())
            .collect();
        NameFilter::new(&patterns, Precedence::ExcludeVeto)
    }

    fn rule(verdict: Verdict, json: &str) -> StructuralRule {
        StructuralRule {
            verdict,
            matcher: serde_json::from_str(json).unwrap(),
        }
    }

    fn service() -> Vec<u8> {
        ClassFileBuilder::new("com/example/OrderService")
            .interface("com/example/Service")
            .annotated_method(AccessFlags::PUBLIC, "place", "(J)V", &["com/example/Traced"])
            .build()
    }

    #[test]
    fn header_rules_do_not_request_the_outline() {
        let rules = RuleSet::new(
            NameFilter::default(),
            vec![rule(Verdict::Include, r#"{"kind":"implements","name":"com.example.Service"}"#)],
        );
        assert!(!rules.requires_outline());
        let (info, decision) = rules.evaluate(Some("com/example/OrderService"), &service()).unwrap();
        assert!(info.outline().is_none());
        assert_eq!(decision, FilterDecision::Include);
    }

    #[test]
    fn member_rules_request_the_outline_unless_excluded_by_name() {
        let rules = RuleSet::new(
            names(&[("com.example.internal.*", Verdict::Exclude)]),
            vec![rule(
                Verdict::Include,
                r#"{"kind":"declares_method","annotated_with":["com.example.Traced"]}"#,
            )],
        );
        assert!(rules.requires_outline());
        assert!(rules.annotations().contains("com/example/Traced"));

        let (info, decision) = rules.evaluate(None, &service()).unwrap();
        assert!(info.outline().is_some());
        assert_eq!(decision, FilterDecision::Include);

        let (info, decision) = rules
            .evaluate(Some("com/example/internal/OrderService"), &service())
            .unwrap();
        assert!(info.outline().is_none());
        assert_eq!(decision, FilterDecision::Exclude);
    }

    #[test]
    fn structural_exclude_vetoes_a_name_include() {
        let rules = RuleSet::new(
            names(&[("com.example.*", Verdict::Include)]),
            vec![rule(Verdict::Exclude, r#"{"kind":"access","all_of":["interface"]}"#)],
        );
        let iface = ClassFileBuilder::new("com/example/Api")
            .access(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
            .build();
        assert_eq!(rules.evaluate(None, &iface).unwrap().1, FilterDecision::Exclude);
        assert_eq!(rules.evaluate(None, &service()).unwrap().1, FilterDecision::Include);
    }

    #[test]
    fn replace_swaps_atomically_and_bumps_generation() {
        let shared = SharedRules::default();
        let before = shared.current();
        assert_eq!(before.generation(), 1);
        assert_eq!(before.names().decide("a.B"), FilterDecision::NoMatch);

        let generation = shared.replace(RuleSet::new(names(&[("a.*", Verdict::Include)]), vec![]));
        assert_eq!(generation, 2);
        let after = shared.current();
        assert_eq!(after.generation(), 2);
        assert_eq!(after.names().decide("a.B"), FilterDecision::Include);
        // readers holding the old rules keep a consistent view
        assert_eq!(before.names().decide("a.B"), FilterDecision::NoMatch);
    }

    #[test]
    fn readers_never_see_a_half_installed_rule_set() {
        use std::sync::atomic::AtomicBool;

        // odd generations include, even ones exclude
        let verdict = |generation: u64| {
            if generation % 2 == 1 {
                Verdict::Include
            } else {
                Verdict::Exclude
            }
        };
        let shared = SharedRules::new(RuleSet::new(names(&[("a.*", Verdict::Include)]), vec![]));
        let done = AtomicBool::new(false);
        let last = 40;

        std::thread::scope(|scope| {
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let mut seen = 0;
                        let mut reads = 0;
                        loop {
                            let finished = done.load(Ordering::Acquire);
                            let rules = shared.current();
                            let expected = match verdict(rules.generation()) {
                                Verdict::Include => FilterDecision::Include,
                                Verdict::Exclude => FilterDecision::Exclude,
                            };
                            assert_eq!(rules.names().decide("a.B"), expected);
                            assert!(rules.generation() >= seen, "generation went backwards");
                            seen = rules.generation();
                            reads += 1;
                            if finished && reads >= 100 {
                                break seen;
                            }
                        }
                    })
                })
                .collect();

            for generation in 2..=last {
                let installed =
                    shared.replace(RuleSet::new(names(&[("a.*", verdict(generation))]), vec![]));
                assert_eq!(installed, generation);
                std::thread::yield_now();
            }
            done.store(true, Ordering::Release);

            for reader in readers {
                assert_eq!(reader.join().unwrap(), last);
            }
        });
    }
}
