use anyhow::{Context, Result};
use clap::Parser;
use class_match::agent::Agent;
use class_match::cache::{CacheStats, ClassEntry};
use class_match::catalog::{ArchivedClass, hash_content, read_archive_classes, read_class_file};
use class_match::cli::{Cli, Commands, OutputFormat};
use class_match::config::load_rules;
use class_match::filter::FilterDecision;
use class_match::header::parse_header;
use class_match::loader::{LoaderHandle, LoaderKey};
use class_match::outline::{AnnotationSet, parse_outline_with};
use class_match::rules::RuleSet;
use class_match::scan::{ClassSource, scan_class_sources};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("CLASS_MATCH_LOG", "warn"))
        .init();
    let cli = Cli::parse();

    match cli.command.clone() {
        Commands::Header { file } => {
            let bytes = read_class_file(&file)?;
            let header = parse_header(&bytes)
                .with_context(|| format!("Failed to parse class file: {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&header)?);
        }
        Commands::Outline { file, annotations } => {
            let bytes = read_class_file(&file)?;
            let outline = parse_outline_with(&bytes, &AnnotationSet::new(annotations))
                .with_context(|| format!("Failed to parse class file: {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&outline)?);
        }
        Commands::Decide { names } => {
            let rules = load_rules(&cli)?;
            let decisions: Vec<NameDecision> = names
                .into_iter()
                .map(|name| NameDecision {
                    decision: rules.names().decide(&name),
                    name,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&decisions)?);
        }
        Commands::Scan {
            path,
            format,
            include_only,
            output,
            cache_capacity,
        } => {
            let rules = load_rules(&cli)?;
            let report = scan(rules, &path, include_only, cache_capacity)?;
            write_scan_output(&report, format, output.as_deref())?;
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct NameDecision {
    name: String,
    decision: FilterDecision,
}

#[derive(Debug, Serialize)]
struct ClassReport {
    source: String,
    /// Archive entry, or the file itself for loose class files.
    entry: String,
    release: Option<u32>,
    class_name: Option<String>,
    decision: FilterDecision,
    super_name: Option<String>,
    interfaces: usize,
    content_hash: String,
    error: Option<String>,
}

impl ClassReport {
    fn archived(jar: &Path, class: &ArchivedClass, cached: &ClassEntry) -> Self {
        let mut report = Self::new(jar, Some(&class.class_name), &class.bytes, cached);
        report.entry = class.entry.clone();
        report.release = class.release;
        report
    }

    fn new(source: &Path, class_name: Option<&str>, bytes: &[u8], cached: &ClassEntry) -> Self {
        let header = cached.header();
        let source = source.to_string_lossy().to_string();
        Self {
            entry: source.clone(),
            source,
            release: None,
            class_name: class_name
                .map(str::to_string)
                .or_else(|| header.map(|h| h.class_name.clone())),
            decision: cached.decision(),
            super_name: header.and_then(|h| h.super_name.clone()),
            interfaces: header.map_or(0, |h| h.interfaces.len()),
            content_hash: hash_content(bytes),
            error: cached.error().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct Totals {
    classes: usize,
    included: usize,
    excluded: usize,
    no_match: usize,
    failed: usize,
}

impl Totals {
    fn count(classes: &[ClassReport]) -> Self {
        let mut totals = Self {
            classes: classes.len(),
            ..Self::default()
        };
        for class in classes {
            match class.decision {
                FilterDecision::Include => totals.included += 1,
                FilterDecision::Exclude => totals.excluded += 1,
                FilterDecision::NoMatch => totals.no_match += 1,
            }
            if class.error.is_some() {
                totals.failed += 1;
            }
        }
        totals
    }
}

#[derive(Debug, Serialize)]
struct ScanReport {
    scanned_root: String,
    sources: usize,
    rules_generation: u64,
    duration_ms: u64,
    totals: Totals,
    cache: CacheStats,
    classes: Vec<ClassReport>,
}

fn scan(rules: RuleSet, path: &Path, include_only: bool, cache_capacity: usize) -> Result<ScanReport> {
    let start = Instant::now();
    let sources = scan_class_sources(path)?;
    let agent = Agent::with_cache_capacity(rules, cache_capacity);

    let mut classes: Vec<ClassReport> = sources
        .par_iter()
        .flat_map_iter(|source| scan_source(&agent, source))
        .collect();
    let totals = Totals::count(&classes);
    if include_only {
        classes.retain(|c| c.decision == FilterDecision::Include);
    }

    // archive loaders are gone by now; sweep so the stats show what is still held
    agent.cache().sweep();

    Ok(ScanReport {
        scanned_root: path.to_string_lossy().to_string(),
        sources: sources.len(),
        rules_generation: agent.rules().generation(),
        duration_ms: start.elapsed().as_millis() as u64,
        totals,
        cache: agent.cache().stats(),
        classes,
    })
}

/// Each archive is defined by its own loader, retired once the archive is done. Entries under
/// `META-INF/versions/<n>/` get a loader per release so they do not share the base entry's
/// cache key.
fn scan_source(agent: &Agent, source: &ClassSource) -> Vec<ClassReport> {
    match source {
        ClassSource::Archive(jar) => {
            let classes = match read_archive_classes(jar) {
                Ok(classes) => classes,
                Err(err) => {
                    log::warn!("skipping {}: {err:#}", jar.display());
                    return Vec::new();
                }
            };
            let mut loaders: HashMap<Option<u32>, LoaderHandle> = HashMap::new();
            classes
                .iter()
                .map(|class| {
                    let loader = loaders
                        .entry(class.release)
                        .or_insert_with(|| agent.register_loader());
                    let cached = agent.on_class_load(loader.key(), Some(&class.class_name), &class.bytes);
                    ClassReport::archived(jar, class, &cached)
                })
                .collect()
        }
        ClassSource::ClassFile(file) => match read_class_file(file) {
            // a loose file's name comes from its own header
            Ok(bytes) => {
                let cached = agent.on_class_load(LoaderKey::BOOT, None, &bytes);
                vec![ClassReport::new(file, None, &bytes, &cached)]
            }
            Err(err) => {
                log::warn!("skipping {}: {err:#}", file.display());
                Vec::new()
            }
        },
    }
}

fn render_text(report: &ScanReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("scanned_root: {}\n", report.scanned_root));
    out.push_str(&format!("sources: {}\n", report.sources));
    out.push_str(&format!(
        "classes: {} (include: {}, exclude: {}, no_match: {}, failed: {})\n",
        report.totals.classes,
        report.totals.included,
        report.totals.excluded,
        report.totals.no_match,
        report.totals.failed
    ));
    out.push_str(&format!("duration_ms: {}\n", report.duration_ms));
    for c in &report.classes {
        let mut name = c.class_name.as_deref().unwrap_or("<unknown>").to_string();
        if let Some(release) = c.release {
            name.push_str(&format!(" (release {release})"));
        }
        match &c.error {
            Some(error) => out.push_str(&format!("- {name}: {:?} ({error})\n", c.decision)),
            None => out.push_str(&format!(
                "- {name}: {:?}, super: {}, interfaces: {}\n",
                c.decision,
                c.super_name.as_deref().unwrap_or("-"),
                c.interfaces
            )),
        }
    }
    out
}

fn write_scan_output(report: &ScanReport, format: OutputFormat, output: Option<&Path>) -> Result<()> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)?,
        OutputFormat::Text => render_text(report),
    };

    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write output: {}", path.display()))?;
    } else {
        print!("{content}");
        if !content.ends_with('\n') {
            println!();
        }
    }

    Ok(())
}
