use anyhow::{Context, Result};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

/// Where class bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassSource {
    Archive(PathBuf),
    ClassFile(PathBuf),
}

impl ClassSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Archive(p) | Self::ClassFile(p) => p,
        }
    }

    fn classify(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("jar") => Some(Self::Archive(path.to_path_buf())),
            Some("class") => Some(Self::ClassFile(path.to_path_buf())),
            _ => None,
        }
    }
}

/// Finds jars and loose class files under `base_path`, which may also be a single file.
pub fn scan_class_sources(base_path: &Path) -> Result<Vec<ClassSource>> {
    let metadata = std::fs::metadata(base_path)
        .with_context(|| format!("Failed to read path: {}", base_path.display()))?;
    if metadata.is_file() {
        return ClassSource::classify(base_path)
            .map(|source| vec![source])
            .with_context(|| format!("Not a .jar or .class file: {}", base_path.display()));
    }

    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(base_path)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry
                && let Some(source) = ClassSource::classify(entry.path())
            {
                let _ = tx.send(source);
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    let mut sources: Vec<ClassSource> = rx.iter().collect();
    sources.sort();
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(prefix: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "{prefix}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    #[test]
    fn finds_jars_and_class_files() -> Result<()> {
        let base = temp_dir("class-match-scan");
        fs::create_dir_all(base.join("lib"))?;
        fs::create_dir_all(base.join("classes/com/example"))?;
        fs::write(base.join("lib/a.jar"), b"")?;
        fs::write(base.join("classes/com/example/Widget.class"), b"")?;
        fs::write(base.join("classes/readme.txt"), b"")?;
        fs::create_dir_all(base.join(".hidden"))?;
        fs::write(base.join(".hidden/b.jar"), b"")?;

        let sources = scan_class_sources(&base)?;
        assert_eq!(sources.len(), 3);
        assert!(sources.contains(&ClassSource::Archive(base.join("lib/a.jar"))));
        assert!(sources.contains(&ClassSource::ClassFile(
            base.join("classes/com/example/Widget.class")
        )));

        let single = scan_class_sources(&base.join("lib/a.jar"))?;
        assert_eq!(single, vec![ClassSource::Archive(base.join("lib/a.jar"))]);
        assert!(scan_class_sources(&base.join("classes/readme.txt")).is_err());

        fs::remove_dir_all(base)?;
        Ok(())
    }
}
