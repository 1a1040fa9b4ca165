use anyhow::{Context, Result};
use memmap2::Mmap;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

use crate::names::{class_name_from_entry, release_from_entry};

/// One class-file entry read out of a jar.
#[derive(Debug, Clone)]
pub struct ArchivedClass {
    pub entry: String,
    /// Internal name derived from the entry path.
    pub class_name: String,
    /// Set for entries under `META-INF/versions/<n>/`.
    pub release: Option<u32>,
    pub bytes: Vec<u8>,
}

pub fn read_archive_classes(archive_path: &Path) -> Result<Vec<ArchivedClass>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open jar: {}", archive_path.display()))?;
    // SAFETY: The file is opened read-only and remains valid for the lifetime of the mmap.
    // The mmap is dropped before the file, ensuring memory safety.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("Failed to mmap jar: {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))
        .with_context(|| format!("Failed to read zip(jar): {}", archive_path.display()))?;

    let mut classes = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(class_name) = class_name_from_entry(entry.name()) else {
            continue;
        };
        let name = entry.name().to_string();
        let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("Failed to read {name} in {}", archive_path.display()))?;
        classes.push(ArchivedClass {
            release: release_from_entry(&name),
            entry: name,
            class_name,
            bytes,
        });
    }
    Ok(classes)
}

pub fn read_class_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read class file: {}", path.display()))
}

pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::ClassFileBuilder;
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};
    use zip::write::FileOptions;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "class_match_test_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ))
    }

    fn write_jar(path: &std::path::Path, entries: &[(&str, &[u8])]) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for (name, content) in entries {
            zip.start_file(*name, options)?;
            zip.write_all(content)?;
        }

        zip.finish()?;
        Ok(())
    }

    #[test]
    fn reads_class_entries_with_their_bytes() -> Result<()> {
        let jar = temp_path("catalog_ok.jar");
        let widget = ClassFileBuilder::new("org/example/A").build();
        write_jar(
            &jar,
            &[
                ("org/example/A.class", widget.as_slice()),
                ("org/example/A$Inner.class", b"inner"),
                ("META-INF/versions/11/org/example/B.class", b"b"),
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
            ],
        )?;

        let classes = read_archive_classes(&jar)?;
        let names: Vec<_> = classes.iter().map(|c| c.class_name.as_str()).collect();
        assert_eq!(names, ["org/example/A", "org/example/A$Inner", "org/example/B"]);
        assert_eq!(classes[0].bytes, widget);
        assert_eq!(classes[2].entry, "META-INF/versions/11/org/example/B.class");
        assert_eq!(classes[2].release, Some(11));
        assert_eq!(classes[0].release, None);
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn handles_empty_jar() -> Result<()> {
        let jar = temp_path("catalog_empty.jar");
        write_jar(&jar, &[])?;
        assert!(read_archive_classes(&jar)?.is_empty());
        std::fs::remove_file(jar)?;
        Ok(())
    }

    #[test]
    fn rejects_non_zip_input() -> Result<()> {
        let path = temp_path("not_a.jar");
        std::fs::write(&path, b"plain text")?;
        assert!(read_archive_classes(&path).is_err());
        std::fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            hash_content(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
