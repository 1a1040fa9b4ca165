//! Conversions between the dotted names people write and the slash-separated internal names
//! class-files use.

pub fn internal_name(name: &str) -> String {
    name.replace('.', "/")
}

pub fn external_name(name: &str) -> String {
    name.replace('/', ".")
}

/// The part after the last package separator.
pub fn simple_name(name: &str) -> &str {
    name.rsplit(['/', '.']).next().unwrap_or(name)
}

/// Class name for an archive entry such as `com/example/Widget.class`.
///
/// Multi-release entries under `META-INF/versions/<n>/` map to the same class name as the
/// base entry. Returns `None` for anything that is not a class-file.
pub fn class_name_from_entry(entry: &str) -> Option<String> {
    let path = entry.replace('\\', "/");
    let stem = path.strip_suffix(".class")?;
    let stem = match stem.strip_prefix("META-INF/versions/") {
        Some(rest) => rest.split_once('/')?.1,
        None => stem,
    };
    if stem.is_empty() || stem.ends_with('/') {
        return None;
    }
    Some(stem.to_string())
}

/// Java release of a multi-release entry, e.g. 11 for `META-INF/versions/11/a/B.class`.
/// `None` for base entries.
pub fn release_from_entry(entry: &str) -> Option<u32> {
    let path = entry.replace('\\', "/");
    let rest = path.strip_prefix("META-INF/versions/")?;
    rest.split_once('/')?.0.parse().ok()
}

/// Field descriptor for a type as written in source: `int` is `I`, `java.lang.String[]` is
/// `[Ljava/lang/String;`. Anything that is not a primitive is taken as a class name.
pub fn type_descriptor(type_name: &str) -> String {
    if let Some(component) = type_name.strip_suffix("[]") {
        return format!("[{}", type_descriptor(component));
    }
    let primitive = match type_name {
        "boolean" => 'Z',
        "byte" => 'B',
        "char" => 'C',
        "double" => 'D',
        "float" => 'F',
        "int" => 'I',
        "long" => 'J',
        "short" => 'S',
        "void" => 'V',
        _ => return format!("L{};", internal_name(type_name)),
    };
    primitive.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_between_forms() {
        assert_eq!(internal_name("com.example.Widget"), "com/example/Widget");
        assert_eq!(external_name("com/example/Widget$Part"), "com.example.Widget$Part");
        assert_eq!(simple_name("com/example/Widget"), "Widget");
        assert_eq!(simple_name("Widget"), "Widget");
    }

    #[test]
    fn entry_names() {
        assert_eq!(
            class_name_from_entry("com/example/Widget.class").as_deref(),
            Some("com/example/Widget")
        );
        assert_eq!(
            class_name_from_entry("META-INF/versions/11/com/example/Widget.class").as_deref(),
            Some("com/example/Widget")
        );
        assert_eq!(class_name_from_entry("META-INF/MANIFEST.MF"), None);
        assert_eq!(class_name_from_entry("META-INF/versions/11/"), None);
    }

    #[test]
    fn releases_of_versioned_entries() {
        assert_eq!(release_from_entry("META-INF/versions/11/com/example/Widget.class"), Some(11));
        assert_eq!(release_from_entry("META-INF/versions/9/A.class"), Some(9));
        assert_eq!(release_from_entry("com/example/Widget.class"), None);
        assert_eq!(release_from_entry("META-INF/versions/next/A.class"), None);
    }

    #[test]
    fn type_descriptors() {
        assert_eq!(type_descriptor("int"), "I");
        assert_eq!(type_descriptor("long"), "J");
        assert_eq!(type_descriptor("boolean[][]"), "[[Z");
        assert_eq!(type_descriptor("java.lang.String"), "Ljava/lang/String;");
        assert_eq!(type_descriptor("java/util/Map[]"), "[Ljava/util/Map;");
    }
}
