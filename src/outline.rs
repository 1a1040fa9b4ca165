//! Field and method signatures, read by continuing the header scan.
//!
//! Attribute bodies are skipped by their declared length. The one exception is
//! `RuntimeVisibleAnnotations` on the class and its methods, which is read when the caller
//! asks for specific annotation types through an [`AnnotationSet`].

use std::collections::HashMap;
use std::ops::Deref;

use serde::Serialize;

use crate::access::AccessFlags;
use crate::bytes::{ByteReader, encode_modified_utf8};
use crate::error::{ClassFormatError, MalformedReason};
use crate::header::{ClassHeader, ClassReader};
use crate::names::internal_name;
use crate::pool::ConstantPool;

type Result<T> = std::result::Result<T, ClassFormatError>;

const RUNTIME_VISIBLE_ANNOTATIONS: &[u8] = b"RuntimeVisibleAnnotations";
const MAX_ANNOTATION_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldOutline {
    pub access: AccessFlags,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MethodOutline {
    pub access: AccessFlags,
    pub name: String,
    pub descriptor: String,
    /// Annotations of interest present on the method, in declaration order.
    pub annotations: Vec<String>,
}

impl MethodOutline {
    /// Parameter type descriptors, e.g. `I` and `[Ljava/lang/String;` for `(I[Ljava/lang/String;)V`.
    pub fn parameter_types(&self) -> ParameterTypes<'_> {
        ParameterTypes {
            rest: self.descriptor.strip_prefix('(').unwrap_or(""),
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_types().count()
    }

    pub fn return_type(&self) -> Option<&str> {
        self.descriptor
            .rsplit_once(')')
            .map(|(_, ret)| ret)
            .filter(|ret| !ret.is_empty())
    }
}

pub struct ParameterTypes<'a> {
    rest: &'a str,
}

impl<'a> Iterator for ParameterTypes<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let bytes = self.rest.as_bytes();
        let dims = bytes.iter().take_while(|&&b| b == b'[').count();
        let end = match bytes.get(dims)? {
            b'L' => dims + self.rest[dims..].find(';')? + 1,
            b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => dims + 1,
            _ => {
                self.rest = "";
                return None;
            }
        };
        let (ty, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClassOutline {
    #[serde(flatten)]
    pub header: ClassHeader,
    pub fields: Vec<FieldOutline>,
    pub methods: Vec<MethodOutline>,
    /// Annotations of interest present on the class, in declaration order.
    pub annotations: Vec<String>,
}

impl Deref for ClassOutline {
    type Target = ClassHeader;

    fn deref(&self) -> &ClassHeader {
        &self.header
    }
}

impl ClassOutline {
    pub fn field(&self, name: &str) -> Option<&FieldOutline> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodOutline> {
        self.methods.iter().filter(move |m| m.name == name)
    }
}

/// What a cache entry holds: either only the header or the full outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ClassInfo {
    Header(ClassHeader),
    Outline(ClassOutline),
}

impl ClassInfo {
    pub fn header(&self) -> &ClassHeader {
        match self {
            Self::Header(header) => header,
            Self::Outline(outline) => &outline.header,
        }
    }

    pub fn outline(&self) -> Option<&ClassOutline> {
        match self {
            Self::Header(_) => None,
            Self::Outline(outline) => Some(outline),
        }
    }
}

/// Annotation types whose presence should be recorded in outlines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSet {
    by_descriptor: HashMap<Box<[u8]>, String>,
}

impl AnnotationSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for name in names {
            set.insert(name.as_ref());
        }
        set
    }

    /// Accepts dotted or internal names.
    pub fn insert(&mut self, name: &str) {
        let name = internal_name(name);
        let descriptor = encode_modified_utf8(&format!("L{name};"));
        self.by_descriptor.insert(descriptor.into_boxed_slice(), name);
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = internal_name(name);
        self.by_descriptor.values().any(|n| *n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.by_descriptor.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_descriptor.len()
    }

    fn lookup(&self, descriptor: &[u8]) -> Option<&str> {
        self.by_descriptor.get(descriptor).map(String::as_str)
    }
}

pub fn parse_outline(bytes: &[u8]) -> Result<ClassOutline> {
    parse_outline_with(bytes, &AnnotationSet::default())
}

pub fn parse_outline_with(bytes: &[u8], interest: &AnnotationSet) -> Result<ClassOutline> {
    let mut reader = ClassReader::open(bytes)?;
    let header = reader.read_header()?;
    reader.read_outline(header, interest)
}

impl ClassReader<'_> {
    /// Continues after [`ClassReader::read_header`].
    pub(crate) fn read_outline(
        &mut self,
        header: ClassHeader,
        interest: &AnnotationSet,
    ) -> Result<ClassOutline> {
        let count = self.input.u2()?;
        let mut fields = Vec::with_capacity(usize::from(count).min(self.input.remaining() / 8));
        for _ in 0..count {
            let (access, name, descriptor) = self.read_member()?;
            self.read_attributes(&AnnotationSet::default())?;
            fields.push(FieldOutline {
                access,
                name,
                descriptor,
            });
        }

        let count = self.input.u2()?;
        let mut methods = Vec::with_capacity(usize::from(count).min(self.input.remaining() / 8));
        for _ in 0..count {
            let (access, name, descriptor) = self.read_member()?;
            let annotations = self.read_attributes(interest)?;
            methods.push(MethodOutline {
                access,
                name,
                descriptor,
                annotations,
            });
        }

        let annotations = self.read_attributes(interest)?;
        Ok(ClassOutline {
            header,
            fields,
            methods,
            annotations,
        })
    }

    fn read_member(&mut self) -> Result<(AccessFlags, String, String)> {
        let bytes = self.input.bytes();
        let access = AccessFlags::from_bits(self.input.u2()?);
        let at = self.input.position();
        let name_index = self.input.u2()?;
        let name = self.pool.utf8(bytes, name_index, at)?;
        let at = self.input.position();
        let descriptor_index = self.input.u2()?;
        let descriptor = self.pool.utf8(bytes, descriptor_index, at)?;
        Ok((access, name, descriptor))
    }

    /// Skips an attribute table, returning the annotations of interest it declares.
    fn read_attributes(&mut self, interest: &AnnotationSet) -> Result<Vec<String>> {
        let bytes = self.input.bytes();
        let count = self.input.u2()?;
        let mut found = Vec::new();
        for _ in 0..count {
            let at = self.input.position();
            let name_index = self.input.u2()?;
            let len = self.input.u4()? as usize;
            let mut body = self.input.sub(len)?;
            if !interest.is_empty()
                && self.pool.utf8_bytes(bytes, name_index, at)? == RUNTIME_VISIBLE_ANNOTATIONS
            {
                read_annotations(&self.pool, &mut body, interest, &mut found)?;
            }
        }
        Ok(found)
    }
}

fn read_annotations(
    pool: &ConstantPool,
    body: &mut ByteReader<'_>,
    interest: &AnnotationSet,
    found: &mut Vec<String>,
) -> Result<()> {
    let bytes = body.bytes();
    let count = body.u2()?;
    for _ in 0..count {
        let at = body.position();
        let type_index = body.u2()?;
        let descriptor = pool.utf8_bytes(bytes, type_index, at)?;
        if let Some(name) = interest.lookup(descriptor) {
            found.push(name.to_string());
        }
        skip_element_pairs(body, 0)?;
    }
    Ok(())
}

fn skip_element_pairs(body: &mut ByteReader<'_>, depth: usize) -> Result<()> {
    let pairs = body.u2()?;
    for _ in 0..pairs {
        body.skip(2)?;
        skip_element_value(body, depth)?;
    }
    Ok(())
}

fn skip_element_value(body: &mut ByteReader<'_>, depth: usize) -> Result<()> {
    if depth > MAX_ANNOTATION_DEPTH {
        return Err(ClassFormatError::malformed(
            body.position(),
            MalformedReason::AnnotationTooDeep,
        ));
    }
    let at = body.position();
    match body.u1()? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => body.skip(2),
        b'e' => body.skip(4),
        b'@' => {
            body.skip(2)?;
            skip_element_pairs(body, depth + 1)
        }
        b'[' => {
            let len = body.u2()?;
            for _ in 0..len {
                skip_element_value(body, depth + 1)?;
            }
            Ok(())
        }
        tag => Err(ClassFormatError::malformed(
            at,
            MalformedReason::UnknownElementTag(tag),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::ClassFileBuilder;
    use crate::header::parse_header;

    fn widget() -> ClassFileBuilder {
        ClassFileBuilder::new("com/example/Widget")
            .interface("java/lang/Runnable")
            .field(AccessFlags::PRIVATE | AccessFlags::FINAL, "size", "I")
            .field(AccessFlags::PRIVATE, "label", "Ljava/lang/String;")
            .method(AccessFlags::PUBLIC, "<init>", "()V")
            .annotated_method(
                AccessFlags::PUBLIC,
                "run",
                "(I[Ljava/lang/String;J)V",
                &["com/example/Traced", "com/example/Other"],
            )
            .method(
                AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
                "resize",
                "(D)Lcom/example/Widget;",
            )
            .annotation("com/example/Component")
            .source_file("Widget.java")
            .wide_constants()
    }

    #[test]
    fn outline_lists_members_in_order() {
        let outline = parse_outline(&widget().build()).unwrap();
        let fields: Vec<_> = outline.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(fields, ["size", "label"]);
        let methods: Vec<_> = outline.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(methods, ["<init>", "run", "resize"]);
        assert_eq!(outline.field("label").unwrap().descriptor, "Ljava/lang/String;");
        assert!(outline.methods.iter().all(|m| m.annotations.is_empty()));
        assert!(outline.annotations.is_empty());
        assert_eq!(outline.class_name, "com/example/Widget");
    }

    #[test]
    fn outline_header_matches_standalone_header() {
        for bytes in [
            widget().build(),
            ClassFileBuilder::new("a/B").build(),
            ClassFileBuilder::new("sample/My例クラス").wide_constants().build(),
        ] {
            let outline = parse_outline(&bytes).unwrap();
            assert_eq!(outline.header, parse_header(&bytes).unwrap());
        }
    }

    #[test]
    fn records_only_annotations_of_interest() {
        let interest = AnnotationSet::new(["com.example.Traced", "com/example/Component"]);
        let outline = parse_outline_with(&widget().build(), &interest).unwrap();
        assert_eq!(outline.annotations, ["com/example/Component"]);
        let run = outline.methods_named("run").next().unwrap();
        assert_eq!(run.annotations, ["com/example/Traced"]);
        assert!(interest.contains("com.example.Traced"));
        assert_eq!(interest.len(), 2);
    }

    #[test]
    fn method_descriptor_parts() {
        let outline = parse_outline(&widget().build()).unwrap();
        let run = outline.methods_named("run").next().unwrap();
        let params: Vec<_> = run.parameter_types().collect();
        assert_eq!(params, ["I", "[Ljava/lang/String;", "J"]);
        assert_eq!(run.return_type(), Some("V"));

        let resize = outline.methods_named("resize").next().unwrap();
        assert_eq!(resize.parameter_count(), 1);
        assert_eq!(resize.return_type(), Some("Lcom/example/Widget;"));
    }

    #[test]
    fn every_truncation_fails_cleanly_or_yields_the_full_outline() {
        let bytes = widget().build();
        let interest = AnnotationSet::new(["com/example/Traced"]);
        let full = parse_outline_with(&bytes, &interest).unwrap();
        for len in 0..bytes.len() {
            let err = parse_outline_with(&bytes[..len], &interest).unwrap_err();
            assert!(err.offset().is_some_and(|offset| offset <= len), "prefix {len}: {err}");
        }
        assert_eq!(parse_outline_with(&bytes, &interest).unwrap(), full);
    }

    #[test]
    fn element_values_are_skipped_structurally() {
        // enum, then nested annotation with one string pair, then an int array
        let bytes = [
            b'e', 0, 1, 0, 2, //
            b'@', 0, 3, 0, 1, 0, 4, b's', 0, 5, //
            b'[', 0, 2, b'I', 0, 6, b'I', 0, 7,
        ];
        let mut body = ByteReader::new(&bytes);
        for _ in 0..3 {
            skip_element_value(&mut body, 0).unwrap();
        }
        assert_eq!(body.remaining(), 0);
    }

    #[test]
    fn malformed_element_values_are_reported() {
        let err = skip_element_value(&mut ByteReader::new(&[b'X', 0, 0]), 0).unwrap_err();
        assert_eq!(err.reason(), Some(MalformedReason::UnknownElementTag(b'X')));

        let nested: Vec<u8> = std::iter::repeat([b'[', 0, 1]).take(64).flatten().collect();
        let err = skip_element_value(&mut ByteReader::new(&nested), 0).unwrap_err();
        assert_eq!(err.reason(), Some(MalformedReason::AnnotationTooDeep));

        let bytes = [b'e', 0, 1, 0, 2, 0xFF];
        let mut outer = ByteReader::new(&bytes);
        let mut body = outer.sub(3).unwrap();
        let err = skip_element_value(&mut body, 0).unwrap_err();
        assert_eq!(err.reason(), Some(MalformedReason::LengthMismatch));
        assert_eq!(err.offset(), Some(1));
    }
}
