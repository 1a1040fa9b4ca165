//! Synthesizes small, valid class-files.
//!
//! Used by the unit and integration tests to produce realistic inputs without a Java
//! toolchain. Methods get a real `Code` attribute, annotations carry one element of each
//! value shape, and [`ClassFileBuilder::wide_constants`] front-loads one entry of every
//! constant pool kind so parsers have to skip them all.

use std::collections::HashMap;

use crate::access::AccessFlags;
use crate::bytes::encode_modified_utf8;
use crate::header::{JAVA_LANG_OBJECT, MAGIC};

#[derive(Debug, Clone)]
struct Member {
    access: u16,
    name: String,
    descriptor: String,
    annotations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ClassFileBuilder {
    major: u16,
    minor: u16,
    access: u16,
    class_name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<Member>,
    methods: Vec<Member>,
    annotations: Vec<String>,
    source_file: Option<String>,
    wide_constants: bool,
}

impl ClassFileBuilder {
    /// A public class extending `java/lang/Object`, version 52 (Java 8).
    pub fn new(class_name: &str) -> Self {
        Self {
            major: 52,
            minor: 0,
            access: AccessFlags::PUBLIC | AccessFlags::SUPER,
            class_name: class_name.to_string(),
            super_name: Some(JAVA_LANG_OBJECT.to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            annotations: Vec::new(),
            source_file: None,
            wide_constants: false,
        }
    }

    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.major = major;
        self.minor = minor;
        self
    }

    pub fn access(mut self, access: u16) -> Self {
        self.access = access;
        self
    }

    pub fn super_class(mut self, name: Option<&str>) -> Self {
        self.super_name = name.map(str::to_string);
        self
    }

    pub fn interface(mut self, name: &str) -> Self {
        self.interfaces.push(name.to_string());
        self
    }

    pub fn field(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.fields.push(member(access, name, descriptor, &[]));
        self
    }

    pub fn method(self, access: u16, name: &str, descriptor: &str) -> Self {
        self.annotated_method(access, name, descriptor, &[])
    }

    pub fn annotated_method(
        mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        annotations: &[&str],
    ) -> Self {
        self.methods.push(member(access, name, descriptor, annotations));
        self
    }

    /// Adds a runtime-visible annotation to the class.
    pub fn annotation(mut self, name: &str) -> Self {
        self.annotations.push(name.to_string());
        self
    }

    pub fn source_file(mut self, name: &str) -> Self {
        self.source_file = Some(name.to_string());
        self
    }

    pub fn wide_constants(mut self) -> Self {
        self.wide_constants = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut pool = PoolWriter::default();
        if self.wide_constants {
            pool.every_kind(self.major);
        }

        let mut body = Vec::new();
        put_u2(&mut body, self.access);
        put_u2(&mut body, pool.class(&self.class_name));
        let super_index = self.super_name.as_deref().map_or(0, |name| pool.class(name));
        put_u2(&mut body, super_index);
        put_u2(&mut body, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            put_u2(&mut body, pool.class(interface));
        }

        put_u2(&mut body, self.fields.len() as u16);
        for field in &self.fields {
            write_member_head(&mut body, &mut pool, field);
            // one empty marker attribute per field
            put_u2(&mut body, 1);
            put_u2(&mut body, pool.utf8("Deprecated"));
            put_u4(&mut body, 0);
        }

        put_u2(&mut body, self.methods.len() as u16);
        for method in &self.methods {
            write_member_head(&mut body, &mut pool, method);
            let has_code = method.access & (AccessFlags::ABSTRACT | AccessFlags::NATIVE) == 0;
            let has_annotations = !method.annotations.is_empty();
            put_u2(&mut body, u16::from(has_code) + u16::from(has_annotations));
            if has_code {
                let code: &[u8] = &[0x2a, 0xb7, 0x00, 0x01, 0xb1];
                let mut attr = Vec::new();
                put_u2(&mut attr, 2);
                put_u2(&mut attr, 2);
                put_u4(&mut attr, code.len() as u32);
                attr.extend_from_slice(code);
                put_u2(&mut attr, 0);
                put_u2(&mut attr, 0);
                write_attribute(&mut body, &mut pool, "Code", &attr);
            }
            if has_annotations {
                let attr = annotations_attribute(&mut pool, &method.annotations);
                write_attribute(&mut body, &mut pool, "RuntimeVisibleAnnotations", &attr);
            }
        }

        let mut class_attributes = Vec::new();
        if let Some(source) = &self.source_file {
            let index = pool.utf8(source);
            class_attributes.push(("SourceFile", index.to_be_bytes().to_vec()));
        }
        if !self.annotations.is_empty() {
            let attr = annotations_attribute(&mut pool, &self.annotations);
            class_attributes.push(("RuntimeVisibleAnnotations", attr));
        }
        put_u2(&mut body, class_attributes.len() as u16);
        for (name, attr) in &class_attributes {
            write_attribute(&mut body, &mut pool, name, attr);
        }

        let mut out = Vec::with_capacity(10 + pool.bytes.len() + body.len());
        put_u4(&mut out, MAGIC);
        put_u2(&mut out, self.minor);
        put_u2(&mut out, self.major);
        put_u2(&mut out, pool.next);
        out.extend_from_slice(&pool.bytes);
        out.extend_from_slice(&body);
        out
    }
}

fn member(access: u16, name: &str, descriptor: &str, annotations: &[&str]) -> Member {
    Member {
        access,
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        annotations: annotations.iter().map(|a| a.to_string()).collect(),
    }
}

fn write_member_head(body: &mut Vec<u8>, pool: &mut PoolWriter, member: &Member) {
    put_u2(body, member.access);
    put_u2(body, pool.utf8(&member.name));
    put_u2(body, pool.utf8(&member.descriptor));
}

fn write_attribute(body: &mut Vec<u8>, pool: &mut PoolWriter, name: &str, attr: &[u8]) {
    put_u2(body, pool.utf8(name));
    put_u4(body, attr.len() as u32);
    body.extend_from_slice(attr);
}

/// Each annotation carries a string, an int array, a nested annotation and an enum value.
fn annotations_attribute(pool: &mut PoolWriter, annotations: &[String]) -> Vec<u8> {
    let mut attr = Vec::new();
    put_u2(&mut attr, annotations.len() as u16);
    for name in annotations {
        put_u2(&mut attr, pool.utf8(&format!("L{name};")));
        put_u2(&mut attr, 4);

        put_u2(&mut attr, pool.utf8("value"));
        attr.push(b's');
        put_u2(&mut attr, pool.utf8("hello"));

        put_u2(&mut attr, pool.utf8("flags"));
        attr.push(b'[');
        put_u2(&mut attr, 2);
        for value in [1, 2] {
            attr.push(b'I');
            put_u2(&mut attr, pool.integer(value));
        }

        put_u2(&mut attr, pool.utf8("nested"));
        attr.push(b'@');
        put_u2(&mut attr, pool.utf8("Ljava/lang/Deprecated;"));
        put_u2(&mut attr, 0);

        put_u2(&mut attr, pool.utf8("kind"));
        attr.push(b'e');
        put_u2(&mut attr, pool.utf8("Ljava/lang/annotation/ElementType;"));
        put_u2(&mut attr, pool.utf8("TYPE"));
    }
    attr
}

struct PoolWriter {
    bytes: Vec<u8>,
    next: u16,
    utf8: HashMap<String, u16>,
    classes: HashMap<String, u16>,
}

impl Default for PoolWriter {
    fn default() -> Self {
        Self {
            bytes: Vec::new(),
            next: 1,
            utf8: HashMap::new(),
            classes: HashMap::new(),
        }
    }
}

impl PoolWriter {
    fn push(&mut self, tag: u8, body: &[u8], slots: u16) -> u16 {
        let index = self.next;
        self.bytes.push(tag);
        self.bytes.extend_from_slice(body);
        self.next += slots;
        index
    }

    fn utf8(&mut self, text: &str) -> u16 {
        if let Some(&index) = self.utf8.get(text) {
            return index;
        }
        let encoded = encode_modified_utf8(text);
        let mut body = (encoded.len() as u16).to_be_bytes().to_vec();
        body.extend_from_slice(&encoded);
        let index = self.push(1, &body, 1);
        self.utf8.insert(text.to_string(), index);
        index
    }

    fn class(&mut self, name: &str) -> u16 {
        if let Some(&index) = self.classes.get(name) {
            return index;
        }
        let name_index = self.utf8(name);
        let index = self.push(7, &name_index.to_be_bytes(), 1);
        self.classes.insert(name.to_string(), index);
        index
    }

    fn integer(&mut self, value: i32) -> u16 {
        self.push(3, &value.to_be_bytes(), 1)
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let mut body = self.utf8(name).to_be_bytes().to_vec();
        body.extend_from_slice(&self.utf8(descriptor).to_be_bytes());
        self.push(12, &body, 1)
    }

    /// One entry of every kind the given version allows.
    fn every_kind(&mut self, major: u16) {
        self.push(5, &i64::MAX.to_be_bytes(), 2);
        self.integer(-7);
        self.push(4, &1.5f32.to_be_bytes(), 1);
        self.push(6, &2.25f64.to_be_bytes(), 2);
        let text = self.utf8("constant");
        self.push(8, &text.to_be_bytes(), 1);

        let owner = self.class("java/lang/Object");
        let init = self.name_and_type("<init>", "()V");
        let field = self.name_and_type("out", "Ljava/io/PrintStream;");
        let mut method_ref = owner.to_be_bytes().to_vec();
        method_ref.extend_from_slice(&init.to_be_bytes());
        let method = self.push(10, &method_ref, 1);
        self.push(11, &method_ref, 1);
        let mut field_ref = owner.to_be_bytes().to_vec();
        field_ref.extend_from_slice(&field.to_be_bytes());
        self.push(9, &field_ref, 1);

        if major >= 51 {
            let mut handle = vec![7];
            handle.extend_from_slice(&method.to_be_bytes());
            self.push(15, &handle, 1);
            let descriptor = self.utf8("()V");
            self.push(16, &descriptor.to_be_bytes(), 1);
            let mut indy = 0u16.to_be_bytes().to_vec();
            indy.extend_from_slice(&init.to_be_bytes());
            self.push(18, &indy, 1);
            if major >= 55 {
                self.push(17, &indy, 1);
            }
            if major >= 53 {
                let module = self.utf8("java.base");
                self.push(19, &module.to_be_bytes(), 1);
                let package = self.utf8("java/lang");
                self.push(20, &package.to_be_bytes(), 1);
            }
        }
        // a wide entry right before the next regular one
        self.push(5, &0i64.to_be_bytes(), 2);
    }
}

fn put_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}
