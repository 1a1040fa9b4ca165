//! Structural class matchers.
//!
//! Name rules only see the class name; these look at the parsed class itself. `Extends`,
//! `Implements` and `Access` are answered from the header alone, while field, method and
//! annotation matchers need the outline. [`ClassMatcher::requires_outline`] exposes that
//! difference so the cache only pays for outline parsing when a rule can use it.

use serde::{Deserialize, Serialize};

use crate::access::AccessMatcher;
use crate::names::{internal_name, type_descriptor};
use crate::outline::{AnnotationSet, ClassInfo, FieldOutline, MethodOutline};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassMatcher {
    /// Direct superclass only.
    Extends { name: NameMatcher },
    /// Directly declared interfaces only.
    Implements { name: NameMatcher },
    Access(AccessMatcher),
    DeclaresField(FieldMatcher),
    DeclaresMethod(MethodMatcher),
    /// Any of the listed annotations on the class.
    AnnotatedWith { annotations: Vec<String> },
    AllOf { matchers: Vec<ClassMatcher> },
    AnyOf { matchers: Vec<ClassMatcher> },
    Not { matcher: Box<ClassMatcher> },
}

/// A name test. A plain string is an exact match; the object forms are written
/// `{"one_of": [..]}`, `{"starts_with": ".."}` and `{"ends_with": ".."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameMatcher {
    Exact(String),
    OneOf { one_of: Vec<String> },
    StartsWith { starts_with: String },
    EndsWith { ends_with: String },
}

impl NameMatcher {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == name,
            Self::OneOf { one_of } => one_of.iter().any(|n| n == name),
            Self::StartsWith { starts_with } => name.starts_with(starts_with.as_str()),
            Self::EndsWith { ends_with } => name.ends_with(ends_with.as_str()),
        }
    }

    /// Class names only; member names have no package form.
    fn normalize(&mut self) {
        match self {
            Self::Exact(name)
            | Self::StartsWith { starts_with: name }
            | Self::EndsWith { ends_with: name } => *name = internal_name(name),
            Self::OneOf { one_of } => one_of.iter_mut().for_each(|n| *n = internal_name(n)),
        }
    }
}

impl From<&str> for NameMatcher {
    fn from(name: &str) -> Self {
        Self::Exact(name.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMatcher {
    pub name: Option<NameMatcher>,
    pub descriptor: Option<String>,
    /// Field type as written in source, e.g. `int` or `java.lang.String[]`.
    pub of_type: Option<String>,
    pub access: Option<AccessMatcher>,
}

impl FieldMatcher {
    pub fn matches(&self, field: &FieldOutline) -> bool {
        self.name.as_ref().is_none_or(|n| n.matches(&field.name))
            && self.descriptor.as_ref().is_none_or(|d| *d == field.descriptor)
            && self
                .of_type
                .as_deref()
                .is_none_or(|ty| type_descriptor(ty) == field.descriptor)
            && self.access.as_ref().is_none_or(|a| a.matches(field.access))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodForm {
    /// `<init>`
    Constructor,
    /// `<clinit>`
    StaticInitializer,
    /// Anything else.
    Method,
}

impl MethodForm {
    pub fn of(name: &str) -> Self {
        match name {
            "<init>" => Self::Constructor,
            "<clinit>" => Self::StaticInitializer,
            _ => Self::Method,
        }
    }
}

/// One parameter by position, with its type as written in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMatcher {
    pub index: usize,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodMatcher {
    pub name: Option<NameMatcher>,
    pub form: Option<MethodForm>,
    pub descriptor: Option<String>,
    pub parameter_count: Option<usize>,
    /// The full parameter list as source types. Empty means no parameters.
    pub parameters: Option<Vec<String>>,
    pub parameter: Option<ParameterMatcher>,
    /// Return type descriptor, e.g. `V` or `Ljava/lang/String;`.
    pub returns: Option<String>,
    pub access: Option<AccessMatcher>,
    /// Any of these annotations on the method.
    pub annotated_with: Vec<String>,
}

impl MethodMatcher {
    pub fn matches(&self, method: &MethodOutline) -> bool {
        self.name.as_ref().is_none_or(|n| n.matches(&method.name))
            && self.form.is_none_or(|form| form == MethodForm::of(&method.name))
            && self.descriptor.as_ref().is_none_or(|d| *d == method.descriptor)
            && self
                .parameter_count
                .is_none_or(|count| count == method.parameter_count())
            && self
                .parameters
                .as_ref()
                .is_none_or(|types| parameters_are(method, types))
            && self.parameter.as_ref().is_none_or(|p| {
                method
                    .parameter_types()
                    .nth(p.index)
                    .is_some_and(|ty| ty == type_descriptor(&p.type_name))
            })
            && self
                .returns
                .as_deref()
                .is_none_or(|ret| method.return_type() == Some(ret))
            && self.access.as_ref().is_none_or(|a| a.matches(method.access))
            && (self.annotated_with.is_empty()
                || method
                    .annotations
                    .iter()
                    .any(|a| self.annotated_with.contains(a)))
    }
}

fn parameters_are(method: &MethodOutline, types: &[String]) -> bool {
    let Some(mut rest) = method.descriptor.strip_prefix('(') else {
        return false;
    };
    for ty in types {
        match rest.strip_prefix(type_descriptor(ty).as_str()) {
            Some(after) => rest = after,
            None => return false,
        }
    }
    rest.starts_with(')')
}

impl ClassMatcher {
    pub fn matches(&self, class: &ClassInfo) -> bool {
        let header = class.header();
        match self {
            Self::Extends { name } => header.super_name.as_deref().is_some_and(|s| name.matches(s)),
            Self::Implements { name } => header.interfaces.iter().any(|i| name.matches(i)),
            Self::Access(access) => access.matches(header.access),
            Self::DeclaresField(field) => class
                .outline()
                .is_some_and(|o| o.fields.iter().any(|f| field.matches(f))),
            Self::DeclaresMethod(method) => class
                .outline()
                .is_some_and(|o| o.methods.iter().any(|m| method.matches(m))),
            Self::AnnotatedWith { annotations } => class
                .outline()
                .is_some_and(|o| o.annotations.iter().any(|a| annotations.contains(a))),
            Self::AllOf { matchers } => matchers.iter().all(|m| m.matches(class)),
            Self::AnyOf { matchers } => matchers.iter().any(|m| m.matches(class)),
            Self::Not { matcher } => !matcher.matches(class),
        }
    }

    pub fn requires_outline(&self) -> bool {
        match self {
            Self::Extends { .. } | Self::Implements { .. } | Self::Access(_) => false,
            Self::DeclaresField(_) | Self::DeclaresMethod(_) | Self::AnnotatedWith { .. } => true,
            Self::AllOf { matchers } | Self::AnyOf { matchers } => {
                matchers.iter().any(ClassMatcher::requires_outline)
            }
            Self::Not { matcher } => matcher.requires_outline(),
        }
    }

    /// Rewrites every class name to internal form.
    pub(crate) fn normalize(&mut self) {
        let normalize_all = |names: &mut Vec<String>| {
            for name in names.iter_mut() {
                *name = internal_name(name);
            }
        };
        match self {
            Self::Extends { name } | Self::Implements { name } => name.normalize(),
            Self::AnnotatedWith { annotations } => normalize_all(annotations),
            Self::DeclaresMethod(method) => normalize_all(&mut method.annotated_with),
            Self::AllOf { matchers } | Self::AnyOf { matchers } => {
                matchers.iter_mut().for_each(ClassMatcher::normalize)
            }
            Self::Not { matcher } => matcher.normalize(),
            Self::Access(_) | Self::DeclaresField(_) => {}
        }
    }

    pub(crate) fn collect_annotations(&self, into: &mut AnnotationSet) {
        match self {
            Self::AnnotatedWith { annotations } => annotations.iter().for_each(|a| into.insert(a)),
            Self::DeclaresMethod(method) => method.annotated_with.iter().for_each(|a| into.insert(a)),
            Self::AllOf { matchers } | Self::AnyOf { matchers } => {
                matchers.iter().for_each(|m| m.collect_annotations(into))
            }
            Self::Not { matcher } => matcher.collect_annotations(into),
            Self::Extends { .. } | Self::Implements { .. } | Self::Access(_) | Self::DeclaresField(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessFlag, AccessFlags};
    use crate::fixture::ClassFileBuilder;
    use crate::header::parse_header;
    use crate::outline::parse_outline_with;

    fn outline() -> ClassInfo {
        let bytes = ClassFileBuilder::new("com/example/Widget")
            .super_class(Some("com/example/Base"))
            .interface("java/lang/Runnable")
            .field(AccessFlags::PRIVATE | AccessFlags::STATIC, "INSTANCE", "Lcom/example/Widget;")
            .field(AccessFlags::PRIVATE, "labels", "[Ljava/lang/String;")
            .method(AccessFlags::PUBLIC, "<init>", "(Ljava/lang/String;[I)V")
            .method(AccessFlags::STATIC, "<clinit>", "()V")
            .annotated_method(AccessFlags::PUBLIC, "run", "()V", &["com/example/Traced"])
            .method(AccessFlags::PUBLIC, "resize", "(II)Z")
            .annotation("com/example/Component")
            .build();
        let interest = AnnotationSet::new(["com/example/Traced", "com/example/Component"]);
        ClassInfo::Outline(parse_outline_with(&bytes, &interest).unwrap())
    }

    fn parse(json: &str) -> ClassMatcher {
        let mut matcher: ClassMatcher = serde_json::from_str(json).unwrap();
        matcher.normalize();
        matcher
    }

    #[test]
    fn hierarchy_and_access_need_only_the_header() {
        let class = outline();
        let header_only = ClassInfo::Header(class.header().clone());
        for json in [
            r#"{"kind":"extends","name":"com.example.Base"}"#,
            r#"{"kind":"implements","name":"java/lang/Runnable"}"#,
            r#"{"kind":"access","all_of":["public"]}"#,
        ] {
            let matcher = parse(json);
            assert!(!matcher.requires_outline(), "{json}");
            assert!(matcher.matches(&header_only), "{json}");
        }
        assert!(!parse(r#"{"kind":"extends","name":"java/lang/Object"}"#).matches(&class));
    }

    #[test]
    fn member_matchers_use_the_outline() {
        let class = outline();
        let field = ClassMatcher::DeclaresField(FieldMatcher {
            name: Some("INSTANCE".into()),
            access: Some(AccessMatcher {
                all_of: vec![AccessFlag::Static],
                none_of: vec![],
            }),
            ..FieldMatcher::default()
        });
        assert!(field.requires_outline());
        assert!(field.matches(&class));
        assert!(!field.matches(&ClassInfo::Header(class.header().clone())));

        let method = parse(
            r#"{"kind":"declares_method","name":"resize","parameter_count":2,"returns":"Z"}"#,
        );
        assert!(method.matches(&class));
        let traced = parse(r#"{"kind":"declares_method","annotated_with":["com.example.Traced"]}"#);
        assert!(traced.matches(&class));
        let wrong_arity = parse(r#"{"kind":"declares_method","name":"resize","parameter_count":1}"#);
        assert!(!wrong_arity.matches(&class));
    }

    #[test]
    fn member_names_types_and_forms() {
        let class = outline();
        let matches = |json: &str| parse(json).matches(&class);

        assert!(matches(r#"{"kind":"declares_field","of_type":"java.lang.String[]"}"#));
        assert!(matches(r#"{"kind":"declares_field","name":"INSTANCE","of_type":"com.example.Widget"}"#));
        assert!(!matches(r#"{"kind":"declares_field","name":"labels","of_type":"java.lang.String"}"#));
        assert!(!matches(r#"{"kind":"declares_field","name":{"ends_with":"BELS"}}"#));
        assert!(matches(r#"{"kind":"declares_field","name":{"starts_with":"lab"}}"#));

        assert!(matches(r#"{"kind":"declares_method","name":{"one_of":["stop","run"]}}"#));
        assert!(matches(r#"{"kind":"declares_method","name":{"ends_with":"size"},"parameters":["int","int"]}"#));
        assert!(!matches(r#"{"kind":"declares_method","name":"resize","parameters":["int"]}"#));
        assert!(!matches(r#"{"kind":"declares_method","name":"resize","parameters":["int","int","int"]}"#));
        assert!(matches(r#"{"kind":"declares_method","name":"run","parameters":[]}"#));

        assert!(matches(
            r#"{"kind":"declares_method","form":"constructor","parameters":["java.lang.String","int[]"]}"#
        ));
        assert!(matches(
            r#"{"kind":"declares_method","form":"constructor","parameter":{"index":1,"type":"int[]"}}"#
        ));
        assert!(!matches(
            r#"{"kind":"declares_method","form":"constructor","parameter":{"index":2,"type":"int[]"}}"#
        ));
        assert!(matches(r#"{"kind":"declares_method","form":"static_initializer","parameters":[]}"#));
        assert!(!matches(r#"{"kind":"declares_method","form":"method","name":"<init>"}"#));
        assert_eq!(MethodForm::of("<clinit>"), MethodForm::StaticInitializer);
    }

    #[test]
    fn class_name_matchers_are_normalized() {
        let class = outline();
        assert!(parse(r#"{"kind":"extends","name":{"starts_with":"com.example."}}"#).matches(&class));
        assert!(parse(r#"{"kind":"implements","name":{"one_of":["java.io.Closeable","java.lang.Runnable"]}}"#)
            .matches(&class));
        assert!(!parse(r#"{"kind":"implements","name":{"ends_with":".Closeable"}}"#).matches(&class));
        let exact: ClassMatcher = serde_json::from_str(r#"{"kind":"extends","name":"a.B"}"#).unwrap();
        assert_eq!(
            exact,
            ClassMatcher::Extends {
                name: NameMatcher::from("a.B")
            }
        );
    }

    #[test]
    fn combinators() {
        let class = outline();
        let matcher = parse(
            r#"{"kind":"all_of","matchers":[
                {"kind":"annotated_with","annotations":["com.example.Component"]},
                {"kind":"not","matcher":{"kind":"access","all_of":["abstract"]}}
            ]}"#,
        );
        assert!(matcher.requires_outline());
        assert!(matcher.matches(&class));

        let mut interest = AnnotationSet::default();
        matcher.collect_annotations(&mut interest);
        assert!(interest.contains("com/example/Component"));
        assert_eq!(interest.len(), 1);

        let any = parse(
            r#"{"kind":"any_of","matchers":[
                {"kind":"implements","name":"java.io.Closeable"},
                {"kind":"extends","name":"com.example.Base"}
            ]}"#,
        );
        assert!(!any.requires_outline());
        assert!(any.matches(&class));
    }

    #[test]
    fn header_view_of_real_bytes() {
        let bytes = ClassFileBuilder::new("a/B").interface("a/I").build();
        let info = ClassInfo::Header(parse_header(&bytes).unwrap());
        assert!(parse(r#"{"kind":"implements","name":"a.I"}"#).matches(&info));
    }
}
