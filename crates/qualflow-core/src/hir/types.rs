//! Underlying (unqualified) types and annotations of the host tree

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
}

impl PrimitiveKind {
    /// Width in bits of the integral kinds; `None` for boolean and floating point.
    pub fn bit_width(self) -> Option<u32> {
        match self {
            PrimitiveKind::Byte => Some(8),
            PrimitiveKind::Char => Some(16),
            PrimitiveKind::Short => Some(16),
            PrimitiveKind::Int => Some(32),
            PrimitiveKind::Long => Some(64),
            _ => None,
        }
    }

    pub fn is_integral(self) -> bool {
        self.bit_width().is_some()
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::Short => "short",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Int => "int",
            PrimitiveKind::Long => "long",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
        }
    }
}

/// The underlying type of an expression or declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JavaType {
    Primitive(PrimitiveKind),
    Declared { name: String, type_args: Vec<JavaType> },
    Array(Box<JavaType>),
    TypeVar(String),
    Null,
    Void,
}

impl JavaType {
    pub const INT: JavaType = JavaType::Primitive(PrimitiveKind::Int);
    pub const LONG: JavaType = JavaType::Primitive(PrimitiveKind::Long);
    pub const BOOLEAN: JavaType = JavaType::Primitive(PrimitiveKind::Boolean);
    pub const CHAR: JavaType = JavaType::Primitive(PrimitiveKind::Char);

    pub fn declared(name: impl Into<String>) -> Self {
        JavaType::Declared {
            name: name.into(),
            type_args: Vec::new(),
        }
    }

    pub fn generic(name: impl Into<String>, type_args: Vec<JavaType>) -> Self {
        JavaType::Declared {
            name: name.into(),
            type_args,
        }
    }

    pub fn string() -> Self {
        Self::declared("String")
    }

    pub fn is_string(&self) -> bool {
        matches!(self, JavaType::Declared { name, .. } if name == "String" || name == "java.lang.String")
    }

    pub fn is_boolean(&self) -> bool {
        match self {
            JavaType::Primitive(PrimitiveKind::Boolean) => true,
            JavaType::Declared { name, .. } => name == "Boolean",
            _ => false,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, JavaType::Primitive(_))
    }

    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self {
            JavaType::Primitive(kind) => Some(*kind),
            JavaType::Declared { name, .. } => match name.as_str() {
                "Byte" => Some(PrimitiveKind::Byte),
                "Short" => Some(PrimitiveKind::Short),
                "Character" => Some(PrimitiveKind::Char),
                "Integer" => Some(PrimitiveKind::Int),
                "Long" => Some(PrimitiveKind::Long),
                _ => None,
            },
            _ => None,
        }
    }

    /// Integral primitives and their boxed forms
    pub fn is_integral(&self) -> bool {
        self.primitive_kind().is_some_and(PrimitiveKind::is_integral)
    }

    pub fn type_args(&self) -> &[JavaType] {
        match self {
            JavaType::Declared { type_args, .. } => type_args,
            _ => &[],
        }
    }

    pub fn simple_name(&self) -> Option<&str> {
        match self {
            JavaType::Declared { name, .. } => Some(name.rsplit('.').next().unwrap_or(name)),
            _ => None,
        }
    }
}

impl fmt::Display for JavaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JavaType::Primitive(kind) => write!(f, "{}", kind.name()),
            JavaType::Declared { name, type_args } if type_args.is_empty() => write!(f, "{name}"),
            JavaType::Declared { name, type_args } => {
                let args: Vec<String> = type_args.iter().map(|t| t.to_string()).collect();
                write!(f, "{name}<{}>", args.join(", "))
            }
            JavaType::Array(component) => write!(f, "{component}[]"),
            JavaType::TypeVar(name) => write!(f, "{name}"),
            JavaType::Null => write!(f, "null"),
            JavaType::Void => write!(f, "void"),
        }
    }
}

/// Value of one annotation element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationValue {
    Int(i64),
    Bool(bool),
    Str(String),
    StrList(Vec<String>),
}

/// A source annotation such as `@Regex(2)` or `@EnsuresCalledMethods(value="#1", methods="close")`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub args: BTreeMap<String, AnnotationValue>,
}

impl Annotation {
    pub fn marker(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: AnnotationValue) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name || self.name.rsplit('.').next() == Some(name)
    }

    pub fn int_arg(&self, key: &str) -> Option<i64> {
        match self.args.get(key) {
            Some(AnnotationValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn bool_arg(&self, key: &str) -> Option<bool> {
        match self.args.get(key) {
            Some(AnnotationValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        match self.args.get(key) {
            Some(AnnotationValue::Str(s)) => Some(s),
            Some(AnnotationValue::StrList(list)) if list.len() == 1 => Some(&list[0]),
            _ => None,
        }
    }

    /// String-array element; a single string is accepted as a one-element array.
    pub fn str_list_arg(&self, key: &str) -> Vec<String> {
        match self.args.get(key) {
            Some(AnnotationValue::StrList(list)) => list.clone(),
            Some(AnnotationValue::Str(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        if self.args.is_empty() {
            return Ok(());
        }
        let args: Vec<String> = self
            .args
            .iter()
            .map(|(k, v)| match v {
                AnnotationValue::Int(i) => format!("{k}={i}"),
                AnnotationValue::Bool(b) => format!("{k}={b}"),
                AnnotationValue::Str(s) => format!("{k}=\"{s}\""),
                AnnotationValue::StrList(l) => format!("{k}={{{}}}", l.join(", ")),
            })
            .collect();
        write!(f, "({})", args.join(", "))
    }
}

/// Find the first annotation with the given simple or qualified name
pub fn find_annotation<'a>(annotations: &'a [Annotation], name: &str) -> Option<&'a Annotation> {
    annotations.iter().find(|a| a.is(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_widths() {
        assert_eq!(PrimitiveKind::Byte.bit_width(), Some(8));
        assert_eq!(PrimitiveKind::Long.bit_width(), Some(64));
        assert_eq!(PrimitiveKind::Double.bit_width(), None);
        assert!(JavaType::declared("Integer").is_integral());
        assert!(!JavaType::string().is_integral());
    }

    #[test]
    fn test_type_display() {
        let ty = JavaType::generic("List", vec![JavaType::string()]);
        assert_eq!(ty.to_string(), "List<String>");
        assert_eq!(JavaType::Array(Box::new(JavaType::INT)).to_string(), "int[]");
    }

    #[test]
    fn test_annotation_args() {
        let anno = Annotation::marker("org.example.EnsuresCalledMethods")
            .with_arg("value", AnnotationValue::Str("#1".into()))
            .with_arg("methods", AnnotationValue::StrList(vec!["close".into()]));
        assert!(anno.is("EnsuresCalledMethods"));
        assert_eq!(anno.str_list_arg("value"), vec!["#1".to_string()]);
        assert_eq!(anno.str_arg("methods"), Some("close"));
        assert_eq!(anno.int_arg("methods"), None);
    }
}
