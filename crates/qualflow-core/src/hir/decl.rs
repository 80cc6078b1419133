//! Declarations: methods, fields, classes and compilation units

use super::expr::{Body, Span};
use super::types::{find_annotation, Annotation, JavaType};
use std::collections::HashMap;
use std::sync::Arc;

/// A generic method's type parameter `T extends upper`
#[derive(Debug, Clone, PartialEq)]
pub struct TypeParam {
    pub name: String,
    pub upper: JavaType,
    /// Qualifier annotations on the upper and lower bounds
    pub upper_annotations: Vec<Annotation>,
    pub lower_annotations: Vec<Annotation>,
}

impl TypeParam {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            upper: JavaType::declared("Object"),
            upper_annotations: Vec::new(),
            lower_annotations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: JavaType,
    pub annotations: Vec<Annotation>,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: JavaType) -> Self {
        Self {
            name: name.into(),
            ty,
            annotations: Vec::new(),
        }
    }

    pub fn annotated(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }
}

/// The resolved signature of a method or constructor
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSig {
    pub owner: String,
    pub name: String,
    pub type_params: Vec<TypeParam>,
    pub params: Vec<Param>,
    pub return_type: JavaType,
    pub return_annotations: Vec<Annotation>,
    /// Annotations on the receiver (`this`) parameter
    pub receiver_annotations: Vec<Annotation>,
    /// Declaration annotations such as contracts
    pub annotations: Vec<Annotation>,
    pub is_static: bool,
    pub is_constructor: bool,
    pub side_effect_free: bool,
}

impl MethodSig {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            type_params: Vec::new(),
            params: Vec::new(),
            return_type: JavaType::Void,
            return_annotations: Vec::new(),
            receiver_annotations: Vec::new(),
            annotations: Vec::new(),
            is_static: false,
            is_constructor: false,
            side_effect_free: false,
        }
    }

    pub fn constructor(owner: impl Into<String>) -> Self {
        let owner = owner.into();
        Self {
            return_type: JavaType::declared(owner.clone()),
            is_constructor: true,
            ..Self::new(owner, "<init>")
        }
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_type_param(mut self, param: TypeParam) -> Self {
        self.type_params.push(param);
        self
    }

    pub fn returning(mut self, ty: JavaType) -> Self {
        self.return_type = ty;
        self
    }

    pub fn with_return_annotation(mut self, annotation: Annotation) -> Self {
        self.return_annotations.push(annotation);
        self
    }

    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn pure(mut self) -> Self {
        self.side_effect_free = true;
        self
    }

    pub fn arc(self) -> Arc<MethodSig> {
        Arc::new(self)
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        find_annotation(&self.annotations, name).is_some()
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// `Owner.name(T1, T2)`, unique within a class table
    pub fn qualified_name(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.ty.to_string()).collect();
        format!("{}.{}({})", self.owner, self.name, params.join(", "))
    }

    /// Same name and parameter count; enough to decide overriding in the host tree
    pub fn overrides_shape(&self, other: &MethodSig) -> bool {
        !self.is_static
            && !other.is_static
            && !self.is_constructor
            && self.name == other.name
            && self.params.len() == other.params.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub sig: Arc<MethodSig>,
    pub body: Option<Body>,
    pub span: Span,
}

impl MethodDecl {
    pub fn new(sig: MethodSig, body: Body) -> Self {
        Self {
            sig: Arc::new(sig),
            body: Some(body),
            span: Span::default(),
        }
    }

    pub fn abstract_method(sig: MethodSig) -> Self {
        Self {
            sig: Arc::new(sig),
            body: None,
            span: Span::default(),
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: JavaType,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub superclass: Option<String>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn extending(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    pub fn with_field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_method(mut self, method: MethodDecl) -> Self {
        self.methods.push(method);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilationUnit {
    pub name: String,
    pub classes: Vec<ClassDecl>,
}

impl CompilationUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: Vec::new(),
        }
    }

    pub fn with_class(mut self, class: ClassDecl) -> Self {
        self.classes.push(class);
        self
    }
}

/// Class lookup across every compilation unit seen by a session
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    classes: HashMap<String, ClassDecl>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_unit(&mut self, unit: &CompilationUnit) {
        for class in &unit.classes {
            self.classes.insert(class.name.clone(), class.clone());
        }
    }

    pub fn class(&self, name: &str) -> Option<&ClassDecl> {
        self.classes.get(name)
    }

    /// Every method overridden by `sig`, nearest superclass first
    pub fn overridden_methods(&self, sig: &MethodSig) -> Vec<Arc<MethodSig>> {
        let mut result = Vec::new();
        let mut visited = Vec::new();
        let mut current = self.class(&sig.owner).and_then(|c| c.superclass.clone());
        while let Some(name) = current {
            if visited.contains(&name) {
                break;
            }
            let Some(class) = self.class(&name) else {
                break;
            };
            result.extend(
                class
                    .methods
                    .iter()
                    .filter(|m| sig.overrides_shape(&m.sig))
                    .map(|m| Arc::clone(&m.sig)),
            );
            visited.push(name);
            current = class.superclass.clone();
        }
        result
    }

    /// Declared annotations of `field` looked up through the superclass chain
    pub fn field_annotations(&self, class: &str, field: &str) -> Option<&[Annotation]> {
        let mut current = Some(class.to_string());
        let mut steps = 0;
        while let Some(name) = current {
            let class = self.class(&name)?;
            if let Some(decl) = class.field(field) {
                return Some(&decl.annotations);
            }
            current = class.superclass.clone();
            steps += 1;
            if steps > self.classes.len() {
                return None;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_unit() -> CompilationUnit {
        let close = MethodSig::new("Base", "close");
        let child_close = MethodSig::new("Child", "close");
        let other = MethodSig::new("Child", "close").with_param(Param::new("x", JavaType::INT));
        CompilationUnit::new("Unit.java")
            .with_class(ClassDecl::new("Base").with_method(MethodDecl::new(close, Body::new())))
            .with_class(
                ClassDecl::new("Child")
                    .extending("Base")
                    .with_method(MethodDecl::new(child_close, Body::new()))
                    .with_method(MethodDecl::new(other, Body::new())),
            )
    }

    #[test]
    fn test_overridden_methods() {
        let mut table = ClassTable::new();
        table.register_unit(&make_unit());

        let child = table.class("Child").unwrap();
        let overridden = table.overridden_methods(&child.methods[0].sig);
        assert_eq!(overridden.len(), 1);
        assert_eq!(overridden[0].owner, "Base");

        // Different arity does not override
        assert!(table.overridden_methods(&child.methods[1].sig).is_empty());
    }

    #[test]
    fn test_cyclic_superclasses_terminate() {
        let mut table = ClassTable::new();
        table.register_unit(
            &CompilationUnit::new("Cycle.java")
                .with_class(ClassDecl::new("A").extending("B"))
                .with_class(ClassDecl::new("B").extending("A")),
        );
        let sig = MethodSig::new("A", "m");
        assert!(table.overridden_methods(&sig).is_empty());
        assert!(table.field_annotations("A", "missing").is_none());
    }

    #[test]
    fn test_qualified_name() {
        let sig = MethodSig::new("Foo", "bar").with_param(Param::new("s", JavaType::string()));
        assert_eq!(sig.qualified_name(), "Foo.bar(String)");
    }
}
