//! Class descriptors - the generator's input
//!
//! A descriptor names one syntax-tree node class and lists its fields in
//! order. Descriptors are loaded from JSON, either a bare array or an
//! object with a `classes` array:
//!
//! ```json
//! {
//!   "classes": [
//!     {
//!       "name": "IfStatement",
//!       "doc": "\"if\" \"(\" Expression \")\" Statement",
//!       "fields": [
//!         { "type": "NodeToken", "name": "f0" },
//!         { "type": "Expression", "name": "f2" }
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::error::DescriptorError;
use convert_case::{Case, Casing};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

/// Plain identifier: class and field names
static IDENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier regex"));

/// Field types may be paths (`syntax::Node`)
static TYPE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(::[A-Za-z_][A-Za-z0-9_]*)*$").expect("Invalid type regex")
});

/// Rust keywords that cannot be used as field names
const RESERVED: &[&str] = &[
    "as", "break", "const", "continue", "crate", "else", "enum", "extern", "false", "fn", "for",
    "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref", "return",
    "self", "Self", "static", "struct", "super", "trait", "true", "type", "unsafe", "use", "where",
    "while", "async", "await", "dyn",
];

/// Check a plain identifier
pub fn is_identifier(s: &str) -> bool {
    IDENT_REGEX.is_match(s)
}

/// One `(type, name)` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    #[serde(rename = "type")]
    pub ty: String,
    pub name: String,
}

impl FieldDescriptor {
    pub fn new(ty: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            name: name.into(),
        }
    }
}

/// One node class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub name: String,

    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,

    /// Production text shown in the generated doc comment
    #[serde(default)]
    pub doc: String,
}

impl ClassDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            doc: String::new(),
        }
    }

    pub fn field(mut self, ty: impl Into<String>, name: impl Into<String>) -> Self {
        self.fields.push(FieldDescriptor::new(ty, name));
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// `IfStatement` -> `if_statement`
    pub fn snake_name(&self) -> String {
        self.name.to_case(Case::Snake)
    }

    fn validate(&self) -> Result<(), DescriptorError> {
        if !is_identifier(&self.name) {
            return Err(DescriptorError::InvalidIdentifier {
                class: self.name.clone(),
                ident: self.name.clone(),
            });
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            let bad_name = !is_identifier(&field.name)
                || RESERVED.contains(&field.name.as_str())
                || !seen.insert(field.name.as_str());
            if bad_name {
                return Err(DescriptorError::InvalidIdentifier {
                    class: self.name.clone(),
                    ident: field.name.clone(),
                });
            }
            if !TYPE_REGEX.is_match(&field.ty) {
                return Err(DescriptorError::InvalidIdentifier {
                    class: self.name.clone(),
                    ident: field.ty.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorFile {
    List(Vec<ClassDescriptor>),
    Wrapped { classes: Vec<ClassDescriptor> },
}

/// Check every descriptor and reject duplicate class names
///
/// Class names are compared case-insensitively as well, since each one
/// also becomes a snake_case method name.
pub fn validate(descriptors: &[ClassDescriptor]) -> Result<(), DescriptorError> {
    let mut names = HashSet::new();
    let mut snake = HashSet::new();

    for class in descriptors {
        class.validate()?;
        if !names.insert(class.name.as_str()) || !snake.insert(class.snake_name()) {
            return Err(DescriptorError::DuplicateClass(class.name.clone()));
        }
    }
    Ok(())
}

/// Parse and validate descriptors from JSON text
///
/// `origin` is only used in error messages.
pub fn parse(text: &str, origin: &Path) -> Result<Vec<ClassDescriptor>, DescriptorError> {
    let file: DescriptorFile =
        serde_json::from_str(text).map_err(|source| DescriptorError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

    let descriptors = match file {
        DescriptorFile::List(list) => list,
        DescriptorFile::Wrapped { classes } => classes,
    };
    validate(&descriptors)?;
    Ok(descriptors)
}

/// Read, parse and validate a descriptor file
pub fn load_descriptors(path: &Path) -> Result<Vec<ClassDescriptor>, DescriptorError> {
    let text = std::fs::read_to_string(path).map_err(|source| DescriptorError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> &'static Path {
        Path::new("test.json")
    }

    #[test]
    fn test_parse_wrapped_and_bare() {
        let wrapped = r#"{"classes": [{"name": "Goal", "fields": [{"type": "MainClass", "name": "f0"}]}]}"#;
        let bare = r#"[{"name": "Goal", "fields": [{"type": "MainClass", "name": "f0"}]}]"#;

        let a = parse(wrapped, origin()).unwrap();
        let b = parse(bare, origin()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].fields[0], FieldDescriptor::new("MainClass", "f0"));
        assert_eq!(a[0].doc, "");
    }

    #[test]
    fn test_field_order_preserved() {
        let text = r#"[{"name": "Seq", "fields": [
            {"type": "A", "name": "f0"},
            {"type": "B", "name": "f1"},
            {"type": "C", "name": "f2"}
        ]}]"#;
        let names: Vec<_> = parse(text, origin()).unwrap()[0]
            .fields
            .iter()
            .map(|f| f.name.clone())
            .collect();
        assert_eq!(names, vec!["f0", "f1", "f2"]);
    }

    #[test]
    fn test_snake_name() {
        assert_eq!(ClassDescriptor::new("IfStatement").snake_name(), "if_statement");
        assert_eq!(ClassDescriptor::new("Goal").snake_name(), "goal");
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        let bad_class = [ClassDescriptor::new("1Goal")];
        assert!(matches!(
            validate(&bad_class),
            Err(DescriptorError::InvalidIdentifier { .. })
        ));

        let keyword_field = [ClassDescriptor::new("Goal").field("Node", "type")];
        assert!(matches!(
            validate(&keyword_field),
            Err(DescriptorError::InvalidIdentifier { ident, .. }) if ident == "type"
        ));

        let repeated_field = [ClassDescriptor::new("Goal")
            .field("Node", "f0")
            .field("Node", "f0")];
        assert!(validate(&repeated_field).is_err());

        let path_type = [ClassDescriptor::new("Goal").field("syntax::Node", "f0")];
        assert!(validate(&path_type).is_ok());
    }

    #[test]
    fn test_rejects_duplicate_classes() {
        let dup = [ClassDescriptor::new("Goal"), ClassDescriptor::new("Goal")];
        assert!(matches!(
            validate(&dup),
            Err(DescriptorError::DuplicateClass(name)) if name == "Goal"
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            parse("{not json", origin()),
            Err(DescriptorError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_descriptors(Path::new("/nonexistent/treegen/classes.json")).unwrap_err();
        assert!(matches!(err, DescriptorError::Read { .. }));
    }
}
