//! Structural Locator
//!
//! Walks a Python source file's syntax tree to find decorated component and
//! pipeline definitions, and the exact source span of each `base_image`
//! string literal supplied to their decorators.
//!
//! Decorators are matched by their final identifier only (`component`,
//! `dsl.component`, `kfp.dsl.component` all match `component`). Imports are
//! not resolved, so a user-defined decorator called `component` is picked up
//! too. Tightening this changes which files match and must be done on purpose.

use std::fs;
use std::path::{Path, PathBuf};

use rustpython_parser::{ast, Parse};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decorator identifiers treated as component definitions.
pub const COMPONENT_DECORATORS: &[&str] = &["component", "container_component", "notebook_component"];

/// Decorator identifiers treated as pipeline definitions.
pub const PIPELINE_DECORATORS: &[&str] = &["pipeline"];

/// Keyword argument holding the container image.
pub const BASE_IMAGE_ARG: &str = "base_image";

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("Failed to read {}: {source}", .file.display())]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse {}: {message}", .file.display())]
    Parse { file: PathBuf, message: String },

    #[error("base_image must be a string literal for function '{function}' in {}", .file.display())]
    NonLiteralImage { function: String, file: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoratorKind {
    Component,
    Pipeline,
}

impl DecoratorKind {
    /// Classify a decorator identifier, if it is one we govern.
    pub fn from_identifier(name: &str) -> Option<Self> {
        if COMPONENT_DECORATORS.contains(&name) {
            Some(Self::Component)
        } else if PIPELINE_DECORATORS.contains(&name) {
            Some(Self::Pipeline)
        } else {
            None
        }
    }
}

/// One `base_image` literal inside a decorator call.
///
/// Lines are 1-indexed, columns are 0-indexed UTF-8 byte offsets.
/// `start_col` is the column of the opening quote; `end_col` is one past the
/// closing quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLiteralLocation {
    pub function_name: String,
    pub value: String,
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl ImageLiteralLocation {
    pub fn is_single_line(&self) -> bool {
        self.start_line == self.end_line
    }
}

/// Find every decorated component/pipeline definition in a file.
pub fn find_decorated_functions(file: &Path) -> Result<Vec<(DecoratorKind, String)>, LocatorError> {
    let source = read_source(file)?;
    find_decorated_functions_in_source(&source, file)
}

pub fn find_decorated_functions_in_source(
    source: &str,
    file: &Path,
) -> Result<Vec<(DecoratorKind, String)>, LocatorError> {
    let suite = parse_source(source, file)?;
    let mut defs = Vec::new();
    collect_definitions(&suite, &mut defs);

    let found = defs
        .iter()
        .filter_map(|def| {
            def.decorators
                .iter()
                .filter_map(decorator_name)
                .find_map(DecoratorKind::from_identifier)
                .map(|kind| (kind, def.name.to_string()))
        })
        .collect();
    Ok(found)
}

/// Names of functions carrying a decorator whose final identifier is `decorator`.
pub fn find_functions_with_decorator(file: &Path, decorator: &str) -> Result<Vec<String>, LocatorError> {
    let source = read_source(file)?;
    let suite = parse_source(&source, file)?;
    let mut defs = Vec::new();
    collect_definitions(&suite, &mut defs);

    Ok(defs
        .iter()
        .filter(|def| def.decorators.iter().any(|d| decorator_name(d) == Some(decorator)))
        .map(|def| def.name.to_string())
        .collect())
}

/// Locate every `base_image` literal in component/pipeline decorator calls.
///
/// Any non-literal value (variable, call, f-string, concatenation) is an error
/// naming the function; no partial result is returned.
pub fn get_image_literal_locations(file: &Path) -> Result<Vec<ImageLiteralLocation>, LocatorError> {
    let source = read_source(file)?;
    get_image_literal_locations_in_source(&source, file)
}

pub fn get_image_literal_locations_in_source(
    source: &str,
    file: &Path,
) -> Result<Vec<ImageLiteralLocation>, LocatorError> {
    let suite = parse_source(source, file)?;
    let index = LineIndex::new(source);
    let mut defs = Vec::new();
    collect_definitions(&suite, &mut defs);

    let mut locations = Vec::new();
    for def in &defs {
        for decorator in def.decorators {
            let ast::Expr::Call(call) = decorator else {
                continue;
            };
            if decorator_name(decorator).and_then(DecoratorKind::from_identifier).is_none() {
                continue;
            }
            let Some(keyword) = call
                .keywords
                .iter()
                .find(|k| k.arg.as_ref().map(|a| a.as_str()) == Some(BASE_IMAGE_ARG))
            else {
                continue;
            };
            locations.push(literal_location(&keyword.value, def.name, source, &index, file)?);
        }
    }
    Ok(locations)
}

/// Final identifier of a decorator: `@name`, `@a.name`, `@a.b.name`, each optionally called.
pub fn decorator_name(decorator: &ast::Expr) -> Option<&str> {
    let target = match decorator {
        ast::Expr::Call(call) => call.func.as_ref(),
        other => other,
    };
    match target {
        ast::Expr::Name(name) => Some(name.id.as_str()),
        ast::Expr::Attribute(attr) => Some(attr.attr.as_str()),
        _ => None,
    }
}

struct Definition<'a> {
    name: &'a str,
    decorators: &'a [ast::Expr],
}

fn read_source(file: &Path) -> Result<String, LocatorError> {
    fs::read_to_string(file).map_err(|source| LocatorError::Io {
        file: file.to_path_buf(),
        source,
    })
}

fn parse_source(source: &str, file: &Path) -> Result<ast::Suite, LocatorError> {
    ast::Suite::parse(source, &file.to_string_lossy()).map_err(|e| LocatorError::Parse {
        file: file.to_path_buf(),
        message: e.to_string(),
    })
}

/// Collect function definitions in source order, descending into nested scopes.
fn collect_definitions<'a>(body: &'a [ast::Stmt], out: &mut Vec<Definition<'a>>) {
    for stmt in body {
        match stmt {
            ast::Stmt::FunctionDef(def) => {
                out.push(Definition {
                    name: def.name.as_str(),
                    decorators: &def.decorator_list,
                });
                collect_definitions(&def.body, out);
            }
            ast::Stmt::AsyncFunctionDef(def) => {
                out.push(Definition {
                    name: def.name.as_str(),
                    decorators: &def.decorator_list,
                });
                collect_definitions(&def.body, out);
            }
            ast::Stmt::ClassDef(def) => collect_definitions(&def.body, out),
            ast::Stmt::If(s) => {
                collect_definitions(&s.body, out);
                collect_definitions(&s.orelse, out);
            }
            ast::Stmt::For(s) => {
                collect_definitions(&s.body, out);
                collect_definitions(&s.orelse, out);
            }
            ast::Stmt::AsyncFor(s) => {
                collect_definitions(&s.body, out);
                collect_definitions(&s.orelse, out);
            }
            ast::Stmt::While(s) => {
                collect_definitions(&s.body, out);
                collect_definitions(&s.orelse, out);
            }
            ast::Stmt::With(s) => collect_definitions(&s.body, out),
            ast::Stmt::AsyncWith(s) => collect_definitions(&s.body, out),
            ast::Stmt::Try(s) => {
                collect_definitions(&s.body, out);
                for handler in &s.handlers {
                    match handler {
                        ast::ExceptHandler::ExceptHandler(h) => collect_definitions(&h.body, out),
                    }
                }
                collect_definitions(&s.orelse, out);
                collect_definitions(&s.finalbody, out);
            }
            ast::Stmt::TryStar(s) => {
                collect_definitions(&s.body, out);
                for handler in &s.handlers {
                    match handler {
                        ast::ExceptHandler::ExceptHandler(h) => collect_definitions(&h.body, out),
                    }
                }
                collect_definitions(&s.orelse, out);
                collect_definitions(&s.finalbody, out);
            }
            ast::Stmt::Match(s) => {
                for case in &s.cases {
                    collect_definitions(&case.body, out);
                }
            }
            _ => {}
        }
    }
}

fn literal_location(
    value: &ast::Expr,
    function: &str,
    source: &str,
    index: &LineIndex,
    file: &Path,
) -> Result<ImageLiteralLocation, LocatorError> {
    let non_literal = || LocatorError::NonLiteralImage {
        function: function.to_string(),
        file: file.to_path_buf(),
    };

    let ast::Expr::Constant(constant) = value else {
        return Err(non_literal());
    };
    let ast::Constant::Str(text) = &constant.value else {
        return Err(non_literal());
    };

    let start = skip_string_prefix(source, usize::from(constant.range.start()));
    let end = usize::from(constant.range.end());
    let (start_line, start_col) = index.position(start);
    let (end_line, end_col) = index.position(end);

    Ok(ImageLiteralLocation {
        function_name: function.to_string(),
        value: text.clone(),
        start_line,
        start_col,
        end_line,
        end_col,
    })
}

/// Move past a string prefix (`r`, `u`, `R`, ...) so the offset lands on the quote.
fn skip_string_prefix(source: &str, offset: usize) -> usize {
    let bytes = source.as_bytes();
    let mut pos = offset;
    while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
        pos += 1;
    }
    pos
}

/// Byte offset to (1-indexed line, 0-indexed byte column).
struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    fn position(&self, offset: usize) -> (usize, usize) {
        let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
        (line + 1, offset - self.line_starts[line])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locate(source: &str) -> Result<Vec<ImageLiteralLocation>, LocatorError> {
        get_image_literal_locations_in_source(source, Path::new("component.py"))
    }

    #[test]
    fn test_extracts_literal_with_quote_column() {
        let source = "from kfp import dsl\n\n@dsl.component(base_image=\"quay.io/org/image:main\")\ndef my_component():\n    pass\n";
        let locations = locate(source).unwrap();

        assert_eq!(locations.len(), 1);
        let loc = &locations[0];
        assert_eq!(loc.function_name, "my_component");
        assert_eq!(loc.value, "quay.io/org/image:main");
        assert_eq!(loc.start_line, 3);
        assert_eq!(loc.end_line, 3);

        let line = source.lines().nth(2).unwrap();
        assert_eq!(&line[loc.start_col..loc.start_col + 1], "\"");
        assert_eq!(&line[loc.start_col..loc.end_col], "\"quay.io/org/image:main\"");
    }

    #[test]
    fn test_decorator_forms() {
        let source = r#"
import kfp
from kfp import dsl
from kfp.dsl import component

@component(base_image="a:main")
def bare():
    pass

@dsl.component(base_image="b:main")
def namespaced():
    pass

@kfp.dsl.component(base_image="c:main")
def qualified():
    pass

@dsl.container_component(base_image="d:main")
def container():
    pass

@dsl.pipeline(name="p")
def pipe():
    pass
"#;
        let values: Vec<_> = locate(source).unwrap().into_iter().map(|l| l.value).collect();
        assert_eq!(values, vec!["a:main", "b:main", "c:main", "d:main"]);

        let kinds = find_decorated_functions_in_source(source, Path::new("component.py")).unwrap();
        assert_eq!(
            kinds,
            vec![
                (DecoratorKind::Component, "bare".to_string()),
                (DecoratorKind::Component, "namespaced".to_string()),
                (DecoratorKind::Component, "qualified".to_string()),
                (DecoratorKind::Component, "container".to_string()),
                (DecoratorKind::Pipeline, "pipe".to_string()),
            ]
        );
    }

    #[test]
    fn test_rejects_non_literal_values() {
        for value in ["compute_tag()", "IMAGE", "f\"img:{TAG}\"", "\"a\" + TAG"] {
            let source = format!("@dsl.component(base_image={value})\ndef build_it():\n    pass\n");
            let err = locate(&source).unwrap_err();
            match err {
                LocatorError::NonLiteralImage { function, .. } => assert_eq!(function, "build_it"),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_bare_decorator_has_no_location() {
        let source = "@dsl.component\ndef plain():\n    pass\n";
        assert!(locate(source).unwrap().is_empty());
    }

    #[test]
    fn test_ignores_other_decorators() {
        let source = "@functools.cache(base_image=\"x:main\")\ndef cached():\n    pass\n";
        assert!(locate(source).unwrap().is_empty());
    }

    #[test]
    fn test_nested_definitions_are_visited() {
        let source = "class Holder:\n    @dsl.component(base_image='n:main')\n    def inner(self):\n        pass\n";
        let locations = locate(source).unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].function_name, "inner");
        assert_eq!(locations[0].start_col, 30);
    }

    #[test]
    fn test_match_and_try_star_bodies_are_visited() {
        let source = "\
match x:
    case 1:
        @dsl.component(base_image=\"registry/ns-m:main\")
        def in_match():
            pass
    case _:
        pass

try:
    pass
except* ValueError:
    @dsl.pipeline(base_image=\"registry/ns-t:main\")
    def in_handler():
        pass
";
        let locations = locate(source).unwrap();
        let found: Vec<_> = locations.iter().map(|l| (l.function_name.as_str(), l.start_line, l.start_col)).collect();
        assert_eq!(found, vec![("in_match", 3, 34), ("in_handler", 12, 29)]);

        let kinds = find_decorated_functions_in_source(source, Path::new("component.py")).unwrap();
        assert_eq!(
            kinds,
            vec![
                (DecoratorKind::Component, "in_match".to_string()),
                (DecoratorKind::Pipeline, "in_handler".to_string()),
            ]
        );
    }

    #[test]
    fn test_string_prefix_is_skipped() {
        let source = "@dsl.component(base_image=r\"p:main\")\ndef raw():\n    pass\n";
        let loc = &locate(source).unwrap()[0];
        assert_eq!(&source[loc.start_col..loc.end_col], "\"p:main\"");
    }

    #[test]
    fn test_parse_error() {
        let err = locate("def oops(:\n  pass\n").unwrap_err();
        assert!(matches!(err, LocatorError::Parse { .. }));
    }

    #[test]
    fn test_line_index() {
        let index = LineIndex::new("ab\ncd\n\nef");
        assert_eq!(index.position(0), (1, 0));
        assert_eq!(index.position(2), (1, 2));
        assert_eq!(index.position(3), (2, 0));
        assert_eq!(index.position(7), (4, 0));
        assert_eq!(index.position(8), (4, 1));
    }
}
