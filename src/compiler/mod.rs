//! Compiler Invoker
//!
//! Loads a source file as a module through a [`SourceLoader`], finds the
//! decorated callables it exposes, invokes the external compiler through a
//! [`PipelineCompiler`] and normalizes the emitted document stream into a
//! [`CompiledOutput`].

pub mod python;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::debug;

use crate::locator::DecoratorKind;

pub use python::PythonInterpreter;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static COMPILE_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_compile_call_count() -> u32 {
    COMPILE_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_compile_call_count() {
    COMPILE_CALL_COUNT.store(0, Ordering::SeqCst);
}

/// Compilation failure scoped to one asset file.
#[derive(Debug, Error)]
#[error("{}: {kind}", .file.display())]
pub struct CompileError {
    pub file: PathBuf,
    pub kind: CompileErrorKind,
}

#[derive(Debug, Error)]
pub enum CompileErrorKind {
    #[error("Failed to load module: {0}")]
    Load(String),

    #[error("Compilation failed for function '{function}': {message}")]
    Compile { function: String, message: String },

    #[error("Failed to read compiled output {}: {message}", .path.display())]
    Output { path: PathBuf, message: String },

    #[error("Compiler produced no mapping documents")]
    NoDocuments,

    #[error("Cannot tell pipeline spec from platform spec in two-document output")]
    AmbiguousDocuments,

    #[error("Compiler produced {0} documents; at most two are supported")]
    UnsupportedDocumentCount(usize),
}

impl CompileError {
    pub fn new(file: impl Into<PathBuf>, kind: CompileErrorKind) -> Self {
        Self { file: file.into(), kind }
    }
}

/// Marker attributes a loaded module member exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSurface {
    pub name: String,
    #[serde(default)]
    pub callable: bool,
    #[serde(default)]
    pub component_spec: bool,
    /// `component_spec` found one wrapper level down (`__wrapped__`).
    #[serde(default)]
    pub wrapped_component_spec: bool,
    #[serde(default)]
    pub pipeline_spec: bool,
    #[serde(default)]
    pub pipeline_func: bool,
}

/// A module loaded under a unique name, described by its public surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleHandle {
    pub path: PathBuf,
    pub name: String,
    pub members: Vec<MemberSurface>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoratedKind {
    Component,
    Pipeline,
    Unknown,
}

impl From<DecoratorKind> for DecoratedKind {
    fn from(kind: DecoratorKind) -> Self {
        match kind {
            DecoratorKind::Component => Self::Component,
            DecoratorKind::Pipeline => Self::Pipeline,
        }
    }
}

/// Classify a loaded member by the markers it exposes.
///
/// Members showing both component and pipeline markers are `Unknown`.
pub fn classify_member(member: &MemberSurface) -> DecoratedKind {
    if !member.callable {
        return DecoratedKind::Unknown;
    }
    let component = member.component_spec || member.wrapped_component_spec;
    let pipeline = member.pipeline_spec || member.pipeline_func;
    match (component, pipeline) {
        (true, false) => DecoratedKind::Component,
        (false, true) => DecoratedKind::Pipeline,
        _ => DecoratedKind::Unknown,
    }
}

impl ModuleHandle {
    /// Public members of the given kind, in module order.
    pub fn decorated_callables(&self, kind: DecoratedKind) -> Vec<&MemberSurface> {
        self.members
            .iter()
            .filter(|m| !m.name.starts_with('_'))
            .filter(|m| kind != DecoratedKind::Unknown && classify_member(m) == kind)
            .collect()
    }
}

/// Turns a file into a loaded module handle.
pub trait SourceLoader {
    fn load(&self, path: &Path, unique_name: &str) -> Result<ModuleHandle, CompileError>;
}

/// Runs the external compiler on one callable of a loaded module.
pub trait PipelineCompiler {
    fn compile(&self, module: &ModuleHandle, callable: &str, output_path: &Path) -> Result<(), CompileError>;
}

/// Canonical shape of one compiler run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CompiledOutput {
    Single(Mapping),
    Pair { pipeline_spec: Mapping, platform_spec: Mapping },
}

impl CompiledOutput {
    /// Normalize the mapping documents of one compiler stream.
    pub fn from_documents(file: &Path, mut docs: Vec<Mapping>) -> Result<Self, CompileError> {
        match docs.len() {
            0 => Err(CompileError::new(file, CompileErrorKind::NoDocuments)),
            1 => Ok(Self::Single(docs.remove(0))),
            2 => {
                let second = docs.remove(1);
                let first = docs.remove(0);
                match (document_role(&first), document_role(&second)) {
                    (Some(DocumentRole::Pipeline), Some(DocumentRole::Platform)) => Ok(Self::Pair {
                        pipeline_spec: first,
                        platform_spec: second,
                    }),
                    (Some(DocumentRole::Platform), Some(DocumentRole::Pipeline)) => Ok(Self::Pair {
                        pipeline_spec: second,
                        platform_spec: first,
                    }),
                    _ => Err(CompileError::new(file, CompileErrorKind::AmbiguousDocuments)),
                }
            }
            n => Err(CompileError::new(file, CompileErrorKind::UnsupportedDocumentCount(n))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentRole {
    Pipeline,
    Platform,
}

fn document_role(doc: &Mapping) -> Option<DocumentRole> {
    let platforms = matches!(doc.get("platforms"), Some(Value::Mapping(_)));
    let pipeline = doc.contains_key("deploymentSpec") || doc.contains_key("root");
    match (platforms, pipeline) {
        (true, false) => Some(DocumentRole::Platform),
        (false, true) => Some(DocumentRole::Pipeline),
        _ => None,
    }
}

/// Parse a multi-document YAML stream, keeping mapping documents only.
pub fn parse_document_stream(content: &str) -> Result<Vec<Mapping>, serde_yaml::Error> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        if let Value::Mapping(mapping) = Value::deserialize(document)? {
            docs.push(mapping);
        }
    }
    Ok(docs)
}

/// Read back what the compiler wrote for `file` at `output_path`.
pub fn read_compiled_output(file: &Path, output_path: &Path) -> Result<CompiledOutput, CompileError> {
    let output_err = |message: String| {
        CompileError::new(
            file,
            CompileErrorKind::Output {
                path: output_path.to_path_buf(),
                message,
            },
        )
    };
    let content = fs::read_to_string(output_path).map_err(|e| output_err(e.to_string()))?;
    let docs = parse_document_stream(&content).map_err(|e| output_err(e.to_string()))?;
    debug!(file = %file.display(), documents = docs.len(), "read compiled output");
    CompiledOutput::from_documents(file, docs)
}

/// Compile one callable and return its normalized output. Always recompiles.
pub fn compile_and_get_output(
    compiler: &dyn PipelineCompiler,
    module: &ModuleHandle,
    callable: &str,
    output_path: &Path,
) -> Result<CompiledOutput, CompileError> {
    #[cfg(feature = "test-hooks")]
    COMPILE_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

    debug!(module = %module.name, callable, output = %output_path.display(), "compiling");
    compiler.compile(module, callable, output_path)?;
    read_compiled_output(&module.path, output_path)
}
