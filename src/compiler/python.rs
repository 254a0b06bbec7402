//! Python-backed module loading and compilation.
//!
//! Every call runs the configured interpreter on an embedded driver script.
//! `inspect` loads the file under the requested module name and reports the
//! marker surface of its members as JSON; `compile` loads it the same way and
//! hands one callable to `kfp.compiler.Compiler`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::Deserialize;
use tracing::{debug, warn};

use super::{CompileError, CompileErrorKind, MemberSurface, ModuleHandle, PipelineCompiler, SourceLoader};

const DRIVER: &str = include_str!("driver.py");

/// Default interpreter program.
pub const DEFAULT_PYTHON: &str = "python3";

#[derive(Debug, Deserialize)]
struct InspectReply {
    members: Vec<MemberSurface>,
}

#[derive(Debug, Clone)]
pub struct PythonInterpreter {
    program: PathBuf,
    search_paths: Vec<PathBuf>,
}

impl PythonInterpreter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            search_paths: Vec::new(),
        }
    }

    /// Prepend a directory to the module search path of every run.
    pub fn with_search_path(mut self, root: impl Into<PathBuf>) -> Self {
        self.search_paths.push(root.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, mode: &str, path: &Path, name: &str, extra: &[OsString]) -> std::io::Result<Output> {
        let roots = self
            .search_paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("\n");

        Command::new(&self.program)
            .arg("-c")
            .arg(DRIVER)
            .arg(mode)
            .arg(roots)
            .arg(path)
            .arg(name)
            .args(extra)
            .output()
    }
}

impl Default for PythonInterpreter {
    fn default() -> Self {
        Self::new(DEFAULT_PYTHON)
    }
}

fn stderr_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    // Tracebacks end with the exception line.
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| format!("interpreter exited with {}", output.status))
}

impl SourceLoader for PythonInterpreter {
    fn load(&self, path: &Path, unique_name: &str) -> Result<ModuleHandle, CompileError> {
        let load_err = |message: String| CompileError::new(path, CompileErrorKind::Load(message));

        debug!(path = %path.display(), module = unique_name, "loading module");
        let output = self
            .run("inspect", path, unique_name, &[])
            .map_err(|e| load_err(format!("could not run {}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            return Err(load_err(stderr_message(&output)));
        }

        let reply: InspectReply = serde_json::from_slice(&output.stdout)
            .map_err(|e| load_err(format!("unreadable module description: {}", e)))?;

        Ok(ModuleHandle {
            path: path.to_path_buf(),
            name: unique_name.to_string(),
            members: reply.members,
        })
    }
}

impl PipelineCompiler for PythonInterpreter {
    fn compile(&self, module: &ModuleHandle, callable: &str, output_path: &Path) -> Result<(), CompileError> {
        let compile_err = |message: String| {
            CompileError::new(
                &module.path,
                CompileErrorKind::Compile {
                    function: callable.to_string(),
                    message,
                },
            )
        };

        let extra = [OsString::from(callable), output_path.as_os_str().to_os_string()];
        let output = self
            .run("compile", &module.path, &module.name, &extra)
            .map_err(|e| compile_err(format!("could not run {}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            let message = stderr_message(&output);
            warn!(module = %module.name, callable, %message, "compiler failed");
            return Err(compile_err(message));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile_and_get_output, DecoratedKind};
    use crate::resolver::extract_images;
    use std::fs;

    const STUB_COMPILER: &str = r#"
class Compiler:
    def compile(self, pipeline_func, package_path):
        image = getattr(pipeline_func, "image", "none")
        with open(package_path, "w") as f:
            f.write(
                "deploymentSpec:\n  executors:\n    exec-1:\n      container:\n        image: " + image + "\n"
                "---\n"
                "platforms:\n  kubernetes:\n    deploymentSpec:\n      executors:\n"
                "        exec-1:\n          container:\n            image: plat:1\n"
            )
"#;

    const ASSET: &str = r#"
import functools
import sys

print("noise printed at import")

if sys.modules.get(__name__) is None:
    raise RuntimeError("module not registered under its unique name")


def component(image):
    def wrap(func):
        func.component_spec = object()
        func.image = image
        return func
    return wrap


def pipeline(func):
    func.pipeline_spec = object()
    return func


def _passthrough(func):
    @functools.wraps(func)
    def inner(*args, **kwargs):
        return func(*args, **kwargs)
    return inner


@component("img:train")
def train():
    pass


@_passthrough
@component("img:wrapped")
def wrapped():
    pass


@pipeline
def flow():
    pass


@component("img:hidden")
def _hidden():
    pass
"#;

    fn python_available() -> bool {
        Command::new(DEFAULT_PYTHON)
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn stub_workspace() -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("kfp")).unwrap();
        fs::write(dir.path().join("kfp/__init__.py"), "").unwrap();
        fs::write(dir.path().join("kfp/compiler.py"), STUB_COMPILER).unwrap();
        fs::write(dir.path().join("asset.py"), ASSET).unwrap();
        fs::write(dir.path().join("broken.py"), "raise ImportError('boom at import')\n").unwrap();
        dir
    }

    #[test]
    fn test_inspect_and_compile_through_interpreter() {
        if !python_available() {
            return;
        }
        let dir = stub_workspace();
        let python = PythonInterpreter::default().with_search_path(dir.path());

        let module = python.load(&dir.path().join("asset.py"), "m_unique_asset").unwrap();
        assert_eq!(module.name, "m_unique_asset");

        let components: Vec<_> = module
            .decorated_callables(DecoratedKind::Component)
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(components, vec!["train", "wrapped"]);
        let pipelines: Vec<_> = module
            .decorated_callables(DecoratedKind::Pipeline)
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(pipelines, vec!["flow"]);

        let wrapped = module.members.iter().find(|m| m.name == "wrapped").unwrap();
        assert!(wrapped.wrapped_component_spec);

        let output = compile_and_get_output(&python, &module, "train", &dir.path().join("train.yaml")).unwrap();
        let images: Vec<_> = extract_images(&output).into_iter().collect();
        assert_eq!(images, vec!["img:train".to_string(), "plat:1".to_string()]);
    }

    #[test]
    fn test_interpreter_failures_carry_the_exception() {
        if !python_available() {
            return;
        }
        let dir = stub_workspace();
        let python = PythonInterpreter::default().with_search_path(dir.path());

        let err = python.load(&dir.path().join("broken.py"), "m_broken").unwrap_err();
        match err.kind {
            CompileErrorKind::Load(message) => assert!(message.contains("boom at import"), "{message}"),
            other => panic!("expected load error, got {other:?}"),
        }

        let module = python.load(&dir.path().join("asset.py"), "m_asset").unwrap();
        let err = python.compile(&module, "missing", &dir.path().join("missing.yaml")).unwrap_err();
        match err.kind {
            CompileErrorKind::Compile { function, message } => {
                assert_eq!(function, "missing");
                assert!(message.contains("AttributeError"), "{message}");
            }
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn test_inspect_reply_tolerates_missing_markers() {
        let reply: InspectReply =
            serde_json::from_str(r#"{"members": [{"name": "train", "callable": true, "component_spec": true}]}"#)
                .unwrap();
        assert_eq!(reply.members.len(), 1);
        assert!(reply.members[0].component_spec);
        assert!(!reply.members[0].pipeline_func);
    }

    #[test]
    fn test_missing_interpreter_is_load_error() {
        let interpreter = PythonInterpreter::new("/nonexistent/python-for-imagegov-tests");
        let err = interpreter.load(Path::new("component.py"), "m_component").unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::Load(_)));
        assert_eq!(err.file, PathBuf::from("component.py"));
    }

    #[test]
    fn test_driver_is_embedded() {
        assert!(DRIVER.contains("kfp.compiler"));
        assert!(PythonInterpreter::default().program() == Path::new(DEFAULT_PYTHON));
    }
}
