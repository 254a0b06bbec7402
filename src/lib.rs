//! ImageGov Core - Base Image Governance
//!
//! Keeps the container images of a component/pipeline catalog honest:
//! 1. Find `base_image` literals in decorated definitions and where they sit
//! 2. Compile definitions and resolve the images they will really run
//! 3. Check resolved images against an allowlist or an expected tag
//! 4. Rewrite sentinel-tagged literals in place, byte-for-byte
//!
//! Validation and rewriting are independent: validation compiles and never
//! edits source; rewriting edits source and never compiles.

pub mod oci;
pub mod locator;
pub mod compiler;
pub mod resolver;
pub mod policy;
pub mod rewrite;
pub mod validation;
pub mod pipeline;
pub mod discovery;
pub mod hashing;

pub use oci::{validate_image_name, validate_tag, OciError};
pub use locator::{find_decorated_functions, get_image_literal_locations, DecoratorKind, ImageLiteralLocation, LocatorError};
pub use compiler::{
    classify_member, compile_and_get_output, CompileError, CompileErrorKind, CompiledOutput, DecoratedKind, ModuleHandle,
    PipelineCompiler, PythonInterpreter, SourceLoader,
};
pub use resolver::extract_images;
pub use policy::{is_valid, AllowlistPolicy, PolicyError, TagPolicy};
pub use rewrite::{override_base_images, override_file_images, RewriteError};
pub use validation::{ValidationReport, ValidationResult, ValidationStatus};
pub use pipeline::{GovernancePipeline, PipelineError};
pub use discovery::{discover_assets, Asset, DiscoveryError};

/// Tag meaning "always override me"; the only tag the rewriter replaces.
pub const SENTINEL_TAG: &str = "main";

/// Image prefix of the catalog's own images.
pub const DEFAULT_IMAGE_PREFIX: &str = "ghcr.io/kubeflow/pipelines-components";
