//! Governance Pipeline - Batch Validation Passes
//!
//! A pass loads and compiles each asset file in turn, resolves the images the
//! compiled output will run, and folds everything into a [`ValidationReport`].
//! Per-file load/compile failures become invalid records and the pass moves
//! on; scratch-directory and discovery failures abort the pass.
//!
//! One scratch directory lives for the whole pass and is removed when it ends.
//! Files are processed sequentially; a hung compiler hangs the pass.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compiler::{compile_and_get_output, CompileError, DecoratedKind, PipelineCompiler, SourceLoader};
use crate::discovery::{candidate_asset_files, Asset, DiscoveryError};
use crate::hashing::{artifact_file_name, unique_module_name};
use crate::locator::DecoratorKind;
use crate::policy::{self, AllowlistPolicy, TagCheck, TagPolicy};
use crate::resolver::extract_images;
use crate::validation::{ValidationReport, ValidationResult};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to create scratch directory: {0}")]
    Scratch(#[source] std::io::Error),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Images of one file, or `None` when it has no decorated callables of its kind.
pub type AssetImages = Option<BTreeSet<String>>;

/// Runs validation passes against a loader/compiler backend.
pub struct GovernancePipeline<B> {
    backend: B,
}

impl<B: SourceLoader + PipelineCompiler> GovernancePipeline<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Load `file` under a unique name and compile every decorated callable of `kind`.
    pub fn compile_asset_images(
        &self,
        pass: &str,
        kind: DecoratorKind,
        file: &Path,
        scratch: &Path,
    ) -> Result<AssetImages, CompileError> {
        let module_name = unique_module_name(pass, kind, file);
        let module = self.backend.load(file, &module_name)?;

        let callables = module.decorated_callables(DecoratedKind::from(kind));
        if callables.is_empty() {
            debug!(file = %file.display(), ?kind, "no decorated callables");
            return Ok(None);
        }

        let mut images = BTreeSet::new();
        for callable in callables {
            let output_path = scratch.join(artifact_file_name(&module_name, &callable.name));
            let output = compile_and_get_output(&self.backend, &module, &callable.name, &output_path)?;
            images.extend(extract_images(&output));
        }
        Ok(Some(images))
    }

    /// Compile every `component.py`/`pipeline.py` below `directories` and check
    /// that images under the policy prefix carry the expected tag.
    pub fn check_base_image_tags(
        &self,
        directories: &[PathBuf],
        tags: &TagPolicy,
    ) -> Result<ValidationReport, PipelineError> {
        let candidates = candidate_asset_files(directories)?;
        if candidates.is_empty() {
            return Ok(ValidationReport::new(0, BTreeSet::new(), vec![]));
        }

        let scratch = TempDir::new().map_err(PipelineError::Scratch)?;
        let mut results = Vec::new();
        let mut all_images = BTreeSet::new();

        for (kind, file) in &candidates {
            info!(file = %file.display(), "checking base image tags");
            let images = match self.compile_asset_images("check_base_image_tags", *kind, file, scratch.path()) {
                Ok(Some(images)) => images,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "asset failed to compile");
                    results.push(ValidationResult::error(file, &e));
                    continue;
                }
            };

            for image in &images {
                match tags.check(image) {
                    TagCheck::NotGoverned => {}
                    TagCheck::Matches => results.push(ValidationResult::valid(file, image)),
                    TagCheck::Mismatch { found, expected } => {
                        results.push(ValidationResult::invalid(file, &found, Some(expected)))
                    }
                }
            }
            all_images.extend(images);
        }

        Ok(ValidationReport::new(candidates.len(), all_images, results))
    }

    /// Compile each asset and check every resolved image against the allowlist.
    pub fn validate_assets(
        &self,
        assets: &[Asset],
        allowlist: &AllowlistPolicy,
    ) -> Result<ValidationReport, PipelineError> {
        let scratch = TempDir::new().map_err(PipelineError::Scratch)?;
        let mut results = Vec::new();
        let mut all_images = BTreeSet::new();

        for asset in assets {
            info!(category = %asset.category, name = %asset.name, kind = ?asset.kind, "validating base images");
            let images = match self.compile_asset_images("validate_base_images", asset.kind, &asset.path, scratch.path()) {
                Ok(Some(images)) => images,
                Ok(None) => {
                    results.push(ValidationResult::error(
                        &asset.path,
                        format!("No {} decorated functions found", asset.kind.file_name().trim_end_matches(".py")),
                    ));
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "asset failed to compile");
                    results.push(ValidationResult::error(&asset.path, &e));
                    continue;
                }
            };

            let invalid = policy::classify(&images, allowlist);
            for image in &images {
                if invalid.contains(image) {
                    results.push(ValidationResult::invalid(&asset.path, image, None));
                } else {
                    results.push(ValidationResult::valid(&asset.path, image));
                }
            }
            all_images.extend(images);
        }

        Ok(ValidationReport::new(assets.len(), all_images, results))
    }
}
