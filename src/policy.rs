//! Base Image Policy
//!
//! An image is valid when it is unset (empty string), listed verbatim in the
//! allowlist, or fully matched by one of the allowlist patterns. There is no
//! registry-prefix shortcut: a prefix has to be expressed as a pattern.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;
use tracing::debug;

/// Default allowlist location relative to the repository root.
pub const DEFAULT_ALLOWLIST_PATH: &str = "scripts/validate_base_images/base_image_allowlist.yaml";

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Failed to read allowlist {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Allowlist {} is not valid YAML: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Allowlist must be a YAML mapping: {}", .0.display())]
    NotAMapping(PathBuf),

    #[error("'allowed_images' must be a list of strings: {}", .0.display())]
    InvalidImages(PathBuf),

    #[error("'allowed_image_patterns' must be a list of regex strings: {}", .0.display())]
    InvalidPatterns(PathBuf),

    #[error("Invalid regex {pattern:?} in allowlist {}: {source}", .path.display())]
    InvalidRegex {
        path: PathBuf,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Immutable allowlist of exact images and full-match patterns.
#[derive(Debug, Clone, Default)]
pub struct AllowlistPolicy {
    allowed_images: HashSet<String>,
    allowed_image_patterns: Vec<Regex>,
}

impl AllowlistPolicy {
    /// Build a policy; patterns are anchored so they must match the whole image.
    pub fn new<I, P>(images: I, patterns: P) -> Result<Self, regex::Error>
    where
        I: IntoIterator,
        I::Item: Into<String>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let allowed_image_patterns = patterns
            .into_iter()
            .map(|p| compile_pattern(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            allowed_images: images.into_iter().map(Into::into).collect(),
            allowed_image_patterns,
        })
    }

    /// Load from a YAML file with optional `allowed_images` and
    /// `allowed_image_patterns` lists. Any bad entry rejects the whole file.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let content = fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content, path)
    }

    pub fn from_yaml_str(content: &str, path: &Path) -> Result<Self, PolicyError> {
        let data: Value = serde_yaml::from_str(content).map_err(|source| PolicyError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        let data = match data {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(m) => m,
            _ => return Err(PolicyError::NotAMapping(path.to_path_buf())),
        };

        let images = string_list(data.get("allowed_images"))
            .ok_or_else(|| PolicyError::InvalidImages(path.to_path_buf()))?;
        let patterns = string_list(data.get("allowed_image_patterns"))
            .ok_or_else(|| PolicyError::InvalidPatterns(path.to_path_buf()))?;

        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in &patterns {
            let regex = compile_pattern(pattern).map_err(|source| PolicyError::InvalidRegex {
                path: path.to_path_buf(),
                pattern: pattern.clone(),
                source,
            })?;
            compiled.push(regex);
        }

        debug!(
            path = %path.display(),
            images = images.len(),
            patterns = compiled.len(),
            "loaded base image allowlist"
        );
        Ok(Self {
            allowed_images: images.into_iter().collect(),
            allowed_image_patterns: compiled,
        })
    }

    pub fn allowed_images(&self) -> impl Iterator<Item = &str> {
        self.allowed_images.iter().map(String::as_str)
    }

    pub fn allowed_image_patterns(&self) -> &[Regex] {
        &self.allowed_image_patterns
    }

    fn allows(&self, image: &str) -> bool {
        self.allowed_images.contains(image) || self.allowed_image_patterns.iter().any(|p| p.is_match(image))
    }
}

/// Patterns must match the whole image.
fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}

/// Missing key is an empty list; anything but a list of strings (an explicit
/// `null` included) is `None`.
fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value {
        None => Some(Vec::new()),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        Some(_) => None,
    }
}

/// Empty means "use the compiler default" and is always valid.
pub fn is_valid(image: &str, policy: &AllowlistPolicy) -> bool {
    image.is_empty() || policy.allows(image)
}

/// The images that fail the policy.
pub fn classify<'a, I>(images: I, policy: &AllowlistPolicy) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    images
        .into_iter()
        .filter(|image| !is_valid(image, policy))
        .cloned()
        .collect()
}

/// Outcome of checking one image against an expected tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagCheck {
    /// Image is outside `<prefix>-`; not governed.
    NotGoverned,
    Matches,
    Mismatch { found: String, expected: String },
}

/// Tag-equality policy for images under `<image_prefix>-`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPolicy {
    pub image_prefix: String,
    pub expected_tag: String,
}

impl TagPolicy {
    pub fn new(image_prefix: impl Into<String>, expected_tag: impl Into<String>) -> Self {
        Self {
            image_prefix: image_prefix.into(),
            expected_tag: expected_tag.into(),
        }
    }

    pub fn governs(&self, image: &str) -> bool {
        image
            .strip_prefix(self.image_prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Canonical form reported for mismatches.
    pub fn expected_form(&self) -> String {
        format!("{}-<name>:{}", self.image_prefix, self.expected_tag)
    }

    pub fn check(&self, image: &str) -> TagCheck {
        if !self.governs(image) {
            return TagCheck::NotGoverned;
        }
        let suffix = format!(":{}", self.expected_tag);
        if image.ends_with(&suffix) {
            TagCheck::Matches
        } else {
            TagCheck::Mismatch {
                found: image.to_string(),
                expected: self.expected_form(),
            }
        }
    }
}
