//! Validation Records
//!
//! Non-compliant images are data, not errors: every finding becomes a
//! record so one pass can report every violation in every file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
}

/// One per-file, per-image finding, or a per-file load/compile failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub file: PathBuf,
    pub status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn valid(file: &Path, image: &str) -> Self {
        Self {
            file: file.to_path_buf(),
            status: ValidationStatus::Valid,
            found: Some(image.to_string()),
            expected: None,
            error: None,
        }
    }

    pub fn invalid(file: &Path, found: &str, expected: Option<String>) -> Self {
        Self {
            file: file.to_path_buf(),
            status: ValidationStatus::Invalid,
            found: Some(found.to_string()),
            expected,
            error: None,
        }
    }

    pub fn error(file: &Path, error: impl ToString) -> Self {
        Self {
            file: file.to_path_buf(),
            status: ValidationStatus::Invalid,
            found: None,
            expected: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == ValidationStatus::Valid
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregate of one pass. Passes iff every record is valid (or there are none).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub files_checked: usize,
    pub images: BTreeSet<String>,
    pub results: Vec<ValidationResult>,
    pub checked_at: DateTime<Utc>,
}

impl ValidationReport {
    /// Records are re-sorted by file so output order never depends on processing order.
    pub fn new(files_checked: usize, images: BTreeSet<String>, mut results: Vec<ValidationResult>) -> Self {
        results.sort_by(|a, b| a.file.cmp(&b.file));
        Self {
            valid: results.iter().all(ValidationResult::is_valid),
            files_checked,
            images,
            results,
            checked_at: Utc::now(),
        }
    }

    pub fn invalid(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.is_valid())
    }

    pub fn has_errors(&self) -> bool {
        self.results.iter().any(ValidationResult::is_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report_passes() {
        let report = ValidationReport::new(0, BTreeSet::new(), vec![]);
        assert!(report.valid);
        assert!(!report.has_errors());
    }

    #[test]
    fn test_any_invalid_fails_and_order_is_by_file() {
        let results = vec![
            ValidationResult::valid(Path::new("z/component.py"), "img:main"),
            ValidationResult::error(Path::new("a/component.py"), "Failed to load module: boom"),
            ValidationResult::invalid(Path::new("m/pipeline.py"), "img:v1", Some("img-<name>:main".into())),
        ];
        let report = ValidationReport::new(3, BTreeSet::new(), results);

        assert!(!report.valid);
        assert!(report.has_errors());
        assert_eq!(report.invalid().count(), 2);
        let files: Vec<_> = report.results.iter().map(|r| r.file.to_string_lossy().into_owned()).collect();
        assert_eq!(files, vec!["a/component.py", "m/pipeline.py", "z/component.py"]);
    }

    #[test]
    fn test_record_serialization_omits_unset_fields() {
        let json = serde_json::to_value(ValidationResult::error(Path::new("f.py"), "bad")).unwrap();
        assert_eq!(json["status"], "invalid");
        assert_eq!(json["error"], "bad");
        assert!(json.get("found").is_none());
    }
}
