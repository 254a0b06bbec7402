//! OCI Token Validation
//!
//! Strict, whole-string checks for container tags and image name components.
//! Nothing is normalized: a token is accepted as-is or rejected.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// First and last characters are word characters; interior may also hold `.` and `-`.
/// 128 characters max.
static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_](?:[A-Za-z0-9_.-]{0,126}[A-Za-z0-9_])?$").expect("tag regex is valid")
});

/// Lowercase alphanumeric or underscore first, then any-case alphanumerics, `_`, `.`, `-`.
static IMAGE_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9_][A-Za-z0-9_.-]*$").expect("image name regex is valid")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OciError {
    #[error("Invalid container tag: {0:?}")]
    InvalidTag(String),

    #[error("Invalid image name: {0:?}")]
    InvalidImageName(String),
}

/// Validate an OCI container tag.
pub fn validate_tag(tag: &str) -> Result<(), OciError> {
    if TAG_REGEX.is_match(tag) {
        Ok(())
    } else {
        Err(OciError::InvalidTag(tag.to_string()))
    }
}

/// Validate a single OCI image name component (no `/` or `:`).
pub fn validate_image_name(name: &str) -> Result<(), OciError> {
    if IMAGE_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(OciError::InvalidImageName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_tags() {
        let long = "a".repeat(128);
        for tag in [
            "latest",
            "v1.0.0",
            "v1.11.0",
            "abc123def456789",
            "main",
            "1",
            "_private",
            "my.tag",
            "my-tag",
            "My.Tag-1_0",
            long.as_str(),
        ] {
            assert!(validate_tag(tag).is_ok(), "expected {tag:?} to be accepted");
        }
    }

    #[test]
    fn test_invalid_tags() {
        let long = "a".repeat(129);
        for tag in [
            "",
            "tag/with/slash",
            "tag:with:colon",
            "tag with space",
            ".starts-with-dot",
            "-starts-with-hyphen",
            long.as_str(),
            "café",
            "日本語",
            "tag@version",
            "ends-with-dot.",
            "release-",
        ] {
            let err = validate_tag(tag).unwrap_err();
            assert!(err.to_string().starts_with("Invalid container tag"));
        }
    }

    #[test]
    fn test_image_names() {
        for name in ["example", "my-component", "api_server", "v1.0", "0config", "_private", "a"] {
            assert!(validate_image_name(name).is_ok(), "expected {name:?} to be accepted");
        }
        for name in ["", "Uppercase", "-starts", ".starts", "name/slash", "name:colon", "café"] {
            assert_eq!(
                validate_image_name(name),
                Err(OciError::InvalidImageName(name.to_string()))
            );
        }
    }
}
