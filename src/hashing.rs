//! Hashing - Stable Names for Loaded Modules
//!
//! Every asset file is loaded under its own module name and every compiled
//! callable gets its own scratch file. Names are sanitized paths plus a short
//! SHA-256 digest of the raw path, so two paths never share a name even when
//! they sanitize to the same text.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::locator::DecoratorKind;

/// Hex characters of the path digest appended to module names.
const DIGEST_LEN: usize = 12;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Collapse each run of non-word characters into `_` and make the result a
/// valid identifier.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    if !out.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        out.insert_str(0, "m_");
    }
    out
}

/// `<pass>_<kind>_<path>_<digest>`, sanitized.
pub fn unique_module_name(pass: &str, kind: DecoratorKind, path: &Path) -> String {
    let raw = path.to_string_lossy();
    let digest = sha256_hex(raw.as_bytes());
    let kind = match kind {
        DecoratorKind::Component => "component",
        DecoratorKind::Pipeline => "pipeline",
    };
    sanitize_identifier(&format!("{}_{}_{}_{}", pass, kind, raw, &digest[..DIGEST_LEN]))
}

/// Scratch file name for one compiled callable of a module.
pub fn artifact_file_name(module_name: &str, callable: &str) -> String {
    format!("{}_{}.yaml", module_name, sanitize_identifier(callable))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
