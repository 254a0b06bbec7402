//! Base Image Rewriter
//!
//! Replaces `base_image` literals tagged with the sentinel tag in place,
//! keeping every byte outside the replaced literal untouched. Either all
//! matching literals of a file are rewritten or none are.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::discovery::{python_files, DiscoveryError};
use crate::locator::{get_image_literal_locations, ImageLiteralLocation, LocatorError};
use crate::oci::{validate_tag, OciError};
use crate::SENTINEL_TAG;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(transparent)]
    Tag(#[from] OciError),

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("Multi-line base_image values are not supported (function '{function}' in {})", .file.display())]
    MultiLine { file: PathBuf, function: String },

    #[error("Literal for function '{function}' no longer matches line {line} of {}", .file.display())]
    StaleLocation { file: PathBuf, function: String, line: usize },

    #[error("Failed to access {}: {source}", .file.display())]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single-line replacement of bytes `start_col..end_col` on `line` (0-indexed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub line: usize,
    pub start_col: usize,
    pub end_col: usize,
    pub replacement: String,
}

/// Apply non-overlapping edits right-to-left over the original lines.
///
/// Edits are ordered by descending `(line, start_col)` so each splice leaves
/// the offsets of the remaining edits on that line valid.
pub fn apply_edits(lines: &[&str], edits: &[TextEdit]) -> Option<String> {
    let mut ordered: Vec<&TextEdit> = edits.iter().collect();
    ordered.sort_by(|a, b| (b.line, b.start_col).cmp(&(a.line, a.start_col)));

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    for edit in ordered {
        let line = out.get_mut(edit.line)?;
        let head = line.get(..edit.start_col)?;
        let tail = line.get(edit.end_col..)?;
        *line = format!("{}{}{}", head, edit.replacement, tail);
    }
    Some(out.concat())
}

/// Quote used by the literal starting at `col`: a triple quote when the quote
/// character repeats twice more, otherwise the single character.
fn quote_at(line: &str, col: usize) -> Option<&str> {
    let bytes = line.as_bytes();
    let quote = *bytes.get(col)?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let len = if bytes.get(col + 1..col + 3) == Some(&[quote, quote][..]) { 3 } else { 1 };
    line.get(col..col + len)
}

/// Whether a literal is rewrite-eligible: under `<prefix>-` and tagged with the sentinel.
pub fn is_override_candidate(value: &str, image_prefix: &str) -> bool {
    value
        .strip_prefix(image_prefix)
        .is_some_and(|rest| rest.starts_with('-'))
        && value.ends_with(&format!(":{}", SENTINEL_TAG))
}

fn retag(value: &str, new_tag: &str) -> String {
    let name = value.rsplit_once(':').map_or(value, |(name, _)| name);
    format!("{}:{}", name, new_tag)
}

fn build_edit(
    file: &Path,
    lines: &[&str],
    location: &ImageLiteralLocation,
    new_tag: &str,
) -> Result<TextEdit, RewriteError> {
    let stale = || RewriteError::StaleLocation {
        file: file.to_path_buf(),
        function: location.function_name.clone(),
        line: location.start_line,
    };
    let line_idx = location.start_line.checked_sub(1).ok_or_else(stale)?;
    let line = lines.get(line_idx).ok_or_else(stale)?;
    let quote = quote_at(line, location.start_col).ok_or_else(stale)?;
    let literal = line.get(location.start_col..location.end_col).ok_or_else(stale)?;

    // Splice only the tag so escapes elsewhere in the literal stay as written.
    let body = literal.strip_suffix(quote).ok_or_else(stale)?;
    if let Some(head) = body.strip_suffix(SENTINEL_TAG).filter(|h| h.ends_with(':')) {
        return Ok(TextEdit {
            line: line_idx,
            start_col: location.start_col + head.len(),
            end_col: location.start_col + body.len(),
            replacement: new_tag.to_string(),
        });
    }

    Ok(TextEdit {
        line: line_idx,
        start_col: location.start_col,
        end_col: location.end_col,
        replacement: format!("{quote}{}{quote}", retag(&location.value, new_tag)),
    })
}

/// Rewrite every sentinel-tagged `<prefix>-...` literal in `file` to `new_tag`.
///
/// Returns whether the file changed and, if so, its new content. With
/// `dry_run` the file is left as is.
pub fn override_file_images(
    file: &Path,
    new_tag: &str,
    image_prefix: &str,
    dry_run: bool,
) -> Result<(bool, Option<String>), RewriteError> {
    validate_tag(new_tag)?;

    let locations = get_image_literal_locations(file)?;
    let candidates: Vec<_> = locations
        .iter()
        .filter(|loc| is_override_candidate(&loc.value, image_prefix))
        .collect();
    if candidates.is_empty() {
        return Ok((false, None));
    }

    if let Some(multi) = candidates.iter().find(|loc| !loc.is_single_line()) {
        return Err(RewriteError::MultiLine {
            file: file.to_path_buf(),
            function: multi.function_name.clone(),
        });
    }

    let original = fs::read_to_string(file).map_err(|source| RewriteError::Io {
        file: file.to_path_buf(),
        source,
    })?;
    let lines: Vec<&str> = original.split_inclusive('\n').collect();

    let edits = candidates
        .iter()
        .map(|loc| build_edit(file, &lines, loc, new_tag))
        .collect::<Result<Vec<_>, _>>()?;

    let content = apply_edits(&lines, &edits).ok_or_else(|| RewriteError::StaleLocation {
        file: file.to_path_buf(),
        function: candidates[0].function_name.clone(),
        line: candidates[0].start_line,
    })?;
    if content == original {
        return Ok((false, None));
    }

    if !dry_run {
        fs::write(file, &content).map_err(|source| RewriteError::Io {
            file: file.to_path_buf(),
            source,
        })?;
    }
    Ok((true, Some(content)))
}

/// Apply [`override_file_images`] to every `.py` file below `directories`.
///
/// Missing directories are skipped. Stops at the first error.
pub fn override_base_images(
    directories: &[PathBuf],
    new_tag: &str,
    image_prefix: &str,
    dry_run: bool,
) -> Result<Vec<PathBuf>, RewriteError> {
    validate_tag(new_tag)?;

    let mut modified = Vec::new();
    for file in python_files(directories)? {
        let (changed, _) = override_file_images(&file, new_tag, image_prefix, dry_run)?;
        if changed {
            let action = if dry_run { "would update" } else { "updated" };
            info!(file = %file.display(), action, "base image override");
            modified.push(file);
        }
    }
    Ok(modified)
}
