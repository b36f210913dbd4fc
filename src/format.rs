//! Format tags and output naming.
//!
//! A [`FormatTag`] is an opaque identifier handed to the engine untouched.
//! The only thing the pipeline itself derives from it is the file extension
//! of the converted artifact.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tags the bundled engine is known to understand. Informational only; the
/// pipeline forwards any tag to the engine.
pub const KNOWN_FORMATS: &[&str] = &["ply", "spz", "splat", "csv"];

/// Opaque format identifier, e.g. `ply`, `spz` or `binary_ply`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatTag(String);

impl FormatTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the tag is in [`KNOWN_FORMATS`].
    pub fn is_known(&self) -> bool {
        KNOWN_FORMATS.contains(&self.extension())
    }

    /// File extension for this tag.
    ///
    /// Encoding or version qualifiers joined with `_` are dropped:
    /// `binary_ply` gives `ply`, `spz_v2` gives `spz`.
    pub fn extension(&self) -> &str {
        self.0
            .rsplit('_')
            .find(|seg| !seg.is_empty() && !is_version_marker(seg))
            .unwrap_or(&self.0)
    }
}

fn is_version_marker(seg: &str) -> bool {
    let mut chars = seg.chars();
    matches!(chars.next(), Some('v' | 'V'))
        && seg.len() > 1
        && chars.all(|c| c.is_ascii_digit())
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormatTag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FormatTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Source and target format of one conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatPair {
    pub source: FormatTag,
    pub target: FormatTag,
}

impl FormatPair {
    pub fn new(source: impl Into<FormatTag>, target: impl Into<FormatTag>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for FormatPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// Name of the converted artifact: the original name with its last
/// extension replaced by the target's extension.
///
/// Names without an extension, or with only a leading dot, keep the whole
/// name as the base.
pub fn output_file_name(original: &str, target: &FormatTag) -> String {
    let base = match original.rfind('.') {
        Some(idx) if idx > 0 => &original[..idx],
        _ => original,
    };
    format!("{base}.{}", target.extension())
}
