//! Resolution of tool names to container image references

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ToolError;

const MAX_TAG_LEN: usize = 128;

/// A resolved container image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Lowercase the tool name and replace underscores with hyphens
pub fn normalize_tool_name(tool_name: &str) -> String {
    tool_name.trim().to_lowercase().replace('_', "-")
}

/// Resolve `(tool_name, version)` to `"{prefix}{normalized}:{version}"`.
///
/// Names that do not normalise to a valid repository component, and
/// versions that are not valid image tags, resolve to
/// [`ToolError::ToolNotFound`].
pub fn resolve_image(
    prefix: &str,
    tool_name: &str,
    version: Option<&str>,
    default_version: &str,
) -> Result<ImageRef, ToolError> {
    let name = normalize_tool_name(tool_name);
    if !is_valid_component(&name) {
        return Err(ToolError::ToolNotFound(format!(
            "invalid tool name '{}'",
            tool_name
        )));
    }

    let tag = version
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default_version);
    if !is_valid_tag(tag) {
        return Err(ToolError::ToolNotFound(format!(
            "invalid version '{}' for tool '{}'",
            tag, tool_name
        )));
    }

    Ok(ImageRef::new(format!("{}{}", prefix, name), tag))
}

fn is_valid_component(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    first.is_ascii_alphanumeric()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
}

fn is_valid_tag(tag: &str) -> bool {
    let Some(first) = tag.chars().next() else {
        return false;
    };
    tag.len() <= MAX_TAG_LEN
        && (first.is_ascii_alphanumeric() || first == '_')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}
