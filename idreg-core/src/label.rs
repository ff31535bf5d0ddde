//! Username label normalization.
//!
//! A requested name is either `label` or `label.parent`. Labels are
//! compared, hashed and stored in their normalized (lowercase) form, and the
//! parent domain defaults to [`DEFAULT_PARENT_DOMAIN`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Parent domain used when a request does not name one.
pub const DEFAULT_PARENT_DOMAIN: &str = "dash";

/// Minimum label length in characters.
pub const MIN_LABEL_LEN: usize = 3;

/// Maximum label length in characters.
pub const MAX_LABEL_LEN: usize = 63;

/// A validated, normalized username label within a parent domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    /// The label as the caller spelled it (case preserved).
    display: String,
    /// Lowercased label used for hashing and lookups.
    normalized: String,
    /// Normalized parent domain.
    parent: String,
}

impl Label {
    /// Parse `label` or `label.parent`, falling back to `default_parent`.
    pub fn parse_with_parent(input: &str, default_parent: &str) -> Result<Self> {
        let trimmed = input.trim();
        let (label, parent) = match trimmed.split_once('.') {
            Some((label, parent)) => (label, parent),
            None => (trimmed, default_parent),
        };

        let normalized = label.to_ascii_lowercase();
        validate_label(input, &normalized)?;

        let parent = parent.to_ascii_lowercase();
        validate_parent(input, &parent)?;

        Ok(Self {
            display: label.to_string(),
            normalized,
            parent,
        })
    }

    /// Parse against [`DEFAULT_PARENT_DOMAIN`].
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_with_parent(input, DEFAULT_PARENT_DOMAIN)
    }

    /// The label as requested.
    pub fn display(&self) -> &str {
        &self.display
    }

    /// The lowercased label.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// The parent domain.
    pub fn parent(&self) -> &str {
        &self.parent
    }

    /// `normalized.parent`, the string that gets committed to.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.normalized, self.parent)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

fn validate_label(input: &str, normalized: &str) -> Result<()> {
    let len = normalized.chars().count();
    if len < MIN_LABEL_LEN || len > MAX_LABEL_LEN {
        return Err(Error::invalid_label(
            input,
            format!("length {} outside {}..={}", len, MIN_LABEL_LEN, MAX_LABEL_LEN),
        ));
    }
    if let Some(c) = normalized
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(Error::invalid_label(input, format!("invalid character {:?}", c)));
    }
    if normalized.starts_with('-') || normalized.ends_with('-') {
        return Err(Error::invalid_label(input, "leading or trailing '-'"));
    }
    Ok(())
}

fn validate_parent(input: &str, parent: &str) -> Result<()> {
    if parent.is_empty() {
        return Err(Error::invalid_label(input, "empty parent domain"));
    }
    for segment in parent.split('.') {
        let ok = !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !ok {
            return Err(Error::invalid_label(
                input,
                format!("invalid parent domain {:?}", parent),
            ));
        }
    }
    Ok(())
}
