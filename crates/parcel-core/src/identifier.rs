//! File identifiers: the stable key of one logical upload.
//!
//! An identifier is the display path of the source file, e.g.
//! `photos/2024/beach.jpg`. It doubles as the artifact address, so it must
//! stay inside the artifact root no matter which backend stores it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolViolation;

/// Maximum identifier length in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 1024;

/// A validated, `/`-separated relative path naming one upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileIdentifier(String);

impl FileIdentifier {
    /// Validate `raw` as an identifier.
    ///
    /// Rejects empty strings, absolute paths, `.`/`..`/empty components,
    /// backslashes and control characters.
    pub fn parse(raw: &str) -> Result<Self, ProtocolViolation> {
        let invalid = || ProtocolViolation::InvalidIdentifier(raw.to_string());

        if raw.is_empty() || raw.len() > MAX_IDENTIFIER_LEN {
            return Err(invalid());
        }
        if raw.starts_with('/') || raw.contains('\\') || raw.chars().any(char::is_control) {
            return Err(invalid());
        }
        for component in raw.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(invalid());
            }
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final component: the bare file name.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Public address of the completed artifact.
    pub fn artifact_path(&self) -> String {
        format!("/uploads/{}", self.0)
    }
}

impl fmt::Display for FileIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FileIdentifier {
    type Error = ProtocolViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FileIdentifier> for String {
    fn from(id: FileIdentifier) -> Self {
        id.0
    }
}

impl AsRef<str> for FileIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
