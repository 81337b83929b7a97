//! Canonical form of file content.
//!
//! Draft/original equality and the bytes staged at commit both go through a
//! [`ContentCodec`], so two texts that render to the same document are
//! treated as the same file.

use crate::models::FileType;

/// Deterministic text round-trip for one file type.
pub trait ContentCodec: Send + Sync {
    /// Canonical rendering of `text`. Must be idempotent.
    fn canonicalize(&self, file_type: FileType, text: &str) -> String;

    fn same_content(&self, file_type: FileType, a: &str, b: &str) -> bool {
        self.canonicalize(file_type, a) == self.canonicalize(file_type, b)
    }
}

/// Settings files are re-serialized JSON; everything else is compared
/// verbatim after line-ending normalization.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCodec;

impl ContentCodec for DefaultCodec {
    fn canonicalize(&self, file_type: FileType, text: &str) -> String {
        let normalized = text.replace("\r\n", "\n");
        match file_type {
            FileType::Settings => match serde_json::from_str::<serde_json::Value>(&normalized) {
                // serde_json maps are ordered by key.
                Ok(value) => serde_json::to_string_pretty(&value)
                    .map(|s| s + "\n")
                    .unwrap_or(normalized),
                Err(_) => normalized,
            },
            FileType::Yaml | FileType::Markdown => normalized,
        }
    }
}
