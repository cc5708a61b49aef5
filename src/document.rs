//! Document inspection collaborator.
//!
//! Consumed only by the intake stage: whatever the operator attaches to a task is
//! inspected once and handed to the intake pair's content agent as extra context.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ScribeError};

/// Structural metadata about an attached document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub path: PathBuf,
    /// Section (or sheet) names in document order.
    pub sections: Vec<String>,
    pub text: String,
}

impl DocumentInfo {
    /// Render as a context block for the model.
    pub fn to_prompt(&self) -> String {
        let sections = if self.sections.is_empty() {
            "(none)".to_string()
        } else {
            self.sections.join(" | ")
        };
        format!(
            "Attached document: {}\nSections: {}\n\n{}",
            self.path.display(),
            sections,
            self.text
        )
    }
}

#[async_trait]
pub trait DocumentInspector: Send + Sync {
    async fn inspect(&self, path: &Path) -> Result<DocumentInfo>;
}

/// Inspects plain text and markdown files. Sections are markdown headings.
#[derive(Debug, Clone)]
pub struct TextDocumentInspector {
    max_bytes: usize,
}

impl Default for TextDocumentInspector {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024,
        }
    }
}

impl TextDocumentInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_bytes(mut self, max: usize) -> Self {
        self.max_bytes = max;
        self
    }

    fn headings(text: &str) -> Vec<String> {
        text.lines()
            .filter_map(|line| {
                let trimmed = line.trim_start();
                let level = trimmed.chars().take_while(|c| *c == '#').count();
                if (1..=6).contains(&level) && trimmed[level..].starts_with(' ') {
                    Some(trimmed[level..].trim().to_string())
                } else {
                    None
                }
            })
            .filter(|h| !h.is_empty())
            .collect()
    }
}

#[async_trait]
impl DocumentInspector for TextDocumentInspector {
    async fn inspect(&self, path: &Path) -> Result<DocumentInfo> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ScribeError::Document(format!("{}: {}", path.display(), e)))?;
        if bytes.len() > self.max_bytes {
            return Err(ScribeError::Document(format!(
                "{}: {} bytes exceeds limit of {}",
                path.display(),
                bytes.len(),
                self.max_bytes
            )));
        }
        let text = String::from_utf8(bytes)
            .map_err(|_| ScribeError::Document(format!("{}: not UTF-8 text", path.display())))?;
        let sections = Self::headings(&text);
        debug!(path = %path.display(), sections = sections.len(), "inspected document");
        Ok(DocumentInfo {
            path: path.to_path_buf(),
            sections,
            text,
        })
    }
}
