//! Markdown files with YAML frontmatter
//!
//! Each document is one `.md` file below the vault root. Its structured data
//! is the YAML block fenced by `---` lines at the very top of the file; the
//! body after the closing fence is never touched by writes.

use std::path::{Component, Path as FsPath, PathBuf};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use crate::constants::{FRONTMATTER_FENCE, MARKDOWN_EXTENSION};
use crate::core::error::{Error, PersistenceError, Result};
use crate::core::ids::DocId;
use crate::storage::{DocumentResolver, PersistenceAdapter};
use crate::sync::value::empty_document;
use crate::{log_debug, log_trace};

/// File-backed storage rooted at a vault directory
pub struct MarkdownAdapter {
    root: PathBuf,
    /// Document id to absolute file path
    paths: DashMap<DocId, PathBuf>,
    /// Normalized vault-relative name to document id
    ids: DashMap<String, DocId>,
}

impl MarkdownAdapter {
    /// Create an adapter over `root`. The directory is created lazily on
    /// the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            paths: DashMap::new(),
            ids: DashMap::new(),
        }
    }

    /// Vault root directory
    pub fn root(&self) -> &FsPath {
        &self.root
    }

    /// File backing `document`, if it was resolved through this adapter
    pub fn path_of(&self, document: DocId) -> Option<PathBuf> {
        self.paths.get(&document).map(|p| p.clone())
    }

    /// Reverse lookup from a file path to an already resolved document
    pub fn document_at(&self, file: &FsPath) -> Option<DocId> {
        self.paths
            .iter()
            .find(|entry| entry.value().as_path() == file)
            .map(|entry| *entry.key())
    }

    /// Number of documents resolved so far
    pub fn tracked_count(&self) -> usize {
        self.paths.len()
    }

    fn normalize(name: &str) -> Result<PathBuf> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(Error::file_resolution("empty file name"));
        }

        let mut relative = PathBuf::new();
        for component in FsPath::new(trimmed).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(Error::file_resolution(format!(
                        "'{}' must stay inside the vault",
                        name
                    )))
                }
            }
        }
        if relative.as_os_str().is_empty() {
            return Err(Error::file_resolution(format!("'{}' names no file", name)));
        }
        if relative.extension().is_none() {
            relative.set_extension(MARKDOWN_EXTENSION);
        }
        Ok(relative)
    }

    fn file_for(&self, document: DocId) -> std::result::Result<PathBuf, PersistenceError> {
        self.path_of(document)
            .ok_or(PersistenceError::UnknownDocument(document))
    }
}

impl DocumentResolver for MarkdownAdapter {
    fn resolve(&self, name: &str) -> Result<DocId> {
        let relative = Self::normalize(name)?;
        let key = relative.to_string_lossy().into_owned();
        let id = *self.ids.entry(key).or_insert_with(|| {
            let id = DocId::random();
            self.paths.insert(id, self.root.join(&relative));
            id
        });
        Ok(id)
    }
}

#[async_trait]
impl PersistenceAdapter for MarkdownAdapter {
    async fn read(&self, document: DocId) -> std::result::Result<Value, PersistenceError> {
        let file = self.file_for(document)?;
        let text = match tokio::fs::read_to_string(&file).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log_trace!("MarkdownAdapter::read - {} missing, empty document", file.display());
                return Ok(empty_document());
            }
            Err(e) => return Err(e.into()),
        };

        match split_frontmatter(&text) {
            (Some(yaml), _) => parse_frontmatter(yaml),
            (None, _) => Ok(empty_document()),
        }
    }

    async fn write(&self, document: DocId, data: Value) -> std::result::Result<(), PersistenceError> {
        let file = self.file_for(document)?;

        let existing = match tokio::fs::read_to_string(&file).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let (_, body) = split_frontmatter(&existing);
        let rendered = render_frontmatter(&data, body)?;

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file, rendered).await?;
        log_debug!("MarkdownAdapter::write - {}", file.display());
        Ok(())
    }
}

/// Split a file into its frontmatter block and body.
///
/// The block must open on the first line. Without a closing fence the whole
/// text is body.
pub fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    let rest = match text
        .strip_prefix(FRONTMATTER_FENCE)
        .and_then(|r| r.strip_prefix('\n').or_else(|| r.strip_prefix("\r\n")))
    {
        Some(rest) => rest,
        None => return (None, text),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == FRONTMATTER_FENCE {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, text)
}

/// Parse a frontmatter block into a mapping
pub fn parse_frontmatter(yaml: &str) -> std::result::Result<Value, PersistenceError> {
    if yaml.trim().is_empty() {
        return Ok(empty_document());
    }
    match serde_yaml::from_str::<Value>(yaml)? {
        Value::Null => Ok(empty_document()),
        value @ Value::Object(_) => Ok(value),
        other => Err(PersistenceError::malformed(format!(
            "frontmatter must be a mapping, found {}",
            kind_of(&other)
        ))),
    }
}

/// Render `data` as a frontmatter block followed by `body`
pub fn render_frontmatter(data: &Value, body: &str) -> std::result::Result<String, PersistenceError> {
    if !data.is_object() {
        return Err(PersistenceError::malformed(format!(
            "document data must be a mapping, found {}",
            kind_of(data)
        )));
    }
    let yaml = serde_yaml::to_string(data)?;
    Ok(format!("{fence}\n{yaml}{fence}\n{body}", fence = FRONTMATTER_FENCE))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
