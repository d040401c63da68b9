//! Bind targets
//!
//! A raw target such as `"notes/other#a.b[0]"` names a file and a path in
//! it. Without a `#` the whole text is a path into the current document.

use std::fmt;
use crate::core::error::{Error, Result};
use crate::core::ids::DocId;
use crate::storage::DocumentResolver;
use crate::sync::path::Path;

/// Separator between file name and path
const TARGET_SEPARATOR: char = '#';

/// Unresolved `(file, path)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTarget {
    /// File name, `None` for the current document
    pub file: Option<String>,
    /// Path inside the file's data
    pub path: Path,
}

impl BindTarget {
    /// Split a raw target
    pub fn parse(raw: &str) -> Result<Self> {
        let (file, path) = match raw.split_once(TARGET_SEPARATOR) {
            Some((file, path)) => {
                let file = file.trim();
                ((!file.is_empty()).then(|| file.to_string()), path)
            }
            None => (None, raw),
        };
        Ok(Self {
            file,
            path: path.trim().parse()?,
        })
    }

    /// Resolve to a document identity. Targets without a file name bind to
    /// `current`.
    pub fn resolve(&self, resolver: &dyn DocumentResolver, current: Option<DocId>) -> Result<(DocId, Path)> {
        let document = match &self.file {
            Some(file) => resolver.resolve(file)?,
            None => current.ok_or_else(|| {
                Error::file_resolution(format!("target '{}' needs a current document", self))
            })?,
        };
        Ok((document, self.path.clone()))
    }
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}{}{}", file, TARGET_SEPARATOR, self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAdapter;

    #[test]
    fn parses_file_and_path() {
        let target = BindTarget::parse("otherFile#a.b.c").unwrap();
        assert_eq!(target.file.as_deref(), Some("otherFile"));
        assert_eq!(target.path, "a.b.c".parse::<Path>().unwrap());
        assert_eq!(target.to_string(), "otherFile#a.b.c");
    }

    #[test]
    fn bare_paths_target_the_current_document() {
        let target = BindTarget::parse("tags[0]").unwrap();
        assert_eq!(target.file, None);

        let target = BindTarget::parse("#title").unwrap();
        assert_eq!(target.file, None);
        assert_eq!(target.to_string(), "title");
    }

    #[test]
    fn empty_paths_are_rejected() {
        assert!(BindTarget::parse("file#").is_err());
        assert!(BindTarget::parse("").is_err());
    }

    #[test]
    fn resolution() {
        let resolver = MemoryAdapter::new();
        let current = DocId::random();

        let (doc, path) = BindTarget::parse("title").unwrap().resolve(&resolver, Some(current)).unwrap();
        assert_eq!(doc, current);
        assert_eq!(path.to_string(), "title");

        let (doc, _) = BindTarget::parse("other#a").unwrap().resolve(&resolver, Some(current)).unwrap();
        assert_eq!(doc, resolver.resolve("other").unwrap());

        let err = BindTarget::parse("a").unwrap().resolve(&resolver, None).unwrap_err();
        assert!(matches!(err, Error::FileResolution(_)));
    }
}
