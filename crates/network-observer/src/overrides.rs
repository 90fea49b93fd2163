use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use soulbrowser_core_types::OverrideContent;

use crate::error::ObserverError;

/// URL to local file substitutions set from the network panel.
#[derive(Debug, Default)]
pub struct OverrideTable {
    entries: HashMap<String, PathBuf>,
}

impl OverrideTable {
    pub fn insert(&mut self, url: impl Into<String>, path: impl Into<PathBuf>) {
        self.entries.insert(url.into(), path.into());
    }

    pub fn remove(&mut self, url: &str) -> Option<PathBuf> {
        self.entries.remove(url)
    }

    pub fn get(&self, url: &str) -> Option<&Path> {
        self.entries.get(url).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read an override file; the content type is guessed from its extension.
pub fn load_override(path: &Path) -> Result<OverrideContent, ObserverError> {
    let bytes = fs::read(path).map_err(|source| ObserverError::OverrideRead {
        path: path.to_path_buf(),
        source,
    })?;
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_owned();
    Ok(OverrideContent {
        bytes,
        content_type,
    })
}
