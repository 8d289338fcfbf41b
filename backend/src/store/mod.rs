//! Template store - save and reuse named message templates.
//!
//! Templates live in a single JSON file (`name -> StoredTemplate`). Writes
//! rewrite the whole file; the last write wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::template::Template;

/// Default location (relative to current dir)
pub const DEFAULT_STORE_PATH: &str = ".mailmerge/templates.json";

/// A stored template with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTemplate {
    pub name: String,
    pub template: Template,
    pub updated_at: DateTime<Utc>,
}

/// Keyed template persistence.
pub trait TemplateStore: Send {
    /// Insert or replace a template. Names are trimmed in every operation.
    fn save(&mut self, name: &str, template: Template) -> StoreResult<()>;

    /// All templates by name.
    fn load_all(&self) -> StoreResult<BTreeMap<String, StoredTemplate>>;

    /// Remove a template. Missing names are [`StoreError::NotFound`].
    fn delete(&mut self, name: &str) -> StoreResult<()>;

    /// Single template by name.
    fn get(&self, name: &str) -> StoreResult<Option<StoredTemplate>> {
        Ok(self.load_all()?.remove(name))
    }
}

/// JSON-file backed [`TemplateStore`].
#[derive(Debug, Clone)]
pub struct FileTemplateStore {
    path: PathBuf,
}

impl FileTemplateStore {
    /// Store at [`DEFAULT_STORE_PATH`]
    pub fn new() -> Self {
        Self::with_path(DEFAULT_STORE_PATH)
    }

    /// Store at a custom file path
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, templates: &BTreeMap<String, StoredTemplate>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(templates)?;
        // Write-then-rename so readers never see a half-written file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Default for FileTemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateStore for FileTemplateStore {
    fn save(&mut self, name: &str, template: Template) -> StoreResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidName(name.to_string()));
        }

        let mut templates = self.load_all()?;
        templates.insert(
            name.to_string(),
            StoredTemplate {
                name: name.to_string(),
                template,
                updated_at: Utc::now(),
            },
        );
        self.write_all(&templates)
    }

    fn load_all(&self) -> StoreResult<BTreeMap<String, StoredTemplate>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn delete(&mut self, name: &str) -> StoreResult<()> {
        let name = name.trim();
        let mut templates = self.load_all()?;
        if templates.remove(name).is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        self.write_all(&templates)
    }

    fn get(&self, name: &str) -> StoreResult<Option<StoredTemplate>> {
        Ok(self.load_all()?.remove(name.trim()))
    }
}
