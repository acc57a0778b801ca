use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const MANIFEST_VERSION: &str = "1.0.0";

const DEFAULT_NAME: &str = "Build Step";
const DEFAULT_CONTENT: &str = "echo \"hello world\"";

/// Provider kind of a stored script. Each kind maps to one execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Shell,
    #[value(name = "powershell")]
    PowerShell,
    Batch,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::Shell => "shell",
            ScriptKind::PowerShell => "powershell",
            ScriptKind::Batch => "batch",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "sh" => Some(ScriptKind::Shell),
            "ps1" => Some(ScriptKind::PowerShell),
            "bat" | "cmd" => Some(ScriptKind::Batch),
            _ => None,
        }
    }

    /// Ids are `<kind>-<unix millis>`, unique enough for interactively created scripts.
    pub fn new_id(&self) -> String {
        format!("{}-{}", self.as_str(), Utc::now().timestamp_millis())
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredArg {
    pub name: String,
}

impl DeclaredArg {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Trims names and drops the ones left empty. Order is preserved.
pub fn filter_declared_args(args: impl IntoIterator<Item = DeclaredArg>) -> Vec<DeclaredArg> {
    args.into_iter()
        .filter_map(|arg| {
            let name = arg.name.trim();
            if name.is_empty() {
                None
            } else {
                Some(DeclaredArg::new(name))
            }
        })
        .collect()
}

fn deserialize_declared_args<'de, D>(deserializer: D) -> Result<Vec<DeclaredArg>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<DeclaredArg>> = Option::deserialize(deserializer)?;
    Ok(filter_declared_args(raw.unwrap_or_default()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptDocument {
    pub id: String,
    pub name: String,
    pub kind: ScriptKind,
    #[serde(default)]
    pub comment: String,
    pub content: String,
    #[serde(default, deserialize_with = "deserialize_declared_args")]
    declared_args: Vec<DeclaredArg>,
    #[serde(default = "chrono::Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub content_hash: String,
}

impl ScriptDocument {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: ScriptKind,
        content: impl Into<String>,
        declared_args: Vec<DeclaredArg>,
    ) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            comment: String::new(),
            content_hash: hash_content(&content),
            content,
            declared_args: filter_declared_args(declared_args),
            updated_at: Utc::now(),
        }
    }

    /// A fresh document with a generated id and the placeholder body.
    pub fn with_defaults(kind: ScriptKind) -> Self {
        Self::new(kind.new_id(), DEFAULT_NAME, kind, DEFAULT_CONTENT, Vec::new())
    }

    pub fn declared_args(&self) -> &[DeclaredArg] {
        &self.declared_args
    }

    pub fn set_declared_args(&mut self, args: Vec<DeclaredArg>) {
        self.declared_args = filter_declared_args(args);
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.content_hash = hash_content(&self.content);
    }

    pub fn is_hash_current(&self) -> bool {
        self.content_hash == hash_content(&self.content)
    }

    pub fn summary(&self) -> ScriptSummary {
        ScriptSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
        }
    }

    pub fn args_description(&self) -> String {
        if self.declared_args.is_empty() {
            return "No arguments required".to_string();
        }

        let listed: Vec<String> = self
            .declared_args
            .iter()
            .enumerate()
            .map(|(i, arg)| format!("{}. {}", i + 1, arg.name))
            .collect();
        format!("Required arguments: {}", listed.join(" | "))
    }
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSummary {
    pub id: String,
    pub name: String,
    pub kind: ScriptKind,
}

/// Read side of the template store, all the execution engine needs.
pub trait TemplateStore {
    fn lookup(&self, id: &str) -> Result<Option<ScriptDocument>, StoreError>;

    /// Summaries of one kind, ordered by name.
    fn list_all(&self, kind: ScriptKind) -> Result<Vec<ScriptSummary>, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreManifest {
    pub version: String,
    pub scripts: HashMap<String, ScriptDocument>,
}

impl StoreManifest {
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            scripts: HashMap::new(),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), StoreError> {
        let write_err = |source: std::io::Error| StoreError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(write_err)
    }
}

impl Default for StoreManifest {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON-manifest backed script store. Changes are kept in memory until [`ScriptStore::save`].
#[derive(Debug, Clone)]
pub struct ScriptStore {
    path: Option<PathBuf>,
    manifest: StoreManifest,
}

impl ScriptStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let manifest = StoreManifest::load_from_file(&path)?;
        Ok(Self {
            path: Some(path),
            manifest,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            manifest: StoreManifest::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.manifest.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.scripts.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ScriptDocument> {
        self.manifest.scripts.get(id)
    }

    /// Inserts or replaces a document, refreshing its hash and timestamp.
    pub fn put(&mut self, mut document: ScriptDocument) {
        document.content_hash = hash_content(&document.content);
        document.updated_at = Utc::now();
        self.manifest.scripts.insert(document.id.clone(), document);
    }

    /// Like [`ScriptStore::put`] but refuses to overwrite an existing id.
    pub fn create(&mut self, document: ScriptDocument) -> Result<(), StoreError> {
        if self.manifest.scripts.contains_key(&document.id) {
            return Err(StoreError::Duplicate(document.id));
        }
        self.put(document);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<ScriptDocument> {
        self.manifest.scripts.remove(id)
    }

    pub fn save(&self) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => self.manifest.save_to_file(path),
            None => Ok(()),
        }
    }

    /// Summaries across kinds whose name matches `pattern`, ordered by name.
    pub fn list_matching(
        &self,
        kind: Option<ScriptKind>,
        pattern: Option<&str>,
    ) -> Result<Vec<ScriptSummary>, StoreError> {
        let pattern = pattern
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| StoreError::Pattern {
                    pattern: p.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let mut summaries: Vec<ScriptSummary> = self
            .manifest
            .scripts
            .values()
            .filter(|doc| kind.map_or(true, |k| doc.kind == k))
            .filter(|doc| pattern.as_ref().map_or(true, |p| p.matches(&doc.name)))
            .map(ScriptDocument::summary)
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    /// Imports every `.sh`, `.ps1` and `.bat` file below `dir`. Returns the new ids.
    pub fn import_dir(&mut self, dir: &Path) -> Result<Vec<String>, StoreError> {
        let mut imported = Vec::new();

        for entry in WalkDir::new(dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(kind) = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(ScriptKind::from_extension)
            else {
                continue;
            };

            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };

            let content = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
                path: path.to_path_buf(),
                source,
            })?;

            let id = format!("{}-{}", kind, name);
            if self.manifest.scripts.contains_key(&id) {
                tracing::warn!(%id, "skipping import, id already in store");
                continue;
            }

            self.put(ScriptDocument::new(id.clone(), name, kind, content, Vec::new()));
            imported.push(id);
        }

        Ok(imported)
    }
}

impl TemplateStore for ScriptStore {
    fn lookup(&self, id: &str) -> Result<Option<ScriptDocument>, StoreError> {
        let document = self.manifest.scripts.get(id).cloned();
        if let Some(doc) = &document {
            if !doc.is_hash_current() {
                tracing::warn!(id, "stored content hash does not match, store was edited by hand");
            }
        }
        Ok(document)
    }

    fn list_all(&self, kind: ScriptKind) -> Result<Vec<ScriptSummary>, StoreError> {
        self.list_matching(Some(kind), None)
    }
}
