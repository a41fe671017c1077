use crate::event::TreeEvent;
use crate::registry::TypeRegistry;
use crate::tree::Tree;
use crate::wire;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Extension of a stored receipe
pub const RECEIPE_EXTENSION: &str = ".skll.json";

/// Store metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Receipe saved most recently
    pub last_saved: Option<String>,
}

impl Manifest {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: now,
            modified: now,
            last_saved: None,
        }
    }

    /// Update the modified timestamp
    pub fn touch(&mut self) {
        self.modified = Utc::now();
    }

    /// Save manifest to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create manifest file: {}", path.display()))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)
            .with_context(|| format!("Failed to write manifest to: {}", path.display()))?;
        Ok(())
    }

    /// Load manifest from file
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open manifest file: {}", path.display()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse manifest from: {}", path.display()))
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory of saved receipes plus their mutation log
pub struct ReceipeStore {
    root_dir: PathBuf,
}

impl ReceipeStore {
    /// Create the store directory (or reuse an existing one)
    pub fn create(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create store directory: {}", path.display()))?;

        let store = Self {
            root_dir: path.to_path_buf(),
        };
        if !store.manifest_path().exists() {
            Manifest::new().save(&store.manifest_path())?;
        }
        if !store.events_path().exists() {
            File::create(store.events_path()).with_context(|| {
                format!("Failed to create events.jsonl: {}", store.events_path().display())
            })?;
        }

        Ok(store)
    }

    /// Open an existing store
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow!("Store directory does not exist: {}", path.display()));
        }

        let manifest_path = path.join("manifest.json");
        if !manifest_path.exists() {
            return Err(anyhow!("manifest.json not found in store directory"));
        }

        Ok(Self {
            root_dir: path.to_path_buf(),
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root_dir.join("manifest.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.root_dir.join("events.jsonl")
    }

    /// Path of the receipe file for `name`
    pub fn receipe_path(&self, name: &str) -> PathBuf {
        self.root_dir.join(format!("{}{}", file_stem(name), RECEIPE_EXTENSION))
    }

    pub fn load_manifest(&self) -> Result<Manifest> {
        Manifest::load(&self.manifest_path())
    }

    /// Write the wire export of `tree` to `<name>.skll.json`
    pub fn save(&self, tree: &Tree) -> Result<PathBuf> {
        let path = self.receipe_path(tree.name());
        let chain = wire::export_receipe(tree)
            .with_context(|| format!("Failed to export receipe '{}'", tree.name()))?;

        let file = File::create(&path)
            .with_context(|| format!("Failed to create receipe file: {}", path.display()))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &chain)
            .with_context(|| format!("Failed to write receipe file: {}", path.display()))?;

        let mut manifest = self.load_manifest().unwrap_or_default();
        manifest.touch();
        manifest.last_saved = Some(tree.name().to_string());
        manifest.save(&self.manifest_path())?;

        tracing::info!("Saved receipe '{}' to {}", tree.name(), path.display());
        Ok(path)
    }

    /// Read a stored receipe back into a fresh tree
    pub fn load(&self, registry: &TypeRegistry, name: &str) -> Result<Tree> {
        let path = self.receipe_path(name);
        let chain = read_chain(&path)?;
        let tree = wire::import_named(registry, name, &chain)
            .with_context(|| format!("Failed to import receipe: {}", path.display()))?;
        tracing::info!("Loaded receipe '{}' ({} blocks)", name, tree.walk().len());
        Ok(tree)
    }

    /// Names of the stored receipes, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root_dir).with_context(|| {
            format!("Failed to read store directory: {}", self.root_dir.display())
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("Failed to read store directory: {}", self.root_dir.display())
            })?;
            let file_name = entry.file_name();
            if let Some(name) = file_name
                .to_str()
                .and_then(|f| f.strip_suffix(RECEIPE_EXTENSION))
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Append events to events.jsonl
    pub fn append_events(&self, events: &[TreeEvent]) -> Result<()> {
        let events_path = self.events_path();

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_path)
            .with_context(|| format!("Failed to open events.jsonl: {}", events_path.display()))?;

        let mut writer = BufWriter::new(file);

        for event in events {
            let json = serde_json::to_string(event).with_context(|| {
                format!("Failed to serialize event: {}", events_path.display())
            })?;
            writeln!(writer, "{}", json).with_context(|| {
                format!("Failed to write event to: {}", events_path.display())
            })?;
        }

        writer
            .flush()
            .with_context(|| format!("Failed to flush events.jsonl: {}", events_path.display()))?;

        Ok(())
    }

    /// Load all events from events.jsonl
    pub fn load_events(&self) -> Result<Vec<TreeEvent>> {
        let events_path = self.events_path();

        if !events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&events_path)
            .with_context(|| format!("Failed to open events.jsonl: {}", events_path.display()))?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line.with_context(|| {
                format!(
                    "Failed to read line {} from: {}",
                    line_num + 1,
                    events_path.display()
                )
            })?;

            if line.trim().is_empty() {
                continue;
            }

            let event: TreeEvent = serde_json::from_str(&line).with_context(|| {
                format!(
                    "Failed to parse event on line {} from: {}",
                    line_num + 1,
                    events_path.display()
                )
            })?;

            events.push(event);
        }

        Ok(events)
    }
}

/// Parse a wire file into its chain value
pub fn read_chain(path: &Path) -> Result<Value> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open receipe file: {}", path.display()))?;
    parse_chain(BufReader::new(file))
        .with_context(|| format!("Failed to parse receipe file: {}", path.display()))
}

/// Parse a chain without a nesting limit.
///
/// Every `_next` link nests one level deeper, so the depth of a chain is its
/// length. The stack grows on demand instead.
pub fn parse_chain<R: Read>(reader: R) -> serde_json::Result<Value> {
    let mut de = serde_json::Deserializer::from_reader(reader);
    de.disable_recursion_limit();
    let value = Value::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

/// Receipe names may contain anything; file names may not
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}
