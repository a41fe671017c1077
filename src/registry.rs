//! Block type registry.
//!
//! Type descriptors form a single-parent inheritance graph. [`TypeRegistry::compose`]
//! flattens a chain into the schema, live values and child allow-list of a new
//! block instance, using two separately ordered passes:
//!
//! - **defaults** fill gaps only, walking most-derived to least-derived, so the
//!   first descriptor to set an attribute wins;
//! - **properties** are merged on the way back up, least-derived first, so a
//!   redeclaration in a derived type overwrites its ancestors.
//!
//! A property's declared default does not displace a value that a
//! `defaults` entry at the same or a more-derived level already filled in.
//! Constructor arguments always win.

use crate::error::{ReceipeError, Result};
use crate::schema::{PropertySpec, ValueKind};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

/// Base block every catalog type derives from
pub const BASE_BLOCK: &str = "skll.block.baseblock.Block";
/// Internal ordered list, used for the receipe root
pub const LIST: &str = ".parent";
/// Named, exported list of blocks
pub const GROUP: &str = "skll.block.baseblock.Parent";
/// Split container holding parallel branches
pub const SPLIT: &str = ".split";
/// Internal branch wrapper inside a split
pub const BRANCH: &str = ".splitgroup";
pub const TRASH: &str = ".trash";
/// Placeholder for a dragged external file
pub const FILE: &str = ".file";

/// Instance attribute marking anonymous wrappers that export only their chain
pub const INTERNAL_ATTR: &str = "_isinternal";
/// Instance attribute marking containers with capacity one
pub const SINGULAR_ATTR: &str = "singular";
/// Branch wrapper property holding the branch spec
pub const SPLITS_ATTR: &str = "_splits";

/// Behaviour class of a block type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockClass {
    #[default]
    Leaf,
    List,
    Split,
    Trash,
    File,
}

/// Declaration of a block type
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Type this one inherits from
    #[serde(default, alias = "childof", skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Behaviour class; inherited from the nearest ancestor that sets it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<BlockClass>,

    /// Attribute values applied only when not already set
    #[serde(default)]
    pub defaults: Map<String, Value>,

    #[serde(default)]
    pub properties: BTreeMap<String, PropertySpec>,

    /// Types allowed as children; empty means no restriction
    #[serde(default, alias = "child_types")]
    pub allowed_child_types: BTreeSet<String>,

    /// Palette title
    #[serde(default, alias = "typename", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Palette group, dotted path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, alias = "desc", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Excluded from the palette
    #[serde(default)]
    pub hidden: bool,

    /// Extensions accepted from dropped files; empty accepts any
    #[serde(default)]
    pub file_extensions: Vec<String>,
}

impl TypeDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child_of(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn class(mut self, class: BlockClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn default_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(name.into(), value);
        self
    }

    pub fn property(mut self, name: impl Into<String>, spec: PropertySpec) -> Self {
        self.properties.insert(name.into(), spec);
        self
    }

    pub fn allow_child(mut self, type_name: impl Into<String>) -> Self {
        self.allowed_child_types.insert(type_name.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn accept_extension(mut self, ext: impl Into<String>) -> Self {
        self.file_extensions.push(ext.into());
        self
    }
}

/// Result of flattening a descriptor chain
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedType {
    pub type_name: String,
    pub class: BlockClass,
    pub schema: BTreeMap<String, PropertySpec>,
    /// Live values: defaults, declared property defaults and constructor arguments
    pub values: Map<String, Value>,
    pub allowed_child_types: BTreeSet<String>,
    pub file_extensions: Vec<String>,
    /// Set when the chain stopped at an unregistered ancestor
    pub missing_ancestor: Option<ReceipeError>,
}

/// Entry of the block palette
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteEntry {
    pub type_name: String,
    pub label: String,
    pub group: String,
    pub description: Option<String>,
}

/// Catalog of block types
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDescriptor>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in container and base types
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register(
            BASE_BLOCK,
            TypeDescriptor::new()
                .label("Block")
                .describe("A block that simply passes data through")
                .property("name", PropertySpec::new(ValueKind::Text).describe("Name"))
                .property(
                    "_type",
                    PropertySpec::new(ValueKind::Text)
                        .describe("Underlying engine type")
                        .hidden(),
                )
                .property(
                    "disable_mask",
                    PropertySpec::new(
                        ValueKind::parse("mc(preview,train,test,run)")
                            .unwrap_or(ValueKind::Other("mc".to_string())),
                    )
                    .describe("Disable this block when"),
                ),
        );
        registry.register(
            LIST,
            TypeDescriptor::new()
                .child_of(BASE_BLOCK)
                .class(BlockClass::List)
                .describe("Internal list that has no effect")
                .default_value(INTERNAL_ATTR, json!(true))
                .hidden(),
        );
        registry.register(
            GROUP,
            TypeDescriptor::new()
                .child_of(BASE_BLOCK)
                .class(BlockClass::List)
                .label("Group")
                .describe("Runs its children in order"),
        );
        registry.register(
            SPLIT,
            TypeDescriptor::new()
                .child_of(BASE_BLOCK)
                .class(BlockClass::Split)
                .label("Split")
                .describe("Processes parallel branches"),
        );
        registry.register(
            BRANCH,
            TypeDescriptor::new()
                .class(BlockClass::List)
                .describe("Internal branch of a split")
                .property(
                    SPLITS_ATTR,
                    PropertySpec::new(ValueKind::List(Box::new(ValueKind::Text)))
                        .describe("Split specification")
                        .with_default(json!([])),
                )
                .default_value(INTERNAL_ATTR, json!(true))
                .hidden(),
        );
        registry.register(
            TRASH,
            TypeDescriptor::new().class(BlockClass::Trash).hidden(),
        );
        registry.register(
            FILE,
            TypeDescriptor::new()
                .class(BlockClass::File)
                .property(
                    "filename",
                    PropertySpec::new(ValueKind::File).describe("Dragged file"),
                )
                .hidden(),
        );

        registry
    }

    /// Insert or replace a descriptor; returns the replaced one
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        descriptor: TypeDescriptor,
    ) -> Option<TypeDescriptor> {
        let type_name = type_name.into();
        tracing::debug!("Registering block type {}", type_name);
        self.types.insert(type_name, descriptor)
    }

    /// Look up a descriptor
    pub fn resolve(&self, type_name: &str) -> Result<&TypeDescriptor> {
        self.types
            .get(type_name)
            .ok_or_else(|| ReceipeError::UnknownType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Register every descriptor of a JSON catalog (type name -> descriptor)
    pub fn register_catalog_json(&mut self, json: &str) -> anyhow::Result<usize> {
        let catalog: BTreeMap<String, TypeDescriptor> =
            serde_json::from_str(json).context("Failed to parse type catalog")?;
        let count = catalog.len();
        for (name, descriptor) in catalog {
            self.register(name, descriptor);
        }
        Ok(count)
    }

    /// Register a catalog file
    pub fn load_catalog(&mut self, path: &Path) -> anyhow::Result<usize> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read type catalog: {}", path.display()))?;
        let count = self
            .register_catalog_json(&json)
            .with_context(|| format!("Failed to load type catalog: {}", path.display()))?;
        tracing::info!("Loaded {} block types from {}", count, path.display());
        Ok(count)
    }

    /// Walk from `type_name` up its ancestor chain, most-derived first.
    ///
    /// An unregistered ancestor (or a cycle) ends the walk early.
    fn chain<'a>(
        &'a self,
        type_name: &'a str,
    ) -> Result<(Vec<(&'a str, &'a TypeDescriptor)>, Option<ReceipeError>)> {
        let mut current_name = type_name;
        let mut current = self.resolve(type_name)?;
        let mut chain = vec![(current_name, current)];
        let mut seen = HashSet::from([type_name]);
        let mut missing = None;

        while let Some(parent) = current.parent.as_deref() {
            if !seen.insert(parent) {
                tracing::warn!("Inheritance cycle through {} at {}", parent, current_name);
                break;
            }
            match self.types.get(parent) {
                Some(descriptor) => {
                    chain.push((parent, descriptor));
                    current_name = parent;
                    current = descriptor;
                }
                None => {
                    let err = ReceipeError::MissingAncestor {
                        type_name: current_name.to_string(),
                        ancestor: parent.to_string(),
                    };
                    tracing::warn!("{}; schema composition stops here", err);
                    missing = Some(err);
                    break;
                }
            }
        }

        Ok((chain, missing))
    }

    /// Flatten `type_name` and its ancestors for a new instance
    pub fn compose(&self, type_name: &str, args: &Map<String, Value>) -> Result<ComposedType> {
        let (chain, missing_ancestor) = self.chain(type_name)?;

        let mut values = Map::new();
        // depth at which a `defaults` entry filled each attribute (0 = most derived)
        let mut filled_at: HashMap<&str, usize> = HashMap::new();
        for (depth, (_, descriptor)) in chain.iter().enumerate() {
            for (name, value) in &descriptor.defaults {
                if !values.contains_key(name) {
                    values.insert(name.clone(), value.clone());
                    filled_at.insert(name.as_str(), depth);
                }
            }
        }

        let mut schema = BTreeMap::new();
        let mut allowed_child_types = BTreeSet::new();
        for (depth, (_, descriptor)) in chain.iter().enumerate().rev() {
            for (name, spec) in &descriptor.properties {
                schema.insert(name.clone(), spec.clone());
                if let Some(arg) = args.get(name) {
                    values.insert(name.clone(), arg.clone());
                } else if let Some(default) = &spec.default {
                    let shadowed = filled_at
                        .get(name.as_str())
                        .map_or(false, |&filled| filled <= depth);
                    if !shadowed {
                        values.insert(name.clone(), default.clone());
                    }
                }
            }
            allowed_child_types.extend(descriptor.allowed_child_types.iter().cloned());
        }

        let class = chain
            .iter()
            .find_map(|(_, d)| d.class)
            .unwrap_or_default();
        let file_extensions = chain
            .iter()
            .map(|(_, d)| &d.file_extensions)
            .find(|exts| !exts.is_empty())
            .cloned()
            .unwrap_or_default();

        Ok(ComposedType {
            type_name: type_name.to_string(),
            class,
            schema,
            values,
            allowed_child_types,
            file_extensions,
            missing_ancestor,
        })
    }

    /// Non-hidden types, ordered by group then label
    pub fn palette(&self) -> Vec<PaletteEntry> {
        let mut entries: Vec<PaletteEntry> = self
            .types
            .iter()
            .filter(|(_, d)| !d.hidden)
            .map(|(name, d)| PaletteEntry {
                type_name: name.clone(),
                label: d.label.clone().unwrap_or_else(|| short_type_name(name).to_string()),
                group: d.group.clone().unwrap_or_default(),
                description: d.description.clone(),
            })
            .collect();
        entries.sort_by(|a, b| (&a.group, &a.label).cmp(&(&b.group, &b.label)));
        entries
    }
}

/// Last dotted segment of a type name
pub fn short_type_name(type_name: &str) -> &str {
    type_name.rsplit('.').next().unwrap_or(type_name)
}
