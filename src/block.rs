use crate::registry::{
    short_type_name, BlockClass, ComposedType, INTERNAL_ATTR, SINGULAR_ATTR, SPLITS_ATTR,
};
use crate::schema::{is_truthy, PropertySpec, ValueKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use ulid::Ulid;

/// Attributes the block keeps outside its property map
pub const NAME_ATTR: &str = "name";
pub const TYPE_ATTR: &str = "_type";

/// A node of the receipe tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    /// Unique identifier (sortable, timestamp-based)
    pub id: Ulid,

    /// Registered type this block was built from
    pub type_name: String,

    /// User-editable display name
    pub name: String,

    /// Container behaviour and children
    pub kind: BlockKind,

    /// Resolved property schema
    pub schema: BTreeMap<String, PropertySpec>,

    /// Live values of schema attributes (name and type excluded)
    pub properties: Map<String, Value>,

    /// Instance attributes set by type defaults but not declared as properties
    pub attributes: Map<String, Value>,

    /// Types allowed as children; empty means no restriction
    pub allowed_child_types: BTreeSet<String>,

    /// Extensions accepted from dropped files; empty accepts any
    pub file_extensions: Vec<String>,

    /// Owning container, if attached
    pub parent: Option<Ulid>,

    pub movable: bool,
    pub editable: bool,
}

/// Closed set of block behaviours
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BlockKind {
    Leaf,
    /// Ordered sequence of children
    List { children: Vec<Ulid>, singular: bool },
    /// Ordered sequence of branch wrappers
    Split { branches: Vec<Ulid>, singular: bool },
    /// Sink that discards whatever is dropped into it
    Trash,
    /// Dragged external file
    File { filename: String },
}

impl Block {
    /// Materialize a block from a composed type
    pub fn from_composed(composed: ComposedType, args: &Map<String, Value>) -> Self {
        let ComposedType {
            type_name,
            class,
            schema,
            values,
            allowed_child_types,
            file_extensions,
            ..
        } = composed;

        let singular = args
            .get(SINGULAR_ATTR)
            .or_else(|| values.get(SINGULAR_ATTR))
            .map(is_truthy)
            .unwrap_or(false);

        let mut properties = Map::new();
        let mut attributes = Map::new();
        let mut name = None;
        for (attr, value) in values {
            if attr == NAME_ATTR {
                if let Value::String(s) = &value {
                    name = Some(s.clone());
                }
            } else if attr == TYPE_ATTR {
                // the type name is authoritative
            } else if schema.contains_key(&attr) {
                properties.insert(attr, value);
            } else {
                attributes.insert(attr, value);
            }
        }

        let id = Ulid::new();
        let name = name
            .or_else(|| args.get(NAME_ATTR).and_then(Value::as_str).map(str::to_string))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| default_name(&type_name, id));

        let kind = match class {
            BlockClass::Leaf => BlockKind::Leaf,
            BlockClass::List => BlockKind::List {
                children: Vec::new(),
                singular,
            },
            BlockClass::Split => BlockKind::Split {
                branches: Vec::new(),
                singular,
            },
            BlockClass::Trash => BlockKind::Trash,
            BlockClass::File => BlockKind::File {
                filename: properties
                    .get("filename")
                    .or_else(|| args.get("filename"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
        };

        let internal = attributes.get(INTERNAL_ATTR).map(is_truthy).unwrap_or(false);
        let (movable, editable) = match kind {
            BlockKind::Trash => (false, false),
            BlockKind::File { .. } => (true, false),
            _ => (!internal, true),
        };

        Self {
            id,
            type_name,
            name,
            kind,
            schema,
            properties,
            attributes,
            allowed_child_types,
            file_extensions,
            parent: None,
            movable,
            editable,
        }
    }

    /// Anonymous wrapper that exports only its chain of children
    pub fn is_internal(&self) -> bool {
        self.attributes
            .get(INTERNAL_ATTR)
            .map(is_truthy)
            .unwrap_or(false)
    }

    /// List or split container
    pub fn is_container(&self) -> bool {
        matches!(self.kind, BlockKind::List { .. } | BlockKind::Split { .. })
    }

    pub fn is_singular(&self) -> bool {
        match self.kind {
            BlockKind::List { singular, .. } | BlockKind::Split { singular, .. } => singular,
            _ => false,
        }
    }

    /// Ordered children: list children, or split branches
    pub fn children(&self) -> &[Ulid] {
        match &self.kind {
            BlockKind::List { children, .. } => children,
            BlockKind::Split { branches, .. } => branches,
            _ => &[],
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<Ulid>> {
        match &mut self.kind {
            BlockKind::List { children, .. } => Some(children),
            BlockKind::Split { branches, .. } => Some(branches),
            _ => None,
        }
    }

    /// True when the type allow-list admits `type_name`
    pub fn child_type_matches(&self, type_name: &str) -> bool {
        self.allowed_child_types.is_empty() || self.allowed_child_types.contains(type_name)
    }

    /// Name of the first file-kind property, if the block takes file drops
    pub fn file_property(&self) -> Option<&str> {
        self.schema
            .iter()
            .find(|(_, spec)| spec.kind == ValueKind::File)
            .map(|(name, _)| name.as_str())
    }

    /// True when a file with this name may be dropped on the block
    pub fn accepts_file(&self, filename: &str) -> bool {
        if matches!(self.kind, BlockKind::File { .. }) || self.file_property().is_none() {
            return false;
        }
        if self.file_extensions.is_empty() {
            return true;
        }
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        self.file_extensions
            .iter()
            .any(|accepted| accepted.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }

    /// Branch spec of a split branch wrapper
    pub fn branch_spec(&self) -> Vec<String> {
        match self.properties.get(SPLITS_ATTR) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Current value of a schema attribute, including name and type
    pub fn value(&self, attr: &str) -> Option<Value> {
        match attr {
            NAME_ATTR => Some(Value::String(self.name.clone())),
            TYPE_ATTR => Some(Value::String(self.type_name.clone())),
            _ => self.properties.get(attr).cloned(),
        }
    }

    /// Overwrite property values, the way construction does
    pub fn set_properties(&mut self, values: &Map<String, Value>) -> Vec<String> {
        let mut changed = Vec::new();
        for (attr, value) in values {
            match attr.as_str() {
                NAME_ATTR => {
                    if let Some(name) = value.as_str() {
                        self.name = name.to_string();
                        changed.push(attr.clone());
                    }
                }
                TYPE_ATTR => {}
                _ if self.schema.contains_key(attr) => {
                    self.properties.insert(attr.clone(), value.clone());
                    if let BlockKind::File { filename } = &mut self.kind {
                        if attr == "filename" {
                            *filename = value.as_str().unwrap_or_default().to_string();
                        }
                    }
                    changed.push(attr.clone());
                }
                _ => {
                    tracing::debug!("Ignoring unknown attribute {} on {}", attr, self.type_name);
                }
            }
        }
        changed
    }

    /// Textual summary: `<type> (<attr>=<value>, ...)`
    pub fn description(&self) -> String {
        if let BlockKind::File { filename } = &self.kind {
            return filename.clone();
        }

        let props: Vec<String> = self
            .schema
            .iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .filter_map(|(name, spec)| {
                let value = self.value(name)?;
                if value.is_null() {
                    return None;
                }
                spec.kind
                    .describe(&value)
                    .map(|shown| format!("{}={}", name, shown))
            })
            .collect();

        format!("{} ({})", self.type_name, props.join(", "))
    }
}

fn default_name(type_name: &str, id: Ulid) -> String {
    let id = id.to_string().to_ascii_lowercase();
    format!("{}-{}", short_type_name(type_name), &id[id.len() - 4..])
}
