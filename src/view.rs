use crate::block::{Block, BlockKind, TYPE_ATTR};
use crate::error::Result;
use crate::registry::BRANCH;
use crate::schema::ValueKind;
use crate::tree::Tree;
use serde::Serialize;
use serde_json::{json, Map, Value};
use ulid::Ulid;

/// Visual shape of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Shape {
    Leaf,
    List,
    Split,
    /// Wrapper of one split branch
    Branch,
    Trash,
    File,
}

/// What the presentation layer needs to draw one block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockView {
    pub id: Ulid,
    pub title: String,
    pub description: String,
    pub shape: Shape,
    pub movable: bool,
    pub editable: bool,
    /// Children in display order (branches for a split)
    pub children: Vec<Ulid>,
}

/// One editable property
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldView {
    pub name: String,
    pub label: String,
    pub kind: ValueKind,
    pub enabled: bool,
    pub value: Option<Value>,
}

impl Tree {
    /// Render request for a block
    pub fn view(&self, id: Ulid) -> Result<BlockView> {
        let block = self.block(id)?;
        let shape = shape_of(block);

        let (title, description) = match shape {
            Shape::Branch => (branch_title(&block.branch_spec()), String::new()),
            Shape::List | Shape::Trash => (block.name.clone(), String::new()),
            _ => (block.name.clone(), block.description()),
        };

        Ok(BlockView {
            id,
            title,
            description,
            shape,
            movable: block.movable,
            editable: block.editable,
            children: block.children().to_vec(),
        })
    }

    /// Visible properties of a block with their current values
    pub fn edit_form(&self, id: Ulid) -> Result<Vec<FieldView>> {
        let block = self.block(id)?;
        Ok(block
            .schema
            .iter()
            .filter(|(name, spec)| !spec.hidden && name.as_str() != TYPE_ATTR)
            .map(|(name, spec)| FieldView {
                name: name.clone(),
                label: spec.label(name).to_string(),
                kind: spec.kind.clone(),
                enabled: spec.enabled,
                value: block.value(name),
            })
            .collect())
    }
}

fn shape_of(block: &Block) -> Shape {
    match block.kind {
        BlockKind::Leaf => Shape::Leaf,
        BlockKind::List { .. } if block.type_name == BRANCH => Shape::Branch,
        BlockKind::List { .. } => Shape::List,
        BlockKind::Split { .. } => Shape::Split,
        BlockKind::Trash => Shape::Trash,
        BlockKind::File { .. } => Shape::File,
    }
}

/// `["a", "b"]` style title of a branch
fn branch_title(spec: &[String]) -> String {
    let items: Vec<String> = spec.iter().map(|s| format!("\"{}\"", s)).collect();
    format!("[{}]", items.join(", "))
}

impl FieldView {
    /// Current value as text for a single-line editor
    pub fn text(&self) -> String {
        match &self.value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => format!("{}={}", k, s),
                    other => format!("{}={}", k, other),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Some(other) => other.to_string(),
        }
    }

    /// Parse editor text back into a value of this field's kind
    pub fn parse(&self, text: &str) -> Value {
        parse_input(&self.kind, text)
    }
}

/// Convert editor text into a wire value of `kind`
pub fn parse_input(kind: &ValueKind, text: &str) -> Value {
    let text = text.trim();
    match kind {
        ValueKind::Number => {
            if let Ok(n) = text.parse::<i64>() {
                json!(n)
            } else if let Ok(f) = text.parse::<f64>() {
                json!(f)
            } else if text.is_empty() {
                Value::Null
            } else {
                json!(text)
            }
        }
        ValueKind::Boolean => json!(matches!(
            text.to_ascii_lowercase().as_str(),
            "true" | "yes" | "1" | "on"
        )),
        ValueKind::List(_) | ValueKind::MultiChoice(_) => Value::Array(
            split_items(text).map(|item| json!(item)).collect(),
        ),
        ValueKind::Dict(_, _) => {
            let mut map = Map::new();
            for item in split_items(text) {
                if let Some((key, value)) = item.split_once('=') {
                    map.insert(key.trim().to_string(), json!(value.trim()));
                }
            }
            Value::Object(map)
        }
        _ => json!(text),
    }
}

fn split_items(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|item| !item.is_empty())
}
