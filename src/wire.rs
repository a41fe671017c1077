//! Wire format shared with the execution engine.
//!
//! Every block exports as a JSON record of its property values. Sibling
//! order is not an array: each record carries its successor under `_next`,
//! and a container holds the head of its chain under `_children["1"]`.
//! A split holds one chain per branch under `_children["<i>"]` (1-based)
//! and the branch specs, in the same order, under `splits`.
//!
//! Internal wrappers (the receipe root, split branches) never emit a record
//! of their own; only their chain is spliced into the enclosing structure.
//! Empty containers omit `_children` entirely.

use crate::block::{Block, BlockKind, NAME_ATTR, TYPE_ATTR};
use crate::error::{ReceipeError, Result};
use crate::registry::TypeRegistry;
use crate::tree::Tree;
use serde_json::{json, Map, Value};
use ulid::Ulid;

pub const CHILDREN_KEY: &str = "_children";
pub const NEXT_KEY: &str = "_next";
pub const SPLITS_KEY: &str = "splits";

/// Export the whole receipe: the chain of the root's children, or null
pub fn export_receipe(tree: &Tree) -> Result<Value> {
    export_block(tree, tree.root())
}

/// Export one block with its subtree, without a `_next` link
pub fn export_block(tree: &Tree, id: Ulid) -> Result<Value> {
    let block = tree.block(id)?;
    if block.is_internal() && matches!(block.kind, BlockKind::List { .. }) {
        return export_chain(tree, block.children());
    }
    Ok(Value::Object(export_record(tree, block)?))
}

/// Link the exports of `ids` into a `_next` chain
fn export_chain(tree: &Tree, ids: &[Ulid]) -> Result<Value> {
    let mut records = Vec::with_capacity(ids.len());
    collect_records(tree, ids, &mut records)?;

    // link from the tail so each record can own its successor
    let mut next: Option<Value> = None;
    for mut record in records.into_iter().rev() {
        if let Some(successor) = next.take() {
            record.insert(NEXT_KEY.to_string(), successor);
        }
        next = Some(Value::Object(record));
    }
    Ok(next.unwrap_or(Value::Null))
}

fn collect_records(tree: &Tree, ids: &[Ulid], out: &mut Vec<Map<String, Value>>) -> Result<()> {
    for id in ids {
        let block = tree.block(*id)?;
        if block.is_internal() && matches!(block.kind, BlockKind::List { .. }) {
            collect_records(tree, block.children(), out)?;
        } else {
            out.push(export_record(tree, block)?);
        }
    }
    Ok(())
}

fn export_record(tree: &Tree, block: &Block) -> Result<Map<String, Value>> {
    let mut record = Map::new();
    record.insert(TYPE_ATTR.to_string(), json!(block.type_name));
    record.insert(NAME_ATTR.to_string(), json!(block.name));
    for (attr, value) in &block.properties {
        record.insert(attr.clone(), value.clone());
    }

    match &block.kind {
        BlockKind::List { children, .. } if !children.is_empty() => {
            let mut slots = Map::new();
            slots.insert("1".to_string(), export_chain(tree, children)?);
            record.insert(CHILDREN_KEY.to_string(), Value::Object(slots));
        }
        BlockKind::Split { branches, .. } => {
            let mut slots = Map::new();
            let mut specs = Vec::with_capacity(branches.len());
            for (i, branch) in branches.iter().enumerate() {
                let branch = tree.block(*branch)?;
                slots.insert((i + 1).to_string(), export_chain(tree, branch.children())?);
                specs.push(json!(branch.branch_spec()));
            }
            if !slots.is_empty() {
                record.insert(CHILDREN_KEY.to_string(), Value::Object(slots));
            }
            record.insert(SPLITS_KEY.to_string(), Value::Array(specs));
        }
        _ => {}
    }

    Ok(record)
}

/// Rebuild a receipe named "Untitled" from an exported chain
pub fn import_receipe(registry: &TypeRegistry, chain: &Value) -> Result<Tree> {
    import_named(registry, "Untitled", chain)
}

/// Rebuild a receipe from an exported chain.
///
/// The result is a brand new tree; any failure leaves the caller's current
/// tree untouched.
pub fn import_named(registry: &TypeRegistry, name: &str, chain: &Value) -> Result<Tree> {
    let mut tree = Tree::with_name(registry, name)?;
    let root = tree.root();
    import_chain(&mut tree, registry, root, chain)?;
    tree.clear_events();
    tracing::debug!("Imported {} blocks", tree.walk().len());
    Ok(tree)
}

/// Follow `_next` links, appending each record to `container`
fn import_chain(
    tree: &mut Tree,
    registry: &TypeRegistry,
    container: Ulid,
    chain: &Value,
) -> Result<()> {
    let mut current = chain;
    loop {
        match current {
            Value::Null => return Ok(()),
            Value::Object(record) => {
                let id = import_record(tree, registry, record)?;
                tree.attach_unchecked(container, id)?;
                current = record.get(NEXT_KEY).unwrap_or(&Value::Null);
            }
            other => {
                return Err(ReceipeError::InvalidRecord(format!(
                    "expected a block record, found {}",
                    other
                )))
            }
        }
    }
}

fn import_record(
    tree: &mut Tree,
    registry: &TypeRegistry,
    record: &Map<String, Value>,
) -> Result<Ulid> {
    let type_name = record
        .get(TYPE_ATTR)
        .and_then(Value::as_str)
        .ok_or_else(|| ReceipeError::InvalidRecord("record without _type".to_string()))?;

    let args: Map<String, Value> = record
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), CHILDREN_KEY | NEXT_KEY | SPLITS_KEY))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let id = tree.create_block(registry, type_name, &args)?;
    if !is_wire_block(tree.block(id)?) {
        return Err(ReceipeError::InvalidRecord(format!(
            "{} cannot appear in a receipe",
            type_name
        )));
    }

    let slots = match record.get(CHILDREN_KEY) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(slots)) => slots.clone(),
        Some(other) => {
            return Err(ReceipeError::InvalidRecord(format!(
                "{} of {} is not a map: {}",
                CHILDREN_KEY, type_name, other
            )))
        }
    };

    let (is_list, is_split) = {
        let block = tree.block(id)?;
        (
            matches!(block.kind, BlockKind::List { .. }),
            matches!(block.kind, BlockKind::Split { .. }),
        )
    };

    if is_list {
        if let Some(chain) = slots.get("1") {
            import_chain(tree, registry, id, chain)?;
        }
    } else if is_split {
        let specs = match record.get(SPLITS_KEY) {
            Some(Value::Array(specs)) => specs.clone(),
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(ReceipeError::InvalidRecord(format!(
                    "{} of {} is not a list: {}",
                    SPLITS_KEY, type_name, other
                )))
            }
        };
        // `splits` fixes the branch count; slot `i` holds branch `i - 1`
        for key in slots.keys() {
            let in_range = key
                .parse::<usize>()
                .map_or(false, |slot| slot >= 1 && slot <= specs.len());
            if !in_range {
                return Err(ReceipeError::InvalidRecord(format!(
                    "{} has no branch for {} slot {:?} ({} branches)",
                    type_name,
                    CHILDREN_KEY,
                    key,
                    specs.len()
                )));
            }
        }

        for (i, spec) in specs.iter().enumerate() {
            let branch = tree.create_branch(registry, branch_spec(spec))?;
            tree.attach_unchecked(id, branch)?;
            if let Some(chain) = slots.get(&(i + 1).to_string()) {
                import_chain(tree, registry, branch, chain)?;
            }
        }
    } else if !slots.is_empty() {
        return Err(ReceipeError::InvalidRecord(format!(
            "{} is not a container but has {}",
            type_name, CHILDREN_KEY
        )));
    }

    Ok(id)
}

/// False for blocks export never writes as records: internal lists are
/// spliced away, the trash and file placeholders never leave the editor.
fn is_wire_block(block: &Block) -> bool {
    match block.kind {
        BlockKind::Trash | BlockKind::File { .. } => false,
        BlockKind::List { .. } => !block.is_internal(),
        _ => true,
    }
}

fn branch_spec(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        other => vec![other.to_string()],
    }
}
