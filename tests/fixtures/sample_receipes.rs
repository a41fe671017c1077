// Helper functions to build registries and receipes for integration tests

#![allow(dead_code)]

use receipe_editor::registry::SPLIT;
use receipe_editor::{Position, Tree, TypeRegistry};
use serde_json::{json, Map, Value};
use std::path::Path;
use ulid::Ulid;

pub const FILE_INPUT: &str = "skll.plugin.tabular.FileInput";
pub const FILE_OUTPUT: &str = "skll.plugin.tabular.FileOutput";
pub const FILLNA: &str = "skll.plugin.tabular.fillna";
pub const GROUPBY: &str = "skll.plugin.tabular.groupby";
pub const AGG: &str = "skll.plugin.tabular.agg";

/// Builtin types plus the bundled tabular catalog
pub fn tabular_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::with_builtins();
    let catalog = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("catalogs")
        .join("tabular.json");
    registry.load_catalog(&catalog).unwrap();
    registry
}

pub fn named(name: &str) -> Map<String, Value> {
    let mut args = Map::new();
    args.insert("name".to_string(), json!(name));
    args
}

/// Create a block and append it to `container`
pub fn place(
    tree: &mut Tree,
    registry: &TypeRegistry,
    type_name: &str,
    name: &str,
    container: Ulid,
) -> Ulid {
    let id = tree.create_block(registry, type_name, &named(name)).unwrap();
    tree.insert(container, id, Position::Tail).unwrap();
    id
}

/// Handles into [`sample_pipeline`]
pub struct Pipeline {
    pub input: Ulid,
    pub split: Ulid,
    pub left: Ulid,
    pub right: Ulid,
    pub fill: Ulid,
    pub group: Ulid,
    pub sum: Ulid,
    pub output: Ulid,
}

/// `in -> split[ [a]: fill | [b]: groupby(agg) ] -> out`
pub fn sample_pipeline(registry: &TypeRegistry) -> (Tree, Pipeline) {
    let mut tree = Tree::with_name(registry, "sales").unwrap();
    let root = tree.root();

    let input = place(&mut tree, registry, FILE_INPUT, "in", root);
    let split = place(&mut tree, registry, SPLIT, "s", root);
    let left = tree
        .add_branch(registry, split, vec!["a".to_string()])
        .unwrap();
    let right = tree
        .add_branch(registry, split, vec!["b".to_string()])
        .unwrap();
    let fill = place(&mut tree, registry, FILLNA, "fill", left);
    let group = place(&mut tree, registry, GROUPBY, "by region", right);
    let sum = place(&mut tree, registry, AGG, "sum", group);
    let output = place(&mut tree, registry, FILE_OUTPUT, "out", root);

    (
        tree,
        Pipeline {
            input,
            split,
            left,
            right,
            fill,
            group,
            sum,
            output,
        },
    )
}

/// Names of the blocks directly under `container`
pub fn names(tree: &Tree, container: Ulid) -> Vec<String> {
    tree.children(container)
        .iter()
        .map(|id| tree.get(*id).unwrap().name.clone())
        .collect()
}
