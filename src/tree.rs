use crate::block::{Block, BlockKind};
use crate::error::{ReceipeError, Result};
use crate::event::{EventType, TreeEvent};
use crate::registry::{TypeRegistry, BRANCH, LIST, SPLITS_ATTR, TRASH};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use ulid::Ulid;

/// Where `insert` places a block inside a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    Head,
    Tail,
    Before(Ulid),
    After(Ulid),
}

/// Receipe tree: every block indexed by ID, linked through `parent` and
/// container child lists
#[derive(Debug, Clone)]
pub struct Tree {
    /// All blocks indexed by ID, attached or not
    blocks: HashMap<Ulid, Block>,

    /// Root list representing the whole receipe
    root: Ulid,

    /// Sink for discarded blocks; never holds children
    trash: Ulid,

    /// Mutation log
    events: Vec<TreeEvent>,

    /// Bumped by every mutation that changes the export
    revision: u64,
}

impl Tree {
    /// Create an empty receipe named "Untitled"
    pub fn new(registry: &TypeRegistry) -> Result<Self> {
        Self::with_name(registry, "Untitled")
    }

    /// Create an empty receipe with the given root name
    pub fn with_name(registry: &TypeRegistry, name: &str) -> Result<Self> {
        let mut args = Map::new();
        args.insert("name".to_string(), json!(name));
        let mut root = Block::from_composed(registry.compose(LIST, &args)?, &args);
        root.movable = false;
        root.editable = false;

        let no_args = Map::new();
        let trash = Block::from_composed(registry.compose(TRASH, &no_args)?, &no_args);

        let (root_id, trash_id) = (root.id, trash.id);
        let mut blocks = HashMap::new();
        blocks.insert(root_id, root);
        blocks.insert(trash_id, trash);

        Ok(Self {
            blocks,
            root: root_id,
            trash: trash_id,
            events: Vec::new(),
            revision: 0,
        })
    }

    // ========== Block CRUD Operations ==========

    /// Create a detached block from a registered type
    pub fn create_block(
        &mut self,
        registry: &TypeRegistry,
        type_name: &str,
        args: &Map<String, Value>,
    ) -> Result<Ulid> {
        let composed = registry.compose(type_name, args)?;
        let block = Block::from_composed(composed, args);
        let id = block.id;

        self.log_event(EventType::BlockCreated {
            id,
            type_name: block.type_name.clone(),
            name: block.name.clone(),
        });

        self.blocks.insert(id, block);
        Ok(id)
    }

    /// Create a detached branch wrapper carrying `spec`
    pub fn create_branch(&mut self, registry: &TypeRegistry, spec: Vec<String>) -> Result<Ulid> {
        let mut args = Map::new();
        args.insert(SPLITS_ATTR.to_string(), json!(spec));
        self.create_block(registry, BRANCH, &args)
    }

    /// Get a block by ID
    pub fn get(&self, id: Ulid) -> Option<&Block> {
        self.blocks.get(&id)
    }

    /// Get a block by ID or fail with `NodeNotFound`
    pub fn block(&self, id: Ulid) -> Result<&Block> {
        self.blocks.get(&id).ok_or(ReceipeError::NodeNotFound(id))
    }

    pub(crate) fn block_mut(&mut self, id: Ulid) -> Result<&mut Block> {
        self.blocks.get_mut(&id).ok_or(ReceipeError::NodeNotFound(id))
    }

    /// Get all blocks
    pub fn blocks(&self) -> &HashMap<Ulid, Block> {
        &self.blocks
    }

    /// Overwrite property values of an editable block
    pub fn apply_properties(&mut self, id: Ulid, values: &Map<String, Value>) -> Result<Vec<String>> {
        let block = self.block_mut(id)?;
        if !block.editable {
            return Err(ReceipeError::NotEditable(id));
        }

        let changed = block.set_properties(values);
        if !changed.is_empty() {
            tracing::debug!("Updated {:?} on {}", changed, id);
            self.log_event(EventType::PropertiesChanged {
                id,
                attributes: changed.clone(),
            });
        }
        Ok(changed)
    }

    /// Store a dropped file name in the block's file property
    pub fn set_file(&mut self, id: Ulid, filename: &str) -> Result<String> {
        let block = self.block(id)?;
        let property = match block.file_property() {
            Some(property) if block.accepts_file(filename) => property.to_string(),
            _ => {
                return Err(ReceipeError::UnsupportedFile {
                    block: id,
                    filename: filename.to_string(),
                })
            }
        };

        self.block_mut(id)?
            .properties
            .insert(property.clone(), json!(filename));

        self.log_event(EventType::FileAssigned {
            id,
            property: property.clone(),
            filename: filename.to_string(),
        });
        Ok(property)
    }

    /// Delete a block and its whole subtree; returns the number of blocks dropped
    pub fn delete(&mut self, id: Ulid) -> Result<usize> {
        if id == self.root || id == self.trash {
            return Err(ReceipeError::NotMovable(id));
        }
        self.block(id)?;

        let was_attached = self.is_attached(id);
        self.detach(id)?;

        let doomed = self.descendants(id);
        for victim in &doomed {
            self.blocks.remove(victim);
        }

        tracing::debug!("Deleted {} ({} blocks)", id, doomed.len());
        self.log_event(EventType::BlockDeleted {
            id,
            removed: doomed.len(),
            was_attached,
        });
        Ok(doomed.len())
    }

    // ========== Structural Mutation ==========

    /// True when `container` admits blocks of `type_name`.
    ///
    /// Branch wrappers defer to the allow-list of their split.
    pub(crate) fn admits(&self, container: &Block, type_name: &str) -> bool {
        if container.type_name == BRANCH {
            if let Some(split) = container.parent.and_then(|p| self.blocks.get(&p)) {
                return split.child_type_matches(type_name);
            }
        }
        container.child_type_matches(type_name)
    }

    /// Type-compatibility predicate between a container and a candidate child
    pub fn child_type_matches(&self, container: Ulid, candidate: Ulid) -> Result<bool> {
        let container = self.block(container)?;
        let candidate = self.block(candidate)?;
        Ok(self.admits(container, &candidate.type_name))
    }

    /// Validate an insert without performing it
    pub fn check_insert(&self, container: Ulid, node: Ulid, position: Position) -> Result<()> {
        let block = self.block(node)?;
        let target = self.block(container)?;

        if node == self.root || node == self.trash {
            return Err(ReceipeError::NotMovable(node));
        }
        if !target.is_container() {
            return Err(ReceipeError::NotAContainer(container));
        }
        if self.is_ancestor(node, container) {
            return Err(ReceipeError::WouldCreateCycle(node));
        }

        let is_branch = block.type_name == BRANCH;
        let fits = match target.kind {
            BlockKind::Split { .. } => is_branch,
            _ => {
                !is_branch
                    && !matches!(block.kind, BlockKind::File { .. })
                    && self.admits(target, &block.type_name)
            }
        };
        if !fits {
            return Err(ReceipeError::IncompatibleChild {
                container,
                type_name: block.type_name.clone(),
            });
        }

        let children = target.children();
        let sole_occupant = children.len() == 1 && children[0] == node;
        if target.is_singular() && !children.is_empty() && !sole_occupant {
            return Err(ReceipeError::CapacityExceeded(container));
        }

        match position {
            Position::Before(anchor) | Position::After(anchor) if !children.contains(&anchor) => {
                Err(ReceipeError::AnchorNotFound { container, anchor })
            }
            _ => Ok(()),
        }
    }

    /// Move `node` into `container`, detaching it from its previous parent first.
    ///
    /// Fails without touching the tree when the insert is not allowed.
    pub fn insert(&mut self, container: Ulid, node: Ulid, position: Position) -> Result<()> {
        self.check_insert(container, node, position)?;

        let mut order: Vec<Ulid> = self
            .block(container)?
            .children()
            .iter()
            .copied()
            .filter(|c| *c != node)
            .collect();
        let index_of = |order: &[Ulid], anchor: Ulid| {
            order
                .iter()
                .position(|c| *c == anchor)
                .ok_or(ReceipeError::AnchorNotFound { container, anchor })
        };
        let index = match position {
            Position::Head => 0,
            Position::Tail => order.len(),
            Position::Before(anchor) if anchor == node => return Ok(()),
            Position::After(anchor) if anchor == node => return Ok(()),
            Position::Before(anchor) => index_of(&order, anchor)?,
            Position::After(anchor) => index_of(&order, anchor)? + 1,
        };
        order.insert(index, node);

        if self.block(node)?.parent != Some(container) {
            self.detach(node)?;
        }
        if let Some(children) = self.block_mut(container)?.children_mut() {
            *children = order;
        }
        self.block_mut(node)?.parent = Some(container);

        tracing::debug!("Inserted {} into {} at {:?}", node, container, position);
        self.log_event(EventType::BlockInserted {
            id: node,
            container,
            position,
        });
        Ok(())
    }

    /// Remove `node` from `container`; returns false when it was not a child
    pub fn remove(&mut self, container: Ulid, node: Ulid) -> Result<bool> {
        if !self.block(container)?.children().contains(&node) {
            return Ok(false);
        }
        self.detach(node)?;
        Ok(true)
    }

    /// Detach `node` from its parent, returning the former parent
    pub fn detach(&mut self, node: Ulid) -> Result<Option<Ulid>> {
        let parent = self.block(node)?.parent;
        if let Some(container) = parent {
            if let Some(children) = self
                .blocks
                .get_mut(&container)
                .and_then(Block::children_mut)
            {
                children.retain(|c| *c != node);
            }
            self.block_mut(node)?.parent = None;
            self.log_event(EventType::BlockRemoved {
                id: node,
                container,
            });
        }
        Ok(parent)
    }

    /// Append a new branch to a split
    pub fn add_branch(
        &mut self,
        registry: &TypeRegistry,
        split: Ulid,
        spec: Vec<String>,
    ) -> Result<Ulid> {
        let target = self.block(split)?;
        if !matches!(target.kind, BlockKind::Split { .. }) {
            return Err(ReceipeError::NotAContainer(split));
        }
        if target.is_singular() && !target.children().is_empty() {
            return Err(ReceipeError::CapacityExceeded(split));
        }

        let branch = self.create_branch(registry, spec.clone())?;
        if let Err(err) = self.insert(split, branch, Position::Tail) {
            self.blocks.remove(&branch);
            return Err(err);
        }

        self.log_event(EventType::BranchAdded {
            split,
            branch,
            spec,
        });
        Ok(branch)
    }

    /// Append without validation or logging; used while rebuilding imports
    pub(crate) fn attach_unchecked(&mut self, container: Ulid, node: Ulid) -> Result<()> {
        self.block_mut(node)?.parent = Some(container);
        match self.block_mut(container)?.children_mut() {
            Some(children) => {
                children.push(node);
                Ok(())
            }
            None => Err(ReceipeError::NotAContainer(container)),
        }
    }

    // ========== Queries ==========

    /// True when `node` is `ancestor` or lies within its subtree
    pub fn is_ancestor(&self, ancestor: Ulid, node: Ulid) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.blocks.get(&id).and_then(|b| b.parent);
        }
        false
    }

    /// True when the block is reachable from the root
    pub fn is_attached(&self, id: Ulid) -> bool {
        self.is_ancestor(self.root, id)
    }

    /// `id` followed by its whole subtree, depth first
    pub fn descendants(&self, id: Ulid) -> Vec<Ulid> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(block) = self.blocks.get(&current) {
                out.push(current);
                stack.extend(block.children().iter().rev().copied());
            }
        }
        out
    }

    /// Blocks under the root in display order, with their depth
    pub fn walk(&self) -> Vec<(usize, Ulid)> {
        let mut out = Vec::new();
        let mut stack: Vec<(usize, Ulid)> = self
            .children(self.root)
            .iter()
            .rev()
            .map(|id| (0, *id))
            .collect();
        while let Some((depth, current)) = stack.pop() {
            out.push((depth, current));
            stack.extend(
                self.children(current)
                    .iter()
                    .rev()
                    .map(|id| (depth + 1, *id)),
            );
        }
        out
    }

    /// Children of a container; empty for leaves and unknown IDs
    pub fn children(&self, id: Ulid) -> &[Ulid] {
        self.blocks.get(&id).map(Block::children).unwrap_or(&[])
    }

    /// First attached block with the given display name
    pub fn find_by_name(&self, name: &str) -> Option<Ulid> {
        self.walk()
            .into_iter()
            .map(|(_, id)| id)
            .find(|id| self.blocks.get(id).map_or(false, |b| b.name == name))
    }

    // ========== Event Logging ==========

    /// Log an event
    fn log_event(&mut self, event: EventType) {
        if event.marks_dirty() {
            self.revision += 1;
        }
        self.events.push(TreeEvent::new(event));
    }

    /// Get all events
    pub fn events(&self) -> &[TreeEvent] {
        &self.events
    }

    /// Clear event log
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Counter of export-visible mutations
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ========== Utility Methods ==========

    pub fn root(&self) -> Ulid {
        self.root
    }

    pub fn trash(&self) -> Ulid {
        self.trash
    }

    /// Receipe title
    pub fn name(&self) -> &str {
        self.blocks
            .get(&self.root)
            .map(|b| b.name.as_str())
            .unwrap_or_default()
    }

    /// True when the receipe holds no blocks
    pub fn is_empty(&self) -> bool {
        self.children(self.root).is_empty()
    }

    /// Count blocks in the arena, root and trash included
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TypeDescriptor, BASE_BLOCK, GROUP, SPLIT};
    use crate::schema::{PropertySpec, ValueKind};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::with_builtins();
        registry.register(
            "Input",
            TypeDescriptor::new()
                .child_of(BASE_BLOCK)
                .property("filename", PropertySpec::new(ValueKind::File))
                .accept_extension("csv"),
        );
        registry.register(
            "OnlyInputs",
            TypeDescriptor::new().child_of(GROUP).allow_child("Input"),
        );
        registry
    }

    fn named(name: &str) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("name".to_string(), json!(name));
        args
    }

    fn names(tree: &Tree, container: Ulid) -> Vec<String> {
        tree.children(container)
            .iter()
            .map(|id| tree.get(*id).unwrap().name.clone())
            .collect()
    }

    #[test]
    fn test_tree_creation() {
        let tree = Tree::new(&registry()).unwrap();
        assert_eq!(tree.block_count(), 2);
        assert!(tree.is_empty());
        assert_eq!(tree.name(), "Untitled");

        let root = tree.get(tree.root()).unwrap();
        assert!(!root.movable);
        assert!(!root.editable);
        assert!(root.is_internal());
    }

    #[test]
    fn test_insert_positions() {
        let registry = registry();
        let mut tree = Tree::new(&registry).unwrap();
        let root = tree.root();
        let x = tree.create_block(&registry, BASE_BLOCK, &named("x")).unwrap();
        let y = tree.create_block(&registry, BASE_BLOCK, &named("y")).unwrap();
        let z = tree.create_block(&registry, BASE_BLOCK, &named("z")).unwrap();

        tree.insert(root, y, Position::Tail).unwrap();
        tree.insert(root, x, Position::Head).unwrap();
        tree.insert(root, z, Position::After(y)).unwrap();
        assert_eq!(names(&tree, root), vec!["x", "y", "z"]);
        assert_eq!(tree.get(x).unwrap().parent, Some(root));

        // reorder within the same container
        tree.insert(root, z, Position::Before(x)).unwrap();
        assert_eq!(names(&tree, root), vec!["z", "x", "y"]);

        // anchoring on itself is a no-op
        tree.insert(root, z, Position::After(z)).unwrap();
        assert_eq!(names(&tree, root), vec!["z", "x", "y"]);
    }

    #[test]
    fn test_insert_reparents() {
        let registry = registry();
        let mut tree = Tree::new(&registry).unwrap();
        let root = tree.root();
        let group = tree.create_block(&registry, GROUP, &named("g")).unwrap();
        let x = tree.create_block(&registry, BASE_BLOCK, &named("x")).unwrap();
        tree.insert(root, group, Position::Tail).unwrap();
        tree.insert(root, x, Position::Tail).unwrap();

        tree.insert(group, x, Position::Head).unwrap();
        assert_eq!(names(&tree, root), vec!["g"]);
        assert_eq!(names(&tree, group), vec!["x"]);
        assert_eq!(tree.get(x).unwrap().parent, Some(group));
    }

    #[test]
    fn test_singular_insert_is_rejected_without_change() {
        let registry = registry();
        let mut tree = Tree::new(&registry).unwrap();
        let mut args = named("only");
        args.insert("singular".to_string(), json!(true));
        let group = tree.create_block(&registry, GROUP, &args).unwrap();
        let a = tree.create_block(&registry, BASE_BLOCK, &named("a")).unwrap();
        let b = tree.create_block(&registry, BASE_BLOCK, &named("b")).unwrap();
        tree.insert(group, a, Position::Tail).unwrap();

        let before = tree.blocks().clone();
        assert_matches!(
            tree.insert(group, b, Position::Tail),
            Err(ReceipeError::CapacityExceeded(id)) if id == group
        );
        assert_eq!(tree.blocks(), &before);

        // the sole occupant may still be re-inserted
        tree.insert(group, a, Position::Head).unwrap();
    }

    #[test]
    fn test_incompatible_child() {
        let registry = registry();
        let mut tree = Tree::new(&registry).unwrap();
        let picky = tree.create_block(&registry, "OnlyInputs", &named("p")).unwrap();
        let plain = tree.create_block(&registry, BASE_BLOCK, &named("x")).unwrap();
        let input = tree.create_block(&registry, "Input", &named("in")).unwrap();

        assert!(!tree.child_type_matches(picky, plain).unwrap());
        assert_matches!(
            tree.insert(picky, plain, Position::Tail),
            Err(ReceipeError::IncompatibleChild { .. })
        );
        tree.insert(picky, input, Position::Tail).unwrap();
    }

    #[test]
    fn test_cycle_and_structural_errors() {
        let registry = registry();
        let mut tree = Tree::new(&registry).unwrap();
        let outer = tree.create_block(&registry, GROUP, &named("outer")).unwrap();
        let inner = tree.create_block(&registry, GROUP, &named("inner")).unwrap();
        let leaf = tree.create_block(&registry, BASE_BLOCK, &named("leaf")).unwrap();
        tree.insert(outer, inner, Position::Tail).unwrap();

        assert_matches!(
            tree.insert(inner, outer, Position::Tail),
            Err(ReceipeError::WouldCreateCycle(_))
        );
        assert_matches!(
            tree.insert(outer, outer, Position::Tail),
            Err(ReceipeError::WouldCreateCycle(_))
        );
        assert_matches!(
            tree.insert(leaf, inner, Position::Tail),
            Err(ReceipeError::NotAContainer(_))
        );
        assert_matches!(
            tree.insert(outer, leaf, Position::Before(leaf)),
            Err(ReceipeError::AnchorNotFound { .. })
        );
        let root = tree.root();
        assert_matches!(
            tree.insert(outer, root, Position::Tail),
            Err(ReceipeError::NotMovable(_))
        );
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let registry = registry();
        let mut tree = Tree::new(&registry).unwrap();
        let root = tree.root();
        let x = tree.create_block(&registry, BASE_BLOCK, &named("x")).unwrap();

        assert!(!tree.remove(root, x).unwrap());
        tree.insert(root, x, Position::Tail).unwrap();
        assert!(tree.remove(root, x).unwrap());
        assert!(tree.is_empty());
        assert_eq!(tree.get(x).unwrap().parent, None);
    }

    #[test]
    fn test_delete_drops_subtree() {
        let registry = registry();
        let mut tree = Tree::new(&registry).unwrap();
        let root = tree.root();
        let group = tree.create_block(&registry, GROUP, &named("g")).unwrap();
        let x = tree.create_block(&registry, BASE_BLOCK, &named("x")).unwrap();
        tree.insert(root, group, Position::Tail).unwrap();
        tree.insert(group, x, Position::Tail).unwrap();

        assert_eq!(tree.delete(group).unwrap(), 2);
        assert!(tree.get(x).is_none());
        assert!(tree.is_empty());
        assert_matches!(tree.delete(root), Err(ReceipeError::NotMovable(_)));
    }

    #[test]
    fn test_split_branches() {
        let registry = registry();
        let mut tree = Tree::new(&registry).unwrap();
        let root = tree.root();
        let split = tree.create_block(&registry, SPLIT, &named("s")).unwrap();
        let x = tree.create_block(&registry, BASE_BLOCK, &named("x")).unwrap();
        tree.insert(root, split, Position::Tail).unwrap();

        let branch = tree
            .add_branch(&registry, split, vec!["a".to_string()])
            .unwrap();
        assert_eq!(tree.children(split), &[branch]);
        assert_eq!(tree.get(branch).unwrap().branch_spec(), vec!["a"]);

        // splits only hold branch wrappers
        assert_matches!(
            tree.insert(split, x, Position::Tail),
            Err(ReceipeError::IncompatibleChild { .. })
        );
        tree.insert(branch, x, Position::Tail).unwrap();
        assert_eq!(tree.walk(), vec![(0, split), (1, branch), (2, x)]);

        let leaf = tree.create_block(&registry, BASE_BLOCK, &named("y")).unwrap();
        assert_matches!(
            tree.add_branch(&registry, leaf, Vec::new()),
            Err(ReceipeError::NotAContainer(_))
        );
    }

    #[test]
    fn test_set_file_checks_extension() {
        let registry = registry();
        let mut tree = Tree::new(&registry).unwrap();
        let input = tree.create_block(&registry, "Input", &named("in")).unwrap();

        assert_matches!(
            tree.set_file(input, "notes.txt"),
            Err(ReceipeError::UnsupportedFile { .. })
        );
        assert_eq!(tree.set_file(input, "sales.csv").unwrap(), "filename");
        assert_eq!(
            tree.get(input).unwrap().properties["filename"],
            json!("sales.csv")
        );
    }

    #[test]
    fn test_apply_properties_and_revision() {
        let registry = registry();
        let mut tree = Tree::new(&registry).unwrap();
        let root = tree.root();
        let x = tree.create_block(&registry, BASE_BLOCK, &named("x")).unwrap();
        assert_eq!(tree.revision(), 0);

        tree.insert(root, x, Position::Tail).unwrap();
        let after_insert = tree.revision();
        assert!(after_insert > 0);

        tree.apply_properties(x, &named("renamed")).unwrap();
        assert_eq!(tree.get(x).unwrap().name, "renamed");
        assert!(tree.revision() > after_insert);
        assert_eq!(tree.find_by_name("renamed"), Some(x));

        assert_matches!(
            tree.apply_properties(root, &named("nope")),
            Err(ReceipeError::NotEditable(_))
        );
    }

    #[test]
    fn test_event_logging() {
        let registry = registry();
        let mut tree = Tree::new(&registry).unwrap();
        tree.create_block(&registry, BASE_BLOCK, &named("x")).unwrap();

        assert_eq!(tree.events().len(), 1);
        match &tree.events()[0].event {
            EventType::BlockCreated { type_name, name, .. } => {
                assert_eq!(type_name, BASE_BLOCK);
                assert_eq!(name, "x");
            }
            _ => panic!("Expected BlockCreated event"),
        }
    }
}
