//! Editing session: one receipe, one drag gesture, one execution engine.
//!
//! The session decides when the in-memory receipe is out of sync with the
//! engine. Every export-visible mutation bumps the tree revision; `push`
//! records the revision the engine last saw, and `run` refuses to execute
//! a stale receipe unless the user agrees to sync first.

use crate::error::ReceipeError;
use crate::gesture::{DragSession, GestureOutcome};
use crate::registry::{TypeRegistry, BASE_BLOCK, FILE};
use crate::tree::{Position, Tree};
use crate::wire;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::{Duration, Instant};
use ulid::Ulid;

/// Input block a reset receipe starts with, when the catalog provides it
pub const DEFAULT_INPUT: &str = "skll.plugin.tabular.FileInput";

/// What the engine should do with the receipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunMode {
    Preview,
    Train,
    Test,
    Run,
    /// Report the column names only
    Columns,
}

impl RunMode {
    /// Case-insensitive; anything unrecognised is a preview
    pub fn parse(mode: &str) -> Self {
        match mode.trim().to_ascii_uppercase().as_str() {
            "TRAIN" => RunMode::Train,
            "TEST" => RunMode::Test,
            "RUN" => RunMode::Run,
            "COLUMNS" => RunMode::Columns,
            _ => RunMode::Preview,
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::Preview => "PREVIEW",
            RunMode::Train => "TRAIN",
            RunMode::Test => "TEST",
            RunMode::Run => "RUN",
            RunMode::Columns => "COLUMNS",
        };
        write!(f, "{}", s)
    }
}

/// Format of a run result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultUsage {
    #[default]
    Table,
    Plotly,
}

/// Channel to the execution engine
pub trait Engine {
    /// Receipe currently held by the engine (null when it has none)
    fn dump(&mut self) -> Result<Value>;

    /// Replace the engine's receipe
    fn load(&mut self, receipe: &Value) -> Result<()>;

    fn run(&mut self, mode: RunMode, upto: Option<&str>) -> Result<()>;

    fn result(&mut self, usage: ResultUsage) -> Result<Value>;
}

/// Yes/no questions put to the user
pub trait Prompt {
    fn confirm(&mut self, question: &str) -> bool;
}

/// Answers every question the same way
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

impl Prompt for AutoConfirm {
    fn confirm(&mut self, question: &str) -> bool {
        tracing::debug!("{} -> {}", question, self.0);
        self.0
    }
}

/// In-process engine that stores the receipe and echoes runs back
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    receipe: Value,
    last_run: Option<(RunMode, Option<String>)>,
    loads: usize,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine already holding `receipe`
    pub fn with_receipe(receipe: Value) -> Self {
        Self {
            receipe,
            ..Self::default()
        }
    }

    pub fn receipe(&self) -> &Value {
        &self.receipe
    }

    pub fn last_run(&self) -> Option<(RunMode, Option<&str>)> {
        self.last_run
            .as_ref()
            .map(|(mode, upto)| (*mode, upto.as_deref()))
    }

    /// Number of receipes pushed so far
    pub fn loads(&self) -> usize {
        self.loads
    }
}

impl Engine for MemoryEngine {
    fn dump(&mut self) -> Result<Value> {
        Ok(self.receipe.clone())
    }

    fn load(&mut self, receipe: &Value) -> Result<()> {
        self.receipe = receipe.clone();
        self.loads += 1;
        Ok(())
    }

    fn run(&mut self, mode: RunMode, upto: Option<&str>) -> Result<()> {
        self.last_run = Some((mode, upto.map(str::to_string)));
        Ok(())
    }

    fn result(&mut self, usage: ResultUsage) -> Result<Value> {
        let (mode, upto) = match &self.last_run {
            Some((mode, upto)) => (mode.to_string(), upto.clone()),
            None => return Ok(Value::Null),
        };
        Ok(json!({ "mode": mode, "upto": upto, "usage": usage }))
    }
}

/// The editor's single receipe with its drag gesture
pub struct Session {
    registry: TypeRegistry,
    tree: Tree,
    drag: DragSession,
    /// Tree revision the engine last received; `None` forces a sync
    synced_revision: Option<u64>,
}

impl Session {
    /// Session over an empty receipe
    pub fn new(registry: TypeRegistry, press_hold: Duration) -> Result<Self> {
        let tree = Tree::new(&registry)?;
        let synced_revision = Some(tree.revision());
        Ok(Self {
            registry,
            tree,
            drag: DragSession::new(press_hold),
            synced_revision,
        })
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Direct tree access for property edits and programmatic building
    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn drag(&self) -> &DragSession {
        &self.drag
    }

    /// True when the engine has not seen the current receipe
    pub fn is_dirty(&self) -> bool {
        self.synced_revision != Some(self.tree.revision())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.drag.is_active() {
            return Err(ReceipeError::DragInProgress.into());
        }
        Ok(())
    }

    /// Ask before discarding a receipe that has blocks
    fn confirm_overwrite(&self, prompt: &mut dyn Prompt) -> bool {
        self.tree.is_empty() || prompt.confirm("Overwrite existing receipe?")
    }

    // ========== Engine Sync ==========

    /// Replace the receipe with the engine's.
    ///
    /// Returns `false` when the user declined. An engine without a receipe
    /// yields a reset one.
    pub fn pull(&mut self, engine: &mut dyn Engine, prompt: &mut dyn Prompt) -> Result<bool> {
        self.ensure_idle()?;
        if !self.confirm_overwrite(prompt) {
            return Ok(false);
        }

        let dump = engine.dump().context("Failed to fetch receipe from engine")?;
        if is_empty_receipe(&dump) {
            self.tree = self.fresh_receipe()?;
            self.synced_revision = None;
            tracing::info!("Engine holds no receipe; started a new one");
            return Ok(true);
        }

        let tree = wire::import_receipe(&self.registry, &dump)
            .context("Failed to import receipe from engine")?;
        self.tree = tree;
        self.synced_revision = Some(self.tree.revision());
        tracing::info!("Pulled receipe with {} blocks", self.tree.walk().len());
        Ok(true)
    }

    /// Send the receipe to the engine
    pub fn push(&mut self, engine: &mut dyn Engine) -> Result<()> {
        let receipe = wire::export_receipe(&self.tree)?;
        engine
            .load(&receipe)
            .context("Failed to send receipe to engine")?;
        self.synced_revision = Some(self.tree.revision());
        tracing::info!("Pushed receipe '{}'", self.tree.name());
        Ok(())
    }

    /// Start over with an "Untitled" receipe holding one input block
    pub fn reset(&mut self, prompt: &mut dyn Prompt) -> Result<bool> {
        self.ensure_idle()?;
        if !self.confirm_overwrite(prompt) {
            return Ok(false);
        }
        self.tree = self.fresh_receipe()?;
        self.synced_revision = None;
        Ok(true)
    }

    /// Swap in a receipe loaded from elsewhere (storage, a dropped file)
    pub fn replace(&mut self, tree: Tree, prompt: &mut dyn Prompt) -> Result<bool> {
        self.ensure_idle()?;
        if !self.confirm_overwrite(prompt) {
            return Ok(false);
        }
        self.tree = tree;
        self.synced_revision = None;
        Ok(true)
    }

    fn fresh_receipe(&self) -> Result<Tree> {
        let mut tree = Tree::new(&self.registry)?;
        let input_type = if self.registry.contains(DEFAULT_INPUT) {
            DEFAULT_INPUT
        } else {
            BASE_BLOCK
        };
        let mut args = Map::new();
        args.insert("name".to_string(), json!("Input"));
        let input = tree.create_block(&self.registry, input_type, &args)?;
        let root = tree.root();
        tree.insert(root, input, Position::Head)?;
        Ok(tree)
    }

    /// Execute the receipe up to the block named `upto`.
    ///
    /// A stale receipe is synced first if the user agrees; declining fails
    /// with `SyncConflict` and nothing is sent.
    pub fn run(
        &mut self,
        engine: &mut dyn Engine,
        prompt: &mut dyn Prompt,
        mode: &str,
        upto: Option<&str>,
        usage: ResultUsage,
    ) -> Result<Value> {
        let mode = RunMode::parse(mode);
        if self.is_dirty() {
            if !prompt.confirm("Receipe not in sync with runtime, sync now?") {
                return Err(ReceipeError::SyncConflict.into());
            }
            self.push(engine)?;
        }

        tracing::info!("Running receipe in {} mode up to {:?}", mode, upto);
        engine
            .run(mode, upto)
            .with_context(|| format!("Engine failed to run in {} mode", mode))?;
        engine
            .result(usage)
            .context("Failed to fetch run result from engine")
    }

    // ========== Gestures ==========

    pub fn press(&mut self, id: Ulid, now: Instant) -> GestureOutcome {
        self.drag.press(&self.tree, id, now)
    }

    pub fn tick(&mut self, now: Instant) -> GestureOutcome {
        self.drag.tick(now)
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) -> GestureOutcome {
        self.drag.pointer_move(x, y)
    }

    pub fn enter(&mut self, target: Ulid) -> crate::Result<GestureOutcome> {
        self.drag.enter(&self.tree, target)
    }

    pub fn leave(&mut self, target: Ulid) -> GestureOutcome {
        self.drag.leave(target)
    }

    pub fn hover_affordance(&mut self, kind: Option<crate::DropKind>) -> GestureOutcome {
        self.drag.hover_affordance(kind)
    }

    pub fn release(&mut self) -> crate::Result<GestureOutcome> {
        self.drag.release(&mut self.tree, &self.registry)
    }

    pub fn cancel(&mut self) -> crate::Result<GestureOutcome> {
        self.drag.cancel(&mut self.tree)
    }

    /// Append a branch to a split
    pub fn add_branch(&mut self, split: Ulid, spec: Vec<String>) -> crate::Result<Ulid> {
        self.tree.add_branch(&self.registry, split, spec)
    }

    /// Create a block from the palette and start dragging it right away
    pub fn drag_new_block(&mut self, type_name: &str) -> crate::Result<Ulid> {
        if self.drag.is_active() {
            return Err(ReceipeError::DragInProgress);
        }
        let id = self.tree.create_block(&self.registry, type_name, &Map::new())?;
        self.drag.start_fresh_drag(&self.tree, id);
        Ok(id)
    }

    /// Create a placeholder for an external file and start dragging it
    pub fn drag_file(&mut self, filename: &str) -> crate::Result<Ulid> {
        if self.drag.is_active() {
            return Err(ReceipeError::DragInProgress);
        }
        let mut args = Map::new();
        args.insert("filename".to_string(), json!(filename));
        args.insert("name".to_string(), json!(filename));
        let id = self.tree.create_block(&self.registry, FILE, &args)?;
        self.drag.start_fresh_drag(&self.tree, id);
        Ok(id)
    }
}

fn is_empty_receipe(dump: &Value) -> bool {
    match dump {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drop::DropKind;
    use crate::registry::{TypeDescriptor, GROUP};
    use crate::schema::{PropertySpec, ValueKind};
    use assert_matches::assert_matches;

    struct Recorder {
        answer: bool,
        asked: Vec<String>,
    }

    impl Prompt for Recorder {
        fn confirm(&mut self, question: &str) -> bool {
            self.asked.push(question.to_string());
            self.answer
        }
    }

    fn recorder(answer: bool) -> Recorder {
        Recorder {
            answer,
            asked: Vec::new(),
        }
    }

    fn session() -> Session {
        let mut registry = TypeRegistry::with_builtins();
        registry.register(
            DEFAULT_INPUT,
            TypeDescriptor::new()
                .child_of(BASE_BLOCK)
                .property("filename", PropertySpec::new(ValueKind::File))
                .accept_extension("csv"),
        );
        Session::new(registry, Duration::ZERO).unwrap()
    }

    fn add_block(session: &mut Session, name: &str) -> Ulid {
        let mut args = Map::new();
        args.insert("name".to_string(), json!(name));
        let registry = session.registry().clone();
        let tree = session.tree_mut();
        let id = tree.create_block(&registry, BASE_BLOCK, &args).unwrap();
        let root = tree.root();
        tree.insert(root, id, Position::Tail).unwrap();
        id
    }

    #[test]
    fn test_run_mode_normalisation() {
        assert_eq!(RunMode::parse("train"), RunMode::Train);
        assert_eq!(RunMode::parse(" Columns "), RunMode::Columns);
        assert_eq!(RunMode::parse("bogus"), RunMode::Preview);
        assert_eq!(RunMode::Test.to_string(), "TEST");
    }

    #[test]
    fn test_reset_starts_with_input() {
        let mut session = session();
        assert!(session.reset(&mut AutoConfirm(true)).unwrap());

        let tree = session.tree();
        assert_eq!(tree.name(), "Untitled");
        let children = tree.children(tree.root());
        assert_eq!(children.len(), 1);
        let input = tree.block(children[0]).unwrap();
        assert_eq!(input.type_name, DEFAULT_INPUT);
        assert_eq!(input.name, "Input");
        assert!(session.is_dirty());
    }

    #[test]
    fn test_reset_falls_back_to_base_block() {
        let mut session = Session::new(TypeRegistry::with_builtins(), Duration::ZERO).unwrap();
        session.reset(&mut AutoConfirm(true)).unwrap();
        let tree = session.tree();
        let input = tree.block(tree.children(tree.root())[0]).unwrap();
        assert_eq!(input.type_name, BASE_BLOCK);
    }

    #[test]
    fn test_overwrite_needs_confirmation() {
        let mut session = session();
        add_block(&mut session, "a");

        let mut prompt = recorder(false);
        assert!(!session.reset(&mut prompt).unwrap());
        assert_eq!(prompt.asked, vec!["Overwrite existing receipe?".to_string()]);
        assert!(session.tree().find_by_name("a").is_some());
    }

    #[test]
    fn test_empty_receipe_is_replaced_without_asking() {
        let mut session = session();
        let mut prompt = recorder(false);
        assert!(session.reset(&mut prompt).unwrap());
        assert!(prompt.asked.is_empty());
    }

    #[test]
    fn test_push_then_pull() {
        let mut session = session();
        add_block(&mut session, "a");
        add_block(&mut session, "b");
        assert!(session.is_dirty());

        let mut engine = MemoryEngine::new();
        session.push(&mut engine).unwrap();
        assert!(!session.is_dirty());
        assert_eq!(engine.receipe()["name"], json!("a"));

        let mut other = self::session();
        assert!(other.pull(&mut engine, &mut AutoConfirm(true)).unwrap());
        assert!(!other.is_dirty());
        let names: Vec<String> = other
            .tree()
            .children(other.tree().root())
            .iter()
            .map(|id| other.tree().block(*id).unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_pull_empty_engine_resets() {
        let mut session = session();
        let mut engine = MemoryEngine::new();
        assert!(session.pull(&mut engine, &mut AutoConfirm(true)).unwrap());
        assert_eq!(session.tree().children(session.tree().root()).len(), 1);
        assert!(session.is_dirty());
    }

    #[test]
    fn test_failed_pull_keeps_tree() {
        let mut session = session();
        let a = add_block(&mut session, "a");
        let mut engine = MemoryEngine::with_receipe(json!({"_type": "not.registered"}));

        let err = session
            .pull(&mut engine, &mut AutoConfirm(true))
            .unwrap_err();
        assert_matches!(
            err.downcast_ref::<ReceipeError>(),
            Some(ReceipeError::UnknownType(_))
        );
        assert_eq!(session.tree().children(session.tree().root()), &[a]);
    }

    #[test]
    fn test_run_when_clean() {
        let mut session = session();
        let mut engine = MemoryEngine::new();
        let mut prompt = recorder(false);

        let result = session
            .run(&mut engine, &mut prompt, "train", Some("a"), ResultUsage::Table)
            .unwrap();
        assert!(prompt.asked.is_empty());
        assert_eq!(engine.last_run(), Some((RunMode::Train, Some("a"))));
        assert_eq!(result["mode"], json!("TRAIN"));
        assert_eq!(result["usage"], json!("table"));
    }

    #[test]
    fn test_run_dirty_declined_is_sync_conflict() {
        let mut session = session();
        add_block(&mut session, "a");
        let mut engine = MemoryEngine::new();

        let err = session
            .run(&mut engine, &mut AutoConfirm(false), "run", None, ResultUsage::Table)
            .unwrap_err();
        assert_matches!(
            err.downcast_ref::<ReceipeError>(),
            Some(ReceipeError::SyncConflict)
        );
        assert_eq!(engine.loads(), 0);
        assert!(engine.last_run().is_none());
    }

    #[test]
    fn test_run_dirty_accepted_syncs_first() {
        let mut session = session();
        add_block(&mut session, "a");
        let mut engine = MemoryEngine::new();

        session
            .run(&mut engine, &mut AutoConfirm(true), "nonsense", None, ResultUsage::Plotly)
            .unwrap();
        assert_eq!(engine.loads(), 1);
        assert_eq!(engine.last_run(), Some((RunMode::Preview, None)));
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_reset_refused_while_dragging() {
        let mut session = session();
        let a = add_block(&mut session, "a");
        session.press(a, Instant::now());

        let err = session.reset(&mut AutoConfirm(true)).unwrap_err();
        assert_matches!(
            err.downcast_ref::<ReceipeError>(),
            Some(ReceipeError::DragInProgress)
        );
        assert!(session.tree().find_by_name("a").is_some());

        session.cancel().unwrap();
        assert!(session.reset(&mut AutoConfirm(true)).unwrap());
    }

    #[test]
    fn test_palette_drag_into_group() {
        let mut session = session();
        let registry = session.registry().clone();
        let mut args = Map::new();
        args.insert("name".to_string(), json!("g"));
        let tree = session.tree_mut();
        let group = tree.create_block(&registry, GROUP, &args).unwrap();
        let root = tree.root();
        tree.insert(root, group, Position::Tail).unwrap();

        let fresh = session.drag_new_block(BASE_BLOCK).unwrap();
        assert!(session.drag().is_dragging());
        assert_matches!(session.drag_new_block(BASE_BLOCK), Err(ReceipeError::DragInProgress));

        session.enter(group).unwrap();
        session.hover_affordance(Some(DropKind::Into));
        session.release().unwrap();
        assert_eq!(session.tree().children(group), &[fresh]);
    }

    #[test]
    fn test_file_drag_sets_filename() {
        let mut session = session();
        session.reset(&mut AutoConfirm(true)).unwrap();
        let input = session.tree().children(session.tree().root())[0];

        let file = session.drag_file("sales.csv").unwrap();
        session.enter(input).unwrap();
        session.hover_affordance(Some(DropKind::Into));
        session.release().unwrap();

        assert_eq!(
            session.tree().block(input).unwrap().value("filename"),
            Some(json!("sales.csv"))
        );
        assert!(session.tree().get(file).is_none());
    }

    #[test]
    fn test_cancelled_palette_drag_leaves_nothing() {
        let mut session = session();
        let before = session.tree().block_count();
        let fresh = session.drag_new_block(BASE_BLOCK).unwrap();
        session.cancel().unwrap();
        assert!(session.tree().get(fresh).is_none());
        assert_eq!(session.tree().block_count(), before);
    }
}
