//! Pointer gesture state machine.
//!
//! `Idle -> Armed -> Dragging -> Hovering* -> (commit | cancel) -> Idle`.
//!
//! A press on a movable block arms a press-hold timer; releasing before it
//! elapses is a click. Once the timer elapses the block becomes the drag
//! source and a floating proxy follows the pointer. Hovering a block asks
//! [`offered_drop_kinds`] for the legal attachments; releasing over one of
//! them commits it in a single transition. Every other path ends without
//! touching the tree, except that blocks created just for this drag
//! (palette entries, dragged-in files) are deleted again.

use crate::drop::{commit_drop, offered_drop_kinds, DropKind};
use crate::error::Result;
use crate::registry::TypeRegistry;
use crate::tree::Tree;
use std::time::{Duration, Instant};
use ulid::Ulid;

/// Press-hold debounce separating clicks from drags
pub const DEFAULT_PRESS_HOLD: Duration = Duration::from_millis(100);

/// Floating copy of the dragged block
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Proxy {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GestureState {
    Idle,
    Armed {
        source: Ulid,
        pressed_at: Instant,
        fresh: bool,
    },
    Dragging {
        source: Ulid,
        proxy: Proxy,
        fresh: bool,
    },
    Hovering {
        source: Ulid,
        proxy: Proxy,
        target: Ulid,
        offers: Vec<DropKind>,
        /// Affordance currently under the pointer
        active: Option<DropKind>,
        fresh: bool,
    },
}

/// What a gesture event did
#[derive(Debug, Clone, PartialEq)]
pub enum GestureOutcome {
    Ignored,
    Armed(Ulid),
    /// Released before the press-hold elapsed
    Click(Ulid),
    DragStarted(Ulid),
    Moved(Proxy),
    Offers { target: Ulid, kinds: Vec<DropKind> },
    AffordanceChanged(Option<DropKind>),
    Committed {
        source: Ulid,
        target: Ulid,
        kind: DropKind,
    },
    Cancelled(Ulid),
}

/// The single drag session of an editor
#[derive(Debug, Clone)]
pub struct DragSession {
    state: GestureState,
    press_hold: Duration,
    pointer: Proxy,
    trash_visible: bool,
    trash_highlighted: bool,
}

impl Default for DragSession {
    fn default() -> Self {
        Self::new(DEFAULT_PRESS_HOLD)
    }
}

impl DragSession {
    pub fn new(press_hold: Duration) -> Self {
        Self {
            state: GestureState::Idle,
            press_hold,
            pointer: Proxy::default(),
            trash_visible: false,
            trash_highlighted: false,
        }
    }

    // ========== Pointer Events ==========

    /// Primary button pressed on a block
    pub fn press(&mut self, tree: &Tree, id: Ulid, now: Instant) -> GestureOutcome {
        self.arm(tree, id, now, false)
    }

    /// Primary button pressed on a block created for this drag
    pub fn press_fresh(&mut self, tree: &Tree, id: Ulid, now: Instant) -> GestureOutcome {
        self.arm(tree, id, now, true)
    }

    fn arm(&mut self, tree: &Tree, id: Ulid, now: Instant, fresh: bool) -> GestureOutcome {
        if self.state != GestureState::Idle {
            return GestureOutcome::Ignored;
        }
        if !tree.get(id).map_or(false, |b| b.movable) {
            return GestureOutcome::Ignored;
        }
        self.state = GestureState::Armed {
            source: id,
            pressed_at: now,
            fresh,
        };
        GestureOutcome::Armed(id)
    }

    /// Start dragging a fresh block right away, skipping the press-hold
    pub fn start_fresh_drag(&mut self, tree: &Tree, id: Ulid) -> GestureOutcome {
        if self.state != GestureState::Idle || !tree.get(id).map_or(false, |b| b.movable) {
            return GestureOutcome::Ignored;
        }
        self.begin_drag(id, true)
    }

    /// Advance the press-hold timer
    pub fn tick(&mut self, now: Instant) -> GestureOutcome {
        match self.state {
            GestureState::Armed {
                source,
                pressed_at,
                fresh,
            } if now.saturating_duration_since(pressed_at) >= self.press_hold => {
                self.begin_drag(source, fresh)
            }
            _ => GestureOutcome::Ignored,
        }
    }

    fn begin_drag(&mut self, source: Ulid, fresh: bool) -> GestureOutcome {
        tracing::debug!("Drag started on {}", source);
        self.state = GestureState::Dragging {
            source,
            proxy: self.pointer,
            fresh,
        };
        self.trash_visible = true;
        GestureOutcome::DragStarted(source)
    }

    /// Pointer moved; only the proxy follows
    pub fn pointer_move(&mut self, x: f32, y: f32) -> GestureOutcome {
        let pointer = Proxy { x, y };
        self.pointer = pointer;
        match &mut self.state {
            GestureState::Dragging { proxy, .. } | GestureState::Hovering { proxy, .. } => {
                *proxy = pointer;
                GestureOutcome::Moved(pointer)
            }
            _ => GestureOutcome::Ignored,
        }
    }

    /// Pointer entered a candidate target.
    ///
    /// The previous candidate is always cleared first.
    pub fn enter(&mut self, tree: &Tree, target: Ulid) -> Result<GestureOutcome> {
        let (source, proxy, fresh) = match &self.state {
            GestureState::Hovering {
                target: current, ..
            } if *current == target => return Ok(GestureOutcome::Ignored),
            GestureState::Dragging {
                source,
                proxy,
                fresh,
            }
            | GestureState::Hovering {
                source,
                proxy,
                fresh,
                ..
            } => (*source, *proxy, *fresh),
            _ => return Ok(GestureOutcome::Ignored),
        };

        self.clear_candidate();
        let kinds = offered_drop_kinds(tree, target, source)?;
        if kinds.is_empty() {
            return Ok(GestureOutcome::Offers {
                target,
                kinds,
            });
        }

        let active = if target == tree.trash() {
            self.trash_highlighted = true;
            Some(DropKind::Sink)
        } else {
            None
        };
        self.state = GestureState::Hovering {
            source,
            proxy,
            target,
            offers: kinds.clone(),
            active,
            fresh,
        };
        Ok(GestureOutcome::Offers { target, kinds })
    }

    /// Pointer left a candidate target
    pub fn leave(&mut self, target: Ulid) -> GestureOutcome {
        let hovering = matches!(
            &self.state,
            GestureState::Hovering { target: current, .. } if *current == target
        );
        if !hovering {
            return GestureOutcome::Ignored;
        }
        self.clear_candidate();
        GestureOutcome::AffordanceChanged(None)
    }

    /// Pointer moved onto (`Some`) or off (`None`) a drop affordance
    pub fn hover_affordance(&mut self, kind: Option<DropKind>) -> GestureOutcome {
        match &mut self.state {
            GestureState::Hovering { offers, active, .. } => {
                if let Some(kind) = kind {
                    if !offers.contains(&kind) {
                        return GestureOutcome::Ignored;
                    }
                }
                *active = kind;
                GestureOutcome::AffordanceChanged(kind)
            }
            _ => GestureOutcome::Ignored,
        }
    }

    /// Primary button released
    pub fn release(&mut self, tree: &mut Tree, registry: &TypeRegistry) -> Result<GestureOutcome> {
        match self.state.clone() {
            GestureState::Idle => Ok(GestureOutcome::Ignored),
            GestureState::Armed {
                source,
                fresh: false,
                ..
            } => {
                self.finish();
                Ok(GestureOutcome::Click(source))
            }
            GestureState::Hovering {
                source,
                target,
                active: Some(kind),
                fresh,
                ..
            } => {
                self.finish();
                match commit_drop(tree, registry, source, target, kind) {
                    Ok(()) => Ok(GestureOutcome::Committed {
                        source,
                        target,
                        kind,
                    }),
                    Err(err) => {
                        discard_fresh(tree, source, fresh)?;
                        Err(err)
                    }
                }
            }
            _ => self.cancel(tree),
        }
    }

    /// Abandon the gesture without changing the receipe. Idempotent.
    pub fn cancel(&mut self, tree: &mut Tree) -> Result<GestureOutcome> {
        let (source, fresh) = match self.state {
            GestureState::Idle => return Ok(GestureOutcome::Ignored),
            GestureState::Armed { source, fresh, .. }
            | GestureState::Dragging { source, fresh, .. }
            | GestureState::Hovering { source, fresh, .. } => (source, fresh),
        };
        self.finish();

        discard_fresh(tree, source, fresh)?;
        tracing::debug!("Drag of {} cancelled", source);
        Ok(GestureOutcome::Cancelled(source))
    }

    fn clear_candidate(&mut self) {
        if let GestureState::Hovering {
            source,
            proxy,
            fresh,
            ..
        } = self.state
        {
            self.state = GestureState::Dragging {
                source,
                proxy,
                fresh,
            };
        }
        self.trash_highlighted = false;
    }

    /// Terminal cleanup shared by every path
    fn finish(&mut self) {
        self.state = GestureState::Idle;
        self.trash_visible = false;
        self.trash_highlighted = false;
    }

    // ========== Queries ==========

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    /// True from press until commit or cancel
    pub fn is_active(&self) -> bool {
        self.state != GestureState::Idle
    }

    pub fn is_dragging(&self) -> bool {
        matches!(
            self.state,
            GestureState::Dragging { .. } | GestureState::Hovering { .. }
        )
    }

    pub fn source(&self) -> Option<Ulid> {
        match self.state {
            GestureState::Idle => None,
            GestureState::Armed { source, .. }
            | GestureState::Dragging { source, .. }
            | GestureState::Hovering { source, .. } => Some(source),
        }
    }

    /// Current candidate and its offers
    pub fn candidate(&self) -> Option<(Ulid, &[DropKind], Option<DropKind>)> {
        match &self.state {
            GestureState::Hovering {
                target,
                offers,
                active,
                ..
            } => Some((*target, offers.as_slice(), *active)),
            _ => None,
        }
    }

    pub fn proxy(&self) -> Option<Proxy> {
        match self.state {
            GestureState::Dragging { proxy, .. } | GestureState::Hovering { proxy, .. } => {
                Some(proxy)
            }
            _ => None,
        }
    }

    pub fn press_hold(&self) -> Duration {
        self.press_hold
    }

    pub fn trash_visible(&self) -> bool {
        self.trash_visible
    }

    pub fn trash_highlighted(&self) -> bool {
        self.trash_highlighted
    }
}

/// Delete a block created for a drag that did not land
fn discard_fresh(tree: &mut Tree, source: Ulid, fresh: bool) -> Result<()> {
    if fresh && tree.get(source).is_some() && !tree.is_attached(source) {
        tree.delete(source)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BASE_BLOCK, GROUP};
    use crate::tree::Position;
    use serde_json::{json, Map};

    struct Fixture {
        registry: TypeRegistry,
        tree: Tree,
        x: Ulid,
        y: Ulid,
        group: Ulid,
    }

    fn fixture() -> Fixture {
        let registry = TypeRegistry::with_builtins();
        let mut tree = Tree::new(&registry).unwrap();
        let root = tree.root();
        let mut ids = Vec::new();
        for (type_name, name) in [(BASE_BLOCK, "x"), (BASE_BLOCK, "y"), (GROUP, "g")] {
            let mut args = Map::new();
            args.insert("name".to_string(), json!(name));
            let id = tree.create_block(&registry, type_name, &args).unwrap();
            tree.insert(root, id, Position::Tail).unwrap();
            ids.push(id);
        }
        Fixture {
            registry,
            tree,
            x: ids[0],
            y: ids[1],
            group: ids[2],
        }
    }

    fn start_drag(session: &mut DragSession, fx: &Fixture, id: Ulid) {
        let t0 = Instant::now();
        assert_eq!(session.press(&fx.tree, id, t0), GestureOutcome::Armed(id));
        assert_eq!(
            session.tick(t0 + DEFAULT_PRESS_HOLD),
            GestureOutcome::DragStarted(id)
        );
    }

    #[test]
    fn test_quick_release_is_a_click() {
        let mut fx = fixture();
        let mut session = DragSession::default();
        let t0 = Instant::now();

        session.press(&fx.tree, fx.x, t0);
        assert_eq!(
            session.tick(t0 + Duration::from_millis(10)),
            GestureOutcome::Ignored
        );
        assert_eq!(
            session.release(&mut fx.tree, &fx.registry).unwrap(),
            GestureOutcome::Click(fx.x)
        );
        assert!(!session.is_active());
    }

    #[test]
    fn test_root_cannot_be_pressed() {
        let fx = fixture();
        let mut session = DragSession::default();
        assert_eq!(
            session.press(&fx.tree, fx.tree.root(), Instant::now()),
            GestureOutcome::Ignored
        );
    }

    #[test]
    fn test_drag_commit_reorders() {
        let mut fx = fixture();
        let mut session = DragSession::default();
        start_drag(&mut session, &fx, fx.y);
        assert!(session.trash_visible());

        assert_eq!(session.pointer_move(5.0, 6.0), GestureOutcome::Moved(Proxy { x: 5.0, y: 6.0 }));
        session.enter(&fx.tree, fx.x).unwrap();
        session.hover_affordance(Some(DropKind::Before));

        let outcome = session.release(&mut fx.tree, &fx.registry).unwrap();
        assert_eq!(
            outcome,
            GestureOutcome::Committed {
                source: fx.y,
                target: fx.x,
                kind: DropKind::Before
            }
        );
        assert_eq!(fx.tree.children(fx.tree.root())[0], fx.y);
        assert!(!session.trash_visible());
        assert_eq!(session.proxy(), None);
    }

    #[test]
    fn test_release_without_affordance_cancels() {
        let mut fx = fixture();
        let before = fx.tree.blocks().clone();
        let mut session = DragSession::default();
        start_drag(&mut session, &fx, fx.x);
        session.enter(&fx.tree, fx.group).unwrap();

        assert_eq!(
            session.release(&mut fx.tree, &fx.registry).unwrap(),
            GestureOutcome::Cancelled(fx.x)
        );
        assert_eq!(fx.tree.blocks(), &before);
    }

    #[test]
    fn test_entering_new_candidate_clears_previous() {
        let fx = fixture();
        let mut session = DragSession::default();
        start_drag(&mut session, &fx, fx.x);

        session.enter(&fx.tree, fx.group).unwrap();
        session.hover_affordance(Some(DropKind::Into));
        session.enter(&fx.tree, fx.y).unwrap();

        let (target, offers, active) = session.candidate().unwrap();
        assert_eq!(target, fx.y);
        assert_eq!(offers, &[DropKind::Before, DropKind::After]);
        assert_eq!(active, None);
    }

    #[test]
    fn test_affordance_must_be_offered() {
        let fx = fixture();
        let mut session = DragSession::default();
        start_drag(&mut session, &fx, fx.x);
        session.enter(&fx.tree, fx.y).unwrap();
        assert_eq!(
            session.hover_affordance(Some(DropKind::Left)),
            GestureOutcome::Ignored
        );
        assert_eq!(session.leave(fx.y), GestureOutcome::AffordanceChanged(None));
        assert!(session.candidate().is_none());
    }

    #[test]
    fn test_trash_highlights_and_sinks() {
        let mut fx = fixture();
        let mut session = DragSession::default();
        start_drag(&mut session, &fx, fx.group);

        let trash = fx.tree.trash();
        session.enter(&fx.tree, trash).unwrap();
        assert!(session.trash_highlighted());

        session.release(&mut fx.tree, &fx.registry).unwrap();
        assert!(fx.tree.get(fx.group).is_none());
        assert!(!session.trash_highlighted());
    }

    #[test]
    fn test_cancel_is_idempotent_and_drops_fresh_blocks() {
        let mut fx = fixture();
        let fresh = fx
            .tree
            .create_block(&fx.registry, BASE_BLOCK, &Map::new())
            .unwrap();
        let mut session = DragSession::default();
        assert_eq!(
            session.start_fresh_drag(&fx.tree, fresh),
            GestureOutcome::DragStarted(fresh)
        );
        assert!(session.is_dragging());

        assert_eq!(
            session.cancel(&mut fx.tree).unwrap(),
            GestureOutcome::Cancelled(fresh)
        );
        assert!(fx.tree.get(fresh).is_none());
        assert_eq!(session.cancel(&mut fx.tree).unwrap(), GestureOutcome::Ignored);
        assert!(!session.is_active());
    }
}
