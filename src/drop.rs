//! Drop offers and drop commits.
//!
//! [`offered_drop_kinds`] answers which attachments are legal for a dragged
//! source over a hovered target; [`commit_drop`] performs one of them as a
//! single detach-then-attach mutation.

use crate::block::BlockKind;
use crate::error::{ReceipeError, Result};
use crate::registry::{TypeRegistry, BRANCH};
use crate::tree::{Position, Tree};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// How a dragged block would attach to a hovered target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropKind {
    /// Become the first child of an empty container, or hand a file to a block
    Into,
    /// Sibling before the target in its list
    Before,
    /// Sibling after the target in its list
    After,
    /// New branch left of the target branch
    Left,
    /// New branch right of the target branch
    Right,
    /// Discard into the trash
    Sink,
}

impl fmt::Display for DropKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DropKind::Into => "into",
            DropKind::Before => "before",
            DropKind::After => "after",
            DropKind::Left => "left",
            DropKind::Right => "right",
            DropKind::Sink => "sink",
        };
        write!(f, "{}", name)
    }
}

/// Drop kinds legal for dropping `source` onto `target`
pub fn offered_drop_kinds(tree: &Tree, target: Ulid, source: Ulid) -> Result<Vec<DropKind>> {
    let tgt = tree.block(target)?;
    let src = tree.block(source)?;

    if target == tree.trash() {
        return Ok(vec![DropKind::Sink]);
    }
    if !src.movable {
        return Ok(Vec::new());
    }
    if let BlockKind::File { filename } = &src.kind {
        return Ok(if tgt.accepts_file(filename) {
            vec![DropKind::Into]
        } else {
            Vec::new()
        });
    }
    // nothing may land inside its own subtree; hovering itself still allows reorders
    if target != source && tree.is_ancestor(source, target) {
        return Ok(Vec::new());
    }

    let mut kinds = Vec::new();

    if target != source && tgt.children().is_empty() {
        let into = match tgt.kind {
            BlockKind::List { .. } => tree.check_insert(target, source, Position::Head).is_ok(),
            BlockKind::Split { .. } => {
                src.type_name != BRANCH && tree.admits(tgt, &src.type_name)
            }
            _ => false,
        };
        if into {
            kinds.push(DropKind::Into);
        }
    }

    if let Some(parent_id) = tgt.parent {
        let parent = tree.block(parent_id)?;
        match parent.kind {
            BlockKind::List { .. } => {
                if tree
                    .check_insert(parent_id, source, Position::Before(target))
                    .is_ok()
                {
                    kinds.extend([DropKind::Before, DropKind::After]);
                }
            }
            BlockKind::Split { singular, .. } => {
                if !singular && tree.admits(parent, &src.type_name) {
                    kinds.extend([DropKind::Left, DropKind::Right]);
                }
            }
            _ => {}
        }
    }

    Ok(kinds)
}

/// Perform an offered drop.
///
/// The offer is recomputed first, so a stale or forged kind is rejected
/// with `DropNotOffered` and the tree is left unchanged.
pub fn commit_drop(
    tree: &mut Tree,
    registry: &TypeRegistry,
    source: Ulid,
    target: Ulid,
    kind: DropKind,
) -> Result<()> {
    if !offered_drop_kinds(tree, target, source)?.contains(&kind) {
        tracing::warn!("Rejected drop {} of {} onto {}", kind, source, target);
        return Err(ReceipeError::DropNotOffered {
            source_id: source,
            target,
            kind,
        });
    }

    match kind {
        DropKind::Sink => {
            tree.delete(source)?;
        }
        DropKind::Into => {
            let file = match &tree.block(source)?.kind {
                BlockKind::File { filename } => Some(filename.clone()),
                _ => None,
            };
            let into_split = matches!(tree.block(target)?.kind, BlockKind::Split { .. });
            if let Some(filename) = file {
                tree.set_file(target, &filename)?;
                tree.delete(source)?;
            } else if into_split {
                wrap_in_branch(tree, registry, target, source, Position::Head)?;
            } else {
                tree.insert(target, source, Position::Head)?;
            }
        }
        DropKind::Before | DropKind::After => {
            let parent = tree
                .block(target)?
                .parent
                .ok_or(ReceipeError::NotAContainer(target))?;
            let position = if kind == DropKind::Before {
                Position::Before(target)
            } else {
                Position::After(target)
            };
            tree.insert(parent, source, position)?;
        }
        DropKind::Left | DropKind::Right => {
            let split = tree
                .block(target)?
                .parent
                .ok_or(ReceipeError::NotAContainer(target))?;
            let position = if kind == DropKind::Left {
                Position::Before(target)
            } else {
                Position::After(target)
            };
            wrap_in_branch(tree, registry, split, source, position)?;
        }
    }

    tracing::debug!("Dropped {} {} {}", source, kind, target);
    Ok(())
}

/// Place `source` alone in a new branch of `split`
fn wrap_in_branch(
    tree: &mut Tree,
    registry: &TypeRegistry,
    split: Ulid,
    source: Ulid,
    position: Position,
) -> Result<()> {
    let branch = tree.create_branch(registry, Vec::new())?;
    let placed = tree
        .insert(split, branch, position)
        .and_then(|_| tree.insert(branch, source, Position::Tail));
    if let Err(err) = placed {
        tree.delete(branch)?;
        return Err(err);
    }
    Ok(())
}
