use super::plan::Side;
use crate::error::InvariantError;
use crate::model::{PathHistory, PathNode};

/// How a divergent entry is reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Rename (or delete) the loser to match the winner.
    Move {
        /// Winning side.
        from: Side,
    },
    /// The loser is a tombstone, so there is nothing to rename: copy the
    /// winner over.
    Copy {
        /// Winning side.
        from: Side,
    },
}

impl Resolution {
    /// Winning side.
    #[must_use]
    pub const fn winner(self) -> Side {
        match self {
            Self::Move { from } | Self::Copy { from } => from,
        }
    }
}

/// Picks the winning side of two histories that diverge at `divergence`.
///
/// In priority order:
/// 1. a side that has not changed since the common point loses;
/// 2. a deleted side loses to a live one;
/// 3. otherwise the longer relative path wins, ties going to A.
///
/// `a_path_len` and `b_path_len` are the lengths of each side's current
/// relative path.
///
/// # Errors
///
/// Fails if a history is empty or a parentless tail is not a tombstone.
pub fn resolve_difference(
    a: &PathHistory,
    b: &PathHistory,
    divergence: usize,
    a_path_len: usize,
    b_path_len: usize,
) -> Result<Resolution, InvariantError> {
    let a_tail = a.current().ok_or_else(empty_history)?;
    let b_tail = b.current().ok_or_else(empty_history)?;

    let winner = if a.len() == divergence {
        Side::B
    } else if b.len() == divergence || b_tail.parent.is_none() {
        check_tombstone(b_tail)?;
        Side::A
    } else if a_tail.parent.is_none() {
        check_tombstone(a_tail)?;
        Side::B
    } else if b_path_len > a_path_len {
        Side::B
    } else {
        Side::A
    };

    let loser_tail = match winner {
        Side::A => b_tail,
        Side::B => a_tail,
    };
    Ok(if loser_tail.is_tombstone() {
        Resolution::Copy { from: winner }
    } else {
        Resolution::Move { from: winner }
    })
}

fn check_tombstone(node: &PathNode) -> Result<(), InvariantError> {
    if node.parent.is_none() && !node.is_tombstone() {
        return Err(InvariantError::MalformedTombstone {
            name: node.name.clone(),
        });
    }
    Ok(())
}

fn empty_history() -> InvariantError {
    InvariantError::EmptyHistory {
        id: crate::fingerprint::Fingerprint::ZERO,
    }
}
