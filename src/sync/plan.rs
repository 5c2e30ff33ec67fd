use crate::fingerprint::Fingerprint;
use crate::model::EntryKind;
use std::collections::BTreeMap;
use std::fmt;

/// One side of a reconciliation pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// First instance.
    A,
    /// Second instance.
    B,
}

impl Side {
    /// The opposite side.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// A filesystem mutation plus the bookkeeping that goes with it.
///
/// Copies and moves name their source side; the destination is always the
/// other side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Copy a file's bytes and record into the other instance.
    CopyResource {
        /// File id.
        id: Fingerprint,
        /// Side holding the source.
        from: Side,
    },
    /// Create a directory and copy its record into the other instance.
    CopyDirectory {
        /// Directory id.
        id: Fingerprint,
        /// Side holding the source.
        from: Side,
    },
    /// Make the other side's entry match `from`: rename it to `from`'s
    /// location, or delete it when `from` is a tombstone. Then adopt the
    /// history tail starting at `start`.
    MoveOrDelete {
        /// Table the entry lives in.
        kind: EntryKind,
        /// Entry id.
        id: Fingerprint,
        /// Winning side.
        from: Side,
        /// Divergence index.
        start: usize,
    },
    /// Move an entry parked under a collision name back to its intended name
    /// if that has become free.
    RetryRename {
        /// Table the entry lives in.
        kind: EntryKind,
        /// Entry id.
        id: Fingerprint,
        /// Side the entry was parked on.
        on: Side,
        /// Intended name.
        name: String,
    },
}

impl Action {
    /// Short label for logs and reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::CopyResource { .. } => "copy",
            Self::CopyDirectory { .. } => "mkdir",
            Self::MoveOrDelete { .. } => "move",
            Self::RetryRename { .. } => "retry-rename",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CopyResource { id, from } | Self::CopyDirectory { id, from } => {
                write!(f, "{} {id} from {from:?}", self.label())
            }
            Self::MoveOrDelete {
                kind,
                id,
                from,
                start,
            } => write!(
                f,
                "{} {} {id} from {from:?} at {start}",
                self.label(),
                kind.as_str()
            ),
            Self::RetryRename { kind, id, on, name } => write!(
                f,
                "{} {} {id} on {on:?} to {name}",
                self.label(),
                kind.as_str()
            ),
        }
    }
}

/// Depth-bucketed action plan.
///
/// Non-negative buckets run first in ascending order, so parents exist before
/// their children are placed. Negative buckets hold deletions and rename
/// retries and run afterwards, most negative first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    buckets: BTreeMap<i32, Vec<Action>>,
}

impl Plan {
    /// Empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules an action at `depth`.
    pub fn push(&mut self, depth: i32, action: Action) {
        self.buckets.entry(depth).or_default().push(action);
    }

    /// Whether nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total number of scheduled actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Deepest non-negative bucket.
    #[must_use]
    pub fn max_depth(&self) -> Option<i32> {
        self.buckets.range(0..).next_back().map(|(depth, _)| *depth)
    }

    /// Bucket keys in execution order.
    #[must_use]
    pub fn schedule_order(&self) -> Vec<i32> {
        let non_negative = self.buckets.range(0..).map(|(depth, _)| *depth);
        let negative = self.buckets.range(..0).map(|(depth, _)| *depth);
        non_negative.chain(negative).collect()
    }

    /// Removes and returns the bucket that runs next.
    pub fn pop_next(&mut self) -> Option<(i32, Vec<Action>)> {
        let depth = self
            .buckets
            .range(0..)
            .next()
            .or_else(|| self.buckets.iter().next())
            .map(|(depth, _)| *depth)?;
        self.buckets.remove_entry(&depth)
    }

    /// Every scheduled action with its depth, in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &Action)> {
        let non_negative = self.buckets.range(0..);
        let negative = self.buckets.range(..0);
        non_negative
            .chain(negative)
            .flat_map(|(depth, actions)| actions.iter().map(move |action| (*depth, action)))
    }
}
