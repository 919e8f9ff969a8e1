//! Sibling position assignment.
//!
//! The store checks sibling uniqueness on every single-row write, so the
//! resolver emits an ordered list of moves in which no intermediate state
//! places two siblings on the same position. Collisions on update are solved
//! with a two-phase swap through [`SENTINEL_POSITION`]; collisions on create
//! are solved with ascending compaction (smallest free position at or after
//! the requested one).

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

use crate::types::{Position, SENTINEL_POSITION};

/// One single-row position write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionMove<Id> {
    pub id: Id,
    pub from: Position,
    pub to: Position,
}

/// Position change requested for an existing sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRequest<Id> {
    pub id: Id,
    pub requested: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingLayout<Id> {
    /// Moves of existing siblings, in the order they must be written.
    pub moves: Vec<PositionMove<Id>>,
    /// Final position of each create, index-aligned with the create requests.
    pub placements: Vec<Position>,
}

/// No free position exists between a create's request and the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionsExhausted {
    pub requested: Position,
}

impl<Id> Default for SiblingLayout<Id> {
    fn default() -> Self {
        Self {
            moves: Vec::new(),
            placements: Vec::new(),
        }
    }
}

impl<Id: Copy + Eq + Hash> SiblingLayout<Id> {
    /// Final position of every moved sibling.
    pub fn final_positions(&self) -> HashMap<Id, Position> {
        let mut finals = HashMap::new();
        for step in &self.moves {
            finals.insert(step.id, step.to);
        }
        finals
    }
}

/// Slot owner inside one parent while the layout is being computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot<Id> {
    Existing(Id),
    Created,
}

/// Computes the position writes for one parent.
///
/// * `survivors` - persisted siblings that outlive this plan, at their stored positions
/// * `updates` - requested positions for existing siblings, in submission order
/// * `creates` - requested positions for new siblings, in submission order
///
/// Updates are resolved before creates, so a new sibling never displaces an
/// existing one. A request for a sibling's stored position means "stay" and
/// never displaces anyone. When two moves ask for the same position the later
/// one wins and the earlier one is swapped back out.
pub fn resolve_siblings<Id>(
    survivors: &[(Id, Position)],
    updates: &[MoveRequest<Id>],
    creates: &[Position],
) -> Result<SiblingLayout<Id>, PositionsExhausted>
where
    Id: Copy + Eq + Hash + Debug,
{
    let mut slots: BTreeMap<Position, Slot<Id>> = BTreeMap::new();
    let mut current: HashMap<Id, Position> = HashMap::with_capacity(survivors.len());
    for (id, position) in survivors {
        slots.insert(*position, Slot::Existing(*id));
        current.insert(*id, *position);
    }
    let stored = current.clone();

    let mut layout = SiblingLayout {
        moves: Vec::new(),
        placements: Vec::with_capacity(creates.len()),
    };

    for request in updates {
        let Some(&from) = current.get(&request.id) else {
            debug_assert!(false, "move requested for unknown sibling {:?}", request.id);
            continue;
        };
        let to = request.requested;
        if from == to || stored.get(&request.id) == Some(&to) {
            continue;
        }

        match slots.get(&to).copied() {
            Some(Slot::Existing(displaced)) => {
                layout.moves.push(PositionMove {
                    id: displaced,
                    from: to,
                    to: SENTINEL_POSITION,
                });
                layout.moves.push(PositionMove {
                    id: request.id,
                    from,
                    to,
                });
                layout.moves.push(PositionMove {
                    id: displaced,
                    from: SENTINEL_POSITION,
                    to: from,
                });
                slots.insert(from, Slot::Existing(displaced));
                slots.insert(to, Slot::Existing(request.id));
                current.insert(displaced, from);
                current.insert(request.id, to);
            }
            Some(Slot::Created) => {
                unreachable!("creates are placed after every update");
            }
            None => {
                layout.moves.push(PositionMove {
                    id: request.id,
                    from,
                    to,
                });
                slots.remove(&from);
                slots.insert(to, Slot::Existing(request.id));
                current.insert(request.id, to);
            }
        }
    }

    for &requested in creates {
        let position =
            first_free_at_or_after(&slots, requested).ok_or(PositionsExhausted { requested })?;
        slots.insert(position, Slot::Created);
        layout.placements.push(position);
    }

    Ok(layout)
}

/// Smallest unowned position in `requested..SENTINEL_POSITION`.
fn first_free_at_or_after<Id>(
    slots: &BTreeMap<Position, Slot<Id>>,
    requested: Position,
) -> Option<Position> {
    let mut candidate = requested;
    for (&taken, _) in slots.range(requested..SENTINEL_POSITION) {
        if taken != candidate {
            break;
        }
        candidate += 1;
    }
    (candidate < SENTINEL_POSITION).then_some(candidate)
}
