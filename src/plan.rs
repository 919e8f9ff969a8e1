//! Pure planning stages: tree diffing, sibling positions and slug rules.
//!
//! Nothing here touches the store. The mutator feeds persisted rows in and
//! executes the resulting plan inside a transaction.

pub mod diff;
pub mod position;
pub mod slug;

pub use diff::{
    plan_tree, LessonCreate, LessonPlan, LessonUpdate, ModuleCreate, ModuleDelete, ModuleUpdate,
    PlanSummary, TreePlan,
};
pub use position::{resolve_siblings, MoveRequest, PositionMove, PositionsExhausted, SiblingLayout};
pub use slug::slugify;
