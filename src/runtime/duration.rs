//! Aggregate duration recomputation, run after every lesson write of an attempt.

use crate::error::{AttemptError, ValidationError};
use crate::storage::StoreTransaction;
use crate::types::{Course, EntityKind, Seconds};

/// Number of rows whose aggregate was rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DurationRefresh {
    pub modules_rewritten: usize,
    pub course_rewritten: bool,
}

fn checked_sum(
    durations: impl IntoIterator<Item = Seconds>,
    entity: EntityKind,
) -> Result<Seconds, ValidationError> {
    durations
        .into_iter()
        .try_fold(0u64, |total, value| total.checked_add(value))
        .ok_or(ValidationError::DurationOverflow { entity })
}

/// Recomputes `module.duration` for every module of `course`, then
/// `course.total_duration`, writing only the values that changed.
///
/// `course` is updated in place so the caller holds the committed row.
pub(crate) fn refresh_durations(
    txn: &mut dyn StoreTransaction,
    course: &mut Course,
) -> Result<DurationRefresh, AttemptError> {
    let mut refresh = DurationRefresh::default();
    let mut module_totals = Vec::new();

    for mut module in txn.modules_of(course.id)? {
        let lessons = txn.lessons_of(module.id)?;
        let total = checked_sum(
            lessons.iter().map(|lesson| lesson.duration),
            EntityKind::Module,
        )?;
        if module.duration != total {
            module.duration = total;
            txn.update_module(&module)?;
            refresh.modules_rewritten += 1;
        }
        module_totals.push(total);
    }

    let course_total = checked_sum(module_totals, EntityKind::Course)?;
    if course.total_duration != course_total {
        tracing::debug!(
            course = %course.id,
            previous = course.total_duration,
            total = course_total,
            "Course duration changed"
        );
        course.total_duration = course_total;
        txn.update_course(course)?;
        refresh.course_rewritten = true;
    }

    Ok(refresh)
}
