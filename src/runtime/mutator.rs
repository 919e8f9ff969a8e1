//! One transaction attempt of a course tree sync.
//!
//! The attempt resolves the course row, plans the tree against what the
//! transaction reads, and executes the plan in a fixed order: deletes, module
//! field updates, module moves, module creates, then the same three steps for
//! every module's lessons, and finally the duration aggregates. Any error
//! rolls the whole transaction back.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{AttemptError, SyncError, TransientFailure, ValidationError};
use crate::plan::{
    plan_tree, resolve_siblings, slugify, LessonCreate, LessonPlan, MoveRequest, PlanSummary,
    PositionMove, PositionsExhausted, TreePlan,
};
use crate::storage::{CourseStore, StoreTransaction};
use crate::types::{
    Course, CourseDetails, CourseId, CoursePatch, EntityKind, Lesson, LessonId, MediaRef, Module,
    ModuleId, ModuleNode, ModuleSubmission, NewCourse, NewLesson, NewModule, Position,
};

use super::cascade::CascadeLog;
use super::duration::refresh_durations;

/// Rows handled per step. A batch boundary is where the attempt deadline is
/// checked; batches never split the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub modules: usize,
    pub lessons: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            modules: 5,
            lessons: 10,
        }
    }
}

/// Wall-clock budget of a single attempt.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AttemptDeadline {
    started: Instant,
    budget: Duration,
}

impl AttemptDeadline {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn check(&self) -> Result<(), AttemptError> {
        if self.started.elapsed() > self.budget {
            return Err(AttemptError::Transient(TransientFailure::Timeout(
                self.budget,
            )));
        }
        Ok(())
    }
}

/// Course-level half of a sync request.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CourseTarget<'r> {
    Create(&'r CourseDetails),
    Update { id: CourseId, patch: &'r CoursePatch },
}

/// Result of a committed attempt.
#[derive(Debug)]
pub(crate) struct AttemptOutput {
    pub course: Course,
    /// Slug the course had before this attempt renamed it.
    pub previous_slug: Option<String>,
    pub summary: PlanSummary,
    pub references_cleared: usize,
    pub orphaned_media: Vec<MediaRef>,
}

/// Runs one attempt in a fresh transaction and commits it.
pub(crate) fn run_attempt(
    store: &dyn CourseStore,
    target: CourseTarget<'_>,
    modules: &[ModuleSubmission],
    limits: BatchLimits,
    budget: Duration,
) -> Result<AttemptOutput, AttemptError> {
    let deadline = AttemptDeadline::start(budget);
    let mut txn = store.begin()?;

    let result = TreeMutator::new(txn.as_mut(), limits, deadline)
        .execute(target, modules)
        .and_then(|output| deadline.check().map(|()| output));

    match result {
        Ok(output) => {
            txn.commit()?;
            Ok(output)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback() {
                tracing::warn!(%rollback_err, "Rollback after failed attempt also failed");
            }
            Err(err)
        }
    }
}

struct TreeMutator<'t> {
    txn: &'t mut dyn StoreTransaction,
    limits: BatchLimits,
    deadline: AttemptDeadline,
    cascade: CascadeLog,
}

impl<'t> TreeMutator<'t> {
    fn new(
        txn: &'t mut dyn StoreTransaction,
        limits: BatchLimits,
        deadline: AttemptDeadline,
    ) -> Self {
        Self {
            txn,
            limits,
            deadline,
            cascade: CascadeLog::default(),
        }
    }

    fn checkpoint(&self, phase: &'static str, batch: usize) -> Result<(), AttemptError> {
        tracing::debug!(phase, batch, "Sync batch");
        self.deadline.check()
    }

    fn execute(
        mut self,
        target: CourseTarget<'_>,
        modules: &[ModuleSubmission],
    ) -> Result<AttemptOutput, AttemptError> {
        let (mut course, previous_slug) = match target {
            CourseTarget::Create(details) => (self.create_course(details)?, None),
            CourseTarget::Update { id, patch } => self.patch_course(id, patch)?,
        };

        let persisted = self.persisted_nodes(course.id)?;
        let plan = match plan_tree(course.id, &persisted, modules) {
            Ok(plan) => plan,
            Err(err) => return Err(self.refine(err)?),
        };
        let summary = plan.summary();
        tracing::debug!(course = %course.id, ?summary, "Planned course tree");

        self.apply_deletes(&plan)?;
        let created = self.apply_modules(&plan, course.id)?;
        self.apply_lessons(&plan, &created)?;

        refresh_durations(self.txn, &mut course)?;

        let references_cleared = self.cascade.references_cleared;
        let orphaned_media = self.cascade.into_orphaned_media(&*self.txn)?;
        Ok(AttemptOutput {
            course,
            previous_slug,
            summary,
            references_cleared,
            orphaned_media,
        })
    }

    fn create_course(&mut self, details: &CourseDetails) -> Result<Course, AttemptError> {
        if details.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle {
                entity: EntityKind::Course,
            }
            .into());
        }
        let slug = slugify(details.slug.as_deref().unwrap_or(&details.title))?;
        if self.txn.course_by_slug(&slug)?.is_some() {
            return Err(SyncError::SlugConflict { slug }.into());
        }

        let course = self.txn.insert_course(NewCourse {
            slug,
            title: details.title.clone(),
            owner: details.owner,
            published: details.published,
        })?;
        tracing::debug!(course = %course.id, slug = %course.slug, "Inserted course");
        Ok(course)
    }

    fn patch_course(
        &mut self,
        id: CourseId,
        patch: &CoursePatch,
    ) -> Result<(Course, Option<String>), AttemptError> {
        let stored = self
            .txn
            .course(id)?
            .ok_or_else(|| SyncError::not_found(EntityKind::Course, id.get()))?;

        let mut course = stored.clone();
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(ValidationError::EmptyTitle {
                    entity: EntityKind::Course,
                }
                .into());
            }
            course.title = title.clone();
        }
        if let Some(published) = patch.published {
            course.published = published;
        }

        let mut previous_slug = None;
        if let Some(requested) = &patch.slug {
            let slug = slugify(requested)?;
            if slug != stored.slug {
                if self.txn.course_by_slug(&slug)?.is_some() {
                    return Err(SyncError::SlugConflict { slug }.into());
                }
                course.slug = slug;
                previous_slug = Some(stored.slug.clone());
            }
        }

        if course != stored {
            self.txn.update_course(&course)?;
        }
        Ok((course, previous_slug))
    }

    fn persisted_nodes(&self, course: CourseId) -> Result<Vec<ModuleNode>, AttemptError> {
        let mut nodes = Vec::new();
        for module in self.txn.modules_of(course)? {
            let lessons = self.txn.lessons_of(module.id)?;
            nodes.push(ModuleNode { module, lessons });
        }
        Ok(nodes)
    }

    /// Identities unknown to the whole store are reported as not found rather
    /// than as misplaced.
    fn refine(&self, err: ValidationError) -> Result<AttemptError, AttemptError> {
        let missing = match &err {
            ValidationError::ForeignModule { module, .. } if self.txn.module(*module)?.is_none() => {
                Some(SyncError::not_found(EntityKind::Module, module.get()))
            }
            ValidationError::ForeignLesson { lesson, .. } if self.txn.lesson(*lesson)?.is_none() => {
                Some(SyncError::not_found(EntityKind::Lesson, lesson.get()))
            }
            _ => None,
        };
        Ok(AttemptError::Fatal(
            missing.unwrap_or_else(|| SyncError::Validation(err)),
        ))
    }

    fn delete_lesson(&mut self, lesson: &Lesson) -> Result<(), AttemptError> {
        self.cascade.before_lesson_delete(self.txn, lesson)?;
        self.txn.delete_lesson(lesson.id)?;
        Ok(())
    }

    fn apply_deletes(&mut self, plan: &TreePlan) -> Result<(), AttemptError> {
        for (batch, deletes) in plan.to_delete.chunks(self.limits.modules).enumerate() {
            self.checkpoint("module deletes", batch)?;
            for delete in deletes {
                for lesson in &delete.lessons {
                    self.delete_lesson(lesson)?;
                }
                self.cascade.before_module_delete(self.txn, &delete.module)?;
                self.txn.delete_module(delete.module.id)?;
            }
        }

        for update in &plan.to_update {
            let doomed = &update.lessons.to_delete;
            for (batch, lessons) in doomed.chunks(self.limits.lessons).enumerate() {
                self.checkpoint("lesson deletes", batch)?;
                for lesson in lessons {
                    self.delete_lesson(lesson)?;
                }
            }
        }
        Ok(())
    }

    /// Applies module renames, moves and creates. Returns the ids of the
    /// created modules, in `plan.to_create` order.
    fn apply_modules(
        &mut self,
        plan: &TreePlan,
        course_id: CourseId,
    ) -> Result<Vec<ModuleId>, AttemptError> {
        let mut rows: HashMap<ModuleId, Module> = plan
            .to_update
            .iter()
            .map(|update| (update.current.id, update.current.clone()))
            .collect();

        let renames: Vec<_> = plan
            .to_update
            .iter()
            .filter(|update| update.changes_title())
            .collect();
        for (batch, updates) in renames.chunks(self.limits.modules).enumerate() {
            self.checkpoint("module updates", batch)?;
            for update in updates {
                let row = row_mut(&mut rows, update.current.id)?;
                row.title = update.title.clone();
                self.txn.update_module(row)?;
            }
        }

        let survivors: Vec<_> = plan
            .to_update
            .iter()
            .map(|update| (update.current.id, update.current.position))
            .collect();
        let requests: Vec<_> = plan
            .to_update
            .iter()
            .map(|update| MoveRequest {
                id: update.current.id,
                requested: update.requested_position,
            })
            .collect();
        let creates: Vec<Position> = plan
            .to_create
            .iter()
            .map(|create| create.requested_position)
            .collect();
        let layout = resolve_siblings(&survivors, &requests, &creates)
            .map_err(|full| exhausted(EntityKind::Module, full))?;

        for (batch, moves) in layout.moves.chunks(self.limits.modules).enumerate() {
            self.checkpoint("module moves", batch)?;
            for step in moves {
                let row = row_mut(&mut rows, step.id)?;
                debug_assert_eq!(row.position, step.from);
                row.position = step.to;
                self.txn.update_module(row)?;
            }
        }

        let mut created = Vec::with_capacity(plan.to_create.len());
        let placed: Vec<_> = plan.to_create.iter().zip(layout.placements).collect();
        for (batch, chunk) in placed.chunks(self.limits.modules).enumerate() {
            self.checkpoint("module creates", batch)?;
            for (create, position) in chunk {
                let module = self.txn.insert_module(NewModule {
                    course_id,
                    title: create.title.clone(),
                    position: *position,
                })?;
                created.push(module.id);
            }
        }

        Ok(created)
    }

    fn apply_lessons(&mut self, plan: &TreePlan, created: &[ModuleId]) -> Result<(), AttemptError> {
        for update in &plan.to_update {
            self.apply_lesson_plan(update.current.id, &update.lessons)?;
        }

        for (module_id, create) in created.iter().zip(&plan.to_create) {
            let positions: Vec<Position> = create
                .lessons
                .iter()
                .map(|lesson| lesson.requested_position)
                .collect();
            let layout = resolve_siblings::<LessonId>(&[], &[], &positions)
                .map_err(|full| exhausted(EntityKind::Lesson, full))?;
            self.insert_lessons(*module_id, &create.lessons, &layout.placements)?;
        }
        Ok(())
    }

    fn apply_lesson_plan(&mut self, module_id: ModuleId, plan: &LessonPlan) -> Result<(), AttemptError> {
        let mut rows: HashMap<LessonId, Lesson> = HashMap::with_capacity(plan.to_update.len());
        let changed: Vec<_> = plan
            .to_update
            .iter()
            .filter(|update| update.changes_fields())
            .collect();
        for (batch, updates) in changed.chunks(self.limits.lessons).enumerate() {
            self.checkpoint("lesson updates", batch)?;
            for update in updates {
                let row = update.patched_row();
                self.txn.update_lesson(&row)?;
                if let Some(media) = update.replaced_media() {
                    self.cascade.media_replaced(media);
                }
                rows.insert(row.id, row);
            }
        }
        for update in &plan.to_update {
            rows.entry(update.current.id)
                .or_insert_with(|| update.current.clone());
        }

        let survivors: Vec<_> = plan
            .to_update
            .iter()
            .map(|update| (update.current.id, update.current.position))
            .collect();
        let requests: Vec<_> = plan
            .to_update
            .iter()
            .map(|update| MoveRequest {
                id: update.current.id,
                requested: update.requested_position,
            })
            .collect();
        let creates: Vec<Position> = plan
            .to_create
            .iter()
            .map(|create| create.requested_position)
            .collect();
        let layout = resolve_siblings(&survivors, &requests, &creates)
            .map_err(|full| exhausted(EntityKind::Lesson, full))?;

        self.move_lessons(&mut rows, &layout.moves)?;
        self.insert_lessons(module_id, &plan.to_create, &layout.placements)
    }

    fn move_lessons(
        &mut self,
        rows: &mut HashMap<LessonId, Lesson>,
        moves: &[PositionMove<LessonId>],
    ) -> Result<(), AttemptError> {
        for (batch, chunk) in moves.chunks(self.limits.lessons).enumerate() {
            self.checkpoint("lesson moves", batch)?;
            for step in chunk {
                let row = rows
                    .get_mut(&step.id)
                    .ok_or_else(|| SyncError::not_found(EntityKind::Lesson, step.id.get()))?;
                debug_assert_eq!(row.position, step.from);
                row.position = step.to;
                self.txn.update_lesson(row)?;
            }
        }
        Ok(())
    }

    fn insert_lessons(
        &mut self,
        module_id: ModuleId,
        lessons: &[LessonCreate],
        placements: &[Position],
    ) -> Result<(), AttemptError> {
        let placed: Vec<_> = lessons.iter().zip(placements).collect();
        for (batch, chunk) in placed.chunks(self.limits.lessons).enumerate() {
            self.checkpoint("lesson creates", batch)?;
            for (lesson, position) in chunk {
                self.txn.insert_lesson(NewLesson {
                    module_id,
                    title: lesson.title.clone(),
                    position: **position,
                    duration: lesson.duration,
                    content: lesson.content.clone(),
                })?;
            }
        }
        Ok(())
    }
}

fn exhausted(entity: EntityKind, full: PositionsExhausted) -> ValidationError {
    ValidationError::PositionsExhausted {
        entity,
        requested: full.requested,
    }
}

fn row_mut(rows: &mut HashMap<ModuleId, Module>, id: ModuleId) -> Result<&mut Module, AttemptError> {
    rows.get_mut(&id)
        .ok_or_else(|| SyncError::not_found(EntityKind::Module, id.get()).into())
}
