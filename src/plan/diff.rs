use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{
    CourseId, EntityKind, Lesson, LessonContent, LessonId, LessonSubmission, MediaRef, Module,
    ModuleId, ModuleNode, ModuleSubmission, Position, Seconds, SENTINEL_POSITION,
};

/// Operation plan for one course, produced by [`plan_tree`].
#[derive(Debug, Clone, Default)]
pub struct TreePlan {
    pub to_create: Vec<ModuleCreate>,
    pub to_update: Vec<ModuleUpdate>,
    pub to_delete: Vec<ModuleDelete>,
}

#[derive(Debug, Clone)]
pub struct ModuleCreate {
    pub title: String,
    pub requested_position: Position,
    pub lessons: Vec<LessonCreate>,
}

/// A persisted module that is still submitted. May carry no field change at
/// all, in which case only its lesson plan matters.
#[derive(Debug, Clone)]
pub struct ModuleUpdate {
    pub current: Module,
    pub title: String,
    pub requested_position: Position,
    pub lessons: LessonPlan,
}

impl ModuleUpdate {
    pub fn changes_title(&self) -> bool {
        self.current.title != self.title
    }

    pub fn moves(&self) -> bool {
        self.current.position != self.requested_position
    }

    pub fn is_effective(&self) -> bool {
        self.changes_title() || self.moves()
    }
}

#[derive(Debug, Clone)]
pub struct ModuleDelete {
    pub module: Module,
    /// Lessons removed together with the module.
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Default)]
pub struct LessonPlan {
    pub to_create: Vec<LessonCreate>,
    pub to_update: Vec<LessonUpdate>,
    pub to_delete: Vec<Lesson>,
}

#[derive(Debug, Clone)]
pub struct LessonCreate {
    pub title: String,
    pub requested_position: Position,
    pub duration: Seconds,
    pub content: LessonContent,
}

#[derive(Debug, Clone)]
pub struct LessonUpdate {
    pub current: Lesson,
    pub title: String,
    pub requested_position: Position,
    pub duration: Seconds,
    pub content: LessonContent,
}

impl LessonUpdate {
    /// Title, duration or content differ from the stored row.
    pub fn changes_fields(&self) -> bool {
        self.current.title != self.title
            || self.current.duration != self.duration
            || self.current.content != self.content
    }

    pub fn moves(&self) -> bool {
        self.current.position != self.requested_position
    }

    pub fn is_effective(&self) -> bool {
        self.changes_fields() || self.moves()
    }

    /// Media of the stored row that the new content no longer uses.
    pub fn replaced_media(&self) -> Option<MediaRef> {
        let previous = self.current.content.media()?;
        if self.content.media().as_ref() == Some(&previous) {
            None
        } else {
            Some(previous)
        }
    }

    /// Stored row with the submitted fields applied, position untouched.
    pub fn patched_row(&self) -> Lesson {
        Lesson {
            title: self.title.clone(),
            duration: self.duration,
            content: self.content.clone(),
            ..self.current.clone()
        }
    }
}

/// Counts of the writes a plan will actually perform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub module_creates: usize,
    pub module_updates: usize,
    pub module_deletes: usize,
    pub lesson_creates: usize,
    pub lesson_updates: usize,
    pub lesson_deletes: usize,
}

impl PlanSummary {
    pub fn total(&self) -> usize {
        self.module_creates
            + self.module_updates
            + self.module_deletes
            + self.lesson_creates
            + self.lesson_updates
            + self.lesson_deletes
    }

    pub fn is_noop(&self) -> bool {
        self.total() == 0
    }
}

impl TreePlan {
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            module_creates: self.to_create.len(),
            module_deletes: self.to_delete.len(),
            ..PlanSummary::default()
        };

        for create in &self.to_create {
            summary.lesson_creates += create.lessons.len();
        }
        for delete in &self.to_delete {
            summary.lesson_deletes += delete.lessons.len();
        }
        for update in &self.to_update {
            if update.is_effective() {
                summary.module_updates += 1;
            }
            let lessons = &update.lessons;
            summary.lesson_creates += lessons.to_create.len();
            summary.lesson_deletes += lessons.to_delete.len();
            summary.lesson_updates += lessons
                .to_update
                .iter()
                .filter(|lesson| lesson.is_effective())
                .count();
        }

        summary
    }
}

/// Classifies every submitted module and lesson against the persisted tree.
///
/// `persisted` must hold every module currently stored under `course_id`
/// together with all of its lessons.
pub fn plan_tree(
    course_id: CourseId,
    persisted: &[ModuleNode],
    submitted: &[ModuleSubmission],
) -> Result<TreePlan, ValidationError> {
    let persisted_by_id: HashMap<ModuleId, &ModuleNode> = persisted
        .iter()
        .map(|node| (node.module.id, node))
        .collect();

    let mut plan = TreePlan::default();
    let mut seen_modules: HashSet<ModuleId> = HashSet::with_capacity(submitted.len());
    let mut seen_lessons: HashSet<LessonId> = HashSet::new();

    for submission in submitted {
        check_title(&submission.title, EntityKind::Module)?;
        check_position(submission.position, EntityKind::Module)?;

        let Some(module_id) = submission.id else {
            let lessons = submission
                .lessons
                .iter()
                .map(|lesson| {
                    if let Some(lesson_id) = lesson.id {
                        return Err(ValidationError::ForeignLesson {
                            lesson: lesson_id,
                            parent: None,
                        });
                    }
                    check_lesson(lesson)?;
                    Ok(lesson_create(lesson))
                })
                .collect::<Result<Vec<_>, _>>()?;

            plan.to_create.push(ModuleCreate {
                title: submission.title.clone(),
                requested_position: submission.position,
                lessons,
            });
            continue;
        };

        if !seen_modules.insert(module_id) {
            return Err(ValidationError::DuplicateModule(module_id));
        }

        let node = persisted_by_id
            .get(&module_id)
            .ok_or(ValidationError::ForeignModule {
                module: module_id,
                course: course_id,
            })?;

        let lessons = plan_lessons(node, &submission.lessons, &mut seen_lessons)?;
        plan.to_update.push(ModuleUpdate {
            current: node.module.clone(),
            title: submission.title.clone(),
            requested_position: submission.position,
            lessons,
        });
    }

    plan.to_delete = persisted
        .iter()
        .filter(|node| !seen_modules.contains(&node.module.id))
        .map(|node| ModuleDelete {
            module: node.module.clone(),
            lessons: node.lessons.clone(),
        })
        .collect();

    Ok(plan)
}

fn plan_lessons(
    node: &ModuleNode,
    submitted: &[LessonSubmission],
    seen: &mut HashSet<LessonId>,
) -> Result<LessonPlan, ValidationError> {
    let persisted_by_id: HashMap<LessonId, &Lesson> = node
        .lessons
        .iter()
        .map(|lesson| (lesson.id, lesson))
        .collect();

    let mut plan = LessonPlan::default();
    let mut kept: HashSet<LessonId> = HashSet::with_capacity(submitted.len());

    for submission in submitted {
        check_lesson(submission)?;

        let Some(lesson_id) = submission.id else {
            plan.to_create.push(lesson_create(submission));
            continue;
        };

        if !seen.insert(lesson_id) {
            return Err(ValidationError::DuplicateLesson(lesson_id));
        }

        let current = persisted_by_id
            .get(&lesson_id)
            .ok_or(ValidationError::ForeignLesson {
                lesson: lesson_id,
                parent: Some(node.module.id),
            })?;
        kept.insert(lesson_id);

        plan.to_update.push(LessonUpdate {
            current: (*current).clone(),
            title: submission.title.clone(),
            requested_position: submission.position,
            duration: submission.duration,
            content: submission.content.clone(),
        });
    }

    plan.to_delete = node
        .lessons
        .iter()
        .filter(|lesson| !kept.contains(&lesson.id))
        .cloned()
        .collect();

    Ok(plan)
}

fn lesson_create(submission: &LessonSubmission) -> LessonCreate {
    LessonCreate {
        title: submission.title.clone(),
        requested_position: submission.position,
        duration: submission.duration,
        content: submission.content.clone(),
    }
}

fn check_title(title: &str, entity: EntityKind) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle { entity });
    }
    Ok(())
}

fn check_position(position: Position, entity: EntityKind) -> Result<(), ValidationError> {
    if position == SENTINEL_POSITION {
        return Err(ValidationError::ReservedPosition { entity, position });
    }
    Ok(())
}

fn check_lesson(lesson: &LessonSubmission) -> Result<(), ValidationError> {
    check_title(&lesson.title, EntityKind::Lesson)?;
    check_position(lesson.position, EntityKind::Lesson)?;
    match &lesson.content {
        LessonContent::Video { url } if url.trim().is_empty() => {
            Err(ValidationError::MissingVideoUrl {
                title: lesson.title.clone(),
            })
        }
        LessonContent::Text { body } if body.trim().is_empty() => {
            Err(ValidationError::EmptyTextBody {
                title: lesson.title.clone(),
            })
        }
        _ => Ok(()),
    }
}
