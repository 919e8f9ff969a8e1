use std::sync::Arc;

use coursetree::error::{SyncError, SyncResult, ValidationError};
use coursetree::types::{
    CourseDetails, CoursePatch, EntityKind, LessonSubmission, ModuleId, ModuleSubmission, UserId,
};
use coursetree::{CourseTreeFacade, MemoryCourseStore};

use super::support::{init_tracing, synchronizer, text, tree_submission, video};

#[test]
fn e2e_single_lesson_rolls_up_durations() -> SyncResult<()> {
    init_tracing();
    let sync = synchronizer(Arc::new(MemoryCourseStore::new()));

    let outcome = sync.create_course_tree(
        CourseDetails::new("Intro to Rust", UserId(7)),
        vec![ModuleSubmission::new("Getting started", 1).with_lesson(LessonSubmission::new(
            "Install",
            1,
            300,
            video("videos/install.mp4"),
        ))],
    )?;

    assert_eq!(outcome.course.slug, "intro-to-rust");
    assert_eq!(outcome.course.total_duration, 300);

    let tree = sync.load_course_tree(outcome.course.id)?;
    assert_eq!(tree.modules.len(), 1);
    assert_eq!(tree.modules[0].module.duration, 300);
    assert_eq!(tree.course.total_duration, 300);
    assert_eq!(tree.modules[0].lessons[0].position, 1);

    sync.close()
}

#[test]
fn e2e_moving_onto_an_occupied_position_swaps() -> SyncResult<()> {
    init_tracing();
    let sync = synchronizer(Arc::new(MemoryCourseStore::new()));

    let outcome = sync.create_course_tree(
        CourseDetails::new("Swaps", UserId(1)),
        vec![ModuleSubmission::new("A", 1), ModuleSubmission::new("B", 2)],
    )?;
    let course_id = outcome.course.id;
    let tree = sync.load_course_tree(course_id)?;
    let a = tree.modules[0].module.id;
    let b = tree.modules[1].module.id;

    let mut submission = tree.to_submission();
    submission[0].position = 2;
    let updated = sync.update_course_tree(course_id, CoursePatch::default(), submission)?;
    assert_eq!(updated.summary.module_updates, 1);

    let tree = sync.load_course_tree(course_id)?;
    assert_eq!(tree.module(a).map(|n| n.module.position), Some(2));
    assert_eq!(tree.module(b).map(|n| n.module.position), Some(1));

    sync.close()
}

#[test]
fn e2e_unchanged_resubmission_is_a_noop() -> SyncResult<()> {
    init_tracing();
    let store = Arc::new(MemoryCourseStore::new());
    let sync = synchronizer(Arc::clone(&store));

    let outcome =
        sync.create_course_tree(CourseDetails::new("Stable", UserId(2)), tree_submission(3, 3))?;
    let course_id = outcome.course.id;
    let before = sync.load_course_tree(course_id)?;
    assert_eq!(before.lesson_count(), 9);
    let sequence = store.commit_sequence();

    let again = sync.update_course_tree(course_id, CoursePatch::default(), before.to_submission())?;

    assert!(again.summary.is_noop(), "summary: {:?}", again.summary);
    assert_eq!(store.commit_sequence(), sequence);
    assert_eq!(sync.load_course_tree(course_id)?, before);
    assert_eq!(sync.metrics().syncs_committed, 2);

    sync.close()
}

#[test]
fn e2e_reorders_updates_and_adds_lessons() -> SyncResult<()> {
    init_tracing();
    let sync = synchronizer(Arc::new(MemoryCourseStore::new()));

    let outcome =
        sync.create_course_tree(CourseDetails::new("Editing", UserId(3)), tree_submission(2, 3))?;
    let course_id = outcome.course.id;
    let mut submission = sync.load_course_tree(course_id)?.to_submission();

    // Rotate module 1's lessons, retitle one, drop module 2's last lesson
    // and append a new lesson where the dropped one was.
    let lessons = &mut submission[0].lessons;
    lessons[0].position = 3;
    lessons[1].position = 1;
    lessons[2].position = 2;
    lessons[1].title = "lesson 1.2 (revised)".to_string();
    submission[1].lessons.pop();
    submission[1]
        .lessons
        .push(LessonSubmission::new("quiz", 3, 45, text("recap")));

    let updated = sync.update_course_tree(course_id, CoursePatch::default(), submission)?;
    assert_eq!(updated.summary.lesson_updates, 3);
    assert_eq!(updated.summary.lesson_deletes, 1);
    assert_eq!(updated.summary.lesson_creates, 1);
    assert_eq!(updated.summary.module_updates, 0);

    let tree = sync.load_course_tree(course_id)?;
    let first: Vec<_> = tree.modules[0]
        .lessons
        .iter()
        .map(|lesson| (lesson.position, lesson.title.as_str()))
        .collect();
    assert_eq!(
        first,
        vec![
            (1, "lesson 1.2 (revised)"),
            (2, "lesson 1.3"),
            (3, "lesson 1.1"),
        ]
    );

    let second = &tree.modules[1];
    assert_eq!(second.lessons.len(), 3);
    assert_eq!(second.lessons[2].title, "quiz");
    assert_eq!(second.module.duration, 60 + 120 + 45);
    assert_eq!(
        tree.course.total_duration,
        tree.modules.iter().map(|n| n.module.duration).sum::<u64>()
    );

    sync.close()
}

#[test]
fn e2e_invalid_submission_leaves_store_untouched() -> SyncResult<()> {
    init_tracing();
    let store = Arc::new(MemoryCourseStore::new());
    let sync = synchronizer(Arc::clone(&store));

    let outcome =
        sync.create_course_tree(CourseDetails::new("Guarded", UserId(4)), tree_submission(1, 2))?;
    let course_id = outcome.course.id;
    let before = sync.load_course_tree(course_id)?;
    let sequence = store.commit_sequence();

    let mut submission = before.to_submission();
    submission.push(ModuleSubmission::new("broken", 2).with_lesson(LessonSubmission::new(
        "no body",
        1,
        10,
        text("   "),
    )));
    let patch = CoursePatch {
        title: Some("Renamed".to_string()),
        ..CoursePatch::default()
    };

    let err = sync
        .update_course_tree(course_id, patch, submission)
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Validation(ValidationError::EmptyTextBody { .. })
    ));

    let err = sync
        .update_course_tree(
            course_id,
            CoursePatch::default(),
            vec![ModuleSubmission::existing(ModuleId(9_999), "ghost", 1)],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::NotFound {
            entity: EntityKind::Module,
            id: 9_999
        }
    ));

    assert_eq!(store.commit_sequence(), sequence);
    assert_eq!(sync.load_course_tree(course_id)?, before);
    assert_eq!(sync.metrics().permanent_failures, 2);

    sync.close()
}
