use std::sync::Arc;

use coursetree::error::SyncResult;
use coursetree::types::{
    CourseDetails, CoursePatch, LessonContent, LessonSubmission, MediaRef, ModuleSubmission,
    UserId,
};
use coursetree::{
    CourseStore, CourseTreeFacade, CourseTreeSynchronizer, MemoryCourseStore, StoreReader,
};

use super::support::{
    enroll, fast_config, init_tracing, load_enrollment, tree_submission, video,
    RecordingCacheInvalidator, RecordingMediaStore,
};

fn synchronizer_with_media(
    store: Arc<MemoryCourseStore>,
) -> (CourseTreeSynchronizer<MemoryCourseStore>, Arc<RecordingMediaStore>) {
    let media = Arc::new(RecordingMediaStore::default());
    let sync = CourseTreeSynchronizer::with_collaborators(
        store,
        fast_config(),
        Arc::new(RecordingCacheInvalidator::default()),
        media.clone(),
    )
    .unwrap();
    (sync, media)
}

#[test]
fn e2e_deleting_a_module_clears_progress_pointers() -> SyncResult<()> {
    init_tracing();
    let store = Arc::new(MemoryCourseStore::new());
    let (sync, media) = synchronizer_with_media(Arc::clone(&store));

    let outcome =
        sync.create_course_tree(CourseDetails::new("Cascade", UserId(5)), tree_submission(2, 2))?;
    let course_id = outcome.course.id;
    let tree = sync.load_course_tree(course_id)?;
    let kept = &tree.modules[0];
    let doomed = &tree.modules[1];

    enroll(
        store.as_ref(),
        1,
        course_id,
        Some(doomed.module.id),
        Some(doomed.lessons[1].id),
    )?;
    enroll(
        store.as_ref(),
        2,
        course_id,
        Some(kept.module.id),
        Some(kept.lessons[0].id),
    )?;

    let mut submission = tree.to_submission();
    submission.pop();
    let updated = sync.update_course_tree(course_id, CoursePatch::default(), submission)?;
    assert_eq!(updated.summary.module_deletes, 1);
    assert_eq!(updated.summary.lesson_deletes, 2);
    assert_eq!(updated.course.total_duration, kept.module.duration);

    let learner = load_enrollment(store.as_ref(), 1)?.unwrap();
    assert_eq!(learner.last_visited_module, None);
    assert_eq!(learner.last_visited_lesson, None);
    let untouched = load_enrollment(store.as_ref(), 2)?.unwrap();
    assert_eq!(untouched.last_visited_module, Some(kept.module.id));
    assert_eq!(untouched.last_visited_lesson, Some(kept.lessons[0].id));

    let reader = store.begin_read()?;
    assert!(reader.module(doomed.module.id)?.is_none());
    for lesson in &doomed.lessons {
        assert!(reader.lesson(lesson.id)?.is_none());
    }
    drop(reader);

    sync.flush_side_effects();
    assert_eq!(
        media.deleted(),
        vec![
            MediaRef::new("videos/2-1.mp4"),
            MediaRef::new("videos/2-2.mp4"),
        ]
    );
    let metrics = sync.metrics();
    assert_eq!(metrics.references_cleared, 2);
    assert_eq!(metrics.media_removed, 2);

    sync.close()
}

#[test]
fn e2e_shared_and_replaced_media() -> SyncResult<()> {
    init_tracing();
    let store = Arc::new(MemoryCourseStore::new());
    let (sync, media) = synchronizer_with_media(Arc::clone(&store));

    let outcome = sync.create_course_tree(
        CourseDetails::new("Media", UserId(6)),
        vec![ModuleSubmission::new("only", 1)
            .with_lesson(LessonSubmission::new("a", 1, 10, video("videos/shared.mp4")))
            .with_lesson(LessonSubmission::new("b", 2, 10, video("videos/shared.mp4")))
            .with_lesson(LessonSubmission::new("c", 3, 10, video("fail/c.mp4")))
            .with_lesson(LessonSubmission::new("d", 4, 10, video("videos/d.mp4")))],
    )?;
    let course_id = outcome.course.id;
    let mut submission = sync.load_course_tree(course_id)?.to_submission();

    // Drop one user of the shared video and the unremovable one, and turn
    // the last lesson into a quiz.
    let lessons = &mut submission[0].lessons;
    lessons[3].content = LessonContent::Quiz { quiz_id: 12 };
    lessons.remove(2);
    lessons.remove(1);

    let updated = sync.update_course_tree(course_id, CoursePatch::default(), submission)?;
    assert_eq!(updated.summary.lesson_deletes, 2);
    assert_eq!(updated.summary.lesson_updates, 1);
    assert_eq!(updated.course.total_duration, 20);

    sync.flush_side_effects();
    assert_eq!(media.deleted(), vec![MediaRef::new("videos/d.mp4")]);
    let metrics = sync.metrics();
    assert_eq!(metrics.media_removed, 1);
    assert_eq!(metrics.media_failures, 1);

    sync.close()
}

#[test]
fn e2e_media_used_by_another_course_is_kept() -> SyncResult<()> {
    init_tracing();
    let store = Arc::new(MemoryCourseStore::new());
    let (sync, media) = synchronizer_with_media(Arc::clone(&store));

    let shared = || {
        vec![ModuleSubmission::new("intro", 1).with_lesson(LessonSubmission::new(
            "welcome",
            1,
            30,
            video("videos/shared.mp4"),
        ))]
    };
    let first = sync.create_course_tree(CourseDetails::new("First", UserId(1)), shared())?;
    let second = sync.create_course_tree(CourseDetails::new("Second", UserId(2)), shared())?;

    let emptied = sync.update_course_tree(first.course.id, CoursePatch::default(), Vec::new())?;
    assert_eq!(emptied.summary.lesson_deletes, 1);
    sync.flush_side_effects();

    assert!(media.deleted().is_empty());
    let survivor = sync.load_course_tree(second.course.id)?;
    assert_eq!(
        survivor.modules[0].lessons[0].content,
        video("videos/shared.mp4")
    );

    // Once the last course lets go of it the file goes too.
    sync.update_course_tree(second.course.id, CoursePatch::default(), Vec::new())?;
    sync.flush_side_effects();
    assert_eq!(media.deleted(), vec![MediaRef::new("videos/shared.mp4")]);

    sync.close()
}
