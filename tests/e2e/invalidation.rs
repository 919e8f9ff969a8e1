use std::sync::Arc;

use coursetree::error::SyncResult;
use coursetree::types::{CourseDetails, CoursePatch, UserId};
use coursetree::{CourseTreeFacade, CourseTreeSynchronizer, MemoryCourseStore};

use super::support::{
    fast_config, init_tracing, tree_submission, RecordingCacheInvalidator, RecordingMediaStore,
};

fn observed() -> (
    CourseTreeSynchronizer<MemoryCourseStore>,
    Arc<RecordingCacheInvalidator>,
) {
    let cache = Arc::new(RecordingCacheInvalidator::default());
    let sync = CourseTreeSynchronizer::with_collaborators(
        Arc::new(MemoryCourseStore::new()),
        fast_config(),
        cache.clone(),
        Arc::new(RecordingMediaStore::default()),
    )
    .unwrap();
    (sync, cache)
}

#[test]
fn e2e_commits_invalidate_course_caches() -> SyncResult<()> {
    init_tracing();
    let (sync, cache) = observed();

    let outcome =
        sync.create_course_tree(CourseDetails::new("Cached", UserId(8)), tree_submission(1, 1))?;
    let id = outcome.course.id.get();
    sync.flush_side_effects();

    assert_eq!(
        cache.patterns(),
        vec![
            "course:detail:cached".to_string(),
            "course:list:owner:8".to_string(),
            format!("course:learner:{id}:*"),
        ]
    );
    assert_eq!(sync.metrics().cache_invalidations, 1);

    sync.close()
}

#[test]
fn e2e_slug_rename_invalidates_both_slugs() -> SyncResult<()> {
    init_tracing();
    let (sync, cache) = observed();

    let outcome =
        sync.create_course_tree(CourseDetails::new("Old Name", UserId(8)), Vec::new())?;
    let patch = CoursePatch {
        slug: Some("New Name".to_string()),
        ..CoursePatch::default()
    };
    let renamed = sync.update_course_tree(outcome.course.id, patch, Vec::new())?;
    assert_eq!(renamed.course.slug, "new-name");
    sync.flush_side_effects();

    let calls = cache.calls.lock().clone();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].contains(&"course:detail:new-name".to_string()));
    assert!(calls[1].contains(&"course:detail:old-name".to_string()));

    sync.close()
}

#[test]
fn e2e_failed_syncs_invalidate_nothing() -> SyncResult<()> {
    init_tracing();
    let (sync, cache) = observed();

    sync.create_course_tree(CourseDetails::new("Taken", UserId(1)), Vec::new())?;
    sync.flush_side_effects();
    let before = cache.calls.lock().len();

    let err = sync.create_course_tree(CourseDetails::new("Taken", UserId(2)), Vec::new());
    assert!(err.is_err());
    sync.flush_side_effects();

    assert_eq!(cache.calls.lock().len(), before);
    assert_eq!(sync.metrics().cache_invalidations, 1);

    sync.close()
}

#[test]
fn e2e_close_drains_pending_side_effects() -> SyncResult<()> {
    init_tracing();
    let (sync, cache) = observed();

    for n in 0..5 {
        sync.create_course_tree(CourseDetails::new(format!("Course {n}"), UserId(1)), Vec::new())?;
    }
    sync.close()?;

    assert_eq!(cache.calls.lock().len(), 5);
    assert_eq!(sync.metrics().cache_invalidations, 5);
    Ok(())
}
