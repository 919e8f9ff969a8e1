use std::sync::Arc;

use coursetree::error::{SyncError, SyncResult, TransientFailure};
use coursetree::types::{CourseDetails, CoursePatch, UserId};
use coursetree::{CourseTreeFacade, CourseTreeSynchronizer, RetryPolicy, SyncConfig};

use super::support::{init_tracing, load_tree, synchronizer, tree_submission, FlakyStore};

#[test]
fn e2e_transient_conflicts_are_retried() -> SyncResult<()> {
    init_tracing();
    let store = Arc::new(FlakyStore::new(2));
    let sync = synchronizer(Arc::clone(&store));

    let outcome =
        sync.create_course_tree(CourseDetails::new("Retried", UserId(1)), tree_submission(2, 2))?;

    assert_eq!(outcome.attempts, 3);
    assert_eq!(store.begins(), 3);
    let tree = sync.load_course_tree(outcome.course.id)?;
    assert_eq!(tree.modules.len(), 2);
    assert_eq!(tree.lesson_count(), 4);
    assert_eq!(store.inner().commit_sequence(), 1);

    let metrics = sync.metrics();
    assert_eq!(metrics.attempts, 3);
    assert_eq!(metrics.retries, 2);
    assert_eq!(metrics.syncs_committed, 1);

    sync.close()
}

#[test]
fn e2e_exhausted_retries_report_the_last_failure() -> SyncResult<()> {
    init_tracing();
    let store = Arc::new(FlakyStore::new(usize::MAX));
    let sync = synchronizer(Arc::clone(&store));

    let err = sync
        .create_course_tree(CourseDetails::new("Doomed", UserId(1)), tree_submission(1, 1))
        .unwrap_err();

    assert!(err.is_retries_exhausted());
    match err {
        SyncError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(last, TransientFailure::WriteConflict(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.begins(), 3);
    assert_eq!(store.inner().commit_sequence(), 0);

    let metrics = sync.metrics();
    assert_eq!(metrics.retries_exhausted, 1);
    assert_eq!(metrics.syncs_committed, 0);

    sync.close()
}

#[test]
fn e2e_failed_attempts_leave_no_partial_rows() -> SyncResult<()> {
    init_tracing();
    let store = Arc::new(FlakyStore::new(0));
    let sync = CourseTreeSynchronizer::new(
        Arc::clone(&store),
        SyncConfig::default()
            .with_retry_policy(RetryPolicy::immediate(4))
            .with_batch_limits(1, 1),
    )
    .unwrap();

    let outcome =
        sync.create_course_tree(CourseDetails::new("Replanned", UserId(1)), tree_submission(3, 2))?;
    let course_id = outcome.course.id;
    let mut submission = sync.load_course_tree(course_id)?.to_submission();
    submission.remove(1);
    submission[1].position = 2;

    let flaky = Arc::new(FlakyStore::new(3));
    let retried = CourseTreeSynchronizer::new(
        Arc::clone(&flaky),
        SyncConfig::default()
            .with_retry_policy(RetryPolicy::immediate(4))
            .with_batch_limits(1, 1),
    )
    .unwrap();
    let first =
        retried.create_course_tree(CourseDetails::new("Replanned", UserId(1)), tree_submission(3, 2))?;
    assert_eq!(first.attempts, 4);
    let mut replay = retried.load_course_tree(first.course.id)?.to_submission();
    replay.remove(1);
    replay[1].position = 2;

    let clean = sync.update_course_tree(course_id, CoursePatch::default(), submission)?;
    let noisy = retried.update_course_tree(first.course.id, CoursePatch::default(), replay)?;
    assert_eq!(clean.attempts, 1);
    assert_eq!(noisy.attempts, 1);
    assert_eq!(clean.summary, noisy.summary);
    assert_eq!(flaky.inner().commit_sequence(), 2);

    let clean_tree = load_tree(store.as_ref(), course_id)?.unwrap();
    let noisy_tree = load_tree(flaky.as_ref(), first.course.id)?.unwrap();
    let shape = |tree: &coursetree::types::CourseTree| {
        tree.modules
            .iter()
            .map(|node| {
                (
                    node.module.title.clone(),
                    node.module.position,
                    node.module.duration,
                    node.lessons.len(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&clean_tree), shape(&noisy_tree));
    assert_eq!(noisy_tree.modules.len(), 2);
    assert_eq!(noisy_tree.modules[1].module.position, 2);
    assert_eq!(clean_tree.course.total_duration, noisy_tree.course.total_duration);

    sync.close()?;
    retried.close()
}
