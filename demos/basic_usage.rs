//! Basic usage example: create a course tree, reorder it, then delete part of it.
//!
//! Run with: cargo run --example basic_usage

use std::sync::Arc;

use coursetree::types::{
    CourseDetails, CoursePatch, LessonContent, LessonSubmission, ModuleSubmission, UserId,
};
use coursetree::{
    CourseTreeFacade, CourseTreeSynchronizer, FsMediaStore, LmdbCourseStore,
    NoopCacheInvalidator, SyncConfig,
};

const DATA_DIR: &str = "./data/basic_example";
const MEDIA_DIR: &str = "./data/basic_example_media";

fn video(url: &str) -> LessonContent {
    LessonContent::Video {
        url: url.to_string(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("📚 Course tree basic usage example\n");

    // Start from an empty store so the slug is free on every run.
    let _ = std::fs::remove_dir_all(DATA_DIR);

    let store = Arc::new(LmdbCourseStore::new(DATA_DIR)?);
    let sync = CourseTreeSynchronizer::with_collaborators(
        store,
        SyncConfig::default().with_max_attempts(5),
        Arc::new(NoopCacheInvalidator),
        Arc::new(FsMediaStore::new(MEDIA_DIR)),
    )?;

    // Example 1: create a course with two modules
    println!("✏️  Creating 'Rust 101' with two modules");
    let outcome = sync.create_course_tree(
        CourseDetails::new("Rust 101", UserId(7)),
        vec![
            ModuleSubmission::new("Ownership", 1)
                .with_lesson(LessonSubmission::new("Moves", 1, 600, video("videos/moves.mp4")))
                .with_lesson(LessonSubmission::new(
                    "Borrowing",
                    2,
                    900,
                    video("videos/borrowing.mp4"),
                )),
            ModuleSubmission::new("Traits", 2).with_lesson(LessonSubmission::new(
                "Generics",
                1,
                300,
                LessonContent::Text {
                    body: "Traits bound generic parameters.".to_string(),
                },
            )),
        ],
    )?;
    let course_id = outcome.course.id;
    println!(
        "   ✓ {} created as '{}', total duration {}s\n",
        course_id, outcome.course.slug, outcome.course.total_duration
    );

    // Example 2: swap the modules and rename a lesson
    println!("🔀 Swapping modules and renaming a lesson");
    let mut submission = sync.load_course_tree(course_id)?.to_submission();
    submission[0].position = 2;
    submission[1].position = 1;
    submission[0].lessons[1].title = "Borrowing and lifetimes".to_string();
    let updated = sync.update_course_tree(course_id, CoursePatch::default(), submission)?;
    println!("   ✓ Committed in {} attempt(s): {:?}\n", updated.attempts, updated.summary);

    // Example 3: resubmitting the stored tree writes nothing
    let unchanged = sync.load_course_tree(course_id)?.to_submission();
    let again = sync.update_course_tree(course_id, CoursePatch::default(), unchanged)?;
    println!("🔁 Resubmitted unchanged tree, no-op: {}\n", again.summary.is_noop());

    // Example 4: drop the ownership module
    println!("🗑️  Deleting the 'Ownership' module");
    let mut submission = sync.load_course_tree(course_id)?.to_submission();
    submission.retain(|module| module.title != "Ownership");
    let trimmed = sync.update_course_tree(course_id, CoursePatch::default(), submission)?;
    println!(
        "   ✓ {} module(s) deleted, total duration now {}s\n",
        trimmed.summary.module_deletes, trimmed.course.total_duration
    );

    println!("📊 Final tree:");
    let tree = sync.load_course_tree(course_id)?;
    for node in &tree.modules {
        println!("   {}. {}", node.module.position, node.module.title);
        for lesson in &node.lessons {
            println!("      {}. {} ({}s)", lesson.position, lesson.title, lesson.duration);
        }
    }

    sync.close()?;
    let metrics = sync.metrics();
    println!(
        "\n📈 {} syncs committed, {} attempts, {} media files removed",
        metrics.syncs_committed, metrics.attempts, metrics.media_removed
    );

    Ok(())
}
