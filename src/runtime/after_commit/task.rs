use crate::types::{Course, CourseId, MediaRef};

/// Side effects of one committed sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfterCommitTask {
    pub course_id: CourseId,
    /// Cache-key patterns that went stale.
    pub patterns: Vec<String>,
    /// Media no longer referenced by the committed tree.
    pub media: Vec<MediaRef>,
}

impl AfterCommitTask {
    pub fn new(course: &Course, previous_slug: Option<&str>, media: Vec<MediaRef>) -> Self {
        Self {
            course_id: course.id,
            patterns: stale_patterns(course, previous_slug),
            media,
        }
    }
}

/// Cache keys that may hold data of `course` as it was before the commit.
///
/// `previous_slug` is the slug before a rename, if the commit changed it.
pub fn stale_patterns(course: &Course, previous_slug: Option<&str>) -> Vec<String> {
    let mut patterns = vec![format!("course:detail:{}", course.slug)];
    if let Some(previous) = previous_slug.filter(|previous| *previous != course.slug) {
        patterns.push(format!("course:detail:{previous}"));
    }
    patterns.push(format!("course:list:owner:{}", course.owner.get()));
    patterns.push(format!("course:learner:{}:*", course.id.get()));
    patterns
}
