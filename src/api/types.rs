use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            #[inline]
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }
    };
}

id_type!(
    /// Store-assigned course identifier.
    CourseId,
    "course"
);
id_type!(
    /// Store-assigned module identifier.
    ModuleId,
    "module"
);
id_type!(
    /// Store-assigned lesson identifier.
    LessonId,
    "lesson"
);
id_type!(EnrollmentId, "enrollment");
id_type!(UserId, "user");

/// Rank of a sibling within its parent. Unique among siblings.
pub type Position = u32;

/// Durations are tracked in whole seconds.
pub type Seconds = u64;

/// Parking slot used while swapping two siblings.
///
/// Never accepted from a submission, so it is always free inside a parent.
pub const SENTINEL_POSITION: Position = Position::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Course,
    Module,
    Lesson,
    Enrollment,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Course => "course",
            EntityKind::Module => "module",
            EntityKind::Lesson => "lesson",
            EntityKind::Enrollment => "enrollment",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub slug: String,
    pub title: String,
    pub owner: UserId,
    /// Sum of the durations of the course's modules.
    pub total_duration: Seconds,
    pub published: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub course_id: CourseId,
    pub title: String,
    pub position: Position,
    /// Sum of the durations of the module's lessons.
    pub duration: Seconds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub module_id: ModuleId,
    pub title: String,
    pub position: Position,
    pub duration: Seconds,
    pub content: LessonContent,
}

/// Lesson payload. Exactly one variant is populated by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LessonContent {
    Video { url: String },
    Text { body: String },
    Quiz { quiz_id: u64 },
}

impl LessonContent {
    /// Externally stored media backing this content, if any.
    pub fn media(&self) -> Option<MediaRef> {
        match self {
            LessonContent::Video { url } => Some(MediaRef::new(url.clone())),
            LessonContent::Text { .. } | LessonContent::Quiz { .. } => None,
        }
    }

    pub fn uses_media(&self, media: &MediaRef) -> bool {
        matches!(self, LessonContent::Video { url } if url == media.as_str())
    }
}

/// Learner progress record. Holds weak pointers only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub user: UserId,
    pub course_id: CourseId,
    pub last_visited_module: Option<ModuleId>,
    pub last_visited_lesson: Option<LessonId>,
}

impl Enrollment {
    pub fn references(&self, target: WeakRef) -> bool {
        match target {
            WeakRef::Module(id) => self.last_visited_module == Some(id),
            WeakRef::Lesson(id) => self.last_visited_lesson == Some(id),
        }
    }

    /// Nulls the pointer matching `target`. Returns whether anything changed.
    pub fn clear(&mut self, target: WeakRef) -> bool {
        match target {
            WeakRef::Module(id) if self.last_visited_module == Some(id) => {
                self.last_visited_module = None;
                true
            }
            WeakRef::Lesson(id) if self.last_visited_lesson == Some(id) => {
                self.last_visited_lesson = None;
                true
            }
            _ => false,
        }
    }
}

/// Target of a non-owning pointer held by an external entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeakRef {
    Module(ModuleId),
    Lesson(LessonId),
}

/// Reference to a blob held by the external media store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaRef(String);

impl MediaRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A module with its lessons, ordered by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleNode {
    pub module: Module,
    pub lessons: Vec<Lesson>,
}

/// A course with its full module/lesson hierarchy, ordered by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseTree {
    pub course: Course,
    pub modules: Vec<ModuleNode>,
}

impl CourseTree {
    pub fn module(&self, id: ModuleId) -> Option<&ModuleNode> {
        self.modules.iter().find(|node| node.module.id == id)
    }

    pub fn lesson_count(&self) -> usize {
        self.modules.iter().map(|node| node.lessons.len()).sum()
    }

    /// Rebuilds the submission that reproduces this tree unchanged.
    pub fn to_submission(&self) -> Vec<ModuleSubmission> {
        self.modules
            .iter()
            .map(|node| ModuleSubmission {
                id: Some(node.module.id),
                title: node.module.title.clone(),
                position: node.module.position,
                lessons: node
                    .lessons
                    .iter()
                    .map(|lesson| LessonSubmission {
                        id: Some(lesson.id),
                        title: lesson.title.clone(),
                        position: lesson.position,
                        duration: lesson.duration,
                        content: lesson.content.clone(),
                    })
                    .collect(),
            })
            .collect()
    }
}

/// Course-level fields for a new course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseDetails {
    pub title: String,
    /// Explicit slug. Derived from the title when absent.
    pub slug: Option<String>,
    pub owner: UserId,
    pub published: bool,
}

impl CourseDetails {
    pub fn new(title: impl Into<String>, owner: UserId) -> Self {
        Self {
            title: title.into(),
            slug: None,
            owner,
            published: false,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn published(mut self, published: bool) -> Self {
        self.published = published;
        self
    }
}

/// Partial update of course-level fields. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoursePatch {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub published: Option<bool>,
}

impl CoursePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.slug.is_none() && self.published.is_none()
    }
}

/// Client-submitted module. `id` is set when the module is already persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSubmission {
    pub id: Option<ModuleId>,
    pub title: String,
    pub position: Position,
    pub lessons: Vec<LessonSubmission>,
}

impl ModuleSubmission {
    pub fn new(title: impl Into<String>, position: Position) -> Self {
        Self {
            id: None,
            title: title.into(),
            position,
            lessons: Vec::new(),
        }
    }

    pub fn existing(id: ModuleId, title: impl Into<String>, position: Position) -> Self {
        Self {
            id: Some(id),
            ..Self::new(title, position)
        }
    }

    pub fn with_lesson(mut self, lesson: LessonSubmission) -> Self {
        self.lessons.push(lesson);
        self
    }
}

/// Client-submitted lesson. `id` is set when the lesson is already persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSubmission {
    pub id: Option<LessonId>,
    pub title: String,
    pub position: Position,
    pub duration: Seconds,
    pub content: LessonContent,
}

impl LessonSubmission {
    pub fn new(
        title: impl Into<String>,
        position: Position,
        duration: Seconds,
        content: LessonContent,
    ) -> Self {
        Self {
            id: None,
            title: title.into(),
            position,
            duration,
            content,
        }
    }

    pub fn existing(
        id: LessonId,
        title: impl Into<String>,
        position: Position,
        duration: Seconds,
        content: LessonContent,
    ) -> Self {
        Self {
            id: Some(id),
            ..Self::new(title, position, duration, content)
        }
    }
}

/// Module row about to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewModule {
    pub course_id: CourseId,
    pub title: String,
    pub position: Position,
}

/// Lesson row about to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLesson {
    pub module_id: ModuleId,
    pub title: String,
    pub position: Position,
    pub duration: Seconds,
    pub content: LessonContent,
}

/// Course row about to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCourse {
    pub slug: String,
    pub title: String,
    pub owner: UserId,
    pub published: bool,
}
