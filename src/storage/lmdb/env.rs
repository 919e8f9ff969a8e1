use std::path::{Path, PathBuf};

use heed::byteorder::BigEndian;
use heed::types::{Bytes, SerdeBincode, Str, U64};
use heed::{Database, Env, EnvOpenOptions, Error as HeedError};

use crate::error::StoreResult;
use crate::types::{Course, Enrollment, Lesson, Module};

pub(super) const DEFAULT_MAP_SIZE: usize = 1 << 30;

pub(super) type RowDb<T> = Database<U64<BigEndian>, SerdeBincode<T>>;
/// `parent id (8 bytes BE) ++ position (4 bytes BE)` -> child id.
pub(super) type SlotDb = Database<Bytes, U64<BigEndian>>;

/// String key -> id, used for the slug index and counters.
pub(super) type NamedDb = Database<Str, U64<BigEndian>>;

pub(super) struct EnvHandles {
    pub(super) env: Env,
    pub(super) path: PathBuf,
    pub(super) courses: RowDb<Course>,
    pub(super) modules: RowDb<Module>,
    pub(super) lessons: RowDb<Lesson>,
    pub(super) enrollments: RowDb<Enrollment>,
    pub(super) slugs: NamedDb,
    pub(super) module_slots: SlotDb,
    pub(super) lesson_slots: SlotDb,
    pub(super) meta: NamedDb,
}

pub(super) fn open_rw(path: &Path, map_size: usize) -> StoreResult<EnvHandles> {
    std::fs::create_dir_all(path)?;

    let mut options = EnvOpenOptions::new();
    options.map_size(map_size);
    options.max_dbs(8);

    let env = unsafe {
        match options.open(path) {
            Ok(env) => env,
            Err(HeedError::BadOpenOptions { env, .. }) => env,
            Err(err) => {
                tracing::error!(
                    path = ?path,
                    map_size,
                    ?err,
                    "Failed to open LMDB environment"
                );
                return Err(err.into());
            }
        }
    };

    let mut txn = match env.write_txn() {
        Ok(txn) => txn,
        Err(err) => {
            tracing::error!(path = ?path, ?err, "Failed to start write txn for schema init");
            return Err(err.into());
        }
    };
    let courses = env.create_database(&mut txn, Some("courses"))?;
    let modules = env.create_database(&mut txn, Some("modules"))?;
    let lessons = env.create_database(&mut txn, Some("lessons"))?;
    let enrollments = env.create_database(&mut txn, Some("enrollments"))?;
    let slugs = env.create_database(&mut txn, Some("course_slugs"))?;
    let module_slots = env.create_database(&mut txn, Some("module_slots"))?;
    let lesson_slots = env.create_database(&mut txn, Some("lesson_slots"))?;
    let meta = env.create_database(&mut txn, Some("meta"))?;
    txn.commit()?;

    Ok(EnvHandles {
        env,
        path: path.to_path_buf(),
        courses,
        modules,
        lessons,
        enrollments,
        slugs,
        module_slots,
        lesson_slots,
        meta,
    })
}
