//! Reference cleanup that must happen inside the transaction before a delete,
//! plus collection of media to remove once the transaction commits.

use std::collections::BTreeSet;

use crate::error::AttemptError;
use crate::storage::StoreTransaction;
use crate::types::{Lesson, MediaRef, Module, WeakRef};

/// What one attempt cleaned up. Discarded with the attempt on rollback.
#[derive(Debug, Default)]
pub(crate) struct CascadeLog {
    pub references_cleared: usize,
    media: BTreeSet<MediaRef>,
}

impl CascadeLog {
    /// Nulls every enrollment pointer at the lesson and records its media.
    pub fn before_lesson_delete(
        &mut self,
        txn: &mut dyn StoreTransaction,
        lesson: &Lesson,
    ) -> Result<(), AttemptError> {
        self.references_cleared += clear_references(txn, WeakRef::Lesson(lesson.id))?;
        if let Some(media) = lesson.content.media() {
            self.media.insert(media);
        }
        Ok(())
    }

    /// Nulls every enrollment pointer at the module. Its lessons go through
    /// [`Self::before_lesson_delete`] separately.
    pub fn before_module_delete(
        &mut self,
        txn: &mut dyn StoreTransaction,
        module: &Module,
    ) -> Result<(), AttemptError> {
        self.references_cleared += clear_references(txn, WeakRef::Module(module.id))?;
        Ok(())
    }

    /// Records media a lesson update stopped using.
    pub fn media_replaced(&mut self, media: MediaRef) {
        self.media.insert(media);
    }

    /// Media to remove after commit. Anything a lesson of any course still
    /// points at, as seen by `txn`, is kept.
    pub fn into_orphaned_media(
        self,
        txn: &dyn StoreTransaction,
    ) -> Result<Vec<MediaRef>, AttemptError> {
        let mut orphaned = Vec::with_capacity(self.media.len());
        for media in self.media {
            if !txn.media_referenced(&media)? {
                orphaned.push(media);
            }
        }
        Ok(orphaned)
    }
}

fn clear_references(
    txn: &mut dyn StoreTransaction,
    target: WeakRef,
) -> Result<usize, AttemptError> {
    let holders = txn.enrollments_referencing(target)?;
    let mut cleared = 0;
    for mut enrollment in holders {
        if enrollment.clear(target) {
            txn.put_enrollment(&enrollment)?;
            cleared += 1;
        }
    }
    if cleared > 0 {
        tracing::debug!(?target, cleared, "Cleared enrollment references");
    }
    Ok(cleared)
}
