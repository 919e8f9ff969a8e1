//! Filesystem helpers shared by the persistent backend.

pub mod store_lock;

pub use store_lock::StoreLockGuard;
