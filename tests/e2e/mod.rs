#[path = "../common/support.rs"]
mod support;

mod cascade;
mod core;
mod invalidation;
mod retry;
