//! Engagement engine for a group-chat bot: user profiling, reaction
//! analytics, and the logic deciding when and how to speak up unprompted.

pub mod autonomous;
pub mod config;
pub mod history;
pub mod http_client;
pub mod lexicon;
pub mod llm_client;
pub mod message;
mod persist;
pub mod profiles;
pub mod reactions;
pub mod runtime;
pub mod transport;

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
