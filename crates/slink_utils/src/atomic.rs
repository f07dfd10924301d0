use std::sync::atomic::Ordering;

/// Ordering used for all flags shared between slink tasks.
pub const ORDERING: Ordering = Ordering::SeqCst;
