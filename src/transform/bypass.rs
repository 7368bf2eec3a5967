//! Re-entrant transform bypass.
//!
//! Synthetic handlers created by a transform (the search entry point, the
//! code-mode executor) need to read the catalog *as it exists beneath
//! their own transform*: if the search tool listed tools through the full
//! chain it would see only itself. The bypass scope carries the set of
//! transform instance IDs to skip for the duration of a re-entrant read,
//! stored in a task-local so concurrent requests never observe each
//! other's bypass state and unwinding restores the previous scope on
//! every exit path.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

tokio::task_local! {
    static BYPASS: HashSet<u64>;
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a unique transform instance ID.
pub fn next_instance_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Whether the given transform instance is bypassed in the current scope.
pub fn is_bypassed(id: u64) -> bool {
    BYPASS.try_with(|set| set.contains(&id)).unwrap_or(false)
}

/// Runs `fut` with the given instance IDs added to the bypass scope.
/// Nested scopes accumulate; the enclosing scope is restored when the
/// future resolves or is dropped.
pub async fn with_bypass<F>(ids: &[u64], fut: F) -> F::Output
where
    F: Future,
{
    let mut scope = BYPASS.try_with(Clone::clone).unwrap_or_default();
    scope.extend(ids.iter().copied());
    BYPASS.scope(scope, fut).await
}
