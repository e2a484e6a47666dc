//! Cascade logic - propagating a failure or skip through dependents
//!
//! A permanently failed package can never unblock its dependents, so every
//! transitive dependent still waiting (pending or ready) moves to skipped.
//! The same propagation backs the recovery manager's user-directed skips.

use std::collections::VecDeque;

use tracing::debug;

use crate::checker::DependencyChecker;
use crate::domain::ExecutionState;

/// Skip every transitive dependent of `origin` still in pending or ready
///
/// Repeatedly applies the checker's direct blocked-package query: each
/// newly skipped package blocks its own waiting dependents in turn.
/// Returns the names skipped, in discovery order. Running, completed,
/// failed, and already-skipped packages are left untouched.
pub fn skip_dependents(checker: &DependencyChecker, state: &mut ExecutionState, origin: &str) -> Vec<String> {
    let mut skipped = Vec::new();
    let mut frontier = VecDeque::from([origin.to_string()]);

    while let Some(current) = frontier.pop_front() {
        for dependent in checker.blocked_packages(&current, state) {
            state.remove_pending(&dependent);
            state.remove_ready(&dependent);
            if state.skipped.insert(dependent.clone()) {
                debug!(package = %dependent, %origin, "skip_dependents: cascaded skip");
                skipped.push(dependent.clone());
                frontier.push_back(dependent);
            }
        }
    }

    skipped
}

/// Skip `origin` itself along with all of its transitive dependents
///
/// Used by recovery: the named package is pulled out of whatever partition
/// it occupies and recorded as skipped, then the cascade follows the
/// reverse edges. Here dependents are removed from every partition, since
/// the user is rewriting history offline rather than reacting to a live
/// failure.
pub fn skip_package_tree(checker: &DependencyChecker, state: &mut ExecutionState, origin: &str) -> Vec<String> {
    let mut skipped = Vec::new();

    state.remove_everywhere(origin);
    if state.skipped.insert(origin.to_string()) {
        skipped.push(origin.to_string());
    }

    for dependent in checker.find_all_dependents(origin) {
        state.remove_everywhere(&dependent);
        if state.skipped.insert(dependent.clone()) {
            debug!(package = %dependent, %origin, "skip_package_tree: cascaded skip");
            skipped.push(dependent);
        }
    }

    skipped
}
