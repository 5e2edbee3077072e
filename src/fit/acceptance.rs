//! The "only update on improvement" policy, as a pure function.

use crate::domain::FitResult;

/// Decide whether `candidate` replaces `current`.
///
/// Returns the result to store and whether it changed. The candidate wins when
/// `force` is set, when nothing is stored yet, or when its chi2 is strictly lower.
pub fn accept(current: Option<FitResult>, candidate: FitResult, force: bool) -> (FitResult, bool) {
    match current {
        Some(stored) if !force && !(candidate.chi2 < stored.chi2) => (stored, false),
        _ => (candidate, true),
    }
}
