//! Classification of driver errors: which ones mean "already there" and which
//! mean some part of the work can be re-run.

use mongodb::error::{
    Error as DbError, ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR,
    UNKNOWN_TRANSACTION_COMMIT_RESULT,
};

pub const DUPLICATE_KEY: i32 = 11000;

/// Return true if the given error is a duplicate key write error.
pub fn is_duplicate_key_error(err: &DbError) -> bool {
    if let ErrorKind::Write(WriteFailure::WriteError(ref e)) = *err.kind {
        return e.code == DUPLICATE_KEY;
    }
    false
}

/// How much of a transaction may be re-run after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryScope {
    /// The transaction lost a race; start it again from the first read.
    Transaction,
    /// The commit may or may not have landed; only the commit may be repeated.
    Commit,
    Never,
}

/// Classify a driver error by its labels.
pub fn retry_scope(err: &DbError) -> RetryScope {
    scope_for_labels(|label| err.contains_label(label))
}

/// Return true if the whole transaction may be retried from the start.
pub fn is_transient(err: &DbError) -> bool {
    retry_scope(err) == RetryScope::Transaction
}

/// An unknown commit result wins over a transient label: re-running the
/// transaction could apply its writes twice.
fn scope_for_labels(has_label: impl Fn(&str) -> bool) -> RetryScope {
    if has_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) {
        RetryScope::Commit
    } else if has_label(TRANSIENT_TRANSACTION_ERROR) {
        RetryScope::Transaction
    } else {
        RetryScope::Never
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(labels: &[&str]) -> RetryScope {
        scope_for_labels(|label| labels.contains(&label))
    }

    #[test]
    fn transient_errors_rerun_the_transaction() {
        assert_eq!(scope(&[TRANSIENT_TRANSACTION_ERROR]), RetryScope::Transaction);
    }

    #[test]
    fn unknown_commit_results_only_repeat_the_commit() {
        assert_eq!(scope(&[UNKNOWN_TRANSACTION_COMMIT_RESULT]), RetryScope::Commit);
        assert_eq!(
            scope(&[TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT]),
            RetryScope::Commit
        );
    }

    #[test]
    fn unlabelled_errors_are_final() {
        assert_eq!(scope(&[]), RetryScope::Never);
        assert_eq!(scope(&["RetryableWriteError"]), RetryScope::Never);
    }
}
