//! Error handling in [`http_operator`][crate]
use crate::{
    store::{StoreError, Verb},
    ObjectKey,
};
use thiserror::Error;

/// Possible errors from a reconcile
#[derive(Error, Debug)]
pub enum Error {
    /// A store request other than the expected not-found / lost-race outcomes failed
    ///
    /// The reconcile stops at the failing step; whatever earlier steps wrote stays in place.
    #[error("failed to {verb} {kind} {namespace}/{name}: {source}")]
    Store {
        verb: Verb,
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },

    /// The custom resource asks for something that can never be converged
    #[error("invalid spec for {key}: {reason}")]
    InvalidSpec { key: ObjectKey, reason: String },

    /// The controller handed over a `KindCustomHttp` without a name or namespace
    #[error("KindCustomHttp is missing {0}")]
    MissingObjectKey(&'static str),
}

impl Error {
    /// Whether retrying without a change to the custom resource can help
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::InvalidSpec { .. } | Error::MissingObjectKey(_))
    }
}

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
