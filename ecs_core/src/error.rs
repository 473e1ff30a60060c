use thiserror::Error;

/// Errors raised while building a `Definition`.
///
/// These are all caught before any `World` exists, so callers get a
/// `Result` rather than a panic -- unlike the run-time programmer errors
/// in [`crate::world`], which abort with a diagnostic per the invariant
/// they violate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("component `{0}` is already registered")]
    DuplicateComponent(String),

    #[error("module `{0}` is already registered")]
    DuplicateModule(String),

    #[error("view `{0}` has an empty component set")]
    EmptyView(String),

    #[error("view `{0}` has overlapping required/forbidden component sets")]
    NonDisjointView(String),
}
