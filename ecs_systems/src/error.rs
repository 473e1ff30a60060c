use thiserror::Error;

/// Resource errors raised while standing up a [`crate::Runner`].
///
/// Programmer errors -- an undeclared view accessed from inside a
/// system, a write through a read-only view -- are not represented here;
/// they abort with a diagnostic per spec.md §7 and are asserted where
/// they occur (`crate::handle::WorldHandle`), not wrapped in a `Result`.
#[derive(Error, Debug)]
pub enum SystemsError {
    #[error("job scheduler failed to start: {0}")]
    Jobs(#[from] ecs_jobs::JobsError),
}
