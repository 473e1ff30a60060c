use thiserror::Error;

/// Resource errors raised while standing up a [`crate::scheduler::Scheduler`].
#[derive(Error, Debug)]
pub enum JobsError {
    #[error("worker thread pool failed to start: {0}")]
    PoolSpawn(#[from] std::io::Error),
}
