use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    /// The caller does not hold the lease for the task it tried to mutate.
    /// Rejected without side effect; the worker should abandon the task.
    #[error("task {task_id} is not leased by worker '{worker_id}'")]
    NotOwner { task_id: i64, worker_id: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
