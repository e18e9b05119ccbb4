use anyhow::Error;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("The process handle is not valid")]
    InvalidState,
    #[error("Invalid argument: {}", .0)]
    InvalidArgument(&'static str),
    #[error("Null pointer at depth {depth} of the pointer chain")]
    NullPointer { depth: usize },
    #[error("{} failed: {}", .0, .1)]
    OsOperationFailed(&'static str, Error),
}

pub type Result<T, E = MemoryError> = std::result::Result<T, E>;

impl MemoryError {
    pub(crate) fn os(operation: &'static str) -> impl FnOnce(Error) -> Self {
        move |err| Self::OsOperationFailed(operation, err)
    }
}
