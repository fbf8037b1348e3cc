use tonic::Status;

use crate::tsdb::TsdbError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("partial failure aborted request: {0}")]
    PartialFailure(String),
    #[error("request cancelled")]
    Cancelled,
}

impl From<TsdbError> for StoreError {
    fn from(err: TsdbError) -> Self {
        match err {
            TsdbError::Cancelled => Self::Cancelled,
            TsdbError::BlockUnreadable { .. } => Self::PartialFailure(err.to_string()),
            TsdbError::Closed | TsdbError::OutOfOrder { .. } => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<StoreError> for Status {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidArgument(_) => Status::invalid_argument(err.to_string()),
            StoreError::Unavailable(_) | StoreError::PartialFailure(_) => {
                Status::unavailable(err.to_string())
            }
            StoreError::Cancelled => Status::cancelled(err.to_string()),
        }
    }
}
