use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{operation} failed with HTTP {status}: {detail}")]
    RequestFailed {
        operation: &'static str,
        status: u16,
        detail: String,
    },
    #[error("unexpected response for {operation}: {detail}")]
    Decode {
        operation: &'static str,
        detail: String,
    },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("local storage failure: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
