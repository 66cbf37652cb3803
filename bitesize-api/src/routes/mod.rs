use serde::Serialize;

pub mod environment;
pub mod health_check;
pub mod logs;
pub mod pods;
pub mod status;

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: impl Into<String>) -> ErrorMessage {
        ErrorMessage {
            error: error.into(),
        }
    }
}
