use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerdantError {
    #[error("not signed in")]
    Unauthenticated,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("recurrence rule error: {0}")]
    Recurrence(String),
    #[error("photo storage error: {0}")]
    Storage(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl From<diesel::result::Error> for VerdantError {
    fn from(err: diesel::result::Error) -> Self {
        VerdantError::Runtime(err.to_string())
    }
}

pub use crate::Result;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_the_taxonomy() {
        let err = VerdantError::Validation("title is required".to_string());
        assert!(format!("{err}").contains("validation error"));
        assert_eq!(format!("{}", VerdantError::Unauthenticated), "not signed in");
    }
}
