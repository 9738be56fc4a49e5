use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LearningError {
    #[error("Cannot choose an action: the available action set is empty")]
    NoAvailableActions,

    #[error("Invalid learning parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("Experience buffer capacity must be at least 1")]
    ZeroCapacity,
}
