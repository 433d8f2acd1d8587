use thiserror::Error;
use uuid::Uuid;

/// Coarse classification used by callers to decide how to surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),
    #[error("Product {0} not found")]
    ProductNotFound(Uuid),
    #[error("Category {0} not found")]
    CategoryNotFound(Uuid),

    #[error("Not enough stock for product {product_id} (requested {requested})")]
    InsufficientStock { product_id: Uuid, requested: i32 },
    #[error("Invalid status '{0}'. Must be one of: pending, processing, shipped, delivered, cancelled")]
    InvalidStatus(String),
    #[error("Product {0} is referenced by existing orders")]
    ProductInUse(Uuid),
    #[error("Category name '{0}' already exists")]
    DuplicateCategory(String),

    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),
    #[error("Transaction timed out: {0}")]
    Timeout(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_) => ErrorKind::Validation,
            DomainError::OrderNotFound(_)
            | DomainError::ProductNotFound(_)
            | DomainError::CategoryNotFound(_) => ErrorKind::NotFound,
            DomainError::InsufficientStock { .. }
            | DomainError::InvalidStatus(_)
            | DomainError::ProductInUse(_)
            | DomainError::DuplicateCategory(_) => ErrorKind::Conflict,
            DomainError::TransactionConflict(_)
            | DomainError::Timeout(_)
            | DomainError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the failed attempt left no residue and repeating the whole
    /// operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::TransactionConflict(_) | DomainError::Timeout(_)
        )
    }
}
