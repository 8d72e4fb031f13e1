use domain::{DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("push error: {0}")]
    Push(String),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    /// 推送服务商返回的错误
    pub fn push(message: impl Into<String>) -> Self {
        ApplicationError::Push(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ApplicationError::Domain(DomainError::NotFound)
                | ApplicationError::Repository(RepositoryError::NotFound)
        )
    }

    pub fn is_already_closed(&self) -> bool {
        matches!(self, ApplicationError::Domain(DomainError::AlreadyClosed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_recognised_from_both_layers() {
        assert!(ApplicationError::from(DomainError::NotFound).is_not_found());
        assert!(ApplicationError::from(RepositoryError::NotFound).is_not_found());
        assert!(!ApplicationError::push("boom").is_not_found());
    }
}
