//! 领域模型错误定义
//!
//! 实时推送核心对外暴露的错误分类。仓储层错误单独定义为 [`RepositoryError`]，
//! 由管理器在边界处转换。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("channel name conflicts")]
    ChannelNameConflicts,

    #[error("invalid channel name")]
    InvalidChannelName,

    #[error("invalid parent channel")]
    InvalidParentChannel,

    #[error("invalid channel")]
    InvalidChannel,

    #[error("invalid channel path")]
    InvalidChannelPath,

    #[error("channel depth limit exceeded")]
    TooDeepChannel,

    #[error("channel has been archived")]
    ChannelArchived,

    #[error("channel is forced to notify")]
    ForcedNotification,

    #[error("pin limit exceeded")]
    PinLimitExceeded,

    /// WebRTC 状态被其他连接占用
    #[error("state is occupied by another connection")]
    Occupied,

    #[error("buffer is full")]
    BufferFull,

    #[error("already closed")]
    AlreadyClosed,

    #[error("invalid argument: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// 创建参数错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 包装底层错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 前置条件类错误（归档、强制通知、置顶上限、占用）
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::ChannelArchived | Self::ForcedNotification | Self::PinLimitExceeded | Self::Occupied
        )
    }
}

/// 仓储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    AlreadyExists,
    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

impl From<RepositoryError> for DomainError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => DomainError::NotFound,
            RepositoryError::AlreadyExists => DomainError::AlreadyExists,
            RepositoryError::Storage(message) => DomainError::Internal(message),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
