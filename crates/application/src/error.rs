//! 应用层错误
//!
//! 分类：认证、授权、校验、不存在、持久化。每个错误都映射到稳定的错误码，
//! 随 `error` 事件发送给客户端。

use domain::DomainError;
use serde::Serialize;
use thiserror::Error;

use crate::protocol::ServerEvent;

/// 对客户端稳定的错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UserBlocked,
    NotFollowing,
    TooManyMembers,
    GroupFull,
    InsufficientPermissions,
    CannotDemoteSelf,
    EditTimeLimitExceeded,
    NotFound,
    ValidationError,
    NotAuthenticated,
    AuthenticationFailed,
    GroupNotActive,
    NotGroupMember,
    AlreadyMember,
    InvalidMessage,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UserBlocked => "USER_BLOCKED",
            ErrorCode::NotFollowing => "NOT_FOLLOWING",
            ErrorCode::TooManyMembers => "TOO_MANY_MEMBERS",
            ErrorCode::GroupFull => "GROUP_FULL",
            ErrorCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorCode::CannotDemoteSelf => "CANNOT_DEMOTE_SELF",
            ErrorCode::EditTimeLimitExceeded => "EDIT_TIME_LIMIT_EXCEEDED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotAuthenticated => "NOT_AUTHENTICATED",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::GroupNotActive => "GROUP_NOT_ACTIVE",
            ErrorCode::NotGroupMember => "NOT_GROUP_MEMBER",
            ErrorCode::AlreadyMember => "ALREADY_MEMBER",
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("{message}")]
    Authorization { code: ErrorCode, message: String },
    #[error("{message}")]
    Validation {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApplicationError {
    pub fn authorization(code: ErrorCode, message: impl Into<String>) -> Self {
        ApplicationError::Authorization {
            code,
            message: message.into(),
        }
    }

    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        ApplicationError::Validation {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        ApplicationError::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn with_details(self, details: serde_json::Value) -> Self {
        match self {
            ApplicationError::Validation { code, message, .. } => ApplicationError::Validation {
                code,
                message,
                details: Some(details),
            },
            other => other,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ApplicationError::Authentication(_) => ErrorCode::AuthenticationFailed,
            ApplicationError::Authorization { code, .. } => *code,
            ApplicationError::Validation { code, .. } => *code,
            ApplicationError::NotFound { .. } => ErrorCode::NotFound,
            ApplicationError::Persistence(_) => ErrorCode::InternalError,
        }
    }

    /// 持久化错误只返回通用描述，细节留在日志里
    pub fn to_event(&self) -> ServerEvent {
        let (message, details) = match self {
            ApplicationError::Persistence(_) => {
                ("Internal server error, please retry later".to_string(), None)
            }
            ApplicationError::Validation { details, .. } => (self.to_string(), details.clone()),
            other => (other.to_string(), None),
        };
        ServerEvent::Error {
            message,
            details,
            code: Some(self.code()),
        }
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::PermissionDenied { action } => {
                ApplicationError::authorization(ErrorCode::InsufficientPermissions, action)
            }
            DomainError::ResourceNotFound {
                resource_type,
                resource_id,
            } => ApplicationError::NotFound {
                resource: resource_label(&resource_type),
                id: resource_id,
            },
            DomainError::ResourceAlreadyExists { .. } => {
                ApplicationError::validation(ErrorCode::AlreadyMember, value.to_string())
            }
            DomainError::EditWindowExpired { .. } => {
                ApplicationError::validation(ErrorCode::EditTimeLimitExceeded, value.to_string())
            }
            DomainError::InvalidGroupTransition { .. } => {
                ApplicationError::validation(ErrorCode::GroupNotActive, value.to_string())
            }
            DomainError::ValidationError { .. } | DomainError::BusinessRuleViolation { .. } => {
                ApplicationError::validation(ErrorCode::ValidationError, value.to_string())
            }
            DomainError::DatabaseError { message } => ApplicationError::Persistence(message),
        }
    }
}

fn resource_label(resource_type: &str) -> &'static str {
    match resource_type {
        "message" => "message",
        "group" => "group",
        "conversation" => "conversation",
        "community" => "community",
        "user" => "user",
        _ => "resource",
    }
}
