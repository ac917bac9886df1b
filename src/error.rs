//! 统一错误类型模块
//!
//! 提供 crm_access 中所有写操作的错误类型定义。
//!
//! 读路径（`has_permission` / `has_module_access` / 解析器）从不返回错误，
//! 任何缺失或无法解析的权限都直接判定为拒绝。

use thiserror::Error;

use crate::rbac::{Module, Role};

/// crm_access 的统一结果类型
pub type Result<T> = std::result::Result<T, Error>;

/// crm_access 的错误类型
#[derive(Debug, Error)]
pub enum Error {
    /// 权限管理错误
    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    /// 权限导入错误
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// 会话错误
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// 邀请错误
    #[error("Invitation error: {0}")]
    Invitation(#[from] InvitationError),

    /// 验证错误
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// 存储错误
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// 加密错误
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 创建一个内部错误
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// 创建一个验证错误
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(ValidationError::Custom(msg.into()))
    }

    /// 创建一个存储操作失败错误
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(StorageError::OperationFailed(msg.into()))
    }
}

/// 权限管理相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    /// 模块未启用，无法修改其操作或能力标记
    #[error("module '{module}' is not enabled for role '{role}'")]
    ModuleDisabled { role: Role, module: Module },

    /// 角色权限子树违反不变量
    #[error("invalid permissions for role '{role}': {message}")]
    InvalidSubtree { role: Role, message: String },

    /// 权限路径无法解析
    #[error("invalid permission path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// 无法识别的名称（角色/模块/操作）
    #[error("unknown {kind}: '{name}'")]
    Unknown { kind: &'static str, name: String },
}

/// 权限导入相关错误
///
/// `location` 使用点号路径指出出错的位置，例如 `admin.contacts.actions[2]`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    /// 不是合法的 JSON
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// 缺少必需的角色键
    #[error("missing required role '{0}'")]
    MissingRole(Role),

    /// 结构错误
    #[error("invalid structure at '{location}': {message}")]
    InvalidShape { location: String, message: String },

    /// 违反权限不变量
    #[error("invariant violated at '{location}': {message}")]
    Invariant { location: String, message: String },
}

impl ImportError {
    pub(crate) fn shape(location: impl Into<String>, message: impl Into<String>) -> Self {
        ImportError::InvalidShape {
            location: location.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invariant(location: impl Into<String>, message: impl Into<String>) -> Self {
        ImportError::Invariant {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// 会话相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// 当前没有活跃会话
    #[error("no active session")]
    NotAuthenticated,

    /// 会话已过期
    #[error("session has expired")]
    Expired,

    /// 角色切换功能未开启
    #[error("role switching is disabled")]
    ImpersonationDisabled,

    /// 当前身份无权切换角色
    #[error("role '{0}' is not allowed to switch identities")]
    ImpersonationDenied(Role),

    /// 当前不处于模拟状态
    #[error("session is not impersonating")]
    NotImpersonating,
}

/// 邀请相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvitationError {
    /// 邀请不存在
    #[error("invitation not found")]
    NotFound,

    /// 邀请已过期
    #[error("invitation has expired")]
    Expired,

    /// 邀请已被处理
    #[error("invitation is already {0}")]
    AlreadyResolved(String),
}

/// 验证相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// 无效的邮箱格式
    #[error("invalid email format: {0}")]
    InvalidEmail(String),

    /// 字段为空
    #[error("field '{0}' cannot be empty")]
    EmptyField(String),

    /// 自定义验证错误
    #[error("{0}")]
    Custom(String),
}

/// 存储相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// 操作失败
    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    /// 序列化失败
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// 加密相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// 随机数生成失败
    #[error("random number generation failed: {0}")]
    RngFailed(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(StorageError::Serialization(err.to_string()))
    }
}
