//! # crm-access
//!
//! CRM / 多级分销管理控制台的访问控制核心。
//!
//! ## 功能特性
//!
//! - **权限模型**: 角色 × 模块 × 操作，外加模块内的命名能力标记
//! - **权限解析**: 任何缺失、无法解析或未登录的情况都判定为拒绝
//! - **访问门控**: 在渲染前检查权限，支持回退分支和可复用的包装器
//! - **权限管理**: 启用/禁用模块、授予操作、复制角色、导入导出、恢复默认
//! - **会话与身份**: 登录登出，受权限控制的角色切换（模拟）
//! - **用户邀请**: 一次性 token 的邀请创建、接受与取消
//! - **审计日志**: 所有管理操作与身份切换都会产生审计事件
//!
//! ## 权限检查示例
//!
//! ```rust
//! use crm_access::{PermissionConfig, PermissionStore, Role};
//!
//! let store = PermissionStore::new(PermissionConfig::default());
//!
//! assert!(store.has_permission(Some(Role::Manager), "contacts.export"));
//! assert!(!store.has_permission(Some(Role::Customer), "admin.canManageUsers"));
//!
//! // 超级管理员通过解析器的绕过规则获得所有权限
//! assert!(store.has_permission(Some(Role::SuperAdmin), "commissions.canAdjust"));
//! ```
//!
//! ## 访问门控示例
//!
//! ```rust
//! use crm_access::{
//!     ACCESS_DENIED_MESSAGE, AccessContext, AccessGate, PermissionConfig, PermissionStore, Role,
//!     SessionConfig, SessionManager, UserProfile,
//! };
//!
//! let store = PermissionStore::new(PermissionConfig::default());
//! let sessions = SessionManager::new(SessionConfig::default());
//! sessions
//!     .login(UserProfile::new("u7", "Kim", "kim@example.com"), Role::Affiliate)
//!     .unwrap();
//!
//! let session = sessions.current();
//! let ctx = AccessContext::new(&store, session.as_ref());
//!
//! let view = AccessGate::parse("wallet.canWithdraw")
//!     .render(&ctx, || "withdraw form", Some(|| ACCESS_DENIED_MESSAGE));
//! assert_eq!(view.into_option(), Some("withdraw form"));
//! ```
//!
//! ## 持久化示例
//!
//! ```rust
//! use crm_access::{FileLocalStorage, Module, PermissionConfig, PermissionStore, Role};
//! use std::sync::Arc;
//!
//! let dir = std::env::temp_dir().join("crm_access_doc");
//! let storage = Arc::new(FileLocalStorage::new(&dir).unwrap());
//!
//! let store = PermissionStore::with_storage(PermissionConfig::default(), storage.clone());
//! store.set_module_enabled(Role::Customer, Module::Reports, true).unwrap();
//!
//! // 重启后恢复
//! let restored = PermissionStore::load(PermissionConfig::default(), storage);
//! assert!(restored.has_module_access(Some(Role::Customer), Module::Reports));
//! # let _ = std::fs::remove_dir_all(&dir);
//! ```

pub mod audit;
pub mod error;
pub mod invitation;
pub mod random;
pub mod rbac;
pub mod session;
pub mod storage;

pub use error::{Error, Result};

// ============================================================================
// 权限核心
// ============================================================================

pub use rbac::{
    ACCESS_DENIED_MESSAGE, AccessContext, AccessGate, Action, BypassRule, Capability, FlagName,
    GateOutcome, Module, ModuleGrant, PermissionConfig, PermissionPath, PermissionStore,
    PermissionTree, Protected, Render, Resolver, Role, RolePermissions, protect,
};

// ============================================================================
// 会话
// ============================================================================

pub use session::{
    OriginalIdentity, Session, SessionConfig, SessionManager, SwitchTarget, UserProfile,
};

// ============================================================================
// 邀请
// ============================================================================

pub use invitation::{Invitation, InvitationConfig, InvitationManager, InvitationStatus};

// ============================================================================
// 存储与审计
// ============================================================================

pub use audit::{AuditLogger, EventSeverity, EventType, InMemoryAuditLogger, SecurityEvent};
pub use storage::{FileLocalStorage, InMemoryLocalStorage, LocalStorage};

// ============================================================================
// 随机数
// ============================================================================

pub use random::{
    generate_invitation_token, generate_random_base64_url, generate_random_bytes,
    generate_random_hex, generate_session_id,
};
