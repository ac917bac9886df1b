//! # RBAC (Role-Based Access Control) 模块
//!
//! 管理控制台的权限核心，包括：
//!
//! - **权限词汇**: 角色、模块、操作、能力标记和权限路径
//! - **权限树**: 每个角色对每个模块的授权
//! - **解析器**: 失败即拒绝的权限判定
//! - **访问门控**: 在渲染前检查权限
//! - **权限管理**: 启用/禁用模块、授予操作、复制、导入导出、重置
//!
//! ## 基本概念
//!
//! - **Module（模块）**: 控制台的一个功能区，例如 `contacts`、`wallet`
//! - **Action（操作）**: 模块内的标准操作，例如 `view`、`export`
//! - **Flag（标记）**: 模块内命名的布尔能力，例如 `admin.canManageUsers`
//! - **PermissionPath（权限路径）**: `module` 或 `module.capability`，只解析一次
//!
//! ## 使用示例
//!
//! ### 基本权限检查
//!
//! ```rust
//! use crm_access::rbac::{PermissionConfig, PermissionStore, Role};
//!
//! let store = PermissionStore::new(PermissionConfig::default());
//!
//! assert!(store.has_permission(Some(Role::Manager), "contacts.export"));
//! assert!(!store.has_permission(Some(Role::Customer), "admin"));
//!
//! // 未登录时一律拒绝
//! assert!(!store.has_permission(None, "dashboard"));
//! ```
//!
//! ### 复制与导入导出
//!
//! ```rust
//! use crm_access::rbac::{Module, PermissionConfig, PermissionStore, Role};
//!
//! let store = PermissionStore::new(PermissionConfig::default());
//!
//! store.copy_permissions(Role::Manager, Role::Affiliate).unwrap();
//! assert_eq!(
//!     store.role_permissions(Role::Affiliate),
//!     store.role_permissions(Role::Manager)
//! );
//!
//! // 复制后两者互不影响
//! store.set_module_enabled(Role::Affiliate, Module::Reports, false).unwrap();
//! assert!(store.has_permission(Some(Role::Manager), "reports.view"));
//!
//! let json = store.export_permissions().unwrap();
//! store.reset_to_defaults().unwrap();
//! store.import_permissions(&json).unwrap();
//! assert!(!store.has_permission(Some(Role::Affiliate), "reports.view"));
//! ```

mod codec;
mod gate;
mod permission;
mod resolver;
mod role;
mod store;
mod tree;

pub use codec::{decode, decode_str, encode};
pub use gate::{
    ACCESS_DENIED_MESSAGE, AccessContext, AccessGate, GateOutcome, Protected, Render, protect,
};
pub use permission::{Action, Capability, FlagName, Module, PATH_SEPARATOR, PermissionPath};
pub use resolver::{BypassRule, Resolver, resolve};
pub use role::Role;
pub use store::{DEFAULT_STORAGE_KEY, PermissionConfig, PermissionStore};
pub use tree::{FLAG_CATALOG, ModuleGrant, PermissionTree, RolePermissions, catalog_flags};
