//! 权限解析器
//!
//! 给定权限树、当前角色和权限路径，返回是否放行。
//! 解析器是纯函数，没有副作用，可以在每次渲染时调用。
//!
//! 判定规则（按顺序）：
//!
//! 1. 没有角色（未登录）→ 拒绝
//! 2. 角色命中绕过规则（默认是超级管理员）→ 放行，不查询权限树
//! 3. 角色或模块不在树中 → 拒绝
//! 4. 模块路径 → 模块是否启用
//! 5. 操作路径 → 模块启用且操作在列表中
//! 6. 标记路径 → 模块启用且标记为字面量 true
//!
//! 任何无法解析的路径字符串都视为拒绝，绝不 panic 或返回错误。

use tracing::trace;

use super::permission::{Capability, PermissionPath};
use super::role::Role;
use super::tree::PermissionTree;

/// 绕过规则
///
/// 超级管理员“看到一切”的行为只在这里实现，调用方不应自行判断角色名。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BypassRule {
    /// 超级管理员对所有合法路径放行
    #[default]
    SuperAdmin,
    /// 不绕过，所有角色都按权限树判定
    None,
}

impl BypassRule {
    fn applies_to(&self, role: Role) -> bool {
        match self {
            BypassRule::SuperAdmin => role.is_super_admin(),
            BypassRule::None => false,
        }
    }
}

/// 权限解析器
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    bypass: BypassRule,
}

impl Resolver {
    /// 使用指定绕过规则创建解析器
    pub fn new(bypass: BypassRule) -> Self {
        Self { bypass }
    }

    /// 当前绕过规则
    pub fn bypass(&self) -> BypassRule {
        self.bypass
    }

    /// 判定已解析路径
    pub fn resolve(
        &self,
        tree: &PermissionTree,
        role: Option<Role>,
        path: &PermissionPath,
    ) -> bool {
        let Some(role) = role else {
            trace!(%path, "denied: no active role");
            return false;
        };

        if self.bypass.applies_to(role) {
            trace!(%role, %path, "allowed by bypass rule");
            return true;
        }

        let Some(grant) = tree
            .role(role)
            .and_then(|permissions| permissions.module(path.module_name()))
        else {
            trace!(%role, %path, "denied: role or module not configured");
            return false;
        };

        match path.capability() {
            None => grant.is_enabled(),
            Some(Capability::Action(action)) => grant.allows(*action),
            Some(Capability::Flag(flag)) => grant.flag(flag),
        }
    }

    /// 判定点号路径字符串，解析失败时拒绝
    pub fn resolve_str(&self, tree: &PermissionTree, role: Option<Role>, path: &str) -> bool {
        match PermissionPath::parse(path) {
            Ok(parsed) => self.resolve(tree, role, &parsed),
            Err(err) => {
                trace!(path, error = %err, "denied: unparseable permission path");
                false
            }
        }
    }
}

/// 使用默认解析器判定
pub fn resolve(tree: &PermissionTree, role: Role, path: &PermissionPath) -> bool {
    Resolver::default().resolve(tree, Some(role), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::{Action, FlagName, Module, ModuleGrant, RolePermissions};

    fn tree_with_admin_flag() -> PermissionTree {
        let mut tree = PermissionTree::empty();
        tree.insert_role(
            Role::Admin,
            RolePermissions::new().with_module(
                Module::Admin,
                ModuleGrant::enabled_with([Action::View])
                    .with_flag(FlagName::new("canManageUsers").unwrap(), true),
            ),
        );
        tree
    }

    #[test]
    fn test_flag_and_overlong_path() {
        let tree = tree_with_admin_flag();
        let resolver = Resolver::default();
        assert!(resolver.resolve_str(&tree, Some(Role::Admin), "admin.canManageUsers"));
        assert!(!resolver.resolve_str(&tree, Some(Role::Admin), "admin.canManageUsers.extra"));
        assert!(!resolver.resolve_str(&tree, Some(Role::Admin), "admin.canManageRoles"));
    }

    #[test]
    fn test_missing_role_and_module_denied() {
        let tree = tree_with_admin_flag();
        assert!(!resolve(&tree, Role::Customer, &PermissionPath::module(Module::Admin)));
        assert!(!resolve(&tree, Role::Admin, &PermissionPath::module(Module::Wallet)));
        assert!(resolve(&tree, Role::Admin, &PermissionPath::module(Module::Admin)));
    }

    #[test]
    fn test_no_role_denied() {
        let tree = PermissionTree::defaults();
        let resolver = Resolver::default();
        assert!(!resolver.resolve_str(&tree, None, "dashboard"));
        assert!(!resolver.resolve_str(&tree, None, "dashboard.view"));
    }

    #[test]
    fn test_super_admin_bypass() {
        let tree = PermissionTree::empty();
        let resolver = Resolver::default();
        assert!(resolver.resolve_str(&tree, Some(Role::SuperAdmin), "admin.canImpersonate"));
        // 绕过只适用于合法路径
        assert!(!resolver.resolve_str(&tree, Some(Role::SuperAdmin), "admin.x.y"));

        let strict = Resolver::new(BypassRule::None);
        assert!(!strict.resolve_str(&tree, Some(Role::SuperAdmin), "admin.canImpersonate"));
    }

    #[test]
    fn test_false_flag_denied() {
        let mut tree = PermissionTree::empty();
        tree.insert_role(
            Role::Manager,
            RolePermissions::new().with_module(
                Module::Genealogy,
                ModuleGrant::enabled_with([Action::View])
                    .with_flag(FlagName::new("canViewFullTree").unwrap(), false),
            ),
        );
        let resolver = Resolver::default();
        assert!(resolver.resolve_str(&tree, Some(Role::Manager), "genealogy.view"));
        assert!(!resolver.resolve_str(&tree, Some(Role::Manager), "genealogy.canViewFullTree"));
        assert!(!resolver.resolve_str(&tree, Some(Role::Manager), "genealogy.edit"));
    }
}
