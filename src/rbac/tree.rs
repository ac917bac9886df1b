//! 权限树模块
//!
//! 按角色保存“模块 → 授权”的嵌套结构，并提供内置默认配置。
//!
//! 树本身是普通的值类型；共享和原子替换由 [`PermissionStore`](super::PermissionStore)
//! 负责。未识别的键（未来版本新增的角色、模块或字段）原样保留，
//! 以便导出时不丢失数据。

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::permission::{Action, FlagName, Module};
use super::role::Role;
use crate::error::PermissionError;

// ============================================================================
// ModuleGrant
// ============================================================================

/// 某个角色在某个模块上的授权
///
/// 不变量：禁用的模块没有任何操作，也没有为 true 的能力标记。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModuleGrant {
    enabled: bool,
    actions: BTreeSet<Action>,
    flags: BTreeMap<FlagName, bool>,
    pub(crate) extra: BTreeMap<String, Value>,
}

impl ModuleGrant {
    /// 禁用的模块
    pub fn disabled() -> Self {
        Self::default()
    }

    /// 启用模块并授予给定操作
    pub fn enabled_with(actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            enabled: true,
            actions: actions.into_iter().collect(),
            ..Self::default()
        }
    }

    /// 启用模块并授予全部操作
    pub fn full() -> Self {
        Self::enabled_with(Action::ALL)
    }

    /// 设置能力标记（构建用）
    ///
    /// 禁用模块上的 true 标记会被忽略。
    pub fn with_flag(mut self, flag: FlagName, value: bool) -> Self {
        if self.enabled || !value {
            self.flags.insert(flag, value);
        }
        self
    }

    /// 模块是否启用
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 是否允许某个操作
    pub fn allows(&self, action: Action) -> bool {
        self.enabled && self.actions.contains(&action)
    }

    /// 读取能力标记，只有字面量 true 且模块启用时才为 true
    pub fn flag(&self, flag: &FlagName) -> bool {
        self.enabled && self.flags.get(flag).copied().unwrap_or(false)
    }

    /// 已授予的操作
    pub fn actions(&self) -> &BTreeSet<Action> {
        &self.actions
    }

    /// 所有能力标记
    pub fn flags(&self) -> &BTreeMap<FlagName, bool> {
        &self.flags
    }

    /// 保留的未知字段
    pub fn extra_fields(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    pub(crate) fn from_parts(
        enabled: bool,
        actions: BTreeSet<Action>,
        flags: BTreeMap<FlagName, bool>,
        extra: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            enabled,
            actions,
            flags,
            extra,
        }
    }

    /// 启用模块；已经启用时保持原样
    pub(crate) fn enable(&mut self, defaults: &[Action]) {
        if !self.enabled {
            self.enabled = true;
            self.actions = defaults.iter().copied().collect();
            self.flags.clear();
        }
    }

    /// 禁用模块并一次性清空所有操作与标记
    pub(crate) fn disable(&mut self) {
        self.enabled = false;
        self.actions.clear();
        self.flags.clear();
    }

    /// 修改操作，模块未启用时返回 false
    pub(crate) fn set_action(&mut self, action: Action, allowed: bool) -> bool {
        if !self.enabled {
            return false;
        }
        if allowed {
            self.actions.insert(action);
        } else {
            self.actions.remove(&action);
        }
        true
    }

    /// 修改能力标记，模块未启用时返回 false
    pub(crate) fn set_flag(&mut self, flag: FlagName, value: bool) -> bool {
        if !self.enabled {
            return false;
        }
        self.flags.insert(flag, value);
        true
    }

    /// 检查不变量
    pub(crate) fn check(&self) -> Result<(), &'static str> {
        if !self.enabled && !self.actions.is_empty() {
            return Err("disabled module still grants actions");
        }
        if !self.enabled && self.flags.values().any(|v| *v) {
            return Err("disabled module still grants flags");
        }
        Ok(())
    }
}

// ============================================================================
// RolePermissions
// ============================================================================

/// 单个角色的权限子树
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RolePermissions {
    modules: BTreeMap<Module, ModuleGrant>,
    pub(crate) extra: BTreeMap<String, Value>,
}

impl RolePermissions {
    /// 创建空子树（所有模块都视为禁用）
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置模块授权（构建用）
    pub fn with_module(mut self, module: Module, grant: ModuleGrant) -> Self {
        self.modules.insert(module, grant);
        self
    }

    /// 获取模块授权
    pub fn module(&self, module: Module) -> Option<&ModuleGrant> {
        self.modules.get(&module)
    }

    /// 模块是否启用
    pub fn is_enabled(&self, module: Module) -> bool {
        self.module(module).is_some_and(ModuleGrant::is_enabled)
    }

    /// 遍历所有模块授权
    pub fn modules(&self) -> impl Iterator<Item = (Module, &ModuleGrant)> {
        self.modules.iter().map(|(m, g)| (*m, g))
    }

    /// 已启用的模块列表
    ///
    /// 侧边栏等导航组件用它决定显示哪些入口
    pub fn enabled_modules(&self) -> Vec<Module> {
        self.modules
            .iter()
            .filter(|(_, g)| g.is_enabled())
            .map(|(m, _)| *m)
            .collect()
    }

    /// 保留的未知模块
    pub fn extra_modules(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    /// 获取（必要时创建）模块授权的可变引用
    pub(crate) fn module_entry(&mut self, module: Module) -> &mut ModuleGrant {
        self.modules.entry(module).or_default()
    }

    pub(crate) fn insert_module(&mut self, module: Module, grant: ModuleGrant) {
        self.modules.insert(module, grant);
    }

    /// 检查所有模块的不变量
    pub fn validate(&self, role: Role) -> Result<(), PermissionError> {
        for (module, grant) in &self.modules {
            grant
                .check()
                .map_err(|message| PermissionError::InvalidSubtree {
                    role,
                    message: format!("{}: {}", module, message),
                })?;
        }
        Ok(())
    }
}

// ============================================================================
// PermissionTree
// ============================================================================

/// 全部角色的权限树
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PermissionTree {
    roles: BTreeMap<Role, RolePermissions>,
    pub(crate) extra: BTreeMap<String, Value>,
}

impl PermissionTree {
    /// 创建空树（所有角色都没有任何权限）
    pub fn empty() -> Self {
        Self::default()
    }

    /// 内置默认配置
    pub fn defaults() -> Self {
        let mut tree = Self::empty();
        for role in Role::ALL {
            tree.insert_role(role, default_role_permissions(role));
        }
        tree
    }

    /// 获取角色子树；不存在时返回 None，调用方应视为无权限
    pub fn role(&self, role: Role) -> Option<&RolePermissions> {
        self.roles.get(&role)
    }

    /// 是否包含角色
    pub fn contains_role(&self, role: Role) -> bool {
        self.roles.contains_key(&role)
    }

    /// 遍历所有角色
    pub fn roles(&self) -> impl Iterator<Item = (Role, &RolePermissions)> {
        self.roles.iter().map(|(r, p)| (*r, p))
    }

    /// 整体替换某个角色的子树，返回旧子树
    pub fn insert_role(
        &mut self,
        role: Role,
        permissions: RolePermissions,
    ) -> Option<RolePermissions> {
        self.roles.insert(role, permissions)
    }

    /// 移除某个角色的子树
    pub fn remove_role(&mut self, role: Role) -> Option<RolePermissions> {
        self.roles.remove(&role)
    }

    /// 保留的未知顶层条目
    pub fn extra_entries(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    /// 检查整棵树的不变量
    pub fn validate(&self) -> Result<(), PermissionError> {
        for (role, permissions) in &self.roles {
            permissions.validate(*role)?;
        }
        Ok(())
    }
}

// ============================================================================
// 默认配置
// ============================================================================

/// 每个模块支持的能力标记
pub const FLAG_CATALOG: &[(Module, &[&str])] = &[
    (Module::Dashboard, &["canViewBusiness", "canViewTeamStats"]),
    (Module::Contacts, &["canImport", "canAssign"]),
    (Module::Leads, &["canAssign"]),
    (Module::Affiliates, &["canApproveApplications"]),
    (Module::Genealogy, &["canViewFullTree"]),
    (Module::Commissions, &["canApprovePayouts", "canAdjust"]),
    (Module::Wallet, &["canWithdraw", "canTransfer"]),
    (Module::Reports, &["canViewFinancials"]),
    (Module::Marketing, &["canSendCampaigns"]),
    (Module::Settings, &["canEditBranding"]),
    (
        Module::Admin,
        &[
            "canManageUsers",
            "canInviteUsers",
            "canManageRoles",
            "canImpersonate",
        ],
    ),
];

/// 内置的模块能力标记
pub fn catalog_flags(module: Module) -> impl Iterator<Item = FlagName> {
    FLAG_CATALOG
        .iter()
        .filter(move |(m, _)| *m == module)
        .flat_map(|(_, flags)| flags.iter().map(|f| FlagName::from_static(*f)))
}

fn grant(actions: &[Action], flags: &[(&'static str, bool)]) -> ModuleGrant {
    flags.iter().fold(
        ModuleGrant::enabled_with(actions.iter().copied()),
        |grant, (name, value)| grant.with_flag(FlagName::from_static(*name), *value),
    )
}

fn everything(module: Module) -> ModuleGrant {
    catalog_flags(module).fold(ModuleGrant::full(), |grant, flag| grant.with_flag(flag, true))
}

fn default_role_permissions(role: Role) -> RolePermissions {
    use Action::*;

    // 先把所有模块置为禁用，再按角色打开
    let mut permissions = Module::ALL
        .into_iter()
        .fold(RolePermissions::new(), |p, m| p.with_module(m, ModuleGrant::disabled()));

    let enabled: Vec<(Module, ModuleGrant)> = match role {
        Role::SuperAdmin => Module::ALL.into_iter().map(|m| (m, everything(m))).collect(),
        Role::Admin => Module::ALL
            .into_iter()
            .map(|m| match m {
                Module::Admin => (
                    m,
                    grant(
                        &Action::ALL,
                        &[
                            ("canManageUsers", true),
                            ("canInviteUsers", true),
                            ("canManageRoles", false),
                            ("canImpersonate", false),
                        ],
                    ),
                ),
                Module::Commissions => (
                    m,
                    grant(
                        &Action::ALL,
                        &[("canApprovePayouts", true), ("canAdjust", false)],
                    ),
                ),
                other => (other, everything(other)),
            })
            .collect(),
        Role::Manager => vec![
            (
                Module::Dashboard,
                grant(&[View], &[("canViewBusiness", true), ("canViewTeamStats", true)]),
            ),
            (
                Module::Contacts,
                grant(&[View, Create, Edit, Export], &[("canAssign", true)]),
            ),
            (Module::Leads, grant(&[View, Create, Edit], &[("canAssign", true)])),
            (Module::Affiliates, grant(&[View], &[])),
            (Module::Genealogy, grant(&[View], &[("canViewFullTree", false)])),
            (Module::Commissions, grant(&[View], &[])),
            (Module::Wallet, grant(&[View], &[])),
            (Module::Reports, grant(&[View, Export], &[])),
            (Module::Marketing, grant(&[View, Create], &[])),
            (Module::Settings, grant(&[View], &[])),
        ],
        Role::Affiliate => vec![
            (Module::Dashboard, grant(&[View], &[("canViewBusiness", true)])),
            (Module::Contacts, grant(&[View, Create, Edit], &[])),
            (Module::Leads, grant(&[View, Create, Edit], &[])),
            (Module::Genealogy, grant(&[View], &[])),
            (Module::Commissions, grant(&[View], &[])),
            (Module::Wallet, grant(&[View], &[("canWithdraw", true)])),
            (Module::Marketing, grant(&[View], &[])),
            (Module::Settings, grant(&[View, Edit], &[])),
        ],
        Role::Customer => vec![
            (Module::Dashboard, grant(&[View], &[])),
            (Module::Wallet, grant(&[View], &[])),
            (Module::Settings, grant(&[View, Edit], &[])),
        ],
    };

    for (module, grant) in enabled {
        permissions.insert_module(module, grant);
    }
    permissions
}
