//! 权限词汇模块
//!
//! 定义模块（功能区）、操作、能力标记以及点号权限路径。
//!
//! 权限路径只在边界处解析一次，之后都以强类型的 [`PermissionPath`] 流转：
//!
//! ```rust
//! use crm_access::rbac::{Action, Module, PermissionPath};
//!
//! let path = PermissionPath::parse("contacts.edit").unwrap();
//! assert_eq!(path.module_name(), Module::Contacts);
//! assert_eq!(path, PermissionPath::action(Module::Contacts, Action::Edit));
//!
//! // 指向布尔叶子之后的路径无效
//! assert!(PermissionPath::parse("admin.canManageUsers.extra").is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, PermissionError, Result};

/// 路径分隔符
pub const PATH_SEPARATOR: char = '.';

// ============================================================================
// Module
// ============================================================================

/// 功能模块
///
/// 每个模块可以针对角色单独启用或禁用
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    /// 仪表盘
    Dashboard,
    /// 联系人
    Contacts,
    /// 线索管道
    Leads,
    /// 推广会员
    Affiliates,
    /// 族谱（下线树）
    Genealogy,
    /// 佣金
    Commissions,
    /// 钱包
    Wallet,
    /// 报表
    Reports,
    /// 营销
    Marketing,
    /// 设置
    Settings,
    /// 后台管理
    Admin,
}

impl Module {
    /// 所有模块
    pub const ALL: [Module; 11] = [
        Module::Dashboard,
        Module::Contacts,
        Module::Leads,
        Module::Affiliates,
        Module::Genealogy,
        Module::Commissions,
        Module::Wallet,
        Module::Reports,
        Module::Marketing,
        Module::Settings,
        Module::Admin,
    ];

    /// 模块键名
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Dashboard => "dashboard",
            Module::Contacts => "contacts",
            Module::Leads => "leads",
            Module::Affiliates => "affiliates",
            Module::Genealogy => "genealogy",
            Module::Commissions => "commissions",
            Module::Wallet => "wallet",
            Module::Reports => "reports",
            Module::Marketing => "marketing",
            Module::Settings => "settings",
            Module::Admin => "admin",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Module {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Module::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| unknown("module", s))
    }
}

// ============================================================================
// Action
// ============================================================================

/// 模块内的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Manage,
    Export,
    Approve,
}

impl Action {
    /// 所有操作
    pub const ALL: [Action; 7] = [
        Action::View,
        Action::Create,
        Action::Edit,
        Action::Delete,
        Action::Manage,
        Action::Export,
        Action::Approve,
    ];

    /// 操作键名
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Manage => "manage",
            Action::Export => "export",
            Action::Approve => "approve",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| unknown("action", s))
    }
}

// ============================================================================
// FlagName
// ============================================================================

/// 能力标记名称，例如 `canManageUsers`
///
/// 标记名来自配置数据，因此在构造时校验一次：
/// 以 ASCII 字母开头，其余为字母、数字或下划线，且不能与操作名重名。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FlagName(String);

impl FlagName {
    /// 创建并校验标记名
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_flag_name(&name).map_err(|reason| {
            Error::Permission(PermissionError::InvalidPath {
                path: name.clone(),
                reason: reason.to_string(),
            })
        })?;
        Ok(Self(name))
    }

    /// 内置标记名，不经过运行时校验
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(validate_flag_name(name).is_ok(), "bad built-in flag {name}");
        Self(name.to_string())
    }

    /// 标记名字符串
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_flag_name(name: &str) -> std::result::Result<(), &'static str> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err("flag name is empty"),
        Some(c) if !c.is_ascii_alphabetic() => {
            return Err("flag name must start with an ASCII letter");
        }
        Some(_) => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("flag name may only contain ASCII letters, digits and '_'");
    }
    if Action::from_str(name).is_ok() {
        return Err("flag name collides with an action name");
    }
    Ok(())
}

impl fmt::Display for FlagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FlagName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        FlagName::new(value)
    }
}

impl From<FlagName> for String {
    fn from(flag: FlagName) -> Self {
        flag.0
    }
}

// ============================================================================
// PermissionPath
// ============================================================================

/// 路径的第二段：操作或能力标记
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    Action(Action),
    Flag(FlagName),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Action(action) => write!(f, "{}", action),
            Capability::Flag(flag) => write!(f, "{}", flag),
        }
    }
}

/// 已解析的权限路径：`module` 或 `module.capability`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionPath {
    module: Module,
    capability: Option<Capability>,
}

impl PermissionPath {
    /// 模块访问路径
    pub fn module(module: Module) -> Self {
        Self {
            module,
            capability: None,
        }
    }

    /// 模块操作路径
    pub fn action(module: Module, action: Action) -> Self {
        Self {
            module,
            capability: Some(Capability::Action(action)),
        }
    }

    /// 能力标记路径
    pub fn flag(module: Module, flag: FlagName) -> Self {
        Self {
            module,
            capability: Some(Capability::Flag(flag)),
        }
    }

    /// 解析点号路径
    ///
    /// 第二段先按操作名匹配，否则按能力标记名校验。
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            Error::Permission(PermissionError::InvalidPath {
                path: path.to_string(),
                reason: reason.to_string(),
            })
        };

        if path.is_empty() {
            return Err(invalid("path is empty"));
        }

        let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("path contains an empty segment"));
        }
        if segments.len() > 2 {
            return Err(invalid("path continues past a leaf"));
        }

        let module = Module::from_str(segments[0]).map_err(|_| invalid("unknown module"))?;
        let capability = match segments.get(1) {
            None => None,
            Some(segment) => Some(match Action::from_str(segment) {
                Ok(action) => Capability::Action(action),
                Err(_) => Capability::Flag(FlagName::new(*segment)?),
            }),
        };

        Ok(Self { module, capability })
    }

    /// 所属模块
    pub fn module_name(&self) -> Module {
        self.module
    }

    /// 第二段（如果有）
    pub fn capability(&self) -> Option<&Capability> {
        self.capability.as_ref()
    }

    /// 是否只是模块访问路径
    pub fn is_module_path(&self) -> bool {
        self.capability.is_none()
    }
}

impl fmt::Display for PermissionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.capability {
            Some(capability) => write!(f, "{}{}{}", self.module, PATH_SEPARATOR, capability),
            None => write!(f, "{}", self.module),
        }
    }
}

impl FromStr for PermissionPath {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        PermissionPath::parse(s)
    }
}

fn unknown(kind: &'static str, name: &str) -> Error {
    Error::Permission(PermissionError::Unknown {
        kind,
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_module_path() {
        let path = PermissionPath::parse("wallet").unwrap();
        assert_eq!(path.module_name(), Module::Wallet);
        assert!(path.is_module_path());
        assert_eq!(path.to_string(), "wallet");
    }

    #[test]
    fn test_parse_action_and_flag() {
        let path = PermissionPath::parse("leads.delete").unwrap();
        assert_eq!(path.capability(), Some(&Capability::Action(Action::Delete)));

        let path = PermissionPath::parse("admin.canManageUsers").unwrap();
        let flag = FlagName::new("canManageUsers").unwrap();
        assert_eq!(path, PermissionPath::flag(Module::Admin, flag));
        assert_eq!(path.to_string(), "admin.canManageUsers");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            ".",
            "admin.",
            ".admin",
            "admin..view",
            "inventory.view",
            "admin.canManageUsers.extra",
            "admin.1flag",
            "admin.can-manage",
        ] {
            assert!(PermissionPath::parse(bad).is_err(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_flag_name_rules() {
        assert!(FlagName::new("canViewBusiness").is_ok());
        assert!(FlagName::new("can_export_2").is_ok());
        assert!(FlagName::new("").is_err());
        assert!(FlagName::new("view").is_err());
        assert!(FlagName::new("_hidden").is_err());
    }

    #[test]
    fn test_flag_name_serde() {
        let flag: FlagName = serde_json::from_str("\"canWithdraw\"").unwrap();
        assert_eq!(flag.as_str(), "canWithdraw");
        assert!(serde_json::from_str::<FlagName>("\"bad name\"").is_err());
    }
}
