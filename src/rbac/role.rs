//! 角色定义模块
//!
//! 控制台的身份类别。角色之间只存在约定俗成的层级，
//! 超级管理员的“全部放行”只由解析器的显式绕过规则实现。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, PermissionError};

/// 控制台角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// 超级管理员
    SuperAdmin,
    /// 管理员
    Admin,
    /// 团队经理
    Manager,
    /// 推广会员
    Affiliate,
    /// 终端客户
    Customer,
}

impl Role {
    /// 所有内置角色，按约定层级从高到低排列
    pub const ALL: [Role; 5] = [
        Role::SuperAdmin,
        Role::Admin,
        Role::Manager,
        Role::Affiliate,
        Role::Customer,
    ];

    /// 序列化时使用的键名
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Affiliate => "affiliate",
            Role::Customer => "customer",
        }
    }

    /// 面向用户的显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "Super Admin",
            Role::Admin => "Administrator",
            Role::Manager => "Manager",
            Role::Affiliate => "Affiliate",
            Role::Customer => "Customer",
        }
    }

    /// 是否为超级管理员
    pub fn is_super_admin(&self) -> bool {
        matches!(self, Role::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    /// 解析角色键名，同时接受 `-` 分隔（`super-admin`）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| {
                Error::Permission(PermissionError::Unknown {
                    kind: "role",
                    name: s.to_string(),
                })
            })
    }
}
