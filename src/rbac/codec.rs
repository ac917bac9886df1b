//! 权限树的文本序列化
//!
//! 持久化快照和导出/导入字符串使用同一种 JSON 结构：
//!
//! ```json
//! {
//!   "customer": {
//!     "dashboard": { "enabled": true, "actions": ["view"], "flags": {} },
//!     "admin": { "enabled": false, "actions": [], "flags": {} }
//!   }
//! }
//! ```
//!
//! 解码时先完整校验结构，再构造树；任何结构错误都会整体拒绝。
//! 未识别的角色、模块和字段会原样保留，未识别的操作名会被忽略。
//! 模块值也可以是裸布尔值（旧格式）：`true` 表示启用并授予 `view`。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use tracing::warn;

use super::permission::{Action, FlagName, Module};
use super::role::Role;
use super::tree::{ModuleGrant, PermissionTree, RolePermissions};
use crate::error::ImportError;

const ENABLED: &str = "enabled";
const ACTIONS: &str = "actions";
const FLAGS: &str = "flags";

// ============================================================================
// 编码
// ============================================================================

/// 将权限树编码为规范 JSON
pub fn encode(tree: &PermissionTree) -> Value {
    let mut root = Map::new();
    for (key, value) in tree.extra_entries() {
        root.insert(key.clone(), value.clone());
    }
    for (role, permissions) in tree.roles() {
        root.insert(role.as_str().to_string(), encode_role(permissions));
    }
    Value::Object(root)
}

fn encode_role(permissions: &RolePermissions) -> Value {
    let mut modules = Map::new();
    for (key, value) in permissions.extra_modules() {
        modules.insert(key.clone(), value.clone());
    }
    for (module, grant) in permissions.modules() {
        modules.insert(module.as_str().to_string(), encode_grant(grant));
    }
    Value::Object(modules)
}

fn encode_grant(grant: &ModuleGrant) -> Value {
    let mut object = Map::new();
    for (key, value) in grant.extra_fields() {
        object.insert(key.clone(), value.clone());
    }
    object.insert(ENABLED.to_string(), Value::Bool(grant.is_enabled()));
    object.insert(
        ACTIONS.to_string(),
        Value::Array(
            grant
                .actions()
                .iter()
                .map(|a| Value::String(a.as_str().to_string()))
                .collect(),
        ),
    );
    object.insert(
        FLAGS.to_string(),
        Value::Object(
            grant
                .flags()
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), Value::Bool(*value)))
                .collect(),
        ),
    );
    Value::Object(object)
}

// ============================================================================
// 解码
// ============================================================================

/// 从 JSON 值解码并校验权限树
///
/// 每个内置角色都必须出现在顶层。
pub fn decode(value: Value) -> Result<PermissionTree, ImportError> {
    let Value::Object(root) = value else {
        return Err(ImportError::shape("$", "expected an object keyed by role"));
    };

    let mut tree = PermissionTree::empty();
    for (key, value) in root {
        match role_from_key(&key) {
            Some(role) => {
                let permissions = decode_role(&key, value)?;
                tree.insert_role(role, permissions);
            }
            None => {
                tree.extra.insert(key, value);
            }
        }
    }

    for role in Role::ALL {
        if !tree.contains_role(role) {
            return Err(ImportError::MissingRole(role));
        }
    }

    Ok(tree)
}

/// 从字符串解码并校验权限树
pub fn decode_str(payload: &str) -> Result<PermissionTree, ImportError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| ImportError::Malformed(e.to_string()))?;
    decode(value)
}

fn role_from_key(key: &str) -> Option<Role> {
    Role::ALL.into_iter().find(|role| role.as_str() == key)
}

fn decode_role(location: &str, value: Value) -> Result<RolePermissions, ImportError> {
    let Value::Object(modules) = value else {
        return Err(ImportError::shape(location, "expected an object keyed by module"));
    };

    let mut permissions = RolePermissions::new();
    for (key, value) in modules {
        match Module::from_str(&key) {
            Ok(module) => {
                let grant = decode_grant(&format!("{}.{}", location, key), value)?;
                permissions.insert_module(module, grant);
            }
            Err(_) => {
                permissions.extra.insert(key, value);
            }
        }
    }
    Ok(permissions)
}

fn decode_grant(location: &str, value: Value) -> Result<ModuleGrant, ImportError> {
    let object = match value {
        Value::Bool(true) => return Ok(ModuleGrant::enabled_with([Action::View])),
        Value::Bool(false) => return Ok(ModuleGrant::disabled()),
        Value::Object(object) => object,
        _ => {
            return Err(ImportError::shape(
                location,
                "expected an object or a boolean",
            ));
        }
    };

    let mut enabled = None;
    let mut actions = BTreeSet::new();
    let mut flags = BTreeMap::new();
    let mut extra = BTreeMap::new();

    for (key, value) in object {
        match key.as_str() {
            ENABLED => match value {
                Value::Bool(b) => enabled = Some(b),
                _ => {
                    return Err(ImportError::shape(
                        format!("{}.{}", location, ENABLED),
                        "expected a boolean",
                    ));
                }
            },
            ACTIONS => actions = decode_actions(location, value)?,
            FLAGS => flags = decode_flags(location, value)?,
            _ => {
                extra.insert(key, value);
            }
        }
    }

    let enabled = enabled.ok_or_else(|| {
        ImportError::shape(format!("{}.{}", location, ENABLED), "field is required")
    })?;

    let grant = ModuleGrant::from_parts(enabled, actions, flags, extra);
    grant
        .check()
        .map_err(|message| ImportError::invariant(location, message))?;
    Ok(grant)
}

fn decode_actions(location: &str, value: Value) -> Result<BTreeSet<Action>, ImportError> {
    let Value::Array(items) = value else {
        return Err(ImportError::shape(
            format!("{}.{}", location, ACTIONS),
            "expected an array of action names",
        ));
    };

    let mut actions = BTreeSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let Value::String(name) = item else {
            return Err(ImportError::shape(
                format!("{}.{}[{}]", location, ACTIONS, index),
                "expected a string",
            ));
        };
        match Action::from_str(&name) {
            Ok(action) => {
                actions.insert(action);
            }
            Err(_) => warn!(location, action = %name, "ignoring unknown action"),
        }
    }
    Ok(actions)
}

fn decode_flags(location: &str, value: Value) -> Result<BTreeMap<FlagName, bool>, ImportError> {
    let Value::Object(entries) = value else {
        return Err(ImportError::shape(
            format!("{}.{}", location, FLAGS),
            "expected an object of booleans",
        ));
    };

    let mut flags = BTreeMap::new();
    for (key, value) in entries {
        let flag_location = format!("{}.{}.{}", location, FLAGS, key);
        let flag = FlagName::new(key.as_str())
            .map_err(|_| ImportError::shape(&flag_location, "invalid flag name"))?;
        // 只有字面量布尔值是合法叶子
        let Value::Bool(enabled) = value else {
            return Err(ImportError::shape(&flag_location, "expected a boolean"));
        };
        flags.insert(flag, enabled);
    }
    Ok(flags)
}

// ============================================================================
// serde 集成
// ============================================================================

impl Serialize for PermissionTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        encode(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PermissionTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        decode(value).map_err(serde::de::Error::custom)
    }
}
