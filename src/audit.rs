//! 审计日志模块
//!
//! 记录权限管理、会话和邀请相关的事件，包括：
//!
//! - **事件枚举**: 定义各种需要留痕的操作
//! - **审计日志 Trait**: 定义日志记录接口
//! - **内存实现**: 用于测试和开发的简单实现
//!
//! ## 使用示例
//!
//! ```rust
//! use crm_access::audit::{AuditLogger, EventType, InMemoryAuditLogger, SecurityEvent};
//! use crm_access::rbac::{Module, Role};
//!
//! let logger = InMemoryAuditLogger::new();
//!
//! logger.log(SecurityEvent::module_toggled(Role::Customer, Module::Admin, false));
//! logger.log(SecurityEvent::permissions_reset());
//!
//! assert_eq!(logger.event_count(), 2);
//! assert_eq!(logger.get_events_by_type(&EventType::PermissionsReset).len(), 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::rbac::{Module, Role};

/// 事件严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EventSeverity {
    /// 一般信息
    #[default]
    Info,
    /// 警告
    Warning,
    /// 严重
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Info => write!(f, "INFO"),
            EventSeverity::Warning => write!(f, "WARNING"),
            EventSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// 事件类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// 模块或操作授权变更
    PermissionChanged,
    /// 角色子树被整体替换
    RolePermissionsReplaced,
    /// 角色权限复制
    PermissionsCopied,
    /// 权限树导入
    PermissionsImported,
    /// 恢复默认配置
    PermissionsReset,
    /// 登录
    SessionCreated,
    /// 登出
    SessionEnded,
    /// 开始模拟
    ImpersonationStarted,
    /// 结束模拟
    ImpersonationEnded,
    /// 邀请创建
    InvitationCreated,
    /// 邀请接受
    InvitationAccepted,
    /// 邀请取消
    InvitationCancelled,
    /// 邀请过期
    InvitationExpired,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::PermissionChanged => "permission_changed",
            EventType::RolePermissionsReplaced => "role_permissions_replaced",
            EventType::PermissionsCopied => "permissions_copied",
            EventType::PermissionsImported => "permissions_imported",
            EventType::PermissionsReset => "permissions_reset",
            EventType::SessionCreated => "session_created",
            EventType::SessionEnded => "session_ended",
            EventType::ImpersonationStarted => "impersonation_started",
            EventType::ImpersonationEnded => "impersonation_ended",
            EventType::InvitationCreated => "invitation_created",
            EventType::InvitationAccepted => "invitation_accepted",
            EventType::InvitationCancelled => "invitation_cancelled",
            EventType::InvitationExpired => "invitation_expired",
        };
        f.write_str(name)
    }
}

/// 审计事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// 事件 ID
    pub id: String,
    /// 事件类型
    pub event_type: EventType,
    /// 严重程度
    pub severity: EventSeverity,
    /// 用户 ID（如果适用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// 事件消息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 额外详情
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
    /// 事件时间
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    /// 创建新的事件
    pub fn new(event_type: EventType, severity: EventSeverity) -> Self {
        Self {
            id: generate_event_id(),
            event_type,
            severity,
            user_id: None,
            message: None,
            details: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    // ========================================================================
    // 便捷构造方法
    // ========================================================================

    /// 模块启用/禁用
    pub fn module_toggled(role: Role, module: Module, enabled: bool) -> Self {
        Self::new(EventType::PermissionChanged, EventSeverity::Info)
            .with_detail("role", role.as_str())
            .with_detail("module", module.as_str())
            .with_detail("enabled", enabled.to_string())
    }

    /// 操作或能力标记变更，`capability` 为路径第二段
    pub fn capability_changed(role: Role, module: Module, capability: &str, enabled: bool) -> Self {
        Self::new(EventType::PermissionChanged, EventSeverity::Info)
            .with_detail("role", role.as_str())
            .with_detail("module", module.as_str())
            .with_detail("capability", capability)
            .with_detail("enabled", enabled.to_string())
    }

    /// 角色子树整体替换
    pub fn role_replaced(role: Role) -> Self {
        Self::new(EventType::RolePermissionsReplaced, EventSeverity::Info)
            .with_detail("role", role.as_str())
    }

    /// 权限复制
    pub fn permissions_copied(from: Role, to: Role) -> Self {
        Self::new(EventType::PermissionsCopied, EventSeverity::Warning)
            .with_detail("from", from.as_str())
            .with_detail("to", to.as_str())
            .with_message(format!("Permissions of '{}' replaced by '{}'", to, from))
    }

    /// 权限树导入
    pub fn permissions_imported() -> Self {
        Self::new(EventType::PermissionsImported, EventSeverity::Warning)
            .with_message("Permission tree replaced by import")
    }

    /// 恢复默认
    pub fn permissions_reset() -> Self {
        Self::new(EventType::PermissionsReset, EventSeverity::Warning)
            .with_message("Permission tree reset to defaults")
    }

    /// 登录
    pub fn session_created(user_id: impl Into<String>, role: Role) -> Self {
        Self::new(EventType::SessionCreated, EventSeverity::Info)
            .with_user_id(user_id)
            .with_detail("role", role.as_str())
    }

    /// 登出
    pub fn session_ended(user_id: impl Into<String>) -> Self {
        Self::new(EventType::SessionEnded, EventSeverity::Info).with_user_id(user_id)
    }

    /// 开始模拟，`user_id` 为原始身份
    pub fn impersonation_started(user_id: impl Into<String>, target_role: Role) -> Self {
        Self::new(EventType::ImpersonationStarted, EventSeverity::Critical)
            .with_user_id(user_id)
            .with_detail("target_role", target_role.as_str())
    }

    /// 结束模拟
    pub fn impersonation_ended(user_id: impl Into<String>) -> Self {
        Self::new(EventType::ImpersonationEnded, EventSeverity::Info).with_user_id(user_id)
    }

    /// 邀请状态事件
    pub fn invitation(event_type: EventType, email: impl Into<String>, role: Role) -> Self {
        Self::new(event_type, EventSeverity::Info)
            .with_detail("email", email.into())
            .with_detail("role", role.as_str())
    }

    // ========================================================================
    // Builder 方法
    // ========================================================================

    /// 设置用户 ID
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// 设置消息
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// 添加详情
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// 事件类型名称
    pub fn event_name(&self) -> String {
        self.event_type.to_string()
    }
}

fn generate_event_id() -> String {
    use crate::random::generate_random_hex;
    format!(
        "evt_{}",
        generate_random_hex(16).unwrap_or_else(|_| "unknown".to_string())
    )
}

// ============================================================================
// AuditLogger Trait
// ============================================================================

/// 审计日志记录器 trait
pub trait AuditLogger: Send + Sync {
    /// 记录事件
    fn log(&self, event: SecurityEvent);
}

// ============================================================================
// InMemoryAuditLogger
// ============================================================================

/// 内存审计日志记录器
///
/// 用于测试和开发环境
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditLogger {
    events: Arc<RwLock<Vec<SecurityEvent>>>,
    max_events: Option<usize>,
}

impl InMemoryAuditLogger {
    /// 创建新的内存日志记录器
    pub fn new() -> Self {
        Self::default()
    }

    /// 只保留最近 `max` 条事件
    pub fn with_max_events(max: usize) -> Self {
        Self {
            events: Arc::default(),
            max_events: Some(max),
        }
    }

    /// 获取所有事件
    pub fn get_events(&self) -> Vec<SecurityEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }

    /// 事件数量
    pub fn event_count(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    /// 按用户 ID 获取事件
    pub fn get_events_by_user(&self, user_id: &str) -> Vec<SecurityEvent> {
        self.filter(|e| e.user_id.as_deref() == Some(user_id))
    }

    /// 按事件类型获取事件
    pub fn get_events_by_type(&self, event_type: &EventType) -> Vec<SecurityEvent> {
        self.filter(|e| &e.event_type == event_type)
    }

    /// 清空所有事件
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.write() {
            events.clear();
        }
    }

    fn filter(&self, predicate: impl Fn(&SecurityEvent) -> bool) -> Vec<SecurityEvent> {
        self.events
            .read()
            .map(|events| events.iter().filter(|e| predicate(*e)).cloned().collect())
            .unwrap_or_default()
    }
}

impl AuditLogger for InMemoryAuditLogger {
    fn log(&self, event: SecurityEvent) {
        let Ok(mut events) = self.events.write() else {
            return;
        };
        events.push(event);
        if let Some(max) = self.max_events {
            let overflow = events.len().saturating_sub(max);
            if overflow > 0 {
                events.drain(..overflow);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builders() {
        let event = SecurityEvent::permissions_copied(Role::Admin, Role::Manager);
        assert_eq!(event.event_type, EventType::PermissionsCopied);
        assert_eq!(event.details.get("from").map(String::as_str), Some("admin"));
        assert_eq!(event.details.get("to").map(String::as_str), Some("manager"));
        assert!(event.id.starts_with("evt_"));
        assert_eq!(event.event_name(), "permissions_copied");
    }

    #[test]
    fn test_in_memory_logger_filters() {
        let logger = InMemoryAuditLogger::new();
        logger.log(SecurityEvent::session_created("u1", Role::Admin));
        logger.log(SecurityEvent::session_ended("u1"));
        logger.log(SecurityEvent::session_created("u2", Role::Customer));

        assert_eq!(logger.event_count(), 3);
        assert_eq!(logger.get_events_by_user("u1").len(), 2);
        assert_eq!(
            logger.get_events_by_type(&EventType::SessionCreated).len(),
            2
        );

        logger.clear();
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_max_events() {
        let logger = InMemoryAuditLogger::with_max_events(2);
        logger.log(SecurityEvent::permissions_reset());
        logger.log(SecurityEvent::permissions_imported());
        logger.log(SecurityEvent::session_ended("u1"));

        let events = logger.get_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::PermissionsImported);
    }

    #[test]
    fn test_event_serialization() {
        let event = SecurityEvent::impersonation_started("u1", Role::Customer);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ImpersonationStarted"));
        assert!(json.contains("target_role"));
    }
}
