//! 用户邀请模块
//!
//! 管理员向邮箱发出带角色的邀请，受邀者通过一次性 token 接受邀请。
//!
//! ## 工作流程
//!
//! 1. 管理员为邮箱和角色创建邀请
//! 2. 系统生成一次性 token，应用层把它放进邀请链接发出
//! 3. 受邀者打开链接，系统校验 token 并把邀请标记为已接受
//! 4. 邀请只能从待处理状态转移一次，之后不能再次使用
//!
//! ## 示例
//!
//! ```rust
//! use crm_access::invitation::{InvitationConfig, InvitationManager, InvitationStatus};
//! use crm_access::rbac::Role;
//!
//! let manager = InvitationManager::new(InvitationConfig::default());
//!
//! let invitation = manager.create("admin-1", "new.user@example.com", Role::Affiliate).unwrap();
//! assert_eq!(invitation.status, InvitationStatus::Pending);
//!
//! let accepted = manager.accept(&invitation.token).unwrap();
//! assert_eq!(accepted.status, InvitationStatus::Accepted);
//!
//! // 不能重复接受
//! assert!(manager.accept(&invitation.token).is_err());
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::audit::{AuditLogger, EventType, SecurityEvent};
use crate::error::{Error, InvitationError, Result, StorageError, ValidationError};
use crate::random::generate_invitation_token;
use crate::rbac::Role;

// ============================================================================
// 配置
// ============================================================================

/// 邀请配置
#[derive(Debug, Clone)]
pub struct InvitationConfig {
    /// 邀请有效期
    pub ttl: std::time::Duration,

    /// Token 长度（字节数）
    pub token_length: usize,

    /// 每个邮箱最多允许的待处理邀请数量
    /// 超过此数量时，最旧的邀请会被标记为过期（0 表示不限制）
    pub max_pending_per_email: usize,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            ttl: std::time::Duration::from_secs(7 * 24 * 60 * 60), // 7 天
            token_length: 24,
            max_pending_per_email: 3,
        }
    }
}

impl InvitationConfig {
    /// 创建新配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置有效期
    pub fn with_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// 设置 token 长度
    pub fn with_token_length(mut self, length: usize) -> Self {
        self.token_length = length;
        self
    }

    /// 设置每个邮箱的待处理邀请上限
    pub fn with_max_pending_per_email(mut self, max: usize) -> Self {
        self.max_pending_per_email = max;
        self
    }
}

// ============================================================================
// 数据结构
// ============================================================================

/// 邀请状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
    Cancelled,
}

impl InvitationStatus {
    /// 获取状态名称
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Expired => "expired",
            InvitationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 邀请
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    /// 一次性 token
    pub token: String,

    /// 受邀邮箱（小写）
    pub email: String,

    /// 接受后授予的角色
    pub role: Role,

    /// 邀请人 ID
    pub invited_by: String,

    /// 当前状态
    pub status: InvitationStatus,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 过期时间
    pub expires_at: DateTime<Utc>,

    /// 接受或取消的时间
    pub responded_at: Option<DateTime<Utc>>,
}

impl Invitation {
    /// 检查是否已超过有效期
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// 是否仍可接受
    pub fn is_pending(&self) -> bool {
        self.status == InvitationStatus::Pending && !self.is_expired()
    }
}

// ============================================================================
// InvitationManager
// ============================================================================

/// 邀请簿
///
/// 按 token 索引，另存一份创建顺序。
#[derive(Debug, Default)]
struct InvitationBook {
    by_token: HashMap<String, Invitation>,
    order: Vec<String>,
}

impl InvitationBook {
    fn insert(&mut self, invitation: Invitation) -> Result<()> {
        if self.by_token.contains_key(&invitation.token) {
            return Err(Error::internal("duplicate invitation token"));
        }
        self.order.push(invitation.token.clone());
        self.by_token.insert(invitation.token.clone(), invitation);
        Ok(())
    }

    fn get(&self, token: &str) -> Option<&Invitation> {
        self.by_token.get(token)
    }

    fn get_mut(&mut self, token: &str) -> Result<&mut Invitation> {
        self.by_token
            .get_mut(token)
            .ok_or_else(|| InvitationError::NotFound.into())
    }

    /// 按创建顺序遍历
    fn iter(&self) -> impl Iterator<Item = &Invitation> {
        self.order.iter().filter_map(|token| self.by_token.get(token))
    }

    /// 满足条件的 token，按创建顺序排列
    fn tokens_where(&self, predicate: impl Fn(&Invitation) -> bool) -> Vec<String> {
        self.iter()
            .filter(|i| predicate(i))
            .map(|i| i.token.clone())
            .collect()
    }

    /// 把给定 token 的邀请标记为过期，返回被标记的副本
    fn mark_expired(&mut self, tokens: &[String], now: DateTime<Utc>) -> Vec<Invitation> {
        let mut expired = Vec::with_capacity(tokens.len());
        for token in tokens {
            if let Some(invitation) = self.by_token.get_mut(token) {
                invitation.status = InvitationStatus::Expired;
                invitation.responded_at = Some(now);
                expired.push(invitation.clone());
            }
        }
        expired
    }

    fn remove_where(&mut self, predicate: impl Fn(&Invitation) -> bool) -> usize {
        let before = self.by_token.len();
        self.by_token.retain(|_, invitation| !predicate(invitation));
        let by_token = &self.by_token;
        self.order.retain(|token| by_token.contains_key(token));
        before - self.by_token.len()
    }
}

/// 邀请管理器
pub struct InvitationManager {
    config: InvitationConfig,
    invitations: RwLock<InvitationBook>,
    audit: Option<Arc<dyn AuditLogger>>,
}

fn lock_poisoned() -> Error {
    Error::Storage(StorageError::OperationFailed("lock poisoned".into()))
}

/// 校验并规范化邮箱
fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(ValidationError::EmptyField("email".into()).into());
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(ValidationError::InvalidEmail(email).into());
    }
    Ok(email)
}

impl InvitationManager {
    /// 创建邀请管理器
    pub fn new(config: InvitationConfig) -> Self {
        Self {
            config,
            invitations: RwLock::new(InvitationBook::default()),
            audit: None,
        }
    }

    /// 设置审计日志记录器
    pub fn with_audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(logger);
        self
    }

    /// 获取配置
    pub fn config(&self) -> &InvitationConfig {
        &self.config
    }

    /// 创建邀请
    ///
    /// 同一邮箱的待处理邀请达到上限时，最旧的会被标记为过期。
    pub fn create(&self, inviter_id: &str, email: &str, role: Role) -> Result<Invitation> {
        if inviter_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("inviter_id".into()).into());
        }
        let email = normalize_email(email)?;
        let ttl = Duration::from_std(self.config.ttl)
            .map_err(|_| Error::internal("invitation ttl out of range"))?;

        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::internal("invitation expiration out of range"))?;
        let invitation = Invitation {
            token: generate_invitation_token(self.config.token_length)?,
            email,
            role,
            invited_by: inviter_id.to_string(),
            status: InvitationStatus::Pending,
            created_at: now,
            expires_at,
            responded_at: None,
        };

        let superseded = {
            let mut invitations = self.invitations.write().map_err(|_| lock_poisoned())?;
            invitations.insert(invitation.clone())?;
            self.enforce_cap(&mut invitations, &invitation, now)
        };

        for old in &superseded {
            self.emit(SecurityEvent::invitation(
                EventType::InvitationExpired,
                &old.email,
                old.role,
            ));
        }
        info!(email = %invitation.email, %role, invited_by = inviter_id, "invitation created");
        self.emit(
            SecurityEvent::invitation(EventType::InvitationCreated, &invitation.email, role)
                .with_user_id(inviter_id),
        );
        Ok(invitation)
    }

    /// 按 token 查询
    pub fn get(&self, token: &str) -> Option<Invitation> {
        let invitations = self.invitations.read().ok()?;
        invitations.get(token).cloned()
    }

    /// 接受邀请
    ///
    /// 只有待处理且未过期的邀请可以接受；已过期的会被标记并拒绝。
    pub fn accept(&self, token: &str) -> Result<Invitation> {
        let now = Utc::now();
        let result = {
            let mut invitations = self.invitations.write().map_err(|_| lock_poisoned())?;
            let invitation = invitations.get_mut(token)?;
            if invitation.status != InvitationStatus::Pending {
                return Err(InvitationError::AlreadyResolved(invitation.status.to_string()).into());
            }

            if invitation.is_expired() {
                invitation.status = InvitationStatus::Expired;
                Err(invitation.clone())
            } else {
                invitation.status = InvitationStatus::Accepted;
                invitation.responded_at = Some(now);
                Ok(invitation.clone())
            }
        };

        match result {
            Ok(invitation) => {
                info!(email = %invitation.email, role = %invitation.role, "invitation accepted");
                self.emit(SecurityEvent::invitation(
                    EventType::InvitationAccepted,
                    &invitation.email,
                    invitation.role,
                ));
                Ok(invitation)
            }
            Err(expired) => {
                debug!(email = %expired.email, "invitation expired before acceptance");
                self.emit(SecurityEvent::invitation(
                    EventType::InvitationExpired,
                    &expired.email,
                    expired.role,
                ));
                Err(InvitationError::Expired.into())
            }
        }
    }

    /// 取消邀请
    pub fn cancel(&self, token: &str) -> Result<Invitation> {
        let invitation = {
            let mut invitations = self.invitations.write().map_err(|_| lock_poisoned())?;
            let invitation = invitations.get_mut(token)?;
            if invitation.status != InvitationStatus::Pending {
                return Err(InvitationError::AlreadyResolved(invitation.status.to_string()).into());
            }
            invitation.status = InvitationStatus::Cancelled;
            invitation.responded_at = Some(Utc::now());
            invitation.clone()
        };

        info!(email = %invitation.email, "invitation cancelled");
        self.emit(SecurityEvent::invitation(
            EventType::InvitationCancelled,
            &invitation.email,
            invitation.role,
        ));
        Ok(invitation)
    }

    /// 所有邀请，按创建顺序排列
    pub fn list(&self) -> Vec<Invitation> {
        match self.invitations.read() {
            Ok(invitations) => invitations.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// 邮箱的待处理邀请，按创建顺序排列
    pub fn pending_for(&self, email: &str) -> Vec<Invitation> {
        let email = email.trim().to_lowercase();
        self.list()
            .into_iter()
            .filter(|i| i.email == email && i.is_pending())
            .collect()
    }

    /// 把已超过有效期的待处理邀请标记为过期，返回标记数量
    pub fn expire_stale(&self) -> usize {
        let expired = match self.invitations.write() {
            Ok(mut invitations) => {
                let stale = invitations
                    .tokens_where(|i| i.status == InvitationStatus::Pending && i.is_expired());
                invitations.mark_expired(&stale, Utc::now())
            }
            Err(_) => return 0,
        };

        for invitation in &expired {
            self.emit(SecurityEvent::invitation(
                EventType::InvitationExpired,
                &invitation.email,
                invitation.role,
            ));
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired stale invitations");
        }
        expired.len()
    }

    /// 删除在 `before` 之前已结束的邀请，返回删除数量
    ///
    /// 已接受、已取消的按响应时间判断，已过期的按过期时间判断。待处理的邀请不会被删除。
    pub fn purge_resolved(&self, before: DateTime<Utc>) -> usize {
        let removed = match self.invitations.write() {
            Ok(mut invitations) => invitations.remove_where(|i| {
                if i.status == InvitationStatus::Pending {
                    return false;
                }
                i.responded_at.unwrap_or(i.expires_at) < before
            }),
            Err(_) => return 0,
        };
        if removed > 0 {
            debug!(count = removed, "purged resolved invitations");
        }
        removed
    }

    // ========================================================================
    // 内部方法
    // ========================================================================

    /// 同一邮箱的待处理邀请超过上限时，把最旧的标记为过期
    ///
    /// `latest` 已经写入邀请簿，不会被标记。
    fn enforce_cap(
        &self,
        invitations: &mut InvitationBook,
        latest: &Invitation,
        now: DateTime<Utc>,
    ) -> Vec<Invitation> {
        let max = self.config.max_pending_per_email;
        if max == 0 {
            return Vec::new();
        }

        // 最旧的排在前面
        let pending = invitations.tokens_where(|i| i.email == latest.email && i.is_pending());
        if pending.len() <= max {
            return Vec::new();
        }
        invitations.mark_expired(&pending[..pending.len() - max], now)
    }

    fn emit(&self, event: SecurityEvent) {
        if let Some(audit) = &self.audit {
            audit.log(event);
        }
    }
}

impl fmt::Debug for InvitationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvitationManager")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLogger;

    #[test]
    fn test_create_invitation() {
        let manager = InvitationManager::new(InvitationConfig::default());
        let invitation = manager
            .create("admin-1", "  New.User@Example.com ", Role::Manager)
            .unwrap();

        assert!(invitation.token.starts_with("inv_"));
        assert_eq!(invitation.email, "new.user@example.com");
        assert_eq!(invitation.invited_by, "admin-1");
        assert!(invitation.is_pending());
        assert_eq!(manager.get(&invitation.token), Some(invitation));
    }

    #[test]
    fn test_invalid_email_rejected() {
        let manager = InvitationManager::new(InvitationConfig::default());
        for email in ["", "no-at-sign", "@example.com", "a@nodot", "a@b@c.com", "a b@c.com"] {
            assert!(manager.create("admin-1", email, Role::Customer).is_err(), "{email}");
        }
        assert!(manager.create("", "a@b.com", Role::Customer).is_err());
        assert!(manager.list().is_empty());
    }

    #[test]
    fn test_accept_only_once() {
        let manager = InvitationManager::new(InvitationConfig::default());
        let invitation = manager.create("admin-1", "a@b.com", Role::Affiliate).unwrap();

        let accepted = manager.accept(&invitation.token).unwrap();
        assert_eq!(accepted.status, InvitationStatus::Accepted);
        assert!(accepted.responded_at.is_some());

        let err = manager.accept(&invitation.token).unwrap_err();
        assert!(matches!(
            err,
            Error::Invitation(InvitationError::AlreadyResolved(ref s)) if s == "accepted"
        ));
        assert!(manager.cancel(&invitation.token).is_err());
    }

    #[test]
    fn test_unknown_token() {
        let manager = InvitationManager::new(InvitationConfig::default());
        assert!(manager.get("inv_missing").is_none());
        assert!(matches!(
            manager.accept("inv_missing"),
            Err(Error::Invitation(InvitationError::NotFound))
        ));
    }

    #[test]
    fn test_expired_invitation_rejected() {
        let config = InvitationConfig::default().with_ttl(std::time::Duration::ZERO);
        let manager = InvitationManager::new(config);
        let invitation = manager.create("admin-1", "a@b.com", Role::Customer).unwrap();

        assert!(matches!(
            manager.accept(&invitation.token),
            Err(Error::Invitation(InvitationError::Expired))
        ));
        assert_eq!(
            manager.get(&invitation.token).unwrap().status,
            InvitationStatus::Expired
        );
    }

    #[test]
    fn test_cancel_invitation() {
        let manager = InvitationManager::new(InvitationConfig::default());
        let invitation = manager.create("admin-1", "a@b.com", Role::Customer).unwrap();

        let cancelled = manager.cancel(&invitation.token).unwrap();
        assert_eq!(cancelled.status, InvitationStatus::Cancelled);
        assert!(manager.accept(&invitation.token).is_err());
        assert!(manager.pending_for("a@b.com").is_empty());
    }

    #[test]
    fn test_pending_cap_expires_oldest() {
        let config = InvitationConfig::default().with_max_pending_per_email(2);
        let manager = InvitationManager::new(config);

        let first = manager.create("admin-1", "a@b.com", Role::Customer).unwrap();
        let second = manager.create("admin-1", "a@b.com", Role::Customer).unwrap();
        let third = manager.create("admin-1", "a@b.com", Role::Manager).unwrap();
        manager.create("admin-1", "other@b.com", Role::Customer).unwrap();

        let pending: Vec<String> = manager
            .pending_for("A@B.com")
            .into_iter()
            .map(|i| i.token)
            .collect();
        assert_eq!(pending.len(), 2);
        assert!(pending.contains(&second.token));
        assert!(pending.contains(&third.token));
        assert_eq!(
            manager.get(&first.token).unwrap().status,
            InvitationStatus::Expired
        );
    }

    #[test]
    fn test_expire_stale() {
        let config = InvitationConfig::default().with_ttl(std::time::Duration::ZERO);
        let manager = InvitationManager::new(config);
        manager.create("admin-1", "a@b.com", Role::Customer).unwrap();
        manager.create("admin-1", "c@d.com", Role::Customer).unwrap();

        assert_eq!(manager.expire_stale(), 2);
        assert_eq!(manager.expire_stale(), 0);
        assert!(manager
            .list()
            .iter()
            .all(|i| i.status == InvitationStatus::Expired));
    }

    #[test]
    fn test_create_with_unrepresentable_ttl_fails() {
        let ttl = std::time::Duration::from_secs(300_000 * 365 * 24 * 3600);
        let manager = InvitationManager::new(InvitationConfig::default().with_ttl(ttl));

        assert!(matches!(
            manager.create("admin-1", "a@b.com", Role::Customer),
            Err(Error::Internal(_))
        ));
        assert!(manager.list().is_empty());
    }

    #[test]
    fn test_list_keeps_creation_order() {
        let manager = InvitationManager::new(InvitationConfig::default());
        let tokens: Vec<String> = (0..5)
            .map(|n| {
                manager
                    .create("admin-1", &format!("user{n}@b.com"), Role::Customer)
                    .unwrap()
                    .token
            })
            .collect();

        let listed: Vec<String> = manager.list().into_iter().map(|i| i.token).collect();
        assert_eq!(listed, tokens);
        for token in &tokens {
            assert_eq!(&manager.get(token).unwrap().token, token);
        }
    }

    #[test]
    fn test_purge_resolved() {
        let manager = InvitationManager::new(InvitationConfig::default());
        let accepted = manager.create("admin-1", "a@b.com", Role::Customer).unwrap();
        let cancelled = manager.create("admin-1", "c@d.com", Role::Customer).unwrap();
        let pending = manager.create("admin-1", "e@f.com", Role::Manager).unwrap();
        manager.accept(&accepted.token).unwrap();
        manager.cancel(&cancelled.token).unwrap();

        // 截止时间早于响应时间，不删除
        assert_eq!(manager.purge_resolved(accepted.created_at), 0);
        assert_eq!(manager.list().len(), 3);

        assert_eq!(manager.purge_resolved(Utc::now() + Duration::seconds(1)), 2);
        assert!(manager.get(&accepted.token).is_none());
        assert!(manager.get(&cancelled.token).is_none());
        assert!(matches!(
            manager.accept(&accepted.token),
            Err(Error::Invitation(InvitationError::NotFound))
        ));

        let remaining = manager.list();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].token, pending.token);
        assert!(remaining[0].is_pending());
    }

    #[test]
    fn test_audit_events() {
        let logger = Arc::new(InMemoryAuditLogger::new());
        let manager =
            InvitationManager::new(InvitationConfig::default()).with_audit_logger(logger.clone());

        let invitation = manager.create("admin-1", "a@b.com", Role::Customer).unwrap();
        manager.accept(&invitation.token).unwrap();

        assert_eq!(logger.event_count(), 2);
        assert_eq!(logger.get_events_by_user("admin-1").len(), 1);
        assert_eq!(
            logger
                .get_events_by_type(&EventType::InvitationAccepted)
                .len(),
            1
        );
    }
}
