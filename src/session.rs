//! 会话与身份模块
//!
//! 管理当前登录的用户和活跃角色，并支持管理员临时切换到其他角色或用户（模拟）。
//!
//! ## 特性
//!
//! - 登录、登出，会话可选地持久化到本地存储
//! - 会话过期管理，过期会话视为未登录
//! - 角色切换保留原始身份，可随时恢复
//! - 角色切换默认关闭，开启后还要求原始身份拥有 `admin.canImpersonate`
//!
//! ## 示例
//!
//! ```rust
//! use crm_access::rbac::{PermissionConfig, PermissionStore, Role};
//! use crm_access::session::{SessionConfig, SessionManager, SwitchTarget, UserProfile};
//!
//! let store = PermissionStore::new(PermissionConfig::default());
//! let manager = SessionManager::new(SessionConfig::development());
//!
//! let admin = UserProfile::new("u1", "Ada", "ada@example.com");
//! manager.login(admin, Role::SuperAdmin).unwrap();
//!
//! // 以客户身份查看控制台
//! let session = manager
//!     .switch_active_role(&store, SwitchTarget::Role(Role::Customer))
//!     .unwrap();
//! assert_eq!(session.role, Role::Customer);
//! assert!(manager.is_impersonating());
//!
//! // 恢复原始身份
//! let session = manager.restore_original().unwrap();
//! assert_eq!(session.role, Role::SuperAdmin);
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::audit::{AuditLogger, SecurityEvent};
use crate::error::{Error, Result, SessionError, StorageError, ValidationError};
use crate::random::generate_session_id;
use crate::rbac::{FlagName, Module, PermissionPath, PermissionStore, Role};
use crate::storage::LocalStorage;

/// 默认的会话持久化键
pub const DEFAULT_SESSION_KEY: &str = "crm_session";

/// 允许切换身份的能力标记
const IMPERSONATE_FLAG: &str = "canImpersonate";

// ============================================================================
// 数据结构
// ============================================================================

/// 用户资料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// 用户 ID
    pub id: String,

    /// 显示名称
    pub name: String,

    /// 邮箱
    pub email: String,
}

impl UserProfile {
    /// 创建用户资料
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }
}

/// 切换前的原始身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalIdentity {
    pub user: UserProfile,
    pub role: Role,
}

/// 会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// 会话 ID
    pub id: String,

    /// 当前用户
    pub user: UserProfile,

    /// 当前活跃角色
    pub role: Role,

    /// 模拟时的原始身份
    pub original: Option<OriginalIdentity>,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 过期时间
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn new(user: UserProfile, role: Role, expires_in: Duration) -> Result<Self> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(expires_in)
            .ok_or_else(|| Error::internal("session expiration out of range"))?;
        Ok(Self {
            id: generate_session_id()?,
            user,
            role,
            original: None,
            created_at: now,
            expires_at,
        })
    }

    /// 检查会话是否已过期
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// 检查会话是否有效
    pub fn is_valid(&self) -> bool {
        !self.is_expired()
    }

    /// 获取剩余有效时间（秒）
    pub fn time_to_live(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }

    /// 是否处于模拟状态
    pub fn is_impersonating(&self) -> bool {
        self.original.is_some()
    }

    /// 真实登录的身份（模拟时为原始身份）
    pub fn real_identity(&self) -> (&UserProfile, Role) {
        match &self.original {
            Some(original) => (&original.user, original.role),
            None => (&self.user, self.role),
        }
    }
}

// ============================================================================
// 配置
// ============================================================================

/// 会话配置
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 持久化使用的键
    pub storage_key: String,

    /// 会话有效期
    pub expiration: Duration,

    /// 是否允许切换角色/用户
    pub allow_impersonation: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_SESSION_KEY.to_string(),
            expiration: Duration::hours(12),
            allow_impersonation: false,
        }
    }
}

impl SessionConfig {
    /// 创建新的配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置持久化键
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// 设置有效期
    pub fn with_expiration(mut self, duration: Duration) -> Self {
        self.expiration = duration;
        self
    }

    /// 设置是否允许切换身份
    pub fn with_impersonation(mut self, enabled: bool) -> Self {
        self.allow_impersonation = enabled;
        self
    }

    /// 开发环境配置：允许切换身份，便于预览各角色视图
    pub fn development() -> Self {
        Self {
            allow_impersonation: true,
            ..Default::default()
        }
    }
}

/// 切换目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchTarget {
    /// 保持当前用户，只切换角色
    Role(Role),
    /// 切换到另一个用户及其角色
    User(UserProfile, Role),
}

impl SwitchTarget {
    fn role(&self) -> Role {
        match self {
            SwitchTarget::Role(role) | SwitchTarget::User(_, role) => *role,
        }
    }
}

// ============================================================================
// SessionManager
// ============================================================================

/// 会话管理器
///
/// 每个进程持有一个当前会话。
pub struct SessionManager {
    config: SessionConfig,
    current: RwLock<Option<Session>>,
    storage: Option<Arc<dyn LocalStorage>>,
    audit: Option<Arc<dyn AuditLogger>>,
}

fn lock_poisoned() -> Error {
    Error::Storage(StorageError::OperationFailed("lock poisoned".into()))
}

impl SessionManager {
    /// 创建会话管理器
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            current: RwLock::new(None),
            storage: None,
            audit: None,
        }
    }

    /// 设置持久化存储
    pub fn with_storage(mut self, storage: Arc<dyn LocalStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// 设置审计日志记录器
    pub fn with_audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(logger);
        self
    }

    /// 获取配置
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 从本地存储恢复会话
    ///
    /// 记录无法读取、角色无法识别或已过期时返回 `None`，并清理该记录。
    pub fn restore(&self) -> Option<Session> {
        let storage = self.storage.as_ref()?;
        let key = &self.config.storage_key;

        let payload = match storage.get(key) {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(err) => {
                warn!(key = %key, error = %err, "cannot read stored session");
                return None;
            }
        };

        let session = match serde_json::from_str::<Session>(&payload) {
            Ok(session) if session.is_valid() => session,
            Ok(_) => {
                debug!(key = %key, "stored session has expired");
                self.forget();
                return None;
            }
            Err(err) => {
                warn!(key = %key, error = %err, "discarding unreadable session record");
                self.forget();
                return None;
            }
        };

        let mut current = self.current.write().ok()?;
        *current = Some(session.clone());
        Some(session)
    }

    /// 登录
    pub fn login(&self, user: UserProfile, role: Role) -> Result<Session> {
        if user.id.trim().is_empty() {
            return Err(ValidationError::EmptyField("id".into()).into());
        }

        let session = Session::new(user, role, self.config.expiration)?;
        {
            let mut current = self.current.write().map_err(|_| lock_poisoned())?;
            *current = Some(session.clone());
        }
        self.persist(&session);

        info!(user_id = %session.user.id, %role, "session created");
        self.emit(SecurityEvent::session_created(&session.user.id, role));
        Ok(session)
    }

    /// 当前有效会话
    pub fn current(&self) -> Option<Session> {
        let current = self.current.read().ok()?;
        current.as_ref().filter(|s| s.is_valid()).cloned()
    }

    /// 当前活跃角色
    pub fn active_role(&self) -> Option<Role> {
        self.current().map(|s| s.role)
    }

    /// 登出
    pub fn logout(&self) -> Result<()> {
        let previous = {
            let mut current = self.current.write().map_err(|_| lock_poisoned())?;
            current.take()
        };
        self.forget();

        if let Some(session) = previous {
            let (user, _) = session.real_identity();
            info!(user_id = %user.id, "session ended");
            self.emit(SecurityEvent::session_ended(&user.id));
        }
        Ok(())
    }

    /// 清除会话状态，不产生审计事件
    pub fn clear(&self) {
        if let Ok(mut current) = self.current.write() {
            *current = None;
        }
        self.forget();
    }

    /// 切换活跃角色或用户
    ///
    /// 需要配置允许，并且原始身份在 `store` 中拥有 `admin.canImpersonate`。
    /// 模拟期间再次切换时保留最初的原始身份。
    pub fn switch_active_role(
        &self,
        store: &PermissionStore,
        target: SwitchTarget,
    ) -> Result<Session> {
        if !self.config.allow_impersonation {
            return Err(SessionError::ImpersonationDisabled.into());
        }

        let session = {
            let mut current = self.current.write().map_err(|_| lock_poisoned())?;
            let session = current.as_mut().ok_or(SessionError::NotAuthenticated)?;
            if session.is_expired() {
                return Err(SessionError::Expired.into());
            }

            let original = session.original.clone().unwrap_or_else(|| OriginalIdentity {
                user: session.user.clone(),
                role: session.role,
            });

            let path = PermissionPath::flag(Module::Admin, FlagName::from_static(IMPERSONATE_FLAG));
            if !store.resolver().resolve(&store.snapshot(), Some(original.role), &path) {
                warn!(user_id = %original.user.id, role = %original.role, "identity switch denied");
                return Err(SessionError::ImpersonationDenied(original.role).into());
            }

            session.role = target.role();
            if let SwitchTarget::User(user, _) = target {
                session.user = user;
            }
            session.original = Some(original);
            session.clone()
        };
        self.persist(&session);

        let (real_user, _) = session.real_identity();
        info!(
            user_id = %real_user.id,
            target_user = %session.user.id,
            role = %session.role,
            "identity switched"
        );
        self.emit(
            SecurityEvent::impersonation_started(&real_user.id, session.role)
                .with_detail("target_user", session.user.id.clone()),
        );
        Ok(session)
    }

    /// 恢复原始身份
    pub fn restore_original(&self) -> Result<Session> {
        let session = {
            let mut current = self.current.write().map_err(|_| lock_poisoned())?;
            let session = current.as_mut().ok_or(SessionError::NotAuthenticated)?;
            if session.is_expired() {
                return Err(SessionError::Expired.into());
            }
            let original = session.original.take().ok_or(SessionError::NotImpersonating)?;
            session.user = original.user;
            session.role = original.role;
            session.clone()
        };
        self.persist(&session);

        info!(user_id = %session.user.id, role = %session.role, "original identity restored");
        self.emit(SecurityEvent::impersonation_ended(&session.user.id));
        Ok(session)
    }

    /// 当前是否处于模拟状态
    pub fn is_impersonating(&self) -> bool {
        self.current().is_some_and(|s| s.is_impersonating())
    }

    // ========================================================================
    // 内部方法
    // ========================================================================

    fn persist(&self, session: &Session) {
        let Some(storage) = &self.storage else {
            return;
        };
        let result = serde_json::to_string(session)
            .map_err(Error::from)
            .and_then(|payload| storage.set(&self.config.storage_key, &payload));
        if let Err(err) = result {
            warn!(key = %self.config.storage_key, error = %err, "failed to persist session");
        }
    }

    fn forget(&self) {
        if let Some(storage) = &self.storage {
            if let Err(err) = storage.remove(&self.config.storage_key) {
                warn!(
                    key = %self.config.storage_key,
                    error = %err,
                    "failed to remove stored session"
                );
            }
        }
    }

    fn emit(&self, event: SecurityEvent) {
        if let Some(audit) = &self.audit {
            audit.log(event);
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("persistent", &self.storage.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{EventType, InMemoryAuditLogger};
    use crate::rbac::PermissionConfig;
    use crate::storage::InMemoryLocalStorage;

    fn ada() -> UserProfile {
        UserProfile::new("u1", "Ada", "ada@example.com")
    }

    #[test]
    fn test_login_and_logout() {
        let manager = SessionManager::new(SessionConfig::default());
        assert!(manager.current().is_none());

        let session = manager.login(ada(), Role::Manager).unwrap();
        assert!(!session.id.is_empty());
        assert_eq!(manager.active_role(), Some(Role::Manager));

        manager.logout().unwrap();
        assert!(manager.current().is_none());
    }

    #[test]
    fn test_login_requires_user_id() {
        let manager = SessionManager::new(SessionConfig::default());
        let user = UserProfile::new("  ", "Nobody", "n@example.com");
        assert!(matches!(
            manager.login(user, Role::Customer),
            Err(Error::Validation(ValidationError::EmptyField(_)))
        ));
    }

    #[test]
    fn test_expired_session_is_absent() {
        let config = SessionConfig::default().with_expiration(Duration::seconds(-1));
        let manager = SessionManager::new(config);
        manager.login(ada(), Role::Admin).unwrap();
        assert!(manager.current().is_none());
        assert_eq!(manager.active_role(), None);
    }

    #[test]
    fn test_login_with_unrepresentable_expiration_fails() {
        let config = SessionConfig::default().with_expiration(Duration::days(300_000 * 365));
        let storage = Arc::new(InMemoryLocalStorage::new());
        let manager = SessionManager::new(config).with_storage(storage.clone());

        assert!(matches!(
            manager.login(ada(), Role::Admin),
            Err(Error::Internal(_))
        ));
        assert!(manager.current().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_restore_original_rejects_expired_session() {
        let store = PermissionStore::new(PermissionConfig::default());
        let storage = Arc::new(InMemoryLocalStorage::new());
        let manager =
            SessionManager::new(SessionConfig::development()).with_storage(storage.clone());
        manager.login(ada(), Role::SuperAdmin).unwrap();
        let switched = manager
            .switch_active_role(&store, SwitchTarget::Role(Role::Customer))
            .unwrap();

        if let Some(session) = manager.current.write().unwrap().as_mut() {
            session.expires_at = Utc::now() - Duration::seconds(1);
        }
        assert!(matches!(
            manager.restore_original(),
            Err(Error::Session(SessionError::Expired))
        ));

        // 存储中的会话仍是切换后的状态，没有被改写
        let stored: Session =
            serde_json::from_str(&storage.get(DEFAULT_SESSION_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored, switched);
    }

    #[test]
    fn test_switch_disabled_by_default() {
        let store = PermissionStore::new(PermissionConfig::default());
        let manager = SessionManager::new(SessionConfig::default());
        manager.login(ada(), Role::SuperAdmin).unwrap();

        let err = manager
            .switch_active_role(&store, SwitchTarget::Role(Role::Customer))
            .unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::ImpersonationDisabled)));
        assert_eq!(manager.active_role(), Some(Role::SuperAdmin));
    }

    #[test]
    fn test_switch_requires_impersonate_flag() {
        let store = PermissionStore::new(PermissionConfig::default());
        let manager = SessionManager::new(SessionConfig::development());
        manager.login(ada(), Role::Admin).unwrap();

        let err = manager
            .switch_active_role(&store, SwitchTarget::Role(Role::Customer))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::ImpersonationDenied(Role::Admin))
        ));

        store
            .set_flag(
                Role::Admin,
                Module::Admin,
                FlagName::new("canImpersonate").unwrap(),
                true,
            )
            .unwrap();
        let session = manager
            .switch_active_role(&store, SwitchTarget::Role(Role::Customer))
            .unwrap();
        assert_eq!(session.role, Role::Customer);
    }

    #[test]
    fn test_nested_switch_keeps_first_original() {
        let store = PermissionStore::new(PermissionConfig::default());
        let manager = SessionManager::new(SessionConfig::development());
        manager.login(ada(), Role::SuperAdmin).unwrap();

        manager
            .switch_active_role(&store, SwitchTarget::Role(Role::Manager))
            .unwrap();
        let bob = UserProfile::new("u2", "Bob", "bob@example.com");
        let session = manager
            .switch_active_role(&store, SwitchTarget::User(bob.clone(), Role::Affiliate))
            .unwrap();
        assert_eq!(session.user, bob);
        assert_eq!(session.role, Role::Affiliate);

        let original = session.original.unwrap();
        assert_eq!(original.user, ada());
        assert_eq!(original.role, Role::SuperAdmin);

        let restored = manager.restore_original().unwrap();
        assert_eq!(restored.user, ada());
        assert_eq!(restored.role, Role::SuperAdmin);
        assert!(!manager.is_impersonating());
        assert!(matches!(
            manager.restore_original(),
            Err(Error::Session(SessionError::NotImpersonating))
        ));
    }

    #[test]
    fn test_switch_without_session() {
        let store = PermissionStore::new(PermissionConfig::default());
        let manager = SessionManager::new(SessionConfig::development());
        assert!(matches!(
            manager.switch_active_role(&store, SwitchTarget::Role(Role::Customer)),
            Err(Error::Session(SessionError::NotAuthenticated))
        ));
    }

    #[test]
    fn test_restore_from_storage() {
        let storage = Arc::new(InMemoryLocalStorage::new());
        let manager = SessionManager::new(SessionConfig::default()).with_storage(storage.clone());
        let session = manager.login(ada(), Role::Affiliate).unwrap();

        let restarted = SessionManager::new(SessionConfig::default()).with_storage(storage.clone());
        assert_eq!(restarted.restore(), Some(session));

        restarted.logout().unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_restore_discards_unknown_role() {
        let storage = Arc::new(InMemoryLocalStorage::new());
        let manager = SessionManager::new(SessionConfig::default()).with_storage(storage.clone());
        manager.login(ada(), Role::Customer).unwrap();

        let payload = storage.get(DEFAULT_SESSION_KEY).unwrap().unwrap();
        storage
            .set(DEFAULT_SESSION_KEY, &payload.replace("\"customer\"", "\"janitor\""))
            .unwrap();

        let restarted = SessionManager::new(SessionConfig::default()).with_storage(storage.clone());
        assert_eq!(restarted.restore(), None);
        assert!(restarted.current().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_audit_events() {
        let logger = Arc::new(InMemoryAuditLogger::new());
        let store = PermissionStore::new(PermissionConfig::default());
        let manager =
            SessionManager::new(SessionConfig::development()).with_audit_logger(logger.clone());

        manager.login(ada(), Role::SuperAdmin).unwrap();
        manager
            .switch_active_role(&store, SwitchTarget::Role(Role::Customer))
            .unwrap();
        manager.restore_original().unwrap();
        manager.logout().unwrap();

        assert_eq!(logger.event_count(), 4);
        assert_eq!(
            logger
                .get_events_by_type(&EventType::ImpersonationStarted)
                .len(),
            1
        );
        assert_eq!(logger.get_events_by_user("u1").len(), 4);
    }
}
