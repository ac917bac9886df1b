//! 权限存储与管理模块
//!
//! [`PermissionStore`] 持有当前生效的权限树，是显式构造、由调用方注入的状态对象，
//! 测试可以各自创建互不影响的实例。
//!
//! ## 原子性
//!
//! 树以 `Arc<PermissionTree>` 形式共享。读者拿到的是不可变快照；
//! 写操作在写锁内基于当前快照构造一棵新树，校验通过后一次性替换，
//! 失败则什么都不改。因此任何读者都看不到“模块已禁用但操作仍在”之类的中间状态。
//!
//! ## 示例
//!
//! ```rust
//! use crm_access::rbac::{Action, Module, PermissionConfig, PermissionStore, Role};
//!
//! let store = PermissionStore::new(PermissionConfig::default());
//!
//! store.set_module_enabled(Role::Customer, Module::Reports, true).unwrap();
//! store.set_action(Role::Customer, Module::Reports, Action::Export, true).unwrap();
//! assert!(store.has_permission(Some(Role::Customer), "reports.export"));
//!
//! // 禁用模块会同时清空它的所有操作
//! store.set_module_enabled(Role::Customer, Module::Reports, false).unwrap();
//! assert!(!store.has_permission(Some(Role::Customer), "reports.export"));
//!
//! // 导出再导入得到同一棵树
//! let exported = store.export_permissions().unwrap();
//! store.import_permissions(&exported).unwrap();
//! ```

use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use super::codec;
use super::permission::{Action, Capability, FlagName, Module, PermissionPath};
use super::resolver::{BypassRule, Resolver};
use super::role::Role;
use super::tree::{PermissionTree, RolePermissions};
use crate::audit::{AuditLogger, SecurityEvent};
use crate::error::{Error, PermissionError, Result, StorageError};
use crate::storage::LocalStorage;

/// 默认的持久化键
pub const DEFAULT_STORAGE_KEY: &str = "crm_permissions";

// ============================================================================
// PermissionConfig
// ============================================================================

/// 权限存储配置
#[derive(Debug, Clone)]
pub struct PermissionConfig {
    /// 持久化使用的键
    pub storage_key: String,

    /// 解析器的绕过规则
    pub bypass: BypassRule,

    /// 启用模块时默认授予的操作
    pub default_actions: Vec<Action>,

    /// 每次修改后是否写入本地存储
    pub persist_on_change: bool,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            bypass: BypassRule::SuperAdmin,
            default_actions: vec![Action::View],
            persist_on_change: true,
        }
    }
}

impl PermissionConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置持久化键
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// 设置绕过规则
    pub fn with_bypass(mut self, bypass: BypassRule) -> Self {
        self.bypass = bypass;
        self
    }

    /// 设置启用模块时的默认操作
    ///
    /// 空列表会被替换为 `[view]`，启用的模块至少可以查看。
    pub fn with_default_actions(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        let actions: Vec<Action> = actions.into_iter().collect();
        self.default_actions = if actions.is_empty() {
            vec![Action::View]
        } else {
            actions
        };
        self
    }

    /// 设置是否自动持久化
    pub fn with_persist_on_change(mut self, enabled: bool) -> Self {
        self.persist_on_change = enabled;
        self
    }

    /// 严格配置：超级管理员也按权限树判定
    pub fn strict() -> Self {
        Self {
            bypass: BypassRule::None,
            ..Default::default()
        }
    }
}

// ============================================================================
// PermissionStore
// ============================================================================

/// 权限存储
pub struct PermissionStore {
    tree: RwLock<Arc<PermissionTree>>,
    config: PermissionConfig,
    resolver: Resolver,
    storage: Option<Arc<dyn LocalStorage>>,
    audit: Option<Arc<dyn AuditLogger>>,
}

impl PermissionStore {
    /// 使用默认权限树创建存储，不做持久化
    pub fn new(config: PermissionConfig) -> Self {
        Self::from_tree(config, PermissionTree::defaults(), None)
    }

    /// 使用默认权限树创建存储，并把之后的修改写入 `storage`
    pub fn with_storage(config: PermissionConfig, storage: Arc<dyn LocalStorage>) -> Self {
        Self::from_tree(config, PermissionTree::defaults(), Some(storage))
    }

    /// 从本地存储恢复
    ///
    /// 没有快照或快照损坏时回退到默认配置，不会失败。
    pub fn load(config: PermissionConfig, storage: Arc<dyn LocalStorage>) -> Self {
        let tree = match storage.get(&config.storage_key) {
            Ok(Some(payload)) => match codec::decode_str(&payload) {
                Ok(tree) => {
                    debug!(key = %config.storage_key, "restored permission tree");
                    tree
                }
                Err(err) => {
                    warn!(
                        key = %config.storage_key,
                        error = %err,
                        "stored permission tree is invalid, using defaults"
                    );
                    PermissionTree::defaults()
                }
            },
            Ok(None) => PermissionTree::defaults(),
            Err(err) => {
                warn!(
                    key = %config.storage_key,
                    error = %err,
                    "cannot read permission tree, using defaults"
                );
                PermissionTree::defaults()
            }
        };
        Self::from_tree(config, tree, Some(storage))
    }

    /// 使用给定的权限树创建存储
    pub fn from_tree(
        config: PermissionConfig,
        tree: PermissionTree,
        storage: Option<Arc<dyn LocalStorage>>,
    ) -> Self {
        Self {
            tree: RwLock::new(Arc::new(tree)),
            resolver: Resolver::new(config.bypass),
            config,
            storage,
            audit: None,
        }
    }

    /// 设置审计日志记录器
    pub fn with_audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(logger);
        self
    }

    /// 当前配置
    pub fn config(&self) -> &PermissionConfig {
        &self.config
    }

    /// 使用的解析器
    pub fn resolver(&self) -> Resolver {
        self.resolver
    }

    // ========================================================================
    // 读路径
    // ========================================================================

    /// 当前权限树的不可变快照
    ///
    /// 锁被污染时返回空树，所有判定都会拒绝。
    pub fn snapshot(&self) -> Arc<PermissionTree> {
        match self.tree.read() {
            Ok(tree) => Arc::clone(&*tree),
            Err(_) => Arc::new(PermissionTree::empty()),
        }
    }

    /// 角色子树的副本，角色不存在时为空子树
    pub fn role_permissions(&self, role: Role) -> RolePermissions {
        self.snapshot().role(role).cloned().unwrap_or_default()
    }

    /// 判定点号路径
    pub fn has_permission(&self, role: Option<Role>, path: &str) -> bool {
        self.resolver.resolve_str(&self.snapshot(), role, path)
    }

    /// 判定模块访问
    pub fn has_module_access(&self, role: Option<Role>, module: Module) -> bool {
        self.resolver
            .resolve(&self.snapshot(), role, &PermissionPath::module(module))
    }

    // ========================================================================
    // 写路径
    // ========================================================================

    /// 启用或禁用模块
    ///
    /// 启用时授予配置的默认操作（已启用则保持不变）；
    /// 禁用时在同一次替换中清空所有操作与标记。
    pub fn set_module_enabled(&self, role: Role, module: Module, enabled: bool) -> Result<()> {
        let defaults = self.config.default_actions.clone();
        self.update_role(role, |permissions| {
            let grant = permissions.module_entry(module);
            if enabled {
                grant.enable(&defaults);
            } else {
                grant.disable();
            }
            Ok(())
        })?;

        info!(%role, %module, enabled, "module access changed");
        self.emit(SecurityEvent::module_toggled(role, module, enabled));
        Ok(())
    }

    /// 授予或撤销模块内的操作
    ///
    /// 模块未启用时拒绝，不做任何修改。
    pub fn set_action(
        &self,
        role: Role,
        module: Module,
        action: Action,
        allowed: bool,
    ) -> Result<()> {
        self.update_role(role, |permissions| {
            if permissions.module_entry(module).set_action(action, allowed) {
                Ok(())
            } else {
                Err(PermissionError::ModuleDisabled { role, module }.into())
            }
        })?;

        info!(%role, %module, %action, allowed, "module action changed");
        self.emit(SecurityEvent::capability_changed(
            role,
            module,
            action.as_str(),
            allowed,
        ));
        Ok(())
    }

    /// 设置模块内的能力标记
    ///
    /// 模块未启用时拒绝，不做任何修改。
    pub fn set_flag(&self, role: Role, module: Module, flag: FlagName, value: bool) -> Result<()> {
        let name = flag.to_string();
        self.update_role(role, |permissions| {
            if permissions.module_entry(module).set_flag(flag, value) {
                Ok(())
            } else {
                Err(PermissionError::ModuleDisabled { role, module }.into())
            }
        })?;

        info!(%role, %module, flag = %name, value, "module flag changed");
        self.emit(SecurityEvent::capability_changed(role, module, &name, value));
        Ok(())
    }

    /// 按路径设置权限
    ///
    /// 模块路径等同于 [`set_module_enabled`](Self::set_module_enabled)，
    /// 操作和标记路径要求模块已启用。
    pub fn set_permission(&self, role: Role, path: &PermissionPath, enabled: bool) -> Result<()> {
        let module = path.module_name();
        match path.capability() {
            None => self.set_module_enabled(role, module, enabled),
            Some(Capability::Action(action)) => self.set_action(role, module, *action, enabled),
            Some(Capability::Flag(flag)) => self.set_flag(role, module, flag.clone(), enabled),
        }
    }

    /// 整体替换角色子树
    pub fn replace_role(&self, role: Role, permissions: RolePermissions) -> Result<()> {
        permissions.validate(role)?;
        self.update(|current| {
            let mut next = current.clone();
            next.insert_role(role, permissions);
            Ok(next)
        })?;

        info!(%role, "role permissions replaced");
        self.emit(SecurityEvent::role_replaced(role));
        Ok(())
    }

    /// 用 `from` 的子树深拷贝替换 `to` 的子树
    ///
    /// 两个角色之后互不影响；`from == to` 时不做任何事。
    pub fn copy_permissions(&self, from: Role, to: Role) -> Result<()> {
        if from == to {
            return Ok(());
        }

        self.update(|current| {
            let source = current.role(from).cloned().unwrap_or_default();
            let mut next = current.clone();
            next.insert_role(to, source);
            Ok(next)
        })?;

        info!(%from, %to, "role permissions copied");
        self.emit(SecurityEvent::permissions_copied(from, to));
        Ok(())
    }

    /// 导出整棵树为 JSON 字符串
    pub fn export_permissions(&self) -> Result<String> {
        let value = codec::encode(&self.snapshot());
        Ok(serde_json::to_string_pretty(&value)?)
    }

    /// 导入 JSON 字符串并替换整棵树
    ///
    /// 先完整解码和校验，任何错误都会拒绝导入，当前树保持不变。
    pub fn import_permissions(&self, payload: &str) -> Result<()> {
        let tree = codec::decode_str(payload).inspect_err(|err| {
            warn!(error = %err, "rejected permission import");
        })?;
        self.update(|_| Ok(tree))?;

        info!("permission tree imported");
        self.emit(SecurityEvent::permissions_imported());
        Ok(())
    }

    /// 恢复内置默认配置
    ///
    /// 在当前会话内不可撤销；调用方应在调用前确认。
    pub fn reset_to_defaults(&self) -> Result<()> {
        self.update(|_| Ok(PermissionTree::defaults()))?;

        info!("permission tree reset to defaults");
        self.emit(SecurityEvent::permissions_reset());
        Ok(())
    }

    // ========================================================================
    // 内部方法
    // ========================================================================

    /// 基于当前角色子树的副本修改，然后整体替换
    fn update_role<F>(&self, role: Role, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut RolePermissions) -> Result<()>,
    {
        self.update(|current| {
            let mut permissions = current.role(role).cloned().unwrap_or_default();
            mutate(&mut permissions)?;
            permissions.validate(role)?;
            let mut next = current.clone();
            next.insert_role(role, permissions);
            Ok(next)
        })
    }

    /// 在写锁内构造新树并替换
    fn update<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce(&PermissionTree) -> Result<PermissionTree>,
    {
        let mut guard = self
            .tree
            .write()
            .map_err(|_| Error::Storage(StorageError::OperationFailed("lock poisoned".into())))?;
        let current: &PermissionTree = &guard;
        let next = Arc::new(build(current)?);
        *guard = Arc::clone(&next);
        // 在锁内写入，保证存储中的顺序与内存一致
        self.persist(&next);
        Ok(())
    }

    /// 尽力而为地持久化，失败只记录警告
    fn persist(&self, tree: &PermissionTree) {
        if !self.config.persist_on_change {
            return;
        }
        let Some(storage) = &self.storage else {
            return;
        };

        let result = serde_json::to_string(&codec::encode(tree))
            .map_err(Error::from)
            .and_then(|payload| storage.set(&self.config.storage_key, &payload));
        if let Err(err) = result {
            warn!(
                key = %self.config.storage_key,
                error = %err,
                "failed to persist permission tree"
            );
        }
    }

    fn emit(&self, event: SecurityEvent) {
        if let Some(audit) = &self.audit {
            audit.log(event);
        }
    }
}

impl std::fmt::Debug for PermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionStore")
            .field("config", &self.config)
            .field("persistent", &self.storage.is_some())
            .finish()
    }
}
