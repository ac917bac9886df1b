//! 访问门控
//!
//! 门控在渲染前询问解析器：允许时渲染授权分支，否则渲染回退分支，
//! 没有回退分支时什么都不渲染。被拒绝不是错误状态。
//!
//! 门控不缓存结果，每次调用都重新判定，运行时修改的权限立即生效。
//!
//! ## 示例
//!
//! ```rust
//! use crm_access::rbac::{
//!     AccessContext, AccessGate, GateOutcome, PermissionTree, Render, Role, protect,
//! };
//!
//! let tree = PermissionTree::defaults();
//! let ctx = AccessContext::for_role(tree, Role::Customer);
//!
//! let outcome = AccessGate::parse("wallet.view").render(&ctx, || "balance", Some(|| "hidden"));
//! assert_eq!(outcome, GateOutcome::Authorized("balance"));
//!
//! let none = None::<fn() -> &'static str>;
//! let outcome: GateOutcome<&str> = AccessGate::parse("admin").render(&ctx, || "users", none);
//! assert!(outcome.is_hidden());
//!
//! // 包装成可复用的受保护单元
//! let admin_panel = protect("admin.canManageUsers", || "user list").or_else(|| "no access");
//! assert_eq!(admin_panel.render(&ctx).into_option(), Some("no access"));
//! ```

use std::sync::Arc;
use tracing::debug;

use super::permission::{Module, PermissionPath};
use super::resolver::Resolver;
use super::role::Role;
use super::store::PermissionStore;
use super::tree::PermissionTree;
use crate::session::Session;

/// 回退分支可以使用的中性提示
pub const ACCESS_DENIED_MESSAGE: &str = "You do not have access to this section.";

// ============================================================================
// AccessContext
// ============================================================================

/// 一次渲染所用的权限上下文
///
/// 持有权限树快照和当前角色。树或角色缺失时所有判定都拒绝。
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    tree: Option<Arc<PermissionTree>>,
    role: Option<Role>,
    resolver: Resolver,
}

impl AccessContext {
    /// 从存储和当前会话构造
    ///
    /// 已过期的会话视为不存在。
    pub fn new(store: &PermissionStore, session: Option<&Session>) -> Self {
        let role = session
            .filter(|session| !session.is_expired())
            .map(|session| session.role);
        Self {
            tree: Some(store.snapshot()),
            role,
            resolver: store.resolver(),
        }
    }

    /// 未登录、未初始化的上下文
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// 使用给定的树和角色构造，采用默认解析器
    pub fn for_role(tree: impl Into<Arc<PermissionTree>>, role: Role) -> Self {
        Self {
            tree: Some(tree.into()),
            role: Some(role),
            resolver: Resolver::default(),
        }
    }

    /// 替换解析器
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// 当前角色
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// 判定已解析路径
    pub fn allows(&self, path: &PermissionPath) -> bool {
        match &self.tree {
            Some(tree) => self.resolver.resolve(tree, self.role, path),
            None => false,
        }
    }

    /// 判定点号路径字符串
    pub fn has_permission(&self, path: &str) -> bool {
        match PermissionPath::parse(path) {
            Ok(parsed) => self.allows(&parsed),
            Err(_) => false,
        }
    }

    /// 判定模块访问，模块名无法识别时拒绝
    pub fn has_module_access(&self, module: &str) -> bool {
        match module.parse::<Module>() {
            Ok(module) => self.allows(&PermissionPath::module(module)),
            Err(_) => false,
        }
    }
}

// ============================================================================
// GateOutcome
// ============================================================================

/// 门控结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome<T> {
    /// 已授权，携带授权分支的输出
    Authorized(T),
    /// 未授权，携带回退分支的输出
    Fallback(T),
    /// 未授权且没有回退分支
    Hidden,
}

impl<T> GateOutcome<T> {
    /// 是否已授权
    pub fn is_authorized(&self) -> bool {
        matches!(self, GateOutcome::Authorized(_))
    }

    /// 是否什么都不渲染
    pub fn is_hidden(&self) -> bool {
        matches!(self, GateOutcome::Hidden)
    }

    /// 取出渲染输出
    pub fn into_option(self) -> Option<T> {
        match self {
            GateOutcome::Authorized(value) | GateOutcome::Fallback(value) => Some(value),
            GateOutcome::Hidden => None,
        }
    }
}

// ============================================================================
// AccessGate
// ============================================================================

/// 访问门控
#[derive(Debug, Clone)]
pub struct AccessGate {
    path: Option<PermissionPath>,
}

impl AccessGate {
    /// 使用已解析路径创建
    pub fn new(path: PermissionPath) -> Self {
        Self { path: Some(path) }
    }

    /// 使用点号路径创建
    ///
    /// 无法解析的路径得到一个永远拒绝的门控。
    pub fn parse(path: &str) -> Self {
        match PermissionPath::parse(path) {
            Ok(path) => Self::new(path),
            Err(err) => {
                debug!(path, error = %err, "gate created with unparseable path");
                Self { path: None }
            }
        }
    }

    /// 守卫的路径
    pub fn path(&self) -> Option<&PermissionPath> {
        self.path.as_ref()
    }

    /// 当前上下文是否放行
    pub fn check(&self, ctx: &AccessContext) -> bool {
        self.path.as_ref().is_some_and(|path| ctx.allows(path))
    }

    /// 渲染
    ///
    /// 放行时授权分支恰好执行一次，否则只执行回退分支。
    pub fn render<T, A, F>(
        &self,
        ctx: &AccessContext,
        authorized: A,
        fallback: Option<F>,
    ) -> GateOutcome<T>
    where
        A: FnOnce() -> T,
        F: FnOnce() -> T,
    {
        if self.check(ctx) {
            return GateOutcome::Authorized(authorized());
        }

        let path = self.path.as_ref().map(|p| p.to_string());
        debug!(role = ?ctx.role(), ?path, "access denied");
        match fallback {
            Some(fallback) => GateOutcome::Fallback(fallback()),
            None => GateOutcome::Hidden,
        }
    }
}

// ============================================================================
// Protected
// ============================================================================

/// 可渲染单元
pub trait Render {
    /// 渲染输出
    type Output;

    /// 在给定上下文中渲染
    fn render(&self, ctx: &AccessContext) -> GateOutcome<Self::Output>;
}

/// 受门控保护的可渲染单元
///
/// 可以反复渲染，适合在多个调用点复用。
pub struct Protected<F, B> {
    gate: AccessGate,
    content: F,
    fallback: Option<B>,
}

/// 用门控包装一个可渲染闭包
pub fn protect<T, F>(path: &str, content: F) -> Protected<F, fn() -> T>
where
    F: Fn() -> T,
{
    Protected {
        gate: AccessGate::parse(path),
        content,
        fallback: None,
    }
}

impl<T, F, B> Protected<F, B>
where
    F: Fn() -> T,
    B: Fn() -> T,
{
    /// 设置回退分支
    pub fn or_else<B2>(self, fallback: B2) -> Protected<F, B2>
    where
        B2: Fn() -> T,
    {
        Protected {
            gate: self.gate,
            content: self.content,
            fallback: Some(fallback),
        }
    }

    /// 使用的门控
    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }
}

impl<T, F, B> Render for Protected<F, B>
where
    F: Fn() -> T,
    B: Fn() -> T,
{
    type Output = T;

    fn render(&self, ctx: &AccessContext) -> GateOutcome<T> {
        self.gate
            .render(ctx, || (self.content)(), self.fallback.as_ref().map(|fb| move || fb()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::PermissionConfig;
    use std::cell::Cell;

    #[test]
    fn test_authorized_branch_runs_once() {
        let ctx = AccessContext::for_role(PermissionTree::defaults(), Role::Manager);
        let calls = Cell::new(0);
        let fallback_calls = Cell::new(0);

        let outcome = AccessGate::parse("contacts.edit").render(
            &ctx,
            || calls.set(calls.get() + 1),
            Some(|| fallback_calls.set(fallback_calls.get() + 1)),
        );
        assert!(outcome.is_authorized());
        assert_eq!(calls.get(), 1);
        assert_eq!(fallback_calls.get(), 0);
    }

    #[test]
    fn test_denied_without_fallback_is_hidden() {
        let ctx = AccessContext::for_role(PermissionTree::defaults(), Role::Customer);
        let outcome = AccessGate::parse("admin.canManageUsers")
            .render(&ctx, || 1, None::<fn() -> i32>);
        assert_eq!(outcome, GateOutcome::Hidden);
        assert_eq!(outcome.into_option(), None);
    }

    #[test]
    fn test_anonymous_context_denies_everything() {
        let ctx = AccessContext::anonymous();
        assert_eq!(ctx.role(), None);
        for module in Module::ALL {
            assert!(!ctx.allows(&PermissionPath::module(module)));
        }
        let outcome = AccessGate::parse("dashboard")
            .render(&ctx, || "x", Some(|| ACCESS_DENIED_MESSAGE));
        assert_eq!(outcome, GateOutcome::Fallback(ACCESS_DENIED_MESSAGE));
    }

    #[test]
    fn test_context_without_session_denies() {
        let store = PermissionStore::new(PermissionConfig::default());
        let ctx = AccessContext::new(&store, None);
        assert!(!ctx.has_permission("dashboard.view"));
        assert!(!ctx.has_module_access("dashboard"));
    }

    #[test]
    fn test_unparseable_paths_deny() {
        let ctx = AccessContext::for_role(PermissionTree::defaults(), Role::SuperAdmin);
        assert!(!ctx.has_permission(""));
        assert!(!ctx.has_permission("nowhere.view"));
        assert!(!ctx.has_module_access("nowhere"));
        assert!(!AccessGate::parse("admin..view").check(&ctx));
        assert!(AccessGate::parse("admin").check(&ctx));
    }

    #[test]
    fn test_protected_reused_across_roles() {
        let tree = Arc::new(PermissionTree::defaults());
        let panel = protect("wallet.canWithdraw", || "withdraw").or_else(|| "read only");

        let affiliate = AccessContext::for_role(Arc::clone(&tree), Role::Affiliate);
        let customer = AccessContext::for_role(Arc::clone(&tree), Role::Customer);
        assert_eq!(panel.render(&affiliate), GateOutcome::Authorized("withdraw"));
        assert_eq!(panel.render(&customer), GateOutcome::Fallback("read only"));

        let bare = protect("wallet.canWithdraw", || "withdraw");
        assert!(bare.render(&customer).is_hidden());
    }

    #[test]
    fn test_gate_recomputes_after_mutation() {
        let store = PermissionStore::new(PermissionConfig::default());
        let gate = AccessGate::parse("reports");

        let before = AccessContext::for_role(store.snapshot(), Role::Customer);
        assert!(!gate.check(&before));

        store
            .set_module_enabled(Role::Customer, crate::rbac::Module::Reports, true)
            .unwrap();
        let after = AccessContext::for_role(store.snapshot(), Role::Customer);
        assert!(gate.check(&after));
        // 旧快照不受影响
        assert!(!gate.check(&before));
    }
}
