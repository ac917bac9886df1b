//! 管理控制台权限示例
//!
//! 展示权限检查、访问门控、权限管理、导入导出和角色切换。
//!
//! 运行: RUST_LOG=crm_access=debug cargo run --example console_demo

use std::sync::Arc;

use crm_access::rbac::{
    ACCESS_DENIED_MESSAGE, AccessContext, AccessGate, Action, Module, PermissionConfig,
    PermissionStore, Render, Role, protect,
};
use crm_access::session::{SessionConfig, SessionManager, SwitchTarget, UserProfile};
use crm_access::storage::FileLocalStorage;
use crm_access::{InMemoryAuditLogger, InvitationConfig, InvitationManager};
use tracing_subscriber::EnvFilter;

/// 演示各角色能看到的模块
fn demo_sidebar(store: &PermissionStore) {
    println!("📚 各角色可见的模块\n");

    for role in Role::ALL {
        let ctx = AccessContext::for_role(store.snapshot(), role);
        let visible: Vec<&str> = Module::ALL
            .into_iter()
            .filter(|m| ctx.has_module_access(m.as_str()))
            .map(|m| m.as_str())
            .collect();
        println!("  {:<12} {}", role.display_name(), visible.join(", "));
    }
    println!();
}

/// 演示门控与可复用的受保护单元
fn demo_gates(store: &PermissionStore) {
    println!("🚪 访问门控\n");

    let payout_button = protect("commissions.canApprovePayouts", || "[Approve payouts]")
        .or_else(|| ACCESS_DENIED_MESSAGE);

    for role in [Role::Admin, Role::Manager, Role::Affiliate] {
        let ctx = AccessContext::for_role(store.snapshot(), role);
        let rendered = payout_button.render(&ctx).into_option().unwrap_or_default();
        println!("  {:<12} {}", role.display_name(), rendered);
    }

    let anonymous = AccessContext::anonymous();
    let outcome = AccessGate::parse("dashboard").render(
        &anonymous,
        || "dashboard",
        None::<fn() -> &'static str>,
    );
    println!("  未登录       hidden = {}\n", outcome.is_hidden());
}

/// 演示权限管理操作
fn demo_administration(store: &PermissionStore) -> crm_access::Result<()> {
    println!("🛠  权限管理\n");

    store.set_module_enabled(Role::Customer, Module::Reports, true)?;
    store.set_action(Role::Customer, Module::Reports, Action::Export, true)?;
    println!(
        "  customer reports.export = {}",
        store.has_permission(Some(Role::Customer), "reports.export")
    );

    match store.set_action(Role::Customer, Module::Admin, Action::View, true) {
        Ok(()) => println!("  unexpected success"),
        Err(err) => println!("  rejected: {}", err),
    }

    store.set_module_enabled(Role::Customer, Module::Reports, false)?;
    println!(
        "  after disable reports.export = {}",
        store.has_permission(Some(Role::Customer), "reports.export")
    );

    let exported = store.export_permissions()?;
    println!("  exported {} bytes", exported.len());
    match store.import_permissions(r#"{"customer": {}}"#) {
        Ok(()) => println!("  unexpected import success"),
        Err(err) => println!("  import rejected: {}", err),
    }
    store.import_permissions(&exported)?;
    println!();
    Ok(())
}

/// 演示角色切换
fn demo_impersonation(store: &PermissionStore) -> crm_access::Result<()> {
    println!("🎭 角色切换\n");

    let sessions = SessionManager::new(SessionConfig::development());
    sessions.login(UserProfile::new("u1", "Ada", "ada@example.com"), Role::SuperAdmin)?;

    let session = sessions.switch_active_role(store, SwitchTarget::Role(Role::Affiliate))?;
    let ctx = AccessContext::new(store, Some(&session));
    println!(
        "  as {}: admin = {}, wallet.canWithdraw = {}",
        session.role,
        ctx.has_module_access("admin"),
        ctx.has_permission("wallet.canWithdraw")
    );

    let session = sessions.restore_original()?;
    println!("  restored to {}\n", session.role);
    Ok(())
}

/// 演示邀请
fn demo_invitations() -> crm_access::Result<()> {
    println!("✉️  邀请\n");

    let invitations = InvitationManager::new(InvitationConfig::default());
    let invitation = invitations.create("u1", "new.partner@example.com", Role::Affiliate)?;
    println!("  token: {}", invitation.token);
    let accepted = invitations.accept(&invitation.token)?;
    println!("  {} -> {}\n", accepted.email, accepted.status);
    Ok(())
}

fn main() -> crm_access::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let dir = std::env::temp_dir().join("crm_access_demo");
    let storage = Arc::new(FileLocalStorage::new(&dir)?);
    let audit = Arc::new(InMemoryAuditLogger::new());
    let store = PermissionStore::load(PermissionConfig::default(), storage)
        .with_audit_logger(audit.clone());

    demo_sidebar(&store);
    demo_gates(&store);
    demo_administration(&store)?;
    demo_impersonation(&store)?;
    demo_invitations()?;

    println!("📝 审计事件: {}", audit.event_count());
    for event in audit.get_events() {
        println!("  [{}] {}", event.severity, event.event_name());
    }

    store.reset_to_defaults()?;
    Ok(())
}
