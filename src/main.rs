//! Headless monitor: polls the Gateway for one role and logs its
//! notifications until Ctrl-C or until the session is rejected.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};

use dinetrack::db::LocalSettings;
use dinetrack::diagnostics;
use dinetrack::models::{format_money, Role};
use dinetrack::projector::TimeRange;
use dinetrack::storage::{KeyringStore, KEY_TOKEN};
use dinetrack::{ClientConfig, HttpGateway, LogFeedback, RoleConsole, Session, SessionStore};

fn session_store() -> Result<Arc<dyn SessionStore>> {
    match std::env::var("DINETRACK_SETTINGS_DB") {
        Ok(path) if !path.trim().is_empty() => {
            let settings = LocalSettings::open(path.trim())
                .with_context(|| format!("opening settings database {path}"))?;
            Ok(Arc::new(settings))
        }
        _ => Ok(Arc::new(KeyringStore::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ClientConfig::from_env();
    let _log_guard = diagnostics::init_logging(config.log_dir.as_deref());
    let role = match std::env::var("DINETRACK_ROLE") {
        Ok(raw) => Role::parse(&raw).ok_or_else(|| anyhow!("unknown role '{raw}'"))?,
        Err(_) => Role::Admin,
    };

    let store = session_store()?;
    if let Ok(token) = std::env::var("DINETRACK_TOKEN") {
        store
            .set(KEY_TOKEN, token.trim())
            .context("storing session token")?;
    }
    let session = Arc::new(Session::load(store));
    if !session.is_signed_in() {
        bail!("no session token; set DINETRACK_TOKEN or sign in first");
    }

    info!(role = %role, base_url = %config.base_url, "dinetrack monitor starting");
    let gateway = Arc::new(
        HttpGateway::new(config.clone(), Arc::clone(&session)).context("building HTTP client")?,
    );
    let console = RoleConsole::new(
        role,
        config.clone(),
        gateway,
        Arc::clone(&session),
        Arc::new(LogFeedback),
    );
    console.start();

    let mut notifications = console.subscribe();
    let mut signed_in = session.subscribe();
    let mut report = tokio::time::interval(config.dashboard_poll_interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            changed = notifications.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = notifications.borrow_and_update().clone();
                if current.is_empty() {
                    info!(role = %role, "all clear");
                }
            }
            changed = signed_in.changed() => {
                if changed.is_err() || !*signed_in.borrow_and_update() {
                    warn!("session rejected by the gateway; sign in again");
                    break;
                }
            }
            _ = report.tick() => {
                if role == Role::Admin {
                    let stats = console.dashboard_stats(TimeRange::Today);
                    info!(
                        sales = %format_money(stats.total_sales),
                        change_pct = %stats.sales_change_pct.round_dp(1),
                        active_orders = stats.active_orders,
                        staff_present = stats.staff_present,
                        staff_total = stats.staff_total,
                        low_stock = stats.low_stock_items,
                        "dashboard"
                    );
                }
            }
        }
    }

    console.shutdown().await;
    Ok(())
}
