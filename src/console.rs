//! Role console: one terminal's view of the restaurant.
//!
//! Wires the local cache, the dispatcher and the notification relay for a
//! single role. Each role polls only the collections its screens read, and
//! notifications are recomputed whenever one of them publishes a new
//! snapshot. Polling stops on its own when the session is torn down.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{Gateway, PaymentFilter};
use crate::cache::{LocalCache, OrderScope};
use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{DineResult, ValidationError};
use crate::feedback::Feedback;
use crate::models::{OrderStatus, Role};
use crate::notifications::{
    evaluate, Notification, NotificationKind, NotificationSettings, NotificationTray, RuleInputs,
    TrayEntry,
};
use crate::projector::{
    filter_payments, group_payments_by_day, project_dashboard_stats, project_kitchen_view,
    project_recent_activity, ActivityEntry, DashboardInputs, DashboardStats, DeliveredMarks,
    KitchenFilter, KitchenView, PaymentDayGroup, TimeRange,
};
use crate::storage::Session;
use crate::sync::{PollHandle, Synchronizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Orders,
    Tables,
    Payments,
    Menu,
    Staff,
    Attendance,
}

/// Collections a role's screens read, in start order.
pub fn polled_collections(role: Role) -> &'static [Collection] {
    match role {
        Role::Admin => &[
            Collection::Orders,
            Collection::Payments,
            Collection::Menu,
            Collection::Tables,
            Collection::Staff,
            Collection::Attendance,
        ],
        Role::Server => &[Collection::Orders, Collection::Tables],
        Role::Kitchen => &[Collection::Orders, Collection::Menu],
        Role::Cashier => &[Collection::Orders, Collection::Payments],
    }
}

/// Admin reports and cashier history need settled orders too.
pub fn order_scope(role: Role) -> OrderScope {
    match role {
        Role::Admin | Role::Cashier => OrderScope::All,
        Role::Server | Role::Kitchen => OrderScope::Active,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn stop_all(polls: &Mutex<Vec<PollHandle>>) -> usize {
    let handles: Vec<PollHandle> = lock(polls).drain(..).collect();
    for handle in &handles {
        handle.stop();
    }
    handles.len()
}

// ---------------------------------------------------------------------------
// Notification relay
// ---------------------------------------------------------------------------

struct Relay {
    role: Role,
    low_stock_threshold: u32,
    cache: LocalCache,
    tray: Mutex<NotificationTray>,
    published: watch::Sender<Vec<Notification>>,
}

impl Relay {
    fn recompute(&self) {
        let orders = self.cache.orders();
        let payments = self.cache.payments();
        let menu = self.cache.menu();
        let evaluated = evaluate(
            self.role,
            &RuleInputs {
                orders: &orders,
                payments: &payments,
                menu_items: &menu,
                low_stock_threshold: self.low_stock_threshold,
            },
        );

        let mut tray = lock(&self.tray);
        if tray.update(evaluated) {
            for entry in tray.visible() {
                info!(
                    role = %self.role,
                    kind = ?entry.notification.kind,
                    count = entry.notification.count,
                    "{}",
                    entry.notification.message
                );
            }
            self.publish(&tray);
        }
    }

    fn publish(&self, tray: &NotificationTray) {
        let visible: Vec<Notification> = tray
            .visible()
            .into_iter()
            .map(|entry| entry.notification.clone())
            .collect();
        self.published.send_if_modified(|current| {
            if *current == visible {
                return false;
            }
            *current = visible;
            true
        });
    }
}

fn relay_on_update<T>(relay: &Arc<Relay>, sync: &Synchronizer<T>)
where
    T: PartialEq + Send + Sync + 'static,
{
    let relay: Weak<Relay> = Arc::downgrade(relay);
    sync.on_update(move |_| {
        if let Some(relay) = relay.upgrade() {
            relay.recompute();
        }
    });
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

pub struct RoleConsole {
    role: Role,
    config: ClientConfig,
    session: Arc<Session>,
    cache: LocalCache,
    dispatcher: Dispatcher,
    relay: Arc<Relay>,
    delivered: Mutex<DeliveredMarks>,
    polls: Arc<Mutex<Vec<PollHandle>>>,
}

impl RoleConsole {
    pub fn new(
        role: Role,
        config: ClientConfig,
        gateway: Arc<dyn Gateway>,
        session: Arc<Session>,
        feedback: Arc<dyn Feedback>,
    ) -> Self {
        let cache = LocalCache::new(Arc::clone(&gateway), order_scope(role), Arc::clone(&feedback));
        let dispatcher = Dispatcher::new(gateway, cache.clone(), feedback);
        let relay = Arc::new(Relay {
            role,
            low_stock_threshold: config.low_stock_threshold,
            cache: cache.clone(),
            tray: Mutex::new(NotificationTray::new(session.notification_settings())),
            published: watch::channel(Vec::new()).0,
        });

        // Only the inputs of the rule table trigger a recompute.
        relay_on_update(&relay, &cache.orders);
        relay_on_update(&relay, &cache.payments);
        relay_on_update(&relay, &cache.menu);

        Self {
            role,
            config,
            session,
            cache,
            dispatcher,
            relay,
            delivered: Mutex::new(DeliveredMarks::new()),
            polls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn interval(&self, collection: Collection) -> Duration {
        match (self.role, collection) {
            (Role::Admin, _) => self.config.dashboard_poll_interval,
            (_, Collection::Orders) => self.config.kitchen_poll_interval,
            _ => self.config.dashboard_poll_interval,
        }
    }

    // -- Polling -------------------------------------------------------------

    /// Start polling every collection the role reads. Calling it again while
    /// running is a no-op. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut polls = lock(&self.polls);
        if !polls.is_empty() {
            debug!(role = %self.role, "console already running");
            return;
        }

        for &collection in polled_collections(self.role) {
            let every = self.interval(collection);
            let handle = match collection {
                Collection::Orders => self.cache.orders.start_polling(every, |_| {}),
                Collection::Tables => self.cache.tables.start_polling(every, |_| {}),
                Collection::Payments => self.cache.payments.start_polling(every, |_| {}),
                Collection::Menu => self.cache.menu.start_polling(every, |_| {}),
                Collection::Staff => self.cache.staff.start_polling(every, |_| {}),
                Collection::Attendance => self.cache.attendance.start_polling(every, |_| {}),
            };
            polls.push(handle);
        }
        info!(role = %self.role, collections = polls.len(), "console started");
        drop(polls);

        let mut signed_in = self.session.subscribe();
        let polls = Arc::clone(&self.polls);
        let role = self.role;
        tokio::spawn(async move {
            while signed_in.changed().await.is_ok() {
                if !*signed_in.borrow_and_update() {
                    let stopped = stop_all(&polls);
                    info!(role = %role, stopped, "session ended; polling stopped");
                    break;
                }
            }
        });
    }

    pub fn is_running(&self) -> bool {
        lock(&self.polls).iter().any(|h| !h.is_stopped())
    }

    /// Stop every poll loop. In-flight responses are discarded.
    pub fn stop(&self) {
        let stopped = stop_all(&self.polls);
        if stopped > 0 {
            info!(role = %self.role, stopped, "console stopped");
        }
    }

    /// Stop and wait for every poll loop to exit.
    pub async fn shutdown(&self) {
        let handles: Vec<PollHandle> = lock(&self.polls).drain(..).collect();
        for handle in handles {
            handle.shutdown().await;
        }
        info!(role = %self.role, "console shut down");
    }

    /// Fetch every collection the role reads once, in order.
    pub async fn refresh_all(&self) -> DineResult<()> {
        for &collection in polled_collections(self.role) {
            match collection {
                Collection::Orders => self.cache.orders.refresh().await?,
                Collection::Tables => self.cache.tables.refresh().await?,
                Collection::Payments => self.cache.payments.refresh().await?,
                Collection::Menu => self.cache.menu.refresh().await?,
                Collection::Staff => self.cache.staff.refresh().await?,
                Collection::Attendance => self.cache.attendance.refresh().await?,
            };
        }
        Ok(())
    }

    // -- Notifications -------------------------------------------------------

    /// Current notifications, pushed on every change of the evaluated set.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.relay.published.subscribe()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.relay.published.borrow().clone()
    }

    pub fn tray_entries(&self) -> Vec<TrayEntry> {
        lock(&self.relay.tray).visible().into_iter().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        lock(&self.relay.tray).unread_count()
    }

    pub fn mark_read(&self, kind: NotificationKind) {
        lock(&self.relay.tray).mark_read(kind);
    }

    pub fn mark_all_read(&self) {
        lock(&self.relay.tray).mark_all_read();
    }

    pub fn notification_settings(&self) -> NotificationSettings {
        lock(&self.relay.tray).settings().clone()
    }

    /// Persist new settings and republish under them.
    pub fn set_notification_settings(&self, settings: NotificationSettings) -> DineResult<()> {
        self.session.set_notification_settings(&settings)?;
        let mut tray = lock(&self.relay.tray);
        tray.set_settings(settings);
        self.relay.publish(&tray);
        Ok(())
    }

    // -- Views ---------------------------------------------------------------

    pub fn kitchen_view(&self, filter: KitchenFilter) -> KitchenView {
        project_kitchen_view(&self.cache.orders(), filter, &lock(&self.delivered))
    }

    /// Hide a completed order from the kitchen board. Local to this console.
    pub fn mark_delivered(&self, order_id: &str) -> DineResult<()> {
        let order = self
            .cache
            .find_order(order_id)
            .ok_or_else(|| ValidationError::UnknownOrder(order_id.to_string()))?;
        if order.status != OrderStatus::Completed {
            warn!(order_id, status = %order.status, "cannot deliver unfinished order");
            return Err(ValidationError::OrderNotCompleted.into());
        }
        lock(&self.delivered).insert(order.id);
        info!(order_id, "order delivered");
        Ok(())
    }

    pub fn dashboard_stats(&self, range: TimeRange) -> DashboardStats {
        let orders = self.cache.orders();
        let payments = self.cache.payments();
        let staff = self.cache.staff();
        let attendance = self.cache.attendance();
        let menu = self.cache.menu();
        project_dashboard_stats(
            &DashboardInputs {
                orders: &orders,
                payments: &payments,
                staff: &staff,
                attendance: &attendance,
                menu_items: &menu,
                low_stock_threshold: self.config.low_stock_threshold,
            },
            range,
            Utc::now(),
        )
    }

    pub fn recent_activity(&self) -> Vec<ActivityEntry> {
        project_recent_activity(
            &self.cache.orders(),
            &self.cache.tables(),
            self.config.activity_limit,
        )
    }

    /// Cashier transaction history, filtered and grouped by day.
    pub fn payment_groups(&self, filter: &PaymentFilter) -> Vec<PaymentDayGroup> {
        group_payments_by_day(&filter_payments(&self.cache.payments(), filter))
    }
}

impl std::fmt::Debug for RoleConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleConsole")
            .field("role", &self.role)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for RoleConsole {
    fn drop(&mut self) {
        stop_all(&self.polls);
    }
}
