//! Role-scoped notification rules and the local read/unread tray.
//!
//! Notifications are never stored by the Gateway. They are re-derived from
//! the cached collections on every synchronizer update; only the read flags
//! and the user's settings live on the client.

use serde::{Deserialize, Serialize};

use crate::models::{
    MenuItem, Order, OrderStatus, Payment, PaymentStatus, Role, LOW_STOCK_THRESHOLD,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    PendingOrders,
    OrdersToPrepare,
    ReadyOrders,
    LowStock,
    PendingPayments,
}

/// Where a notification click navigates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NavTarget {
    Orders,
    Inventory,
    Payments,
}

impl NavTarget {
    /// Route under the role's own section, e.g. `/kitchen/orders`.
    pub fn path(self, role: Role) -> String {
        let view = match self {
            NavTarget::Orders => "orders",
            NavTarget::Inventory => "inventory",
            NavTarget::Payments => "payments",
        };
        format!("/{}/{view}", role.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub count: usize,
    pub message: String,
    pub target: NavTarget,
}

/// Stored under the `notificationSettings` session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub muted: Vec<NotificationKind>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            muted: Vec::new(),
        }
    }
}

impl NotificationSettings {
    pub fn allows(&self, kind: NotificationKind) -> bool {
        self.enabled && !self.muted.contains(&kind)
    }
}

// ---------------------------------------------------------------------------
// Rule table
// ---------------------------------------------------------------------------

/// Collections a rule predicate may look at.
#[derive(Debug, Clone, Copy)]
pub struct RuleInputs<'a> {
    pub orders: &'a [Order],
    pub payments: &'a [Payment],
    pub menu_items: &'a [MenuItem],
    pub low_stock_threshold: u32,
}

struct Rule {
    role: Role,
    kind: NotificationKind,
    target: NavTarget,
    /// `{n}` is replaced by the count.
    template: &'static str,
    count: fn(&RuleInputs<'_>) -> usize,
}

fn pending_orders(inputs: &RuleInputs<'_>) -> usize {
    inputs
        .orders
        .iter()
        .filter(|o| o.status == OrderStatus::Pending)
        .count()
}

/// Cooked and waiting to be served: completed but not yet settled.
fn ready_orders(inputs: &RuleInputs<'_>) -> usize {
    inputs
        .orders
        .iter()
        .filter(|o| o.status == OrderStatus::Completed && !o.is_paid())
        .count()
}

fn low_stock_items(inputs: &RuleInputs<'_>) -> usize {
    inputs
        .menu_items
        .iter()
        .filter(|m| m.is_low_stock(inputs.low_stock_threshold))
        .count()
}

fn pending_payments(inputs: &RuleInputs<'_>) -> usize {
    inputs
        .payments
        .iter()
        .filter(|p| p.payment_status == PaymentStatus::Pending)
        .count()
}

// Evaluation order is table order; output is not severity-sorted.
const RULES: &[Rule] = &[
    Rule {
        role: Role::Admin,
        kind: NotificationKind::PendingOrders,
        target: NavTarget::Orders,
        template: "{n} pending orders",
        count: pending_orders,
    },
    Rule {
        role: Role::Admin,
        kind: NotificationKind::LowStock,
        target: NavTarget::Inventory,
        template: "{n} items low in stock",
        count: low_stock_items,
    },
    Rule {
        role: Role::Admin,
        kind: NotificationKind::PendingPayments,
        target: NavTarget::Payments,
        template: "{n} pending payments",
        count: pending_payments,
    },
    Rule {
        role: Role::Server,
        kind: NotificationKind::ReadyOrders,
        target: NavTarget::Orders,
        template: "{n} orders ready to serve",
        count: ready_orders,
    },
    Rule {
        role: Role::Kitchen,
        kind: NotificationKind::OrdersToPrepare,
        target: NavTarget::Orders,
        template: "{n} orders to prepare",
        count: pending_orders,
    },
    Rule {
        role: Role::Kitchen,
        kind: NotificationKind::LowStock,
        target: NavTarget::Inventory,
        template: "{n} items low in stock",
        count: low_stock_items,
    },
    Rule {
        role: Role::Cashier,
        kind: NotificationKind::PendingPayments,
        target: NavTarget::Payments,
        template: "{n} pending payments",
        count: pending_payments,
    },
];

/// Evaluate the rule table for `role` with the default low-stock threshold.
pub fn project_notifications(
    role: Role,
    orders: &[Order],
    payments: &[Payment],
    menu_items: &[MenuItem],
) -> Vec<Notification> {
    evaluate(
        role,
        &RuleInputs {
            orders,
            payments,
            menu_items,
            low_stock_threshold: LOW_STOCK_THRESHOLD,
        },
    )
}

/// Evaluate the rule table for `role`. Rules with a zero count produce nothing.
pub fn evaluate(role: Role, inputs: &RuleInputs<'_>) -> Vec<Notification> {
    RULES
        .iter()
        .filter(|rule| rule.role == role)
        .filter_map(|rule| {
            let n = (rule.count)(inputs);
            (n > 0).then(|| Notification {
                kind: rule.kind,
                count: n,
                message: rule.template.replace("{n}", &n.to_string()),
                target: rule.target,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tray
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrayEntry {
    #[serde(flatten)]
    pub notification: Notification,
    pub read: bool,
}

/// Bell state for one console. Read flags are local-only and reset whenever
/// the evaluated rule set changes.
#[derive(Debug, Clone, Default)]
pub struct NotificationTray {
    entries: Vec<TrayEntry>,
    settings: NotificationSettings,
}

impl NotificationTray {
    pub fn new(settings: NotificationSettings) -> Self {
        Self {
            entries: Vec::new(),
            settings,
        }
    }

    /// Replace the evaluated set. Returns `true` when it differed, in which
    /// case every entry is unread again.
    pub fn update(&mut self, notifications: Vec<Notification>) -> bool {
        let unchanged = self.entries.len() == notifications.len()
            && self
                .entries
                .iter()
                .zip(&notifications)
                .all(|(entry, n)| entry.notification == *n);
        if unchanged {
            return false;
        }
        self.entries = notifications
            .into_iter()
            .map(|notification| TrayEntry {
                notification,
                read: false,
            })
            .collect();
        true
    }

    pub fn settings(&self) -> &NotificationSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: NotificationSettings) {
        self.settings = settings;
    }

    /// Entries the user's settings allow, in rule order.
    pub fn visible(&self) -> Vec<&TrayEntry> {
        self.entries
            .iter()
            .filter(|e| self.settings.allows(e.notification.kind))
            .collect()
    }

    pub fn unread_count(&self) -> usize {
        self.visible().iter().filter(|e| !e.read).count()
    }

    pub fn mark_read(&mut self, kind: NotificationKind) {
        for entry in self.entries.iter_mut().filter(|e| e.notification.kind == kind) {
            entry.read = true;
        }
    }

    pub fn mark_all_read(&mut self) {
        for entry in &mut self.entries {
            entry.read = true;
        }
    }
}
