//! Derived views over the cached collections.
//!
//! Everything here is a pure function of its inputs: identical collections
//! give identical output, and nothing touches the cache or the network.
//! Money is summed in full `Decimal` precision; rounding is left to
//! [`crate::models::format_money`].

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::api::PaymentFilter;
use crate::models::{
    Attendance, MenuItem, Order, OrderItem, OrderStatus, Payment, PaymentStatus, Staff, Table,
    TableStatus,
};

pub const DEFAULT_ACTIVITY_LIMIT: usize = 10;

// ---------------------------------------------------------------------------
// Kitchen
// ---------------------------------------------------------------------------

/// Completed orders the kitchen has handed over. Held only in memory by the
/// kitchen console; a reload forgets it.
pub type DeliveredMarks = HashSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KitchenFilter {
    #[default]
    All,
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.cancelled
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KitchenView {
    pub counts: StatusCounts,
    pub pending: Vec<Order>,
    pub in_progress: Vec<Order>,
    pub completed: Vec<Order>,
    pub cancelled: Vec<Order>,
    /// Orders shown under the current filter. Delivered and cancelled orders
    /// never appear here.
    pub visible: Vec<Order>,
}

/// Partition orders into status buckets. Every input order lands in exactly
/// one bucket.
pub fn project_kitchen_view(
    orders: &[Order],
    filter: KitchenFilter,
    delivered: &DeliveredMarks,
) -> KitchenView {
    let mut view = KitchenView::default();
    for order in orders {
        match order.status {
            OrderStatus::Pending => view.pending.push(order.clone()),
            OrderStatus::InProgress => view.in_progress.push(order.clone()),
            OrderStatus::Completed => view.completed.push(order.clone()),
            OrderStatus::Cancelled => view.cancelled.push(order.clone()),
        }
    }
    view.counts = StatusCounts {
        pending: view.pending.len(),
        in_progress: view.in_progress.len(),
        completed: view.completed.len(),
        cancelled: view.cancelled.len(),
    };

    let shown = |order: &&Order| match order.status {
        OrderStatus::Pending => matches!(filter, KitchenFilter::All | KitchenFilter::Pending),
        OrderStatus::InProgress => matches!(filter, KitchenFilter::All | KitchenFilter::InProgress),
        OrderStatus::Completed => {
            matches!(filter, KitchenFilter::All | KitchenFilter::Completed)
                && !delivered.contains(&order.id)
        }
        OrderStatus::Cancelled => false,
    };
    view.visible = orders.iter().filter(shown).cloned().collect();
    view
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeRange {
    #[default]
    Today,
    Week,
    Month,
    Year,
}

impl TimeRange {
    /// Half-open `[start, end)` window ending at `now`. `Today` is the UTC
    /// calendar day.
    pub fn window(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            TimeRange::Today => {
                let start = now
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc())
                    .unwrap_or(now);
                (start, start + Duration::days(1))
            }
            TimeRange::Week => (now - Duration::days(7), now),
            TimeRange::Month => (now - Duration::days(30), now),
            TimeRange::Year => (now - Duration::days(365), now),
        }
    }

    /// The same-length window immediately before [`TimeRange::window`].
    pub fn previous_window(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let (start, end) = self.window(now);
        (start - (end - start), start)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DashboardInputs<'a> {
    pub orders: &'a [Order],
    pub payments: &'a [Payment],
    pub staff: &'a [Staff],
    pub attendance: &'a [Attendance],
    pub menu_items: &'a [MenuItem],
    pub low_stock_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_sales: Decimal,
    pub previous_sales: Decimal,
    /// Percent change against the previous window.
    pub sales_change_pct: Decimal,
    pub completed_payments: usize,
    pub average_order_value: Decimal,
    pub active_orders: usize,
    pub pending_orders: usize,
    pub staff_present: usize,
    pub staff_total: usize,
    pub staff_presence_ratio: f64,
    pub low_stock_items: usize,
}

fn completed_in(payments: &[Payment], (start, end): (DateTime<Utc>, DateTime<Utc>)) -> Vec<&Payment> {
    payments
        .iter()
        .filter(|p| p.payment_status == PaymentStatus::Completed)
        .filter(|p| matches!(p.created_at, Some(at) if at >= start && at < end))
        .collect()
}

pub fn percent_change(current: Decimal, previous: Decimal) -> Decimal {
    if previous.is_zero() {
        if current.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::ONE_HUNDRED
        }
    } else {
        (current - previous) / previous * Decimal::ONE_HUNDRED
    }
}

pub fn project_dashboard_stats(
    inputs: &DashboardInputs<'_>,
    range: TimeRange,
    now: DateTime<Utc>,
) -> DashboardStats {
    let current = completed_in(inputs.payments, range.window(now));
    let previous = completed_in(inputs.payments, range.previous_window(now));

    let total_sales: Decimal = current.iter().map(|p| p.amount).sum();
    let previous_sales: Decimal = previous.iter().map(|p| p.amount).sum();
    let average_order_value = if current.is_empty() {
        Decimal::ZERO
    } else {
        total_sales / Decimal::from(current.len())
    };

    let today = now.date_naive();
    let on_duty: HashSet<&str> = inputs
        .attendance
        .iter()
        .filter(|a| a.date == today && a.status.is_on_duty())
        .map(|a| a.staff_id.as_str())
        .collect();
    let staff_total = inputs.staff.len();
    let staff_present = inputs
        .staff
        .iter()
        .filter(|s| on_duty.contains(s.id.as_str()))
        .count();
    let staff_presence_ratio = if staff_total == 0 {
        0.0
    } else {
        staff_present as f64 / staff_total as f64
    };

    DashboardStats {
        total_sales,
        previous_sales,
        sales_change_pct: percent_change(total_sales, previous_sales),
        completed_payments: current.len(),
        average_order_value,
        active_orders: inputs.orders.iter().filter(|o| o.is_active()).count(),
        pending_orders: inputs
            .orders
            .iter()
            .filter(|o| o.status == OrderStatus::Pending)
            .count(),
        staff_present,
        staff_total,
        staff_presence_ratio,
        low_stock_items: inputs
            .menu_items
            .iter()
            .filter(|m| m.is_low_stock(inputs.low_stock_threshold))
            .count(),
    }
}

// ---------------------------------------------------------------------------
// Recent activity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    OrderCreated,
    OrderCompleted,
    OrderCancelled,
    TableStatusChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub at: DateTime<Utc>,
    /// Id of the order or table the entry is about.
    pub reference: String,
    pub description: String,
}

fn short_id(id: &str) -> &str {
    let start = id.len().saturating_sub(6);
    id.get(start..).unwrap_or(id)
}

/// Order lifecycle and table status events merged newest first. Entries
/// without a usable timestamp are skipped.
pub fn project_recent_activity(orders: &[Order], tables: &[Table], limit: usize) -> Vec<ActivityEntry> {
    let mut entries = Vec::new();

    for order in orders {
        let label = format!("Order #{}", short_id(&order.id));
        if let Some(at) = order.created_at {
            entries.push(ActivityEntry {
                kind: ActivityKind::OrderCreated,
                at,
                reference: order.id.clone(),
                description: format!("{label} placed for {}", order.table_label()),
            });
        }
        let closing = match order.status {
            OrderStatus::Completed => Some((ActivityKind::OrderCompleted, "completed")),
            OrderStatus::Cancelled => Some((ActivityKind::OrderCancelled, "cancelled")),
            _ => None,
        };
        if let (Some((kind, verb)), Some(at)) = (closing, order.updated_at) {
            entries.push(ActivityEntry {
                kind,
                at,
                reference: order.id.clone(),
                description: format!("{label} {verb}"),
            });
        }
    }

    for table in tables {
        if let Some(at) = table.last_status_change {
            let state = match table.status {
                TableStatus::Available => "available",
                TableStatus::Occupied => "occupied",
            };
            entries.push(ActivityEntry {
                kind: ActivityKind::TableStatusChanged,
                at,
                reference: table.id.clone(),
                description: format!("Table {} is now {state}", table.number),
            });
        }
    }

    entries.sort_by(|a, b| b.at.cmp(&a.at));
    entries.truncate(limit);
    entries
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

/// Apply a payment filter locally. Date bounds are inclusive calendar days
/// (UTC); payments without a timestamp fail any date bound.
pub fn filter_payments(payments: &[Payment], filter: &PaymentFilter) -> Vec<Payment> {
    payments
        .iter()
        .filter(|p| filter.status.map_or(true, |s| p.payment_status == s))
        .filter(|p| filter.method.map_or(true, |m| p.payment_method == m))
        .filter(|p| {
            let day = p.created_at.map(|at| at.date_naive());
            let after_start = filter
                .start_date
                .map_or(true, |start| day.map_or(false, |d| d >= start));
            let before_end = filter
                .end_date
                .map_or(true, |end| day.map_or(false, |d| d <= end));
            after_start && before_end
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDayGroup {
    pub date: NaiveDate,
    /// Newest first.
    pub payments: Vec<Payment>,
    /// Sum of completed payments only.
    pub total: Decimal,
}

/// Group transactions by UTC calendar day, newest day first.
pub fn group_payments_by_day(payments: &[Payment]) -> Vec<PaymentDayGroup> {
    let mut days: BTreeMap<NaiveDate, Vec<Payment>> = BTreeMap::new();
    for payment in payments {
        if let Some(at) = payment.created_at {
            days.entry(at.date_naive()).or_default().push(payment.clone());
        }
    }

    days.into_iter()
        .rev()
        .map(|(date, mut payments)| {
            payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let total = payments
                .iter()
                .filter(|p| p.payment_status == PaymentStatus::Completed)
                .map(|p| p.amount)
                .sum();
            PaymentDayGroup {
                date,
                payments,
                total,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Recompute an order's totals from its lines. `tax_rate` is a fraction
/// (0.1 for 10%).
pub fn project_order_totals(items: &[OrderItem], tax_rate: Decimal) -> OrderTotals {
    let subtotal: Decimal = items.iter().map(OrderItem::line_total).sum();
    let tax = subtotal * tax_rate;
    OrderTotals {
        subtotal,
        tax,
        total: subtotal + tax,
    }
}
