//! The local read cache: one synchronizer per Gateway collection.
//!
//! Only synchronizers write here. The projector reads snapshots and the
//! dispatcher asks for refreshes; neither patches a collection in place.

use std::sync::Arc;

use chrono::Utc;

use crate::api::{AttendanceQuery, Gateway, PaymentFilter};
use crate::feedback::Feedback;
use crate::models::{Attendance, MenuItem, Order, Payment, Staff, Table};
use crate::sync::Synchronizer;

/// Which order endpoint backs the orders collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderScope {
    /// `GET /orders/active`
    Active,
    /// `GET /orders/all`
    All,
}

#[derive(Debug, Clone)]
pub struct LocalCache {
    pub orders: Synchronizer<Vec<Order>>,
    pub tables: Synchronizer<Vec<Table>>,
    pub payments: Synchronizer<Vec<Payment>>,
    pub menu: Synchronizer<Vec<MenuItem>>,
    pub staff: Synchronizer<Vec<Staff>>,
    /// Today's attendance records.
    pub attendance: Synchronizer<Vec<Attendance>>,
}

impl LocalCache {
    pub fn new(gateway: Arc<dyn Gateway>, scope: OrderScope, feedback: Arc<dyn Feedback>) -> Self {
        let g = Arc::clone(&gateway);
        let orders = Synchronizer::new("orders", Arc::clone(&feedback), move || {
            let g = Arc::clone(&g);
            async move {
                match scope {
                    OrderScope::Active => g.active_orders().await,
                    OrderScope::All => g.all_orders().await,
                }
            }
        });

        let g = Arc::clone(&gateway);
        let tables = Synchronizer::new("tables", Arc::clone(&feedback), move || {
            let g = Arc::clone(&g);
            async move { g.tables().await }
        });

        let g = Arc::clone(&gateway);
        let payments = Synchronizer::new("payments", Arc::clone(&feedback), move || {
            let g = Arc::clone(&g);
            async move { g.payments(&PaymentFilter::default()).await }
        });

        let g = Arc::clone(&gateway);
        let menu = Synchronizer::new("menu", Arc::clone(&feedback), move || {
            let g = Arc::clone(&g);
            async move { g.menu_items().await }
        });

        let g = Arc::clone(&gateway);
        let staff = Synchronizer::new("staff", Arc::clone(&feedback), move || {
            let g = Arc::clone(&g);
            async move { g.staff().await }
        });

        let g = gateway;
        let attendance = Synchronizer::new("attendance", feedback, move || {
            let g = Arc::clone(&g);
            async move {
                g.attendance_history(&AttendanceQuery::day(Utc::now().date_naive()))
                    .await
            }
        });

        Self {
            orders,
            tables,
            payments,
            menu,
            staff,
            attendance,
        }
    }

    pub fn orders(&self) -> Arc<Vec<Order>> {
        self.orders.latest().unwrap_or_default()
    }

    pub fn tables(&self) -> Arc<Vec<Table>> {
        self.tables.latest().unwrap_or_default()
    }

    pub fn payments(&self) -> Arc<Vec<Payment>> {
        self.payments.latest().unwrap_or_default()
    }

    pub fn menu(&self) -> Arc<Vec<MenuItem>> {
        self.menu.latest().unwrap_or_default()
    }

    pub fn staff(&self) -> Arc<Vec<Staff>> {
        self.staff.latest().unwrap_or_default()
    }

    pub fn attendance(&self) -> Arc<Vec<Attendance>> {
        self.attendance.latest().unwrap_or_default()
    }

    pub fn find_order(&self, order_id: &str) -> Option<Order> {
        self.orders
            .latest()
            .and_then(|orders| orders.iter().find(|o| o.id == order_id).cloned())
    }
}
