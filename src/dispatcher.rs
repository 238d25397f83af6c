//! Action dispatcher.
//!
//! Turns one UI intent into exactly one Gateway call. Guards run first against
//! the cached state, so an invalid request never reaches the network. After a
//! successful call the affected collections are re-fetched; on failure the
//! cache is left exactly as it was and the Gateway's message is shown as is.

use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::api::{AttendanceUpdate, CashPaymentRequest, Gateway, MenuItemPatch, QrPaymentRequest};
use crate::cache::LocalCache;
use crate::error::{DineError, DineResult, ValidationError};
use crate::feedback::Feedback;
use crate::models::{
    format_money, Attendance, AttendanceStatus, MenuItem, Order, OrderStatus, Payment,
    PaymentMethod, PaymentStatus,
};
use crate::sync::Synchronizer;

/// Result of a successful checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome {
    pub payment: Payment,
    /// Change to hand back for cash payments. The Gateway's echoed value wins
    /// over the locally computed one.
    pub change: Option<Decimal>,
}

#[derive(Clone)]
pub struct Dispatcher {
    gateway: Arc<dyn Gateway>,
    cache: LocalCache,
    feedback: Arc<dyn Feedback>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(gateway: Arc<dyn Gateway>, cache: LocalCache, feedback: Arc<dyn Feedback>) -> Self {
        Self {
            gateway,
            cache,
            feedback,
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Move an order one step forward: `pending -> in-progress` or
    /// `in-progress -> completed`.
    pub async fn transition_order(&self, order_id: &str, next: OrderStatus) -> DineResult<Order> {
        let current = self.cached_order(order_id)?;
        if !current.status.can_advance_to(next) {
            return Err(self.reject(ValidationError::InvalidTransition {
                from: current.status,
                to: next,
            }));
        }

        let updated = self
            .call(self.gateway.update_order_status(order_id, next))
            .await?;
        info!(order_id, from = %current.status, to = %next, "order status updated");
        self.feedback.success(&format!("Order marked {next}"));
        self.refresh(&self.cache.orders).await;
        Ok(updated)
    }

    /// Settle a completed order. Cash needs `amount_tendered >= total`; QR
    /// needs no tender and waits for the Gateway's confirmation.
    pub async fn process_payment(
        &self,
        order_id: &str,
        method: PaymentMethod,
        amount_tendered: Option<Decimal>,
    ) -> DineResult<PaymentOutcome> {
        let order = self.cached_order(order_id)?;
        if order.is_paid() || self.has_completed_payment(order_id) {
            return Err(self.reject(ValidationError::AlreadyPaid));
        }
        if order.status != OrderStatus::Completed {
            return Err(self.reject(ValidationError::OrderNotCompleted));
        }

        let (receipt, local_change) = match method {
            PaymentMethod::Cash => {
                let tendered = match amount_tendered {
                    Some(t) => t,
                    None => return Err(self.reject(ValidationError::EmptyField("amountReceived"))),
                };
                if tendered < order.total {
                    return Err(self.reject(ValidationError::InsufficientTender {
                        tendered,
                        total: order.total,
                    }));
                }
                let change = tendered - order.total;
                let request = CashPaymentRequest {
                    order_id: order.id.clone(),
                    amount: order.total,
                    amount_received: tendered,
                    change,
                    payment_method: PaymentMethod::Cash,
                    notes: None,
                };
                (self.call(self.gateway.pay_cash(&request)).await?, Some(change))
            }
            PaymentMethod::Qr => {
                let request = QrPaymentRequest {
                    order_id: order.id.clone(),
                    amount: order.total,
                    payment_method: PaymentMethod::Qr,
                    payment_status: PaymentStatus::Completed,
                };
                (self.call(self.gateway.pay_qr(&request)).await?, None)
            }
        };

        let payment = receipt.payment.ok_or_else(|| {
            DineError::InvalidResponse("payment missing from receipt".to_string())
        })?;
        let change = payment.transaction_details.change.or(local_change);

        info!(
            order_id,
            payment_id = %payment.id,
            method = method.as_str(),
            amount = %payment.amount,
            "payment processed"
        );
        match change {
            Some(c) => self
                .feedback
                .success(&format!("Payment received. Change: {}", format_money(c))),
            None => self.feedback.success("Payment received"),
        }
        self.refresh(&self.cache.orders).await;
        self.refresh(&self.cache.payments).await;

        Ok(PaymentOutcome { payment, change })
    }

    /// Record a staff member's attendance for today. Repeating the same status
    /// still issues the call; the Gateway treats it as an upsert.
    pub async fn update_attendance(
        &self,
        staff_id: &str,
        status: AttendanceStatus,
    ) -> DineResult<Attendance> {
        if staff_id.trim().is_empty() {
            return Err(self.reject(ValidationError::EmptyField("staffId")));
        }
        let update = AttendanceUpdate {
            staff_id: staff_id.to_string(),
            status,
            date: None,
        };
        let record = self.call(self.gateway.mark_attendance(&update)).await?;
        info!(staff_id, status = ?status, "attendance updated");
        self.feedback.success("Attendance updated");
        self.refresh(&self.cache.attendance).await;
        Ok(record)
    }

    /// Set a menu item's stock count.
    pub async fn update_menu_stock(&self, item_id: &str, stock: i64) -> DineResult<MenuItem> {
        if stock < 0 {
            return Err(self.reject(ValidationError::NegativeStock));
        }
        let stock = match u32::try_from(stock) {
            Ok(stock) => stock,
            Err(_) => return Err(self.reject(ValidationError::StockOutOfRange(stock))),
        };
        let patch = MenuItemPatch {
            stock: Some(stock),
            ..MenuItemPatch::default()
        };
        let item = self
            .call(self.gateway.update_menu_item(item_id, &patch))
            .await?;
        info!(item_id, stock = item.stock, "menu stock updated");
        self.feedback.success(&format!("{} stock updated", item.name));
        self.refresh(&self.cache.menu).await;
        Ok(item)
    }

    fn cached_order(&self, order_id: &str) -> DineResult<Order> {
        self.cache
            .find_order(order_id)
            .ok_or_else(|| self.reject(ValidationError::UnknownOrder(order_id.to_string())))
    }

    fn has_completed_payment(&self, order_id: &str) -> bool {
        self.cache
            .payments()
            .iter()
            .any(|p| p.order_id == order_id && p.payment_status == PaymentStatus::Completed)
    }

    /// Local guard failure: shown to the user, never sent anywhere.
    fn reject(&self, err: ValidationError) -> DineError {
        self.feedback.error(&err.to_string());
        err.into()
    }

    /// Await one Gateway call and surface its failure verbatim. No retry.
    async fn call<T>(&self, fut: impl Future<Output = DineResult<T>>) -> DineResult<T> {
        fut.await.map_err(|e| {
            warn!(error = %e, "dispatch failed");
            self.feedback.error(&e.to_string());
            e
        })
    }

    async fn refresh<T>(&self, sync: &Synchronizer<T>)
    where
        T: PartialEq + Send + Sync + 'static,
    {
        if let Err(e) = sync.refresh().await {
            // The action itself succeeded; the next poll tick catches up.
            warn!(collection = sync.name(), error = %e, "post-dispatch refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeGateway;
    use crate::cache::OrderScope;
    use crate::feedback::testing::{RecordingFeedback, Toast};
    use crate::models::{
        MenuItemRef, OrderItem, OrderPaymentStatus, TableRef, TransactionDetails,
    };

    fn order_for_table_five(id: &str, status: OrderStatus) -> Order {
        Order {
            id: id.into(),
            table: Some(TableRef::Number(5)),
            items: vec![OrderItem {
                menu_item: MenuItemRef::Id("m1".into()),
                quantity: 2,
                price: Decimal::TEN,
                notes: None,
            }],
            status,
            payment_status: OrderPaymentStatus::Unpaid,
            subtotal: Decimal::from(20),
            tax: Decimal::ZERO,
            total: Decimal::from(20),
            created_at: None,
            updated_at: None,
        }
    }

    async fn setup(orders: Vec<Order>) -> (Arc<FakeGateway>, Arc<RecordingFeedback>, Dispatcher) {
        let gateway = Arc::new(FakeGateway::with_orders(orders));
        let feedback = Arc::new(RecordingFeedback::default());
        let cache = LocalCache::new(gateway.clone(), OrderScope::All, feedback.clone());
        cache.orders.refresh().await.expect("prime orders");
        cache.payments.refresh().await.expect("prime payments");
        let dispatcher = Dispatcher::new(gateway.clone(), cache, feedback.clone());
        (gateway, feedback, dispatcher)
    }

    #[tokio::test]
    async fn full_order_lifecycle_with_cash() {
        let (gateway, feedback, dispatcher) =
            setup(vec![order_for_table_five("o1", OrderStatus::Pending)]).await;

        let started = dispatcher
            .transition_order("o1", OrderStatus::InProgress)
            .await
            .expect("start cooking");
        assert_eq!(started.status, OrderStatus::InProgress);

        dispatcher
            .transition_order("o1", OrderStatus::Completed)
            .await
            .expect("ready");
        assert_eq!(
            dispatcher.cache().find_order("o1").map(|o| o.status),
            Some(OrderStatus::Completed)
        );

        let outcome = dispatcher
            .process_payment("o1", PaymentMethod::Cash, Some(Decimal::from(25)))
            .await
            .expect("pay");
        assert_eq!(outcome.change, Some(Decimal::from(5)));
        assert_eq!(format_money(outcome.change.unwrap()), "5.00");
        assert_eq!(outcome.payment.amount, Decimal::from(20));

        let settled = dispatcher.cache().find_order("o1").expect("cached order");
        assert_eq!(settled.payment_status, OrderPaymentStatus::Paid);
        assert_eq!(dispatcher.cache().payments().len(), 1);
        assert_eq!(gateway.mutation_count(), 3);
        assert!(feedback
            .toasts()
            .contains(&Toast::Success("Payment received. Change: 5.00".into())));
    }

    #[tokio::test]
    async fn skipping_a_step_fails_before_the_network() {
        let (gateway, feedback, dispatcher) =
            setup(vec![order_for_table_five("o1", OrderStatus::Pending)]).await;
        let before = dispatcher.cache().orders();

        let err = dispatcher
            .transition_order("o1", OrderStatus::Completed)
            .await
            .expect_err("pending cannot jump to completed");

        assert!(matches!(
            err,
            DineError::Validation(ValidationError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Completed
            })
        ));
        assert_eq!(gateway.mutation_count(), 0);
        assert!(Arc::ptr_eq(&before, &dispatcher.cache().orders()));
        assert_eq!(feedback.errors().len(), 1);
    }

    #[tokio::test]
    async fn short_cash_tender_never_calls_the_gateway() {
        let (gateway, _feedback, dispatcher) =
            setup(vec![order_for_table_five("o1", OrderStatus::Completed)]).await;

        let err = dispatcher
            .process_payment("o1", PaymentMethod::Cash, Some(Decimal::new(1999, 2)))
            .await
            .expect_err("short tender");

        assert!(err.is_validation());
        assert!(!gateway.calls().iter().any(|c| c == "pay_cash"));

        let missing = dispatcher
            .process_payment("o1", PaymentMethod::Cash, None)
            .await
            .expect_err("no tender");
        assert!(missing.is_validation());
        assert_eq!(gateway.mutation_count(), 0);
    }

    #[tokio::test]
    async fn unfinished_or_paid_orders_cannot_be_paid() {
        let mut paid = order_for_table_five("o2", OrderStatus::Completed);
        paid.payment_status = OrderPaymentStatus::Paid;
        let (gateway, _feedback, dispatcher) = setup(vec![
            order_for_table_five("o1", OrderStatus::InProgress),
            paid,
        ])
        .await;

        let err = dispatcher
            .process_payment("o1", PaymentMethod::Qr, None)
            .await
            .expect_err("not completed");
        assert!(matches!(
            err,
            DineError::Validation(ValidationError::OrderNotCompleted)
        ));

        let err = dispatcher
            .process_payment("o2", PaymentMethod::Qr, None)
            .await
            .expect_err("already paid");
        assert!(matches!(err, DineError::Validation(ValidationError::AlreadyPaid)));
        assert_eq!(gateway.mutation_count(), 0);
    }

    #[tokio::test]
    async fn qr_payment_needs_no_tender() {
        let (gateway, _feedback, dispatcher) =
            setup(vec![order_for_table_five("o1", OrderStatus::Completed)]).await;

        let outcome = dispatcher
            .process_payment("o1", PaymentMethod::Qr, None)
            .await
            .expect("qr");

        assert_eq!(outcome.payment.payment_method, PaymentMethod::Qr);
        assert_eq!(outcome.payment.payment_status, PaymentStatus::Completed);
        assert!(outcome.change.is_none());
        assert_eq!(gateway.calls().iter().filter(|c| *c == "pay_qr").count(), 1);
    }

    #[tokio::test]
    async fn gateway_rejection_is_shown_verbatim_and_cache_untouched() {
        let (gateway, feedback, dispatcher) =
            setup(vec![order_for_table_five("o1", OrderStatus::Pending)]).await;
        let before = dispatcher.cache().orders();
        gateway.reject_next(409, "Order was modified by another terminal");

        let err = dispatcher
            .transition_order("o1", OrderStatus::InProgress)
            .await
            .expect_err("rejected");

        assert!(matches!(err, DineError::Gateway { status: 409, .. }));
        assert_eq!(
            feedback.errors(),
            vec!["Order was modified by another terminal".to_string()]
        );
        assert!(Arc::ptr_eq(&before, &dispatcher.cache().orders()));
    }

    #[tokio::test]
    async fn unknown_order_is_a_local_failure() {
        let (gateway, _feedback, dispatcher) = setup(Vec::new()).await;
        let err = dispatcher
            .transition_order("ghost", OrderStatus::InProgress)
            .await
            .expect_err("unknown");
        assert!(matches!(
            err,
            DineError::Validation(ValidationError::UnknownOrder(ref id)) if id == "ghost"
        ));
        assert_eq!(gateway.mutation_count(), 0);
    }

    #[tokio::test]
    async fn attendance_update_is_idempotent() {
        let (gateway, _feedback, dispatcher) = setup(Vec::new()).await;

        let first = dispatcher
            .update_attendance("s1", AttendanceStatus::Present)
            .await
            .expect("first");
        let second = dispatcher
            .update_attendance("s1", AttendanceStatus::Present)
            .await
            .expect("second");

        assert_eq!(first, second);
        assert_eq!(gateway.mutation_count(), 2);
        assert_eq!(gateway.state.lock().unwrap().attendance.len(), 1);
        assert_eq!(dispatcher.cache().attendance().as_slice(), &[first]);
    }

    #[tokio::test]
    async fn out_of_range_stock_is_rejected_locally() {
        let (gateway, _feedback, dispatcher) = setup(Vec::new()).await;
        gateway.state.lock().unwrap().menu.push(MenuItem {
            id: "m1".into(),
            name: "Spring rolls".into(),
            category: None,
            price: Decimal::from(6),
            stock: 12,
            available: true,
        });

        let err = dispatcher
            .update_menu_stock("m1", -1)
            .await
            .expect_err("negative");
        assert!(matches!(err, DineError::Validation(ValidationError::NegativeStock)));
        assert_eq!(gateway.mutation_count(), 0);

        let err = dispatcher
            .update_menu_stock("m1", 5_000_000_000)
            .await
            .expect_err("too large");
        assert!(matches!(
            err,
            DineError::Validation(ValidationError::StockOutOfRange(5_000_000_000))
        ));
        assert_eq!(gateway.mutation_count(), 0);
        assert_eq!(gateway.state.lock().unwrap().menu[0].stock, 12);

        let item = dispatcher.update_menu_stock("m1", 3).await.expect("restock");
        assert_eq!(item.stock, 3);
        assert_eq!(dispatcher.cache().menu()[0].stock, 3);
    }

    #[tokio::test]
    async fn cash_receipt_echoes_tender_and_change() {
        let (gateway, _feedback, dispatcher) =
            setup(vec![order_for_table_five("o1", OrderStatus::Completed)]).await;
        // A completed payment already on file for another order does not block this one.
        gateway.state.lock().unwrap().payments.push(Payment {
            id: "old".into(),
            order_id: "other".into(),
            amount: Decimal::ONE,
            payment_method: PaymentMethod::Cash,
            payment_status: PaymentStatus::Completed,
            transaction_details: TransactionDetails::default(),
            created_at: None,
        });

        let outcome = dispatcher
            .process_payment("o1", PaymentMethod::Cash, Some(Decimal::new(2050, 2)))
            .await
            .expect("pay");
        assert_eq!(outcome.change, Some(Decimal::new(50, 2)));
        assert_eq!(
            outcome.payment.transaction_details.amount_received,
            Some(Decimal::new(2050, 2))
        );
    }
}
