//! Restaurant Gateway client.
//!
//! [`Gateway`] is the REST contract the client core consumes; [`HttpGateway`]
//! speaks it over `reqwest` with the session's bearer token. Any 401 tears the
//! session down before the error is returned.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, StatusCode, Url};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{DineError, DineResult};
use crate::models::{
    Attendance, AttendanceStatus, MenuItem, Order, OrderStatus, Payment, PaymentMethod,
    PaymentStatus, Staff, Table,
};
use crate::storage::Session;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub method: Option<PaymentMethod>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl PaymentFilter {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(status) = self.status {
            query.push(("status", status.as_str().to_string()));
        }
        if let Some(method) = self.method {
            query.push(("paymentMethod", method.as_str().to_string()));
        }
        if let Some(start) = self.start_date {
            query.push(("startDate", start.to_string()));
        }
        if let Some(end) = self.end_date {
            query.push(("endDate", end.to_string()));
        }
        query
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashPaymentRequest {
    pub order_id: String,
    pub amount: Decimal,
    pub amount_received: Decimal,
    pub change: Decimal,
    pub payment_method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPaymentRequest {
    pub order_id: String,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
}

/// `{ success, payment }` as echoed by the payment endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub success: bool,
    pub payment: Option<Payment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceQuery {
    pub staff_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl AttendanceQuery {
    /// Every record for a single day.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            staff_id: None,
            start_date: Some(date),
            end_date: Some(date),
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(staff_id) = &self.staff_id {
            query.push(("staffId", staff_id.clone()));
        }
        if let Some(start) = self.start_date {
            query.push(("startDate", start.to_string()));
        }
        if let Some(end) = self.end_date {
            query.push(("endDate", end.to_string()));
        }
        query
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceUpdate {
    pub staff_id: String,
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: OrderStatus,
}

#[derive(Debug, Deserialize)]
struct OrdersEnvelope {
    orders: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TablesEnvelope {
    tables: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PaymentsEnvelope {
    payments: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MenuEnvelope {
    menu_items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct StaffEnvelope {
    staff: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AttendanceEnvelope {
    data: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Gateway contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Gateway: Send + Sync {
    /// `GET /orders/active`
    async fn active_orders(&self) -> DineResult<Vec<Order>>;
    /// `GET /orders/all`
    async fn all_orders(&self) -> DineResult<Vec<Order>>;
    /// `PATCH /orders/{id}/status`
    async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> DineResult<Order>;
    /// `GET /tables/all`
    async fn tables(&self) -> DineResult<Vec<Table>>;
    /// `GET /payments/all?filters`
    async fn payments(&self, filter: &PaymentFilter) -> DineResult<Vec<Payment>>;
    /// `POST /payments/cash`
    async fn pay_cash(&self, request: &CashPaymentRequest) -> DineResult<PaymentReceipt>;
    /// `POST /payments/qr`
    async fn pay_qr(&self, request: &QrPaymentRequest) -> DineResult<PaymentReceipt>;
    /// `GET /menu/all`
    async fn menu_items(&self) -> DineResult<Vec<MenuItem>>;
    /// `PATCH /menu/{id}`
    async fn update_menu_item(&self, item_id: &str, patch: &MenuItemPatch) -> DineResult<MenuItem>;
    /// `GET /staff/all`
    async fn staff(&self) -> DineResult<Vec<Staff>>;
    /// `GET /staff/attendance-history?params`
    async fn attendance_history(&self, query: &AttendanceQuery) -> DineResult<Vec<Attendance>>;
    /// `PUT /staff/attendance`
    async fn mark_attendance(&self, update: &AttendanceUpdate) -> DineResult<Attendance>;
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach server at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid server URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Fallback text when the Gateway sends no message of its own.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        403 => "You do not have permission for this action".to_string(),
        404 => "Requested record was not found".to_string(),
        s if s >= 500 => format!("Server error (HTTP {s})"),
        s => format!("Unexpected response from server (HTTP {s})"),
    }
}

/// The Gateway's own `message`/`error` text, verbatim, when present.
fn gateway_message(status: StatusCode, body_text: &str) -> String {
    serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("message")
                .or_else(|| json.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            let trimmed = body_text.trim();
            if trimmed.is_empty() || trimmed.starts_with('{') {
                status_error(status)
            } else {
                trimmed.to_string()
            }
        })
}

/// Collections are decoded record by record. A record that does not decode
/// (e.g. an orphaned reference) is logged and skipped; the rest still publish.
fn decode_records<T: DeserializeOwned>(collection: &'static str, records: Vec<Value>) -> Vec<T> {
    records
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| match serde_json::from_value(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(collection, index, error = %e, "skipping undecodable record");
                None
            }
        })
        .collect()
}

/// Single-record endpoints may answer bare or wrapped (`{ "order": {...} }`).
fn unwrap_record<T: DeserializeOwned>(value: Value, key: &str) -> DineResult<T> {
    let inner = match value {
        Value::Object(mut obj) if obj.get(key).map(Value::is_object).unwrap_or(false) => obj
            .remove(key)
            .unwrap_or(Value::Null),
        Value::Object(mut obj) if obj.get("data").map(Value::is_object).unwrap_or(false) => obj
            .remove("data")
            .unwrap_or(Value::Null),
        other => other,
    };
    serde_json::from_value(inner).map_err(DineError::from)
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    config: ClientConfig,
    session: Arc<Session>,
}

impl HttpGateway {
    pub fn new(config: ClientConfig, session: Arc<Session>) -> DineResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DineError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            session,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Base URL plus one path segment per element. Ids are percent-encoded
    /// by `Url`, so `a/b` stays a single segment.
    fn url(&self, segments: &[&str]) -> DineResult<Url> {
        let invalid = || DineError::Network(format!("Invalid server URL: {}", self.config.base_url));
        let mut url = Url::parse(&self.config.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&'static str, String)],
        body: Option<Value>,
    ) -> DineResult<Value> {
        let url = self.url(segments)?;
        let path = url.path().to_string();
        let path = path.as_str();
        debug!(method = %method, path, "gateway request");

        let mut req = self.client.request(method.clone(), url);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(token) = self.session.token() {
            req = req.bearer_auth(token);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req.send().await.map_err(|e| {
            let message = friendly_error(&self.config.base_url, &e);
            warn!(method = %method, path, error = %message, "gateway unreachable");
            DineError::Network(message)
        })?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| DineError::Network(friendly_error(&self.config.base_url, &e)))?;

        if status == StatusCode::UNAUTHORIZED {
            warn!(method = %method, path, "gateway rejected session");
            self.session.teardown();
            return Err(DineError::Unauthorized);
        }
        if !status.is_success() {
            let message = gateway_message(status, &body_text);
            warn!(method = %method, path, status = status.as_u16(), error = %message, "gateway rejected request");
            return Err(DineError::Gateway {
                status: status.as_u16(),
                message,
            });
        }

        // 204 and other empty bodies decode as null.
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(DineError::from)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&'static str, String)],
    ) -> DineResult<T> {
        let value = self.send(Method::GET, segments, query, None).await?;
        serde_json::from_value(value).map_err(DineError::from)
    }

    async fn send_json<B: Serialize>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> DineResult<Value> {
        let body = serde_json::to_value(body)?;
        self.send(method, segments, &[], Some(body)).await
    }

    fn check_receipt(receipt: PaymentReceipt) -> DineResult<PaymentReceipt> {
        if receipt.success && receipt.payment.is_some() {
            Ok(receipt)
        } else {
            Err(DineError::Gateway {
                status: StatusCode::OK.as_u16(),
                message: receipt
                    .message
                    .unwrap_or_else(|| "Payment was not accepted".to_string()),
            })
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn active_orders(&self) -> DineResult<Vec<Order>> {
        let records = self.get::<OrdersEnvelope>(&["orders", "active"], &[]).await?.orders;
        Ok(decode_records("orders", records))
    }

    async fn all_orders(&self) -> DineResult<Vec<Order>> {
        let records = self.get::<OrdersEnvelope>(&["orders", "all"], &[]).await?.orders;
        Ok(decode_records("orders", records))
    }

    async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> DineResult<Order> {
        let value = self
            .send_json(Method::PATCH, &["orders", order_id, "status"], &StatusBody { status })
            .await?;
        unwrap_record(value, "order")
    }

    async fn tables(&self) -> DineResult<Vec<Table>> {
        let records = self.get::<TablesEnvelope>(&["tables", "all"], &[]).await?.tables;
        Ok(decode_records("tables", records))
    }

    async fn payments(&self, filter: &PaymentFilter) -> DineResult<Vec<Payment>> {
        let records = self
            .get::<PaymentsEnvelope>(&["payments", "all"], &filter.query())
            .await?
            .payments;
        Ok(decode_records("payments", records))
    }

    async fn pay_cash(&self, request: &CashPaymentRequest) -> DineResult<PaymentReceipt> {
        let value = self.send_json(Method::POST, &["payments", "cash"], request).await?;
        Self::check_receipt(serde_json::from_value(value)?)
    }

    async fn pay_qr(&self, request: &QrPaymentRequest) -> DineResult<PaymentReceipt> {
        let value = self.send_json(Method::POST, &["payments", "qr"], request).await?;
        Self::check_receipt(serde_json::from_value(value)?)
    }

    async fn menu_items(&self) -> DineResult<Vec<MenuItem>> {
        let records = self.get::<MenuEnvelope>(&["menu", "all"], &[]).await?.menu_items;
        Ok(decode_records("menu", records))
    }

    async fn update_menu_item(&self, item_id: &str, patch: &MenuItemPatch) -> DineResult<MenuItem> {
        let value = self.send_json(Method::PATCH, &["menu", item_id], patch).await?;
        unwrap_record(value, "menuItem")
    }

    async fn staff(&self) -> DineResult<Vec<Staff>> {
        let records = self.get::<StaffEnvelope>(&["staff", "all"], &[]).await?.staff;
        Ok(decode_records("staff", records))
    }

    async fn attendance_history(&self, query: &AttendanceQuery) -> DineResult<Vec<Attendance>> {
        let records = self
            .get::<AttendanceEnvelope>(&["staff", "attendance-history"], &query.query())
            .await?
            .data;
        Ok(decode_records("attendance", records))
    }

    async fn mark_attendance(&self, update: &AttendanceUpdate) -> DineResult<Attendance> {
        let value = self
            .send_json(Method::PUT, &["staff", "attendance"], update)
            .await?;
        unwrap_record(value, "attendance")
    }
}

// ---------------------------------------------------------------------------
// In-memory Gateway for unit tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn payment_filter_builds_query_params() {
        let filter = PaymentFilter {
            status: Some(PaymentStatus::Pending),
            method: Some(PaymentMethod::Qr),
            start_date: NaiveDate::from_ymd_opt(2026, 10, 1),
            end_date: None,
        };
        assert_eq!(
            filter.query(),
            vec![
                ("status", "pending".to_string()),
                ("paymentMethod", "qr".to_string()),
                ("startDate", "2026-10-01".to_string()),
            ]
        );
    }

    #[test]
    fn gateway_message_prefers_body_text() {
        let status = StatusCode::UNPROCESSABLE_ENTITY;
        assert_eq!(
            gateway_message(status, r#"{"message":"Insufficient stock for Pho"}"#),
            "Insufficient stock for Pho"
        );
        assert_eq!(gateway_message(status, r#"{"error":"Bad table"}"#), "Bad table");
        assert_eq!(gateway_message(status, "plain failure"), "plain failure");
        assert_eq!(
            gateway_message(StatusCode::BAD_GATEWAY, ""),
            "Server error (HTTP 502)"
        );
    }

    #[test]
    fn ids_stay_single_path_segments() {
        let session = Arc::new(Session::load(Arc::new(MemoryStore::new())));
        let gw = HttpGateway::new(ClientConfig::new("http://localhost:5000/api/"), session)
            .expect("client");
        assert_eq!(
            gw.url(&["orders", "abc-123", "status"]).expect("url").as_str(),
            "http://localhost:5000/api/orders/abc-123/status"
        );
        assert_eq!(
            gw.url(&["menu", "a/b c"]).expect("url").as_str(),
            "http://localhost:5000/api/menu/a%2Fb%20c"
        );
    }

    #[test]
    fn unwrap_record_accepts_bare_and_wrapped() {
        let bare = serde_json::json!({ "staffId": "s1", "date": "2026-10-16", "status": "present" });
        let wrapped = serde_json::json!({ "success": true, "attendance": bare.clone() });
        let a: Attendance = unwrap_record(bare, "attendance").expect("bare");
        let b: Attendance = unwrap_record(wrapped, "attendance").expect("wrapped");
        assert_eq!(a, b);
    }

    #[test]
    fn cash_request_serializes_camel_case_numbers() {
        let request = CashPaymentRequest {
            order_id: "o1".into(),
            amount: Decimal::from(20),
            amount_received: Decimal::from(25),
            change: Decimal::from(5),
            payment_method: PaymentMethod::Cash,
            notes: None,
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["orderId"], "o1");
        assert_eq!(json["amountReceived"].as_f64(), Some(25.0));
        assert_eq!(json["paymentMethod"], "cash");
        assert!(json.get("notes").is_none());
    }

    #[test]
    fn orphaned_records_are_skipped_not_fatal() {
        let raw = serde_json::json!({
            "payments": [
                {
                    "_id": "p1",
                    "order": { "_id": "o1", "total": 20 },
                    "amount": 20,
                    "paymentMethod": "cash",
                    "paymentStatus": "completed"
                },
                {
                    "_id": "p2",
                    "order": null,
                    "amount": 8,
                    "paymentMethod": "qr",
                    "paymentStatus": "pending"
                }
            ]
        });
        let envelope: PaymentsEnvelope = serde_json::from_value(raw).expect("envelope");
        let payments: Vec<Payment> = decode_records("payments", envelope.payments);
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].order_id, "o1");

        let attendance: Vec<Attendance> = decode_records(
            "attendance",
            vec![
                serde_json::json!({ "staff": null, "date": "2026-10-16", "status": "present" }),
                serde_json::json!({ "staff": { "_id": "s1" }, "date": "2026-10-16", "status": "absent" }),
            ],
        );
        assert_eq!(attendance.len(), 1);
        assert_eq!(attendance[0].staff_id, "s1");
    }
}
