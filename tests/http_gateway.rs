//! `HttpGateway` against an in-process axum backend.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use dinetrack::api::{CashPaymentRequest, PaymentFilter};
use dinetrack::models::{OrderStatus, PaymentMethod, PaymentStatus, Role, TableRef, UserProfile};
use dinetrack::storage::MemoryStore;
use dinetrack::{ClientConfig, DineError, Gateway, HttpGateway, Session};

#[derive(Debug, Default)]
struct Seen {
    auth: Vec<Option<String>>,
    paths: Vec<String>,
    bodies: Vec<Value>,
    queries: Vec<HashMap<String, String>>,
}

type Shared = Arc<Mutex<Seen>>;

fn record_auth(seen: &Shared, headers: &HeaderMap, path: String) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut seen = seen.lock().unwrap();
    seen.auth.push(auth);
    seen.paths.push(path);
}

async fn active_orders(State(seen): State<Shared>, headers: HeaderMap) -> Json<Value> {
    record_auth(&seen, &headers, "/orders/active".into());
    Json(json!({
        "orders": [{
            "_id": "o1",
            "tableId": 5,
            "items": [{ "menuItem": { "_id": "m1", "name": "Pho" }, "quantity": 2, "price": 10 }],
            "status": "pending",
            "paymentStatus": "unpaid",
            "subtotal": 20,
            "tax": 0,
            "total": 20,
            "createdAt": "2026-10-16T10:00:00Z"
        }]
    }))
}

async fn update_status(
    State(seen): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    record_auth(&seen, &headers, format!("/orders/{id}/status"));
    let status = body["status"].clone();
    seen.lock().unwrap().bodies.push(body);
    Json(json!({
        "order": { "_id": id, "tableId": 5, "status": status, "total": 20 }
    }))
}

async fn pay_cash(
    State(seen): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    record_auth(&seen, &headers, "/payments/cash".into());
    let reply = json!({
        "success": true,
        "payment": {
            "_id": "pay-1",
            "order": body["orderId"],
            "amount": body["amount"],
            "paymentMethod": body["paymentMethod"],
            "paymentStatus": "completed",
            "transactionDetails": {
                "amountReceived": body["amountReceived"],
                "change": body["change"]
            },
            "createdAt": "2026-10-16T12:30:00Z"
        }
    });
    seen.lock().unwrap().bodies.push(body);
    Json(reply)
}

async fn payments_all(
    State(seen): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    record_auth(&seen, &headers, "/payments/all".into());
    seen.lock().unwrap().queries.push(query);
    Json(json!({
        "payments": [
            {
                "_id": "pay-1",
                "order": "o1",
                "amount": 8,
                "paymentMethod": "qr",
                "paymentStatus": "pending"
            },
            {
                "_id": "pay-2",
                "order": null,
                "amount": 3,
                "paymentMethod": "qr",
                "paymentStatus": "pending"
            }
        ]
    }))
}

async fn menu_all() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": "Token expired" })),
    )
}

async fn tables_all() -> (StatusCode, Json<Value>) {
    (
        StatusCode::CONFLICT,
        Json(json!({ "message": "Table 5 is already occupied" })),
    )
}

async fn spawn_backend() -> (SocketAddr, Shared) {
    let seen = Shared::default();
    let app = Router::new()
        .route("/api/orders/active", get(active_orders))
        .route("/api/orders/{id}/status", patch(update_status))
        .route("/api/payments/cash", post(pay_cash))
        .route("/api/payments/all", get(payments_all))
        .route("/api/menu/all", get(menu_all))
        .route("/api/tables/all", get(tables_all))
        .with_state(Arc::clone(&seen));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, seen)
}

fn signed_in_session() -> Arc<Session> {
    let session = Session::load(Arc::new(MemoryStore::new()));
    session
        .sign_in(
            "secret-token",
            &UserProfile {
                id: "u1".into(),
                full_name: "Front Desk".into(),
                email: Some("desk@example.com".into()),
                role: Role::Cashier,
            },
        )
        .expect("sign in");
    Arc::new(session)
}

fn gateway(addr: SocketAddr, session: Arc<Session>) -> HttpGateway {
    HttpGateway::new(ClientConfig::new(format!("http://{addr}/api/")), session).expect("client")
}

#[tokio::test]
async fn requests_carry_the_bearer_token() {
    let (addr, seen) = spawn_backend().await;
    let gw = gateway(addr, signed_in_session());

    let orders = gw.active_orders().await.expect("orders");

    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].table, Some(TableRef::Number(5)));
    assert_eq!(orders[0].total, Decimal::from(20));
    assert_eq!(orders[0].items[0].menu_item.name(), "Pho");
    assert_eq!(
        seen.lock().unwrap().auth,
        vec![Some("Bearer secret-token".to_string())]
    );
}

#[tokio::test]
async fn status_update_patches_the_order_path() {
    let (addr, seen) = spawn_backend().await;
    let gw = gateway(addr, signed_in_session());

    let order = gw
        .update_order_status("o1", OrderStatus::InProgress)
        .await
        .expect("patch");

    assert_eq!(order.id, "o1");
    assert_eq!(order.status, OrderStatus::InProgress);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.paths, vec!["/orders/o1/status".to_string()]);
    assert_eq!(seen.bodies, vec![json!({ "status": "in-progress" })]);
}

#[tokio::test]
async fn cash_payment_round_trips_order_amount_and_method() {
    let (addr, seen) = spawn_backend().await;
    let gw = gateway(addr, signed_in_session());

    let receipt = gw
        .pay_cash(&CashPaymentRequest {
            order_id: "o1".into(),
            amount: Decimal::from(20),
            amount_received: Decimal::from(25),
            change: Decimal::from(5),
            payment_method: PaymentMethod::Cash,
            notes: None,
        })
        .await
        .expect("pay");

    let payment = receipt.payment.expect("payment echoed");
    assert_eq!(payment.order_id, "o1");
    assert_eq!(payment.amount, Decimal::from(20));
    assert_eq!(payment.payment_method, PaymentMethod::Cash);
    assert_eq!(payment.payment_status, PaymentStatus::Completed);
    assert_eq!(payment.transaction_details.change, Some(Decimal::from(5)));

    let seen = seen.lock().unwrap();
    let body = &seen.bodies[0];
    assert_eq!(body["orderId"], "o1");
    assert_eq!(body["paymentMethod"], "cash");
    assert_eq!(body["amountReceived"].as_f64(), Some(25.0));
}

#[tokio::test]
async fn payment_filters_become_query_parameters_and_orphans_are_dropped() {
    let (addr, seen) = spawn_backend().await;
    let gw = gateway(addr, signed_in_session());

    let filter = PaymentFilter {
        status: Some(PaymentStatus::Pending),
        method: Some(PaymentMethod::Qr),
        ..PaymentFilter::default()
    };
    let payments = gw.payments(&filter).await.expect("payments");
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].order_id, "o1");

    let seen = seen.lock().unwrap();
    let query = &seen.queries[0];
    assert_eq!(query.get("status").map(String::as_str), Some("pending"));
    assert_eq!(query.get("paymentMethod").map(String::as_str), Some("qr"));
}

#[tokio::test]
async fn unauthorized_tears_down_the_session() {
    let (addr, _seen) = spawn_backend().await;
    let session = signed_in_session();
    let mut signed_in = session.subscribe();
    let gw = gateway(addr, Arc::clone(&session));

    let err = gw.menu_items().await.expect_err("401");

    assert!(err.is_unauthorized());
    assert!(!session.is_signed_in());
    assert!(session.token().is_none());
    assert!(session.user().is_none());
    assert!(signed_in.has_changed().expect("sender alive"));
    assert!(!*signed_in.borrow_and_update());
}

#[tokio::test]
async fn rejection_message_is_passed_through_verbatim() {
    let (addr, _seen) = spawn_backend().await;
    let session = signed_in_session();
    let gw = gateway(addr, Arc::clone(&session));

    let err = gw.tables().await.expect_err("409");

    match err {
        DineError::Gateway { status, ref message } => {
            assert_eq!(status, 409);
            assert_eq!(message, "Table 5 is already occupied");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.to_string(), "Table 5 is already occupied");
    assert!(session.is_signed_in());
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let err = gateway(addr, signed_in_session())
        .active_orders()
        .await
        .expect_err("nothing listening");

    match err {
        DineError::Network(message) => assert!(message.starts_with("Cannot reach server")),
        other => panic!("unexpected error: {other:?}"),
    }
}
