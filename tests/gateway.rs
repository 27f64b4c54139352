//! End-to-end tests of the HTTP and WebSocket surface over an in-memory ledger.

use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App, HttpServer};
use awc::ws::{Codec, Frame, Message};
use awc::BoxedSocket;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};

use travelsplit::auth::{Authenticator, HmacAuthenticator};
use travelsplit::gateway::{self, AppState};
use travelsplit::hub::RealtimeHub;
use travelsplit::rates::StaticRates;
use travelsplit::receipt::NoExtractor;
use travelsplit::schemas::{Category, ExpenseDraft, ExpenseSource};
use travelsplit::service::{GroupService, ServiceSettings};
use travelsplit::store::MemoryLedger;

const SECRET: &str = "integration-secret";

fn app_state() -> web::Data<AppState> {
    let hub = Arc::new(RealtimeHub::new(16));
    let service = Arc::new(GroupService::new(
        Arc::new(MemoryLedger::new()),
        hub.clone(),
        Arc::new(StaticRates::parse("EUR=1.10").unwrap()),
        ServiceSettings::default(),
    ));
    let authenticator: Arc<dyn Authenticator> = Arc::new(HmacAuthenticator::new(SECRET).unwrap());
    web::Data::new(AppState {
        service,
        hub,
        authenticator,
        extractor: Arc::new(NoExtractor),
    })
}

fn bearer(user: &str) -> (header::HeaderName, String) {
    let token = HmacAuthenticator::new(SECRET).unwrap().issue(user).unwrap();
    (header::AUTHORIZATION, format!("Bearer {token}"))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.clone())
                .configure(gateway::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn dinner_for_two_over_http() {
    let state = app_state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/groups")
        .insert_header(bearer("alice"))
        .set_json(json!({ "name": "Lisbon" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let group: Value = test::read_body_json(resp).await;
    let group_id = group["group_id"].as_str().unwrap().to_string();
    let code = group["code"].as_str().unwrap().to_lowercase();

    let req = test::TestRequest::post()
        .uri("/groups/join")
        .insert_header(bearer("bob"))
        .set_json(json!({ "code": code }))
        .to_request();
    let joined: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(joined["group_id"], group_id.as_str());
    assert_eq!(joined["members"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::post()
        .uri("/expenses")
        .insert_header(bearer("alice"))
        .set_json(json!({
            "group_id": group_id,
            "title": "Dinner",
            "amount": 30.0,
            "currency": "usd",
            "category": "food",
            "payer_id": "alice",
            "participants": ["alice", "bob"],
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let expense: Value = test::read_body_json(resp).await;
    assert_eq!(expense["amount"], 30.0);
    assert_eq!(expense["amount_minor"], 3000);
    assert_eq!(expense["currency"], "USD");
    assert_eq!(expense["seq"], 1);

    let req = test::TestRequest::get()
        .uri(&format!("/expenses/{group_id}"))
        .insert_header(bearer("bob"))
        .to_request();
    let expenses: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(expenses.as_array().unwrap().len(), 1);

    let req = test::TestRequest::get()
        .uri(&format!("/insights/{group_id}"))
        .insert_header(bearer("bob"))
        .to_request();
    let insights: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(insights["status"], "available");
    assert_eq!(insights["currency"], "USD");
    assert_eq!(insights["total"], 30.0);
    assert_eq!(insights["count"], 1);
    assert_eq!(insights["top_spender"], "alice");
    assert_eq!(insights["balances"]["alice"], 15.0);
    assert_eq!(insights["balances"]["bob"], -15.0);
    assert_eq!(
        insights["transfers"],
        json!([{ "from": "bob", "to": "alice", "amount": 15.0 }])
    );
    assert_eq!(insights["by_category"]["food"], 30.0);
}

#[actix_web::test]
async fn requests_without_valid_token_are_rejected() {
    let state = app_state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/groups")
        .set_json(json!({ "name": "Trip" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unauthenticated");

    let req = test::TestRequest::get()
        .uri("/insights/anything")
        .insert_header((header::AUTHORIZATION, "Bearer alice.00ff"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn outsiders_are_forbidden_and_unknown_groups_missing() {
    let state = app_state();
    let app = app!(state);
    let group = state.service.create_group("Trip", "alice").await.unwrap();

    for uri in [
        format!("/groups/{}", group.id),
        format!("/expenses/{}", group.id),
        format!("/insights/{}", group.id),
    ] {
        let req = test::TestRequest::get()
            .uri(&uri)
            .insert_header(bearer("carol"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{uri}");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "forbidden");
    }

    let req = test::TestRequest::get()
        .uri("/groups/nope")
        .insert_header(bearer("alice"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::post()
        .uri("/groups/join")
        .insert_header(bearer("carol"))
        .set_json(json!({ "code": "ZZZZZZ" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn invalid_expenses_are_rejected() {
    let state = app_state();
    let app = app!(state);
    let group = state.service.create_group("Trip", "alice").await.unwrap();

    let cases = [
        json!({ "group_id": group.id, "title": "Taxi", "amount": 10.005, "category": "travel",
                "payer_id": "alice", "participants": ["alice"] }),
        json!({ "group_id": group.id, "title": "Taxi", "amount": 0, "category": "travel",
                "payer_id": "alice", "participants": ["alice"] }),
        json!({ "group_id": group.id, "title": "Taxi", "amount": 12, "category": "travel",
                "payer_id": "alice", "participants": [] }),
        json!({ "group_id": group.id, "title": "Taxi", "amount": 12, "category": "travel",
                "payer_id": "mallory", "participants": ["alice"] }),
        json!({ "group_id": group.id, "title": "Taxi", "amount": 12, "category": "rocket",
                "payer_id": "alice", "participants": ["alice"] }),
    ];
    for body in cases {
        let req = test::TestRequest::post()
            .uri("/expenses")
            .insert_header(bearer("alice"))
            .set_json(&body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
        let reply: Value = test::read_body_json(resp).await;
        assert_eq!(reply["error"], "invalid_input");
    }

    let expenses = state.service.list_expenses(&group.id, "alice").await.unwrap();
    assert!(expenses.is_empty());
}

#[actix_web::test]
async fn reversal_settles_the_group() {
    let state = app_state();
    let app = app!(state);
    let group = state.service.create_group("Trip", "alice").await.unwrap();
    state.service.join_group(&group.code, "bob").await.unwrap();
    let expense = state
        .service
        .add_expense(
            &group.id,
            "alice",
            ExpenseDraft {
                title: "Hostel".into(),
                amount: 8000,
                currency: "USD".into(),
                category: Category::Stay,
                payer: "alice".into(),
                participants: vec!["alice".into(), "bob".into()],
                notes: None,
                source: ExpenseSource::Manual,
            },
        )
        .await
        .unwrap();

    let uri = format!("/expenses/{}/{}/reverse", group.id, expense.id);
    let req = test::TestRequest::post()
        .uri(&uri)
        .insert_header(bearer("bob"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let reversal: Value = test::read_body_json(resp).await;
    assert_eq!(reversal["reverses"], expense.id.as_str());

    let req = test::TestRequest::post()
        .uri(&uri)
        .insert_header(bearer("bob"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let req = test::TestRequest::get()
        .uri(&format!("/insights/{}", group.id))
        .insert_header(bearer("alice"))
        .to_request();
    let insights: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(insights["transfers"], json!([]));
    assert_eq!(insights["balances"]["alice"], 0.0);
    assert_eq!(insights["count"], 0);
}

#[actix_web::test]
async fn health_and_unconfigured_receipt_scan() {
    let state = app_state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::post()
        .uri("/receipts/scan")
        .insert_header(bearer("alice"))
        .insert_header((header::CONTENT_TYPE, "image/png"))
        .set_payload(vec![0x89, 0x50, 0x4e, 0x47])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

type Socket = actix_codec::Framed<BoxedSocket, Codec>;

fn start_server(state: web::Data<AppState>) -> (String, Server) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(gateway::configure)
    })
    .listen(listener)
    .expect("bind test server")
    .disable_signals()
    .workers(1)
    .run();
    (format!("http://{addr}"), server)
}

async fn connect(url: &str, user: &str) -> Socket {
    let token = HmacAuthenticator::new(SECRET).unwrap().issue(user).unwrap();
    let (_resp, socket) = awc::Client::default()
        .ws(format!("{url}/ws?token={token}"))
        .connect()
        .await
        .expect("websocket connect");
    socket
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let frame = socket.next().await.expect("response frame").expect("frame");
        match frame {
            Frame::Text(bytes) => return serde_json::from_slice(&bytes).expect("json"),
            Frame::Ping(_) | Frame::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

#[actix_rt::test]
async fn websocket_streams_new_expenses_to_members() {
    let state = app_state();
    let group = state.service.create_group("Trip", "alice").await.unwrap();
    state.service.join_group(&group.code, "bob").await.unwrap();

    let (url, server) = start_server(state.clone());
    let handle = server.handle();
    actix_web::rt::spawn(server);

    let mut bob = connect(&url, "bob").await;
    bob.send(Message::Text(
        json!({ "type": "subscribe", "group_id": group.id }).to_string().into(),
    ))
    .await
    .expect("send subscribe");
    let reply = next_json(&mut bob).await;
    assert_eq!(reply["type"], "subscribed");
    assert_eq!(reply["group_id"], group.id.as_str());

    state
        .service
        .add_expense(
            &group.id,
            "alice",
            ExpenseDraft {
                title: "Dinner".into(),
                amount: 3000,
                currency: "USD".into(),
                category: Category::Food,
                payer: "alice".into(),
                participants: vec!["alice".into(), "bob".into()],
                notes: None,
                source: ExpenseSource::Manual,
            },
        )
        .await
        .unwrap();

    let event = next_json(&mut bob).await;
    assert_eq!(event["type"], "expense:new");
    assert_eq!(event["expense"]["title"], "Dinner");
    assert_eq!(event["expense"]["amount"], 30.0);
    assert_eq!(event["expense"]["payer_id"], "alice");

    handle.stop(false).await;
}

#[actix_rt::test]
async fn websocket_refuses_outsiders_and_bad_frames() {
    let state = app_state();
    let group = state.service.create_group("Trip", "alice").await.unwrap();

    let (url, server) = start_server(state.clone());
    let handle = server.handle();
    actix_web::rt::spawn(server);

    let unauthenticated = awc::Client::default()
        .ws(format!("{url}/ws"))
        .connect()
        .await;
    assert!(unauthenticated.is_err());

    let mut carol = connect(&url, "carol").await;
    carol
        .send(Message::Text(
            json!({ "type": "subscribe", "group_id": group.id }).to_string().into(),
        ))
        .await
        .expect("send subscribe");
    let reply = next_json(&mut carol).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "forbidden");
    assert_eq!(state.hub.subscriber_count(&group.id), 0);

    carol
        .send(Message::Text("not-json".into()))
        .await
        .expect("send text");
    let reply = next_json(&mut carol).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "invalid_input");

    handle.stop(false).await;
}
