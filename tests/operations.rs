//! End-to-end client operations against mock panels.
//!
//! Each test runs the orchestrator over a `MemoryStore` and a wiremock server that
//! plays a 3x-ui or Marzban panel, then checks both the outcome and the admin's
//! balance in the store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use panelhub::dispatch::Orchestrator;
use panelhub::errors::AppError;
use panelhub::models::admin::NewAdmin;
use panelhub::models::client::{ClientInput, ClientUpdateInput};
use panelhub::models::panel::{PanelInput, PanelType};
use panelhub::panel::http::PanelHttp;
use panelhub::panel::AdapterRegistry;
use panelhub::store::memory::MemoryStore;
use panelhub::store::EntityStore;

const GB: i64 = 1024 * 1024 * 1024;
const API: &str = "/panel/api/inbounds";

// ── Harness ──────────────────────────────────────────────────

struct Harness {
    store: MemoryStore,
    orchestrator: Orchestrator,
    server: MockServer,
}

impl Harness {
    async fn new(panel_type: PanelType, tweak: impl FnOnce(&mut NewAdmin)) -> Self {
        let server = MockServer::start().await;
        let store = MemoryStore::new();
        store
            .insert_panel(&PanelInput {
                name: "main".into(),
                panel_type,
                url: server.uri(),
                sub_url: None,
                username: "root".into(),
                password: "secret".into(),
                is_active: true,
            })
            .await
            .unwrap();

        let mut admin = NewAdmin {
            username: "alice".into(),
            panel: "main".into(),
            inbound_id: Some(1),
            inbound_flow: None,
            traffic: 10 * GB,
            expiry_date: None,
            update_return_traffic: false,
            delete_return_traffic: false,
            is_active: true,
        };
        tweak(&mut admin);
        store.insert_admin(&admin).await.unwrap();

        let http = PanelHttp::new(Duration::from_secs(5), Duration::from_secs(1), 0).unwrap();
        let orchestrator = Orchestrator::new(Arc::new(store.clone()), AdapterRegistry::new(http));
        Self {
            store,
            orchestrator,
            server,
        }
    }

    async fn balance(&self) -> i64 {
        self.store
            .get_admin_by_username("alice")
            .await
            .unwrap()
            .unwrap()
            .traffic
    }
}

fn envelope(obj: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "msg": "", "obj": obj }))
}

fn refused(msg: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": false, "msg": msg, "obj": null }))
}

fn stat(email: &str, total: i64, up: i64, down: i64) -> Value {
    json!({
        "id": 7, "inboundId": 1, "enable": true, "email": email,
        "up": up, "down": down, "expiryTime": 0, "total": total
    })
}

fn inbound(clients: &[(&str, &str)], stats: Vec<Value>) -> Value {
    let clients: Vec<Value> = clients
        .iter()
        .map(|(id, email)| {
            json!({
                "id": id, "email": email, "flow": "", "limitIp": 0, "totalGB": 0,
                "expiryTime": 0, "enable": true, "subId": "sub-1", "reset": 0
            })
        })
        .collect();
    json!([{
        "id": 1,
        "settings": json!({ "clients": clients }).to_string(),
        "clientStats": stats
    }])
}

/// Login, inbound list and online list of a 3x-ui panel.
async fn mount_xui_session(server: &MockServer, inbounds: Value) {
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            envelope(Value::Null).insert_header("set-cookie", "3x-ui=session-token; Path=/; HttpOnly"),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/list", API)))
        .respond_with(envelope(inbounds))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/onlines", API)))
        .respond_with(envelope(json!([])))
        .mount(server)
        .await;
}

async fn mount_traffic(server: &MockServer, email: &str, obj: Value) {
    Mock::given(method("GET"))
        .and(path(format!("{}/getClientTraffics/{}", API, email)))
        .respond_with(envelope(obj))
        .mount(server)
        .await;
}

fn new_client(email: &str, total: i64) -> ClientInput {
    ClientInput {
        email: email.into(),
        total,
        expiry_time: 0,
        enable: true,
        limit_ip: 0,
        sub_id: None,
        uuid: None,
    }
}

fn update_to(email: &str, total: i64) -> ClientUpdateInput {
    ClientUpdateInput {
        email: email.into(),
        total,
        expiry_time: 0,
        enable: true,
        limit_ip: 0,
        sub_id: None,
    }
}

// ── Add ──────────────────────────────────────────────────────

mod add_tests {
    use super::*;

    /// 10 GB balance, 5 GB client → 5 GB left.
    #[tokio::test]
    async fn test_add_debits_requested_total() {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        mount_xui_session(&h.server, inbound(&[], vec![])).await;
        mount_traffic(&h.server, "bob", Value::Null).await;
        Mock::given(method("POST"))
            .and(path(format!("{}/addClient", API)))
            .respond_with(envelope(Value::Null))
            .expect(1)
            .mount(&h.server)
            .await;

        let resp = h.orchestrator.add_client("alice", &new_client("bob", 5 * GB)).await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.message, "User added successfully");
        assert_eq!(h.balance().await, 5 * GB);
    }

    #[tokio::test]
    async fn test_panel_failure_leaves_balance_untouched() {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        mount_xui_session(&h.server, inbound(&[], vec![])).await;
        mount_traffic(&h.server, "bob", Value::Null).await;
        Mock::given(method("POST"))
            .and(path(format!("{}/addClient", API)))
            .respond_with(refused("inbound is full"))
            .mount(&h.server)
            .await;

        let err = h
            .orchestrator
            .add_client("alice", &new_client("bob", 5 * GB))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
        assert_eq!(h.balance().await, 10 * GB);
    }

    #[tokio::test]
    async fn test_taken_email_is_conflict_without_create() {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        mount_xui_session(&h.server, inbound(&[("u-1", "bob")], vec![stat("bob", GB, 0, 0)])).await;
        mount_traffic(&h.server, "bob", stat("bob", GB, 0, 0)).await;
        Mock::given(method("POST"))
            .and(path(format!("{}/addClient", API)))
            .respond_with(envelope(Value::Null))
            .expect(0)
            .mount(&h.server)
            .await;

        let err = h
            .orchestrator
            .add_client("alice", &new_client("bob", GB))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(err.message(), "This email is reserved by another admins");
        assert_eq!(h.balance().await, 10 * GB);
    }

    #[tokio::test]
    async fn test_insufficient_traffic_never_reaches_panel() {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(envelope(Value::Null))
            .expect(0)
            .mount(&h.server)
            .await;

        let err = h
            .orchestrator
            .add_client("alice", &new_client("bob", 11 * GB))
            .await
            .unwrap_err();
        assert_eq!(
            err.message(),
            "Insufficient traffic to add this user, your limit: 10.0 GB"
        );
        assert_eq!(h.balance().await, 10 * GB);
    }

    #[tokio::test]
    async fn test_inactive_admin_is_denied() {
        let h = Harness::new(PanelType::Sanaei, |a| a.is_active = false).await;
        let err = h
            .orchestrator
            .add_client("alice", &new_client("bob", GB))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthorizationDenied));
    }

    #[tokio::test]
    async fn test_expired_admin_is_flipped_and_denied() {
        let h = Harness::new(PanelType::Sanaei, |a| {
            a.expiry_date = Some(chrono::Utc::now() - chrono::Duration::minutes(5));
        })
        .await;
        let err = h
            .orchestrator
            .add_client("alice", &new_client("bob", GB))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthorizationDenied));
        let admin = h.store.get_admin_by_username("alice").await.unwrap().unwrap();
        assert!(!admin.is_active);
    }

    #[tokio::test]
    async fn test_invalid_identifier_is_rejected_before_lookup() {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        let err = h
            .orchestrator
            .add_client("alice", &new_client("bob/../x", GB))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    /// Balance for exactly one client: one add wins, the other is refused.
    #[tokio::test]
    async fn test_concurrent_adds_cannot_overdraw() {
        let h = Harness::new(PanelType::Sanaei, |a| a.traffic = 5 * GB).await;
        mount_xui_session(&h.server, inbound(&[], vec![])).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/panel/api/inbounds/getClientTraffics/.+$"))
            .respond_with(envelope(Value::Null))
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/addClient", API)))
            .respond_with(envelope(Value::Null).set_delay(Duration::from_millis(100)))
            .expect(1)
            .mount(&h.server)
            .await;

        let first = new_client("bob", 5 * GB);
        let second = new_client("carol", 5 * GB);
        let (a, b) = tokio::join!(
            h.orchestrator.add_client("alice", &first),
            h.orchestrator.add_client("alice", &second),
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(AppError::QuotaExceeded { .. })))
                .count(),
            1
        );
        assert_eq!(h.balance().await, 0);
    }
}

// ── Update ───────────────────────────────────────────────────

mod update_tests {
    use super::*;

    async fn harness_with_bob(total: i64) -> Harness {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        mount_xui_session(&h.server, inbound(&[("u-1", "bob")], vec![stat("bob", total, 0, 0)])).await;
        mount_traffic(&h.server, "bob", stat("bob", total, 0, 0)).await;
        Mock::given(method("POST"))
            .and(path(format!("{}/updateClient/u-1", API)))
            .respond_with(envelope(Value::Null))
            .mount(&h.server)
            .await;
        h
    }

    #[tokio::test]
    async fn test_increase_debits_only_the_difference() {
        let h = harness_with_bob(5 * GB).await;
        let resp = h
            .orchestrator
            .update_client("alice", "u-1", &update_to("bob", 8 * GB))
            .await
            .unwrap();
        assert_eq!(resp.message, "User updated successfully");
        assert_eq!(h.balance().await, 7 * GB);
    }

    #[tokio::test]
    async fn test_decrease_is_free_and_not_credited() {
        let h = harness_with_bob(5 * GB).await;
        h.orchestrator
            .update_client("alice", "u-1", &update_to("bob", 2 * GB))
            .await
            .unwrap();
        assert_eq!(h.balance().await, 10 * GB);
    }

    #[tokio::test]
    async fn test_increase_beyond_balance_is_refused() {
        let h = harness_with_bob(GB).await;
        let err = h
            .orchestrator
            .update_client("alice", "u-1", &update_to("bob", 12 * GB))
            .await
            .unwrap_err();
        assert_eq!(
            err.message(),
            "Insufficient traffic to update this user, your limit: 10.0 GB"
        );
        assert_eq!(h.balance().await, 10 * GB);
    }

    /// 4 GB balance covers the 3 GB increase but not the 8 GB total.
    #[tokio::test]
    async fn test_balance_must_cover_full_requested_total() {
        let h = Harness::new(PanelType::Sanaei, |a| a.traffic = 4 * GB).await;
        mount_xui_session(&h.server, inbound(&[("u-1", "bob")], vec![stat("bob", 5 * GB, 0, 0)])).await;
        Mock::given(method("POST"))
            .and(path(format!("{}/updateClient/u-1", API)))
            .respond_with(envelope(Value::Null))
            .expect(0)
            .mount(&h.server)
            .await;

        let err = h
            .orchestrator
            .update_client("alice", "u-1", &update_to("bob", 8 * GB))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { .. }));
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
        assert_eq!(h.balance().await, 4 * GB);
    }

    #[tokio::test]
    async fn test_id_of_another_client_is_rejected() {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        mount_xui_session(
            &h.server,
            inbound(
                &[("u-1", "bob"), ("u-2", "carol")],
                vec![stat("bob", 9 * GB, 0, 0), stat("carol", GB, 0, 0)],
            ),
        )
        .await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/panel/api/inbounds/updateClient/.+$"))
            .respond_with(envelope(Value::Null))
            .expect(0)
            .mount(&h.server)
            .await;

        let err = h
            .orchestrator
            .update_client("alice", "u-2", &update_to("bob", 9 * GB))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(h.balance().await, 10 * GB);
    }

    #[tokio::test]
    async fn test_unknown_client_is_not_found() {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        mount_xui_session(&h.server, inbound(&[], vec![])).await;
        mount_traffic(&h.server, "ghost", Value::Null).await;

        let err = h
            .orchestrator
            .update_client("alice", "u-9", &update_to("ghost", GB))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(err.message(), "User not found");
    }
}

// ── Reset / Delete ───────────────────────────────────────────

mod reset_delete_tests {
    use super::*;

    async fn harness_with_used_bob(tweak: impl FnOnce(&mut NewAdmin)) -> Harness {
        let h = Harness::new(PanelType::Sanaei, tweak).await;
        let bob = stat("bob", 5 * GB, GB, GB);
        mount_xui_session(&h.server, inbound(&[("u-1", "bob")], vec![bob.clone()])).await;
        mount_traffic(&h.server, "bob", bob).await;
        Mock::given(method("POST"))
            .and(path(format!("{}/1/resetClientTraffic/bob", API)))
            .respond_with(envelope(Value::Null))
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/1/delClient/u-1", API)))
            .respond_with(envelope(Value::Null))
            .mount(&h.server)
            .await;
        h
    }

    #[tokio::test]
    async fn test_reset_charges_full_allotment_by_default() {
        let h = harness_with_used_bob(|_| {}).await;
        let resp = h.orchestrator.reset_client_usage("alice", "bob").await.unwrap();
        assert_eq!(resp.message, "User usage reset successfully");
        assert_eq!(h.balance().await, 5 * GB);
    }

    #[tokio::test]
    async fn test_reset_charges_consumption_with_update_return_traffic() {
        let h = harness_with_used_bob(|a| a.update_return_traffic = true).await;
        h.orchestrator.reset_client_usage("alice", "bob").await.unwrap();
        assert_eq!(h.balance().await, 8 * GB);
    }

    /// 5 GB allotment with 2 GB consumed returns 3 GB.
    #[tokio::test]
    async fn test_delete_credits_unused_allotment() {
        let h = harness_with_used_bob(|a| a.delete_return_traffic = true).await;
        let resp = h.orchestrator.delete_client("alice", "u-1").await.unwrap();
        assert_eq!(resp.message, "User deleted successfully");
        assert_eq!(h.balance().await, 13 * GB);
    }

    #[tokio::test]
    async fn test_delete_without_return_policy_keeps_balance() {
        let h = harness_with_used_bob(|_| {}).await;
        h.orchestrator.delete_client("alice", "u-1").await.unwrap();
        assert_eq!(h.balance().await, 10 * GB);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_is_not_found() {
        let h = harness_with_used_bob(|a| a.delete_return_traffic = true).await;
        let err = h.orchestrator.delete_client("alice", "u-404").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(h.balance().await, 10 * GB);
    }
}

// ── List / resolution ────────────────────────────────────────

mod list_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_normalizes_clients() {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        mount_xui_session(&h.server, inbound(&[("u-1", "bob")], vec![stat("bob", 5 * GB, GB, GB)])).await;

        let resp = h.orchestrator.list_clients("alice").await.unwrap();
        let data = resp.data.unwrap();
        assert_eq!(resp.message, "Users retrieved successfully");
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].username, "bob");
        assert_eq!(data[0].uuid, "u-1");
        assert_eq!(data[0].data_limit, 5 * GB);
        assert_eq!(data[0].used_data, 2 * GB);
    }

    #[tokio::test]
    async fn test_empty_inbound_is_success_with_empty_data() {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        mount_xui_session(&h.server, json!([])).await;

        let resp = h.orchestrator.list_clients("alice").await.unwrap();
        assert!(resp.data.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_panel_lists_nothing_found() {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&h.server)
            .await;

        let err = h.orchestrator.list_clients("alice").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(err.message(), "No users found");
    }

    #[tokio::test]
    async fn test_unknown_admin_is_not_found() {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        let err = h.orchestrator.list_clients("mallory").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_disabled_panel_is_refused() {
        let h = Harness::new(PanelType::Sanaei, |_| {}).await;
        let panel = h.store.get_panel_by_name("main").await.unwrap().unwrap();
        h.store
            .update_panel(
                "main",
                &PanelInput {
                    name: panel.name,
                    panel_type: panel.panel_type,
                    url: panel.url,
                    sub_url: None,
                    username: panel.username,
                    password: panel.password,
                    is_active: false,
                },
            )
            .await
            .unwrap();

        let err = h
            .orchestrator
            .add_client("alice", &new_client("bob", GB))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
        assert_eq!(h.balance().await, 10 * GB);
    }
}

// ── Marzban ──────────────────────────────────────────────────

mod marzban_tests {
    use super::*;

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/admin/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "tkn", "token_type": "bearer" })),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_add_relies_on_panel_conflict() {
        let h = Harness::new(PanelType::Marzban, |_| {}).await;
        mount_token(&h.server).await;
        Mock::given(method("GET"))
            .and(path("/api/user/bob"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/user"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({ "detail": "User already exists" })),
            )
            .mount(&h.server)
            .await;

        let err = h
            .orchestrator
            .add_client("alice", &new_client("bob", GB))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(h.balance().await, 10 * GB);
    }

    fn user(username: &str, limit: i64) -> Value {
        json!({
            "username": username, "status": "active", "used_traffic": 0,
            "data_limit": limit, "expire": null, "online_at": null,
            "subscription_url": "", "proxies": {}
        })
    }

    async fn mount_user(server: &MockServer, username: &str, limit: i64) {
        Mock::given(method("GET"))
            .and(path(format!("/api/user/{}", username)))
            .respond_with(ResponseTemplate::new(200).set_body_json(user(username, limit)))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_update_charges_increase_of_the_addressed_user() {
        let h = Harness::new(PanelType::Marzban, |_| {}).await;
        mount_token(&h.server).await;
        mount_user(&h.server, "bob", 2 * GB).await;
        Mock::given(method("PUT"))
            .and(path("/api/user/bob"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user("bob", 6 * GB)))
            .expect(1)
            .mount(&h.server)
            .await;

        h.orchestrator
            .update_client("alice", "bob", &update_to("bob", 6 * GB))
            .await
            .unwrap();
        assert_eq!(h.balance().await, 6 * GB);
    }

    /// Raising "small" while naming "big" must not price the change against "big".
    #[tokio::test]
    async fn test_update_with_mismatched_username_is_rejected() {
        let h = Harness::new(PanelType::Marzban, |_| {}).await;
        mount_token(&h.server).await;
        mount_user(&h.server, "big", 100 * GB).await;
        mount_user(&h.server, "small", GB).await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/api/user/.+$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&h.server)
            .await;

        let err = h
            .orchestrator
            .update_client("alice", "small", &update_to("big", 50 * GB))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(h.balance().await, 10 * GB);
    }

    #[tokio::test]
    async fn test_delete_credits_remaining_traffic() {
        let h = Harness::new(PanelType::Marzban, |a| a.delete_return_traffic = true).await;
        mount_token(&h.server).await;
        Mock::given(method("GET"))
            .and(path("/api/user/bob"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "username": "bob", "status": "active", "used_traffic": 2 * GB,
                "data_limit": 5 * GB, "expire": null, "online_at": null,
                "subscription_url": "", "proxies": {}
            })))
            .mount(&h.server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/user/bob"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "detail": "User successfully deleted" })))
            .expect(1)
            .mount(&h.server)
            .await;

        h.orchestrator.delete_client("alice", "bob").await.unwrap();
        assert_eq!(h.balance().await, 13 * GB);
    }
}
