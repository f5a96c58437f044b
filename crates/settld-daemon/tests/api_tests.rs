// SPDX-License-Identifier: MIT OR Apache-2.0
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use settld_daemon::{AppState, build_app};
use settld_governance::OperatorAction;
use settld_x402::WalletPolicy;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::RwLock;
use tower::ServiceExt;

fn wallet_policy() -> WalletPolicy {
    WalletPolicy {
        version: "v1".into(),
        max_amount_cents: 100_000,
        max_daily_authorization_cents: 500_000,
        allowed_provider_ids: vec!["provider-a".into()],
        allowed_tool_ids: vec!["tool-a".into()],
        allowed_agent_key_ids: vec!["key_agent".into()],
        allowed_currencies: vec!["USD".into()],
        require_quote: false,
        require_strict_request_binding: false,
        require_agent_key_match: true,
        max_delegation_depth: 3,
    }
}

fn test_state() -> Arc<AppState> {
    let keypair = settld_crypto::generate_keypair().unwrap();
    Arc::new(AppState {
        gates: RwLock::new(HashMap::new()),
        idempotency_index: RwLock::new(BTreeMap::new()),
        daily_exposure_cents: RwLock::new(HashMap::new()),
        wallet_policy: wallet_policy(),
        kill_switch_active: AtomicBool::new(false),
        server_signer: settld_crypto::Signer::Local { private_key_pem: keypair.private_key_pem },
        server_signer_key_id: keypair.key_id,
        stream_lease: Arc::new(settld_events::InMemoryStreamLease::new()),
        operator_signer_keys: BTreeMap::new(),
        operator_revoked_signer_keys: BTreeSet::new(),
    })
}

struct OperatorKeypair {
    private_key_pem: String,
    public_key_pem: String,
    key_id: String,
}

fn operator_keypair() -> OperatorKeypair {
    let kp = settld_crypto::generate_keypair().unwrap();
    OperatorKeypair { private_key_pem: kp.private_key_pem, public_key_pem: kp.public_key_pem, key_id: kp.key_id }
}

fn sign_kill_switch_action(operator_id: &str, role: &str, kp: &OperatorKeypair) -> OperatorAction {
    let mut action = OperatorAction {
        operator_id: operator_id.into(),
        role: role.into(),
        action: "kill_switch".into(),
        tenant_id: None,
        signer_key_id: kp.key_id.clone(),
        signed_at: chrono::Utc::now(),
        signature: String::new(),
    };
    let hash = action.compute_hash().unwrap();
    let message: Vec<u8> = (0..hash.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hash[i..i + 2], 16).unwrap())
        .collect();
    action.signature = settld_crypto::sign_bytes(&kp.private_key_pem, &message).unwrap();
    action
}

fn test_state_with_operators(operators: &[&OperatorKeypair]) -> Arc<AppState> {
    let keypair = settld_crypto::generate_keypair().unwrap();
    let operator_signer_keys =
        operators.iter().map(|kp| (kp.key_id.clone(), kp.public_key_pem.clone())).collect();
    Arc::new(AppState {
        gates: RwLock::new(HashMap::new()),
        idempotency_index: RwLock::new(BTreeMap::new()),
        daily_exposure_cents: RwLock::new(HashMap::new()),
        wallet_policy: wallet_policy(),
        kill_switch_active: AtomicBool::new(false),
        server_signer: settld_crypto::Signer::Local { private_key_pem: keypair.private_key_pem },
        server_signer_key_id: keypair.key_id,
        stream_lease: Arc::new(settld_events::InMemoryStreamLease::new()),
        operator_signer_keys,
        operator_revoked_signer_keys: BTreeSet::new(),
    })
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = build_app(test_state());
    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["schemaVersion"], "DaemonHealth.v1");
}

#[tokio::test]
async fn create_gate_returns_created_gate() {
    let app = build_app(test_state());
    let req = serde_json::json!({
        "id": "gate-1",
        "tenantId": "tenant-1",
        "payer": "payer",
        "payee": "payee",
        "providerId": "provider-a",
        "amountCents": 5_000,
        "currency": "USD",
    });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/gates")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_gate_rejects_amount_over_cap_with_stable_code() {
    let app = build_app(test_state());
    let req = serde_json::json!({
        "id": "gate-1",
        "tenantId": "tenant-1",
        "payer": "payer",
        "payee": "payee",
        "providerId": "provider-a",
        "amountCents": 200_000,
        "currency": "USD",
    });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/gates")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = json_body(resp).await;
    assert_eq!(body["code"], "X402_PILOT_AMOUNT_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn get_gate_returns_not_found_for_unknown_id() {
    let app = build_app(test_state());
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/gates/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = json_body(resp).await;
    assert_eq!(body["code"], "GATE_NOT_FOUND");
}

#[tokio::test]
async fn build_artifact_rejects_unknown_type() {
    let app = build_app(test_state());
    let req = serde_json::json!({
        "tenantId": "t",
        "partyId": "p",
        "amountCents": 100,
        "currency": "USD",
    });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/artifacts/not-a-real-type")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn publish_agent_card_without_attestations_is_conflict() {
    let app = build_app(test_state());
    let req = serde_json::json!({
        "capabilities": ["travel.booking", "travel.search"],
        "attestations": [],
        "requiredIssuer": "issuer-a",
    });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/agent-cards/subject-1/publish")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = json_body(resp).await;
    assert_eq!(body["code"], "AGENT_CARD_PUBLIC_ATTESTATION_REQUIRED");
}

#[tokio::test]
async fn publish_agent_card_with_attestations_returns_created() {
    let app = build_app(test_state());
    let req = serde_json::json!({
        "capabilities": ["travel.booking", "travel.search"],
        "attestations": [
            {"capability": "travel.booking", "issuer": "issuer-a", "status": "attested"},
            {"capability": "travel.search", "issuer": "issuer-a", "status": "attested"},
        ],
        "requiredIssuer": "issuer-a",
    });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/agent-cards/subject-1/publish")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = json_body(resp).await;
    assert_eq!(body["subjectId"], "subject-1");
    assert_eq!(body["public"], true);
}

#[tokio::test]
async fn build_payout_instruction_artifact_succeeds() {
    let app = build_app(test_state());
    let req = serde_json::json!({
        "tenantId": "tenant-1",
        "partyId": "party-1",
        "amountCents": 1_500,
        "currency": "USD",
    });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/artifacts/payout-instruction")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["artifactType"], "PAYOUT_INSTRUCTION");
    assert!(body["artifactHash"].is_string());
}

#[tokio::test]
async fn kill_switch_requires_two_operator_actions() {
    let app = build_app(test_state());
    let req = serde_json::json!({ "active": true });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/kill-switch")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = json_body(resp).await;
    assert_eq!(body["code"], "OPERATOR_ACTION_REQUIRED");
}

#[tokio::test]
async fn kill_switch_requires_dual_control_not_just_one_action() {
    let op1 = operator_keypair();
    let state = test_state_with_operators(&[&op1]);
    let app = build_app(state);
    let first = sign_kill_switch_action("op-1", "security_lead", &op1);
    let req = serde_json::json!({ "active": true, "first": first });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/kill-switch")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = json_body(resp).await;
    assert_eq!(body["code"], "DUAL_CONTROL_REQUIRED");
}

#[tokio::test]
async fn kill_switch_toggles_on_valid_dual_control_pair() {
    let op1 = operator_keypair();
    let op2 = operator_keypair();
    let state = test_state_with_operators(&[&op1, &op2]);
    let app = build_app(state);
    let first = sign_kill_switch_action("op-1", "security_lead", &op1);
    let second = sign_kill_switch_action("op-2", "compliance_officer", &op2);
    let req = serde_json::json!({ "active": true, "first": first, "second": second });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/kill-switch")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["killSwitchActive"], true);
}

#[tokio::test]
async fn kill_switch_rejects_unknown_signer_key() {
    let op1 = operator_keypair();
    let op2 = operator_keypair();
    // Only op1 is registered; op2's key is unknown to this daemon.
    let state = test_state_with_operators(&[&op1]);
    let app = build_app(state);
    let first = sign_kill_switch_action("op-1", "security_lead", &op1);
    let second = sign_kill_switch_action("op-2", "compliance_officer", &op2);
    let req = serde_json::json!({ "active": true, "first": first, "second": second });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/kill-switch")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = json_body(resp).await;
    assert_eq!(body["code"], "OPERATOR_ACTION_SIGNER_UNKNOWN");
}

#[tokio::test]
async fn create_gate_is_rejected_once_kill_switch_is_active() {
    let op1 = operator_keypair();
    let op2 = operator_keypair();
    let state = test_state_with_operators(&[&op1, &op2]);
    let app = build_app(state);

    let first = sign_kill_switch_action("op-1", "security_lead", &op1);
    let second = sign_kill_switch_action("op-2", "compliance_officer", &op2);
    let toggle_req = serde_json::json!({ "active": true, "first": first, "second": second });
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/kill-switch")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&toggle_req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let gate_req = serde_json::json!({
        "id": "gate-1",
        "tenantId": "tenant-1",
        "payer": "payer",
        "payee": "payee",
        "providerId": "provider-a",
        "amountCents": 5_000,
        "currency": "USD",
    });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/gates")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&gate_req).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = json_body(resp).await;
    assert_eq!(body["code"], "X402_PILOT_KILL_SWITCH_ACTIVE");
}
