//! HTTP-level tests for `GrafanaClient` against a mock Grafana.
//!
//! The client is blocking, so every call runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use orgmapper_core::types::OrgId;
use orgmapper_grafana::{
    current_org_mapping, fetch_settings, sync_org_mapping, Credentials, GrafanaClient,
    GrafanaError, SsoSettingsApi,
};
use orgmapper_mapping::TenantMapping;

const SSO_PATH: &str = "/api/v1/sso-settings/generic_oauth";

fn client(base: &str, credentials: Credentials) -> Arc<GrafanaClient> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(GrafanaClient::new(base, credentials, Duration::from_secs(5)).expect("client"))
}

async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.expect("join")
}

fn tenant(org: &str, viewers: &[&str], editors: &[&str]) -> TenantMapping {
    TenantMapping {
        org_id: OrgId::from(org),
        viewer_groups: viewers.iter().map(|s| s.to_string()).collect(),
        editor_groups: editors.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn get_sends_bearer_token_and_returns_settings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SSO_PATH))
        .and(header("Authorization", "Bearer glsa_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "1",
            "provider": "generic_oauth",
            "settings": {"clientId": "grafana", "orgMapping": "a:1:Viewer"},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server.uri(), Credentials::parse(b"glsa_token\n"));
    let settings = blocking(move || fetch_settings(api.as_ref())).await.unwrap();
    assert_eq!(settings["clientId"], "grafana");
    assert_eq!(settings["orgMapping"], "a:1:Viewer");
}

#[tokio::test(flavor = "multi_thread")]
async fn basic_auth_header_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SSO_PATH))
        .and(header("Authorization", "Basic YWRtaW46YWRtaW4="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"settings": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(
        &server.uri(),
        Credentials::parse(br#"{"username":"admin","password":"admin"}"#),
    );
    let settings = blocking(move || fetch_settings(api.as_ref())).await.unwrap();
    assert!(settings.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn not_found_is_typed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SSO_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;

    let api = client(&server.uri(), Credentials::Anonymous);
    let raw = Arc::clone(&api);
    let err = blocking(move || raw.get_provider_settings("generic_oauth"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let current = blocking(move || current_org_mapping(api.as_ref())).await.unwrap();
    assert_eq!(current, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_puts_full_settings_with_new_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SSO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "provider": "generic_oauth",
            "settings": {"clientId": "grafana", "orgMapping": "stale:9:Viewer"},
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(SSO_PATH))
        .and(body_json(json!({
            "provider": "generic_oauth",
            "settings": {
                "clientId": "grafana",
                "orgMapping": "team-a:12:Viewer,team-b:12:Editor,ops\\:oncall:7:Viewer",
            },
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server.uri(), Credentials::Token("t".to_string()));
    let tenants = vec![
        tenant("12", &["team-a"], &["team-b"]),
        tenant("7", &["ops:oncall"], &[]),
    ];
    let written = blocking(move || sync_org_mapping(api.as_ref(), &tenants))
        .await
        .unwrap();
    assert_eq!(
        written,
        "team-a:12:Viewer,team-b:12:Editor,ops\\:oncall:7:Viewer"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_against_unconfigured_provider_creates_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SSO_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(SSO_PATH))
        .and(body_json(json!({
            "provider": "generic_oauth",
            "settings": {"orgMapping": "a:1:Viewer"},
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server.uri(), Credentials::Anonymous);
    blocking(move || sync_org_mapping(api.as_ref(), &[tenant("1", &["a"], &[])]))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_carry_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SSO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"settings": {}})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(SSO_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid orgMapping"))
        .mount(&server)
        .await;

    let api = client(&server.uri(), Credentials::Anonymous);
    let err = blocking(move || sync_org_mapping(api.as_ref(), &[]))
        .await
        .unwrap_err();
    match err {
        GrafanaError::Api { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "invalid orgMapping");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sub_path_deployments_keep_their_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/grafana/api/v1/sso-settings/generic_oauth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"settings": {"orgMapping": ""}})))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&format!("{}/grafana/", server.uri()), Credentials::Anonymous);
    let current = blocking(move || current_org_mapping(api.as_ref())).await.unwrap();
    assert_eq!(current.as_deref(), Some(""));
}

#[test]
fn unreachable_server_is_a_transport_error() {
    let api = GrafanaClient::new(
        "http://127.0.0.1:9",
        Credentials::Anonymous,
        Duration::from_millis(500),
    )
    .expect("client");
    let err = fetch_settings(&api).unwrap_err();
    assert!(matches!(err, GrafanaError::Transport(_)), "got {err:?}");
}
