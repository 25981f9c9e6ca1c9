//! `reconcile` and `mapping diff` against a mock Grafana. The binary runs on
//! the blocking pool while the mock server keeps serving.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use orgmapper_core::{ConditionReason, ConditionType, FileStore, ResourceKey, TenantStore};

const SSO_PATH: &str = "/api/v1/sso-settings/generic_oauth";

const ACME: &str = r#"
kind: Tenant
metadata:
  name: acme
spec:
  tenantId: acme
  orgId: "12"
  viewerGroups: [team-a]
"#;

fn orgmapper_cmd(home: &Path, grafana: &str) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("orgmapper"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1")
        .env("ORGMAPPER_GRAFANA_URL", grafana)
        .env("ORGMAPPER_CREDENTIALS", "glsa_token");
    cmd
}

async fn run(mut cmd: Command) -> Output {
    tokio::task::spawn_blocking(move || cmd.output().expect("run orgmapper"))
        .await
        .expect("join")
}

fn seed_acme(home: &Path) {
    let file = home.join("acme.yaml");
    fs::write(&file, ACME).expect("write manifest");
    let output = Command::new(assert_cmd::cargo::cargo_bin!("orgmapper"))
        .env("HOME", home)
        .env("USERPROFILE", home)
        .args(["tenant", "apply"])
        .arg(&file)
        .output()
        .expect("apply");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
}

#[tokio::test(flavor = "multi_thread")]
async fn reconcile_writes_the_mapping_and_marks_the_tenant_created() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SSO_PATH))
        .and(header("Authorization", "Bearer glsa_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "provider": "generic_oauth",
            "settings": {"clientId": "grafana", "orgMapping": ""},
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(SSO_PATH))
        .and(body_json(json!({
            "provider": "generic_oauth",
            "settings": {"clientId": "grafana", "orgMapping": "team-a:12:Viewer"},
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let home = TempDir::new().expect("home");
    seed_acme(home.path());

    let mut cmd = orgmapper_cmd(home.path(), &server.uri());
    cmd.args(["reconcile", "--json"]);
    let output = run(cmd).await;
    assert!(
        output.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON");
    assert_eq!(summary["tenants"], 1);
    assert_eq!(summary["created"], 1);
    assert_eq!(summary["failed"], 0);

    let tenant = FileStore::at(home.path())
        .get(&ResourceKey::new("default", "acme"))
        .expect("get")
        .expect("stored");
    assert_eq!(tenant.external_name(), Some("acme"));
    assert!(tenant.status.at_provider.is_some());
    let synced = tenant.status.condition(ConditionType::Synced).expect("synced");
    assert_eq!(synced.reason, ConditionReason::ReconcileSuccess);
}

#[tokio::test(flavor = "multi_thread")]
async fn reconcile_fails_and_records_the_error_when_grafana_rejects_the_write() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SSO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"settings": {}})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(SSO_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let home = TempDir::new().expect("home");
    seed_acme(home.path());

    let mut cmd = orgmapper_cmd(home.path(), &server.uri());
    cmd.arg("reconcile");
    let output = run(cmd).await;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to reconcile"));

    let tenant = FileStore::at(home.path())
        .get(&ResourceKey::new("default", "acme"))
        .expect("get")
        .expect("stored");
    assert!(tenant.external_name().is_none(), "failed create must not look created");
    let synced = tenant.status.condition(ConditionType::Synced).expect("synced");
    assert_eq!(synced.reason, ConditionReason::ReconcileError);
}

#[tokio::test(flavor = "multi_thread")]
async fn mapping_diff_reports_drift() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SSO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "settings": {"orgMapping": "stale:9:Viewer"},
        })))
        .mount(&server)
        .await;

    let home = TempDir::new().expect("home");
    seed_acme(home.path());

    let mut cmd = orgmapper_cmd(home.path(), &server.uri());
    cmd.args(["mapping", "diff"]);
    let output = run(cmd).await;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("-stale:9:Viewer"), "stdout={stdout}");
    assert!(stdout.contains("+team-a:12:Viewer"), "stdout={stdout}");
}

#[tokio::test(flavor = "multi_thread")]
async fn mapping_diff_is_quiet_when_in_sync() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SSO_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "settings": {"orgMapping": "team-a:12:Viewer"},
        })))
        .mount(&server)
        .await;

    let home = TempDir::new().expect("home");
    seed_acme(home.path());

    let mut cmd = orgmapper_cmd(home.path(), &server.uri());
    cmd.args(["mapping", "diff"]);
    let output = run(cmd).await;
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("up to date"));
}
