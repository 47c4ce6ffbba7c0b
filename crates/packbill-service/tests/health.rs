//! Health check integration tests.

mod common;

use common::TestHarness;
use serde_json::Value;

#[tokio::test]
async fn health_check_returns_ok() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "packbill");
    assert!(body["version"].is_string());
}
