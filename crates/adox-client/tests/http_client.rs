//! Integration tests for the HTTP client.
//!
//! These tests use wiremock to simulate the Azure DevOps REST API and verify
//! URLs, authentication, status mapping and body streaming.

use adox_client::{AgentApi, BuildApi, HttpDevOpsClient, PipelineApi};
use adox_core::{AdoxError, BuildQuery, BuildStatus};
use futures::TryStreamExt;
use serde_json::json;
use wiremock::matchers::{basic_auth, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "pat-123";

fn client(server: &MockServer) -> HttpDevOpsClient {
    HttpDevOpsClient::new(server.uri(), TOKEN).unwrap()
}

#[tokio::test]
async fn test_list_pools_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_apis/distributedtask/pools"))
        .and(query_param("api-version", "7.1"))
        .and(basic_auth("", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 2,
            "value": [
                {"id": 1, "name": "Default", "isHosted": false, "size": 3},
                {"id": 9, "name": "Azure Pipelines", "isHosted": true}
            ]
        })))
        .mount(&server)
        .await;

    let pools = client(&server).list_pools(Some(10)).await.unwrap();
    assert_eq!(pools.len(), 2);
    assert_eq!(pools[0].name, "Default");
    assert_eq!(pools[0].size, Some(3));
    assert!(pools[1].is_hosted);
}

#[tokio::test]
async fn test_list_builds_sends_filters_and_top() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/My%20Project/_apis/build/builds"))
        .and(query_param("definitions", "12"))
        .and(query_param("statusFilter", "completed"))
        .and(query_param("$top", "4"))
        .and(query_param("queryOrder", "queueTimeDescending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "value": [{"id": 77, "buildNumber": "20240501.1", "status": "completed", "result": "succeeded"}]
        })))
        .mount(&server)
        .await;

    let query = BuildQuery {
        definition_id: Some(12),
        status: Some(BuildStatus::Completed),
        ..Default::default()
    };
    let builds = client(&server)
        .list_builds("My Project", &query, Some(4))
        .await
        .unwrap();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].id, 77);
}

#[tokio::test]
async fn test_forbidden_maps_to_api_error_with_service_message() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_apis/distributedtask/pools/4/agents"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "$id": "1",
            "message": "Access denied. You need Read permissions for pool 4."
        })))
        .mount(&server)
        .await;

    let err = client(&server).list_agents(4, None, None).await.unwrap_err();
    match err {
        AdoxError::Api { status, message } => {
            assert_eq!(status, 403);
            assert!(message.contains("Read permissions"));
        }
        other => panic!("Expected API error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sign_in_page_is_treated_as_unauthorized() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_apis/distributedtask/pools"))
        .respond_with(ResponseTemplate::new(203).set_body_string("<html>Sign in</html>"))
        .mount(&server)
        .await;

    let err = client(&server).list_pools(None).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn test_open_log_streams_body() {
    let server = MockServer::start().await;
    let body = "2024-05-01T10:00:00Z Starting\n".repeat(200);

    Mock::given(method("GET"))
        .and(path("/proj/_apis/build/builds/5/logs/3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
        .mount(&server)
        .await;

    let stream = client(&server).open_log("proj", 5, 3).await.unwrap();
    let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
    assert_eq!(chunks.concat(), body.as_bytes());
}

#[tokio::test]
async fn test_open_log_fails_before_streaming_on_404() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/proj/_apis/build/builds/5/logs/99"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "Log 99 was not found"
        })))
        .mount(&server)
        .await;

    let result = client(&server).open_log("proj", 5, 99).await;
    match result {
        Err(err) => assert_eq!(err.status(), Some(404)),
        Ok(_) => panic!("Expected the log to be reported missing"),
    }
}

#[tokio::test]
async fn test_timeline_without_records() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/proj/_apis/build/builds/8/timeline"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": null})))
        .mount(&server)
        .await;

    let records = client(&server).get_timeline("proj", 8).await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_run_artifact_requests_signed_content() {
    let server = MockServer::start().await;
    let signed = format!("{}/signed/drop.zip", server.uri());

    Mock::given(method("GET"))
        .and(path("/proj/_apis/pipelines/3/runs/40/artifacts"))
        .and(query_param("artifactName", "drop"))
        .and(query_param("$expand", "signedContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "drop",
            "signedContent": {"url": signed.clone(), "signatureExpires": "2030-01-01T00:00:00Z"}
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/signed/drop.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04zip".to_vec()))
        .mount(&server)
        .await;

    let client = client(&server);
    let artifact = client.get_run_artifact("proj", 3, 40, "drop").await.unwrap();
    let url = artifact.signed_content.unwrap().url;
    assert_eq!(url, signed);

    let chunks: Vec<bytes::Bytes> = client
        .open_signed_url(&url)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(chunks.concat(), b"PK\x03\x04zip");
}
