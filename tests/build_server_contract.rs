//! Build server contract tests.
//!
//! Drives the blocking `BuildClient` against a wiremock server. The client is
//! created, used and dropped inside `spawn_blocking` because the blocking
//! reqwest client owns its own runtime.

use build_updater::update::{ArtifactLocation, BuildClient, BuildId, BuildSource};
use build_updater::UpdateError;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn base_url(server: &MockServer) -> String {
    format!("{}/_apis/build", server.uri())
}

async fn with_client<T, F>(server: &MockServer, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce(&BuildClient) -> T + Send + 'static,
{
    let base = base_url(server);
    tokio::task::spawn_blocking(move || {
        let client = BuildClient::new(&base, "4.1", "sharey", None)
            .unwrap()
            .with_progress(false);
        f(&client)
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_latest_build_is_first_entry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_apis/build/builds"))
        .and(query_param("api-version", "4.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 3,
            "value": [{"id": 105}, {"id": 104}, {"id": 100}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let latest = with_client(&server, |c| c.latest_build_id()).await;
    assert_eq!(latest.unwrap(), BuildId(105));
}

#[tokio::test]
async fn test_build_list_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_apis/build/builds"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = with_client(&server, |c| c.latest_build_id()).await.unwrap_err();
    assert!(matches!(err, UpdateError::RemoteQuery(_)));
}

#[tokio::test]
async fn test_empty_build_list_is_malformed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_apis/build/builds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 0, "value": []})))
        .mount(&server)
        .await;

    let err = with_client(&server, |c| c.latest_build_id()).await.unwrap_err();
    assert!(matches!(err, UpdateError::RemoteQuery(_)));
}

#[tokio::test]
async fn test_non_json_build_list_is_malformed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_apis/build/builds"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>sign in</html>"))
        .mount(&server)
        .await;

    let err = with_client(&server, |c| c.latest_build_id()).await.unwrap_err();
    assert!(matches!(err, UpdateError::RemoteQuery(_)));
}

#[tokio::test]
async fn test_artifact_location_reads_download_url() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_apis/build/builds/105/artifacts"))
        .and(query_param("artifactName", "sharey"))
        .and(query_param("api-version", "4.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "name": "sharey",
            "resource": {
                "type": "Container",
                "downloadUrl": "https://artifacts.example/sharey.zip?sig=abc"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let location = with_client(&server, |c| c.artifact_location(BuildId(105)))
        .await
        .unwrap();
    assert_eq!(
        location,
        ArtifactLocation {
            build: BuildId(105),
            url: "https://artifacts.example/sharey.zip?sig=abc".to_string(),
        }
    );
}

#[tokio::test]
async fn test_artifact_404_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_apis/build/builds/105/artifacts"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "Artifact sharey was not found for build 105."
        })))
        .mount(&server)
        .await;

    let err = with_client(&server, |c| c.artifact_location(BuildId(105)))
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::ArtifactNotFound { build: 105, .. }));
}

#[tokio::test]
async fn test_artifact_with_other_name_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_apis/build/builds/105/artifacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "drop",
            "resource": {"downloadUrl": "https://artifacts.example/drop.zip"}
        })))
        .mount(&server)
        .await;

    let err = with_client(&server, |c| c.artifact_location(BuildId(105)))
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::ArtifactNotFound { .. }));
}

#[tokio::test]
async fn test_artifact_without_resource_is_malformed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_apis/build/builds/105/artifacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "sharey"})))
        .mount(&server)
        .await;

    let err = with_client(&server, |c| c.artifact_location(BuildId(105)))
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::RemoteQuery(_)));
}

#[tokio::test]
async fn test_download_writes_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/sharey.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK-fake-bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("sharey_build_105.zip");
    let location = ArtifactLocation {
        build: BuildId(105),
        url: format!("{}/files/sharey.zip", server.uri()),
    };

    let target = dest.clone();
    with_client(&server, move |c| c.download(&location, &target))
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), b"PK-fake-bytes");
}

#[tokio::test]
async fn test_download_failure_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/sharey.zip"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("a.zip");
    let location = ArtifactLocation {
        build: BuildId(105),
        url: format!("{}/files/sharey.zip", server.uri()),
    };

    let err = with_client(&server, move |c| c.download(&location, &dest))
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::Download(_)));
}
