//! Integration tests for the DigitalOcean client against a scripted HTTP
//! server.

#[path = "common/mock_server.rs"]
mod mock_server;

use std::time::{Duration, Instant};

use ballast::test_support::driver_config;
use ballast::{
    BlockStorageApi, Dataset, DatasetId, DigitalOceanClient, DriverConfig, DriverError, GIB,
    NodeId, ProviderError, Reconciler, Region, VolumeId,
};
use mock_server::{MockServer, Scripted};
use rstest::*;

const DATASET: &str = "11111111-1111-1111-1111-111111111111";
const VOLUME_NAME: &str = "flocker-v1-11111111111111111111111111111111";

fn volume_json(id: &str, name: &str, droplets: &str) -> String {
    format!(
        r#"{{"id":"{id}","name":"{name}","description":"","size_gigabytes":10,
            "region":{{"slug":"ams3","name":"Amsterdam 3"}},"droplet_ids":{droplets}}}"#
    )
}

fn volume_page(volumes: &[String], next: Option<&str>) -> String {
    let links = next.map_or_else(
        || String::from("{}"),
        |url| format!(r#"{{"pages":{{"next":"{url}"}}}}"#),
    );
    format!(
        r#"{{"volumes":[{}],"links":{links},"meta":{{"total":{}}}}}"#,
        volumes.join(","),
        volumes.len()
    )
}

fn config_for(server: &MockServer) -> DriverConfig {
    DriverConfig {
        http_timeout_secs: 1,
        ..driver_config(server.base_url())
    }
}

fn client_for(server: &MockServer) -> DigitalOceanClient {
    DigitalOceanClient::new(&config_for(server)).unwrap_or_else(|err| panic!("client: {err}"))
}

#[rstest]
#[case(503)]
#[case(502)]
#[case(500)]
#[tokio::test]
async fn transient_failures_are_retried_until_success(#[case] status: u16) {
    let server = MockServer::start(vec![
        Scripted::empty(status),
        Scripted::empty(status),
        Scripted::json(200, volume_page(&[], None)),
    ])
    .await;

    let volumes = client_for(&server)
        .list_volumes(None)
        .await
        .unwrap_or_else(|err| panic!("listing succeeds on third attempt: {err}"));
    assert!(volumes.is_empty());
    assert_eq!(server.count("GET", "/volumes"), 3);
}

#[tokio::test]
async fn exhausted_budget_surfaces_unavailable() {
    let server = MockServer::start(vec![
        Scripted::empty(503),
        Scripted::empty(503),
        Scripted::empty(503),
        Scripted::json(200, volume_page(&[], None)),
    ])
    .await;

    let err = client_for(&server)
        .list_volumes(None)
        .await
        .expect_err("budget of three is exhausted");
    assert!(
        matches!(err, ProviderError::Unavailable { attempts: 3, .. }),
        "unexpected error: {err:?}"
    );
    assert_eq!(server.requests().len(), 3);
}

#[rstest]
#[case(401)]
#[case(403)]
#[tokio::test]
async fn authentication_failures_are_not_retried(#[case] status: u16) {
    let server = MockServer::start(vec![Scripted::json(
        status,
        r#"{"id":"unauthorized","message":"Unable to authenticate you."}"#,
    )])
    .await;

    let err = client_for(&server)
        .list_volumes(None)
        .await
        .expect_err("token rejected");
    assert_eq!(
        err,
        ProviderError::Authentication {
            message: String::from("Unable to authenticate you."),
        }
    );
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn missing_volume_is_not_found_without_retry() {
    let server = MockServer::start(vec![Scripted::json(
        404,
        r#"{"id":"not_found","message":"The resource you were accessing could not be found."}"#,
    )])
    .await;

    let err = client_for(&server)
        .get_volume(&VolumeId::from("v-404"))
        .await
        .expect_err("volume missing");
    assert!(err.is_not_found(), "unexpected error: {err:?}");
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn rate_limit_honours_retry_after() {
    let server = MockServer::start(vec![
        Scripted::json(429, r#"{"id":"too_many_requests","message":"slow down"}"#)
            .header("Retry-After", "1"),
        Scripted::json(200, volume_page(&[], None)),
    ])
    .await;

    client_for(&server)
        .list_volumes(None)
        .await
        .unwrap_or_else(|err| panic!("retry after rate limit: {err}"));
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn rate_limit_without_hint_uses_policy_backoff() {
    let server = MockServer::start(vec![
        Scripted::json(429, r#"{"id":"too_many_requests","message":"slow down"}"#),
        Scripted::json(429, r#"{"id":"too_many_requests","message":"slow down"}"#),
        Scripted::json(200, volume_page(&[], None)),
    ])
    .await;
    let config = DriverConfig {
        backoff_base_ms: 200,
        backoff_cap_ms: 1_000,
        ..config_for(&server)
    };
    let client = DigitalOceanClient::new(&config).unwrap_or_else(|err| panic!("client: {err}"));

    let started = Instant::now();
    client
        .list_volumes(None)
        .await
        .unwrap_or_else(|err| panic!("retry after rate limit: {err}"));
    let elapsed = started.elapsed();

    assert_eq!(server.requests().len(), 3);
    assert!(
        elapsed >= Duration::from_millis(600),
        "two backoffs of 200ms and 400ms expected, waited {elapsed:?}"
    );
}

#[tokio::test]
async fn listing_follows_pagination_and_sends_bearer_token() {
    let server = MockServer::start(vec![
        Scripted::json(
            200,
            volume_page(
                &[volume_json("a", VOLUME_NAME, "[42]")],
                Some("https://api.digitalocean.com/v2/volumes?page=2"),
            ),
        ),
        Scripted::json(
            200,
            volume_page(&[volume_json("b", "custom-volume", "null")], None),
        ),
    ])
    .await;

    let volumes = client_for(&server)
        .list_volumes(Some(&Region::from("ams3")))
        .await
        .unwrap_or_else(|err| panic!("listing: {err}"));
    assert_eq!(volumes.len(), 2);
    assert_eq!(
        volumes.first().map(|vol| vol.attached_to.clone()),
        Some(vec![NodeId::from("42")])
    );

    let requests = server.requests();
    let paths: Vec<&str> = requests.iter().map(|req| req.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "/volumes?per_page=200&page=1&region=ams3",
            "/volumes?per_page=200&page=2&region=ams3",
        ]
    );
    assert!(
        requests
            .iter()
            .all(|req| req.authorization.as_deref() == Some("Bearer test-token")),
        "requests: {requests:?}"
    );
}

#[tokio::test]
async fn attach_posts_volume_action() {
    let server = MockServer::start(vec![Scripted::json(
        201,
        r#"{"action":{"id":72531856,"status":"in-progress","type":"attach_volume","resource_id":null}}"#,
    )])
    .await;

    let action = client_for(&server)
        .attach(
            &VolumeId::from("7724db7c"),
            &NodeId::from("11612190"),
            &Region::from("nyc1"),
        )
        .await
        .unwrap_or_else(|err| panic!("attach: {err}"));
    assert_eq!(action.id.as_str(), "72531856");

    let requests = server.requests();
    let request = requests.first().unwrap_or_else(|| panic!("attach request"));
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/volumes/7724db7c/actions");
    assert_eq!(
        request.json(),
        serde_json::json!({"type": "attach", "droplet_id": 11_612_190, "region": "nyc1"})
    );
}

#[tokio::test]
async fn non_numeric_node_is_rejected_before_sending() {
    let server = MockServer::start(Vec::new()).await;
    let err = client_for(&server)
        .attach(
            &VolumeId::from("v-1"),
            &NodeId::from("node-7"),
            &Region::from("ams3"),
        )
        .await
        .expect_err("droplet ids are numeric");
    assert!(matches!(err, ProviderError::InvalidRequest(_)));
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn metadata_is_read_without_credentials() {
    let server = MockServer::start(vec![Scripted::json(
        200,
        r#"{"droplet_id":2756294,"hostname":"sample-droplet","region":"ams3","vendor_data":""}"#,
    )])
    .await;

    let node = client_for(&server)
        .local_node()
        .await
        .unwrap_or_else(|err| panic!("metadata: {err}"));
    assert_eq!(node.id, NodeId::from("2756294"));
    let requests = server.requests();
    let request = requests.first().unwrap_or_else(|| panic!("metadata request"));
    assert_eq!(request.path, "/metadata/v1.json");
    assert_eq!(request.authorization, None);
}

/// A create whose first two sends time out is resent, and the engine
/// settles on the volume from the third.
#[tokio::test]
async fn engine_create_survives_two_timeouts() {
    let created = volume_json("v-100", VOLUME_NAME, "[]");
    let server = MockServer::start(vec![
        Scripted::json(200, volume_page(&[], None)),
        Scripted::json(201, format!(r#"{{"volume":{created}}}"#)).delayed(Duration::from_secs(3)),
        Scripted::json(201, format!(r#"{{"volume":{created}}}"#)).delayed(Duration::from_secs(3)),
        Scripted::json(201, format!(r#"{{"volume":{created}}}"#)),
        Scripted::json(200, volume_page(&[created.clone()], None)),
    ])
    .await;
    let config = config_for(&server);
    let client = DigitalOceanClient::new(&config).unwrap_or_else(|err| panic!("client: {err}"));
    let engine = Reconciler::new(client, &config).unwrap_or_else(|err| panic!("engine: {err}"));
    let dataset_id: DatasetId = DATASET
        .parse()
        .unwrap_or_else(|err| panic!("dataset id: {err}"));

    let volume = engine
        .create(&Dataset::new(dataset_id, 10 * GIB))
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));
    assert_eq!(volume.id, VolumeId::from("v-100"));
    assert_eq!(volume.size_bytes, 10 * GIB);
    assert_eq!(server.count("POST", "/volumes"), 3);

    let posts: Vec<_> = server
        .requests()
        .into_iter()
        .filter(|req| req.method == "POST")
        .collect();
    assert!(
        posts
            .iter()
            .all(|req| req.json()
                == serde_json::json!({
                    "size_gigabytes": 10,
                    "name": VOLUME_NAME,
                    "description": "",
                    "region": "ams3",
                })),
        "every resend carries the same body: {posts:?}"
    );
}

#[tokio::test]
async fn engine_surfaces_authentication_failure() {
    let server = MockServer::start(vec![Scripted::json(
        401,
        r#"{"id":"unauthorized","message":"Unable to authenticate you."}"#,
    )])
    .await;
    let config = config_for(&server);
    let client = DigitalOceanClient::new(&config).unwrap_or_else(|err| panic!("client: {err}"));
    let engine = Reconciler::new(client, &config).unwrap_or_else(|err| panic!("engine: {err}"));

    let err = engine.list_datasets().await.expect_err("token rejected");
    assert_eq!(
        err,
        DriverError::AuthenticationFailed(String::from("Unable to authenticate you."))
    );
}
