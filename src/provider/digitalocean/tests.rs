//! Unit tests for DigitalOcean response handling.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use rstest::rstest;

use super::request::{Failure, classify, decode, retry_after};
use super::wire::{ActionEnvelope, VolumeEnvelope, VolumePage, WireMetadata, droplet_id, has_next_page};
use crate::provider::{
    Action, ActionStatus, LocalNode, NodeId, ProviderError, ProviderVolume, Region, VolumeId,
};

const ERROR_BODY: &[u8] = br#"{"id":"unauthorized","message":"Unable to authenticate you."}"#;

#[rstest]
#[case(StatusCode::UNAUTHORIZED)]
#[case(StatusCode::FORBIDDEN)]
fn auth_failures_are_fatal(#[case] status: StatusCode) {
    let failure = classify(status, &HeaderMap::new(), ERROR_BODY, "volumes");
    assert_eq!(
        failure,
        Failure::Fatal(ProviderError::Authentication {
            message: String::from("Unable to authenticate you."),
        })
    );
}

#[test]
fn not_found_names_the_resource() {
    let failure = classify(StatusCode::NOT_FOUND, &HeaderMap::new(), b"", "volumes/v-1");
    assert_eq!(
        failure,
        Failure::Fatal(ProviderError::NotFound {
            resource: String::from("volumes/v-1"),
        })
    );
}

#[rstest]
#[case(StatusCode::CONFLICT)]
#[case(StatusCode::UNPROCESSABLE_ENTITY)]
fn state_conflicts_are_fatal(#[case] status: StatusCode) {
    let failure = classify(status, &HeaderMap::new(), b"already attached", "volumes/v-1/actions");
    assert!(matches!(
        failure,
        Failure::Fatal(ProviderError::Conflict { ref message }) if message == "already attached"
    ));
}

#[test]
fn other_client_errors_are_rejected() {
    let failure = classify(StatusCode::BAD_REQUEST, &HeaderMap::new(), b"nope", "volumes");
    assert_eq!(
        failure,
        Failure::Fatal(ProviderError::Rejected {
            status: 400,
            message: String::from("nope"),
        })
    );
}

#[rstest]
#[case(StatusCode::INTERNAL_SERVER_ERROR)]
#[case(StatusCode::BAD_GATEWAY)]
#[case(StatusCode::SERVICE_UNAVAILABLE)]
fn server_errors_are_transient(#[case] status: StatusCode) {
    let failure = classify(status, &HeaderMap::new(), b"", "volumes");
    assert!(matches!(
        failure,
        Failure::Transient {
            retry_after: None,
            ..
        }
    ));
}

#[test]
fn rate_limits_carry_retry_after() {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
    let failure = classify(StatusCode::TOO_MANY_REQUESTS, &headers, b"", "volumes");
    assert!(matches!(
        failure,
        Failure::Transient {
            retry_after: Some(delay),
            ..
        } if delay == Duration::from_secs(7)
    ));
}

#[test]
fn retry_after_ignores_http_dates() {
    let mut headers = HeaderMap::new();
    headers.insert(
        RETRY_AFTER,
        HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
    );
    assert_eq!(retry_after(&headers), None);
}

#[test]
fn volume_payload_converts_sizes_and_attachments() {
    let body = br#"{"volume":{"id":"506f78a4","name":"flocker-v1-0ff663594f6347c8a950ff5de6f6225e",
        "description":"flocker-v1-cluster-id: c1","size_gigabytes":100,
        "region":{"slug":"ams3","name":"Amsterdam 3"},"droplet_ids":[42]}}"#;
    let envelope: VolumeEnvelope = decode(body).expect("volume payload");
    let volume = ProviderVolume::from(envelope.volume);
    assert_eq!(volume.id, VolumeId::from("506f78a4"));
    assert_eq!(volume.size_bytes, 107_374_182_400);
    assert_eq!(volume.region, Region::from("ams3"));
    assert_eq!(volume.attached_to, vec![NodeId::from("42")]);
    assert_eq!(volume.description, "flocker-v1-cluster-id: c1");
}

#[test]
fn volume_payload_tolerates_null_droplets_and_description() {
    let body = br#"{"volume":{"id":"v","name":"n","description":null,"size_gigabytes":1,
        "region":{"slug":"nyc1"},"droplet_ids":null}}"#;
    let envelope: VolumeEnvelope = decode(body).expect("volume payload");
    let volume = ProviderVolume::from(envelope.volume);
    assert!(volume.attached_to.is_empty());
    assert!(volume.description.is_empty());
}

#[test]
fn volume_page_reports_next_link() {
    let body = br#"{"volumes":[],"links":{"pages":{"next":"https://api/v2/volumes?page=2"}}}"#;
    let page: VolumePage = decode(body).expect("page payload");
    assert!(has_next_page(page.links.as_ref()));

    let last: VolumePage = decode(br#"{"volumes":[],"links":{}}"#).expect("page payload");
    assert!(!has_next_page(last.links.as_ref()));
}

#[rstest]
#[case("in-progress", ActionStatus::InProgress)]
#[case("completed", ActionStatus::Completed)]
#[case("errored", ActionStatus::Errored)]
fn action_payload_maps_status(#[case] wire: &str, #[case] expected: ActionStatus) {
    let body = format!(
        r#"{{"action":{{"id":36804751,"status":"{wire}","type":"attach_volume","resource_id":null}}}}"#
    );
    let envelope: ActionEnvelope = decode(body.as_bytes()).expect("action payload");
    let action = Action::from(envelope.action);
    assert_eq!(action.status, expected);
    assert_eq!(action.id.as_str(), "36804751");
}

#[test]
fn metadata_payload_maps_local_node() {
    let body = br#"{"droplet_id":2756294,"hostname":"kitchen.ma.rs","region":"oxia-planum"}"#;
    let metadata: WireMetadata = decode(body).expect("metadata payload");
    assert_eq!(
        LocalNode::from(metadata),
        LocalNode {
            id: NodeId::from("2756294"),
            region: Region::from("oxia-planum"),
            hostname: String::from("kitchen.ma.rs"),
        }
    );
}

#[test]
fn droplet_ids_must_be_numeric() {
    assert_eq!(droplet_id(&NodeId::from("42")), Ok(42));
    assert!(matches!(
        droplet_id(&NodeId::from("node-7")),
        Err(ProviderError::InvalidRequest(_))
    ));
}
