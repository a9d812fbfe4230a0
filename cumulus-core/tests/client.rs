use std::collections::BTreeMap;
use std::time::Duration;

use cumulus_core::{Account, BulkPart, Capabilities, DavClient};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn make_client(server: &MockServer) -> DavClient {
    DavClient::new(Account {
        url: Url::parse(&server.uri()).unwrap(),
        user: "alice".into(),
        password: "secret".into(),
        capabilities: Capabilities::default(),
    })
}

fn part_for(file: &str, bytes: &'static [u8]) -> BulkPart {
    let mut headers = BTreeMap::new();
    headers.insert("X-File-Path".to_string(), file.to_string());
    headers.insert("Content-Length".to_string(), bytes.len().to_string());
    BulkPart {
        headers,
        body: reqwest::Body::from(bytes),
        content_length: bytes.len() as u64,
    }
}

#[tokio::test]
async fn bulk_put_sends_parts_with_headers_and_parses_reply_array() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/remote.php/dav/bulk"))
        .and(header_exists("authorization"))
        .and(body_string_contains("x-file-path: a.txt"))
        .and(body_string_contains("hello"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-request-id", "req-1")
                .set_body_json(json!([
                    {
                        "X-File-Path": "a.txt",
                        "OC-ETag": "\"abc\"",
                        "OC-FileID": "42",
                        "X-OC-MTime": "accepted"
                    }
                ])),
        )
        .mount(&server)
        .await;

    let client = make_client(&server);
    let response = client
        .bulk_put(vec![part_for("a.txt", b"hello")], Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.request_id, "req-1");
    assert_eq!(response.replies.len(), 1);
    assert_eq!(response.replies[0].file_path, "a.txt");
    assert_eq!(response.replies[0].oc_etag, "\"abc\"");
    assert_eq!(response.replies[0].file_id, "42");
    assert_eq!(response.replies[0].mtime_ack, "accepted");
}

#[tokio::test]
async fn bulk_put_surfaces_error_status_with_body() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/remote.php/dav/bulk"))
        .respond_with(ResponseTemplate::new(507).set_body_string(
            "<d:error><s:message>Insufficient storage</s:message></d:error>",
        ))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let response = client
        .bulk_put(vec![part_for("big.bin", b"xxxx")], Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 507);
    assert!(response.replies.is_empty());
    assert!(response.body.contains("Insufficient storage"));
}

#[tokio::test]
async fn poll_job_status_resolves_relative_location() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ocs/poll/xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "finished",
            "ETag": "\"etag-1\"",
            "OC-FileID": "77"
        })))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let (status, reply) = client.poll_job_status("/ocs/poll/xyz").await.unwrap();

    assert_eq!(status.as_u16(), 200);
    assert_eq!(reply.status, "finished");
    assert_eq!(reply.etag, "\"etag-1\"");
    assert_eq!(reply.file_id, "77");
    assert!(!reply.is_pending());
}

#[tokio::test]
async fn poll_job_status_reports_typed_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ocs/poll/bad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "error",
            "errorCode": 507,
            "error": "quota exceeded"
        })))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let (_, reply) = client.poll_job_status("/ocs/poll/bad").await.unwrap();

    assert_eq!(reply.status, "error");
    assert_eq!(reply.error_code, 507);
    assert_eq!(reply.error, "quota exceeded");
}
