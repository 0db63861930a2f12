//! Integration tests for the HTTP hub client against a wiremock hub

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use credential_rotator::hub::{
    HttpHubClient, HubClient, HubClientConfig, HubError, ServerCertificateUpload, SigningKeyUpload,
};
use credential_rotator::secrets::SecretString;

fn client(server: &MockServer, token: Option<&str>) -> HttpHubClient {
    HttpHubClient::new(HubClientConfig {
        base_url: Url::parse(&server.uri()).unwrap(),
        dfsp_id: "dfsp-a".to_string(),
        token: token.map(SecretString::new),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn test_signing_key_upload_posts_camel_case_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dfsps/dfsp-a/jwscerts"))
        .and(body_json(json!({"publicKey": "PUBLIC", "createdAt": 1_700_000_000})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server, None)
        .upload_signing_key(&SigningKeyUpload {
            public_key: "PUBLIC".to_string(),
            created_at: 1_700_000_000,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_server_certificate_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dfsps/dfsp-a/servercerts"))
        .and(body_json(json!({
            "rootCertificate": "ROOT",
            "intermediateChain": "INT1INT2",
            "serverCertificate": "CERT",
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client(&server, None)
        .upload_server_certificate(&ServerCertificateUpload {
            root_certificate: "ROOT".to_string(),
            intermediate_chain: "INT1INT2".to_string(),
            server_certificate: "CERT".to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_bearer_token_sent_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dfsps/dfsp-a/jwscerts"))
        .and(header("authorization", "Bearer hub-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server, Some("hub-token"))
        .upload_signing_key(&SigningKeyUpload { public_key: "P".to_string(), created_at: 1 })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dfsps/dfsp-a/jwscerts"))
        .respond_with(ResponseTemplate::new(500).set_body_string("registry down"))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .upload_signing_key(&SigningKeyUpload { public_key: "P".to_string(), created_at: 1 })
        .await
        .unwrap_err();

    match err {
        HubError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "registry down");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unreachable_hub_is_a_request_error() {
    // bind then release a port so nothing is listening on it
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let hub = HttpHubClient::new(HubClientConfig {
        base_url: Url::parse(&format!("http://{}", addr)).unwrap(),
        dfsp_id: "dfsp-a".to_string(),
        token: None,
        timeout: Duration::from_secs(5),
    })
    .unwrap();

    let err = hub
        .upload_signing_key(&SigningKeyUpload { public_key: "P".to_string(), created_at: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Request(_)));
}
