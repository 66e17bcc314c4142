use davbridge_core::{Credentials, DavClient};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHARES_PATH: &str = "/ocs/v2.php/apps/files_sharing/api/v1/shares";

fn client_for(server: &MockServer) -> DavClient {
    DavClient::new(&Credentials::new(server.uri(), "alice", "secret")).unwrap()
}

fn ocs_list(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "ocs": { "meta": { "status": "ok", "statuscode": 200 }, "data": data }
    }))
}

#[tokio::test]
async fn get_share_returns_none_when_no_public_link_exists() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SHARES_PATH))
        .and(query_param("path", "Docs/a.txt"))
        .and(query_param("format", "json"))
        .respond_with(ocs_list(json!([])))
        .mount(&server)
        .await;

    let share = client_for(&server).get_share("Docs/a.txt").await.unwrap();
    assert!(share.is_none());
}

#[tokio::test]
async fn get_share_skips_non_public_shares() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SHARES_PATH))
        .respond_with(ocs_list(json!([
            { "id": "1", "share_type": 0, "token": null, "url": null },
            { "id": "2", "share_type": 3, "token": "tok2", "url": "https://cloud.test/s/tok2" }
        ])))
        .mount(&server)
        .await;

    let share = client_for(&server)
        .get_share("Docs/a.txt")
        .await
        .unwrap()
        .expect("public link expected");
    assert_eq!(share.id, "2");
    assert_eq!(share.token.as_deref(), Some("tok2"));
}

#[tokio::test]
async fn create_share_posts_public_link_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SHARES_PATH))
        .and(body_string_contains("shareType=3"))
        .and(body_string_contains("path=Docs%2Fa.txt"))
        .respond_with(ocs_list(
            json!({ "id": "7", "share_type": 3, "token": "fresh", "url": null }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let share = client_for(&server).create_share("Docs/a.txt").await.unwrap();
    assert_eq!(share.token.as_deref(), Some("fresh"));
}

#[tokio::test]
async fn public_url_reuses_existing_share() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SHARES_PATH))
        .respond_with(ocs_list(json!([
            { "id": "3", "share_type": 3, "token": "keepme", "url": null }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SHARES_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let url = client_for(&server).public_url("Docs/a.txt").await.unwrap();
    assert_eq!(url, format!("{}/s/keepme/download", server.uri()));
}

#[tokio::test]
async fn public_url_creates_share_when_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SHARES_PATH))
        .respond_with(ocs_list(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SHARES_PATH))
        .respond_with(ocs_list(
            json!({ "id": "9", "share_type": 3, "token": "tok9", "url": null }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let url = client_for(&server).public_url("Docs/a.txt").await.unwrap();
    assert_eq!(url, format!("{}/s/tok9/download", server.uri()));
}
