//! `librored request` through the refresh pipeline.

mod fixtures;

use assert_cmd::cargo::cargo_bin_cmd;
use fixtures::{jwt, read_session, write_session};
use predicates::prelude::*;
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_request_refreshes_expired_token() {
    let server = MockServer::start().await;
    let home = tempdir().unwrap();
    let old = jwt("alice", 1);
    let new = jwt("alice", 2);
    write_session(home.path(), &old, "refresh-1");

    Mock::given(method("GET"))
        .and(path("/api/books"))
        .and(header("authorization", format!("Bearer {old}").as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .and(query_param("page", "2"))
        .and(header("authorization", format!("Bearer {new}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "title": "Dune" }])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "refresh-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "SUCCESS",
            "accessToken": new,
            "refreshToken": "refresh-2",
        })))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("librored")
        .env("LIBRORED_HOME", home.path())
        .args(["--base-url", &format!("{}/api", server.uri())])
        .args(["request", "get", "books", "--query", "page=2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("HTTP 200"))
        .stdout(predicate::str::contains("\"title\": \"Dune\""));

    let session = read_session(home.path());
    assert_eq!(session["access_token"], new.as_str());
    assert_eq!(session["refresh_token"], "refresh-2");
}

#[tokio::test]
async fn test_request_sends_json_body() {
    let server = MockServer::start().await;
    let home = tempdir().unwrap();
    let token = jwt("alice", 1);
    write_session(home.path(), &token, "refresh-1");

    Mock::given(method("POST"))
        .and(path("/api/loans"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .and(body_json(json!({ "bookId": 3 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 11 })))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("librored")
        .env("LIBRORED_HOME", home.path())
        .args(["--base-url", &format!("{}/api", server.uri())])
        .args(["request", "POST", "/loans", "--data", r#"{"bookId":3}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("HTTP 201"));
}

#[tokio::test]
async fn test_request_failed_refresh_asks_for_login() {
    let server = MockServer::start().await;
    let home = tempdir().unwrap();
    write_session(home.path(), &jwt("alice", 1), "refresh-1");

    Mock::given(method("GET"))
        .and(path("/api/loans"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    cargo_bin_cmd!("librored")
        .env("LIBRORED_HOME", home.path())
        .args(["--base-url", &format!("{}/api", server.uri())])
        .args(["request", "GET", "loans"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Session expired"));

    assert!(!home.path().join("session.json").exists());
}

#[tokio::test]
async fn test_request_non_success_status_fails_with_body() {
    let server = MockServer::start().await;
    let home = tempdir().unwrap();
    write_session(home.path(), &jwt("alice", 1), "refresh-1");

    Mock::given(method("DELETE"))
        .and(path("/api/books/9"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Book not found"))
        .mount(&server)
        .await;

    cargo_bin_cmd!("librored")
        .env("LIBRORED_HOME", home.path())
        .args(["--base-url", &format!("{}/api", server.uri())])
        .args(["request", "DELETE", "books/9"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("HTTP 404"))
        .stdout(predicate::str::contains("Book not found"))
        .stderr(predicate::str::contains("Request failed"));

    // Application errors leave the session alone
    assert!(home.path().join("session.json").exists());
}

#[tokio::test]
async fn test_request_without_session_is_unauthenticated() {
    let server = MockServer::start().await;
    let home = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    cargo_bin_cmd!("librored")
        .env("LIBRORED_HOME", home.path())
        .args(["--base-url", &format!("{}/api", server.uri())])
        .args(["request", "GET", "users/me"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn test_request_rejects_invalid_json_data() {
    let home = tempdir().unwrap();

    cargo_bin_cmd!("librored")
        .env("LIBRORED_HOME", home.path())
        .args(["request", "POST", "books", "--data", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--data is not valid JSON"));
}
