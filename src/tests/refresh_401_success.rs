use crate::tests::test_support::{base_config, capture_logs, drain_logs, ok, refreshed};
use crate::{ApiClient, Method, MultipartBody, RefreshState, RequestBody, RequestOptions};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

#[derive(Debug, Deserialize, PartialEq)]
struct Student {
    id: u32,
    name: String,
}

async fn mount_students(server: &MockServer, replays: u64) {
    Mock::given(method("GET"))
        .and(path("/students"))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/students"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ok(json!([
            { "id": 1, "name": "Amal" },
            { "id": 2, "name": "Omar" },
        ])))
        .expect(replays)
        .mount(server)
        .await;
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    mount_students(&server, 2).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refreshed("fresh").set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(base_config(&server.uri())).unwrap();
    client.set_access_token("stale");

    let (lines, guard) = capture_logs();
    let (a, b) = tokio::join!(
        client.get::<Vec<Student>>("/students", RequestOptions::default()),
        client.get::<Vec<Student>>("/students", RequestOptions::default()),
    );
    drop(guard);

    let a = a.expect("first caller gets students after refresh");
    let b = b.expect("second caller gets students after refresh");
    assert_eq!(a, b);
    assert_eq!(
        a[0],
        Student {
            id: 1,
            name: "Amal".into()
        }
    );
    assert_eq!(client.token().as_deref(), Some("fresh"));
    assert_eq!(client.refresh_state(), RefreshState::Idle);

    let logs = drain_logs(lines);
    assert!(
        logs.iter()
            .any(|line| line.contains("WARN") && line.contains("401")),
        "expected warning log mentioning 401, got: {:?}",
        logs
    );
}

#[tokio::test]
async fn every_waiter_replays_with_the_new_token() {
    let server = MockServer::start().await;
    mount_students(&server, 6).await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refreshed("fresh").set_delay(Duration::from_millis(150)))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(base_config(&server.uri())).unwrap();
    client.set_access_token("stale");

    let calls = (0..6).map(|_| {
        let client = client.clone();
        async move {
            client
                .get::<Vec<Student>>("/students", RequestOptions::default())
                .await
        }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| r.as_ref().is_ok_and(|s| s.len() == 2)));
}

#[tokio::test]
async fn replay_is_attempted_only_once() {
    let server = MockServer::start().await;

    // Still unauthorized after a successful refresh: the replay is not retried again.
    Mock::given(method("GET"))
        .and(path("/reports"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refreshed("fresh"))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(base_config(&server.uri())).unwrap();
    client.set_access_token("stale");

    let err = client
        .get::<serde_json::Value>("/reports", RequestOptions::default())
        .await
        .expect_err("replay is still unauthorized");
    assert_eq!(err.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
    assert_eq!(client.refresh_state(), RefreshState::Idle);
}

#[tokio::test]
async fn json_body_is_replayed_after_refresh() {
    let server = MockServer::start().await;
    let grade = json!({ "studentId": 2, "score": 91 });

    Mock::given(method("POST"))
        .and(path("/grades"))
        .and(header("Authorization", "Bearer stale"))
        .and(body_json(grade.clone()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/grades"))
        .and(header("Authorization", "Bearer fresh"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(grade.clone()))
        .respond_with(ok(json!({ "id": 40 })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refreshed("fresh"))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(base_config(&server.uri())).unwrap();
    client.set_access_token("stale");

    let created: serde_json::Value = client
        .post("/grades", &grade, RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(created, json!({ "id": 40 }));
}

#[tokio::test]
async fn multipart_body_is_rebuilt_for_the_replay() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/materials"))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/materials"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(|req: &Request| {
            let content_type = req
                .headers
                .get("content-type")
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default();
            let body = String::from_utf8_lossy(&req.body);
            if content_type.starts_with("multipart/form-data; boundary=")
                && body.contains("name=\"title\"")
                && body.contains("Week 3 notes")
                && body.contains("filename=\"notes.pdf\"")
                && body.contains("%PDF-1.7")
            {
                ok(json!({ "id": 9 }))
            } else {
                ResponseTemplate::new(400)
            }
        })
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refreshed("fresh"))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(base_config(&server.uri())).unwrap();
    client.set_access_token("stale");

    let form = MultipartBody::new()
        .text("title", "Week 3 notes")
        .file("file", "notes.pdf", Some("application/pdf"), b"%PDF-1.7".to_vec());
    let created: serde_json::Value = client
        .send(
            Method::POST,
            "/materials",
            RequestBody::from(form),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(created, json!({ "id": 9 }));
}
