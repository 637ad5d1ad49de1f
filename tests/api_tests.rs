//! End-to-end tests over a live server on an ephemeral port, driving both
//! the JSON API (bearer tokens) and the browser surface (session cookie).

use mdwiki::config::Config;
use mdwiki::identity::{Claims, TokenIssuer};
use mdwiki::server;
use serde_json::{json, Value};
use tempfile::TempDir;

const TEST_SECRET: &str = "integration-test-secret";

/// Boot a server on 127.0.0.1:0 backed by a throwaway database, returning
/// its base url. The TempDir must outlive the test.
async fn spawn_server() -> (TempDir, String) {
    let dir = TempDir::new().expect("tempdir");
    let config = Config {
        http_port: 0,
        db_url: format!("sqlite:{}/wiki.db", dir.path().display()),
        db_max_pool_size: 5,
        jwt_secret: TEST_SECRET.to_string(),
        jwt_ttl_secs: 3600,
        session_ttl_secs: 3600,
    };
    let state = server::build_state(&config).await.expect("state");
    let app = server::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (dir, format!("http://{}", addr))
}

async fn fetch_token(client: &reqwest::Client, base: &str) -> String {
    let response = client
        .get(format!("{base}/api/token"))
        .header("login", "foo")
        .header("password", "bar")
        .send()
        .await
        .expect("token request");
    assert_eq!(response.status(), 200);
    response.text().await.expect("token body")
}

#[tokio::test]
async fn api_page_lifecycle() {
    let (_dir, base) = spawn_server().await;
    let client = reqwest::Client::new();
    let token = fetch_token(&client, &base).await;

    // create
    let response = client
        .post(format!("{base}/api/pages"))
        .bearer_auth(&token)
        .json(&json!({"name": "Sample", "markdown": "# A sample page"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    // list: the first page gets id 0
    let response = client
        .get(format!("{base}/api/pages"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["pages"][0]["id"], 0);
    assert_eq!(body["pages"][0]["name"], "Sample");

    // fetch one: raw markdown and rendered html
    let response = client
        .get(format!("{base}/api/pages/0"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["page"]["markdown"], "# A sample page");
    assert!(body["page"]["html"].as_str().unwrap().contains("<h1"));

    // update
    let response = client
        .put(format!("{base}/api/pages/0"))
        .bearer_auth(&token)
        .json(&json!({"markdown": "Oh Yeah!"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);

    let response = client
        .get(format!("{base}/api/pages/0"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["page"]["markdown"], "Oh Yeah!");

    // delete, then the listing is empty again
    let response = client
        .delete(format!("{base}/api/pages/0"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .get(format!("{base}/api/pages"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["pages"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn token_endpoint_rejects_bad_credentials() {
    let (_dir, base) = spawn_server().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/api/token"))
        .header("login", "foo")
        .header("password", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn api_requires_a_token() {
    let (_dir, base) = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{base}/api/pages")).send().await.unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);

    let response = client
        .get(format!("{base}/api/pages"))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn create_without_claim_is_rejected_before_any_mutation() {
    let (_dir, base) = spawn_server().await;
    let client = reqwest::Client::new();

    // mint a valid token whose create capability is off
    let issuer = TokenIssuer::new(TEST_SECRET, 3600);
    let limited = issuer
        .issue("guest", &Claims { can_create: false, can_update: false, can_delete: false })
        .unwrap();

    let response = client
        .post(format!("{base}/api/pages"))
        .bearer_auth(&limited)
        .json(&json!({"name": "Sneaky", "markdown": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // nothing was written
    let token = fetch_token(&client, &base).await;
    let response = client
        .get(format!("{base}/api/pages"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["pages"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn bad_payload_names_the_missing_field() {
    let (_dir, base) = spawn_server().await;
    let client = reqwest::Client::new();
    let token = fetch_token(&client, &base).await;

    let response = client
        .post(format!("{base}/api/pages"))
        .bearer_auth(&token)
        .json(&json!({"name": "OnlyAName"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("markdown"));
}

#[tokio::test]
async fn fetching_a_missing_page_is_404() {
    let (_dir, base) = spawn_server().await;
    let client = reqwest::Client::new();
    let token = fetch_token(&client, &base).await;

    let response = client
        .get(format!("{base}/api/pages/7"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn deleting_a_missing_page_still_succeeds() {
    let (_dir, base) = spawn_server().await;
    let client = reqwest::Client::new();
    let token = fetch_token(&client, &base).await;

    let response = client
        .delete(format!("{base}/api/pages/7"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn ui_login_flow_sets_a_session_cookie() {
    let (_dir, base) = spawn_server().await;
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    // anonymous visits bounce to the login form
    let response = client.get(format!("{base}/")).send().await.unwrap();
    assert_eq!(response.status(), 303);
    assert_eq!(response.headers()["location"], "/login");

    let response = client.get(format!("{base}/login")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    // wrong password stays out
    let response = client
        .post(format!("{base}/login-auth"))
        .form(&[("username", "foo"), ("password", "nope")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // correct credentials set the session cookie and redirect home
    let response = client
        .post(format!("{base}/login-auth"))
        .form(&[("username", "foo"), ("password", "bar")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);
    let cookie = response.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.contains("mdwiki_session="));
    assert!(cookie.contains("HttpOnly"));
    let cookie_pair = cookie.split(';').next().unwrap().to_string();

    let response = client
        .get(format!("{base}/"))
        .header("Cookie", &cookie_pair)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("foo"));

    // logout clears the cookie and the old session no longer works
    let response = client
        .get(format!("{base}/logout"))
        .header("Cookie", &cookie_pair)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 302);

    let response = client
        .get(format!("{base}/"))
        .header("Cookie", &cookie_pair)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);
}

#[tokio::test]
async fn markdown_preview_is_public() {
    let (_dir, base) = spawn_server().await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/app/markdown"))
        .body("# Hello")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("<h1"));
    assert!(body.contains("Hello"));
}
