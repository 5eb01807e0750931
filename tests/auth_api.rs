mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;

use common::{authed_request, json_request, refresh_cookie_pair, spawn_app};

#[tokio::test]
async fn health_is_public() {
    let app = spawn_app().await;
    let response = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), json!({ "status": "ok" }));
}

#[tokio::test]
async fn register_then_login_sets_refresh_cookie() {
    let app = spawn_app().await;

    let created = app.register("alice", "password123").await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.json()["msg"], "Your account has been successfully registered!");

    let duplicate = app.register("alice", "password456").await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let login = app.login("alice", "password123").await;
    assert_eq!(login.status, StatusCode::OK);
    assert_eq!(login.json()["token_type"], "bearer");

    let cookie = login
        .headers
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("refresh_token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
    assert!(cookie.contains("Path=/auth/refresh"));
    assert!(cookie.contains("Max-Age=604800"));
}

#[tokio::test]
async fn bad_credentials_and_missing_tokens_are_unauthorized() {
    let app = spawn_app().await;
    app.register("alice", "password123").await;

    assert_eq!(app.login("alice", "wrong-password").await.status, StatusCode::UNAUTHORIZED);

    let response = app
        .send(Request::get("/auth/protected").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json()["error"], "Could not validate credentials");
    assert_eq!(
        response.headers.get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );

    let response = app.send(authed_request("GET", "/auth/protected", "not.a.jwt")).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_route_greets_user() {
    let app = spawn_app().await;
    let token = app.signed_in("alice").await;

    let response = app.send(authed_request("GET", "/auth/protected", &token)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["message"], "Hello, alice!");
}

#[tokio::test]
async fn refresh_cookie_mints_access_token() {
    let app = spawn_app().await;
    app.register("alice", "password123").await;
    let login = app.login("alice", "password123").await;
    let cookie = refresh_cookie_pair(&login.headers).unwrap();

    let response = app
        .send(
            Request::post("/auth/refresh")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let access = response.json()["access_token"].as_str().unwrap().to_string();

    let protected = app.send(authed_request("GET", "/auth/protected", &access)).await;
    assert_eq!(protected.status, StatusCode::OK);

    let missing = app
        .send(Request::post("/auth/refresh").body(Body::empty()).unwrap())
        .await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

    let forged = app
        .send(
            Request::post("/auth/refresh")
                .header(header::COOKIE, "refresh_token=forged.token.value")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);
    assert_eq!(forged.json()["error"], "Could not refresh token");
}

#[tokio::test]
async fn access_token_cannot_be_used_as_refresh_token() {
    let app = spawn_app().await;
    let access = app.signed_in("alice").await;

    let response = app
        .send(
            Request::post("/auth/refresh")
                .header(header::COOKIE, format!("refresh_token={}", access))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_outstanding_tokens() {
    let app = spawn_app().await;
    app.register("alice", "password123").await;
    let login = app.login("alice", "password123").await;
    let access = login.json()["access_token"].as_str().unwrap().to_string();
    let cookie = refresh_cookie_pair(&login.headers).unwrap();

    let response = app.send(authed_request("POST", "/auth/logout", &access)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["message"], "Successfully logged out");
    let expired = response
        .headers
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap();
    assert!(expired.contains("Max-Age=0"));

    let after = app.send(authed_request("GET", "/auth/protected", &access)).await;
    assert_eq!(after.status, StatusCode::UNAUTHORIZED);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let later = app.send(authed_request("GET", "/auth/protected", &access)).await;
    assert_eq!(later.status, StatusCode::UNAUTHORIZED);

    let refresh = app
        .send(
            Request::post("/auth/refresh")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn change_password_invalidates_old_credentials() {
    let app = spawn_app().await;
    let access = app.signed_in("alice").await;

    let wrong = app
        .send(json_request(
            "POST",
            "/auth/change-password",
            Some(&access),
            json!({ "old_password": "not-it-at-all", "new_password": "new-password-1" }),
        ))
        .await;
    assert_eq!(wrong.status, StatusCode::BAD_REQUEST);
    assert_eq!(wrong.json()["error"], "Invalid current password");

    let changed = app
        .send(json_request(
            "POST",
            "/auth/change-password",
            Some(&access),
            json!({ "old_password": "password123", "new_password": "new-password-1" }),
        ))
        .await;
    assert_eq!(changed.status, StatusCode::OK);
    assert_eq!(changed.json()["message"], "Password changed successfully");

    let stale = app.send(authed_request("GET", "/auth/protected", &access)).await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);

    assert_eq!(app.login("alice", "password123").await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.login("alice", "new-password-1").await.status, StatusCode::OK);
}
