use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use exo_pool::{AuthTokens, Error, ExoClient, Tuning};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_tuning() -> Tuning {
    Tuning {
        refresh_default: 1,
        refresh_min: 1,
        refresh_max: 4,
        min_request_interval: Duration::from_millis(5),
        write_gap: Duration::from_millis(100),
        post_write_cooldown: Duration::from_millis(200),
        no_read_window: Duration::from_millis(150),
        min_refresh_guard: Duration::from_millis(50),
        schedule_refresh_delay: Duration::from_millis(200),
        read_deferral_jitter: (Duration::from_millis(10), Duration::from_millis(10)),
        debounce_jitter: (Duration::from_millis(10), Duration::from_millis(10)),
        ..Tuning::default()
    }
}

fn login_response() -> serde_json::Value {
    json!({
        "userPoolOAuth": {
            "IdToken": "id-token-1",
            "RefreshToken": "refresh-1",
            "ExpiresIn": 3600
        },
        "authentication_token": "auth-1",
        "id": "user-1"
    })
}

fn shadow_response(orp_sp: i64) -> serde_json::Value {
    json!({
        "state": {
            "reported": {
                "equipment": {"swc_0": {"sn": "EXO123", "orp_sp": orp_sp}},
                "schedules": {"sch1": {"timer": {"start": "08:00", "end": "18:00"}}}
            }
        }
    })
}

fn client_for(server: &MockServer) -> ExoClient {
    ExoClient::builder("user@example.com", "hunter2", "EXO123")
        .base_url(server.uri())
        .tuning(fast_tuning())
        .refresh_interval(1)
        .build()
}

#[tokio::test]
async fn login_then_fetch_shadow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/v1/login"))
        .and(body_string_contains("api_key"))
        .and(body_string_contains("user@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_response()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/v1/EXO123/shadow"))
        .and(header("Authorization", "Bearer id-token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(shadow_response(650)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let snapshot = client.refresh().await.expect("refresh should succeed");
    assert_eq!(snapshot.orp_setpoint(), Some(650));
    assert_eq!(snapshot.serial_number(), Some("EXO123"));

    let tokens = client.tokens().expect("tokens should be stored");
    assert_eq!(tokens.id_token, "id-token-1");
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
    client.shutdown().await;
}

#[tokio::test]
async fn expired_tokens_go_through_refresh_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/v1/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_response()))
        .expect(0)
        .mount(&server)
        .await;
    // RefreshToken absent: the prior one must be kept.
    Mock::given(method("POST"))
        .and(path("/users/v1/refresh"))
        .and(body_string_contains("refresh-0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "userPoolOAuth": {"IdToken": "id-token-2", "ExpiresIn": 3600}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/v1/EXO123/shadow"))
        .and(header("Authorization", "Bearer id-token-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(shadow_response(650)))
        .expect(1)
        .mount(&server)
        .await;

    let stale = AuthTokens {
        id_token: "id-token-stale".to_string(),
        refresh_token: Some("refresh-0".to_string()),
        auth_token: None,
        user_id: None,
        expires_at: Utc::now() - ChronoDuration::hours(1),
    };
    let client = ExoClient::builder("user@example.com", "hunter2", "EXO123")
        .base_url(server.uri())
        .tuning(fast_tuning())
        .tokens(stale)
        .build();

    client.refresh().await.expect("refresh should succeed");
    let tokens = client.tokens().unwrap();
    assert_eq!(tokens.id_token, "id-token-2");
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-0"));
    client.shutdown().await;
}

#[tokio::test]
async fn refresh_failure_falls_back_to_full_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/v1/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/users/v1/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_response()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/v1/EXO123/shadow"))
        .respond_with(ResponseTemplate::new(200).set_body_json(shadow_response(650)))
        .mount(&server)
        .await;

    let stale = AuthTokens {
        id_token: "id-token-stale".to_string(),
        refresh_token: Some("refresh-0".to_string()),
        auth_token: None,
        user_id: None,
        expires_at: Utc::now() - ChronoDuration::hours(1),
    };
    let client = ExoClient::builder("user@example.com", "hunter2", "EXO123")
        .base_url(server.uri())
        .tuning(fast_tuning())
        .tokens(stale)
        .build();

    client.refresh().await.expect("refresh should succeed");
    assert_eq!(client.tokens().unwrap().id_token, "id-token-1");
    client.shutdown().await;
}

#[tokio::test]
async fn login_failure_records_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/v1/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.refresh().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "expected Auth, got {err:?}");
    assert!(
        client.last_auth_error().unwrap().contains("bad credentials"),
        "auth error should be recorded for diagnostics"
    );
    client.shutdown().await;
}

#[tokio::test]
async fn login_without_id_token_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/v1/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"userPoolOAuth": {}})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.refresh().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "expected Auth, got {err:?}");
    client.shutdown().await;
}

#[tokio::test]
async fn rate_limited_with_cache_backs_off_then_restores() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/v1/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_response()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/v1/EXO123/shadow"))
        .respond_with(ResponseTemplate::new(200).set_body_json(shadow_response(650)))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/v1/EXO123/shadow"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/v1/EXO123/shadow"))
        .respond_with(ResponseTemplate::new(200).set_body_json(shadow_response(660)))
        .with_priority(3)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let first = client.refresh().await.unwrap();
    assert_eq!(first.orp_setpoint(), Some(650));
    assert_eq!(client.poll_interval(), Duration::from_secs(1));

    // 429 with a cache: masked, served stale, interval doubled.
    let second = client.refresh().await.unwrap();
    assert_eq!(second, first);
    assert_eq!(client.poll_interval(), Duration::from_secs(2));

    // The matching cooldown defers reads until it elapses.
    let deferred = client.refresh().await.unwrap();
    assert_eq!(deferred, first);

    tokio::time::sleep(Duration::from_millis(2200)).await;
    let third = client.refresh().await.unwrap();
    assert_eq!(third.orp_setpoint(), Some(660));
    assert_eq!(client.poll_interval(), Duration::from_secs(1));
    client.shutdown().await;
}

#[tokio::test]
async fn rate_limited_without_cache_is_hard_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/v1/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_response()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/v1/EXO123/shadow"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.refresh().await.unwrap_err();
    assert!(
        matches!(err, Error::RateLimited(_)),
        "expected RateLimited, got {err:?}"
    );
    client.shutdown().await;
}

#[tokio::test]
async fn expired_token_body_triggers_reauth_next_cycle() {
    let server = MockServer::start().await;
    // No RefreshToken in the login response, so re-auth is a second login.
    Mock::given(method("POST"))
        .and(path("/users/v1/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "userPoolOAuth": {"IdToken": "id-token-1", "ExpiresIn": 3600},
            "authentication_token": "auth-1",
            "id": "user-1"
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/v1/EXO123/shadow"))
        .respond_with(ResponseTemplate::new(200).set_body_json(shadow_response(650)))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/v1/EXO123/shadow"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_string(r#"{"message":"The incoming token has expired"}"#),
        )
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/v1/EXO123/shadow"))
        .respond_with(ResponseTemplate::new(200).set_body_json(shadow_response(660)))
        .with_priority(3)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.refresh().await.expect("first fetch should succeed");

    let err = client.refresh().await.unwrap_err();
    assert!(
        matches!(err, Error::Api { status: 401, .. }),
        "expected Api 401, got {err:?}"
    );
    assert!(client
        .last_auth_error()
        .unwrap()
        .contains("token has expired"));

    // Next cycle re-authenticates and recovers.
    let snapshot = client.refresh().await.unwrap();
    assert_eq!(snapshot.orp_setpoint(), Some(660));
    assert!(client.last_auth_error().is_none());
    client.shutdown().await;
}

#[tokio::test]
async fn schedule_discovery_events_fire_on_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/v1/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_response()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/v1/EXO123/shadow"))
        .respond_with(ResponseTemplate::new(200).set_body_json(shadow_response(650)))
        .mount(&server)
        .await;

    let events: std::sync::Arc<std::sync::Mutex<Vec<String>>> = Default::default();
    let events_clone = events.clone();
    let client = ExoClient::builder("user@example.com", "hunter2", "EXO123")
        .base_url(server.uri())
        .tuning(fast_tuning())
        .on_event(move |event| {
            events_clone.lock().unwrap().push(format!("{event:?}"));
        })
        .build();

    client.refresh().await.unwrap();
    let captured = events.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert!(captured[0].contains("ScheduleAdded"));
    assert!(captured[0].contains("sch1"));
    client.shutdown().await;
}
