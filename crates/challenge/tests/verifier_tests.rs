use axum::routing::post;
use axum::{Json, Router};
use botgate_challenge::{ChallengeVerifier, TurnstileVerifier, VerifyError};
use botgate_common::TurnstileConfig;
use serde_json::{json, Value};

async fn siteverify(Json(body): Json<Value>) -> Json<Value> {
    let ok = body["secret"] == "secret-key"
        && body["response"] == "good-token"
        && body["remoteip"] == "1.2.3.4";
    if ok {
        Json(json!({
            "success": true,
            "challenge_ts": "2025-01-01T00:00:00Z",
            "hostname": "example.com",
            "error-codes": [],
            "action": "",
            "cdata": ""
        }))
    } else {
        Json(json!({ "success": false, "error-codes": ["invalid-input-response"] }))
    }
}

async fn spawn_server() -> String {
    let app = Router::new()
        .route("/siteverify", post(siteverify))
        .route("/garbage", post(|| async { "not json" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn verifier(url: String) -> TurnstileVerifier {
    let config = TurnstileConfig {
        site_key: "site-key".into(),
        secret_key: "secret-key".into(),
        verify_url: url,
        timeout_secs: 5,
    };
    TurnstileVerifier::new(&config).unwrap()
}

#[tokio::test]
async fn test_valid_token_verifies() {
    let base = spawn_server().await;
    let verifier = verifier(format!("{base}/siteverify"));
    assert!(verifier.verify("good-token", "1.2.3.4").await.unwrap());
}

#[tokio::test]
async fn test_rejected_token_is_not_an_error() {
    let base = spawn_server().await;
    let verifier = verifier(format!("{base}/siteverify"));
    assert!(!verifier.verify("bad-token", "1.2.3.4").await.unwrap());
}

#[tokio::test]
async fn test_unparseable_response() {
    let base = spawn_server().await;
    let verifier = verifier(format!("{base}/garbage"));
    let err = verifier.verify("good-token", "1.2.3.4").await.unwrap_err();
    assert!(matches!(err, VerifyError::Parse(_)));
    assert!(!err.is_unavailable());
}

#[tokio::test]
async fn test_unreachable_service() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let verifier = verifier(format!("http://{addr}/siteverify"));
    let err = verifier.verify("good-token", "1.2.3.4").await.unwrap_err();
    assert!(err.is_unavailable(), "expected transport failure, got {err}");
}
