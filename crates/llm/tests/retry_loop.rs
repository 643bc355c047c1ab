//! End-to-end retry behavior against a scripted provider: model fallback on
//! 404 and prompt trimming on context overflow.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::post;
use config::{ApiConfig, Protocol};
use indoc::indoc;
use llm::{Client, LlmError, RetryPolicy, open_with_retries};
use protocol::{Message, Request};
use secrecy::SecretString;
use serde_json::Value;
use tokio::net::TcpListener;

const OK_SSE: &str = indoc! {r#"
    data: {"choices":[{"index":0,"delta":{"content":"ok"},"finish_reason":null}]}

    data: [DONE]

"#};

#[derive(Clone)]
struct Script {
    /// Status and body per attempt; the last entry repeats.
    responses: Arc<Vec<(u16, &'static str)>>,
    hits: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<Value>>>,
}

async fn completions(State(script): State<Script>, body: Bytes) -> impl IntoResponse {
    let body: Value = serde_json::from_slice(&body).unwrap();
    script.captured.lock().unwrap().push(body);

    let index = script.hits.fetch_add(1, Ordering::SeqCst);
    let (status, body) = script.responses[index.min(script.responses.len() - 1)];

    if status == 200 {
        (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/event-stream")],
            body.to_string(),
        )
    } else {
        (
            StatusCode::from_u16(status).unwrap(),
            [(CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
    }
}

async fn serve(script: Script) -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(script);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{address}/v1")
}

fn client(base_url: String) -> Client {
    let config = ApiConfig {
        protocol: Protocol::Openai,
        base_url: Some(base_url),
        api_key: None,
        api_key_env: None,
        api_key_cmd: None,
        api_version: None,
        azure_ad: false,
        user: None,
        models: BTreeMap::new(),
    };

    Client::new("openai", config, SecretString::from("sk-test"), None).unwrap()
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        no_limit: false,
        avg_chars_per_token: 1,
        fallback_model: None,
    }
}

#[tokio::test]
async fn missing_model_swaps_in_the_fallback() {
    let script = Script {
        responses: Arc::new(vec![
            (404, r#"{"error":{"message":"model not found"}}"#),
            (200, OK_SSE),
        ]),
        hits: Arc::new(AtomicUsize::new(0)),
        captured: Arc::new(Mutex::new(Vec::new())),
    };
    let base = serve(script.clone()).await;

    let request = Request::new("gpt-5-turbo", vec![Message::user("hi")]);
    let mut policy = policy();
    policy.fallback_model = Some("gpt-4o".to_string());

    let stream = open_with_retries(&client(base), request, &policy).await;
    assert!(stream.is_ok());

    let captured = script.captured.lock().unwrap();
    assert_eq!(captured[0]["model"], "gpt-5-turbo");
    assert_eq!(captured[1]["model"], "gpt-4o");
}

#[tokio::test]
async fn missing_model_without_fallback_is_fatal() {
    let script = Script {
        responses: Arc::new(vec![(404, "no such model")]),
        hits: Arc::new(AtomicUsize::new(0)),
        captured: Arc::new(Mutex::new(Vec::new())),
    };
    let base = serve(script.clone()).await;

    let request = Request::new("gpt-5-turbo", vec![Message::user("hi")]);
    let err = open_with_retries(&client(base), request, &policy())
        .await
        .map(|_| ())
        .unwrap_err();

    assert!(matches!(err, LlmError::MissingModel { .. }));
    assert_eq!(script.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn context_overflow_trims_the_prompt_by_the_overage() {
    let script = Script {
        responses: Arc::new(vec![
            (
                400,
                r#"{"error":{"message":"maximum context length is 3 tokens. However, your messages resulted in 10 tokens"}}"#,
            ),
            (200, OK_SSE),
        ]),
        hits: Arc::new(AtomicUsize::new(0)),
        captured: Arc::new(Mutex::new(Vec::new())),
    };
    let base = serve(script.clone()).await;

    // Ten characters, one character per token: seven get cut.
    let request = Request::new("gpt-4o", vec![Message::user("0123456789")]);
    let stream = open_with_retries(&client(base), request, &policy()).await;
    assert!(stream.is_ok());

    let captured = script.captured.lock().unwrap();
    assert_eq!(captured[0]["messages"][0]["content"], "0123456789");
    assert_eq!(captured[1]["messages"][0]["content"], "012");
}

#[tokio::test]
async fn context_overflow_with_no_limit_is_fatal() {
    let script = Script {
        responses: Arc::new(vec![(
            400,
            r#"{"error":{"message":"maximum context length is 3 tokens. However, your messages resulted in 10 tokens"}}"#,
        )]),
        hits: Arc::new(AtomicUsize::new(0)),
        captured: Arc::new(Mutex::new(Vec::new())),
    };
    let base = serve(script.clone()).await;

    let request = Request::new("gpt-4o", vec![Message::user("0123456789")]);
    let mut policy = policy();
    policy.no_limit = true;

    let err = open_with_retries(&client(base), request, &policy)
        .await
        .map(|_| ())
        .unwrap_err();

    assert!(matches!(err, LlmError::ContextLengthExceeded(_)));
}

#[tokio::test]
async fn rate_limits_retry_until_the_bound() {
    let script = Script {
        responses: Arc::new(vec![(429, "slow down")]),
        hits: Arc::new(AtomicUsize::new(0)),
        captured: Arc::new(Mutex::new(Vec::new())),
    };
    let base = serve(script.clone()).await;

    let request = Request::new("gpt-4o", vec![Message::user("hi")]);
    let err = open_with_retries(&client(base), request, &policy())
        .await
        .map(|_| ())
        .unwrap_err();

    assert!(matches!(err, LlmError::RateLimited(_)));
    // Initial attempt plus max_retries.
    assert_eq!(script.hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn bad_requests_do_not_retry() {
    let script = Script {
        responses: Arc::new(vec![(400, "malformed request")]),
        hits: Arc::new(AtomicUsize::new(0)),
        captured: Arc::new(Mutex::new(Vec::new())),
    };
    let base = serve(script.clone()).await;

    let request = Request::new("gpt-4o", vec![Message::user("hi")]);
    let err = open_with_retries(&client(base), request, &policy())
        .await
        .map(|_| ())
        .unwrap_err();

    assert!(matches!(err, LlmError::BadRequest(_)));
    assert_eq!(script.hits.load(Ordering::SeqCst), 1);
}
