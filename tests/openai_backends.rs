//! OpenAI-compatible backends exercised against an in-process mock upstream.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use pizza_relay::{
    ChatModel, ConversationRelay, Message, ModelConfig, OpenAIClient, RelayError, SpeechToText,
    TranscriptionConfig, TranscriptionRelay, WhisperClient, AUDIO_TOO_SHORT_MESSAGE,
    UNKNOWN_ERROR_MESSAGE,
};

#[derive(Clone, Default)]
struct Upstream {
    chat_requests: Arc<Mutex<Vec<serde_json::Value>>>,
    chat_replies: Arc<Mutex<VecDeque<(StatusCode, Vec<&'static str>)>>>,
    uploads: Arc<Mutex<Vec<(Option<String>, Bytes)>>>,
    transcriptions: Arc<Mutex<VecDeque<(StatusCode, String)>>>,
}

async fn chat_completions(
    State(upstream): State<Upstream>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    upstream.chat_requests.lock().unwrap().push(body);
    let (status, chunks) = upstream
        .chat_replies
        .lock()
        .unwrap()
        .pop_front()
        .expect("unexpected chat request");
    let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
    (
        status,
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn audio_transcriptions(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    upstream.uploads.lock().unwrap().push((auth, body));
    let (status, reply) = upstream
        .transcriptions
        .lock()
        .unwrap()
        .pop_front()
        .expect("unexpected transcription request");
    (status, [(header::CONTENT_TYPE, "application/json")], reply).into_response()
}

async fn spawn_upstream(upstream: Upstream) -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/audio/transcriptions", post(audio_transcriptions))
        .with_state(upstream);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1")
}

fn model_config(base_url: String) -> ModelConfig {
    ModelConfig {
        api_key: Some("sk-test".into()),
        base_url: Some(base_url),
        ..ModelConfig::default()
    }
}

async fn collect(stream: pizza_relay::TextStream) -> Vec<pizza_relay::Result<String>> {
    stream.collect().await
}

#[tokio::test]
async fn streams_chat_fragments_split_across_chunks() {
    let upstream = Upstream::default();
    upstream.chat_replies.lock().unwrap().push_back((
        StatusCode::OK,
        vec![
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi! \"},\"finish",
            "_reason\":null}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"Pickup or delivery?\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n",
        ],
    ));
    let base_url = spawn_upstream(upstream.clone()).await;
    let client = OpenAIClient::from_config(&model_config(base_url)).unwrap();
    let relay = ConversationRelay::new(Arc::new(client));

    let history = vec![
        Message::user("hello"),
        Message::assistant("Welcome to Pizza AI!"),
        Message::user("a medium cheese pizza"),
    ];
    let fragments: Vec<String> = collect(relay.continue_conversation(&history).await.unwrap())
        .await
        .into_iter()
        .map(|item| item.unwrap())
        .collect();
    assert_eq!(fragments, vec!["Hi! ", "Pickup or delivery?"]);

    let requests = upstream.chat_requests.lock().unwrap();
    let sent = &requests[0];
    assert_eq!(sent["model"], "gpt-4o-mini");
    assert_eq!(sent["stream"], true);
    let messages = sent["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["role"], "system");
    assert!(messages[0]["content"]
        .as_str()
        .unwrap()
        .starts_with("You are Pizza AI"));
    assert_eq!(messages[3]["role"], "user");
    assert_eq!(messages[3]["content"], "a medium cheese pizza");
}

#[tokio::test]
async fn chat_upstream_rejection_fails_before_streaming() {
    let upstream = Upstream::default();
    upstream.chat_replies.lock().unwrap().push_back((
        StatusCode::UNAUTHORIZED,
        vec![r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#],
    ));
    let base_url = spawn_upstream(upstream).await;
    let client = OpenAIClient::from_config(&model_config(base_url)).unwrap();

    let err = client
        .stream_chat("prompt", &[Message::user("hi")])
        .await
        .err()
        .unwrap();
    match err {
        RelayError::Upstream { status, code, .. } => {
            assert_eq!(status, 401);
            assert_eq!(code.as_deref(), Some("invalid_api_key"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn malformed_chunk_ends_stream_with_error() {
    let upstream = Upstream::default();
    upstream.chat_replies.lock().unwrap().push_back((
        StatusCode::OK,
        vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Sure\"}}]}\n\n",
            "data: {not json}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"never seen\"}}]}\n\n",
        ],
    ));
    let base_url = spawn_upstream(upstream).await;
    let client = OpenAIClient::from_config(&model_config(base_url)).unwrap();

    let items = collect(client.stream_chat("prompt", &[Message::user("hi")]).await.unwrap()).await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "Sure");
    assert!(matches!(items[1], Err(RelayError::LanguageModel(_))));
}

#[tokio::test]
async fn whisper_sends_form_fields_and_returns_text() {
    let upstream = Upstream::default();
    upstream
        .transcriptions
        .lock()
        .unwrap()
        .push_back((StatusCode::OK, r#"{"text":"One large pepperoni."}"#.into()));
    let base_url = spawn_upstream(upstream.clone()).await;
    let client = WhisperClient::from_config(&model_config(base_url), &TranscriptionConfig::default())
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.wav");
    std::fs::write(&path, b"RIFF-fake-wave").unwrap();
    let text = client.transcribe_file(&path).await.unwrap();
    assert_eq!(text, "One large pepperoni.");

    let uploads = upstream.uploads.lock().unwrap();
    let (auth, body) = &uploads[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    let body = String::from_utf8_lossy(body);
    assert!(body.contains("name=\"file\"; filename=\"input.wav\""));
    assert!(body.contains("RIFF-fake-wave"));
    assert!(body.contains("name=\"model\"\r\n\r\nwhisper-1"));
    assert!(body.contains("name=\"language\"\r\n\r\nen"));
    assert!(body.contains("name=\"temperature\"\r\n\r\n0"));
}

#[tokio::test]
async fn whisper_error_codes_drive_user_messages() {
    let upstream = Upstream::default();
    {
        let mut replies = upstream.transcriptions.lock().unwrap();
        replies.push_back((
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Audio file is too short. Minimum audio length is 0.1 seconds.","type":"invalid_request_error","param":"file","code":"audio_too_short"}}"#.into(),
        ));
        replies.push_back((
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":{"message":"The server had an error","type":"server_error","code":null}}"#.into(),
        ));
    }
    let base_url = spawn_upstream(upstream).await;
    let model = model_config(base_url);
    let dir = tempfile::tempdir().unwrap();
    let relay = TranscriptionRelay::new(
        Arc::new(WhisperClient::from_config(&model, &TranscriptionConfig::default()).unwrap()),
        dir.path(),
    );

    let payload = pizza_relay::AudioBlob::new("audio/wav", b"RIFF".to_vec()).to_base64();
    assert_eq!(relay.transcribe(&payload).await.text, AUDIO_TOO_SHORT_MESSAGE);
    assert_eq!(relay.transcribe(&payload).await.text, UNKNOWN_ERROR_MESSAGE);
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}
