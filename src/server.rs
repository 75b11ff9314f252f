use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{RelayError, Result};
use crate::message::Message;
use crate::relay::ConversationRelay;
use crate::telemetry::TelemetryCollector;
use crate::transcribe::TranscriptionRelay;

/// HTTP front for the chat page and both relays.
pub struct RelayServer {
    conversation: Arc<ConversationRelay>,
    transcription: Arc<TranscriptionRelay>,
}

impl Clone for RelayServer {
    fn clone(&self) -> Self {
        Self {
            conversation: Arc::clone(&self.conversation),
            transcription: Arc::clone(&self.transcription),
        }
    }
}

impl RelayServer {
    pub fn new(conversation: ConversationRelay, transcription: TranscriptionRelay) -> Self {
        Self {
            conversation: Arc::new(conversation),
            transcription: Arc::new(transcription),
        }
    }

    pub fn from_config(cfg: &AppConfig, telemetry: TelemetryCollector) -> Result<Self> {
        let conversation = ConversationRelay::from_config(&cfg.model)?.with_telemetry(telemetry.clone());
        let transcription = TranscriptionRelay::from_config(&cfg.model, &cfg.transcription)?
            .with_telemetry(telemetry);
        Ok(Self::new(conversation, transcription))
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(chat_page))
            .route("/health", get(|| async { "ok" }))
            .route("/api/chat", post(continue_conversation))
            .route("/api/transcribe", post(transcribe))
            .with_state(self.clone())
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "pizza relay listening");
        axum::serve(listener, self.router().into_make_service())
            .await
            .map_err(|err| RelayError::Protocol(format!("server error: {err}")))?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct ChatRequest {
    messages: Vec<Message>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn sse_event(name: &str, payload: serde_json::Value) -> Event {
    Event::default().event(name).data(payload.to_string())
}

async fn continue_conversation(
    State(state): State<RelayServer>,
    Json(req): Json<ChatRequest>,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("chat", %request_id);
    let opened = state
        .conversation
        .continue_conversation(&req.messages)
        .instrument(span.clone())
        .await;

    let fragments = match opened {
        Ok(fragments) => fragments,
        Err(err @ RelayError::InvalidConversation(_)) => {
            return error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        Err(err) => {
            span.in_scope(|| warn!(error = %err, "chat relay failed before streaming"));
            return error_response(StatusCode::BAD_GATEWAY, err.to_string());
        }
    };

    let events = fragments
        .map(move |item| {
            let event = match item {
                Ok(text) => sse_event("delta", json!({ "text": text })),
                Err(err) => {
                    span.in_scope(|| warn!(error = %err, "chat stream interrupted"));
                    sse_event("error", json!({ "error": err.to_string() }))
                }
            };
            Ok::<Event, Infallible>(event)
        })
        .chain(stream::once(async {
            Ok::<Event, Infallible>(sse_event("done", json!({})))
        }));
    Sse::new(events).into_response()
}

#[derive(Deserialize)]
struct TranscribeRequest {
    audio: String,
}

async fn transcribe(
    State(state): State<RelayServer>,
    Json(req): Json<TranscribeRequest>,
) -> Response {
    if req.audio.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "no audio data provided");
    }
    let request_id = Uuid::new_v4();
    let reply = state
        .transcription
        .transcribe(&req.audio)
        .instrument(info_span!("transcribe", %request_id))
        .await;
    Json(reply).into_response()
}

async fn chat_page() -> Html<&'static str> {
    Html(
        r#"
<!doctype html>
<html>
<head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Pizza AI</title>
    <style>
        body { font-family: sans-serif; margin: 0; }
        main { max-width: 28rem; margin: 0 auto; padding: 6rem 0 8rem; }
        h4 { font-size: 1.25rem; margin: 0 0 1rem; }
        .muted { color: #666; font-size: .875rem; }
        hr { border: 0; border-top: 1px solid #ddd; margin: 1rem 0; }
        .msg { white-space: pre-wrap; word-break: break-word; }
        .msg.assistant { margin-bottom: 1rem; }
        .msg.error { color: #b00; }
        #loading { display: none; color: #666; }
        form { position: fixed; bottom: 2rem; width: 28rem; display: flex; gap: .5rem; }
        #input { flex: 1; padding: .5rem; border: 1px solid #888; border-radius: 4px; box-shadow: 0 4px 12px rgba(0,0,0,.15); }
        #mic { padding: .5rem .75rem; border-radius: 4px; border: 1px solid #888; background: #fff; }
        #mic.recording { background: #e33; color: #fff; }
    </style>
</head>
<body>
<main>
    <h4>Pizza Order Taker AI Chatbot</h4>
    <p class="muted">Pizza AI is an AI chatbot that helps you order just like talking to a real person in a store.</p>
    <hr />
    <div id="messages"></div>
    <div id="loading">Pizza AI is typing...</div>
    <div id="end"></div>
    <form id="form">
        <input id="input" autocomplete="off" placeholder="Talk to Pizza AI ..." />
        <button id="mic" type="button" title="Hold to talk">Mic</button>
    </form>
</main>
<script>
    // Everything shown on the page; notices have role 'error' and are never sent.
    const transcript = [];
    const list = document.getElementById('messages');
    const input = document.getElementById('input');
    const loading = document.getElementById('loading');
    const end = document.getElementById('end');

    function render() {
        list.innerHTML = '';
        for (const m of transcript) {
            const div = document.createElement('div');
            div.className = 'msg ' + m.role;
            const label = { user: 'User: ', assistant: 'Pizza AI: ' }[m.role] || '';
            div.textContent = label + m.content;
            list.appendChild(div);
        }
        end.scrollIntoView({ behavior: 'smooth' });
    }

    function showError(text) {
        transcript.push({ role: 'error', content: text });
        render();
    }

    async function submit(text) {
        if (!text.trim()) return;
        transcript.push({ role: 'user', content: text });
        const history = transcript.filter((m) => m.role !== 'error' && m.content);
        render();
        loading.style.display = 'block';
        try {
            const resp = await fetch('/api/chat', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ messages: history }),
            });
            if (!resp.ok) {
                const body = await resp.json().catch(() => ({ error: resp.statusText }));
                showError(body.error);
                return;
            }
            const reply = { role: 'assistant', content: '' };
            transcript.push(reply);
            const reader = resp.body.getReader();
            const decoder = new TextDecoder();
            let buffer = '';
            for (;;) {
                const { value, done } = await reader.read();
                if (done) break;
                buffer += decoder.decode(value, { stream: true });
                let cut;
                while ((cut = buffer.indexOf('\n\n')) >= 0) {
                    const block = buffer.slice(0, cut);
                    buffer = buffer.slice(cut + 2);
                    let name = 'message', data = '';
                    for (const line of block.split('\n')) {
                        if (line.startsWith('event:')) name = line.slice(6).trim();
                        else if (line.startsWith('data:')) data += line.slice(5).trim();
                    }
                    if (name === 'delta') reply.content += JSON.parse(data).text;
                    else if (name === 'error') showError(JSON.parse(data).error);
                }
                render();
            }
        } finally {
            loading.style.display = 'none';
        }
    }

    document.getElementById('form').addEventListener('submit', (e) => {
        e.preventDefault();
        const text = input.value;
        input.value = '';
        submit(text);
    });

    const FALLBACKS = [
        'The audio provided was empty. Please try again',
        'The audio is too short. minimum audio length should be at least 0.1 seconds',
        'Unknown error',
    ];
    const mic = document.getElementById('mic');
    let recorder = null;
    let chunks = [];

    function blobToBase64(blob, callback) {
        const reader = new FileReader();
        reader.onload = () => callback(reader.result.toString().split(',')[1]);
        reader.readAsDataURL(blob);
    }

    async function transcribe(base64) {
        if (!base64) return;
        const resp = await fetch('/api/transcribe', {
            method: 'POST',
            headers: { 'Content-Type': 'application/json' },
            body: JSON.stringify({ audio: base64 }),
        });
        const body = await resp.json();
        if (!body.text) return;
        if (FALLBACKS.includes(body.text)) showError(body.text);
        else submit(body.text);
    }

    if (navigator.mediaDevices) {
        navigator.mediaDevices.getUserMedia({ audio: true }).then((stream) => {
            recorder = new MediaRecorder(stream);
            recorder.onstart = () => { chunks = []; };
            recorder.ondataavailable = (ev) => chunks.push(ev.data);
            recorder.onstop = () => blobToBase64(new Blob(chunks, { type: 'audio/wav' }), transcribe);
        }).catch(() => { mic.disabled = true; });
    }

    function startRecording() {
        if (recorder && recorder.state === 'inactive') {
            recorder.start();
            mic.classList.add('recording');
        }
    }

    function stopRecording() {
        if (recorder && recorder.state === 'recording') {
            recorder.stop();
            mic.classList.remove('recording');
        }
    }

    mic.addEventListener('mousedown', startRecording);
    mic.addEventListener('mouseup', stopRecording);
    mic.addEventListener('mouseleave', stopRecording);
    mic.addEventListener('touchstart', (e) => { e.preventDefault(); startRecording(); });
    mic.addEventListener('touchend', stopRecording);
</script>
</body>
</html>
"#,
    )
}
