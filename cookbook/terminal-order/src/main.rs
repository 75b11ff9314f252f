use std::io::Write;
use std::path::Path;

use pizza_relay::{
    init_tracing, AppConfig, AudioBlob, ChatSession, ConversationRelay, RecordingSession,
    TranscriptionRelay,
};
use tokio::io::{AsyncBufReadExt, BufReader};

// Roughly what a browser MediaRecorder hands over per dataavailable event.
const CHUNK_SIZE: usize = 4096;

#[tokio::main]
async fn main() -> pizza_relay::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "pizza-relay.toml".to_string());
    let mut cfg = AppConfig::from_env_or_file(&path)?;
    if cfg.model.api_key.is_none() {
        cfg.model.provider = "stub".into();
    }
    cfg.telemetry.log_filter = "warn".into();
    init_tracing(&cfg.telemetry)?;

    let conversation = ConversationRelay::from_config(&cfg.model)?;
    let transcription = TranscriptionRelay::from_config(&cfg.model, &cfg.transcription)?;
    let mut session = ChatSession::default();

    println!("Pizza AI ({}), /voice <file.wav> to speak, /quit to leave", cfg.model.provider);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let input = match line.strip_prefix("/voice ") {
            Some(file) => {
                let blob = match record_file(Path::new(file.trim())).await {
                    Ok(blob) => blob,
                    Err(err) => {
                        eprintln!("[voice] {err}");
                        continue;
                    }
                };
                let reply = transcription.transcribe(&blob.to_base64()).await;
                if reply.is_fallback() {
                    eprintln!("[voice] {}", reply.text);
                    continue;
                }
                println!("You (voice): {}", reply.text);
                reply.text
            }
            None => line.to_string(),
        };

        print!("Pizza AI: ");
        let sent = session
            .send(&conversation, input, |fragment| {
                print!("{fragment}");
                let _ = std::io::stdout().flush();
            })
            .await;
        match sent {
            Ok(_) => println!(),
            Err(err) => eprintln!("\n[error] {err}"),
        }
    }
    Ok(())
}

/// Feeds a recorded file through a capture session as if it came from a
/// microphone.
async fn record_file(path: &Path) -> pizza_relay::Result<AudioBlob> {
    let bytes = tokio::fs::read(path).await?;
    let mut recording = RecordingSession::default();
    recording.start();
    for chunk in bytes.chunks(CHUNK_SIZE) {
        recording.push_chunk(chunk);
    }
    Ok(recording.stop().unwrap_or_else(|| AudioBlob::new("audio/wav", Vec::new())))
}
