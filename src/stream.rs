use crate::logging::log_stream;
use crate::orchestrator::{EmotionSummary, ReplyMetadata};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 16;

/// One push event. Serialized as `{chunk, done, emotion?, metadata?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamChunk {
    #[serde(rename = "chunk")]
    pub text: String,
    #[serde(rename = "done")]
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<EmotionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ReplyMetadata>,
}

#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub chunk_words: usize,
    pub delay: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_words: 5,
            delay: Duration::from_millis(50),
        }
    }
}

/// How an emission task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Completed { chunks: usize },
    Cancelled { sent: usize },
}

/// Split into groups of `per_chunk` words. Whitespace after a word stays with
/// that word, so joining the pieces gives back `text` byte for byte.
pub fn chunk_words(text: &str, per_chunk: usize) -> Vec<String> {
    let per_chunk = per_chunk.max(1);
    let mut starts: Vec<usize> = Vec::new();
    let mut previous_was_space = true;
    for (idx, c) in text.char_indices() {
        let is_space = c.is_whitespace();
        if !is_space && previous_was_space {
            starts.push(idx);
        }
        previous_was_space = is_space;
    }
    if starts.is_empty() {
        return Vec::new();
    }

    let mut bounds: Vec<usize> = starts.iter().step_by(per_chunk).copied().collect();
    // Leading whitespace belongs to the first chunk.
    bounds[0] = 0;
    bounds.push(text.len());
    bounds.windows(2).map(|w| text[w[0]..w[1]].to_string()).collect()
}

/// Emit `text` as ordered chunks on a bounded channel, then one metadata-only
/// final chunk. Dropping the receiver stops emission at the next step.
pub fn spawn_stream(
    text: String,
    emotion: EmotionSummary,
    metadata: ReplyMetadata,
    settings: StreamSettings,
) -> (mpsc::Receiver<StreamChunk>, JoinHandle<Delivery>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        let request_id = metadata.request_id.clone();
        let pieces = chunk_words(&text, settings.chunk_words);
        let mut emotion = Some(emotion);
        let mut sent = 0;

        let finale = StreamChunk {
            text: String::new(),
            is_final: true,
            emotion: None,
            metadata: Some(metadata),
        };
        let chunks = pieces
            .into_iter()
            .map(|piece| StreamChunk {
                text: piece,
                is_final: false,
                emotion: None,
                metadata: None,
            })
            .chain(std::iter::once(finale));

        for mut chunk in chunks {
            if sent > 0 && !settings.delay.is_zero() {
                tokio::select! {
                    _ = tx.closed() => {
                        log_stream(Some(&request_id), &format!("Client left after {} chunks", sent));
                        return Delivery::Cancelled { sent };
                    }
                    _ = tokio::time::sleep(settings.delay) => {}
                }
            }
            chunk.emotion = emotion.take();
            if tx.send(chunk).await.is_err() {
                log_stream(Some(&request_id), &format!("Client left after {} chunks", sent));
                return Delivery::Cancelled { sent };
            }
            sent += 1;
        }

        log_stream(Some(&request_id), &format!("Stream complete, {} chunks", sent));
        Delivery::Completed { chunks: sent }
    });
    (rx, handle)
}
