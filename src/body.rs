//! Ingests request body chunks into a single contiguous buffer (§4.2).

use crate::error_kind::ErrorKind;
use tokio::sync::Notify;
use tracing::{trace, warn};

const UNKNOWN_INITIAL_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Nothing to ingest: either the body is empty or was rejected before
    /// the first chunk (e.g. declared length over the limit).
    Idle,
    Known { expected: usize },
    Unknown,
}

/// Ingests raw chunks from the transport into a single contiguous buffer,
/// validating length as it goes.
///
/// The owning context is responsible for calling [`Self::ingest`] once per
/// transport `onData` callback and [`Self::abort`] on `onAborted`; this
/// type itself never touches a transport handle (§1, §6).
pub struct BodyParser {
    mode: Mode,
    buffer: Vec<u8>,
    limit: usize,
    outcome: Option<Result<Vec<u8>, ErrorKind>>,
    notify: Notify,
}

impl BodyParser {
    pub fn new() -> Self {
        Self { mode: Mode::Idle, buffer: Vec::new(), limit: 0, outcome: None, notify: Notify::new() }
    }

    /// Prepares to ingest a new body. `content_length` is the cached,
    /// already-parsed `content-length` header, or `None` if absent/chunked.
    ///
    /// Settles immediately (no chunks needed) for a zero or over-limit
    /// declared length, matching the boundary behaviors in §8.
    pub fn reset(&mut self, content_length: Option<usize>, limit: usize) {
        self.buffer.clear();
        self.outcome = None;
        self.limit = limit;

        self.mode = match content_length {
            Some(0) => {
                self.outcome = Some(Ok(Vec::new()));
                Mode::Idle
            }
            Some(n) if n > limit => {
                self.outcome = Some(Err(ErrorKind::BodyTooLarge));
                Mode::Idle
            }
            Some(n) => {
                self.buffer.reserve_exact(n);
                Mode::Known { expected: n }
            }
            None => {
                self.buffer.reserve(UNKNOWN_INITIAL_CAPACITY.min(limit.max(1)));
                Mode::Unknown
            }
        };
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// Feeds one transport chunk. A no-op once terminal (memoization, §4.2).
    pub fn ingest(&mut self, chunk: &[u8], is_last: bool) {
        if self.is_terminal() {
            return;
        }

        match self.mode {
            Mode::Idle => {}
            Mode::Known { expected } => self.ingest_known(chunk, is_last, expected),
            Mode::Unknown => self.ingest_unknown(chunk, is_last),
        }
    }

    fn ingest_known(&mut self, chunk: &[u8], is_last: bool, expected: usize) {
        if self.buffer.len() + chunk.len() > expected {
            self.complete(Err(ErrorKind::SizeMismatch));
            return;
        }

        self.buffer.extend_from_slice(chunk);

        if is_last {
            if self.buffer.len() == expected {
                let body = std::mem::take(&mut self.buffer);
                self.complete(Ok(body));
            } else {
                self.complete(Err(ErrorKind::SizeMismatch));
            }
        }
    }

    fn ingest_unknown(&mut self, chunk: &[u8], is_last: bool) {
        let needed = self.buffer.len() + chunk.len();
        if needed > self.limit {
            self.complete(Err(ErrorKind::BodyTooLarge));
            return;
        }

        if needed > self.buffer.capacity() {
            let mut target = self.buffer.capacity().max(UNKNOWN_INITIAL_CAPACITY);
            while target < needed && target < self.limit {
                target = target.saturating_mul(2).min(self.limit);
            }
            self.buffer.reserve(target.max(needed) - self.buffer.len());
        }

        self.buffer.extend_from_slice(chunk);

        if is_last {
            let mut body = std::mem::take(&mut self.buffer);
            // Tail-compact: a short body shouldn't keep a backing buffer
            // more than double its length (§4.2 "Rationale").
            if body.capacity() > body.len() * 2 {
                body.shrink_to_fit();
            }
            self.complete(Ok(body));
        }
    }

    /// Transitions to `Aborted` if not already terminal; a no-op otherwise
    /// (the terminal state is sticky, §4.2/§5).
    pub fn abort(&mut self) {
        if !self.is_terminal() {
            self.complete(Err(ErrorKind::Aborted));
        }
    }

    fn complete(&mut self, outcome: Result<Vec<u8>, ErrorKind>) {
        match &outcome {
            Ok(body) => trace!(len = body.len(), "body ingest complete"),
            Err(kind) => warn!(?kind, "body ingest failed"),
        }
        self.outcome = Some(outcome);
        self.notify.notify_waiters();
    }

    /// Resolves once terminal, memoized: every call after the first returns
    /// a clone of the same outcome.
    pub async fn body(&mut self) -> Result<Vec<u8>, ErrorKind> {
        loop {
            if let Some(outcome) = &self.outcome {
                return outcome.clone();
            }
            self.notify.notified().await;
        }
    }

    /// Body decoded as UTF-8; an empty body yields an empty string.
    ///
    /// The spec defines no distinct error kind for invalid UTF-8 (only
    /// `json()` has a failure mode, §4.2); bytes that aren't valid UTF-8 are
    /// replaced per [`String::from_utf8_lossy`] rather than rejecting the
    /// whole body.
    pub async fn text(&mut self) -> Result<String, ErrorKind> {
        let bytes = self.body().await?;
        match simdutf8::basic::from_utf8(&bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(_) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    /// Body parsed as JSON; an empty body yields [`serde_json::Value::Null`].
    pub async fn json(&mut self) -> Result<serde_json::Value, ErrorKind> {
        let bytes = self.body().await?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|_| ErrorKind::InvalidJSON)
    }

    /// Releases all ingested state; the parser becomes unusable until the
    /// next [`Self::reset`].
    pub fn clear(&mut self) {
        self.mode = Mode::Idle;
        self.buffer = Vec::new();
        self.outcome = None;
    }
}

impl Default for BodyParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_mode_round_trips_exact_chunks() {
        let mut parser = BodyParser::new();
        parser.reset(Some(11), 1024);
        parser.ingest(b"hello ", false);
        parser.ingest(b"world", true);
        assert_eq!(parser.body().await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn known_mode_overshoot_is_size_mismatch() {
        let mut parser = BodyParser::new();
        parser.reset(Some(3), 1024);
        parser.ingest(b"abcd", true);
        assert_eq!(parser.body().await, Err(ErrorKind::SizeMismatch));
    }

    #[tokio::test]
    async fn known_mode_short_terminal_is_size_mismatch() {
        let mut parser = BodyParser::new();
        parser.reset(Some(10), 1024);
        parser.ingest(b"short", true);
        assert_eq!(parser.body().await, Err(ErrorKind::SizeMismatch));
    }

    #[tokio::test]
    async fn zero_length_settles_immediately_with_no_ingest() {
        let mut parser = BodyParser::new();
        parser.reset(Some(0), 1024);
        assert!(parser.is_terminal());
        assert_eq!(parser.body().await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn declared_length_over_limit_rejects_pre_ingest() {
        let mut parser = BodyParser::new();
        parser.reset(Some(2000), 1024);
        assert_eq!(parser.body().await, Err(ErrorKind::BodyTooLarge));
    }

    #[tokio::test]
    async fn unknown_mode_accumulates_across_chunks() {
        let mut parser = BodyParser::new();
        parser.reset(None, 1024);
        parser.ingest(b"ab", false);
        parser.ingest(b"cd", false);
        parser.ingest(b"ef", true);
        assert_eq!(parser.body().await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn unknown_mode_exactly_at_limit_is_accepted() {
        let mut parser = BodyParser::new();
        parser.reset(None, 4);
        parser.ingest(b"abcd", true);
        assert_eq!(parser.body().await.unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn unknown_mode_one_byte_over_limit_is_too_large() {
        let mut parser = BodyParser::new();
        parser.reset(None, 4);
        parser.ingest(b"abcde", true);
        assert_eq!(parser.body().await, Err(ErrorKind::BodyTooLarge));
    }

    #[tokio::test]
    async fn abort_before_terminal_completes_with_aborted() {
        let mut parser = BodyParser::new();
        parser.reset(None, 1024);
        parser.ingest(b"partial", false);
        parser.abort();
        assert_eq!(parser.body().await, Err(ErrorKind::Aborted));
    }

    #[tokio::test]
    async fn terminal_state_is_sticky_after_abort() {
        let mut parser = BodyParser::new();
        parser.reset(Some(5), 1024);
        parser.ingest(b"hello", true);
        parser.abort(); // no-op, already terminal
        assert_eq!(parser.body().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn empty_body_text_and_json() {
        let mut parser = BodyParser::new();
        parser.reset(Some(0), 1024);
        assert_eq!(parser.text().await.unwrap(), "");

        let mut parser = BodyParser::new();
        parser.reset(Some(0), 1024);
        assert_eq!(parser.json().await.unwrap(), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn invalid_json_body_yields_invalid_json_kind() {
        let mut parser = BodyParser::new();
        parser.reset(Some(14), 1024);
        parser.ingest(b"{invalid json}", true);
        assert_eq!(parser.json().await, Err(ErrorKind::InvalidJSON));
    }

    #[tokio::test]
    async fn valid_json_body_parses() {
        let mut parser = BodyParser::new();
        let body = br#"{"name":"Ada"}"#;
        parser.reset(Some(body.len()), 1024);
        parser.ingest(body, true);
        assert_eq!(parser.json().await.unwrap(), serde_json::json!({"name": "Ada"}));
    }

    #[tokio::test]
    async fn clear_resets_to_unusable_until_next_reset() {
        let mut parser = BodyParser::new();
        parser.reset(Some(5), 1024);
        parser.ingest(b"hello", true);
        parser.clear();
        assert!(!parser.is_terminal());
    }
}
