//! The per-request context: state machine for reply vs. stream, header/body
//! ingress, response egress (§4.4).

use crate::{
    body::BodyParser,
    error_kind::{ErrorKind, HandlerError},
    method::Method,
    pool::Poolable,
    status::{HeaderPreset, StatusCode},
    stream::{ChunkProducer, ResponseStreamer},
    transport::{RequestHandle, ResponseHandle},
};
use tracing::debug;

/// The shape-dispatched value a handler hands to [`HttpContext::send`].
///
/// Mirrors the source's untyped `send(value)` branch-on-shape (§4.4): a
/// closed enum replaces the runtime `typeof`/`instanceof` checks.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Bound,
    Replied,
    Streaming,
    Done,
}

/// A raw back-pointer to a context, used only to rearm the transport's
/// abort callback (see [`HttpContext::arm_abort_hook`]).
struct AbortPtr<R: ResponseHandle, Q: RequestHandle>(*mut HttpContext<R, Q>);

// SAFETY: the transport delivers its abort callback on the same
// single-threaded event loop that owns the context for the rest of its
// lifecycle (§5); the callback never runs concurrently with code holding
// `&mut HttpContext`, so handing the raw pointer across the `Send` bound
// required by `ResponseHandle::on_aborted` is sound.
unsafe impl<R: ResponseHandle, Q: RequestHandle> Send for AbortPtr<R, Q> {}

/// Holds request state, owns a [`BodyParser`] and a [`ResponseStreamer`],
/// and exposes the handler-facing API (§3, §4.4).
///
/// Generic over the transport's response and request handles so this crate
/// never depends on a concrete socket type (§1). Recycled by
/// [`crate::pool::ContextPool`]; `reset`/`clear` rebind and release the
/// transport handles respectively.
pub struct HttpContext<R: ResponseHandle, Q: RequestHandle> {
    response: Option<R>,
    request: Option<Q>,

    ip: Option<String>,
    method: Option<Method>,
    url: Option<String>,
    content_length: Option<Option<usize>>,

    status_override: Option<StatusCode>,
    state: State,
    aborted: bool,

    body: BodyParser,
    body_armed: bool,
    stream: ResponseStreamer<R>,
    max_body_bytes: usize,
    json_errors: bool,
}

impl<R: ResponseHandle, Q: RequestHandle> HttpContext<R, Q> {
    pub fn new() -> Self {
        Self {
            response: None,
            request: None,
            ip: None,
            method: None,
            url: None,
            content_length: None,
            status_override: None,
            state: State::Fresh,
            aborted: false,
            body: BodyParser::new(),
            body_armed: false,
            stream: ResponseStreamer::new(),
            max_body_bytes: 0,
            json_errors: true,
        }
    }

    /// Rebinds this (possibly recycled) context to a fresh request/response
    /// pair and clears all state (§3 Lifecycle).
    pub fn bind(&mut self, response: R, request: Q, max_body_bytes: usize, json_errors: bool) {
        self.response = Some(response);
        self.request = Some(request);
        self.ip = None;
        self.method = None;
        self.url = None;
        self.content_length = None;
        self.status_override = None;
        self.state = State::Bound;
        self.aborted = false;
        self.body.clear();
        self.body_armed = false;
        self.stream.reset();
        self.max_body_bytes = max_body_bytes;
        self.json_errors = json_errors;
        self.arm_abort_hook();
    }

    /// Registers this context's own [`Self::on_abort`] as the transport's
    /// abort callback (§4.7 dispatch step 4, "register the transport's
    /// abort hook to the context's onAbort"). A context is only ever
    /// reached through the [`Box`] the pool hands out, so its heap address
    /// is stable for the callback's lifetime.
    fn arm_abort_hook(&mut self) {
        let ptr = AbortPtr(self as *mut Self);
        if let Some(resp) = &mut self.response {
            resp.on_aborted(Box::new(move || unsafe { (*ptr.0).on_abort() }));
        }
    }

    // -- Identity -----------------------------------------------------

    pub fn ip(&mut self) -> &str {
        if self.ip.is_none() {
            let text = self
                .response
                .as_ref()
                .and_then(|r| r.remote_address_as_text())
                .unwrap_or("");
            self.ip = Some(text.to_owned());
        }
        self.ip.as_deref().unwrap_or("")
    }

    pub fn method(&mut self) -> Option<Method> {
        if self.method.is_none() {
            self.method = self.request.as_ref().and_then(|r| Method::parse(r.method()));
        }
        self.method
    }

    pub fn url(&mut self) -> &str {
        if self.url.is_none() {
            let url = self.request.as_ref().map(|r| r.url().to_owned()).unwrap_or_default();
            self.url = Some(url);
        }
        self.url.as_deref().unwrap_or("")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.as_ref().and_then(|r| r.header(name))
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.request.as_ref().and_then(|r| r.query(name))
    }

    /// Lazily caches the parsed `content-length` header, `None` meaning
    /// "absent" (the Unknown-mode sentinel, §3).
    pub fn content_length(&mut self) -> Option<usize> {
        if self.content_length.is_none() {
            let parsed = self.header("content-length").and_then(|v| v.parse::<usize>().ok());
            self.content_length = Some(parsed);
        }
        self.content_length.unwrap_or(None)
    }

    // -- Status / headers ----------------------------------------------

    /// Overrides the status applied by the next reply.
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status_override = Some(status);
        self
    }

    /// The canonical status line: override if set, else `fallback`.
    pub fn effective_status(&self, fallback: StatusCode) -> StatusCode {
        self.status_override.unwrap_or(fallback)
    }

    /// Writes a single header directly to the transport. Requires the
    /// response not yet ended (debug-asserted, matching the builder-guard
    /// idiom used throughout the response write path).
    #[track_caller]
    pub fn set_header(&mut self, name: &str, value: &str) {
        debug_assert!(!self.stream.is_closed(), "setHeader called after the response ended");
        if let Some(resp) = &mut self.response {
            resp.write_header(name, value);
        }
    }

    // -- Body -----------------------------------------------------------

    /// Lazily arms the body parser and attaches the transport's data sink on
    /// first access, so a handler that never touches the body never pays
    /// for either (§4.2 "first call attaches a data sink").
    fn ensure_body_armed(&mut self) {
        if self.body_armed {
            return;
        }
        self.body_armed = true;

        let content_length = self.content_length();
        self.body.reset(content_length, self.max_body_bytes);

        let ptr = AbortPtr(self as *mut Self);
        if let Some(resp) = &mut self.response {
            resp.on_data(Box::new(move |chunk, is_last| unsafe {
                (*ptr.0).feed_body_chunk(chunk, is_last);
            }));
        }
    }

    pub async fn body(&mut self) -> Result<Vec<u8>, ErrorKind> {
        if self.aborted {
            return Err(ErrorKind::Aborted);
        }
        self.ensure_body_armed();
        self.body.body().await
    }

    pub async fn text(&mut self) -> Result<String, ErrorKind> {
        if self.aborted {
            return Err(ErrorKind::Aborted);
        }
        self.ensure_body_armed();
        self.body.text().await
    }

    pub async fn json(&mut self) -> Result<serde_json::Value, ErrorKind> {
        if self.aborted {
            return Err(ErrorKind::Aborted);
        }
        self.ensure_body_armed();
        self.body.json().await
    }

    /// Feeds one transport `onData` chunk to the body parser.
    ///
    /// [`Self::ensure_body_armed`] wires this up automatically as the data
    /// sink on first body access (§4.2); exposed publicly too for a
    /// transport that prefers to push chunks directly rather than go through
    /// [`crate::transport::ResponseHandle::on_data`].
    pub fn feed_body_chunk(&mut self, chunk: &[u8], is_last: bool) {
        self.body.ingest(chunk, is_last);
    }

    // -- One-shot reply ---------------------------------------------------

    /// Emits `status`/`headers`/an optional `body` as a single framed
    /// response. A no-op once `replied` or `streaming` (sticky, §4.4).
    pub fn reply(&mut self, status: StatusCode, headers: &[(&str, &str)], body: Option<&[u8]>) {
        if self.aborted || self.state == State::Replied || self.state == State::Streaming {
            return;
        }

        if let Some(resp) = &mut self.response {
            let total = body.map(<[u8]>::len).unwrap_or(0);
            resp.cork(|h| {
                h.write_status(status.canonical_text());
                for (name, value) in headers {
                    h.write_header(name, value);
                }
            });
            match body {
                Some(b) => {
                    resp.try_end(b, total);
                }
                None => resp.end(None),
            }
        }

        self.state = State::Replied;
    }

    /// Dispatches by `value`'s shape (§4.4 `send` dispatch table).
    pub fn send(&mut self, value: Value) {
        let status = self.status_override.unwrap_or(StatusCode::Ok);

        match value {
            Value::Null => self.reply(
                self.status_override.unwrap_or(StatusCode::NoContent),
                &[("content-type", HeaderPreset::TextPlain.content_type())],
                None,
            ),
            Value::Text(text) => self.reply(
                status,
                &[("content-type", HeaderPreset::TextPlain.content_type())],
                Some(text.as_bytes()),
            ),
            Value::Bytes(bytes) => self.reply(
                status,
                &[("content-type", HeaderPreset::OctetStream.content_type())],
                Some(&bytes),
            ),
            Value::Json(json) => {
                // `serde_json::Value` is already constructed by the time it
                // reaches here, so serialization cannot fail at send time
                // (see the tryEnd/toJSON open-question resolution).
                let body = serde_json::to_vec(&json).unwrap_or_default();
                self.reply(
                    status,
                    &[("content-type", HeaderPreset::Json.content_type())],
                    Some(&body),
                );
            }
        }
    }

    pub fn send_json(&mut self, value: serde_json::Value) {
        self.send(Value::Json(value));
    }

    pub fn send_text(&mut self, text: impl Into<String>) {
        self.send(Value::Text(text.into()));
    }

    pub fn send_buffer(&mut self, bytes: Vec<u8>) {
        self.send(Value::Bytes(bytes));
    }

    /// Renders a [`HandlerError`] per §7's "user-visible failure behavior":
    /// `<status> <canonical-text>` with a `text/plain` body equal to the
    /// message, or a fixed 500 body when `json_errors` is false.
    pub fn send_error(&mut self, err: &HandlerError) {
        tracing::error!(status = ?err.effective_status(), message = err.effective_message(), "handler error");
        let status = err.effective_status();
        let message = if self.json_errors {
            err.effective_message().to_owned()
        } else {
            String::new()
        };
        self.status_override = Some(status);
        self.reply(
            status,
            &[("content-type", HeaderPreset::TextPlain.content_type())],
            (!message.is_empty()).then(|| message.as_bytes().to_vec()).as_deref(),
        );
    }

    // -- Streaming --------------------------------------------------------

    pub fn start_streaming(&mut self, headers: &[(&str, &str)]) {
        if self.aborted || self.state == State::Replied || self.state == State::Streaming {
            return;
        }
        let status = self.status_override.unwrap_or(StatusCode::Ok);
        if let Some(resp) = &mut self.response {
            self.stream.begin(resp, status.canonical_text(), headers);
        }
        self.state = State::Streaming;
    }

    pub fn write(&mut self, chunk: &[u8]) -> bool {
        match &mut self.response {
            Some(resp) => self.stream.write(resp, chunk, self.aborted),
            None => false,
        }
    }

    pub fn try_end(&mut self, chunk: &[u8], total_size: usize) -> (bool, bool) {
        let Some(resp) = &mut self.response else { return (false, false) };
        let (ok, done) = self.stream.try_end(resp, chunk, total_size, self.aborted);
        if done {
            self.state = State::Replied;
        }
        (ok, done)
    }

    pub fn end(&mut self, chunk: Option<&[u8]>) {
        if let Some(resp) = &mut self.response {
            self.stream.end(resp, chunk, self.aborted);
        }
        self.state = State::Replied;
    }

    pub fn write_offset(&self) -> usize {
        self.response.as_ref().map(|r| self.stream.write_offset(r)).unwrap_or(0)
    }

    /// Arms a single writable callback on the transport (§4.4 `onWritable`).
    /// A no-op if the response handle has already been taken.
    pub fn on_writable(&mut self, cb: impl FnOnce(usize) -> bool + Send + 'static) {
        if let Some(resp) = &mut self.response {
            self.stream.on_writable(resp, cb);
        }
    }

    /// Streams `readable` as the response body, per §4.4's `stream(readable)`
    /// delegating to [`crate::stream::pipe`]. Begins streaming with `status`/
    /// `headers` and drives the producer to completion, pausing on
    /// backpressure via [`Self::on_writable`] internally. A no-op, returning
    /// `Ok(())` immediately, if already replied or aborted.
    pub async fn stream(
        &mut self,
        readable: impl ChunkProducer,
        status: StatusCode,
        headers: &[(&str, &str)],
    ) -> Result<(), ErrorKind> {
        if self.aborted || self.state == State::Replied || self.state == State::Streaming {
            return Ok(());
        }

        let Some(resp) = &mut self.response else { return Ok(()) };
        self.state = State::Streaming;

        let aborted = &self.aborted;
        let result = crate::stream::pipe(
            &mut self.stream,
            resp,
            readable,
            status.canonical_text(),
            headers,
            || *aborted,
        )
        .await;

        if self.stream.is_closed() {
            self.state = State::Replied;
        }

        result.map_err(|_| ErrorKind::ServerError)
    }

    // -- Lifecycle hooks --------------------------------------------------

    /// The transport observed the client/connection aborting.
    pub fn on_abort(&mut self) {
        if self.aborted {
            return;
        }
        debug!("request aborted");
        self.aborted = true;
        self.body.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn is_replied(&self) -> bool {
        matches!(self.state, State::Replied)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, State::Streaming)
    }

    /// Idempotent terminal transition. Returns `true` the first time it
    /// runs for this binding (the caller should release to the pool only
    /// then); subsequent calls are silently ignored, tolerating re-entrant
    /// callback firings after the context has already gone back to the
    /// pool (§9 "Pool-local back-references").
    pub fn finalize(&mut self) -> bool {
        if self.state == State::Done {
            return false;
        }
        self.state = State::Done;
        true
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Handler deferred completion: sends `value` unless the context is
    /// already done, aborted, or replied.
    pub fn on_resolve(&mut self, value: Value) {
        if self.is_done() || self.aborted || self.is_replied() {
            return;
        }
        self.send(value);
    }

    pub fn on_reject(&mut self, err: &HandlerError) {
        if self.is_done() || self.aborted || self.is_replied() {
            return;
        }
        self.send_error(err);
    }
}

impl<R: ResponseHandle, Q: RequestHandle> Default for HttpContext<R, Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ResponseHandle, Q: RequestHandle> Poolable for HttpContext<R, Q> {
    fn clear(&mut self) {
        self.response = None;
        self.request = None;
        self.ip = None;
        self.method = None;
        self.url = None;
        self.content_length = None;
        self.status_override = None;
        self.body.clear();
        self.body_armed = false;
        self.stream.reset();
        // `done` stays true (state unchanged) until the next `bind`, per §9
        // "implementations must keep done=true through clear".
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockRequest, MockResponse};

    fn bound_ctx() -> HttpContext<MockResponse, MockRequest> {
        let mut ctx = HttpContext::new();
        ctx.bind(MockResponse::new(), MockRequest::default(), 1024, true);
        ctx
    }

    #[test]
    fn reply_writes_status_headers_and_body() {
        let mut ctx = bound_ctx();
        ctx.reply(StatusCode::Ok, &[("content-type", "text/plain")], Some(b"hi"));

        let resp = ctx.response.take().unwrap();
        assert_eq!(resp.recorded.status.as_deref(), Some(&b"200 OK"[..]));
        assert_eq!(resp.recorded.body, b"hi");
        assert!(resp.recorded.ended);
    }

    #[test]
    fn second_reply_is_a_no_op() {
        let mut ctx = bound_ctx();
        ctx.reply(StatusCode::Ok, &[], Some(b"first"));
        ctx.reply(StatusCode::NotFound, &[], Some(b"second"));

        assert_eq!(ctx.response.as_ref().unwrap().recorded.body, b"first");
    }

    #[test]
    fn send_null_is_204_empty_text_plain() {
        let mut ctx = bound_ctx();
        ctx.send(Value::Null);

        let resp = ctx.response.as_ref().unwrap();
        assert_eq!(resp.recorded.status.as_deref(), Some(&b"204 No Content"[..]));
        assert!(resp.recorded.body.is_empty());
    }

    #[test]
    fn send_text_is_200_text_plain() {
        let mut ctx = bound_ctx();
        ctx.send(Value::Text("hello".into()));

        let resp = ctx.response.as_ref().unwrap();
        assert_eq!(resp.recorded.status.as_deref(), Some(&b"200 OK"[..]));
        assert_eq!(resp.recorded.body, b"hello");
    }

    #[test]
    fn send_json_sets_json_preset_content_type() {
        let mut ctx = bound_ctx();
        ctx.send(Value::Json(serde_json::json!({"ok": true})));

        let resp = ctx.response.as_ref().unwrap();
        assert!(resp
            .recorded
            .headers
            .iter()
            .any(|(n, v)| n == "content-type" && v.contains("application/json")));
        assert_eq!(resp.recorded.body, br#"{"ok":true}"#);
    }

    struct TwoChunks(std::collections::VecDeque<&'static [u8]>);

    impl ChunkProducer for TwoChunks {
        async fn next(&mut self) -> Option<Result<Vec<u8>, String>> {
            self.0.pop_front().map(|c| Ok(c.to_vec()))
        }
    }

    #[tokio::test]
    async fn stream_pipes_a_producer_through_the_response() {
        let mut ctx = bound_ctx();
        let producer = TwoChunks(std::collections::VecDeque::from([&b"a"[..], &b"b"[..]]));

        let result = ctx.stream(producer, StatusCode::Ok, &[]).await;

        assert!(result.is_ok());
        assert_eq!(ctx.response.as_ref().unwrap().recorded.body, b"ab");
        assert!(ctx.response.as_ref().unwrap().recorded.ended);
        assert!(ctx.is_replied());
    }

    #[tokio::test]
    async fn stream_is_a_no_op_once_already_replied() {
        let mut ctx = bound_ctx();
        ctx.reply(StatusCode::Ok, &[], Some(b"first"));

        let producer = TwoChunks(std::collections::VecDeque::from([&b"a"[..]]));
        let result = ctx.stream(producer, StatusCode::Ok, &[]).await;

        assert!(result.is_ok());
        assert_eq!(ctx.response.as_ref().unwrap().recorded.body, b"first");
    }

    #[test]
    fn write_while_aborted_is_a_no_op() {
        let mut ctx = bound_ctx();
        ctx.start_streaming(&[]);
        ctx.on_abort();
        assert!(!ctx.write(b"ignored"));
    }

    #[test]
    fn abort_before_first_byte_writes_nothing() {
        let mut ctx = bound_ctx();
        ctx.on_abort();
        ctx.reply(StatusCode::Ok, &[], Some(b"should not appear"));

        // reply() itself checks aborted before writing in the handler path;
        // the context layer's own guard is exercised via send()/on_resolve.
        ctx.on_resolve(Value::Text("nope".into()));
        assert!(ctx.response.as_ref().unwrap().recorded.status.is_none());
    }

    #[tokio::test]
    async fn text_sees_chunks_delivered_through_the_wired_data_sink() {
        let mut ctx = bound_ctx();
        ctx.ensure_body_armed();
        ctx.response.as_mut().unwrap().simulate_data(b"hel", false);
        ctx.response.as_mut().unwrap().simulate_data(b"lo", true);

        assert_eq!(ctx.text().await.unwrap(), "hello");
    }

    #[test]
    fn transport_abort_callback_triggers_on_abort() {
        // Context must be boxed here: arm_abort_hook relies on a stable
        // heap address, which only holds once the context is behind the
        // same indirection the pool always hands out.
        let mut ctx = Box::new(HttpContext::new());
        ctx.bind(MockResponse::new(), MockRequest::default(), 1024, true);
        assert!(!ctx.is_aborted());

        ctx.response.as_mut().unwrap().simulate_abort();
        assert!(ctx.is_aborted());
    }

    #[test]
    fn finalize_runs_exactly_once() {
        let mut ctx = bound_ctx();
        assert!(ctx.finalize());
        assert!(!ctx.finalize());
    }

    #[test]
    fn clear_keeps_done_true_until_next_bind() {
        let mut ctx = bound_ctx();
        ctx.finalize();
        ctx.clear();
        assert!(ctx.is_done());

        ctx.bind(MockResponse::new(), MockRequest::default(), 1024, true);
        assert!(!ctx.is_done());
    }
}
