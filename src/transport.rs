//! The transport contract this crate is generic over (§6 "Transport (consumed)").
//!
//! Everything in this module is an interface: the TCP/TLS event loop, the
//! HTTP/1.1 wire parser, and the WebSocket upgrade handshake are out of
//! scope (§1) and live on the other side of these traits. [`HttpContext`](crate::context::HttpContext),
//! [`ResponseStreamer`](crate::stream::ResponseStreamer) and [`WsContext`](crate::ws_context::WsContext)
//! are all generic over an implementation of [`Transport`]; nothing in this
//! crate dials a socket.
//!
//! Behind the `testing` feature (or under `cfg(test)`), [`mock`] ships an
//! in-memory reference transport that exercises the full contract without
//! any networking, used by this crate's own test suite and by `demos/`.

/// A single in-flight response's write surface (§6, per-response methods).
///
/// All writes are synchronous from this crate's point of view: `write`
/// reports whether the transport's send buffer absorbed the chunk without
/// blocking, mirroring `uws`-style backpressure reporting rather than
/// `std::io::Write`.
pub trait ResponseHandle {
    /// Runs `f` inside the transport's "cork" critical section (§ Glossary):
    /// every write issued from within `f` is batched into one syscall
    /// boundary on the wire.
    fn cork(&mut self, f: impl FnOnce(&mut Self));

    /// Writes the status line, e.g. `b"200 OK"` ([`StatusCode::canonical_text`](crate::status::StatusCode::canonical_text)).
    fn write_status(&mut self, status: &[u8]);

    fn write_header(&mut self, name: &str, value: &str);

    /// Queues `chunk`. Returns `true` if fully queued, `false` if only
    /// partially queued (backpressure; arm [`Self::on_writable`]).
    fn write(&mut self, chunk: &[u8]) -> bool;

    /// Emits a final chunk declaring the response's total size. Returns
    /// `(ok, done)`; `done` means the response is fully flushed.
    fn try_end(&mut self, chunk: &[u8], total_size: usize) -> (bool, bool);

    /// Closes the response unconditionally.
    fn end(&mut self, chunk: Option<&[u8]>);

    fn write_offset(&self) -> usize;

    fn remote_address_as_text(&self) -> Option<&str>;

    fn proxied_remote_address_as_text(&self) -> Option<&str>;

    /// Attaches the request body's data sink: `cb(chunk, is_last)` fires
    /// once per inbound chunk, in order, with `is_last` set on the terminal
    /// one (§4.2 "attaches a data sink"). A response accepts at most one
    /// sink; attaching a second one replaces the first.
    fn on_data(&mut self, cb: Box<dyn FnMut(&[u8], bool) + Send>);

    /// Registers the abort callback. The transport guarantees this fires at
    /// most once per response (§5).
    fn on_aborted(&mut self, cb: Box<dyn FnOnce() + Send>);

    /// Arms a single writable callback. Firing the callback clears the slot;
    /// the transport hook itself stays installed for the next arming.
    fn on_writable(&mut self, cb: Box<dyn FnOnce(usize) -> bool + Send>);
}

/// The inbound half of a request (§6, per-request methods).
pub trait RequestHandle {
    fn method(&self) -> &str;

    fn url(&self) -> &str;

    fn header(&self, name: &str) -> Option<&str>;

    fn query(&self, name: &str) -> Option<&str>;

    fn parameter(&self, index_or_name: ParamKey<'_>) -> Option<&str>;
}

/// A route parameter lookup key: either positional (`:name` captured by
/// index) or named.
#[derive(Debug, Clone, Copy)]
pub enum ParamKey<'a> {
    Index(usize),
    Name(&'a str),
}

/// A live WebSocket connection's handle (§6, WebSocket handle methods).
pub trait WebSocketHandle {
    type UserData;

    fn user_data(&mut self) -> &mut Self::UserData;

    /// `binary=false` sends a text frame, `binary=true` a binary frame.
    fn send(&mut self, data: &[u8], binary: bool) -> bool;

    fn end(&mut self, code: u16, reason: &str);

    fn subscribe(&mut self, topic: &str) -> bool;

    fn unsubscribe(&mut self, topic: &str) -> bool;
}

/// The listen-socket / app-level handle (§6, App methods).
///
/// `Server` (§4.7) is generic over one `Transport` implementation for the
/// lifetime of a listen socket; route registration against the transport's
/// native router happens outside this trait (the transport owns path
/// syntax like `:name`/`/*`, forwarded verbatim per §4.7).
pub trait Transport {
    type Response: ResponseHandle;
    type WebSocket: WebSocketHandle;

    fn publish(&mut self, topic: &str, msg: &[u8], binary: bool) -> bool;

    fn num_subscribers(&self, topic: &str) -> usize;

    fn close(&mut self);
}

/// An in-memory reference transport satisfying the contract above without
/// any real networking. Not part of this crate's production API surface;
/// shipped so the core's own tests, and `demos/`, have something concrete
/// to drive the traits with.
#[cfg(any(test, feature = "testing"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;

    /// A recorded response: everything a [`MockResponse`] was asked to
    /// write, in call order, plus terminal state.
    #[derive(Debug, Default, Clone)]
    pub struct RecordedResponse {
        pub status: Option<Vec<u8>>,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
        pub ended: bool,
    }

    /// A [`ResponseHandle`] that records writes into a [`RecordedResponse`]
    /// instead of touching a socket. `write`/`try_end` always report full
    /// success unless `fail_write_after` caps how many bytes may be queued
    /// before backpressure kicks in, letting tests exercise the
    /// partial-write path deterministically.
    pub struct MockResponse {
        pub recorded: RecordedResponse,
        pub aborted: bool,
        offset: usize,
        fail_write_after: Option<usize>,
        data_cb: Option<Box<dyn FnMut(&[u8], bool) + Send>>,
        abort_cb: Option<Box<dyn FnOnce() + Send>>,
        writable_cb: Option<Box<dyn FnOnce(usize) -> bool + Send>>,
    }

    impl MockResponse {
        pub fn new() -> Self {
            Self {
                recorded: RecordedResponse::default(),
                aborted: false,
                offset: 0,
                fail_write_after: None,
                data_cb: None,
                abort_cb: None,
                writable_cb: None,
            }
        }

        /// Caps the number of body bytes accepted before `write`/`try_end`
        /// start reporting backpressure (`false`/`(true, false)`).
        pub fn with_backpressure_after(mut self, bytes: usize) -> Self {
            self.fail_write_after = Some(bytes);
            self
        }

        /// Simulates the transport observing a client disconnect; fires the
        /// registered abort callback exactly once, per §5.
        pub fn simulate_abort(&mut self) {
            if self.aborted {
                return;
            }
            self.aborted = true;
            if let Some(cb) = self.abort_cb.take() {
                cb();
            }
        }

        /// Simulates the socket draining enough to accept more data, firing
        /// the armed writable callback (if any) at most once.
        pub fn simulate_writable(&mut self) {
            if let Some(cb) = self.writable_cb.take() {
                cb(self.offset);
            }
        }

        /// Simulates the transport delivering one inbound body chunk to
        /// whichever sink is currently attached via [`ResponseHandle::on_data`].
        pub fn simulate_data(&mut self, chunk: &[u8], is_last: bool) {
            if let Some(cb) = &mut self.data_cb {
                cb(chunk, is_last);
            }
        }

        fn would_block(&self, additional: usize) -> bool {
            matches!(self.fail_write_after, Some(cap) if self.offset + additional > cap)
        }
    }

    impl Default for MockResponse {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ResponseHandle for MockResponse {
        fn cork(&mut self, f: impl FnOnce(&mut Self)) {
            f(self);
        }

        fn write_status(&mut self, status: &[u8]) {
            self.recorded.status = Some(status.to_vec());
        }

        fn write_header(&mut self, name: &str, value: &str) {
            self.recorded.headers.push((name.to_string(), value.to_string()));
        }

        fn write(&mut self, chunk: &[u8]) -> bool {
            let blocked = self.would_block(chunk.len());
            self.recorded.body.extend_from_slice(chunk);
            self.offset += chunk.len();
            !blocked
        }

        fn try_end(&mut self, chunk: &[u8], _total_size: usize) -> (bool, bool) {
            let blocked = self.would_block(chunk.len());
            self.recorded.body.extend_from_slice(chunk);
            self.offset += chunk.len();
            self.recorded.ended = !blocked;
            (true, !blocked)
        }

        fn end(&mut self, chunk: Option<&[u8]>) {
            if let Some(chunk) = chunk {
                self.recorded.body.extend_from_slice(chunk);
                self.offset += chunk.len();
            }
            self.recorded.ended = true;
        }

        fn write_offset(&self) -> usize {
            self.offset
        }

        fn remote_address_as_text(&self) -> Option<&str> {
            Some("127.0.0.1:0")
        }

        fn proxied_remote_address_as_text(&self) -> Option<&str> {
            None
        }

        fn on_data(&mut self, cb: Box<dyn FnMut(&[u8], bool) + Send>) {
            self.data_cb = Some(cb);
        }

        fn on_aborted(&mut self, cb: Box<dyn FnOnce() + Send>) {
            self.abort_cb = Some(cb);
        }

        fn on_writable(&mut self, cb: Box<dyn FnOnce(usize) -> bool + Send>) {
            self.writable_cb = Some(cb);
        }
    }

    /// A [`RequestHandle`] backed by plain owned strings; constructed
    /// directly by tests rather than tokenized off the wire.
    #[derive(Debug, Default, Clone)]
    pub struct MockRequest {
        pub method: String,
        pub url: String,
        pub headers: HashMap<String, String>,
        pub query: HashMap<String, String>,
        pub params: Vec<String>,
    }

    impl RequestHandle for MockRequest {
        fn method(&self) -> &str {
            &self.method
        }

        fn url(&self) -> &str {
            &self.url
        }

        fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).map(String::as_str)
        }

        fn query(&self, name: &str) -> Option<&str> {
            self.query.get(name).map(String::as_str)
        }

        fn parameter(&self, index_or_name: ParamKey<'_>) -> Option<&str> {
            match index_or_name {
                ParamKey::Index(i) => self.params.get(i).map(String::as_str),
                ParamKey::Name(_) => None,
            }
        }
    }

    /// A [`WebSocketHandle`] recording frames sent through it.
    pub struct MockWebSocket<U> {
        pub user_data: U,
        pub sent: Vec<(Vec<u8>, bool)>,
        pub closed: Option<(u16, String)>,
        pub subscriptions: Vec<String>,
    }

    impl<U> MockWebSocket<U> {
        pub fn new(user_data: U) -> Self {
            Self { user_data, sent: Vec::new(), closed: None, subscriptions: Vec::new() }
        }
    }

    impl<U> WebSocketHandle for MockWebSocket<U> {
        type UserData = U;

        fn user_data(&mut self) -> &mut U {
            &mut self.user_data
        }

        fn send(&mut self, data: &[u8], binary: bool) -> bool {
            if self.closed.is_some() {
                return false;
            }
            self.sent.push((data.to_vec(), binary));
            true
        }

        fn end(&mut self, code: u16, reason: &str) {
            self.closed = Some((code, reason.to_string()));
        }

        fn subscribe(&mut self, topic: &str) -> bool {
            if self.subscriptions.iter().any(|t| t == topic) {
                return false;
            }
            self.subscriptions.push(topic.to_string());
            true
        }

        fn unsubscribe(&mut self, topic: &str) -> bool {
            let before = self.subscriptions.len();
            self.subscriptions.retain(|t| t != topic);
            self.subscriptions.len() != before
        }
    }

    /// A [`Transport`] whose publish fan-out just counts subscribers and
    /// records published messages, for assertions in tests.
    #[derive(Default)]
    pub struct MockTransport<R, W> {
        pub published: Vec<(String, Vec<u8>, bool)>,
        pub subscriber_counts: HashMap<String, usize>,
        pub closed: bool,
        _response: std::marker::PhantomData<R>,
        _ws: std::marker::PhantomData<W>,
    }

    impl<R, W> MockTransport<R, W> {
        pub fn new() -> Self {
            Self {
                published: Vec::new(),
                subscriber_counts: HashMap::new(),
                closed: false,
                _response: std::marker::PhantomData,
                _ws: std::marker::PhantomData,
            }
        }
    }

    impl<R: ResponseHandle, W: WebSocketHandle> Transport for MockTransport<R, W> {
        type Response = R;
        type WebSocket = W;

        fn publish(&mut self, topic: &str, msg: &[u8], binary: bool) -> bool {
            if self.closed {
                return false;
            }
            self.published.push((topic.to_string(), msg.to_vec(), binary));
            self.subscriber_counts.get(topic).is_some_and(|&n| n > 0)
        }

        fn num_subscribers(&self, topic: &str) -> usize {
            self.subscriber_counts.get(topic).copied().unwrap_or(0)
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn mock_response_records_writes_in_order() {
            let mut resp = MockResponse::new();
            resp.write_status(b"200 OK");
            resp.write_header("content-type", "text/plain");
            assert!(resp.write(b"hello "));
            assert!(resp.write(b"world"));
            resp.end(None);

            assert_eq!(resp.recorded.status.as_deref(), Some(&b"200 OK"[..]));
            assert_eq!(resp.recorded.body, b"hello world");
            assert!(resp.recorded.ended);
        }

        #[test]
        fn mock_response_reports_backpressure_past_cap() {
            let mut resp = MockResponse::new().with_backpressure_after(4);
            assert!(!resp.write(b"abcde"));
        }

        #[test]
        fn abort_callback_fires_at_most_once() {
            let mut resp = MockResponse::new();
            let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
            let count_clone = count.clone();
            resp.on_aborted(Box::new(move || {
                count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }));
            resp.simulate_abort();
            resp.simulate_abort();
            assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
        }

        #[test]
        fn simulated_data_reaches_the_attached_sink() {
            let mut resp = MockResponse::new();
            let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
            let received_clone = received.clone();
            resp.on_data(Box::new(move |chunk, is_last| {
                received_clone.lock().unwrap().push((chunk.to_vec(), is_last));
            }));

            resp.simulate_data(b"ab", false);
            resp.simulate_data(b"cd", true);

            let got = received.lock().unwrap();
            assert_eq!(*got, vec![(b"ab".to_vec(), false), (b"cd".to_vec(), true)]);
        }

        #[test]
        fn websocket_rejects_send_after_end() {
            let mut ws = MockWebSocket::new(());
            ws.end(1000, "bye");
            assert!(!ws.send(b"hi", false));
        }
    }
}
