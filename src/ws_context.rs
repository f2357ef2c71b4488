//! Thin adapter over a transport WebSocket handle (§4.5).

use crate::{pool::Poolable, server_core::WsServerHandle, transport::{Transport, WebSocketHandle}};

/// A value a handler sends over a WebSocket: text or binary, inferred from
/// the Rust type rather than a runtime `typeof` check (§4.5 `send`).
#[derive(Debug, Clone)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl From<String> for WsMessage {
    fn from(s: String) -> Self {
        WsMessage::Text(s)
    }
}

impl From<&str> for WsMessage {
    fn from(s: &str) -> Self {
        WsMessage::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for WsMessage {
    fn from(b: Vec<u8>) -> Self {
        WsMessage::Binary(b)
    }
}

/// Holds a WebSocket handle and its user data, adapting the transport's
/// send/subscribe/publish primitives for handler code.
///
/// A given live connection has exactly one [`WsContext`] associated with it
/// (§3 "a hidden handle-to-context mapping keyed on the WebSocket's user
/// data slot"); in this rendition the mapping is an explicit field on the
/// embedder's user-data struct rather than a hidden slot (§9 "WebSocket-to-
/// context mapping").
pub struct WsContext<W: WebSocketHandle> {
    socket: Option<W>,
    server: Option<WsServerPtr>,
}

/// A non-owning back-reference to the `Server` that opened a `WsContext`
/// (§3 Data Model, §4.5 `publish`), set once in [`WsContext::bind`].
struct WsServerPtr(std::ptr::NonNull<dyn WsServerHandle>);

// SAFETY: mirrors `AbortPtr` in `context.rs` — the owning `Server` lives in
// the embedder's `Arc` for at least as long as any `WsContext` it opened is
// in use, and the single-threaded cooperative event loop (§5) means this
// pointer is never dereferenced concurrently with a mutation of the `Server`
// behind it.
unsafe impl Send for WsServerPtr {}

impl<W: WebSocketHandle> WsContext<W> {
    pub fn new() -> Self {
        Self { socket: None, server: None }
    }

    /// Binds both the transport handle and a non-owning back-reference to
    /// the `Server` that opened this socket, used by [`Self::publish`].
    pub fn bind(&mut self, socket: W, server: &dyn WsServerHandle) {
        self.socket = Some(socket);
        self.server =
            std::ptr::NonNull::new(server as *const dyn WsServerHandle as *mut dyn WsServerHandle)
                .map(WsServerPtr);
    }

    #[track_caller]
    fn socket_mut(&mut self) -> &mut W {
        self.socket.as_mut().expect("WsContext method called after clear (ws handle is null)")
    }

    /// Sends `message`; `Text` sends a text frame, `Binary` a binary frame.
    #[track_caller]
    pub fn send(&mut self, message: impl Into<WsMessage>) -> bool {
        match message.into() {
            WsMessage::Text(s) => self.socket_mut().send(s.as_bytes(), false),
            WsMessage::Binary(b) => self.socket_mut().send(&b, true),
        }
    }

    #[track_caller]
    pub fn end(&mut self, code: u16, reason: &str) {
        self.socket_mut().end(code, reason);
    }

    #[track_caller]
    pub fn subscribe(&mut self, topic: &str) -> bool {
        self.socket_mut().subscribe(topic)
    }

    #[track_caller]
    pub fn unsubscribe(&mut self, topic: &str) -> bool {
        self.socket_mut().unsubscribe(topic)
    }

    #[track_caller]
    pub fn user_data(&mut self) -> &mut W::UserData {
        self.socket_mut().user_data()
    }

    pub fn is_bound(&self) -> bool {
        self.socket.is_some()
    }

    /// Fans `msg` out through the owning `Server`'s `publish` (§4.5).
    /// Returns `false` if called before `bind` or after `clear`.
    pub fn publish(&mut self, transport: &mut dyn Transport, topic: &str, msg: &[u8], binary: bool) -> bool {
        let Some(server) = &self.server else { return false };
        // SAFETY: see `WsServerPtr`'s `Send` impl above.
        unsafe { server.0.as_ref().publish(transport, topic, msg, binary) }
    }
}

impl<W: WebSocketHandle> Default for WsContext<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: WebSocketHandle> Poolable for WsContext<W> {
    fn clear(&mut self) {
        self.socket = None;
        self.server = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockResponse, MockTransport, MockWebSocket};

    /// A stand-in `Server` back-reference for tests that don't need a real
    /// one: forwards straight to the transport, like `Server::publish` does.
    struct NullServer;

    impl WsServerHandle for NullServer {
        fn publish(&self, transport: &mut dyn Transport, topic: &str, msg: &[u8], binary: bool) -> bool {
            transport.publish(topic, msg, binary)
        }
    }

    #[test]
    fn send_text_infers_text_frame() {
        let server = NullServer;
        let mut ctx = WsContext::new();
        ctx.bind(MockWebSocket::new(()), &server);
        assert!(ctx.send("hello"));

        let socket = ctx.socket.take().unwrap();
        assert_eq!(socket.sent, vec![(b"hello".to_vec(), false)]);
    }

    #[test]
    fn send_binary_infers_binary_frame() {
        let server = NullServer;
        let mut ctx = WsContext::new();
        ctx.bind(MockWebSocket::new(()), &server);
        assert!(ctx.send(vec![1u8, 2, 3]));

        let socket = ctx.socket.take().unwrap();
        assert_eq!(socket.sent, vec![(vec![1, 2, 3], true)]);
    }

    #[test]
    #[should_panic(expected = "called after clear")]
    fn send_after_clear_panics() {
        let server = NullServer;
        let mut ctx = WsContext::new();
        ctx.bind(MockWebSocket::new(()), &server);
        ctx.clear();
        ctx.send("too late");
    }

    #[test]
    fn subscribe_and_unsubscribe_round_trip() {
        let server = NullServer;
        let mut ctx = WsContext::new();
        ctx.bind(MockWebSocket::new(()), &server);
        assert!(ctx.subscribe("room-1"));
        assert!(!ctx.subscribe("room-1"));
        assert!(ctx.unsubscribe("room-1"));
    }

    #[test]
    fn publish_forwards_through_the_server_back_reference() {
        let server = NullServer;
        let mut ctx = WsContext::new();
        ctx.bind(MockWebSocket::new(()), &server);

        let mut transport = MockTransport::<MockResponse, MockWebSocket<()>>::new();
        assert!(ctx.publish(&mut transport, "room-1", b"hi", false));
        assert_eq!(transport.published, vec![("room-1".to_string(), b"hi".to_vec(), false)]);
    }

    #[test]
    fn publish_before_bind_returns_false() {
        let mut ctx: WsContext<MockWebSocket<()>> = WsContext::new();
        let mut transport = MockTransport::<MockResponse, MockWebSocket<()>>::new();
        assert!(!ctx.publish(&mut transport, "room-1", b"hi", false));
    }
}
