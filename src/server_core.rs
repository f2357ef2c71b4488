//! Route registration, dispatch, active-request tracking, drain/close, and
//! publish fan-out (§4.7).

use crate::{
    context::{HttpContext, Value},
    error_kind::HandlerError,
    method::RouteMethod,
    pool::ContextPool,
    status::StatusCode,
    transport::{RequestHandle, ResponseHandle, Transport, WebSocketHandle},
    ws_context::{WsContext, WsMessage},
};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;
use tracing::{debug, info, trace};

/// Per-connection user data carried across requests on the same socket.
///
/// Mirrors the teacher's `ConnectionData`: `new()` runs once at pool
/// warm-up, `reset()` runs between uses so the same allocation serves many
/// requests without per-request allocation.
pub trait ConnectionData: Sync + Send + 'static {
    fn new() -> Self;
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}
    #[inline(always)]
    fn reset(&mut self) {}
}

/// Processes one HTTP request and produces a response (§4.7 step 5).
///
/// `handle` returning `Err` is the immediate-reject path (§4.7 step 5,
/// "if it throws"); `Ok(value)` is dispatched through [`HttpContext::send`]
/// unless the handler already replied or is streaming (§4.7 step 7).
pub trait Handler<R, Q, S = ()>
where
    Self: Sync + Send + 'static,
    R: ResponseHandle,
    Q: RequestHandle,
    S: ConnectionData,
{
    fn handle(
        &self,
        connection_data: &mut S,
        ctx: &mut HttpContext<R, Q>,
    ) -> impl Future<Output = Result<Value, HandlerError>> + Send;
}

/// The decision an upgrade hook returns (§4.7 "Upgrade (WS)").
///
/// An exhaustive enum dissolves the source's ambiguity around an upgrade
/// hook returning neither an allow nor a deny (§9 open questions): there is
/// no "empty" case to default here.
pub enum UpgradeDecision<U> {
    Allow(U),
    Deny,
}

/// The WS handler bundle (§6 "ws" option, §4.7 "WS lifecycle").
pub trait WsHandlers<W, U = ()>
where
    Self: Sync + Send + 'static,
    W: WebSocketHandle<UserData = U>,
{
    fn on_upgrade(
        &self,
        ip: &str,
        url: &str,
        header: &dyn Fn(&str) -> Option<&str>,
    ) -> impl Future<Output = UpgradeDecision<U>> + Send;

    fn on_open(&self, ctx: &mut WsContext<W>) -> impl Future<Output = ()> + Send;

    fn on_message(&self, ctx: &mut WsContext<W>, message: WsMessage) -> impl Future<Output = ()> + Send;

    fn on_close(&self, ctx: &mut WsContext<W>, code: u16, reason: &str) -> impl Future<Output = ()> + Send;

    fn on_drain(&self, _ctx: &mut WsContext<W>) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_subscription(
        &self,
        _ctx: &mut WsContext<W>,
        _topic: &str,
        _new_count: usize,
        _old_count: usize,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Either a single universal router or a fixed list of `(method, path)`
/// registrations, mutually exclusive (§3, §4.7).
///
/// Actual path matching against the transport's native router (`:name`,
/// `/*`) is the transport's job (§1, §6); this table exists for up-front
/// method/path validation — "invalid method or path is rejected at listen
/// time" — and for [`Server::resolve`] to report whether a given
/// `(method, path)` pair is served at all.
pub enum Router {
    Universal,
    Routes(Vec<(RouteMethod, String)>),
}

impl Router {
    fn validate(&self) {
        if let Router::Routes(routes) = self {
            for (_, path) in routes {
                debug_assert!(path.starts_with('/'), "route path {path:?} must begin with '/'");
            }
        }
    }

    pub fn resolve(&self, method: crate::method::Method, path: &str) -> bool {
        match self {
            Router::Universal => true,
            Router::Routes(routes) => {
                routes.iter().any(|(m, p)| m.matches(method) && p == path)
            }
        }
    }
}

/// The subset of [`Server`] reachable through a bound [`WsContext`]'s
/// non-owning back-reference (§3 Data Model "server back-reference",
/// §4.5 `publish`). Kept narrow and free of `Server`'s own generics so
/// `WsContext<W>` doesn't need to name them back.
pub trait WsServerHandle {
    fn publish(&self, transport: &mut dyn Transport, topic: &str, msg: &[u8], binary: bool) -> bool;
}

impl<H, R, Q, W, WH, S> WsServerHandle for Server<H, R, Q, W, WH, S>
where
    H: Handler<R, Q, S>,
    R: ResponseHandle,
    Q: RequestHandle,
    W: WebSocketHandle,
    WH: WsHandlers<W, W::UserData>,
    S: ConnectionData,
{
    fn publish(&self, transport: &mut dyn Transport, topic: &str, msg: &[u8], binary: bool) -> bool {
        Server::publish(self, transport, topic, msg, binary)
    }
}

/// Route registration, dispatch, drain/close lifecycle, and publish
/// fan-out for one listen socket (§4.7).
pub struct Server<H, R, Q, W, WH, S = ()>
where
    H: Handler<R, Q, S>,
    R: ResponseHandle,
    Q: RequestHandle,
    W: WebSocketHandle,
    WH: WsHandlers<W, W::UserData>,
    S: ConnectionData,
{
    handler: Arc<H>,
    ws_handlers: Arc<WH>,
    router: Router,
    max_body_bytes: usize,
    json_errors: bool,
    ws_idle_timeout: Duration,

    http_pool: std::sync::Mutex<ContextPool<HttpContext<R, Q>>>,
    ws_pool: std::sync::Mutex<ContextPool<WsContext<W>>>,

    active_http: Arc<AtomicUsize>,
    active_ws: Arc<AtomicUsize>,
    draining: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,

    _marker: std::marker::PhantomData<S>,
}

impl<H, R, Q, W, WH, S> Server<H, R, Q, W, WH, S>
where
    H: Handler<R, Q, S>,
    R: ResponseHandle + 'static,
    Q: RequestHandle + 'static,
    W: WebSocketHandle + 'static,
    WH: WsHandlers<W, W::UserData>,
    S: ConnectionData,
{
    pub fn builder() -> ServerBuilder<H, R, Q, W, WH, S> {
        ServerBuilder {
            handler: None,
            ws_handlers: None,
            router: None,
            server_limits: None,
            ws_limits: None,
            pool_limits: None,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn active_http(&self) -> usize {
        self.active_http.load(Ordering::Acquire)
    }

    pub fn active_ws(&self) -> usize {
        self.active_ws.load(Ordering::Acquire)
    }

    /// Dispatch algorithm for one inbound HTTP request (§4.7 "Dispatch").
    ///
    /// Returns `Some(ctx)` when the handler left the response streaming: the
    /// caller holds onto it and passes it to [`Self::finalize_streamed`]
    /// once the streamer reaches its terminal op. Returns `None` once the
    /// context has already been finalized and released back to the pool.
    pub async fn dispatch(
        &self,
        response: R,
        request: Q,
        connection_data: &mut S,
    ) -> Option<Box<HttpContext<R, Q>>> {
        if self.is_draining() {
            debug!("rejecting request while draining");
            let mut response = response;
            response.cork(|h| {
                h.write_status(StatusCode::ServiceUnavailable.canonical_text());
                h.write_header("connection", "close");
            });
            response.end(None);
            return None;
        }

        self.active_http.fetch_add(1, Ordering::AcqRel);

        let mut ctx = self.http_pool.lock().unwrap().acquire();
        ctx.bind(response, request, self.max_body_bytes, self.json_errors);

        let outcome = self.handler.handle(connection_data, &mut ctx).await;

        if !ctx.is_aborted() {
            match outcome {
                Ok(value) if !ctx.is_replied() && !ctx.is_streaming() => ctx.send(value),
                Err(err) if !ctx.is_replied() && !ctx.is_streaming() => ctx.send_error(&err),
                _ => {}
            }
        }

        if ctx.is_streaming() {
            Some(ctx)
        } else {
            self.finalize_http(ctx);
            None
        }
    }

    fn finalize_http(&self, mut ctx: Box<HttpContext<R, Q>>) {
        if ctx.finalize() {
            self.http_pool.lock().unwrap().release(ctx);
            let remaining = self.active_http.fetch_sub(1, Ordering::AcqRel) - 1;
            trace!(remaining, "http context finalized and released to pool");
            self.maybe_complete_shutdown(remaining, self.active_ws());
        }
        // A `false` return means this context already went through
        // finalize once (§9 re-entrancy); `ctx` is just dropped here.
    }

    /// Completes a streaming response's finalize step once the streamer has
    /// reached its terminal op. The embedder calls this instead of letting
    /// `dispatch` finalize directly, since the response may still be open
    /// when `dispatch` returns.
    pub fn finalize_streamed(&self, ctx: Box<HttpContext<R, Q>>) {
        self.finalize_http(ctx);
    }

    fn maybe_complete_shutdown(&self, active_http: usize, active_ws: usize) {
        if self.is_draining() && active_http == 0 && active_ws == 0 {
            self.shutdown_notify.notify_waiters();
        }
    }

    /// Upgrade handling (§4.7 "Upgrade (WS)"). `aborted` observes the
    /// transport's abort hook during the (possibly async) upgrade hook.
    /// Invokes the retained `ws_handlers` bundle rather than a per-call
    /// borrowed one, so the same hooks stay live for the connection's whole
    /// WS lifecycle (open/message/drain/subscription/close).
    pub async fn upgrade(
        &self,
        ip: &str,
        url: &str,
        header: &dyn Fn(&str) -> Option<&str>,
        aborted: impl Fn() -> bool,
    ) -> UpgradeDecision<W::UserData> {
        if self.is_draining() {
            return UpgradeDecision::Deny;
        }

        let decision = self.ws_handlers.on_upgrade(ip, url, header).await;
        if aborted() {
            return UpgradeDecision::Deny;
        }
        decision
    }

    /// WS open (§4.7 "WS lifecycle"): binds the socket, sets the context's
    /// back-reference to this `Server` (used by [`WsContext::publish`]), and
    /// invokes the user's open hook before the context is handed back.
    /// Returns `None` if the server is draining (close with code 1001 is the
    /// caller's job, since closing requires the transport handle).
    pub async fn ws_open(&self, socket: W) -> Option<Box<WsContext<W>>> {
        if self.is_draining() {
            debug!("denying ws upgrade while draining");
            return None;
        }
        let mut ctx = self.ws_pool.lock().unwrap().acquire();
        ctx.bind(socket, self);
        self.ws_handlers.on_open(&mut ctx).await;
        let active = self.active_ws.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(active, "ws context opened");
        Some(ctx)
    }

    /// Dispatches one inbound WS frame to the user's message hook.
    pub async fn ws_message(&self, ctx: &mut WsContext<W>, message: WsMessage) {
        self.ws_handlers.on_message(ctx, message).await;
    }

    /// Dispatches a drain (writable backlog cleared) event to the user hook.
    pub async fn ws_drain(&self, ctx: &mut WsContext<W>) {
        self.ws_handlers.on_drain(ctx).await;
    }

    /// Dispatches a subscription-count change to the user hook.
    pub async fn ws_subscription(&self, ctx: &mut WsContext<W>, topic: &str, new_count: usize, old_count: usize) {
        self.ws_handlers.on_subscription(ctx, topic, new_count, old_count).await;
    }

    /// WS close (§4.7 "WS lifecycle"): invokes the user's close hook
    /// (awaiting async completion) before releasing `ctx` back to the pool.
    pub async fn ws_close(&self, mut ctx: Box<WsContext<W>>, code: u16, reason: &str) {
        self.ws_handlers.on_close(&mut ctx, code, reason).await;
        self.ws_pool.lock().unwrap().release(ctx);
        let remaining = self.active_ws.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!(remaining, "ws context closed and released to pool");
        self.maybe_complete_shutdown(self.active_http(), remaining);
    }

    /// `publish` infers `binary` as "not a string" when omitted at the call
    /// site (§4.7); this crate leaves that inference to the caller since it
    /// only forwards to the transport.
    pub fn publish(&self, transport: &mut dyn Transport, topic: &str, msg: &[u8], binary: bool) -> bool {
        transport.publish(topic, msg, binary)
    }

    /// Sets `draining`; the embedder stops accepting new connections and
    /// arms a timer that calls [`Self::close`] on expiry. Resolves once
    /// active counters reach zero or `close` runs, whichever first.
    pub async fn shutdown(&self, grace: Duration) {
        info!(active_http = self.active_http(), active_ws = self.active_ws(), "draining");
        self.draining.store(true, Ordering::Release);
        self.maybe_complete_shutdown(self.active_http(), self.active_ws());

        let wait = self.shutdown_notify.notified();
        tokio::select! {
            _ = wait => info!("drain completed before grace period elapsed"),
            _ = tokio::time::sleep(grace) => info!("drain grace period elapsed, forcing close"),
        }
    }

    /// Forces an immediate close: sets `draining` and wakes anyone awaiting
    /// [`Self::shutdown`]. Idempotent.
    pub fn close(&self) {
        info!("closing");
        self.draining.store(true, Ordering::Release);
        self.shutdown_notify.notify_waiters();
    }
}

/// Builder for [`Server`] (§6 "Server options").
pub struct ServerBuilder<H, R, Q, W, WH, S = ()>
where
    H: Handler<R, Q, S>,
    R: ResponseHandle,
    Q: RequestHandle,
    W: WebSocketHandle,
    WH: WsHandlers<W, W::UserData>,
    S: ConnectionData,
{
    handler: Option<Arc<H>>,
    ws_handlers: Option<Arc<WH>>,
    router: Option<Router>,
    server_limits: Option<crate::config::ServerLimits>,
    ws_limits: Option<crate::config::WsLimits>,
    pool_limits: Option<crate::config::PoolLimits>,
    _marker: std::marker::PhantomData<(R, Q, W, S)>,
}

impl<H, R, Q, W, WH, S> ServerBuilder<H, R, Q, W, WH, S>
where
    H: Handler<R, Q, S>,
    R: ResponseHandle + 'static,
    Q: RequestHandle + 'static,
    W: WebSocketHandle + 'static,
    WH: WsHandlers<W, W::UserData>,
    S: ConnectionData,
{
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Required: the WS handler bundle retained for the lifetime of every
    /// socket this `Server` opens (§4.7 "WS lifecycle").
    #[inline(always)]
    pub fn ws_handlers(mut self, handlers: WH) -> Self {
        self.ws_handlers = Some(Arc::new(handlers));
        self
    }

    /// Exactly one of [`Self::router`]/[`Self::routes`] is required
    /// (§3 "route set and router are mutually exclusive and at least one
    /// must be present").
    #[inline(always)]
    pub fn router(mut self) -> Self {
        self.router = Some(Router::Universal);
        self
    }

    #[inline(always)]
    pub fn routes(mut self, routes: Vec<(RouteMethod, String)>) -> Self {
        self.router = Some(Router::Routes(routes));
        self
    }

    #[inline(always)]
    pub fn server_limits(mut self, limits: crate::config::ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn ws_limits(mut self, limits: crate::config::WsLimits) -> Self {
        self.ws_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn pool_limits(mut self, limits: crate::config::PoolLimits) -> Self {
        self.pool_limits = Some(limits);
        self
    }

    #[track_caller]
    pub fn build(self) -> Server<H, R, Q, W, WH, S> {
        let handler = self.handler.expect("ServerBuilder::handler is required");
        let ws_handlers = self.ws_handlers.expect("ServerBuilder::ws_handlers is required");
        let router = self.router.expect("exactly one of router()/routes() is required");
        router.validate();

        let server_limits = self.server_limits.unwrap_or_default();
        server_limits.validate();
        let ws_limits = self.ws_limits.unwrap_or_default();
        ws_limits.validate();
        let pool_limits = self.pool_limits.unwrap_or_default();

        Server {
            handler,
            ws_handlers,
            router,
            max_body_bytes: server_limits.max_body_bytes(),
            json_errors: server_limits.json_errors,
            ws_idle_timeout: ws_limits.idle_timeout,
            http_pool: std::sync::Mutex::new(ContextPool::new(pool_limits.max_http_contexts, HttpContext::new)),
            ws_pool: std::sync::Mutex::new(ContextPool::new(pool_limits.max_ws_contexts, WsContext::new)),
            active_http: Arc::new(AtomicUsize::new(0)),
            active_ws: Arc::new(AtomicUsize::new(0)),
            draining: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            _marker: std::marker::PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        status::StatusCode,
        transport::mock::{MockRequest, MockResponse, MockWebSocket},
    };

    struct EchoHandler;

    impl Handler<MockResponse, MockRequest> for EchoHandler {
        async fn handle(
            &self,
            _: &mut (),
            ctx: &mut HttpContext<MockResponse, MockRequest>,
        ) -> Result<Value, HandlerError> {
            ctx.status(StatusCode::Ok);
            Ok(Value::Text("hi".into()))
        }
    }

    struct EchoWsHandlers;

    impl WsHandlers<MockWebSocket<()>> for EchoWsHandlers {
        async fn on_upgrade(
            &self,
            _ip: &str,
            _url: &str,
            _header: &dyn Fn(&str) -> Option<&str>,
        ) -> UpgradeDecision<()> {
            UpgradeDecision::Allow(())
        }

        async fn on_open(&self, _ctx: &mut WsContext<MockWebSocket<()>>) {}

        async fn on_message(&self, _ctx: &mut WsContext<MockWebSocket<()>>, _message: WsMessage) {}

        async fn on_close(&self, _ctx: &mut WsContext<MockWebSocket<()>>, _code: u16, _reason: &str) {}
    }

    fn test_server() -> Server<EchoHandler, MockResponse, MockRequest, MockWebSocket<()>, EchoWsHandlers> {
        Server::builder().handler(EchoHandler).ws_handlers(EchoWsHandlers).router().build()
    }

    #[tokio::test]
    async fn dispatch_sends_handler_return_value() {
        let server = test_server();
        let mut data = ();
        let still_streaming =
            server.dispatch(MockResponse::new(), MockRequest::default(), &mut data).await;
        assert!(still_streaming.is_none());
        assert_eq!(server.active_http(), 0);
    }

    #[tokio::test]
    async fn draining_rejects_new_requests_with_503() {
        let server = test_server();
        server.close();

        let response = MockResponse::new();
        let mut data = ();
        let result = server.dispatch(response, MockRequest::default(), &mut data).await;
        assert!(result.is_none());
        assert_eq!(server.active_http(), 0);
    }

    #[tokio::test]
    async fn ws_open_and_close_adjusts_active_counter() {
        let server = test_server();
        let ctx = server.ws_open(MockWebSocket::new(())).await.unwrap();
        assert_eq!(server.active_ws(), 1);
        server.ws_close(ctx, 1000, "bye").await;
        assert_eq!(server.active_ws(), 0);
    }

    #[tokio::test]
    async fn ws_open_denied_while_draining() {
        let server = test_server();
        server.close();
        assert!(server.ws_open(MockWebSocket::new(())).await.is_none());
    }

    #[tokio::test]
    async fn ws_context_publishes_through_the_owning_server() {
        let server = test_server();
        let mut ctx = server.ws_open(MockWebSocket::new(())).await.unwrap();
        let mut transport = crate::transport::mock::MockTransport::<MockResponse, MockWebSocket<()>>::new();

        assert!(ctx.publish(&mut transport, "room-1", b"hi", false));
        assert_eq!(transport.published, vec![("room-1".to_string(), b"hi".to_vec(), false)]);

        server.ws_close(ctx, 1000, "bye").await;
    }

    #[test]
    fn router_resolves_registered_routes_only() {
        let router = Router::Routes(vec![(RouteMethod::Any, "/ping".to_string())]);
        assert!(router.resolve(crate::method::Method::Get, "/ping"));
        assert!(!router.resolve(crate::method::Method::Get, "/missing"));
    }
}
