//! reqcore - a transport-agnostic HTTP/1.1 + WebSocket request/response engine
//!
//! This crate is the request/response core that normally sits directly atop
//! a non-blocking event-driven socket layer: the per-request context (state
//! machine for reply vs. stream), the body parser, the response streamer,
//! the per-connection WebSocket context, the server lifecycle (routing,
//! dispatch, drain, close), and the object pools that recycle both context
//! types.
//!
//! # Scope
//!
//! The TCP/TLS event loop, the HTTP/1.1 wire parser (URL/header tokenizer,
//! WebSocket upgrade handshake), and the end-user handler logic are
//! explicitly **not** part of this crate — they're the embedder's job,
//! wired in through the [`transport`] traits. This crate never binds a
//! socket and never parses a byte off the wire itself.
//!
//! # Features
//!
//! - **Zero-copy parsing where the transport allows it** — [`query::Query`]
//!   parses URL query strings without allocating per-parameter strings.
//! - **Bounded, allocation-conscious body ingest** — [`body::BodyParser`]'s
//!   Known-length mode allocates exactly once; Unknown-length mode grows by
//!   doubling, capped at the configured limit, with a tail-compact step.
//! - **Backpressure-aware streaming** — [`stream::ResponseStreamer`] mirrors
//!   the transport's partial-write signal so a producer never outruns the
//!   socket's send buffer.
//! - **Recyclable contexts** — [`pool::ContextPool`] hands back a LIFO
//!   cache of contexts instead of allocating one per request.
//! - **Graceful drain** — [`server_core::Server::shutdown`] stops accepting
//!   new work while letting in-flight requests/sockets finish.
//!
//! # Quick start
//!
//! ```no_run
//! use reqcore::{
//!     context::{HttpContext, Value},
//!     error_kind::HandlerError,
//!     server_core::{Handler, Router, Server, UpgradeDecision, WsHandlers},
//!     status::StatusCode,
//!     transport::mock::{MockRequest, MockResponse, MockWebSocket},
//!     ws_context::{WsContext, WsMessage},
//! };
//!
//! struct Hello;
//!
//! impl Handler<MockResponse, MockRequest> for Hello {
//!     async fn handle(
//!         &self,
//!         _: &mut (),
//!         ctx: &mut HttpContext<MockResponse, MockRequest>,
//!     ) -> Result<Value, HandlerError> {
//!         ctx.status(StatusCode::Ok);
//!         Ok(Value::Text("Hello world!".into()))
//!     }
//! }
//!
//! // This crate serves both HTTP and WS off the same `Server`; a listener
//! // with no interest in WS still provides a bundle, just one that denies
//! // every upgrade.
//! struct NoWs;
//!
//! impl WsHandlers<MockWebSocket<()>> for NoWs {
//!     async fn on_upgrade(&self, _: &str, _: &str, _: &dyn Fn(&str) -> Option<&str>) -> UpgradeDecision<()> {
//!         UpgradeDecision::Deny
//!     }
//!     async fn on_open(&self, _: &mut WsContext<MockWebSocket<()>>) {}
//!     async fn on_message(&self, _: &mut WsContext<MockWebSocket<()>>, _: WsMessage) {}
//!     async fn on_close(&self, _: &mut WsContext<MockWebSocket<()>>, _: u16, _: &str) {}
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let server: Server<Hello, MockResponse, MockRequest, MockWebSocket<()>, NoWs> =
//!     Server::builder().handler(Hello).ws_handlers(NoWs).router().build();
//! let mut conn_state = ();
//! server
//!     .dispatch(MockResponse::new(), MockRequest::default(), &mut conn_state)
//!     .await;
//! # }
//! ```
//!
//! For an end-to-end illustration including a mock transport driving the
//! full request lifecycle, see `demos/`.

pub mod body;
pub mod config;
pub mod context;
pub mod error_kind;
pub mod method;
pub mod pool;
pub mod query;
pub mod server_core;
pub mod status;
pub mod stream;
pub mod transport;
pub mod ws_context;

pub use crate::{
    config::{PoolLimits, ServerLimits, WsLimits},
    context::{HttpContext, Value},
    error_kind::{ErrorKind, HandlerError},
    method::{Method, RouteMethod},
    pool::ContextPool,
    server_core::{
        ConnectionData, Handler, Router, Server, ServerBuilder, UpgradeDecision, WsHandlers, WsServerHandle,
    },
    status::{HeaderPreset, StatusCode},
    ws_context::{WsContext, WsMessage},
};

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str(value: Option<&[u8]>) -> Option<&str> {
        Some(from_utf8(value?).unwrap())
    }

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub(crate) fn str_2<'a>(value: (&'a [u8], &'a [u8])) -> (&'a str, &'a str) {
        (from_utf8(value.0).unwrap(), from_utf8(value.1).unwrap())
    }
}
