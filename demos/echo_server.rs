//! Drives a full request through [`Server::dispatch`] against the in-memory
//! reference transport, with no real socket anywhere in the loop, then shows
//! [`BodyParser`] ingesting a request body on its own.
//!
//! Run with `cargo run --example echo_server --features testing`.

use reqcore::{
    body::BodyParser,
    context::{HttpContext, Value},
    error_kind::HandlerError,
    method::Method,
    server_core::{Handler, Server, UpgradeDecision, WsHandlers},
    status::StatusCode,
    transport::mock::{MockRequest, MockResponse, MockWebSocket},
    ws_context::{WsContext, WsMessage},
};
use std::collections::HashMap;

struct Echo;

/// This demo never upgrades a connection; the bundle just denies every
/// upgrade attempt, since `Server` always retains one (§4.7).
struct NoWs;

impl WsHandlers<MockWebSocket<()>> for NoWs {
    async fn on_upgrade(&self, _ip: &str, _url: &str, _header: &dyn Fn(&str) -> Option<&str>) -> UpgradeDecision<()> {
        UpgradeDecision::Deny
    }
    async fn on_open(&self, _ctx: &mut WsContext<MockWebSocket<()>>) {}
    async fn on_message(&self, _ctx: &mut WsContext<MockWebSocket<()>>, _message: WsMessage) {}
    async fn on_close(&self, _ctx: &mut WsContext<MockWebSocket<()>>, _code: u16, _reason: &str) {}
}

impl Handler<MockResponse, MockRequest> for Echo {
    async fn handle(
        &self,
        _connection_data: &mut (),
        ctx: &mut HttpContext<MockResponse, MockRequest>,
    ) -> Result<Value, HandlerError> {
        match ctx.method() {
            Some(Method::Post) => {
                // content-length: 0 settles without needing any chunk to
                // actually arrive off the wire.
                let body = ctx.text().await.map_err(HandlerError::from)?;
                Ok(Value::Text(format!("received an empty body: {:?}", body)))
            }
            _ => {
                ctx.status(StatusCode::Ok);
                Ok(Value::Text(format!("hello, {}", ctx.ip())))
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let server: Server<Echo, MockResponse, MockRequest, MockWebSocket<()>, NoWs> =
        Server::builder().handler(Echo).ws_handlers(NoWs).router().build();
    let mut connection_data = ();

    let get = MockRequest { method: "GET".into(), url: "/".into(), ..Default::default() };
    server.dispatch(MockResponse::new(), get, &mut connection_data).await;

    let mut headers = HashMap::new();
    headers.insert("content-length".to_string(), "0".to_string());
    let post = MockRequest { method: "POST".into(), url: "/echo".into(), headers, ..Default::default() };
    server.dispatch(MockResponse::new(), post, &mut connection_data).await;

    // BodyParser itself, decoupled from any transport handle: a real
    // transport's onData callback would call `ingest` once per chunk as
    // bytes arrive, in order, with `is_last` set on the terminal one.
    let mut parser = BodyParser::new();
    parser.reset(Some(11), 1024);
    parser.ingest(b"hello ", false);
    parser.ingest(b"world", true);
    println!("parsed body: {:?}", parser.text().await.unwrap());

    println!("done");
}
