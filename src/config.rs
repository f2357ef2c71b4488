//! Server configuration limits and timeouts.
//!
//! Loading these from a file, environment variables, or CLI flags is outside
//! this crate — it ships the typed structs and their [`Default`]s; wiring
//! them to `clap`/`figment`/env vars is the embedder's job.

use std::time::Duration;

/// Top-level server options (§6 "Server options").
///
/// Validated at [`crate::server_core::ServerBuilder::build`]; an invalid value is
/// a programmer error caught in development (`debug_assert!`), not a runtime
/// condition the server recovers from.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// TCP port the embedder's transport should bind (default: `6000`).
    ///
    /// The core never binds a socket itself (§1); this field exists so a
    /// single [`ServerLimits`] value can be handed to both this crate and
    /// the transport that does the binding.
    pub port: u16,
    /// Maximum request body size in MiB, `1..=64` (default: `1`).
    pub max_body_mib: u8,
    /// Format for error responses raised by the core itself (default: `true`).
    ///
    /// If `true`, `onHttpError`-less failures still carry a `text/plain`
    /// body with the error's message (§7); `false` degrades to an empty body
    /// with only the status line and `connection: close`.
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self { port: 6000, max_body_mib: 1, json_errors: true, _priv: () }
    }
}

impl ServerLimits {
    /// `max_body_mib` converted to bytes, the unit [`crate::body::BodyParser`]
    /// actually works in.
    #[inline(always)]
    pub const fn max_body_bytes(&self) -> usize {
        self.max_body_mib as usize * 1024 * 1024
    }

    pub(crate) fn validate(&self) {
        debug_assert!(self.port >= 1, "port must be in 1..=65535");
        debug_assert!(
            (1..=64).contains(&self.max_body_mib),
            "max_body_mib must be in 1..=64"
        );
    }
}

/// WebSocket-specific options (§6 "ws" bundle).
#[derive(Debug, Clone)]
pub struct WsLimits {
    /// Idle timeout before the transport should drop a quiet socket
    /// (default: `15s`, minimum `5s`).
    pub idle_timeout: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for WsLimits {
    fn default() -> Self {
        Self { idle_timeout: Duration::from_secs(15), _priv: () }
    }
}

impl WsLimits {
    pub(crate) fn validate(&self) {
        debug_assert!(
            self.idle_timeout >= Duration::from_secs(5),
            "wsIdleTimeoutSec must be >= 5"
        );
    }
}

/// Maximum retained size of each [`crate::pool::ContextPool`] (§4.6).
///
/// A value of `0` is legal: every acquire falls through to the factory and
/// every release still runs `clear()` but the context is discarded rather
/// than retained.
#[derive(Debug, Clone)]
pub struct PoolLimits {
    pub max_http_contexts: usize,
    pub max_ws_contexts: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self { max_http_contexts: 1024, max_ws_contexts: 1024, _priv: () }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_limits_default_matches_spec() {
        let limits = ServerLimits::default();
        assert_eq!(limits.port, 6000);
        assert_eq!(limits.max_body_mib, 1);
        assert!(limits.json_errors);
        assert_eq!(limits.max_body_bytes(), 1024 * 1024);
    }

    #[test]
    fn ws_limits_default_is_15s() {
        assert_eq!(WsLimits::default().idle_timeout, Duration::from_secs(15));
    }

    #[test]
    #[should_panic(expected = "max_body_mib must be in 1..=64")]
    fn server_limits_rejects_zero_body_size() {
        ServerLimits { max_body_mib: 0, ..ServerLimits::default() }.validate();
    }

    #[test]
    #[should_panic(expected = "wsIdleTimeoutSec must be >= 5")]
    fn ws_limits_rejects_short_idle_timeout() {
        WsLimits { idle_timeout: Duration::from_secs(1), ..WsLimits::default() }.validate();
    }
}
