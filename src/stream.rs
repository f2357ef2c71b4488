//! Framed response writes with backpressure and readable-producer piping (§4.3).

use crate::transport::ResponseHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Open,
    Closed,
}

/// Writes the response: one-shot reply or streamed reply with backpressure,
/// plus piping a producer stream into it.
///
/// Generic over the transport's response handle (§6); owns no socket of its
/// own. A single writable-callback slot is enforced by construction: arming
/// replaces whatever was previously armed rather than stacking callbacks,
/// matching "exactly one writable-callback may be armed at a time".
pub struct ResponseStreamer<R: ResponseHandle> {
    state: State,
    started: bool,
}

impl<R: ResponseHandle> ResponseStreamer<R> {
    pub fn new() -> Self {
        Self { state: State::Idle, started: false }
    }

    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.started = false;
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Emits the status line and headers inside a cork, per §4.3. Legal
    /// from `Idle` or from `Closed` after a `reset` (re-entering `Open`).
    pub fn begin(&mut self, handle: &mut R, status: &[u8], headers: &[(&str, &str)]) {
        debug_assert_ne!(self.state, State::Open, "begin called while already streaming");

        handle.cork(|h| {
            h.write_status(status);
            for (name, value) in headers {
                h.write_header(name, value);
            }
        });

        self.state = State::Open;
        self.started = true;
    }

    /// Queues `chunk`. A no-op (`false`) once closed or aborted.
    pub fn write(&mut self, handle: &mut R, chunk: &[u8], aborted: bool) -> bool {
        if aborted || self.state != State::Open {
            return false;
        }
        handle.write(chunk)
    }

    /// Emits a final chunk declaring `total_size`. Returns `(ok, done)`; on
    /// `done` the streamer transitions to `Closed`.
    ///
    /// A no-op (`(false, false)`) once aborted or already closed.
    pub fn try_end(&mut self, handle: &mut R, chunk: &[u8], total_size: usize, aborted: bool) -> (bool, bool) {
        if aborted || self.state == State::Closed {
            return (false, false);
        }

        let (ok, done) = handle.try_end(chunk, total_size);
        if done {
            self.state = State::Closed;
        }
        (ok, done)
    }

    /// Closes the response unconditionally; silently swallowed if aborted
    /// (the context's write-while-aborted no-op rule, §4.4).
    pub fn end(&mut self, handle: &mut R, chunk: Option<&[u8]>, aborted: bool) {
        if aborted {
            return;
        }
        handle.end(chunk);
        self.state = State::Closed;
    }

    #[inline]
    pub fn write_offset(&self, handle: &R) -> usize {
        handle.write_offset()
    }

    #[inline]
    pub fn has_started(&self) -> bool {
        self.started
    }

    /// Arms a single writable callback on the transport (§4.3 `onWritable`).
    /// Firing clears the slot; arming again before it fires replaces it
    /// rather than stacking, matching [`ResponseHandle::on_writable`]'s own
    /// single-slot contract.
    pub fn on_writable(&mut self, handle: &mut R, cb: impl FnOnce(usize) -> bool + Send + 'static) {
        handle.on_writable(Box::new(cb));
    }
}

impl<R: ResponseHandle> Default for ResponseStreamer<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// A producer of response chunks, used by [`pipe`].
///
/// `next().await` yields `Some(chunk)` for each piece of data, `None` on a
/// clean end. The pipe drops the producer on abort or on an error chunk
/// (mirrored by returning `Err`).
pub trait ChunkProducer {
    fn next(&mut self) -> impl std::future::Future<Output = Option<Result<Vec<u8>, String>>> + Send;
}

/// Waits for one writable event by arming [`ResponseStreamer::on_writable`]
/// and parking on a one-shot [`tokio::sync::Notify`] until it fires.
async fn wait_for_writable<R: ResponseHandle>(streamer: &mut ResponseStreamer<R>, handle: &mut R) {
    let notify = std::sync::Arc::new(tokio::sync::Notify::new());
    let waiter = notify.clone();
    streamer.on_writable(handle, move |_offset| {
        waiter.notify_one();
        true
    });
    notify.notified().await;
}

/// Pipes a producer stream into the response, per the §4.3 pipe algorithm.
///
/// `is_aborted` is polled before forwarding each chunk so a mid-pipe abort
/// stops the producer rather than writing past it. On a partial write, the
/// pipe arms the transport's writable callback itself and waits on it before
/// the next `producer.next()` call — the "pause the producer inside the same
/// data handler" rule from §4.3 translated into pull-based terms, with no
/// externally-supplied wake-up needed.
pub async fn pipe<R, P>(
    streamer: &mut ResponseStreamer<R>,
    handle: &mut R,
    mut producer: P,
    status: &[u8],
    headers: &[(&str, &str)],
    mut is_aborted: impl FnMut() -> bool,
) -> Result<(), String>
where
    R: ResponseHandle,
    P: ChunkProducer,
{
    streamer.begin(handle, status, headers);

    loop {
        if is_aborted() {
            return Ok(());
        }

        match producer.next().await {
            Some(Ok(chunk)) => {
                if is_aborted() {
                    return Ok(());
                }
                if !streamer.write(handle, &chunk, false) {
                    wait_for_writable(streamer, handle).await;
                }
            }
            Some(Err(err)) => {
                if !is_aborted() {
                    streamer.end(handle, None, false);
                }
                return Err(err);
            }
            None => {
                if !is_aborted() {
                    streamer.end(handle, None, false);
                }
                return Ok(());
            }
        }
    }
}
