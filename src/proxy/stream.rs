//! Response streaming.
//!
//! # Data Flow
//! ```text
//! upstream body frames
//!     → copy task (pooled buffer, flush on interval / when full / per frame)
//!     → bounded channel
//!     → caller response body
//! ```
//!
//! # Design Decisions
//! - The copy runs in its own task so a slow caller never blocks the upstream read
//!   beyond the channel bound
//! - The buffer never grows past its nominal size; large frames are split
//! - A closed channel means the caller went away: the copy stops at once
//! - Trailers are flushed after the buffered data they follow

use axum::body::Body;
use bytes::Bytes;
use futures_util::stream;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::http::request::BoxError;
use crate::proxy::buffer_pool::{BufferPool, PooledBuffer};
use crate::proxy::classify::{classify, ErrorClass, RequestCanceled};
use crate::upstream::UpstreamBody;

const CHANNEL_DEPTH: usize = 8;

type FrameResult = Result<Frame<Bytes>, BoxError>;

/// When buffered bytes are pushed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// After every upstream frame.
    Immediate,
    /// At most this long after the first unflushed byte, or when the buffer fills.
    Interval(Duration),
}

/// How a copy ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Complete { bytes: u64 },
    /// The caller stopped reading.
    Canceled { bytes: u64 },
    /// Reading the upstream body failed.
    Failed { bytes: u64, class: ErrorClass },
}

/// Stream `body` to the caller through a pooled buffer. `on_done` runs in the
/// copy task once the copy ends and the buffer is back in the pool.
pub fn forward_body<F>(body: UpstreamBody, pool: BufferPool, policy: FlushPolicy, on_done: F) -> Body
where
    F: FnOnce(CopyOutcome) + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<FrameResult>(CHANNEL_DEPTH);
    tokio::spawn(async move {
        let outcome = {
            let buf = pool.get();
            copy_body(body, tx, buf, policy).await
        };
        on_done(outcome);
    });
    Body::new(StreamBody::new(stream::poll_fn(move |cx| rx.poll_recv(cx))))
}

struct Copier {
    tx: mpsc::Sender<FrameResult>,
    buf: PooledBuffer,
    bytes: u64,
}

impl Copier {
    /// Send buffered bytes. Err means the caller is gone.
    async fn flush(&mut self) -> Result<(), RequestCanceled> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = Bytes::copy_from_slice(&self.buf);
        self.buf.clear();
        self.bytes += chunk.len() as u64;
        self.send(Frame::data(chunk)).await
    }

    async fn send(&self, frame: Frame<Bytes>) -> Result<(), RequestCanceled> {
        self.tx.send(Ok(frame)).await.map_err(|_| RequestCanceled)
    }

    /// Buffer `data`, flushing each time the buffer fills.
    async fn write(&mut self, mut data: Bytes) -> Result<(), RequestCanceled> {
        while !data.is_empty() {
            let room = self.buf.nominal_size().saturating_sub(self.buf.len()).max(1);
            let take = room.min(data.len());
            self.buf.extend_from_slice(&data.split_to(take));
            if self.buf.is_full() {
                self.flush().await?;
            }
        }
        Ok(())
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn copy_body(
    mut body: UpstreamBody,
    tx: mpsc::Sender<FrameResult>,
    buf: PooledBuffer,
    policy: FlushPolicy,
) -> CopyOutcome {
    let mut copier = Copier { tx, buf, bytes: 0 };
    let mut ticker = match policy {
        FlushPolicy::Immediate => None,
        FlushPolicy::Interval(period) => {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        }
    };

    loop {
        let has_pending = !copier.buf.is_empty();
        tokio::select! {
            frame = body.frame() => {
                let result = match frame {
                    None => {
                        return match copier.flush().await {
                            Ok(()) => CopyOutcome::Complete { bytes: copier.bytes },
                            Err(_) => CopyOutcome::Canceled { bytes: copier.bytes },
                        };
                    }
                    Some(Err(e)) => {
                        let class = classify(e.as_ref());
                        let _ = copier.flush().await;
                        let _ = copier.tx.send(Err(e)).await;
                        return CopyOutcome::Failed { bytes: copier.bytes, class };
                    }
                    Some(Ok(frame)) => match frame.into_data() {
                        Ok(data) => {
                            let written = copier.write(data).await;
                            match (written, policy) {
                                (Ok(()), FlushPolicy::Immediate) => copier.flush().await,
                                (written, _) => written,
                            }
                        }
                        Err(frame) => match frame.into_trailers() {
                            Ok(trailers) => match copier.flush().await {
                                Ok(()) => copier.send(Frame::trailers(trailers)).await,
                                Err(e) => Err(e),
                            },
                            Err(_) => Ok(()),
                        },
                    },
                };
                if result.is_err() {
                    return CopyOutcome::Canceled { bytes: copier.bytes };
                }
            }
            _ = next_tick(&mut ticker), if has_pending => {
                if copier.flush().await.is_err() {
                    return CopyOutcome::Canceled { bytes: copier.bytes };
                }
            }
            _ = copier.tx.closed() => {
                return CopyOutcome::Canceled { bytes: copier.bytes };
            }
        }
    }
}
