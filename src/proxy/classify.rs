//! Transport failure classification.
//!
//! Maps a failed upstream dispatch to the status code the caller sees.
//!
//! | Class | Status |
//! |---|---|
//! | unexpected end of stream | 502 |
//! | operation canceled | 499 |
//! | network error, timed out | 504 |
//! | network error | 502 |
//! | anything else | 500 |
//!
//! The whole `source()` chain is inspected. End-of-stream is checked first,
//! then cancellation, then network errors, since a canceled operation can also
//! look like a network failure.

use axum::http::StatusCode;
use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Non-standard "client closed request".
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Why an upstream exchange failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    EndOfStream,
    Canceled,
    Timeout,
    Network,
    Other,
}

impl ErrorClass {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorClass::EndOfStream | ErrorClass::Network => StatusCode::BAD_GATEWAY,
            ErrorClass::Canceled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ErrorClass::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorClass::Other => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::EndOfStream => "end_of_stream",
            ErrorClass::Canceled => "canceled",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Network => "network",
            ErrorClass::Other => "other",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The caller went away before the exchange finished.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestCanceled;

impl fmt::Display for RequestCanceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation canceled")
    }
}

impl StdError for RequestCanceled {}

/// Classify a dispatch failure.
pub fn classify(err: &(dyn StdError + 'static)) -> ErrorClass {
    let chain = || std::iter::successors(Some(err), |e| (*e).source());

    if chain().any(is_end_of_stream) {
        return ErrorClass::EndOfStream;
    }
    if chain().any(is_canceled) {
        return ErrorClass::Canceled;
    }
    match chain().find_map(network_timeout) {
        Some(true) => ErrorClass::Timeout,
        Some(false) => ErrorClass::Network,
        None => ErrorClass::Other,
    }
}

/// Status code for a dispatch failure.
pub fn status_for(err: &(dyn StdError + 'static)) -> StatusCode {
    classify(err).status()
}

/// Status line reason text written as the error body.
pub fn status_text(status: StatusCode) -> &'static str {
    match status.as_u16() {
        CLIENT_CLOSED_REQUEST => "Client Closed Request",
        _ => status.canonical_reason().unwrap_or("Unknown Status"),
    }
}

fn is_end_of_stream(err: &(dyn StdError + 'static)) -> bool {
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        return io_err.kind() == io::ErrorKind::UnexpectedEof;
    }
    if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
        return hyper_err.is_incomplete_message();
    }
    false
}

fn is_canceled(err: &(dyn StdError + 'static)) -> bool {
    if err.is::<RequestCanceled>() {
        return true;
    }
    if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
        return hyper_err.is_canceled();
    }
    false
}

/// `Some(timed_out)` when `err` is a network-level failure.
fn network_timeout(err: &(dyn StdError + 'static)) -> Option<bool> {
    if err.is::<tokio::time::error::Elapsed>() {
        return Some(true);
    }
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        return match io_err.kind() {
            io::ErrorKind::TimedOut => Some(true),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrInUse
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe => Some(false),
            _ => None,
        };
    }
    if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
        if hyper_err.is_timeout() {
            return Some(true);
        }
        if hyper_err.is_user() || hyper_err.is_parse() {
            return None;
        }
        return Some(false);
    }
    if let Some(client_err) = err.downcast_ref::<hyper_util::client::legacy::Error>() {
        if client_err.is_connect() {
            // The io::Error further down the chain says whether it timed out.
            let timed_out = std::iter::successors(err.source(), |e| (*e).source())
                .any(|e| network_timeout(e) == Some(true));
            return Some(timed_out);
        }
    }
    None
}
