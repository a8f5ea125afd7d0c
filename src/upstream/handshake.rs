//! HTTP/1.1 upgrade handshakes written as spelled.
//!
//! hyper re-cases header names when it serializes a request, which undoes the
//! `Sec-WebSocket-*` respelling. Upgrade requests are therefore written from
//! the outbound [`HeaderBag`](crate::http::HeaderBag) byte for byte and the
//! response head is parsed here. A `101` reply hands the connection over in an
//! [`UpgradedStream`] response extension; any other reply is read as an
//! ordinary HTTP/1.1 response.

use bytes::{Bytes, BytesMut};
use futures_util::stream;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Method, Response, StatusCode, Uri, Version};
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::Frame;
use hyper_util::rt::TokioIo;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::sync::mpsc;
use tower::Service;

use crate::http::headers::values_contain_token;
use crate::http::request::{BoxError, OutboundRequest};
use crate::upstream::UpstreamBody;

const MAX_HEAD: usize = 64 * 1024;
const MAX_HEADERS: usize = 128;
const MAX_LINE: u64 = 8 * 1024;
const READ_CHUNK: usize = 16 * 1024;
const CHANNEL_DEPTH: usize = 4;

/// Byte stream of a switched connection.
pub trait UpgradeIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> UpgradeIo for T {}

/// Upstream connection switched by a `101` reply. Taken at most once.
#[derive(Clone)]
pub struct UpgradedStream(Arc<Mutex<Option<Box<dyn UpgradeIo>>>>);

impl UpgradedStream {
    pub fn new(io: Box<dyn UpgradeIo>) -> Self {
        Self(Arc::new(Mutex::new(Some(io))))
    }

    pub fn take(&self) -> Option<Box<dyn UpgradeIo>> {
        self.0.lock().expect("upgraded stream mutex poisoned").take()
    }
}

/// Request line, `Host` and the bag's headers as spelled, plus `Content-Length` for a body.
pub fn encode_head(req: &OutboundRequest) -> Vec<u8> {
    let mut head = Vec::with_capacity(512);
    head.extend_from_slice(req.method.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(req.path_and_query().as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");
    if !req.host.is_empty() {
        push_header(&mut head, "Host", req.host.as_bytes());
    }
    for (name, value) in req.headers.iter() {
        if name.eq_ignore_ascii_case("Host") || name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        push_header(&mut head, name, value.as_bytes());
    }
    if !req.body.is_empty() {
        push_header(&mut head, "Content-Length", req.body.len().to_string().as_bytes());
    }
    head.extend_from_slice(b"\r\n");
    head
}

fn push_header(head: &mut Vec<u8>, name: &str, value: &[u8]) {
    head.extend_from_slice(name.as_bytes());
    head.extend_from_slice(b": ");
    head.extend_from_slice(value);
    head.extend_from_slice(b"\r\n");
}

/// Dial through `connector`, write the request and read the reply head.
pub async fn round_trip<C>(mut connector: C, req: OutboundRequest) -> Result<Response<UpstreamBody>, BoxError>
where
    C: Service<Uri> + Send,
    C::Response: hyper::rt::Read + hyper::rt::Write + Send + Unpin + 'static,
    C::Error: Into<BoxError>,
    C::Future: Send,
{
    if req.request_uri.is_some() {
        return Err("request-uri can't be set in outbound requests".into());
    }
    let uri = req.uri()?;
    let head = encode_head(&req);

    futures_util::future::poll_fn(|cx| connector.poll_ready(cx))
        .await
        .map_err(Into::<BoxError>::into)?;
    let conn = connector.call(uri).await.map_err(Into::<BoxError>::into)?;
    let mut io = TokioIo::new(conn);

    io.write_all(&head).await?;
    if !req.body.is_empty() {
        io.write_all(&req.body).await?;
    }
    io.flush().await?;

    let (mut parts, leftover) = read_response_head(&mut io).await?;
    let io = Prefixed {
        prefix: leftover,
        inner: io,
    };

    if parts.status == StatusCode::SWITCHING_PROTOCOLS {
        parts.extensions.insert(UpgradedStream::new(Box::new(io)));
        let body = Empty::<Bytes>::new().map_err(|never| match never {}).boxed();
        return Ok(Response::from_parts(parts, body));
    }

    let framing = Framing::of(&req.method, parts.status, &parts.headers);
    let body = response_body(framing, io);
    Ok(Response::from_parts(parts, body))
}

/// Parse the reply head. Returns it with any bytes read past it.
async fn read_response_head<R>(io: &mut R) -> Result<(http::response::Parts, Bytes), BoxError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        if io.read_buf(&mut buf).await? == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut headers);
        match parsed.parse(&buf)? {
            httparse::Status::Complete(len) => {
                let status = StatusCode::from_u16(parsed.code.unwrap_or_default())?;
                let mut builder = Response::builder().status(status).version(Version::HTTP_11);
                for header in parsed.headers.iter() {
                    builder = builder.header(
                        HeaderName::from_bytes(header.name.as_bytes())?,
                        HeaderValue::from_bytes(header.value)?,
                    );
                }
                let (parts, ()) = builder.body(())?.into_parts();
                let leftover = buf.split_off(len).freeze();
                return Ok((parts, leftover));
            }
            httparse::Status::Partial if buf.len() > MAX_HEAD => {
                return Err("upstream response head too large".into());
            }
            httparse::Status::Partial => {}
        }
    }
}

/// How the reply body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

impl Framing {
    fn of(method: &Method, status: StatusCode, headers: &HeaderMap) -> Self {
        if method == Method::HEAD
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            return Framing::Empty;
        }
        if values_contain_token(headers.get_all(TRANSFER_ENCODING).iter(), "chunked") {
            return Framing::Chunked;
        }
        let length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        match length {
            Some(0) => Framing::Empty,
            Some(n) => Framing::Length(n),
            None => Framing::UntilClose,
        }
    }
}

type FrameSender = mpsc::Sender<Result<Frame<Bytes>, BoxError>>;

fn response_body<R>(framing: Framing, io: R) -> UpstreamBody
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (tx, mut rx) = mpsc::channel(CHANNEL_DEPTH);
    if framing != Framing::Empty {
        tokio::spawn(async move {
            let mut reader = BufReader::new(io);
            if let Err(e) = read_body(&mut reader, framing, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });
    }
    StreamBody::new(stream::poll_fn(move |cx| rx.poll_recv(cx))).boxed()
}

async fn read_body<R>(reader: &mut R, framing: Framing, tx: &FrameSender) -> Result<(), BoxError>
where
    R: AsyncBufRead + Unpin,
{
    match framing {
        Framing::Empty => Ok(()),
        Framing::UntilClose => {
            copy_frames(reader, tx).await?;
            Ok(())
        }
        Framing::Length(expected) => {
            if let Some(copied) = copy_frames(&mut (&mut *reader).take(expected), tx).await? {
                if copied < expected {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                }
            }
            Ok(())
        }
        Framing::Chunked => loop {
            let size = read_chunk_size(reader).await?;
            if size == 0 {
                let trailers = read_trailers(reader).await?;
                if !trailers.is_empty() {
                    let _ = tx.send(Ok(Frame::trailers(trailers))).await;
                }
                return Ok(());
            }
            match copy_frames(&mut (&mut *reader).take(size), tx).await? {
                None => return Ok(()),
                Some(copied) if copied < size => {
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                }
                Some(_) => {}
            }
            if !read_line(reader).await?.is_empty() {
                return Err(invalid_data("missing CRLF after chunk"));
            }
        },
    }
}

/// Copy until EOF. `None` when the receiver went away.
async fn copy_frames<R>(reader: &mut R, tx: &FrameSender) -> io::Result<Option<u64>>
where
    R: AsyncRead + Unpin,
{
    let mut copied = 0u64;
    loop {
        let mut chunk = BytesMut::with_capacity(READ_CHUNK);
        let n = reader.read_buf(&mut chunk).await?;
        if n == 0 {
            return Ok(Some(copied));
        }
        copied += n as u64;
        if tx.send(Ok(Frame::data(chunk.freeze()))).await.is_err() {
            return Ok(None);
        }
    }
}

/// One line without its terminator. EOF before a newline is an error.
async fn read_line<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    (&mut *reader).take(MAX_LINE).read_line(&mut line).await?;
    if !line.ends_with('\n') {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn read_chunk_size<R>(reader: &mut R) -> Result<u64, BoxError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    let size = line.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size, 16).map_err(|_| invalid_data("bad chunk size"))
}

async fn read_trailers<R>(reader: &mut R) -> Result<HeaderMap, BoxError>
where
    R: AsyncBufRead + Unpin,
{
    let mut trailers = HeaderMap::new();
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            return Ok(trailers);
        }
        let (name, value) = line.split_once(':').ok_or_else(|| invalid_data("bad trailer line"))?;
        trailers.append(
            HeaderName::from_bytes(name.trim().as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }
}

fn invalid_data(msg: &'static str) -> BoxError {
    Box::new(io::Error::new(io::ErrorKind::InvalidData, msg))
}

/// Replays bytes read past the response head before reading from `inner`.
struct Prefixed<S> {
    prefix: Bytes,
    inner: S,
}

impl<S: AsyncRead + Unpin> AsyncRead for Prefixed<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix.split_to(n));
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Prefixed<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
