//! Duplicating body wrapper.
//!
//! [`TeeBody`] sits between a body and whoever polls it. Each data frame is
//! appended to a [`Capture`] in the same poll that hands it on, so the
//! capture never lags behind or runs ahead of what the peer received.
//! Lifecycle events (clean end, stream error, early drop) are reported to a
//! [`TeeEvents`] implementation exactly once.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use hyper::body::{Body, Frame, SizeHint};

/// Shared, append-only byte buffer.
///
/// Cloning yields another handle to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    buf: Arc<Mutex<BytesMut>>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, data: &[u8]) {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
    }

    /// Copy of everything captured so far.
    pub fn snapshot(&self) -> Bytes {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        Bytes::copy_from_slice(&buf)
    }

    pub fn len(&self) -> usize {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Callbacks fired by a [`TeeBody`]. At most one of them runs per body.
pub trait TeeEvents {
    /// The wrapped body reached its end.
    fn on_end(&mut self) {}

    /// The wrapped body yielded an error.
    fn on_error(&mut self, _error: &dyn fmt::Display) {}

    /// The body was dropped before reaching its end.
    fn on_abort(&mut self) {}

    /// The body was dropped without being polled to completion.
    /// `complete` reports whether the wrapped body had nothing left to yield.
    fn on_drop(&mut self, complete: bool) {
        if complete {
            self.on_end();
        } else {
            self.on_abort();
        }
    }
}

impl TeeEvents for () {}

/// Body decorator that copies every data frame into a [`Capture`].
pub struct TeeBody<B, E = ()>
where
    B: Body,
    E: TeeEvents,
{
    inner: B,
    capture: Capture,
    events: E,
    settled: bool,
}

impl<B, E> TeeBody<B, E>
where
    B: Body<Data = Bytes> + Unpin,
    E: TeeEvents,
{
    pub fn new(inner: B, capture: Capture, events: E) -> Self {
        Self {
            inner,
            capture,
            events,
            settled: false,
        }
    }

    pub fn capture(&self) -> &Capture {
        &self.capture
    }

    fn settle_end(&mut self) {
        if !self.settled {
            self.settled = true;
            self.events.on_end();
        }
    }
}

impl<B, E> Body for TeeBody<B, E>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: fmt::Display,
    E: TeeEvents + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.capture.append(data);
                }
                if this.inner.is_end_stream() {
                    this.settle_end();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(err)) => {
                if !this.settled {
                    this.settled = true;
                    this.events.on_error(&err);
                }
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.settle_end();
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B, E> Drop for TeeBody<B, E>
where
    B: Body,
    E: TeeEvents,
{
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        // hyper stops polling once the length is satisfied, and never polls
        // a body that is already at its end.
        let complete = self.inner.is_end_stream();
        self.events.on_drop(complete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Empty, Full};
    use std::collections::VecDeque;
    use std::io;

    #[derive(Default)]
    struct Seen {
        ended: usize,
        errors: Vec<String>,
        aborted: usize,
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Seen>>);

    impl TeeEvents for Recorder {
        fn on_end(&mut self) {
            self.0.lock().unwrap().ended += 1;
        }
        fn on_error(&mut self, error: &dyn fmt::Display) {
            self.0.lock().unwrap().errors.push(error.to_string());
        }
        fn on_abort(&mut self) {
            self.0.lock().unwrap().aborted += 1;
        }
    }

    /// Body that yields a scripted sequence of chunks and errors, then
    /// stays pending forever if told to.
    struct Scripted {
        items: VecDeque<Result<Bytes, io::Error>>,
        hang: bool,
    }

    impl Body for Scripted {
        type Data = Bytes;
        type Error = io::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
            match self.items.pop_front() {
                Some(item) => Poll::Ready(Some(item.map(Frame::data))),
                None if self.hang => Poll::Pending,
                None => Poll::Ready(None),
            }
        }
    }

    #[tokio::test]
    async fn duplicates_arbitrary_bytes() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let recorder = Recorder::default();
        let body = TeeBody::new(
            Full::new(Bytes::from(payload.clone())),
            Capture::new(),
            recorder.clone(),
        );
        let capture = body.capture().clone();

        let relayed = body.collect().await.unwrap().to_bytes();
        assert_eq!(relayed, payload);
        assert_eq!(capture.snapshot(), payload);
        assert_eq!(recorder.0.lock().unwrap().ended, 1);
    }

    #[tokio::test]
    async fn empty_body_reports_end_on_drop() {
        let recorder = Recorder::default();
        let body = TeeBody::new(Empty::<Bytes>::new(), Capture::new(), recorder.clone());
        assert!(body.is_end_stream());
        drop(body);

        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.ended, 1);
        assert_eq!(seen.aborted, 0);
    }

    #[tokio::test]
    async fn error_keeps_partial_capture() {
        let recorder = Recorder::default();
        let inner = Scripted {
            items: VecDeque::from([
                Ok(Bytes::from_static(b"part")),
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated")),
            ]),
            hang: false,
        };
        let mut body = TeeBody::new(inner, Capture::new(), recorder.clone());

        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), "part");
        assert!(body.frame().await.unwrap().is_err());
        let capture = body.capture().clone();
        drop(body);

        assert_eq!(capture.snapshot(), "part");
        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.errors, vec!["truncated".to_string()]);
        assert_eq!(seen.ended, 0);
        assert_eq!(seen.aborted, 0);
    }

    #[tokio::test]
    async fn drop_mid_stream_aborts() {
        let recorder = Recorder::default();
        let inner = Scripted {
            items: VecDeque::from([Ok(Bytes::from_static(b"abc"))]),
            hang: true,
        };
        let mut body = TeeBody::new(inner, Capture::new(), recorder.clone());
        body.frame().await.unwrap().unwrap();
        let capture = body.capture().clone();
        drop(body);

        assert_eq!(capture.snapshot(), "abc");
        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.aborted, 1);
        assert_eq!(seen.ended, 0);
    }

    #[test]
    fn capture_handles_share_buffer() {
        let a = Capture::new();
        let b = a.clone();
        a.append(b"x");
        b.append(b"y");
        assert_eq!(a.snapshot(), "xy");
        assert_eq!(b.len(), 2);
        assert!(!a.is_empty());
    }
}
