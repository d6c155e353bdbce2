//! Per-viewer output stream.
//!
//! A [`ViewerStream`] replays the session's scrollback as its first frame,
//! then forwards live output in arrival order. Dropping the stream (the
//! HTTP client went away) detaches the viewer; the session keeps running.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use axum::response::sse::Event;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    listeners::{ListenerId, SessionEvent, SubscriberStream},
    manager::SessionManager,
    session::SessionId,
};

pub const EXIT_EVENT: &str = "exit";
pub const CLOSED_EVENT: &str = "closed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Output(Bytes),
    Exit { exit_code: Option<u32> },
    /// The requested session does not exist or already ended.
    Closed { reason: &'static str },
}

impl StreamFrame {
    /// SSE event name; output frames are unnamed so `EventSource.onmessage`
    /// receives them.
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            StreamFrame::Output(_) => None,
            StreamFrame::Exit { .. } => Some(EXIT_EVENT),
            StreamFrame::Closed { .. } => Some(CLOSED_EVENT),
        }
    }

    pub fn data(&self) -> String {
        match self {
            StreamFrame::Output(bytes) => STANDARD.encode(bytes),
            StreamFrame::Exit { exit_code } => {
                serde_json::json!({ "exit_code": exit_code }).to_string()
            }
            StreamFrame::Closed { reason } => serde_json::json!({ "reason": reason }).to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamFrame::Output(_))
    }

    pub fn into_event(self) -> Event {
        let event = Event::default().data(self.data());
        match self.event_name() {
            Some(name) => event.event(name),
            None => event,
        }
    }
}

pub struct ViewerStream {
    manager: SessionManager,
    session_id: SessionId,
    listener: Option<ListenerId>,
    first: Option<StreamFrame>,
    rx: Option<SubscriberStream>,
    frames_sent: usize,
}

impl ViewerStream {
    /// Attach to `session_id`. An unknown or dead session yields a stream
    /// with a single [`StreamFrame::Closed`] frame.
    pub fn open(manager: &SessionManager, session_id: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        match manager.attach_listener(session_id, tx) {
            Ok((listener, snapshot)) => {
                info!(
                    "[stream:{}] Viewer {} attached (scrollback: {} bytes)",
                    session_id,
                    listener,
                    snapshot.len()
                );
                Self {
                    manager: manager.clone(),
                    session_id: session_id.to_string(),
                    listener: Some(listener),
                    first: (!snapshot.is_empty()).then_some(StreamFrame::Output(snapshot)),
                    rx: Some(rx),
                    frames_sent: 0,
                }
            }
            Err(e) => {
                warn!("[stream:{}] Attach refused: {}", session_id, e);
                Self {
                    manager: manager.clone(),
                    session_id: session_id.to_string(),
                    listener: None,
                    first: Some(StreamFrame::Closed {
                        reason: "session_not_found",
                    }),
                    rx: None,
                    frames_sent: 0,
                }
            }
        }
    }
}

impl Stream for ViewerStream {
    type Item = StreamFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(frame) = this.first.take() {
            this.frames_sent += 1;
            return Poll::Ready(Some(frame));
        }

        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(None);
        };

        let frame = match rx.poll_recv(cx) {
            Poll::Ready(Some(SessionEvent::Output(data))) => StreamFrame::Output(data),
            Poll::Ready(Some(SessionEvent::Exit { exit_code })) => {
                info!("[stream:{}] Session ended ({:?})", this.session_id, exit_code);
                StreamFrame::Exit { exit_code }
            }
            Poll::Ready(None) => {
                this.rx = None;
                return Poll::Ready(None);
            }
            Poll::Pending => return Poll::Pending,
        };

        // Nothing follows a terminal frame.
        if frame.is_terminal() {
            this.rx = None;
        }
        this.frames_sent += 1;
        Poll::Ready(Some(frame))
    }
}

impl Drop for ViewerStream {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.manager.detach_listener(&self.session_id, listener);
            debug!(
                "[stream:{}] Viewer {} detached after {} frames",
                self.session_id, listener, self.frames_sent
            );
        }
    }
}
