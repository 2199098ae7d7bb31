//! Turn completion and the streamed-turn handle
//!
//! A turn reaches durable storage only as a complete `[user, assistant]`
//! pair. For streamed turns that happens after the last fragment has been
//! delivered; a stream that fails or is dropped early persists nothing.

use crate::engine::locks::ThreadGuard;
use crate::engine::title::summarize_title;
use crate::engine::InvocationConfig;
use crate::error::{ParleyError, Result};
use crate::providers::{ClientFactory, Message, TextStream};
use crate::storage::{CheckpointStore, SessionStore};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// Store handles needed to record a finished turn
#[derive(Clone)]
pub(crate) struct TurnRecorder {
    pub sessions: Arc<dyn SessionStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub gateway: Arc<dyn ClientFactory>,
}

impl TurnRecorder {
    /// Persist a successful turn and return the new title, if one was set
    ///
    /// The checkpoint append is the commit point. Failing it is reported as
    /// `UnpersistedReply`; later bookkeeping failures are only logged since
    /// the turn itself is already durable.
    pub async fn record(
        &self,
        thread_id: &str,
        config: &InvocationConfig,
        user: Message,
        reply: Message,
        first_turn: bool,
    ) -> Result<Option<String>> {
        let reply_text = reply.content.clone();
        if let Err(e) = self.checkpoints.append_turn(thread_id, &[user.clone(), reply]) {
            tracing::error!(thread_id, "Failed to record turn: {:#}", e);
            return Err(ParleyError::UnpersistedReply {
                thread_id: thread_id.to_string(),
                reply: reply_text,
                cause: format!("{:#}", e),
            }
            .into());
        }

        if let Err(e) = self.sessions.touch(thread_id) {
            tracing::warn!(thread_id, "Failed to update session activity: {:#}", e);
        }

        if !first_turn {
            return Ok(None);
        }

        let title = summarize_title(self.gateway.as_ref(), config, &user.content).await;
        match self.sessions.update_title(thread_id, &title) {
            Ok(()) => Ok(Some(title)),
            Err(e) => {
                tracing::warn!(thread_id, "Failed to store session title: {:#}", e);
                Ok(None)
            }
        }
    }
}

/// Everything a streamed turn owns until it finishes
struct StreamState {
    fragments: TextStream,
    recorder: TurnRecorder,
    config: InvocationConfig,
    thread_id: String,
    user: Message,
    first_turn: bool,
    buffer: String,
    title: Arc<Mutex<Option<String>>>,
    guard: Option<ThreadGuard>,
    finished: bool,
}

/// A streamed reply for one turn
///
/// Yields text fragments as the provider produces them. When the provider
/// signals completion the accumulated reply is persisted before the stream
/// ends; if that fails, one final `Err` carrying
/// `ParleyError::UnpersistedReply` is yielded. A provider failure is
/// yielded as an `Err` item and nothing is persisted.
///
/// The thread stays locked until the stream finishes or is dropped.
pub struct TurnStream {
    thread_id: String,
    title: Arc<Mutex<Option<String>>>,
    inner: BoxStream<'static, Result<String>>,
}

impl TurnStream {
    pub(crate) fn new(
        thread_id: String,
        fragments: TextStream,
        recorder: TurnRecorder,
        config: InvocationConfig,
        user: Message,
        first_turn: bool,
        guard: ThreadGuard,
    ) -> Self {
        let title = Arc::new(Mutex::new(None));
        let state = StreamState {
            fragments,
            recorder,
            config,
            thread_id: thread_id.clone(),
            user,
            first_turn,
            buffer: String::new(),
            title: Arc::clone(&title),
            guard: Some(guard),
            finished: false,
        };

        let inner = futures::stream::unfold(state, |mut st| async move {
            if st.finished {
                return None;
            }

            match st.fragments.next().await {
                Some(Ok(fragment)) => {
                    st.buffer.push_str(&fragment);
                    Some((Ok(fragment), st))
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.guard.take();
                    tracing::warn!(
                        thread_id = %st.thread_id,
                        partial_chars = st.buffer.chars().count(),
                        "Streamed turn failed, nothing persisted: {}",
                        e
                    );
                    Some((Err(e), st))
                }
                None => {
                    st.finished = true;
                    let reply = Message::assistant(std::mem::take(&mut st.buffer));
                    let outcome = st
                        .recorder
                        .record(
                            &st.thread_id,
                            &st.config,
                            st.user.clone(),
                            reply,
                            st.first_turn,
                        )
                        .await;
                    st.guard.take();

                    match outcome {
                        Ok(title) => {
                            tracing::info!(thread_id = %st.thread_id, "Streamed turn persisted");
                            *st.title.lock().unwrap_or_else(|e| e.into_inner()) = title;
                            None
                        }
                        Err(e) => Some((Err(e), st)),
                    }
                }
            }
        })
        .boxed();

        Self {
            thread_id,
            title,
            inner,
        }
    }

    /// Thread this turn belongs to
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Title assigned by this turn, available once the stream has ended
    pub fn title(&self) -> Option<String> {
        self.title.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Drain the stream, returning the full reply text
    ///
    /// # Errors
    ///
    /// Returns the first error the stream yields
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for TurnStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for TurnStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnStream")
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}
