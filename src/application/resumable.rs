//! Resumable stream engine.
//!
//! Decouples "a stream of generated tokens exists and is being written"
//! from "an HTTP response is still open to deliver it". Each generation is
//! published under a [`StreamId`] by a supervised background task that
//! drains the model source to completion regardless of whether any client
//! is still connected; subscribers attach at any point and receive the
//! buffered frames followed by the live ones.
//!
//! The broker is in-process: a bounded replay buffer (drop-oldest) plus a
//! bounded `tokio::sync::broadcast` channel per stream. A slow subscriber
//! lags on the broadcast side and resynchronizes from the replay buffer;
//! it never stalls the publisher.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::domain::{MessageId, StreamId};
use crate::ports::{ModelChunk, TokenStream};

/// One frame of deliverable output, serialized onto the wire as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// Generation started; carries the assistant message id.
    #[serde(rename_all = "camelCase")]
    Start { message_id: MessageId },
    /// Incremental answer text.
    TextDelta { delta: String },
    /// Incremental reasoning trace.
    ReasoningDelta { delta: String },
    /// The generation failed; no more frames follow.
    Error { message: String },
    /// The generation completed; no more frames follow.
    Finish,
}

impl StreamEvent {
    /// Whether this frame ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error { .. } | StreamEvent::Finish)
    }
}

/// Assembled result of one generation, handed to the completion callback.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// Assistant message id announced in the `Start` frame.
    pub message_id: MessageId,
    /// Full answer text, possibly partial if the source failed mid-stream.
    pub text: String,
    /// Full reasoning trace, possibly partial.
    pub reasoning: String,
    /// Upstream failure, if the source ended with one.
    pub error: Option<String>,
}

/// A deliverable sequence of frames for one subscriber.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Invoked exactly once when the source stream ends, normally or not.
pub type CompletionCallback = Box<dyn FnOnce(StreamOutcome) -> BoxFuture<'static, ()> + Send>;

/// Tuning for the in-process broker.
#[derive(Debug, Clone)]
pub struct StreamContextConfig {
    /// Frames retained for late subscribers; oldest dropped beyond this.
    pub replay_capacity: usize,
    /// Per-subscriber live buffer; lagging past this triggers a resync.
    pub broadcast_capacity: usize,
    /// Grace period a finished channel stays resumable before teardown.
    pub retention: Duration,
}

impl Default for StreamContextConfig {
    fn default() -> Self {
        Self {
            replay_capacity: 4096,
            broadcast_capacity: 256,
            retention: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct Frame {
    seq: u64,
    event: StreamEvent,
}

struct StreamChannel {
    frames: RwLock<VecDeque<Frame>>,
    sender: broadcast::Sender<Frame>,
    // Flipped after the completion callback has run; Drop-guarded so
    // subscribers are released even if the publish task dies early.
    done: watch::Sender<bool>,
}

struct Inner {
    config: StreamContextConfig,
    channels: RwLock<HashMap<StreamId, Arc<StreamChannel>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The stream engine. Cheap to clone; constructed once at startup and
/// injected wherever streams are created or resumed.
#[derive(Clone)]
pub struct ResumableStreamContext {
    inner: Arc<Inner>,
}

impl ResumableStreamContext {
    /// Creates a context with the given broker tuning.
    pub fn new(config: StreamContextConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                channels: RwLock::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers `stream_id` as the canonical channel for a freshly started
    /// generation and returns the deliverable stream for the initiating
    /// request.
    ///
    /// The source is drained by a spawned task whose lifetime is independent
    /// of any HTTP connection; `on_complete` runs exactly once when the
    /// source ends, with whatever output was produced by then. Reusing a
    /// stream id replaces the previous channel (last-write-wins).
    pub async fn create_new_resumable_stream(
        &self,
        stream_id: StreamId,
        message_id: MessageId,
        source: TokenStream,
        on_complete: CompletionCallback,
    ) -> EventStream {
        let (sender, _) = broadcast::channel(self.inner.config.broadcast_capacity);
        let (done, _) = watch::channel(false);
        let channel = Arc::new(StreamChannel {
            frames: RwLock::new(VecDeque::new()),
            sender,
            done,
        });

        self.inner
            .channels
            .write()
            .await
            .insert(stream_id, channel.clone());

        // Attach before the publisher starts so the initiating request
        // observes the stream from the first frame.
        let events = Self::attach(channel.clone());

        let inner = self.inner.clone();
        let handle = tokio::spawn(Self::publish(
            inner.clone(),
            stream_id,
            message_id,
            channel,
            source,
            on_complete,
        ));

        let mut tasks = self.inner.tasks.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);

        events
    }

    /// Subscribes to the channel for `stream_id`.
    ///
    /// The subscriber receives every retained frame followed by everything
    /// published thereafter. Returns `None` when the id is unknown or the
    /// channel has already been torn down, which callers surface as "no
    /// longer resumable" rather than an error.
    pub async fn resume_existing_stream(&self, stream_id: &StreamId) -> Option<EventStream> {
        let channel = self.inner.channels.read().await.get(stream_id).cloned()?;
        Some(Self::attach(channel))
    }

    /// Blocks until the generation behind `stream_id` has completed and its
    /// completion callback has run. Returns false for unknown ids.
    pub async fn wait_until_complete(&self, stream_id: &StreamId) -> bool {
        let channel = self.inner.channels.read().await.get(stream_id).cloned();
        let Some(channel) = channel else {
            return false;
        };
        let mut done = channel.done.subscribe();
        loop {
            if *done.borrow() {
                return true;
            }
            if done.changed().await.is_err() {
                return *done.borrow();
            }
        }
    }

    /// Number of channels currently held, finished-but-retained included.
    pub async fn active_streams(&self) -> usize {
        self.inner.channels.read().await.len()
    }

    /// Awaits all in-flight publish tasks so no generation or persistence
    /// work is abandoned on shutdown.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = {
            let mut tasks = self.inner.tasks.lock().await;
            tasks.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "stream publish task failed");
            }
        }
    }

    async fn publish(
        inner: Arc<Inner>,
        stream_id: StreamId,
        message_id: MessageId,
        channel: Arc<StreamChannel>,
        mut source: TokenStream,
        on_complete: CompletionCallback,
    ) {
        // Releases waiting subscribers even if this task unwinds.
        let _guard = DoneGuard {
            done: channel.done.clone(),
        };

        let replay_capacity = inner.config.replay_capacity;
        let mut seq = 0u64;
        let mut text = String::new();
        let mut reasoning = String::new();
        let mut error: Option<String> = None;

        Self::emit(
            &channel,
            &mut seq,
            StreamEvent::Start {
                message_id: message_id.clone(),
            },
            replay_capacity,
        )
        .await;

        while let Some(item) = source.receiver.recv().await {
            match item {
                Ok(ModelChunk::TextDelta(delta)) => {
                    text.push_str(&delta);
                    Self::emit(
                        &channel,
                        &mut seq,
                        StreamEvent::TextDelta { delta },
                        replay_capacity,
                    )
                    .await;
                }
                Ok(ModelChunk::ReasoningDelta(delta)) => {
                    reasoning.push_str(&delta);
                    Self::emit(
                        &channel,
                        &mut seq,
                        StreamEvent::ReasoningDelta { delta },
                        replay_capacity,
                    )
                    .await;
                }
                Ok(ModelChunk::Done) => break,
                Err(e) => {
                    tracing::error!(stream = %stream_id, error = %e, "model stream failed");
                    error = Some(e.to_string());
                    Self::emit(
                        &channel,
                        &mut seq,
                        StreamEvent::Error {
                            message: "The model stream ended unexpectedly".to_string(),
                        },
                        replay_capacity,
                    )
                    .await;
                    break;
                }
            }
        }

        if error.is_none() {
            Self::emit(&channel, &mut seq, StreamEvent::Finish, replay_capacity).await;
        }

        on_complete(StreamOutcome {
            message_id,
            text,
            reasoning,
            error,
        })
        .await;

        tracing::debug!(stream = %stream_id, frames = seq, "stream published to completion");

        // Teardown after the grace period, off this task so shutdown does
        // not wait out the retention window.
        let retention = inner.config.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            inner.channels.write().await.remove(&stream_id);
        });
    }

    async fn emit(channel: &StreamChannel, seq: &mut u64, event: StreamEvent, capacity: usize) {
        let frame = Frame { seq: *seq, event };
        *seq += 1;
        {
            let mut frames = channel.frames.write().await;
            if frames.len() >= capacity {
                frames.pop_front();
            }
            frames.push_back(frame.clone());
        }
        // No subscribers is fine; the replay buffer carries the history.
        let _ = channel.sender.send(frame);
    }

    fn attach(channel: Arc<StreamChannel>) -> EventStream {
        let rx = channel.sender.subscribe();
        let done = channel.done.subscribe();
        let sub = Subscriber {
            channel,
            rx,
            done,
            replay: VecDeque::new(),
            primed: false,
            next_seq: 0,
            finished: false,
        };
        Box::pin(stream::unfold(sub, |mut sub| async move {
            loop {
                if !sub.primed {
                    sub.primed = true;
                    let frames = sub.channel.frames.read().await;
                    sub.replay = frames.iter().cloned().collect();
                }

                if let Some(frame) = sub.replay.pop_front() {
                    if frame.seq < sub.next_seq {
                        continue;
                    }
                    sub.next_seq = frame.seq + 1;
                    sub.finished = frame.event.is_terminal();
                    return Some((frame.event, sub));
                }

                if sub.finished {
                    return None;
                }

                // The publisher may have finished (or died) before we got
                // here; drain the buffer rather than waiting on a change
                // notification that already happened.
                if *sub.done.borrow() {
                    sub.resync().await;
                    if sub.replay.is_empty() {
                        return None;
                    }
                    continue;
                }

                tokio::select! {
                    received = sub.rx.recv() => match received {
                        Ok(frame) => {
                            if frame.seq < sub.next_seq {
                                continue;
                            }
                            sub.next_seq = frame.seq + 1;
                            sub.finished = frame.event.is_terminal();
                            return Some((frame.event, sub));
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "subscriber lagged, resyncing from replay buffer");
                            sub.resync().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            sub.resync().await;
                            if sub.replay.is_empty() {
                                return None;
                            }
                        }
                    },
                    _ = sub.done.changed() => {
                        // Publisher finished (or died); drain what remains.
                        sub.resync().await;
                        if sub.replay.is_empty() {
                            return None;
                        }
                    }
                }
            }
        }))
    }
}

struct Subscriber {
    channel: Arc<StreamChannel>,
    rx: broadcast::Receiver<Frame>,
    done: watch::Receiver<bool>,
    replay: VecDeque<Frame>,
    primed: bool,
    next_seq: u64,
    finished: bool,
}

impl Subscriber {
    async fn resync(&mut self) {
        let frames = self.channel.frames.read().await;
        self.replay = frames
            .iter()
            .filter(|f| f.seq >= self.next_seq)
            .cloned()
            .collect();
    }
}

struct DoneGuard {
    done: watch::Sender<bool>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.done.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ModelError;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn context() -> ResumableStreamContext {
        ResumableStreamContext::new(StreamContextConfig::default())
    }

    fn noop_callback() -> CompletionCallback {
        Box::new(|_| Box::pin(async {}))
    }

    fn scripted_source(chunks: Vec<Result<ModelChunk, ModelError>>) -> TokenStream {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });
        TokenStream { receiver: rx }
    }

    fn hello_world_chunks() -> Vec<Result<ModelChunk, ModelError>> {
        vec![
            Ok(ModelChunk::TextDelta("Hello".to_string())),
            Ok(ModelChunk::TextDelta(" world".to_string())),
            Ok(ModelChunk::Done),
        ]
    }

    async fn collect(stream: EventStream) -> Vec<StreamEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn initiating_subscriber_sees_full_sequence() {
        let ctx = context();
        let id = StreamId::new();
        let events = ctx
            .create_new_resumable_stream(
                id,
                MessageId::from_string("m1"),
                scripted_source(hello_world_chunks()),
                noop_callback(),
            )
            .await;

        let events = collect(events).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Start {
                    message_id: MessageId::from_string("m1")
                },
                StreamEvent::TextDelta {
                    delta: "Hello".to_string()
                },
                StreamEvent::TextDelta {
                    delta: " world".to_string()
                },
                StreamEvent::Finish,
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_resumers_see_identical_sequences() {
        let ctx = context();
        let id = StreamId::new();

        // Slow source so both subscribers attach mid-flight.
        let (tx, rx) = mpsc::channel(16);
        let _events = ctx
            .create_new_resumable_stream(
                id,
                MessageId::from_string("m1"),
                TokenStream { receiver: rx },
                noop_callback(),
            )
            .await;

        tx.send(Ok(ModelChunk::TextDelta("one ".to_string())))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        let first = ctx.resume_existing_stream(&id).await.unwrap();
        let second = ctx.resume_existing_stream(&id).await.unwrap();

        let feeder = tokio::spawn(async move {
            tx.send(Ok(ModelChunk::TextDelta("two ".to_string())))
                .await
                .unwrap();
            tx.send(Ok(ModelChunk::TextDelta("three".to_string())))
                .await
                .unwrap();
            tx.send(Ok(ModelChunk::Done)).await.unwrap();
        });

        let (a, b) = tokio::join!(collect(first), collect(second));
        feeder.await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 5); // start + 3 deltas + finish
        assert_eq!(a.last(), Some(&StreamEvent::Finish));
    }

    #[tokio::test]
    async fn late_subscriber_replays_finished_stream_within_retention() {
        let ctx = context();
        let id = StreamId::new();
        let events = ctx
            .create_new_resumable_stream(
                id,
                MessageId::from_string("m1"),
                scripted_source(hello_world_chunks()),
                noop_callback(),
            )
            .await;
        collect(events).await;
        ctx.wait_until_complete(&id).await;

        let replay = ctx.resume_existing_stream(&id).await.unwrap();
        let events = collect(replay).await;
        assert_eq!(events.len(), 4);
        assert_eq!(events.last(), Some(&StreamEvent::Finish));
    }

    #[tokio::test]
    async fn resume_of_unknown_stream_is_none() {
        let ctx = context();
        assert!(ctx.resume_existing_stream(&StreamId::new()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn channel_is_torn_down_after_retention() {
        let ctx = ResumableStreamContext::new(StreamContextConfig {
            retention: Duration::from_secs(30),
            ..Default::default()
        });
        let id = StreamId::new();
        let events = ctx
            .create_new_resumable_stream(
                id,
                MessageId::from_string("m1"),
                scripted_source(hello_world_chunks()),
                noop_callback(),
            )
            .await;
        collect(events).await;
        ctx.wait_until_complete(&id).await;

        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert!(ctx.resume_existing_stream(&id).await.is_none());
        assert_eq!(ctx.active_streams().await, 0);
    }

    #[tokio::test]
    async fn completion_callback_runs_exactly_once_with_assembled_text() {
        let ctx = context();
        let id = StreamId::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (out_tx, mut out_rx) = mpsc::channel(1);

        let calls_in_cb = calls.clone();
        let events = ctx
            .create_new_resumable_stream(
                id,
                MessageId::from_string("m1"),
                scripted_source(hello_world_chunks()),
                Box::new(move |outcome| {
                    Box::pin(async move {
                        calls_in_cb.fetch_add(1, Ordering::SeqCst);
                        let _ = out_tx.send(outcome).await;
                    })
                }),
            )
            .await;

        // Drop the deliverable stream immediately: the "client" disconnects.
        drop(events);
        assert!(ctx.wait_until_complete(&id).await);

        let outcome = out_rx.recv().await.unwrap();
        assert_eq!(outcome.text, "Hello world");
        assert!(outcome.error.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upstream_error_emits_error_frame_and_keeps_partial_output() {
        let ctx = context();
        let id = StreamId::new();
        let (out_tx, mut out_rx) = mpsc::channel(1);

        let events = ctx
            .create_new_resumable_stream(
                id,
                MessageId::from_string("m1"),
                scripted_source(vec![
                    Ok(ModelChunk::TextDelta("partial".to_string())),
                    Err(ModelError::Unavailable("upstream 503".to_string())),
                ]),
                Box::new(move |outcome| {
                    Box::pin(async move {
                        let _ = out_tx.send(outcome).await;
                    })
                }),
            )
            .await;

        let events = collect(events).await;
        assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));

        let outcome = out_rx.recv().await.unwrap();
        assert_eq!(outcome.text, "partial");
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_stall_the_publisher() {
        let ctx = ResumableStreamContext::new(StreamContextConfig {
            broadcast_capacity: 4,
            ..Default::default()
        });
        let id = StreamId::new();

        let mut chunks: Vec<Result<ModelChunk, ModelError>> = (0..200)
            .map(|i| Ok(ModelChunk::TextDelta(format!("c{} ", i))))
            .collect();
        chunks.push(Ok(ModelChunk::Done));

        // Never polled until the publisher is done: maximally slow.
        let events = ctx
            .create_new_resumable_stream(
                id,
                MessageId::from_string("m1"),
                scripted_source(chunks),
                noop_callback(),
            )
            .await;

        assert!(ctx.wait_until_complete(&id).await);

        // The lagged subscriber resyncs from the replay buffer and still
        // observes the whole ordered sequence.
        let events = collect(events).await;
        assert_eq!(events.len(), 202); // start + 200 deltas + finish
        assert_eq!(events.last(), Some(&StreamEvent::Finish));
    }

    #[tokio::test]
    async fn reasoning_deltas_are_kept_separate_from_text() {
        let ctx = context();
        let id = StreamId::new();
        let (out_tx, mut out_rx) = mpsc::channel(1);

        let events = ctx
            .create_new_resumable_stream(
                id,
                MessageId::from_string("m1"),
                scripted_source(vec![
                    Ok(ModelChunk::ReasoningDelta("thinking...".to_string())),
                    Ok(ModelChunk::TextDelta("answer".to_string())),
                    Ok(ModelChunk::Done),
                ]),
                Box::new(move |outcome| {
                    Box::pin(async move {
                        let _ = out_tx.send(outcome).await;
                    })
                }),
            )
            .await;
        collect(events).await;

        let outcome = out_rx.recv().await.unwrap();
        assert_eq!(outcome.reasoning, "thinking...");
        assert_eq!(outcome.text, "answer");
    }

    #[test]
    fn events_serialize_with_kebab_case_tags() {
        let json = serde_json::to_string(&StreamEvent::TextDelta {
            delta: "hi".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"text-delta"#));

        let json = serde_json::to_string(&StreamEvent::Start {
            message_id: MessageId::from_string("m1"),
        })
        .unwrap();
        assert!(json.contains(r#""messageId":"m1"#));
    }
}
