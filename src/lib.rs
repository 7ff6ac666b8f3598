use self::{
    consumer::{Consumer, ReadError},
    evaluator::Evaluator,
    events::{Event, FeatureEvent, IdentifyEvent, NoopSink, Sink},
    source::{Source, SseSource},
    store::{MemoryStore, Store},
};
use evaluator::Evaluate;
use http::header::InvalidHeaderValue;
use models::{FeatureFlagState, User};
use std::{collections::HashMap, error::Error as StdError, fmt, sync::Arc};
use tokio::sync::Mutex;

pub mod consumer;
pub mod evaluator;
pub mod events;
pub mod lru;
pub mod message;
pub mod models;
pub mod operators;
pub mod source;
pub mod store;
pub mod summarizer;
#[cfg(test)]
mod test_utils;

/// Default capacity of the noticed-users dedup cache a [`DefaultClient`]
/// keeps for its summarizer.
const DEFAULT_USER_CACHE_CAPACITY: usize = 1_000;

#[derive(Debug, thiserror::Error)]
pub enum StartError<CE>
where
    CE: fmt::Debug + Clone + StdError + 'static,
{
    #[error("Already started, can't start multiple times")]
    AlreadyStarted,

    #[error("Failed to start reading from source: {0}")]
    Start(#[from] ReadError<CE>),
}

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("Invalid SDK token: {0}")]
    InvalidToken(InvalidHeaderValue),
}

/// Client providing the idiomatic way of retrieving variation values for
/// flags.
///
/// Glue code on top of the smaller building blocks: the [`Evaluator`]
/// does flag resolution, the [`store::Store`]/[`Consumer`] pair handles
/// ingestion, and a [`summarizer::Summarizer`] behind a mutex tracks
/// evaluation counts for periodic export through an [`events::Sink`].
pub struct DefaultClient<ST, SRC> {
    store: Arc<ST>,
    evaluator: Evaluator<Arc<ST>>,
    source: Option<SRC>,
    summarizer: Mutex<summarizer::Summarizer>,
    sink: Arc<dyn Sink>,
}

impl DefaultClient<MemoryStore, SseSource> {
    /// Create a feature flagging client based on an SDK token.
    pub fn with_token(token: String) -> Result<Self, CreateError> {
        let source = SseSource::new(&token);
        let store = Arc::new(MemoryStore::new());
        Ok(Self::new(store, source))
    }
}

impl<ST, SRC> DefaultClient<ST, SRC>
where
    ST: Store,
{
    /// Make a client with custom components. Events are discarded by
    /// default — use [`with_sink`](Self::with_sink) to wire up a real one.
    pub fn new<STA: Into<Arc<ST>>>(store: STA, source: SRC) -> Self {
        let store = store.into();
        let evaluator = Evaluator::new(Arc::clone(&store));
        Self {
            evaluator,
            store,
            source: Some(source),
            summarizer: Mutex::new(summarizer::Summarizer::new(DEFAULT_USER_CACHE_CAPACITY)),
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink<SI: Sink + 'static>(mut self, sink: SI) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Start consuming data in the client.
    ///
    /// Future resolves once the initial data has been read. Drop the
    /// future to ignore the startup. It will still happen in the
    /// background.
    pub async fn start(&mut self) -> Result<(), StartError<ST::Error>>
    where
        ST: Consumer<SRC> + Send + Sync + 'static,
        ST::Error: StdError + Clone + Send + Sync,
        SRC: Source + Send + 'static,
        SRC::Stream: Unpin + Send,
        SRC::Error: StdError + Send,
    {
        let source = self.source.take().ok_or(StartError::AlreadyStarted)?;
        let store = Arc::clone(&self.store);
        store.read_from(source).await.map_err(Into::into)
    }

    /// Export the feature flagging data from the underlying store.
    pub fn export(&self) -> HashMap<String, FeatureFlagState> {
        self.store.export_all()
    }

    /// Records that `user` has been seen, emitting an identify event on
    /// first sighting. Mirrors notice-user dedup the evaluation path
    /// performs implicitly for every evaluated user.
    pub async fn identify(&self, user: &User) {
        let mut summarizer = self.summarizer.lock().await;
        if !summarizer.notice_user(&user.key) {
            self.sink.send(Event::Identify(IdentifyEvent {
                kind: "identify",
                key: user.key.clone(),
                creation_date: chrono::Utc::now().timestamp_millis(),
                user: user.clone(),
            }));
        }
    }

    /// Flushes and emits whatever the summarizer has accumulated since the
    /// last flush. No-op (and emits nothing) if nothing was evaluated.
    pub async fn flush(&self) {
        let mut summarizer = self.summarizer.lock().await;
        let snapshot = summarizer.snapshot();
        if !snapshot.is_empty() {
            self.sink.send(Event::Summary(snapshot.output()));
        }
    }
}

impl<ST, SRC> DefaultClient<ST, SRC>
where
    ST: Store,
{
    /// Full evaluation: resolves the flag, folds the result (and any
    /// prerequisite results) into the summarizer, and emits a top-level
    /// feature event through the configured sink.
    async fn evaluate_and_record(&self, flag: &str, user: &User, default: serde_json::Value) -> evaluator::EvalResult {
        let (result, prereq_events) = self.evaluator.evaluate(flag, user, default.clone());

        let mut summarizer = self.summarizer.lock().await;
        summarizer.notice_user(&user.key);
        for prereq in &prereq_events {
            let event = FeatureEvent {
                kind: "feature",
                key: prereq.key.clone(),
                user: user.clone(),
                value: prereq.value.clone(),
                variation: prereq.variation,
                default: serde_json::Value::Null,
                version: Some(prereq.version),
                prereq_of: Some(prereq.prereq_of.clone()),
                reason: Some(prereq.reason.clone()),
                creation_date: chrono::Utc::now().timestamp_millis(),
            };
            summarizer.summarize_event(&event);
            self.sink.send(Event::Feature(event));
        }

        let top_level = FeatureEvent {
            kind: "feature",
            key: flag.to_string(),
            user: user.clone(),
            value: result.value.clone(),
            variation: result.variation,
            default,
            version: result.version,
            prereq_of: None,
            reason: Some(result.reason.clone()),
            creation_date: chrono::Utc::now().timestamp_millis(),
        };
        summarizer.summarize_event(&top_level);
        drop(summarizer);
        self.sink.send(Event::Feature(top_level));

        result
    }
}

impl<ST, SRC> DefaultClient<ST, SRC>
where
    ST: Store,
{
    /// Evaluates a boolean flag, recording the evaluation event and
    /// folding it into the summarizer. Prefer this over the synchronous
    /// [`Evaluate`] impl when events/summarization matter to the caller.
    pub async fn bool_variation_async(&self, flag: &str, user: &User, default: bool) -> Result<bool, evaluator::Error> {
        let result = self.evaluate_and_record(flag, user, serde_json::Value::Bool(default)).await;
        result.value.as_bool().ok_or(evaluator::Error::WrongType)
    }

    pub async fn string_variation_async(&self, flag: &str, user: &User, default: &str) -> Result<String, evaluator::Error> {
        let result = self
            .evaluate_and_record(flag, user, serde_json::Value::String(default.to_string()))
            .await;
        result.value.as_str().map(str::to_string).ok_or(evaluator::Error::WrongType)
    }
}

impl<ST, SRC> Evaluate for DefaultClient<ST, SRC>
where
    ST: Store,
{
    fn evaluate(&self, flag: &str, user: &User, default: serde_json::Value) -> evaluator::EvalResult {
        self.evaluator.evaluate(flag, user, default).0
    }
}
