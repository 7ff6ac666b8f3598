use crate::{
    consumer::{Consumer, InitState},
    message::{InitData, Message, Update},
    models::{FeatureFlagState, Segment},
};
use arc_swap::ArcSwap;
use futures::future::{self, Ready};
use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{info, warn};

/// Read-only view the evaluator consumes, with a `get(kind, key)`-style
/// contract. Split into typed accessors (`flag`, `segment`) rather
/// than a single `get` returning a kind-tagged enum, since that's the
/// idiomatic Rust shape for "one of two known record kinds" — see
/// DESIGN.md for this resolved Open Question.
pub trait Store {
    fn flag(&self, name: &str) -> Option<FeatureFlagState>;
    fn segment(&self, name: &str) -> Option<Segment>;
    fn export_all(&self) -> HashMap<String, FeatureFlagState>;

    /// Whether this store has ever received a full `put`. Before that,
    /// callers should report `ERROR{CLIENT_NOT_READY}` rather than
    /// evaluating against an empty store.
    fn initialized(&self) -> bool {
        true
    }
}

pub struct MemoryStore {
    flags: ArcSwap<HashMap<String, FeatureFlagState>>,
    segments: ArcSwap<HashMap<String, Segment>>,
    init: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            flags: ArcSwap::new(Arc::new(HashMap::new())),
            segments: ArcSwap::new(Arc::new(HashMap::new())),
            init: AtomicBool::new(false),
        }
    }
}

impl Store for MemoryStore {
    fn flag(&self, name: &str) -> Option<FeatureFlagState> {
        self.flags.load().get(name).filter(|f| !f.deleted).cloned()
    }

    fn segment(&self, name: &str) -> Option<Segment> {
        self.segments.load().get(name).filter(|s| !s.deleted).cloned()
    }

    fn export_all(&self) -> HashMap<String, FeatureFlagState> {
        self.flags.load().as_ref().clone()
    }

    fn initialized(&self) -> bool {
        self.init.load(Ordering::SeqCst)
    }
}

impl<T: Store> Store for Arc<T> {
    fn flag(&self, name: &str) -> Option<FeatureFlagState> {
        self.as_ref().flag(name)
    }

    fn segment(&self, name: &str) -> Option<Segment> {
        self.as_ref().segment(name)
    }

    fn export_all(&self) -> HashMap<String, FeatureFlagState> {
        self.as_ref().export_all()
    }

    fn initialized(&self) -> bool {
        self.as_ref().initialized()
    }
}

impl<S> Consumer<S> for MemoryStore {
    type Error = Infallible;
    type Future = Ready<Result<InitState, Self::Error>>;

    fn consume(&self, msg: Message) -> Self::Future {
        match msg {
            // initialize flag & segment data
            Message::Put(InitData { flags, segments }) => {
                self.flags.store(Arc::new(flags));
                self.segments.store(Arc::new(segments));
                self.init.store(true, Ordering::SeqCst);
            }
            // update a single flag
            Message::Patch(Update::Flag {
                name,
                data: Some(flag),
                ..
            }) => {
                if !self.init.load(Ordering::SeqCst) {
                    warn!("ignoring update sent before init");
                    return future::ready(Ok(InitState::Pending));
                }
                let mut updated = {
                    // Drop once cloned - don't hold guard while storing
                    let flags = self.flags.load();
                    if let Some(existing) = flags.get(&name) {
                        // ignore stale updates: only replace with a newer version
                        if flag.version <= existing.version {
                            info!("flag already up-to-date, ignoring");
                            return future::ready(Ok(InitState::Done));
                        }
                    }
                    flags.as_ref().clone()
                };
                updated.insert(name, flag);
                self.flags.store(Arc::new(updated));
            }
            // update a single segment
            Message::Patch(Update::Segment {
                name,
                data: Some(segment),
                ..
            }) => {
                if !self.init.load(Ordering::SeqCst) {
                    warn!("ignoring update sent before init");
                    return future::ready(Ok(InitState::Pending));
                }
                let mut updated = {
                    let segments = self.segments.load();
                    if let Some(existing) = segments.get(&name) {
                        if segment.version <= existing.version {
                            info!("segment already up-to-date, ignoring");
                            return future::ready(Ok(InitState::Done));
                        }
                    }
                    segments.as_ref().clone()
                };
                updated.insert(name, segment);
                self.segments.store(Arc::new(updated));
            }
            // delete a flag
            Message::Delete(Update::Flag {
                name,
                version: Some(version),
                ..
            }) => {
                if !self.init.load(Ordering::SeqCst) {
                    warn!("ignoring delete sent before init");
                    return future::ready(Ok(InitState::Pending));
                }
                let updated = {
                    // Drop once cloned - don't hold guard while storing
                    let flags = self.flags.load();
                    flags
                        .get(&name)
                        // check that deleted version is newer than what we have
                        .filter(|f| version > f.version)
                        .map(|_| flags.as_ref().clone())
                        .map(|mut f| {
                            f.remove(&name);
                            f
                        })
                };
                if let Some(updated) = updated {
                    self.flags.store(Arc::new(updated));
                }
            }
            // delete a segment
            Message::Delete(Update::Segment {
                name,
                version: Some(version),
                ..
            }) => {
                if !self.init.load(Ordering::SeqCst) {
                    warn!("ignoring delete sent before init");
                    return future::ready(Ok(InitState::Pending));
                }
                let updated = {
                    let segments = self.segments.load();
                    segments
                        .get(&name)
                        .filter(|s| version > s.version)
                        .map(|_| segments.as_ref().clone())
                        .map(|mut s| {
                            s.remove(&name);
                            s
                        })
                };
                if let Some(updated) = updated {
                    self.segments.store(Arc::new(updated));
                }
            }
            msg => {
                warn!(
                    ?msg,
                    "unknown update, missing some info or not yet implemented"
                );
            }
        };
        future::ready(Ok(InitState::Done))
    }
}
