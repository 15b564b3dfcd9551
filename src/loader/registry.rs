//! Loader registry.
//!
//! Maps a runtime tag to its factory and to its single live loader. The first
//! `acquire` of a tag initializes the loader; concurrent first acquisitions
//! block on the same once-cell and observe the winner's instance, or the
//! winner's initialization error, which is cached because a half-started
//! engine is not assumed recoverable.
//!
//! Teardown runs in reverse creation order: a loader created later may hold
//! handles into one created earlier.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use tracing::{debug, error, info, instrument};

use crate::{
    config::LoaderConfig,
    dispatch::Dispatcher,
    error::{Error, Result},
    runtime::RuntimeStack,
    value::{LoaderId, Releaser, SymbolId},
};

use super::{Loader, LoaderContext, LoaderFactory, LoaderState};

pub type LoaderRef = Arc<LoaderSlot>;

/// A live loader plus the bookkeeping the bridge keeps around it.
pub struct LoaderSlot {
    id: LoaderId,
    loader: Box<dyn Loader>,
    lock: ReentrantMutex<()>,
    state: Mutex<LoaderState>,
    degraded: AtomicBool,
}

impl LoaderSlot {
    pub fn id(&self) -> &LoaderId {
        &self.id
    }

    pub fn tag(&self) -> &str {
        &self.id.tag
    }

    pub fn loader(&self) -> &dyn Loader {
        self.loader.as_ref()
    }

    pub fn state(&self) -> LoaderState {
        *self.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LoaderState::Ready
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub(crate) fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::Release);
    }

    /// Per-tag execution lock. Reentrant on the owning thread, blocking for
    /// every other thread.
    pub fn enter(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    fn destroy(&self) -> Result<()> {
        let _guard = self.enter();
        {
            let mut state = self.state.lock();
            if *state == LoaderState::Destroyed {
                return Ok(());
            }
            *state = LoaderState::Destroyed;
        }
        self.loader.destroy()
    }
}

impl Releaser for LoaderSlot {
    fn release(&self, symbol: SymbolId) {
        if self.is_ready() {
            self.loader.release(symbol);
        }
    }
}

impl fmt::Debug for LoaderSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderSlot")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

#[derive(Default)]
struct Entry {
    cell: OnceCell<Result<LoaderRef>>,
}

#[derive(Default)]
pub struct Registry {
    factories: RwLock<HashMap<String, Arc<dyn LoaderFactory>>>,
    entries: Mutex<HashMap<String, Arc<Entry>>>,
    created: Mutex<Vec<LoaderRef>>,
    next_instance: AtomicU64,
    closed: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for `tag`. Already-live loaders are
    /// not affected.
    pub fn register(&self, tag: impl Into<String>, factory: impl LoaderFactory + 'static) {
        let tag = tag.into();
        debug!(tag = %tag, "registered loader factory");
        self.factories.write().insert(tag, Arc::new(factory));
    }

    pub fn has_factory(&self, tag: &str) -> bool {
        self.factories.read().contains_key(tag)
    }

    /// Creates-or-returns the loader for `tag`.
    #[instrument(name = "registry::acquire", level = "trace", skip(self, config, dispatcher))]
    pub fn acquire(
        &self,
        tag: &str,
        config: LoaderConfig,
        dispatcher: Dispatcher,
    ) -> Result<LoaderRef> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotInitialized);
        }
        let factory = self
            .factories
            .read()
            .get(tag)
            .cloned()
            .ok_or_else(|| Error::UnknownLoader {
                tag: tag.to_string(),
            })?;

        let entry = self
            .entries
            .lock()
            .entry(tag.to_string())
            .or_default()
            .clone();

        entry
            .cell
            .get_or_init(|| self.create(tag, factory.as_ref(), config, dispatcher))
            .clone()
    }

    fn create(
        &self,
        tag: &str,
        factory: &dyn LoaderFactory,
        config: LoaderConfig,
        dispatcher: Dispatcher,
    ) -> Result<LoaderRef> {
        let id = LoaderId {
            tag: tag.to_string(),
            instance: self.next_instance.fetch_add(1, Ordering::Relaxed) + 1,
        };
        let slot = Arc::new(LoaderSlot {
            id: id.clone(),
            loader: factory.create(),
            lock: ReentrantMutex::new(()),
            state: Mutex::new(LoaderState::Uninitialized),
            degraded: AtomicBool::new(false),
        });

        let releaser: Weak<dyn Releaser> = Arc::downgrade(&slot) as Weak<dyn Releaser>;
        let context = LoaderContext::new(id, config, dispatcher, releaser);

        if let Err(err) = slot.loader.initialize(context) {
            error!(tag, error = %err, "loader failed to initialize");
            return Err(match err {
                Error::Init { .. } => err,
                other => Error::Init {
                    tag: tag.to_string(),
                    message: other.to_string(),
                },
            });
        }

        *slot.state.lock() = LoaderState::Ready;
        {
            // `release_all` closes the registry under this lock, so a loader
            // that finished initializing during teardown is stopped here.
            let mut created = self.created.lock();
            if self.closed.load(Ordering::Acquire) {
                drop(created);
                if let Err(err) = slot.destroy() {
                    error!(tag, error = %err, "loader teardown failed");
                }
                return Err(Error::NotInitialized);
            }
            created.push(slot.clone());
        }
        info!(tag, instance = slot.id.instance, "loader ready");
        Ok(slot)
    }

    /// Live loader for `tag`, without creating one.
    pub fn get(&self, tag: &str) -> Option<LoaderRef> {
        self.created
            .lock()
            .iter()
            .find(|slot| slot.tag() == tag)
            .cloned()
    }

    /// Live loaders in creation order.
    pub fn loaders(&self) -> Vec<LoaderRef> {
        self.created.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Destroys every loader exactly once, newest first, then closes the
    /// registry. Refuses to start while any frame still targets a live tag.
    #[instrument(name = "registry::release_all", level = "debug", skip_all)]
    pub fn release_all(&self, stack: &RuntimeStack) -> Result<()> {
        let slots = {
            let mut created = self.created.lock();
            for slot in created.iter() {
                let frames = stack.active(slot.tag());
                if frames > 0 {
                    return Err(Error::BusyTeardown {
                        tag: slot.tag().to_string(),
                        frames,
                    });
                }
            }
            self.closed.store(true, Ordering::Release);
            std::mem::take(&mut *created)
        };
        self.entries.lock().clear();

        let mut failures = Vec::new();
        for slot in slots.iter().rev() {
            match slot.destroy() {
                Ok(()) => info!(tag = slot.tag(), "loader destroyed"),
                Err(err) => {
                    error!(tag = slot.tag(), error = %err, "loader teardown failed");
                    failures.push(err);
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown(failures))
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<String> = self
            .created
            .lock()
            .iter()
            .map(|slot| slot.tag().to_string())
            .collect();
        f.debug_struct("Registry")
            .field("loaders", &tags)
            .field("closed", &self.is_closed())
            .finish()
    }
}
