//! Commitment cache and root registry.
//!
//! One slot per token id. A slot holds the current [`Commitment`] behind a
//! short-lived read/write lock, so readers never see a half-swapped tree, and
//! an async build lock that admits one rebuild at a time. Unrelated token ids
//! never contend beyond the brief map lookup.
//!
//! Rebuilds collapse: a caller that finds the build lock taken waits for it,
//! then reuses the result if that build started scanning after the caller
//! asked. Starts are ordered by a registry-wide ticket counter.
//!
//! A build runs in its own task that owns the slot and the build lock, and
//! callers only await its handle. Dropping a caller never stops a build
//! between persisting the root and swapping the cached tree.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use allowlist_core::storage::{AllowlistStore, RootStore, StoreResult};
use allowlist_core::{merkle, Commitment, SourceFilter, TokenId};
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// Run a store call on the blocking pool.
pub(crate) async fn blocking<S, T, F>(store: &Arc<S>, call: F) -> Result<T>
where
    S: Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> StoreResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    let result = tokio::task::spawn_blocking(move || call(store.as_ref())).await?;
    result.map_err(|e| {
        error!(error = %e, retryable = e.is_retryable(), "storage call failed");
        Error::Store(e)
    })
}

#[derive(Default)]
struct BuildState {
    /// Ticket of the scan behind the last completed build.
    started: Option<u64>,
}

#[derive(Default)]
struct Slot {
    current: RwLock<Option<Arc<Commitment>>>,
    build: Arc<Mutex<BuildState>>,
    builds: AtomicU64,
}

impl Slot {
    fn cached(&self) -> Option<Arc<Commitment>> {
        self.current.read().clone()
    }

    async fn lock_build(&self) -> OwnedMutexGuard<BuildState> {
        Arc::clone(&self.build).lock_owned().await
    }
}

pub struct CommitmentRegistry<S> {
    store: Arc<S>,
    filter: SourceFilter,
    slots: RwLock<HashMap<TokenId, Arc<Slot>>>,
    clock: AtomicU64,
}

impl<S> CommitmentRegistry<S>
where
    S: AllowlistStore + RootStore + 'static,
{
    /// Create a registry whose leaf sets are restricted by `filter`.
    pub fn new(store: Arc<S>, filter: SourceFilter) -> Self {
        Self {
            store,
            filter,
            slots: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
        }
    }

    pub fn filter(&self) -> &SourceFilter {
        &self.filter
    }

    /// The commitment for `token_id`, building it on first use.
    ///
    /// `None` means nobody is eligible. Once a build has completed, an empty
    /// result is remembered until the next rebuild or invalidation.
    pub async fn get(&self, token_id: TokenId) -> Result<Option<Arc<Commitment>>> {
        let slot = self.slot(token_id);
        if let Some(commitment) = slot.cached() {
            return Ok(Some(commitment));
        }

        let state = slot.lock_build().await;
        if state.started.is_some() {
            return Ok(slot.cached());
        }
        self.spawn_build(token_id, slot, state).await
    }

    /// Rebuild the commitment for `token_id` from the current store contents.
    ///
    /// Must be called after any mutation affecting `token_id`. Concurrent
    /// calls share one build when it started after they were issued.
    pub async fn rebuild(&self, token_id: TokenId) -> Result<Option<Arc<Commitment>>> {
        let requested = self.tick();
        let slot = self.slot(token_id);

        let state = slot.lock_build().await;
        if state.started.is_some_and(|started| started > requested) {
            debug!(token_id, "reusing rebuild that started after request");
            return Ok(slot.cached());
        }
        self.spawn_build(token_id, slot, state).await
    }

    /// Forget the cached commitment so the next [`get`](Self::get) rescans.
    ///
    /// The persisted root is left alone. Returns `true` if a commitment was
    /// cached.
    pub async fn invalidate(&self, token_id: TokenId) -> bool {
        let Some(slot) = self.existing_slot(token_id) else {
            return false;
        };

        let mut state = slot.lock_build().await;
        state.started = None;
        let previous = slot.current.write().take();
        previous.is_some()
    }

    /// Cached commitment without touching the store.
    pub fn peek(&self, token_id: TokenId) -> Option<Arc<Commitment>> {
        self.existing_slot(token_id).and_then(|slot| slot.cached())
    }

    /// Token ids that currently hold a commitment, ascending.
    pub fn cached_token_ids(&self) -> Vec<TokenId> {
        let mut ids: Vec<TokenId> = self
            .slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.current.read().is_some())
            .map(|(token_id, _)| *token_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of builds completed for `token_id` in this process.
    pub fn build_count(&self, token_id: TokenId) -> u64 {
        self.existing_slot(token_id)
            .map(|slot| slot.builds.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn existing_slot(&self, token_id: TokenId) -> Option<Arc<Slot>> {
        self.slots.read().get(&token_id).cloned()
    }

    fn slot(&self, token_id: TokenId) -> Arc<Slot> {
        if let Some(slot) = self.existing_slot(token_id) {
            return slot;
        }
        Arc::clone(self.slots.write().entry(token_id).or_default())
    }

    /// Hand the locked slot to a build task and wait for it.
    async fn spawn_build(
        &self,
        token_id: TokenId,
        slot: Arc<Slot>,
        state: OwnedMutexGuard<BuildState>,
    ) -> Result<Option<Arc<Commitment>>> {
        let build = Build {
            token_id,
            started: self.tick(),
            store: Arc::clone(&self.store),
            filter: self.filter.clone(),
        };
        tokio::spawn(build.run(slot, state)).await?
    }
}

/// One scan of the store for a token id, ordered by its start ticket.
struct Build<S> {
    token_id: TokenId,
    started: u64,
    store: Arc<S>,
    filter: SourceFilter,
}

impl<S> Build<S>
where
    S: AllowlistStore + RootStore + 'static,
{
    /// Scan, build, persist, then swap. Holds the slot's build lock
    /// throughout; a failure at any step leaves the cached commitment
    /// untouched.
    async fn run(
        self,
        slot: Arc<Slot>,
        mut state: OwnedMutexGuard<BuildState>,
    ) -> Result<Option<Arc<Commitment>>> {
        let Self {
            token_id,
            started,
            store,
            filter,
        } = self;

        let commitment = blocking(&store, move |store| {
            let addresses = store.scan(token_id, &filter)?;
            Ok(Commitment::build(addresses))
        })
        .await?;

        match &commitment {
            Some(built) => {
                let root = built.root();
                blocking(&store, move |store| store.persist_root(token_id, &root)).await?;
                info!(
                    token_id,
                    leaves = built.len(),
                    root = %merkle::to_hex(&root),
                    "rebuilt commitment"
                );
            }
            None => {
                let cleared = blocking(&store, move |store| store.clear_root(token_id)).await?;
                info!(token_id, cleared, "no eligible addresses, commitment cleared");
            }
        }

        let commitment = commitment.map(Arc::new);
        *slot.current.write() = commitment.clone();
        state.started = Some(started);
        slot.builds.fetch_add(1, Ordering::AcqRel);

        Ok(commitment)
    }
}
