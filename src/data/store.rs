//! Append-only, persisted store of temperature samples.
//!
//! Samples are kept in arrival order (oldest first). Appends reach a
//! [`KeyValueStore`] under [`SAMPLE_HISTORY_KEY`], either written through on
//! the caller's thread or coalesced over a debounce window and written on the
//! blocking pool (see [`PersistPolicy`]).
//! Persistence failures are logged and never stop in-memory operation.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use super::sample::Sample;
use crate::error::{Error, Result};
use crate::storage::{KeyValueStore, SAMPLE_HISTORY_KEY};

/// Current on-disk format version of the sample history.
pub const HISTORY_FORMAT_VERSION: u32 = 1;

/// Debounce window used unless configured otherwise.
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_secs(1);

/// When appended samples reach durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistPolicy {
    /// Write the whole history on every append, on the calling thread.
    Immediate,
    /// Coalesce writes over the given window. A crash can lose up to one
    /// window of samples.
    Debounced(Duration),
}

impl Default for PersistPolicy {
    fn default() -> Self {
        Self::Debounced(DEFAULT_PERSIST_DEBOUNCE)
    }
}

#[derive(Serialize)]
struct HistoryRef<'a> {
    version: u32,
    samples: &'a [Sample],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredHistory {
    Versioned { version: u32, samples: Vec<Sample> },
    Legacy(Vec<Sample>),
}

fn decode_history(json: &str) -> Result<Vec<Sample>> {
    match serde_json::from_str::<StoredHistory>(json)? {
        StoredHistory::Versioned { version, samples } if version <= HISTORY_FORMAT_VERSION => {
            Ok(samples)
        }
        StoredHistory::Versioned { version, .. } => Err(Error::persistence(
            SAMPLE_HISTORY_KEY,
            format!("unsupported history version {}", version),
        )),
        StoredHistory::Legacy(samples) => Ok(samples),
    }
}

struct StoreInner {
    samples: RwLock<Vec<Sample>>,
    storage: Arc<dyn KeyValueStore>,
    policy: PersistPolicy,
    flush_scheduled: AtomicBool,
    // Serializes writes so an older snapshot never lands after a newer one.
    write_lock: Mutex<()>,
    sample_tx: broadcast::Sender<Sample>,
}

impl StoreInner {
    fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        let json = {
            let samples = self.samples.read();
            serde_json::to_string(&HistoryRef {
                version: HISTORY_FORMAT_VERSION,
                samples: &samples,
            })?
        };
        self.storage.set(SAMPLE_HISTORY_KEY, &json)
    }

    fn persist_logged(&self) {
        if let Err(e) = self.persist() {
            warn!("Failed to persist sample history: {}", e);
        }
    }
}

/// Shared handle to the sample history.
///
/// Cloning is cheap; all clones see the same samples.
#[derive(Clone)]
pub struct SampleStore {
    inner: Arc<StoreInner>,
}

impl SampleStore {
    /// Create an empty store writing to `storage`.
    pub fn new(storage: Arc<dyn KeyValueStore>, policy: PersistPolicy) -> Self {
        let (sample_tx, _) = broadcast::channel(256);

        Self {
            inner: Arc::new(StoreInner {
                samples: RwLock::new(Vec::new()),
                storage,
                policy,
                flush_scheduled: AtomicBool::new(false),
                write_lock: Mutex::new(()),
                sample_tx,
            }),
        }
    }

    /// Create a store and populate it from persisted history.
    pub fn open(storage: Arc<dyn KeyValueStore>, policy: PersistPolicy) -> Self {
        let store = Self::new(storage, policy);
        if let Err(e) = store.load_from_persistence() {
            warn!("Starting with empty sample history: {}", e);
        }
        store
    }

    /// Replace the in-memory contents with the persisted history.
    ///
    /// On error the store is left empty.
    pub fn load_from_persistence(&self) -> Result<usize> {
        let loaded = match self.inner.storage.get(SAMPLE_HISTORY_KEY) {
            Ok(Some(json)) => decode_history(&json),
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(e),
        };

        let mut samples = self.inner.samples.write();
        match loaded {
            Ok(loaded) => {
                info!("Loaded {} persisted samples", loaded.len());
                *samples = loaded;
                Ok(samples.len())
            }
            Err(e) => {
                samples.clear();
                Err(e)
            }
        }
    }

    /// Write the current contents to storage now.
    pub fn persist(&self) -> Result<()> {
        self.inner.persist()
    }

    /// Append a sample and persist according to the store's policy.
    pub fn append(&self, sample: Sample) {
        self.inner.samples.write().push(sample);
        debug!("Stored sample: {}", sample);

        let _ = self.inner.sample_tx.send(sample);

        match self.inner.policy {
            PersistPolicy::Immediate => self.inner.persist_logged(),
            PersistPolicy::Debounced(delay) => self.schedule_flush(delay),
        }
    }

    fn schedule_flush(&self, delay: Duration) {
        if self.inner.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.inner.flush_scheduled.store(false, Ordering::SeqCst);
                self.inner.persist_logged();
                return;
            }
        };

        let inner = self.inner.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.flush_scheduled.swap(false, Ordering::SeqCst) {
                trace!("Debounced flush of sample history");
                if let Err(e) = tokio::task::spawn_blocking(move || inner.persist_logged()).await {
                    warn!("Sample history flush task failed: {}", e);
                }
            }
        });
    }

    /// Persist immediately if a debounced write is pending.
    pub fn flush(&self) -> Result<()> {
        if self.inner.flush_scheduled.swap(false, Ordering::SeqCst) {
            self.inner.persist()?;
        }
        Ok(())
    }

    /// Snapshot of all samples in arrival order.
    pub fn all(&self) -> Vec<Sample> {
        self.inner.samples.read().clone()
    }

    /// The most recently appended sample.
    pub fn latest(&self) -> Option<Sample> {
        self.inner.samples.read().last().copied()
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.inner.samples.read().len()
    }

    /// Whether the store holds no samples.
    pub fn is_empty(&self) -> bool {
        self.inner.samples.read().is_empty()
    }

    /// The persistence policy in effect.
    pub fn policy(&self) -> PersistPolicy {
        self.inner.policy
    }

    /// Receive every sample appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Sample> {
        self.inner.sample_tx.subscribe()
    }
}

impl std::fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleStore")
            .field("len", &self.len())
            .field("policy", &self.inner.policy)
            .finish()
    }
}
