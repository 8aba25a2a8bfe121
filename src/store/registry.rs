//! Process-wide registry of node stores keyed by profile.
//!
//! Each profile gets its own async mutex; holding a [`ProfileGuard`] is what
//! serialises mutations of that profile. The map itself is locked only long
//! enough to find or insert a slot, so profiles never wait on each other.
//!
//! Every successful save also publishes a copy of the record. Readers take
//! that copy through [`ProfileRegistry::snapshot`] and never wait behind a
//! mutation in progress.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::{NodeStore, ProfileStore, ProfileStoreError};

/// Last record of a profile seen by this process.
#[derive(Clone, Debug, Default)]
enum Published {
    /// Nothing has been loaded or saved yet.
    #[default]
    Unloaded,
    /// The persisted record, or `None` when the profile does not exist.
    Loaded(Option<NodeStore>),
}

#[derive(Debug, Default)]
struct Slot {
    record: Arc<AsyncMutex<Option<NodeStore>>>,
    published: RwLock<Published>,
}

impl Slot {
    fn publish(&self, store: Option<NodeStore>) {
        *self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Published::Loaded(store);
    }

    fn published(&self) -> Published {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Registry of per-profile [`NodeStore`] instances backed by a
/// [`ProfileStore`].
#[derive(Debug)]
pub struct ProfileRegistry<P> {
    persistence: P,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

/// Exclusive access to one profile's record.
#[derive(Debug)]
pub struct ProfileGuard {
    profile: String,
    slot: Arc<Slot>,
    record: OwnedMutexGuard<Option<NodeStore>>,
}

impl ProfileGuard {
    /// Profile this guard covers.
    #[must_use]
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// The record, when the profile exists.
    #[must_use]
    pub fn store(&self) -> Option<&NodeStore> {
        self.record.as_ref()
    }

    /// Mutable access to the record, when the profile exists.
    pub fn store_mut(&mut self) -> Option<&mut NodeStore> {
        self.record.as_mut()
    }

    /// Installs a new record for this profile.
    pub fn insert(&mut self, store: NodeStore) -> &mut NodeStore {
        self.record.insert(store)
    }
}

impl<P: ProfileStore> ProfileRegistry<P> {
    /// Creates an empty registry over `persistence`.
    #[must_use]
    pub fn new(persistence: P) -> Self {
        Self {
            persistence,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Underlying persistence.
    #[must_use]
    pub const fn persistence(&self) -> &P {
        &self.persistence
    }

    fn slot(&self, profile: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(profile.to_owned()).or_default())
    }

    fn existing_slot(&self, profile: &str) -> Option<Arc<Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(profile)
            .cloned()
    }

    /// Waits for exclusive access to `profile`, loading its record from
    /// persistence if this process has not seen it yet.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileStoreError`] when the stored record cannot be loaded.
    pub async fn lock(&self, profile: &str) -> Result<ProfileGuard, ProfileStoreError> {
        let slot = self.slot(profile);
        let mut record = Arc::clone(&slot.record).lock_owned().await;
        if record.is_none() {
            *record = self.persistence.load(profile)?;
            slot.publish(record.clone());
        }
        Ok(ProfileGuard {
            profile: profile.to_owned(),
            slot,
            record,
        })
    }

    /// Copies the last saved record of `profile` without taking its lock.
    ///
    /// A mutation in progress is seen up to its most recent saved step.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileStoreError`] when the stored record cannot be loaded.
    pub fn snapshot(&self, profile: &str) -> Result<Option<NodeStore>, ProfileStoreError> {
        let published = self
            .existing_slot(profile)
            .map_or(Published::Unloaded, |slot| slot.published());
        match published {
            Published::Loaded(store) => Ok(store),
            Published::Unloaded => self.persistence.load(profile),
        }
    }

    /// Persists `store` and publishes it to readers.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileStoreError`] when writing fails; readers keep the
    /// previous copy in that case.
    pub fn save(&self, store: &NodeStore) -> Result<(), ProfileStoreError> {
        self.persistence.save(store)?;
        self.slot(store.profile()).publish(Some(store.clone()));
        Ok(())
    }

    /// Removes the guarded profile from persistence and from memory.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileStoreError`] when the stored record cannot be removed;
    /// the in-memory record is kept in that case.
    pub fn discard(&self, guard: &mut ProfileGuard) -> Result<(), ProfileStoreError> {
        self.persistence.remove(&guard.profile)?;
        *guard.record = None;
        guard.slot.publish(None);
        Ok(())
    }

    /// Names of all persisted profiles.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileStoreError`] when listing fails.
    pub fn profiles(&self) -> Result<Vec<String>, ProfileStoreError> {
        self.persistence.list()
    }
}
