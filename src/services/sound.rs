//! Sound playback orchestration behind a backend trait.
//!
//! The service owns which sounds exist, the mute flag and the playback
//! queue; actually producing audio is delegated to a [`SoundBackend`].
//! Queue advancement is driven by the backend reporting finished sounds
//! through [`SoundService::on_finished`].

use std::collections::HashSet;
use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};

use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::ServiceError;

/// Audio output the service plays through.
pub trait SoundBackend: Send + Sync {
    /// Make a sound available under `key` from the given URL.
    fn load(&self, key: &str, url: &str);
    /// Start playing a loaded sound from the beginning.
    fn play(&self, key: &str);
    /// Stop a sound if it is playing.
    fn stop(&self, key: &str);
    /// Stop every playing sound.
    fn stop_all(&self);
}

/// Backend that produces no audio at all.
pub struct NullSound;

impl SoundBackend for NullSound {
    fn load(&self, _key: &str, _url: &str) {}
    fn play(&self, _key: &str) {}
    fn stop(&self, _key: &str) {}
    fn stop_all(&self) {}
}

struct Queue {
    keys: Vec<String>,
    position: usize,
    looped: bool,
}

/// Sound playback service for the local device.
pub struct SoundService {
    backend: Arc<dyn SoundBackend>,
    base_url: String,
    loaded: Mutex<HashSet<String>>,
    muted: AtomicBool,
    queue: Mutex<Option<Queue>>,
}

impl SoundService {
    /// Create the service over a backend; `base_url` prefixes every file.
    pub fn new(backend: Arc<dyn SoundBackend>, base_url: &str) -> Arc<Self> {
        Arc::new(Self {
            backend,
            base_url: base_url.to_string(),
            loaded: Mutex::new(HashSet::new()),
            muted: AtomicBool::new(false),
            queue: Mutex::new(None),
        })
    }

    /// Load `file` (relative to the base URL) under `key`.
    ///
    /// Loading the same key twice is a no-op.
    pub fn load(&self, key: &str, file: &str) {
        let mut loaded = self.lock_loaded();
        if !loaded.insert(key.to_string()) {
            return;
        }
        let url = format!("{}{file}", self.base_url);
        self.backend.load(key, &url);
    }

    /// Whether a sound was loaded under `key`.
    pub fn is_loaded(&self, key: &str) -> bool {
        self.lock_loaded().contains(key)
    }

    /// Play one loaded sound.
    ///
    /// `exclusive` stops everything else first. Playing while muted is a
    /// silent no-op.
    pub fn play(&self, key: &str, exclusive: bool) -> Result<(), ServiceError> {
        if !self.is_loaded(key) {
            return Err(ServiceError::NotFound(format!("no sound `{key}`")));
        }
        if self.is_muted() {
            return Ok(());
        }
        if exclusive {
            self.backend.stop_all();
        }
        self.backend.play(key);
        Ok(())
    }

    /// Stop one sound.
    pub fn stop(&self, key: &str) {
        self.backend.stop(key);
    }

    /// Stop every sound and abandon the queue.
    pub fn stop_all(&self) {
        *self.lock_queue() = None;
        self.backend.stop_all();
    }

    /// Mute or unmute. Muting stops everything currently playing.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
        if muted {
            self.stop_all();
        }
    }

    /// Whether playback is muted.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Play the given sounds one after another.
    ///
    /// Advancement happens when the backend reports the current sound
    /// finished. `looped` restarts from the front after the last sound,
    /// `shuffle` randomizes the order once up front.
    pub fn play_queue(
        &self,
        keys: &[&str],
        looped: bool,
        shuffle: bool,
    ) -> Result<(), ServiceError> {
        if keys.is_empty() {
            return Err(ServiceError::InvalidInput("empty sound queue".into()));
        }
        if let Some(missing) = keys.iter().find(|key| !self.is_loaded(key)) {
            return Err(ServiceError::NotFound(format!("no sound `{missing}`")));
        }

        let mut keys: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        if shuffle {
            keys.shuffle(&mut rand::rng());
        }
        let first = keys[0].clone();
        *self.lock_queue() = Some(Queue {
            keys,
            position: 0,
            looped,
        });
        self.play(&first, true)
    }

    /// The sound the queue is currently on, if a queue is running.
    pub fn queue_current(&self) -> Option<String> {
        self.lock_queue()
            .as_ref()
            .map(|queue| queue.keys[queue.position].clone())
    }

    /// Tell the service one sound finished playing.
    ///
    /// Advances the queue when the finished sound is the queue's current
    /// entry; reports about other sounds are ignored.
    pub fn on_finished(&self, key: &str) {
        let next = {
            let mut queue = self.lock_queue();
            let Some(state) = queue.as_mut() else {
                return;
            };
            if state.keys[state.position] != key {
                return;
            }
            if state.position + 1 < state.keys.len() {
                state.position += 1;
                Some(state.keys[state.position].clone())
            } else if state.looped {
                state.position = 0;
                Some(state.keys[0].clone())
            } else {
                *queue = None;
                None
            }
        };
        if let Some(next) = next {
            debug!(key = %next, "queue advancing");
            if self.is_loaded(&next) && !self.is_muted() {
                self.backend.play(&next);
            }
        }
    }

    fn lock_loaded(&self) -> MutexGuard<'_, HashSet<String>> {
        self.loaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_queue(&self) -> MutexGuard<'_, Option<Queue>> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
