//! Status Store - latest-snapshot holder shared between the MQTT session and readers
//!
//! The store keeps exactly one [`StatusRecord`]. The MQTT session task replaces it on
//! every decoded message; any number of readers copy it out at any time.
//!
//! # Thread Safety
//!
//! The record lives inside a [`tokio::sync::watch`] channel. Its internal lock is held
//! only to swap the record in or clone it out, so readers never wait on network I/O and
//! never observe a record assembled from two different writes.
//!
//! # Notification
//!
//! Two ways to follow updates:
//! - [`StatusStore::subscribe`] hands out a `watch::Receiver` (preferred for async consumers)
//! - [`StatusStore::set_update_callback`] registers a single synchronous sink
//!
//! The callback always runs after the store lock has been released, so it may call
//! back into the store.

use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{trace, warn};

use super::status::StatusRecord;

/// Single notification sink invoked after each write.
pub type UpdateCallback = Arc<dyn Fn(&StatusRecord) + Send + Sync>;

pub struct StatusStore {
    current: watch::Sender<StatusRecord>,
    on_update: RwLock<Option<UpdateCallback>>,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore {
    /// Creates a store holding the default ("Idle") record.
    pub fn new() -> Self {
        let (current, _) = watch::channel(StatusRecord::default());
        Self {
            current,
            on_update: RwLock::new(None),
        }
    }

    /// Returns a copy of the current record.
    pub fn get(&self) -> StatusRecord {
        self.current.borrow().clone()
    }

    /// Replaces the held record, then notifies the registered callback.
    pub fn write(&self, record: StatusRecord) {
        let previous = self.current.send_replace(record.clone());
        trace!(
            "Status replaced ({} -> {})",
            previous.print_name, record.print_name
        );

        let callback = match self.on_update.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                warn!("Update callback lock poisoned, recovering");
                poisoned.into_inner().clone()
            }
        };

        if let Some(callback) = callback {
            callback(&record);
        }
    }

    /// Registers the update sink, replacing any previous one.
    ///
    /// Meant to be called once during setup, before the session starts writing.
    pub fn set_update_callback<F>(&self, callback: F)
    where
        F: Fn(&StatusRecord) + Send + Sync + 'static,
    {
        let mut guard = match self.on_update.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Arc::new(callback));
    }

    /// Receiver that observes every future write (intermediate values may be skipped
    /// by slow receivers, the latest one never is).
    pub fn subscribe(&self) -> watch::Receiver<StatusRecord> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;

    fn record(seq: u32) -> StatusRecord {
        StatusRecord {
            print_name: format!("job-{}", seq),
            progress: seq as f64,
            current_layer: seq,
            total_layers: seq,
            nozzle_temp: seq as f64,
            nozzle_temp_target: seq as f64,
            bed_temp: seq as f64,
            bed_temp_target: seq as f64,
            ambient_temp: seq as f64,
            time_remaining: seq as u64,
            time_elapsed: seq as u64,
            ..StatusRecord::default()
        }
    }

    #[test]
    fn fresh_store_returns_default_record() {
        let store = StatusStore::new();
        let status = store.get();

        assert_eq!(status.print_name, "Idle");
        assert_eq!(status.progress, 0.0);
        assert_eq!(status.total_layers, 0);
        assert_eq!(status.time_remaining, 0);
    }

    #[test]
    fn last_write_wins() {
        let store = StatusStore::new();
        let a = record(1);
        let b = record(2);

        store.write(a);
        store.write(b.clone());

        assert_eq!(store.get(), b);
    }

    #[test]
    fn callback_receives_each_record_and_may_reenter_store() {
        let store = Arc::new(StatusStore::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_in_cb = seen.clone();
        let store_in_cb = Arc::downgrade(&store);
        store.set_update_callback(move |status| {
            // Reading back from inside the callback must not deadlock
            let current = store_in_cb.upgrade().map(|s| s.get());
            assert_eq!(current.as_ref(), Some(status));
            seen_in_cb.lock().unwrap().push(status.current_layer);
        });

        store.write(record(1));
        store.write(record(2));
        store.write(record(3));

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn replacing_callback_drops_the_old_one() {
        let store = StatusStore::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        store.set_update_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.write(record(1));

        let counter = second.clone();
        store.set_update_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.write(record(2));

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_readers_never_see_torn_records() {
        let store = Arc::new(StatusStore::new());
        let writes = 2_000;

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..writes {
                        let s = store.get();
                        if s.is_idle() {
                            continue;
                        }
                        let seq = s.current_layer;
                        assert_eq!(s.print_name, format!("job-{}", seq));
                        assert_eq!(s.total_layers, seq);
                        assert_eq!(s.progress, seq as f64);
                        assert_eq!(s.nozzle_temp, seq as f64);
                        assert_eq!(s.bed_temp_target, seq as f64);
                        assert_eq!(s.ambient_temp, seq as f64);
                        assert_eq!(s.time_remaining, seq as u64);
                        assert_eq!(s.time_elapsed, seq as u64);
                    }
                })
            })
            .collect();

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for seq in 1..=writes {
                    store.write(record(seq));
                }
            })
        };

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(store.get().current_layer, writes);
    }

    #[test]
    fn concurrent_writers_leave_one_complete_record() {
        let store = Arc::new(StatusStore::new());
        let writers: Vec<_> = (1..=4)
            .map(|w| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        store.write(record(w * 1000 + i));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let last = store.get();
        let expected = StatusRecord {
            last_updated: last.last_updated,
            ..record(last.current_layer)
        };
        assert_eq!(last, expected);
    }

    #[tokio::test]
    async fn subscribers_observe_writes() {
        let store = StatusStore::new();
        let mut rx = store.subscribe();

        store.write(record(7));
        rx.changed().await.unwrap();

        assert_eq!(rx.borrow_and_update().current_layer, 7);
    }
}
