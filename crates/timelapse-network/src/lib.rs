//! Host side of the cameras: event bus, enabling-entity registry and the
//! HTTP surface viewers and operators talk to.

pub mod server;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use futures::{stream::BoxStream, StreamExt};
use timelapse_orchestrator::Host;
use timelapse_types::events::CameraEvent;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tracing::debug;

pub use server::{router, serve, AppState};

/// In-process host backed by a broadcast channel and watch channels for
/// boolean entities.
#[derive(Clone)]
pub struct LocalHost {
    tx: broadcast::Sender<CameraEvent>,
    signals: Arc<Mutex<HashMap<String, watch::Sender<bool>>>>,
}

impl LocalHost {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            signals: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn subscribe(&self) -> BoxStream<'static, CameraEvent> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }

    pub fn set_signal(&self, id: &str, state: bool) {
        let mut signals = self
            .signals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match signals.get(id) {
            Some(tx) => {
                tx.send_replace(state);
            }
            None => {
                signals.insert(id.to_owned(), watch::channel(state).0);
            }
        }
        debug!("Signal {id} set to {state}");
    }

    pub fn signals(&self) -> BTreeMap<String, bool> {
        self.signals
            .lock()
            .map(|signals| {
                signals
                    .iter()
                    .map(|(id, tx)| (id.clone(), *tx.borrow()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Host for LocalHost {
    fn publish(&self, event: CameraEvent) {
        let _ = self.tx.send(event);
    }

    fn read_external_signal(&self, id: &str) -> Option<bool> {
        let signals = self.signals.lock().ok()?;
        signals.get(id).map(|tx| *tx.borrow())
    }

    /// Unknown entities start out as "off" until someone sets them.
    fn subscribe_signal(&self, id: &str) -> BoxStream<'static, bool> {
        let mut signals = self
            .signals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = signals
            .entry(id.to_owned())
            .or_insert_with(|| watch::channel(false).0);
        WatchStream::new(tx.subscribe()).boxed()
    }
}
