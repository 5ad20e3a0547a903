// Draft registry: lazily spawns one coordinator task per draft id and routes
// registrations to it. Coordinators exit when their last connection drops;
// the next registration for that id starts a fresh one from the definition
// file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info};

use crate::config::{self, ConfigError};
use crate::draft::{ClientConn, DraftController, DraftEvent, RegisterError};

struct DraftEntry {
    epoch: u64,
    events: mpsc::Sender<DraftEvent>,
}

pub struct DraftSupervisor {
    drafts_dir: PathBuf,
    entries: Mutex<HashMap<i64, DraftEntry>>,
}

impl DraftSupervisor {
    pub fn new(drafts_dir: PathBuf) -> Arc<Self> {
        Arc::new(DraftSupervisor {
            drafts_dir,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Register a connection with the coordinator for `draft_id`, spawning
    /// one if none is running. On success the returned sender is the channel
    /// the transport feeds `Inbound` and `Disconnect` events into.
    pub async fn register(
        self: &Arc<Self>,
        draft_id: i64,
        conn: ClientConn,
    ) -> Result<mpsc::Sender<DraftEvent>, RegisterError> {
        // A registration can race a coordinator that is winding down after
        // its last disconnect: the map still holds the old entry but the
        // event channel is closed. One retry re-resolves the entry, which
        // then spawns a fresh coordinator.
        for attempt in 0..2 {
            let events = self.coordinator_for(draft_id).await?;

            let (reply_tx, reply_rx) = oneshot::channel();
            let sent = events
                .send(DraftEvent::Register {
                    conn: conn.clone(),
                    reply: reply_tx,
                })
                .await;
            if sent.is_err() {
                debug!(draft_id, attempt, "coordinator closed during registration, retrying");
                continue;
            }
            match reply_rx.await {
                Ok(result) => return result.map(|()| events),
                Err(_) => {
                    debug!(draft_id, attempt, "coordinator dropped registration reply, retrying");
                    continue;
                }
            }
        }
        Err(RegisterError::ControllerClosed)
    }

    /// Resolve the live coordinator for `draft_id`, spawning one from its
    /// definition file if needed.
    async fn coordinator_for(
        self: &Arc<Self>,
        draft_id: i64,
    ) -> Result<mpsc::Sender<DraftEvent>, RegisterError> {
        static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(&draft_id) {
            if !entry.events.is_closed() {
                return Ok(entry.events.clone());
            }
        }

        let draft_config =
            config::load_draft(&self.drafts_dir, draft_id).map_err(|e| match e {
                ConfigError::FileNotFound { .. } => RegisterError::DraftNotFound { draft_id },
                other => RegisterError::Config(other),
            })?;

        info!(draft_id, name = %draft_config.name, "spawning draft coordinator");
        let (controller, events) = DraftController::new(draft_id, draft_config);
        let epoch = NEXT_EPOCH.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            draft_id,
            DraftEntry {
                epoch,
                events: events.clone(),
            },
        );

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            controller.run().await;
            // Only remove the entry this task created; a newer coordinator
            // for the same id may already have replaced it.
            let mut entries = supervisor.entries.lock().await;
            if entries.get(&draft_id).is_some_and(|e| e.epoch == epoch) {
                entries.remove(&draft_id);
                debug!(draft_id, "draft coordinator entry removed");
            }
        });

        Ok(events)
    }
}
