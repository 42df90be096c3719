use axum::response::sse::Event;
use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------- event type ----------

/// Run lifecycle notifications, streamed to `/sync/events` subscribers.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Started {
        data_source_id: Uuid,
        log_id: Uuid,
        at: NaiveDateTime,
    },
    Finished {
        data_source_id: Uuid,
        log_id: Option<Uuid>,
        success: bool,
        records_processed: i64,
        message: String,
        at: NaiveDateTime,
    },
}

impl SyncEvent {
    pub fn to_sse_event(&self) -> Result<Event, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        let name = match self {
            SyncEvent::Started { .. } => "started",
            SyncEvent::Finished { .. } => "finished",
        };
        Ok(Event::default().event(name).data(json))
    }
}

// ---------- channel ----------

#[derive(Clone)]
pub struct SyncEvents {
    tx: broadcast::Sender<SyncEvent>,
}

impl SyncEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for SyncEvents {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let events = SyncEvents::new(8);
        events.publish(SyncEvent::Started {
            data_source_id: Uuid::now_v7(),
            log_id: Uuid::now_v7(),
            at: Utc::now().naive_utc(),
        });

        let mut rx = events.subscribe();
        let id = Uuid::now_v7();
        events.publish(SyncEvent::Finished {
            data_source_id: id,
            log_id: None,
            success: false,
            records_processed: 0,
            message: "boom".to_string(),
            at: Utc::now().naive_utc(),
        });

        match rx.recv().await.unwrap() {
            SyncEvent::Finished {
                data_source_id,
                success,
                ..
            } => {
                assert_eq!(data_source_id, id);
                assert!(!success);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let v = serde_json::to_value(SyncEvent::Started {
            data_source_id: Uuid::nil(),
            log_id: Uuid::nil(),
            at: Utc::now().naive_utc(),
        })
        .unwrap();
        assert_eq!(v["type"], "started");
    }
}
