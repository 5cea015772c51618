use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::events::ChatEnvelope;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LaneError {
    #[error("lane {0} is closed")]
    Closed(usize),
}

#[async_trait]
pub trait LaneWorker: Send + Sync {
    async fn process(&self, envelope: ChatEnvelope);
}

/// Fixed pool of sequential queues. A user always lands on the same lane, so
/// their messages are handled in arrival order while different lanes run
/// concurrently.
pub struct UserLanes {
    senders: Vec<mpsc::Sender<ChatEnvelope>>,
    workers: Vec<JoinHandle<()>>,
}

impl UserLanes {
    pub fn spawn(count: usize, capacity: usize, worker: Arc<dyn LaneWorker>) -> Self {
        let count = count.max(1);
        let mut senders = Vec::with_capacity(count);
        let mut workers = Vec::with_capacity(count);

        for lane in 0..count {
            let (sender, mut receiver) = mpsc::channel::<ChatEnvelope>(capacity.max(1));
            let worker = worker.clone();
            workers.push(tokio::spawn(async move {
                while let Some(envelope) = receiver.recv().await {
                    worker.process(envelope).await;
                }
                info!(event_name = "chat.lane.drained", lane, "lane drained");
            }));
            senders.push(sender);
        }

        Self { senders, workers }
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    pub fn lane_for(&self, user_id: i64) -> usize {
        lane_index(user_id, self.senders.len())
    }

    /// Queues `envelope` on its user's lane, waiting while that lane is full.
    /// Events without a user go to lane 0.
    pub async fn enqueue(&self, envelope: ChatEnvelope) -> Result<(), LaneError> {
        let lane = envelope.event.user_id().map_or(0, |user_id| self.lane_for(user_id));
        self.senders[lane].send(envelope).await.map_err(|_| LaneError::Closed(lane))
    }

    /// Stops intake and waits up to `grace` for queued work to finish.
    /// Returns `false` when lanes had to be aborted.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let Self { senders, mut workers } = self;
        drop(senders);

        let drained = tokio::time::timeout(grace, async {
            for worker in workers.iter_mut() {
                if let Err(error) = worker.await {
                    warn!(event_name = "chat.lane.failed", error = %error, "lane worker failed");
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                event_name = "chat.lane.shutdown_timeout",
                grace_ms = grace.as_millis() as u64,
                "lanes did not drain before the grace period; aborting"
            );
            for worker in &workers {
                worker.abort();
            }
        }
        drained
    }
}

fn lane_index(user_id: i64, lanes: usize) -> usize {
    user_id.rem_euclid(lanes.max(1) as i64) as usize
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{Mutex, Notify};

    use super::{lane_index, LaneWorker, UserLanes};
    use crate::events::{ChatEnvelope, IncomingMessage};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(i64, i64)>>,
        gate: Option<(i64, Arc<Notify>)>,
    }

    #[async_trait]
    impl LaneWorker for Recorder {
        async fn process(&self, envelope: ChatEnvelope) {
            let user_id = envelope.event.user_id().unwrap_or_default();
            if let Some((blocked_user, notify)) = &self.gate {
                if *blocked_user == user_id {
                    notify.notified().await;
                }
            }
            if envelope.update_id % 3 == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            self.seen.lock().await.push((user_id, envelope.update_id));
        }
    }

    fn envelope(update_id: i64, user_id: i64) -> ChatEnvelope {
        ChatEnvelope::from_message(
            update_id,
            IncomingMessage { chat_id: user_id, message_id: update_id, user_id, text: "hi".to_owned() },
        )
    }

    #[test]
    fn negative_user_ids_map_to_valid_lanes() {
        assert_eq!(lane_index(-1, 8), 7);
        assert_eq!(lane_index(16, 8), 0);
        assert_eq!(lane_index(5, 0), 0);
    }

    #[tokio::test]
    async fn preserves_per_user_order_across_lanes() {
        let recorder = Arc::new(Recorder::default());
        let lanes = UserLanes::spawn(4, 16, recorder.clone());

        for update_id in 0..40 {
            lanes.enqueue(envelope(update_id, update_id % 5)).await.expect("enqueue");
        }
        assert!(lanes.shutdown(Duration::from_secs(5)).await);

        let seen = recorder.seen.lock().await.clone();
        assert_eq!(seen.len(), 40);
        for user in 0..5 {
            let order: Vec<i64> =
                seen.iter().filter(|(u, _)| *u == user).map(|(_, update)| *update).collect();
            let mut sorted = order.clone();
            sorted.sort_unstable();
            assert_eq!(order, sorted, "user {user} processed out of order");
        }
    }

    #[tokio::test]
    async fn blocked_lane_does_not_stall_other_users() {
        let notify = Arc::new(Notify::new());
        let recorder = Arc::new(Recorder { seen: Mutex::default(), gate: Some((0, notify.clone())) });
        let lanes = UserLanes::spawn(2, 4, recorder.clone());

        lanes.enqueue(envelope(1, 0)).await.expect("enqueue blocked user");
        lanes.enqueue(envelope(2, 1)).await.expect("enqueue other user");

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if recorder.seen.lock().await.iter().any(|(user, _)| *user == 1) {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("other lane should progress");

        notify.notify_one();
        assert!(lanes.shutdown(Duration::from_secs(2)).await);
        assert_eq!(recorder.seen.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_times_out_on_stuck_lane() {
        let recorder =
            Arc::new(Recorder { seen: Mutex::default(), gate: Some((3, Arc::new(Notify::new()))) });
        let lanes = UserLanes::spawn(1, 4, recorder);
        lanes.enqueue(envelope(1, 3)).await.expect("enqueue");

        assert!(!lanes.shutdown(Duration::from_millis(50)).await);
    }
}
