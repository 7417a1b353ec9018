//! Non-blocking timer wake-ups for Timer activities.

use crate::domain::instance::{ActivityId, InstanceId};
use crate::EngineError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};

/// A timer wake-up delivered on the scheduler channel
pub type TimerWake = (InstanceId, ActivityId);

// Pending entries keyed by timer id
type TimerMapEntry = (Instant, InstanceId, ActivityId);
type TimerMap = HashMap<String, TimerMapEntry>;
type SharedTimerMap = Arc<RwLock<TimerMap>>;

/// Schedules wake-ups for Timer activities without blocking any
/// scheduler task.
///
/// A background task polls the pending set on a fixed tick; expired
/// entries are removed and delivered on the channel returned by
/// [`TimerScheduler::new`]. A zero-duration timer fires on the next
/// tick.
pub struct TimerScheduler {
    timers: SharedTimerMap,
    timer_tx: mpsc::Sender<TimerWake>,
}

impl TimerScheduler {
    /// Create a scheduler and the receiving end of its wake-up channel
    pub fn new(tick: Duration) -> (Self, mpsc::Receiver<TimerWake>) {
        let (timer_tx, timer_rx) = mpsc::channel(32);

        let scheduler = Self {
            timers: Arc::new(RwLock::new(HashMap::new())),
            timer_tx,
        };

        let pending = scheduler.timers.clone();
        let tx = scheduler.timer_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;

                // Drain everything due under one write lock, then send
                // outside it so a full channel cannot hold the lock
                let due: Vec<TimerWake> = {
                    let now = Instant::now();
                    let mut pending = pending.write().await;
                    let due_ids: Vec<String> = pending
                        .iter()
                        .filter(|(_, (fires_at, _, _))| *fires_at <= now)
                        .map(|(id, _)| id.clone())
                        .collect();
                    due_ids
                        .into_iter()
                        .filter_map(|id| pending.remove(&id))
                        .map(|(_, instance_id, activity_id)| (instance_id, activity_id))
                        .collect()
                };

                for wake in due {
                    if tx.send(wake).await.is_err() {
                        // Receiver dropped; nothing left to wake
                        return;
                    }
                }
            }
        });

        (scheduler, timer_rx)
    }

    /// Schedule a wake-up for an instance parked at a Timer activity
    pub async fn schedule(
        &self,
        instance_id: &InstanceId,
        activity_id: &ActivityId,
        duration: Duration,
    ) -> Result<String, EngineError> {
        let timer_id = uuid::Uuid::new_v4().to_string();
        let expires_at = Instant::now() + duration;

        let mut timers = self.timers.write().await;
        timers.insert(
            timer_id.clone(),
            (expires_at, instance_id.clone(), activity_id.clone()),
        );

        Ok(timer_id)
    }

    /// Cancel a single timer
    pub async fn cancel(&self, timer_id: &str) -> Result<(), EngineError> {
        let mut timers = self.timers.write().await;
        timers.remove(timer_id);

        Ok(())
    }

    /// Cancel every pending timer for an instance (terminal status)
    pub async fn cancel_instance(&self, instance_id: &InstanceId) {
        let mut timers = self.timers.write().await;
        timers.retain(|_, (_, id, _)| id != instance_id);
    }

    /// Whether any timer is still pending for an instance
    pub async fn has_pending(&self, instance_id: &InstanceId) -> bool {
        self.timers
            .read()
            .await
            .values()
            .any(|(_, id, _)| id == instance_id)
    }

    /// Number of pending timers
    pub async fn pending_count(&self) -> usize {
        self.timers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_duration_timer_fires_on_next_tick() {
        let (scheduler, mut rx) = TimerScheduler::new(Duration::from_millis(10));
        let instance = InstanceId("i1".to_string());
        let activity = ActivityId("timer1".to_string());

        scheduler
            .schedule(&instance, &activity, Duration::from_millis(0))
            .await
            .unwrap();

        let wake = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timer should fire within a second")
            .expect("channel open");
        assert_eq!(wake, (instance, activity));
        assert_eq!(scheduler.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_fires() {
        let (scheduler, mut rx) = TimerScheduler::new(Duration::from_millis(10));
        let instance = InstanceId("i1".to_string());
        let activity = ActivityId("timer1".to_string());

        let timer_id = scheduler
            .schedule(&instance, &activity, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(scheduler.has_pending(&instance).await);
        scheduler.cancel(&timer_id).await.unwrap();
        assert!(!scheduler.has_pending(&instance).await);

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "cancelled timer must not fire");
    }

    #[tokio::test]
    async fn test_cancel_instance_drops_all_its_timers() {
        let (scheduler, mut rx) = TimerScheduler::new(Duration::from_millis(10));
        let doomed = InstanceId("doomed".to_string());
        let survivor = InstanceId("survivor".to_string());
        let activity = ActivityId("timer1".to_string());

        scheduler
            .schedule(&doomed, &activity, Duration::from_millis(20))
            .await
            .unwrap();
        scheduler
            .schedule(&doomed, &activity, Duration::from_millis(30))
            .await
            .unwrap();
        scheduler
            .schedule(&survivor, &activity, Duration::from_millis(20))
            .await
            .unwrap();

        scheduler.cancel_instance(&doomed).await;
        assert_eq!(scheduler.pending_count().await, 1);

        let wake = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("surviving timer should fire")
            .expect("channel open");
        assert_eq!(wake.0, survivor);
    }
}
