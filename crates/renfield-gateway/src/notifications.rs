//! Proactive-notification ledger (§4.6, §11 of SPEC_FULL: "the core owns the
//! in-process delivery fan-out and an in-memory pending/acked ledger").
//!
//! Grounded in `skynet_scheduler::engine::SchedulerEngine`'s fired_tx
//! forwarding pattern, generalized from a cron-scheduled source to an
//! externally-triggered one (webhook ingress, §10.11). The fan-out itself —
//! picking target devices by subject and room and writing `ServerFrame`
//! onto their send channels — lives in `http::webhooks`, which owns the
//! device registry and WS sender map this module doesn't.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use renfield_turn::{NotificationLedger, PendingNotification};

/// Bound on the acked-notification memory so `notification_ack` idempotence
/// (§8) doesn't grow without limit; the external Notification collaborator
/// owns durable retention (§12 Open Question decision 3).
const ACKED_CAPACITY: usize = 4096;

pub struct NotificationCenter {
    /// Most recent still-pending notification per subject (§4.4 step 1).
    pending: DashMap<String, PendingNotification>,
    acked: DashMap<String, bool>,
    acked_order: Mutex<VecDeque<String>>,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self { pending: DashMap::new(), acked: DashMap::new(), acked_order: Mutex::new(VecDeque::new()) }
    }

    /// Record a freshly delivered notification as pending for `subject_id`,
    /// returning the id assigned so the caller can attach it to the
    /// outbound `notification` frame.
    pub fn publish(&self, subject_id: &str, title: &str, body: Option<String>) -> PendingNotification {
        let _ = body;
        let pending = PendingNotification {
            notification_id: Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            title: title.to_string(),
        };
        self.pending.insert(subject_id.to_string(), pending.clone());
        pending
    }

    fn remember_acked(&self, notification_id: &str) {
        if self.acked.insert(notification_id.to_string(), true).is_some() {
            return;
        }
        let mut order = self.acked_order.lock().unwrap();
        order.push_back(notification_id.to_string());
        if order.len() > ACKED_CAPACITY {
            if let Some(oldest) = order.pop_front() {
                self.acked.remove(&oldest);
            }
        }
    }
}

#[async_trait]
impl NotificationLedger for NotificationCenter {
    async fn pending_for(&self, subject_id: &str) -> Option<PendingNotification> {
        self.pending.get(subject_id).map(|e| e.clone())
    }

    /// Idempotent (§8): acking an already-acked id is a no-op success.
    async fn ack(&self, notification_id: &str, _dismissed: bool) {
        if self.acked.contains_key(notification_id) {
            return;
        }
        self.pending.retain(|_, p| p.notification_id != notification_id);
        self.remember_acked(notification_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_pending_for_round_trips() {
        let center = NotificationCenter::new();
        let pending = center.publish("user-1", "door unlocked", None);
        let found = center.pending_for("user-1").await.unwrap();
        assert_eq!(found.notification_id, pending.notification_id);
    }

    #[tokio::test]
    async fn ack_clears_pending_and_is_idempotent() {
        let center = NotificationCenter::new();
        let pending = center.publish("user-1", "door unlocked", None);
        center.ack(&pending.notification_id, false).await;
        assert!(center.pending_for("user-1").await.is_none());
        center.ack(&pending.notification_id, false).await;
    }
}
