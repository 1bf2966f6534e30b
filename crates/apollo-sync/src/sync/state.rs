//! Mutable orchestrator state: last-known notification IDs and the
//! consecutive-failure counter that drives log escalation.

use std::collections::{BTreeMap, HashMap};

use crate::model::{Notification, DEFAULT_NOTIFICATION_ID};

/// Consecutive failed cycles after which failures are logged at error level.
pub(super) const ESCALATE_AFTER_FAILURES: u32 = 3;

/// Log level classification for failed cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CycleErrorLevel {
    Warn,
    Error,
}

#[derive(Debug, Default)]
pub(super) struct SyncState {
    /// Last notification ID whose change is reflected in the store.
    notification_ids: HashMap<String, i64>,
    consecutive_errors: u32,
}

impl SyncState {
    pub(super) fn new(namespaces: &[String]) -> Self {
        Self {
            notification_ids: namespaces
                .iter()
                .map(|namespace| (namespace.clone(), DEFAULT_NOTIFICATION_ID))
                .collect(),
            consecutive_errors: 0,
        }
    }

    pub(super) fn notification_id(&self, namespace: &str) -> Option<i64> {
        self.notification_ids.get(namespace).copied()
    }

    /// IDs to advertise in the next long poll, one per configured namespace.
    /// Namespaces never seen before start at [`DEFAULT_NOTIFICATION_ID`].
    pub(super) fn known_for(&self, namespaces: &[String]) -> BTreeMap<String, i64> {
        namespaces
            .iter()
            .map(|namespace| {
                let id = self
                    .notification_id(namespace)
                    .unwrap_or(DEFAULT_NOTIFICATION_ID);
                (namespace.clone(), id)
            })
            .collect()
    }

    /// Keeps only notifications that carry new information for a configured
    /// namespace. Duplicates collapse onto the highest ID per namespace.
    pub(super) fn filter_fresh(
        &self,
        notifications: Vec<Notification>,
        namespaces: &[String],
    ) -> Vec<Notification> {
        let mut fresh: Vec<Notification> = Vec::new();
        for notification in notifications {
            if !namespaces.contains(&notification.namespace_name) {
                tracing::debug!(
                    namespace = %notification.namespace_name,
                    "apollo-sync ignoring notification for unconfigured namespace"
                );
                continue;
            }
            let known = self
                .notification_id(&notification.namespace_name)
                .unwrap_or(DEFAULT_NOTIFICATION_ID);
            if notification.notification_id <= known {
                tracing::debug!(
                    namespace = %notification.namespace_name,
                    notification_id = notification.notification_id,
                    known,
                    "apollo-sync ignoring stale notification"
                );
                continue;
            }
            match fresh
                .iter_mut()
                .find(|seen| seen.namespace_name == notification.namespace_name)
            {
                Some(seen) => {
                    seen.notification_id = seen.notification_id.max(notification.notification_id)
                }
                None => fresh.push(notification),
            }
        }
        fresh
    }

    /// Records that the store now reflects `notification_id` for `namespace`.
    /// IDs never move backwards.
    pub(super) fn advance(&mut self, namespace: &str, notification_id: i64) {
        let entry = self
            .notification_ids
            .entry(namespace.to_string())
            .or_insert(DEFAULT_NOTIFICATION_ID);
        *entry = (*entry).max(notification_id);
    }

    pub(super) fn register_success(&mut self) {
        self.consecutive_errors = 0;
    }

    pub(super) fn register_error(&mut self) -> CycleErrorLevel {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if self.consecutive_errors >= ESCALATE_AFTER_FAILURES {
            CycleErrorLevel::Error
        } else {
            CycleErrorLevel::Warn
        }
    }

    pub(super) fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}
