/// Interaction toggle events and the worker that refreshes profiles
///
/// Follow / bookmark toggles are dispatched onto a bounded channel and a
/// single worker task recomputes the affected user's preference. Dispatch
/// never blocks the caller: when the queue is full the event is dropped
/// and the bulk `recompute-user-preferences` job picks the user up later.
use super::PreferenceService;
use crate::models::{InteractionType, PresentationId, UserId};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

/// A user switched an interaction on or off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionToggled {
    pub user_id: UserId,
    pub presentation_id: PresentationId,
    pub kind: InteractionType,
    /// `true` when the interaction was added, `false` when removed
    pub active: bool,
}

impl InteractionToggled {
    /// Only follows and bookmarks are toggles worth an inline recompute.
    pub fn triggers_recompute(&self) -> bool {
        matches!(self.kind, InteractionType::Follow | InteractionType::Bookmark)
    }
}

pub type EventReceiver = mpsc::Receiver<InteractionToggled>;

/// Cloneable producer side of the event queue
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: mpsc::Sender<InteractionToggled>,
}

/// Create the event queue with a bounded capacity
pub fn create_event_queue(capacity: usize) -> (EventDispatcher, EventReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (EventDispatcher { sender }, receiver)
}

impl EventDispatcher {
    /// Enqueue an event. Returns whether it was accepted.
    pub fn dispatch(&self, event: InteractionToggled) -> bool {
        if !event.triggers_recompute() {
            debug!(user_id = event.user_id, kind = %event.kind, "Ignoring toggle");
            return false;
        }

        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(
                    user_id = event.user_id,
                    presentation_id = event.presentation_id,
                    "Preference event queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                warn!(
                    user_id = event.user_id,
                    "Preference worker stopped, dropping event"
                );
                false
            }
        }
    }
}

/// Spawn the worker that handles toggle events until every dispatcher is
/// dropped. The handle resolves to the number of profiles recomputed.
pub fn spawn_preference_worker(
    service: Arc<PreferenceService>,
    mut receiver: EventReceiver,
) -> tokio::task::JoinHandle<u64> {
    tokio::spawn(async move {
        info!("Preference worker started");
        let mut processed = 0u64;

        while let Some(event) = receiver.recv().await {
            debug!(
                user_id = event.user_id,
                presentation_id = event.presentation_id,
                kind = %event.kind,
                action = if event.active { "added" } else { "removed" },
                "Handling interaction toggle"
            );
            match service.recompute(event.user_id, Utc::now()).await {
                Ok(_) => processed += 1,
                Err(e) => {
                    error!(
                        user_id = event.user_id,
                        presentation_id = event.presentation_id,
                        "Failed to recompute preference: {}",
                        e
                    );
                }
            }
        }

        info!(processed = processed, "Preference worker stopped (channel closed)");
        processed
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toggle(kind: InteractionType) -> InteractionToggled {
        InteractionToggled {
            user_id: 1,
            presentation_id: 2,
            kind,
            active: true,
        }
    }

    #[test]
    fn test_only_follow_and_bookmark_trigger() {
        assert!(toggle(InteractionType::Follow).triggers_recompute());
        assert!(toggle(InteractionType::Bookmark).triggers_recompute());
        assert!(!toggle(InteractionType::Like).triggers_recompute());
        assert!(!toggle(InteractionType::View).triggers_recompute());
    }

    #[tokio::test]
    async fn test_dispatch_drops_when_full() {
        let (dispatcher, mut receiver) = create_event_queue(1);
        assert!(dispatcher.dispatch(toggle(InteractionType::Follow)));
        assert!(!dispatcher.dispatch(toggle(InteractionType::Bookmark)));
        assert!(!dispatcher.dispatch(toggle(InteractionType::Click)));

        assert_eq!(receiver.recv().await, Some(toggle(InteractionType::Follow)));
    }

    #[tokio::test]
    async fn test_dispatch_after_worker_gone() {
        let (dispatcher, receiver) = create_event_queue(4);
        drop(receiver);
        assert!(!dispatcher.dispatch(toggle(InteractionType::Follow)));
    }
}
