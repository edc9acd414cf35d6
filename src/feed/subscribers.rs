use std::sync::Arc;

use crate::feed::state::ConnectionState;
use crate::schema::Snapshot;

pub type SnapshotCallback = Box<dyn FnMut(&Arc<Snapshot>) + Send>;
pub type ConnectionCallback = Box<dyn FnMut(&ConnectionState) + Send>;

/// Identifies one registration. Allocated by the client handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

/// A pair of callbacks registered by one consumer.
///
/// Both run on the feed driver task, synchronously, inside the dispatch of
/// the event that caused them. They must not block.
pub struct Subscriber {
    on_snapshot: SnapshotCallback,
    on_connection_change: ConnectionCallback,
}

impl Subscriber {
    pub fn new<S, C>(on_snapshot: S, on_connection_change: C) -> Self
    where
        S: FnMut(&Arc<Snapshot>) + Send + 'static,
        C: FnMut(&ConnectionState) + Send + 'static,
    {
        Self {
            on_snapshot: Box::new(on_snapshot),
            on_connection_change: Box::new(on_connection_change),
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber").finish_non_exhaustive()
    }
}

/// Ordered subscriber set. Notification order is registration order.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    entries: Vec<(SubscriberId, Subscriber)>,
}

impl SubscriberRegistry {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Registers `sub` and immediately hands it the current view.
    pub fn add(
        &mut self,
        id: SubscriberId,
        mut sub: Subscriber,
        latest: Option<&Arc<Snapshot>>,
        state: &ConnectionState,
    ) {
        (sub.on_connection_change)(state);
        if let Some(snapshot) = latest {
            (sub.on_snapshot)(snapshot);
        }
        self.entries.push((id, sub));
    }

    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(sid, _)| *sid != id);
        self.entries.len() != before
    }

    pub fn publish_snapshot(&mut self, snapshot: &Arc<Snapshot>) {
        for (_, sub) in &mut self.entries {
            (sub.on_snapshot)(snapshot);
        }
    }

    pub fn publish_connection(&mut self, state: &ConnectionState) {
        for (_, sub) in &mut self.entries {
            (sub.on_connection_change)(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Subscriber {
        let snaps = log.clone();
        let states = log.clone();
        Subscriber::new(
            move |s| snaps.lock().unwrap().push(format!("{name}:snap{}", s.sequence_id)),
            move |c| states.lock().unwrap().push(format!("{name}:{}", c.phase)),
        )
    }

    #[test]
    fn publishes_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = SubscriberRegistry::default();
        let state = ConnectionState::default();

        reg.add(SubscriberId(2), recorder(&log, "b"), None, &state);
        reg.add(SubscriberId(1), recorder(&log, "a"), None, &state);
        log.lock().unwrap().clear();

        reg.publish_connection(&state);
        assert_eq!(*log.lock().unwrap(), vec!["b:disconnected", "a:disconnected"]);
    }

    #[test]
    fn remove_reports_whether_anything_was_removed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = SubscriberRegistry::default();
        reg.add(SubscriberId(7), recorder(&log, "x"), None, &ConnectionState::default());

        assert!(reg.remove(SubscriberId(7)));
        assert!(!reg.remove(SubscriberId(7)));
        assert!(reg.is_empty());
    }
}
