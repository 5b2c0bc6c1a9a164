// ── Event store ──
//
// Indexed collection of events with the dedup invariant: at most one
// non-closed event per (router, type, subindex). A secondary index keeps
// recently-closed events addressable for eight hours so late traps and
// polls can link a fresh event back to the closed one.
//
// All mutation happens under one mutex with no await points inside, so
// concurrent `get_or_create` calls for the same key observe one id.
// Change notifications are sent on a broadcast channel before the
// mutating call returns.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::model::event::{Event, EventDetails, EventId, EventKey, EventState};

/// How long closed events stay addressable before archival.
pub const CLOSED_RETENTION: TimeDelta = TimeDelta::hours(8);

const CHANGE_CHANNEL_SIZE: usize = 512;

// ── Change notifications ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    State(EventState),
    /// One protocol-visible attribute changed; carries its legacy name.
    Attr(String),
    Log,
    History,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventChange {
    pub id: EventId,
    pub kind: ChangeKind,
}

// ── Store ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct ClosedRef {
    id: EventId,
    closed_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    events: HashMap<EventId, Event>,
    open_index: HashMap<EventKey, EventId>,
    closed_index: HashMap<EventKey, ClosedRef>,
    last_event_id: EventId,
}

pub struct EventStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<EventChange>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        Self {
            inner: Mutex::new(Inner::default()),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventChange> {
        self.changes.subscribe()
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, changes: Vec<EventChange>) {
        for change in changes {
            // No receivers is fine; notify sessions come and go.
            let _ = self.changes.send(change);
        }
    }

    /// Idempotent lookup-or-create for the event identified by `router`
    /// plus the type and subindex carried in `details`.
    ///
    /// Returns the single open event for the key when one exists
    /// (`created = false`), otherwise inserts a fresh embryonic event.
    /// If the key was closed within the retention window, the fresh
    /// event's history links back to the closed one.
    pub fn get_or_create(
        &self,
        router: &str,
        details: EventDetails,
        now: DateTime<Utc>,
    ) -> (Event, bool) {
        let key = EventKey {
            router: router.to_owned(),
            kind: details.event_type(),
            subindex: details.subindex(),
        };

        let mut inner = self.locked();
        if let Some(id) = inner.open_index.get(&key).copied() {
            if let Some(event) = inner.events.get(&id) {
                return (event.clone(), false);
            }
            // Dangling index entry; fall through and recreate.
            inner.open_index.remove(&key);
        }

        inner.last_event_id += 1;
        let id = inner.last_event_id;
        let mut event = Event::new(id, router, details, now);
        if let Some(prev) = inner.closed_index.get(&key) {
            if now - prev.closed_at <= CLOSED_RETENTION {
                event.add_history(now, format!("continuation of closed event {}", prev.id));
            }
        }
        inner.open_index.insert(key, id);
        inner.events.insert(id, event.clone());
        drop(inner);

        debug!(id, router, "created embryonic event");
        self.emit(vec![EventChange {
            id,
            kind: ChangeKind::State(EventState::Embryonic),
        }]);
        (event, true)
    }

    /// A mutable copy of the event, to be passed back via [`commit`](Self::commit).
    pub fn checkout(&self, id: EventId) -> Option<Event> {
        self.locked().events.get(&id).cloned()
    }

    /// Alias for [`checkout`](Self::checkout), for read-only callers.
    pub fn get(&self, id: EventId) -> Option<Event> {
        self.checkout(id)
    }

    /// The open event for a natural key, without creating one.
    pub fn find_open(
        &self,
        router: &str,
        kind: crate::model::event::EventType,
        subindex: &crate::model::event::SubIndex,
    ) -> Option<Event> {
        let inner = self.locked();
        let key = EventKey {
            router: router.to_owned(),
            kind,
            subindex: subindex.clone(),
        };
        let id = inner.open_index.get(&key).copied()?;
        inner.events.get(&id).cloned()
    }

    /// Write a checked-out event back.
    ///
    /// An embryonic event is committed as open. The stored copy is
    /// diffed against the incoming one; if nothing changed the commit is
    /// a no-op and no notifications fire. Otherwise `updated` is set to
    /// the commit time (unless the event was already closed) and one
    /// notification is emitted per changed attribute, plus state, log
    /// and history kinds as applicable.
    pub fn commit(&self, mut event: Event, now: DateTime<Utc>) -> Event {
        let mut inner = self.locked();
        let Some(stored) = inner.events.get(&event.id).cloned() else {
            warn!(id = event.id, "commit of unknown event id ignored");
            return event;
        };

        if event.state == EventState::Embryonic && stored.state == EventState::Embryonic {
            event.set_state(EventState::Open, now);
        }

        let history_grew = event.history.len() > stored.history.len();
        let log_grew = event.log.len() > stored.log.len();
        let old_attrs = stored.attr_map();
        if !history_grew && !log_grew && old_attrs == event.attr_map() {
            return stored;
        }

        // `updated` tracks the last effective commit, frozen after close.
        if stored.state != EventState::Closed {
            event.updated = now;
        }

        let state_changed = stored.state != event.state;
        if state_changed && event.state == EventState::Closed {
            let key = event.key();
            if inner.open_index.get(&key) == Some(&event.id) {
                inner.open_index.remove(&key);
            }
            inner.closed_index.insert(
                key,
                ClosedRef {
                    id: event.id,
                    closed_at: event.closed.unwrap_or(now),
                },
            );
        }

        let mut changes = Vec::new();
        if state_changed {
            changes.push(EventChange {
                id: event.id,
                kind: ChangeKind::State(event.state),
            });
        }
        let new_attrs = event.attr_map();
        for (name, value) in &new_attrs {
            if name == "state" {
                continue;
            }
            if old_attrs.get(name) != Some(value) {
                changes.push(EventChange {
                    id: event.id,
                    kind: ChangeKind::Attr(name.clone()),
                });
            }
        }
        for name in old_attrs.keys() {
            if name != "state" && !new_attrs.contains_key(name) {
                changes.push(EventChange {
                    id: event.id,
                    kind: ChangeKind::Attr(name.clone()),
                });
            }
        }
        if history_grew {
            changes.push(EventChange {
                id: event.id,
                kind: ChangeKind::History,
            });
        }
        if log_grew {
            changes.push(EventChange {
                id: event.id,
                kind: ChangeKind::Log,
            });
        }

        inner.events.insert(event.id, event.clone());
        drop(inner);

        self.emit(changes);
        event
    }

    /// Force-close an event with a history note. No-op when already closed.
    pub fn close(&self, id: EventId, reason: &str, now: DateTime<Utc>) -> Option<Event> {
        let mut event = self.checkout(id)?;
        if event.state == EventState::Closed {
            return Some(event);
        }
        event.add_history(now, reason);
        event.set_state(EventState::Closed, now);
        Some(self.commit(event, now))
    }

    /// Ids of all operator-visible events: everything but embryonic and
    /// closed (ignored events are listed).
    pub fn open_ids(&self) -> Vec<EventId> {
        let inner = self.locked();
        let mut ids: Vec<EventId> = inner
            .events
            .values()
            .filter(|event| {
                !matches!(event.state, EventState::Closed | EventState::Embryonic)
            })
            .map(|event| event.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter_open(&self) -> Vec<Event> {
        let inner = self.locked();
        let mut events: Vec<Event> = inner
            .events
            .values()
            .filter(|event| {
                !matches!(event.state, EventState::Closed | EventState::Embryonic)
            })
            .cloned()
            .collect();
        events.sort_unstable_by_key(|event| event.id);
        events
    }

    /// Close every non-closed event belonging to `router`.
    pub fn close_events_for_router(&self, router: &str, reason: &str, now: DateTime<Utc>) {
        let ids: Vec<EventId> = {
            let inner = self.locked();
            inner
                .events
                .values()
                .filter(|event| event.router == router && event.state != EventState::Closed)
                .map(|event| event.id)
                .collect()
        };
        for id in ids {
            self.close(id, reason, now);
        }
    }

    /// Remove and return events whose closed time fell out of the
    /// retention window; the caller archives them to disk.
    pub fn take_archivable(&self, now: DateTime<Utc>) -> Vec<Event> {
        let mut inner = self.locked();
        let cutoff = now - CLOSED_RETENTION;
        let expired: Vec<EventId> = inner
            .events
            .values()
            .filter(|event| {
                event.state == EventState::Closed
                    && event.closed.is_some_and(|closed| closed < cutoff)
            })
            .map(|event| event.id)
            .collect();

        let mut archived = Vec::with_capacity(expired.len());
        for id in &expired {
            if let Some(event) = inner.events.remove(id) {
                archived.push(event);
            }
        }
        inner
            .closed_index
            .retain(|_, closed_ref| closed_ref.closed_at >= cutoff);
        archived.sort_unstable_by_key(|event| event.id);
        archived
    }

    pub fn last_event_id(&self) -> EventId {
        self.locked().last_event_id
    }

    // ── Snapshot plumbing ────────────────────────────────────────────

    /// All events (open and recently closed), sorted by id.
    pub fn dump(&self) -> Vec<Event> {
        let inner = self.locked();
        let mut events: Vec<Event> = inner.events.values().cloned().collect();
        events.sort_unstable_by_key(|event| event.id);
        events
    }

    /// Rebuild the store from a snapshot.
    ///
    /// Duplicate non-closed events for one natural key are resolved by
    /// keeping the oldest-opened and force-closing the rest with a
    /// history note. `last_event_id` never decreases.
    pub fn restore(&self, events: Vec<Event>, last_event_id: EventId, now: DateTime<Utc>) {
        let mut inner = self.locked();
        inner.events.clear();
        inner.open_index.clear();
        inner.closed_index.clear();

        let max_seen = events.iter().map(|event| event.id).max().unwrap_or(0);
        inner.last_event_id = last_event_id.max(max_seen);

        let mut ordered = events;
        ordered.sort_unstable_by_key(|event| (event.opened, event.id));

        for mut event in ordered {
            let key = event.key();
            if event.state == EventState::Closed {
                let closed_at = event.closed.unwrap_or(now);
                let newer = inner
                    .closed_index
                    .get(&key)
                    .is_none_or(|existing| existing.closed_at <= closed_at);
                if newer {
                    inner.closed_index.insert(
                        key,
                        ClosedRef {
                            id: event.id,
                            closed_at,
                        },
                    );
                }
            } else if let Some(keeper) = inner.open_index.get(&key).copied() {
                warn!(
                    id = event.id,
                    keeper, "duplicate open event in snapshot; closing the newer"
                );
                event.add_history(now, format!("duplicate of event {keeper} at load"));
                event.set_state(EventState::Closed, now);
            } else {
                inner.open_index.insert(key, event.id);
            }
            inner.events.insert(event.id, event);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::flaps::FlapState;
    use crate::model::event::{PortState, ReachabilityState};
    use std::time::Duration;

    fn port_details(ifindex: u32) -> EventDetails {
        EventDetails::Portstate {
            ifindex,
            port: format!("ge-1/0/{ifindex}"),
            descr: "uplink".into(),
            portstate: PortState::Down,
            flaps: 0,
            flapstate: FlapState::Stable,
            ac_down: Duration::ZERO,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<EventChange>) -> Vec<EventChange> {
        let mut out = Vec::new();
        while let Ok(change) = rx.try_recv() {
            out.push(change);
        }
        out
    }

    #[test]
    fn get_or_create_is_idempotent_per_key() {
        let store = EventStore::new();
        let now = Utc::now();
        let (first, created) = store.get_or_create("sw1", port_details(150), now);
        assert!(created);
        let (second, created) = store.get_or_create("sw1", port_details(150), now);
        assert!(!created);
        assert_eq!(first.id, second.id);

        let (other, created) = store.get_or_create("sw1", port_details(151), now);
        assert!(created);
        assert_ne!(first.id, other.id);
    }

    #[test]
    fn commit_opens_embryonic_and_notifies() {
        let store = EventStore::new();
        let mut rx = store.subscribe();
        let now = Utc::now();

        let (event, _) = store.get_or_create("sw1", port_details(150), now);
        let committed = store.commit(event, now);
        assert_eq!(committed.state, EventState::Open);

        let changes = drain(&mut rx);
        assert_eq!(
            changes[0].kind,
            ChangeKind::State(EventState::Embryonic)
        );
        assert!(changes.contains(&EventChange {
            id: committed.id,
            kind: ChangeKind::State(EventState::Open)
        }));
    }

    #[test]
    fn unchanged_commit_is_silent() {
        let store = EventStore::new();
        let now = Utc::now();
        let (event, _) = store.get_or_create("sw1", port_details(150), now);
        let committed = store.commit(event, now);

        let mut rx = store.subscribe();
        let again = store.commit(committed.clone(), Utc::now());
        assert_eq!(again.updated, committed.updated);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn attribute_change_emits_one_notification() {
        let store = EventStore::new();
        let now = Utc::now();
        let (event, _) = store.get_or_create("sw1", port_details(150), now);
        let mut committed = store.commit(event, now);

        let mut rx = store.subscribe();
        if let EventDetails::Portstate { portstate, .. } = &mut committed.details {
            *portstate = PortState::Up;
        }
        let later = now + TimeDelta::seconds(5);
        store.commit(committed, later);

        let changes = drain(&mut rx);
        let attr_changes: Vec<_> = changes
            .iter()
            .filter_map(|change| match &change.kind {
                ChangeKind::Attr(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            attr_changes.iter().filter(|name| **name == "portstate").count(),
            1
        );
        assert!(attr_changes.contains(&"updated"));
    }

    #[test]
    fn closed_events_leave_open_listing_but_stay_addressable() {
        let store = EventStore::new();
        let now = Utc::now();
        let (event, _) = store.get_or_create("sw1", port_details(150), now);
        let committed = store.commit(event, now);
        assert_eq!(store.open_ids(), vec![committed.id]);

        store.close(committed.id, "closed by test", now).unwrap();
        assert!(store.open_ids().is_empty());
        let closed = store.get(committed.id).unwrap();
        assert_eq!(closed.state, EventState::Closed);
        assert!(closed.closed.is_some());
    }

    #[test]
    fn reopen_after_close_creates_fresh_event_with_back_reference() {
        let store = EventStore::new();
        let now = Utc::now();
        let (event, _) = store.get_or_create("sw1", port_details(150), now);
        let committed = store.commit(event, now);
        store.close(committed.id, "cleared", now);

        let (fresh, created) = store.get_or_create("sw1", port_details(150), now);
        assert!(created);
        assert_ne!(fresh.id, committed.id);
        assert!(
            fresh
                .history
                .iter()
                .any(|entry| entry.text.contains(&format!("closed event {}", committed.id)))
        );
    }

    #[test]
    fn archival_takes_only_long_closed_events() {
        let store = EventStore::new();
        let old = Utc::now() - TimeDelta::hours(10);
        let (event, _) = store.get_or_create("sw1", port_details(150), old);
        let committed = store.commit(event, old);
        store.close(committed.id, "done", old);

        let (fresh, _) = store.get_or_create("sw1", port_details(151), Utc::now());
        store.commit(fresh, Utc::now());

        let archived = store.take_archivable(Utc::now());
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, committed.id);
        assert!(store.get(committed.id).is_none());
        assert_eq!(store.open_ids().len(), 1);
    }

    #[test]
    fn restore_dedups_open_events_keeping_oldest() {
        let store = EventStore::new();
        let now = Utc::now();
        let older = Event {
            state: EventState::Open,
            ..Event::new(3, "sw1", port_details(150), now - TimeDelta::hours(1))
        };
        let newer = Event {
            state: EventState::Open,
            ..Event::new(9, "sw1", port_details(150), now)
        };
        store.restore(vec![newer, older], 9, now);

        assert_eq!(store.open_ids(), vec![3]);
        let closed = store.get(9).unwrap();
        assert_eq!(closed.state, EventState::Closed);
        assert!(
            closed
                .history
                .iter()
                .any(|entry| entry.text.contains("duplicate of event 3"))
        );
    }

    #[test]
    fn event_ids_stay_monotonic_across_restore() {
        let store = EventStore::new();
        let now = Utc::now();
        let survivor = Event {
            state: EventState::Open,
            ..Event::new(41, "sw1", port_details(150), now)
        };
        store.restore(vec![survivor], 41, now);

        let (event, _) = store.get_or_create(
            "sw1",
            EventDetails::Reachability {
                reachability: ReachabilityState::NoResponse,
            },
            now,
        );
        assert_eq!(event.id, 42);
    }

    #[test]
    fn force_close_for_removed_router() {
        let store = EventStore::new();
        let now = Utc::now();
        let (a, _) = store.get_or_create("sw1", port_details(1), now);
        store.commit(a, now);
        let (b, _) = store.get_or_create("gw2", port_details(1), now);
        let b = store.commit(b, now);

        store.close_events_for_router("sw1", "device removed from pollfile", now);
        assert_eq!(store.open_ids(), vec![b.id]);
    }
}
