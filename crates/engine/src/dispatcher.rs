//! Post-commit domain event dispatch.
//!
//! Every persisted event-bearing entity has its queue drained, in tracker
//! order, before the first publish. Publishing is sequential; the first bus
//! error stops dispatch and the remaining drained events are dropped.

use thiserror::Error;
use tracing::{debug, error};

use writetrail_core::{entity::key_values, Columns, CorrelationId, DomainEvent};

use crate::tracker::ChangeTracker;

/// A domain event stamped with the commit that made its entity durable.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub correlation_id: CorrelationId,
    /// Position within the commit's dispatch order.
    pub sequence: u32,
    pub source_table: String,
    pub source_keys: Columns,
    pub event: DomainEvent,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("subscriber rejected {event}: {reason}")]
    Rejected { event: String, reason: String },

    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

pub trait NotificationBus {
    fn publish(&mut self, envelope: &EventEnvelope) -> Result<(), BusError>;
}

type Subscriber = Box<dyn FnMut(&EventEnvelope) -> Result<(), BusError>>;

/// Synchronous in-process bus. Keeps every delivered envelope and forwards it
/// to subscribers in registration order.
#[derive(Default)]
pub struct InMemoryBus {
    published: Vec<EventEnvelope>,
    subscribers: Vec<Subscriber>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        subscriber: impl FnMut(&EventEnvelope) -> Result<(), BusError> + 'static,
    ) {
        self.subscribers.push(Box::new(subscriber));
    }

    pub fn published(&self) -> &[EventEnvelope] {
        &self.published
    }
}

impl NotificationBus for InMemoryBus {
    fn publish(&mut self, envelope: &EventEnvelope) -> Result<(), BusError> {
        for subscriber in &mut self.subscribers {
            subscriber(envelope)?;
        }
        self.published.push(envelope.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub published: usize,
    /// Drained but never published because an earlier publish failed.
    pub dropped: usize,
    pub failure: Option<BusError>,
}

/// Read-and-clear every persisted event-bearing entity's queue.
pub(crate) fn collect(tracker: &mut ChangeTracker, correlation_id: CorrelationId) -> Vec<EventEnvelope> {
    let mut envelopes = Vec::new();
    for handle in tracker.handles() {
        let entry = tracker.entry_mut(handle);
        if !entry.persisted {
            continue;
        }
        let source_table = entry.entity.table().to_string();
        let source_keys = key_values(entry.entity.as_ref());
        let Some(bearer) = entry.entity.event_bearing_mut() else {
            continue;
        };
        if !bearer.has_pending_events() {
            continue;
        }
        for event in bearer.drain_events() {
            envelopes.push(EventEnvelope {
                correlation_id,
                sequence: envelopes.len() as u32,
                source_table: source_table.clone(),
                source_keys: source_keys.clone(),
                event,
            });
        }
    }
    envelopes
}

pub(crate) fn publish_all<B: NotificationBus>(bus: &mut B, envelopes: Vec<EventEnvelope>) -> DispatchReport {
    let total = envelopes.len();
    let mut report = DispatchReport::default();
    for envelope in envelopes {
        if let Err(e) = bus.publish(&envelope) {
            report.dropped = total - report.published - 1;
            error!(
                correlation_id = %envelope.correlation_id,
                event = %envelope.event.name,
                sequence = envelope.sequence,
                dropped = report.dropped,
                error = %e,
                "domain event dispatch failed"
            );
            report.failure = Some(e);
            return report;
        }
        report.published += 1;
    }
    debug!(published = report.published, "domain events dispatched");
    report
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use writetrail_core::EventBearing;

    use super::*;
    use crate::testing::Gadget;

    #[test]
    fn collect_skips_unpersisted_entities() {
        let mut tracker = ChangeTracker::new();
        let added = tracker.add(Gadget::new("new"));
        let attached = tracker.attach(Gadget::persisted(1, "old"));
        tracker.get_mut::<Gadget>(added).unwrap().raise("gadget.created");
        tracker.get_mut::<Gadget>(attached).unwrap().raise("gadget.touched");

        let envelopes = collect(&mut tracker, CorrelationId::new());
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].event.name, "gadget.touched");
        assert!(tracker.get::<Gadget>(added).unwrap().has_pending_events());
        assert!(!tracker.get::<Gadget>(attached).unwrap().has_pending_events());
    }

    #[test]
    fn per_entity_order_is_preserved() {
        let mut tracker = ChangeTracker::new();
        let a = tracker.attach(Gadget::persisted(1, "a"));
        let b = tracker.attach(Gadget::persisted(2, "b"));
        tracker.get_mut::<Gadget>(a).unwrap().raise("a1");
        tracker.get_mut::<Gadget>(b).unwrap().raise("b1");
        tracker.get_mut::<Gadget>(a).unwrap().raise("a2");

        let names: Vec<String> = collect(&mut tracker, CorrelationId::new())
            .into_iter()
            .map(|e| e.event.name)
            .collect();
        let pos = |n: &str| names.iter().position(|x| x == n).unwrap();
        assert!(pos("a1") < pos("a2"));
        assert!(names.contains(&"b1".to_string()));
    }

    #[test]
    fn failure_stops_dispatch_and_counts_dropped() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus = InMemoryBus::new();
        let log = Rc::clone(&seen);
        bus.subscribe(move |envelope| {
            if envelope.event.name == "boom" {
                return Err(BusError::Rejected {
                    event: envelope.event.name.clone(),
                    reason: "test".into(),
                });
            }
            log.borrow_mut().push(envelope.event.name.clone());
            Ok(())
        });

        let correlation_id = CorrelationId::new();
        let envelopes = ["ok", "boom", "never", "never"]
            .iter()
            .enumerate()
            .map(|(i, name)| EventEnvelope {
                correlation_id,
                sequence: i as u32,
                source_table: "gadgets".into(),
                source_keys: Columns::new(),
                event: DomainEvent::new(*name),
            })
            .collect();

        let report = publish_all(&mut bus, envelopes);
        assert_eq!(report.published, 1);
        assert_eq!(report.dropped, 2);
        assert!(report.failure.is_some());
        assert_eq!(*seen.borrow(), vec!["ok".to_string()]);
        assert_eq!(bus.published().len(), 1);
    }
}
