//! Event bus - synchronous publish/subscribe between sectors
//!
//! Sectors never hold references to each other. Anything one sector needs
//! from another (raw materials, equipment, cargo, a new module) is requested
//! by publishing an [`Event`], and answered the same way.
//!
//! Delivery is synchronous: `publish` invokes every subscriber of the event's
//! type, in subscription order, before returning. The subscriber list is
//! snapshotted under the lock and callbacks run outside it, so a callback
//! may itself subscribe or publish without deadlocking. A failing callback
//! (error or panic) is logged and does not stop delivery to the others.
//! Events with no subscribers are dropped.
//!
//! Sectors subscribe through an [`Inbox`], which only buffers events. The
//! buffered events are handled at the start of the owning sector's next
//! step, so no sector's state is touched while another sector is mid-step.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::sectors::SectorKind;

/// Closed set of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ConstructionRequest,
    ModuleCreated,
    ResourceRequest,
    ResourceAllocated,
    EquipmentRequest,
    EquipmentAllocated,
    TransportRequest,
    PayloadDelivered,
}

/// Which half of a round trip a delivery belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    /// Cargo leaving the settlement, delivered at the far end
    Outbound,
    /// Cargo brought back to the settlement
    Return,
}

/// A unit of freight carried by a rocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cargo {
    /// Item name (equipment type or resource)
    pub item: String,
    pub quantity: u32,
    /// Total mass of this cargo entry
    pub mass_kg: f64,
    /// Sector that receives the cargo on arrival, if any
    pub recipient: Option<SectorKind>,
}

/// Event payloads, one variant per [`EventType`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A sector wants a module built
    ConstructionRequest {
        requesting_sector: SectorKind,
        module_type: String,
    },
    /// A module finished construction
    ModuleCreated {
        requesting_sector: SectorKind,
        module_type: String,
        request_id: u64,
    },
    /// A sector asks manufacturing for raw resources
    ResourceRequest {
        requesting_sector: SectorKind,
        resource: String,
        amount: f64,
    },
    /// Resources have left `source`'s stock for `recipient`
    ResourceAllocated {
        source: SectorKind,
        recipient: SectorKind,
        resource: String,
        amount: f64,
    },
    /// A sector asks equipment manufacturing for equipment
    EquipmentRequest {
        requesting_sector: SectorKind,
        equipment: String,
        quantity: u32,
    },
    /// Equipment has left the equipment inventory for `recipient`
    EquipmentAllocated {
        recipient: SectorKind,
        equipment: String,
        quantity: u32,
    },
    /// A sector asks for cargo to be shipped in
    TransportRequest {
        requesting_sector: SectorKind,
        cargo: String,
        quantity: u32,
        mass_kg: f64,
    },
    /// A rocket completed a leg and unloaded its cargo
    PayloadDelivered {
        rocket_id: u32,
        leg: Leg,
        cargo: Vec<Cargo>,
    },
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::ConstructionRequest { .. } => EventType::ConstructionRequest,
            Event::ModuleCreated { .. } => EventType::ModuleCreated,
            Event::ResourceRequest { .. } => EventType::ResourceRequest,
            Event::ResourceAllocated { .. } => EventType::ResourceAllocated,
            Event::EquipmentRequest { .. } => EventType::EquipmentRequest,
            Event::EquipmentAllocated { .. } => EventType::EquipmentAllocated,
            Event::TransportRequest { .. } => EventType::TransportRequest,
            Event::PayloadDelivered { .. } => EventType::PayloadDelivered,
        }
    }
}

/// Error reported by a subscriber callback
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EventError(pub String);

/// Subscriber callback. Identity (for duplicate detection and
/// unsubscribing) is the `Arc` allocation.
pub type Callback = Arc<dyn Fn(&Event) -> Result<(), EventError> + Send + Sync>;

/// Thread-safe synchronous publish/subscribe broker
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<EventType, Vec<Callback>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventType, Vec<Callback>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for `event_type`. Registering the same callback
    /// twice is a no-op.
    pub fn subscribe(&self, event_type: EventType, callback: Callback) {
        let mut subscribers = self.lock();
        let list = subscribers.entry(event_type).or_default();
        if list.iter().any(|existing| Arc::ptr_eq(existing, &callback)) {
            log::debug!("Duplicate subscription to {:?} ignored", event_type);
            return;
        }
        list.push(callback);
    }

    /// Remove `callback` from `event_type`. Unknown callbacks are ignored.
    pub fn unsubscribe(&self, event_type: EventType, callback: &Callback) {
        let mut subscribers = self.lock();
        let removed = match subscribers.get_mut(&event_type) {
            Some(list) => {
                let before = list.len();
                list.retain(|existing| !Arc::ptr_eq(existing, callback));
                list.len() != before
            }
            None => false,
        };
        if !removed {
            log::warn!("Unsubscribe from {:?}: callback was not subscribed", event_type);
        }
    }

    /// Deliver `event` to every current subscriber of its type. Returns the
    /// number of callbacks that completed successfully.
    pub fn publish(&self, event: Event) -> usize {
        let event_type = event.event_type();
        let snapshot: Vec<Callback> = self
            .lock()
            .get(&event_type)
            .cloned()
            .unwrap_or_default();

        if snapshot.is_empty() {
            log::debug!("No subscribers for {:?}; event dropped", event_type);
            return 0;
        }

        let mut delivered = 0;
        for callback in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => log::error!("Subscriber to {:?} failed: {}", event_type, e),
                Err(_) => log::error!("Subscriber to {:?} panicked", event_type),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.lock().get(&event_type).map_or(0, Vec::len)
    }
}

/// Order in which an inbox hands back its buffered events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxOrder {
    /// Oldest first
    #[default]
    Fifo,
    /// Newest first
    Lifo,
}

/// Per-sector buffer of events awaiting the owner's next step
#[derive(Clone, Default)]
pub struct Inbox {
    queue: Arc<Mutex<VecDeque<Event>>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer every `event_type` event accepted by `filter`.
    pub fn subscribe<F>(&self, bus: &EventBus, event_type: EventType, filter: F)
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let queue = Arc::clone(&self.queue);
        let callback: Callback = Arc::new(move |event: &Event| -> Result<(), EventError> {
            if filter(event) {
                queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_back(event.clone());
            }
            Ok(())
        });
        bus.subscribe(event_type, callback);
    }

    /// Take every buffered event, in the requested order.
    pub fn drain(&self, order: InboxOrder) -> Vec<Event> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        match order {
            InboxOrder::Fifo => queue.drain(..).collect(),
            InboxOrder::Lifo => queue.drain(..).rev().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(amount: f64) -> Event {
        Event::ResourceRequest {
            requesting_sector: SectorKind::Construction,
            resource: "regolith".into(),
            amount,
        }
    }

    fn counter(count: &Arc<AtomicUsize>) -> Callback {
        let count = Arc::clone(count);
        Arc::new(move |_: &Event| -> Result<(), EventError> {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventType::ResourceRequest, counter(&count));
        bus.subscribe(EventType::ResourceRequest, counter(&count));

        assert_eq!(bus.publish(request(1.0)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_subscription_is_noop() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let cb = counter(&count);
        bus.subscribe(EventType::ResourceRequest, Arc::clone(&cb));
        bus.subscribe(EventType::ResourceRequest, cb);

        assert_eq!(bus.subscriber_count(EventType::ResourceRequest), 1);
        bus.publish(request(1.0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let cb = counter(&count);
        bus.subscribe(EventType::ResourceRequest, Arc::clone(&cb));
        bus.unsubscribe(EventType::ResourceRequest, &cb);
        // Unknown callback: logged, not fatal
        bus.unsubscribe(EventType::ResourceRequest, &cb);

        assert_eq!(bus.publish(request(1.0)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_subscribers_drops_event() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(request(1.0)), 0);
    }

    #[test]
    fn test_event_types_are_isolated() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventType::ModuleCreated, counter(&count));
        bus.publish(request(1.0));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventType::ResourceRequest, counter(&count));
        bus.subscribe(
            EventType::ResourceRequest,
            Arc::new(|_: &Event| -> Result<(), EventError> { Err(EventError("boom".into())) }),
        );
        bus.subscribe(
            EventType::ResourceRequest,
            Arc::new(|_: &Event| -> Result<(), EventError> { panic!("subscriber panic") }),
        );
        bus.subscribe(EventType::ResourceRequest, counter(&count));

        assert_eq!(bus.publish(request(1.0)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_can_publish_without_deadlock() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventType::ModuleCreated, counter(&count));

        let inner = Arc::clone(&bus);
        bus.subscribe(
            EventType::ResourceRequest,
            Arc::new(move |_: &Event| -> Result<(), EventError> {
                inner.publish(Event::ModuleCreated {
                    requesting_sector: SectorKind::Science,
                    module_type: "rover".into(),
                    request_id: 1,
                });
                Ok(())
            }),
        );

        bus.publish(request(1.0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inbox_buffers_filtered_events() {
        let bus = EventBus::new();
        let inbox = Inbox::new();
        inbox.subscribe(&bus, EventType::ResourceRequest, |e| {
            matches!(e, Event::ResourceRequest { amount, .. } if *amount > 1.0)
        });

        bus.publish(request(0.5));
        bus.publish(request(2.0));
        bus.publish(request(3.0));

        assert_eq!(inbox.len(), 2);
        let fifo = inbox.drain(InboxOrder::Fifo);
        assert_eq!(fifo, vec![request(2.0), request(3.0)]);
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_inbox_lifo_order() {
        let bus = EventBus::new();
        let inbox = Inbox::new();
        inbox.subscribe(&bus, EventType::ResourceRequest, |_| true);
        bus.publish(request(1.0));
        bus.publish(request(2.0));

        assert_eq!(inbox.drain(InboxOrder::Lifo), vec![request(2.0), request(1.0)]);
    }
}
