//! Event classification: queue, priority, and direct-processing eligibility.
//!
//! Classification is a pure function over the raw event-type string. Nothing
//! is ever dropped here: event types we do not recognize still route to the
//! general queue, and are separately surfaced to a discovery sink so that
//! operators notice schema drift.
//!
//! # Priority Bands
//!
//! Lower number = more urgent.
//!
//! | Band | Events |
//! |------|--------|
//! | 1 | lifecycle (install/uninstall/plan-change) |
//! | 2 | messages |
//! | 3 | appointments + financial (invoice/order) |
//! | 4 | contacts |
//! | 5 | everything else |
//!
//! Only message events are direct-eligible under the current policy. That is
//! a tunable, not a structural constraint.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The durable queues work items are partitioned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Lifecycle events: install, uninstall, plan changes.
    Critical,
    /// Inbound/outbound messages and conversation updates.
    Messages,
    /// Appointment and financial events.
    Appointments,
    /// Contact create/update/delete and attribute updates.
    Contacts,
    /// Everything else, including unrecognized event types.
    General,
}

impl QueueName {
    /// All queues, in drain-priority order.
    pub const ALL: [QueueName; 5] = [
        QueueName::Critical,
        QueueName::Messages,
        QueueName::Appointments,
        QueueName::Contacts,
        QueueName::General,
    ];

    /// Returns the queue name as a stable string (used in URLs and storage).
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Critical => "critical",
            QueueName::Messages => "messages",
            QueueName::Appointments => "appointments",
            QueueName::Contacts => "contacts",
            QueueName::General => "general",
        }
    }

    /// Parses a queue name from its stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(QueueName::Critical),
            "messages" => Some(QueueName::Messages),
            "appointments" => Some(QueueName::Appointments),
            "contacts" => Some(QueueName::Contacts),
            "general" => Some(QueueName::General),
            _ => None,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Work-item priority. Lower value = more urgent; 1 is the highest band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// The routing decision for one event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Which durable queue the event belongs to.
    pub queue: QueueName,

    /// Priority band within the queue store.
    pub priority: Priority,

    /// Whether the event may also be processed synchronously on the request
    /// path (in addition to, never instead of, enqueueing).
    pub direct_eligible: bool,

    /// Whether the event type was recognized. Unrecognized types still route
    /// (to the general queue) but should be reported to the discovery sink.
    pub recognized: bool,
}

/// Lifecycle event types (priority 1).
const LIFECYCLE_EVENTS: &[&str] = &["INSTALL", "UNINSTALL", "PlanChange"];

/// Message event types (priority 2, direct-eligible).
const MESSAGE_EVENTS: &[&str] = &[
    "InboundMessage",
    "OutboundMessage",
    "ConversationUnreadUpdate",
    "LCEmailStats",
];

/// Appointment and financial event types (priority 3).
const APPOINTMENT_EVENTS: &[&str] = &[
    "AppointmentCreate",
    "AppointmentUpdate",
    "AppointmentDelete",
    "InvoicePaid",
    "InvoiceVoid",
    "OrderCreate",
];

/// Contact event types (priority 4).
const CONTACT_EVENTS: &[&str] = &[
    "ContactCreate",
    "ContactUpdate",
    "ContactDelete",
    "ContactDndUpdate",
    "ContactTagUpdate",
];

/// Other recognized event types that intentionally take the general queue.
const GENERAL_EVENTS: &[&str] = &[
    "OpportunityCreate",
    "OpportunityUpdate",
    "OpportunityDelete",
    "OpportunityStatusUpdate",
    "TaskCreate",
    "TaskComplete",
    "NoteCreate",
    "CampaignStatusUpdate",
];

/// Classifies an event type into its queue, priority, and direct eligibility.
pub fn classify(event_type: &str) -> Route {
    if LIFECYCLE_EVENTS.contains(&event_type) {
        return Route {
            queue: QueueName::Critical,
            priority: Priority(1),
            direct_eligible: false,
            recognized: true,
        };
    }
    if MESSAGE_EVENTS.contains(&event_type) {
        return Route {
            queue: QueueName::Messages,
            priority: Priority(2),
            direct_eligible: true,
            recognized: true,
        };
    }
    if APPOINTMENT_EVENTS.contains(&event_type) {
        return Route {
            queue: QueueName::Appointments,
            priority: Priority(3),
            direct_eligible: false,
            recognized: true,
        };
    }
    if CONTACT_EVENTS.contains(&event_type) {
        return Route {
            queue: QueueName::Contacts,
            priority: Priority(4),
            direct_eligible: false,
            recognized: true,
        };
    }

    Route {
        queue: QueueName::General,
        priority: Priority(5),
        direct_eligible: false,
        recognized: GENERAL_EVENTS.contains(&event_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lifecycle_events_are_priority_one() {
        for ty in LIFECYCLE_EVENTS {
            let route = classify(ty);
            assert_eq!(route.queue, QueueName::Critical);
            assert_eq!(route.priority, Priority(1));
            assert!(!route.direct_eligible);
            assert!(route.recognized);
        }
    }

    #[test]
    fn only_message_events_are_direct_eligible() {
        for ty in MESSAGE_EVENTS {
            assert!(classify(ty).direct_eligible, "{ty} should be direct-eligible");
        }
        for ty in LIFECYCLE_EVENTS
            .iter()
            .chain(APPOINTMENT_EVENTS)
            .chain(CONTACT_EVENTS)
            .chain(GENERAL_EVENTS)
        {
            assert!(!classify(ty).direct_eligible, "{ty} should not be direct-eligible");
        }
    }

    #[test]
    fn contact_events_route_to_contacts() {
        let route = classify("ContactTagUpdate");
        assert_eq!(route.queue, QueueName::Contacts);
        assert_eq!(route.priority, Priority(4));
    }

    #[test]
    fn financial_events_share_appointments_band() {
        assert_eq!(classify("InvoicePaid").priority, Priority(3));
        assert_eq!(classify("OrderCreate").queue, QueueName::Appointments);
    }

    #[test]
    fn recognized_general_events_are_not_discovery() {
        let route = classify("TaskCreate");
        assert_eq!(route.queue, QueueName::General);
        assert!(route.recognized);
    }

    #[test]
    fn unknown_event_routes_to_general_unrecognized() {
        let route = classify("SomethingBrandNew");
        assert_eq!(route.queue, QueueName::General);
        assert_eq!(route.priority, Priority(5));
        assert!(!route.recognized);
        assert!(!route.direct_eligible);
    }

    #[test]
    fn queue_name_parse_roundtrip() {
        for queue in QueueName::ALL {
            assert_eq!(QueueName::parse(queue.as_str()), Some(queue));
        }
        assert_eq!(QueueName::parse("nope"), None);
    }

    proptest! {
        /// No event type is ever dropped: classification is total.
        #[test]
        fn prop_classification_is_total(event_type in ".{0,64}") {
            let route = classify(&event_type);
            prop_assert!(route.priority.0 >= 1 && route.priority.0 <= 5);
        }

        /// Unrecognized inputs land in the general queue at the lowest band.
        #[test]
        fn prop_unknown_types_go_to_general(event_type in "[a-z]{1,20}") {
            // Lowercase strings never collide with the known (CamelCase or
            // upper-case) event type tables.
            let route = classify(&event_type);
            prop_assert_eq!(route.queue, QueueName::General);
            prop_assert_eq!(route.priority, Priority(5));
            prop_assert!(!route.recognized);
        }

        /// Priority bands are consistent with queue assignment.
        #[test]
        fn prop_priority_matches_queue(event_type in ".{0,32}") {
            let route = classify(&event_type);
            let expected = match route.queue {
                QueueName::Critical => 1,
                QueueName::Messages => 2,
                QueueName::Appointments => 3,
                QueueName::Contacts => 4,
                QueueName::General => 5,
            };
            prop_assert_eq!(route.priority.0, expected);
        }
    }
}
