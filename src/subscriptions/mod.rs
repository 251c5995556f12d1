//! Durable publish/subscribe registrations.
//!
//! One document per (message type, transport address). A subscriber without
//! a logical endpoint name is a legacy registration: it is only inserted
//! when absent and never clears the endpoint of an existing record.

mod persister;

pub use persister::SubscriptionPersister;

/// Default subscriptions collection.
pub const SUBSCRIPTIONS_COLLECTION: &str = "eventsubscription";

pub(crate) const MESSAGE_TYPE_ELEMENT: &str = "message_type_name";
pub(crate) const TRANSPORT_ADDRESS_ELEMENT: &str = "transport_address";
pub(crate) const ENDPOINT_ELEMENT: &str = "endpoint";

/// Fully qualified name of a subscribed message type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType {
    pub type_name: String,
}

impl MessageType {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.type_name)
    }
}

/// Where a subscriber receives its messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscriber {
    pub transport_address: String,
    /// Logical endpoint name; `None` for legacy subscribers.
    pub endpoint: Option<String>,
}

impl Subscriber {
    pub fn new(transport_address: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            transport_address: transport_address.into(),
            endpoint,
        }
    }

    pub fn legacy(transport_address: impl Into<String>) -> Self {
        Self::new(transport_address, None)
    }

    pub fn is_legacy(&self) -> bool {
        self.endpoint.is_none()
    }
}
