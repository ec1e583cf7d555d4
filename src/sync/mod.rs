pub mod auth;
pub mod gateway;
pub mod keyring;
pub mod realtime;
pub mod reconcile;
pub mod supabase;

#[cfg(test)]
pub(crate) mod memory;

use crate::core::task::Task;

/// A row change delivered by the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert(Task),
    Update(Task),
    /// Only the key of the deleted row is guaranteed to be set.
    Delete(Task),
}

impl ChangeEvent {
    pub fn task(&self) -> &Task {
        match self {
            Self::Insert(t) | Self::Update(t) | Self::Delete(t) => t,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "INSERT",
            Self::Update(_) => "UPDATE",
            Self::Delete(_) => "DELETE",
        }
    }
}

/// State of a change feed subscription, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Subscribed,
    ChannelError(String),
    TimedOut,
    Closed,
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subscribed => f.write_str("SUBSCRIBED"),
            Self::ChannelError(e) => write!(f, "CHANNEL_ERROR ({})", e),
            Self::TimedOut => f.write_str("TIMED_OUT"),
            Self::Closed => f.write_str("CLOSED"),
        }
    }
}

/// Everything a subscription can hand to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    Change(ChangeEvent),
    Status(SubscriptionStatus),
}

/// The table a change feed is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableScope {
    pub schema: String,
    pub table: String,
}

impl TableScope {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl Default for TableScope {
    fn default() -> Self {
        Self::new("public", "tasks")
    }
}
