use dashmap::DashMap;
use parking_lot::RwLock;
use sm_common::Filters;

/// `{ message_class, handler_id, filters }` per spec §3.4. `message_class`
/// is the key of the owning table entry, not stored redundantly here.
#[derive(Clone)]
pub struct Subscription {
    pub handler_id: String,
    pub filters: Filters,
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.handler_id == other.handler_id && self.filters == other.filters
    }
}

/// `message_class -> Vec<Subscription>`, guarded per-class by a read/write
/// lock so `route` (reader) never blocks on another class's writer, per
/// spec §5's "safe for readers during writers" requirement.
#[derive(Default)]
pub struct SubscriptionTable {
    by_class: DashMap<String, RwLock<Vec<Subscription>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `{handler_id, filters}` unless an identical subscription
    /// already exists. Returns `true` if a new subscription was added.
    pub fn add(&self, message_class: &str, handler_id: &str, filters: Filters) -> bool {
        let entry = self
            .by_class
            .entry(message_class.to_string())
            .or_insert_with(|| RwLock::new(Vec::new()));
        let mut subs = entry.write();
        let candidate = Subscription {
            handler_id: handler_id.to_string(),
            filters,
        };
        if subs.iter().any(|s| *s == candidate) {
            return false;
        }
        subs.push(candidate);
        true
    }

    /// Removes the subscription with this exact `(handler_id, filters)`.
    /// Returns `true` if the `(message_class, handler_id)` pair has no
    /// remaining subscriptions, signaling the caller to destroy its DDQ.
    pub fn drop_one(&self, message_class: &str, handler_id: &str, filters: &Filters) -> bool {
        let Some(entry) = self.by_class.get(message_class) else {
            return true;
        };
        let mut subs = entry.write();
        subs.retain(|s| !(s.handler_id == handler_id && s.filters == *filters));
        !subs.iter().any(|s| s.handler_id == handler_id)
    }

    /// Removes every subscription for `handler_id` under `message_class`.
    pub fn drop_subscriber(&self, message_class: &str, handler_id: &str) {
        if let Some(entry) = self.by_class.get(message_class) {
            entry.write().retain(|s| s.handler_id != handler_id);
        }
    }

    /// Removes every subscription under `message_class`.
    pub fn drop_all(&self, message_class: &str) {
        if let Some(entry) = self.by_class.get(message_class) {
            entry.write().clear();
        }
    }

    /// Resets all state across every class (`drop_all!`).
    pub fn drop_all_classes(&self) {
        self.by_class.clear();
    }

    pub fn subscriptions_for(&self, message_class: &str) -> Vec<Subscription> {
        self.by_class
            .get(message_class)
            .map(|entry| entry.read().clone())
            .unwrap_or_default()
    }
}
