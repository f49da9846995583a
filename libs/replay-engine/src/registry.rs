use std::collections::HashMap;

use replay_api::TypeKey;

/// Handle of a registered subscriber, assigned in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub(crate) usize);

impl SubscriberId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subscriber#{}", self.0)
    }
}

/// Type-keyed subscription table.
///
/// Each type maps to its subscribers in subscription order. Subscribing twice
/// is a no-op, as is unsubscribing a pair that is not present.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_type: HashMap<TypeKey, Vec<SubscriberId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the pair was newly added.
    pub fn subscribe(&mut self, subscriber: SubscriberId, type_key: TypeKey) -> bool {
        let subscribers = self.by_type.entry(type_key).or_default();
        if subscribers.contains(&subscriber) {
            return false;
        }
        subscribers.push(subscriber);
        true
    }

    /// Returns `true` when the pair was present.
    pub fn unsubscribe(&mut self, subscriber: SubscriberId, type_key: &TypeKey) -> bool {
        let Some(subscribers) = self.by_type.get_mut(type_key) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| *s != subscriber);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            self.by_type.remove(type_key);
        }
        removed
    }

    /// Subscribers of `type_key` in subscription order. Empty when none.
    pub fn resolve(&self, type_key: &TypeKey) -> &[SubscriberId] {
        self.by_type.get(type_key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_subscribed(&self, subscriber: SubscriberId, type_key: &TypeKey) -> bool {
        self.resolve(type_key).contains(&subscriber)
    }

    /// Types `subscriber` currently receives, sorted by name.
    pub fn types_of(&self, subscriber: SubscriberId) -> Vec<TypeKey> {
        let mut types: Vec<TypeKey> = self
            .by_type
            .iter()
            .filter(|(_, subs)| subs.contains(&subscriber))
            .map(|(key, _)| key.clone())
            .collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_type.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_idempotent_and_ordered() {
        let mut registry = SubscriptionRegistry::new();
        let quote = TypeKey::new("quote");

        assert!(registry.subscribe(SubscriberId(2), quote.clone()));
        assert!(registry.subscribe(SubscriberId(0), quote.clone()));
        assert!(!registry.subscribe(SubscriberId(2), TypeKey::new("quote")));

        assert_eq!(registry.resolve(&quote), [SubscriberId(2), SubscriberId(0)]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unknown_type_resolves_to_nothing() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.resolve(&TypeKey::new("nobody")).is_empty());
    }

    #[test]
    fn unsubscribe_removes_only_that_pair() {
        let mut registry = SubscriptionRegistry::new();
        let quote = TypeKey::new("quote");
        let trade = TypeKey::new("trade");
        registry.subscribe(SubscriberId(0), quote.clone());
        registry.subscribe(SubscriberId(0), trade.clone());
        registry.subscribe(SubscriberId(1), quote.clone());

        assert!(registry.unsubscribe(SubscriberId(0), &quote));
        assert!(!registry.unsubscribe(SubscriberId(0), &quote));
        assert!(!registry.unsubscribe(SubscriberId(5), &TypeKey::new("missing")));

        assert_eq!(registry.resolve(&quote), [SubscriberId(1)]);
        assert!(registry.is_subscribed(SubscriberId(0), &trade));
        assert_eq!(registry.types_of(SubscriberId(0)), vec![trade]);
    }

    #[test]
    fn emptied_types_are_dropped() {
        let mut registry = SubscriptionRegistry::new();
        let quote = TypeKey::new("quote");
        registry.subscribe(SubscriberId(0), quote.clone());
        registry.unsubscribe(SubscriberId(0), &quote);
        assert!(registry.is_empty());

        registry.subscribe(SubscriberId(3), quote);
        registry.clear();
        assert_eq!(registry.len(), 0);
    }
}
