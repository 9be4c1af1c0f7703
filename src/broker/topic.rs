use std::collections::BTreeSet;

/// A topic held by the in-memory broker.
///
/// Keeps the names of the subscriptions attached to it; every publish fans
/// out to each of them.
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscriptions: BTreeSet<String>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscriptions: BTreeSet::new(),
        }
    }

    /// Attaches a subscription. Attaching twice has no effect.
    pub fn attach(&mut self, subscription: &str) {
        self.subscriptions.insert(subscription.to_string());
    }

    pub fn detach(&mut self, subscription: &str) {
        self.subscriptions.remove(subscription);
    }
}
