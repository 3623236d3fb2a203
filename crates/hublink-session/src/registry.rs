use hublink_core::{ClientError, Handler, TransportConnection, Unsubscribe};

/// Event handlers registered on a session, in registration order.
///
/// The registry outlives individual transports: every new connection gets
/// the whole registry replayed onto it before it starts.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<(String, Vec<Handler>)>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a handler and attach it to `live` if there is one.
    ///
    /// # Errors
    /// `Argument` for an empty method, `AlreadyExists` when the same handler
    /// is already registered under `method`.
    pub fn add(
        &mut self,
        method: &str,
        handler: Handler,
        live: Option<&dyn TransportConnection>,
    ) -> Result<(), ClientError> {
        if method.is_empty() {
            return Err(ClientError::Argument("method"));
        }

        let pos = match self.entries.iter().position(|(m, _)| m == method) {
            Some(pos) => pos,
            None => {
                self.entries.push((method.to_string(), Vec::new()));
                self.entries.len() - 1
            }
        };
        let handlers = &mut self.entries[pos].1;
        if handlers.contains(&handler) {
            return Err(ClientError::AlreadyExists(method.to_string()));
        }

        if let Some(live) = live {
            live.on(method, handler.clone());
        }
        handlers.push(handler);
        Ok(())
    }

    /// Forget handlers and detach them from `live`. Unknown targets are ignored.
    pub fn remove(&mut self, target: &Unsubscribe, live: Option<&dyn TransportConnection>) {
        let detach = |method: &str, handler: &Handler| {
            if let Some(live) = live {
                live.off(method, handler);
            }
        };

        match target {
            Unsubscribe::All => {
                for (method, handlers) in self.entries.drain(..) {
                    handlers.iter().for_each(|h| detach(method.as_str(), h));
                }
            }
            Unsubscribe::Method(method) => {
                if let Some(pos) = self.entries.iter().position(|(m, _)| m == method) {
                    let (method, handlers) = self.entries.remove(pos);
                    handlers.iter().for_each(|h| detach(method.as_str(), h));
                }
            }
            Unsubscribe::Handler(method, handler) => {
                let Some(pos) = self.entries.iter().position(|(m, _)| m == method) else {
                    return;
                };
                let handlers = &mut self.entries[pos].1;
                if let Some(idx) = handlers.iter().position(|h| h == handler) {
                    detach(method.as_str(), &handlers.remove(idx));
                }
                if handlers.is_empty() {
                    self.entries.remove(pos);
                }
            }
        }
    }

    /// Attach every registered handler to a freshly built connection.
    pub fn replay(&self, connection: &dyn TransportConnection) {
        for (method, handlers) in &self.entries {
            for handler in handlers {
                connection.on(method, handler.clone());
            }
        }
    }

    /// Number of registered handlers across all methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, handlers)| handlers.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.entries.iter().any(|(m, _)| m == method)
    }

    /// Registered method names, in first-registration order.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(m, _)| m.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hublink_core::{ConnectionBuilder, ConnectionOptions};
    use hublink_transport::{Call, MemoryHub};

    use super::*;

    fn connection(hub: &MemoryHub) -> Arc<dyn TransportConnection> {
        hub.build("memory://hub", &ConnectionOptions::default())
    }

    #[test]
    fn test_add_validates() {
        let mut registry = SubscriptionRegistry::new();
        let handler = Handler::new(|_| {});

        assert!(matches!(
            registry.add("", handler.clone(), None),
            Err(ClientError::Argument("method"))
        ));
        registry.add("tick", handler.clone(), None).unwrap();
        assert!(matches!(
            registry.add("tick", handler.clone(), None),
            Err(ClientError::AlreadyExists(m)) if m == "tick"
        ));
        // Same handler under another method is fine.
        registry.add("tock", handler, None).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_replay_preserves_order() {
        let hub = MemoryHub::new();
        let mut registry = SubscriptionRegistry::new();
        registry.add("b", Handler::new(|_| {}), None).unwrap();
        registry.add("a", Handler::new(|_| {}), None).unwrap();
        registry.add("b", Handler::new(|_| {}), None).unwrap();

        let conn = connection(&hub);
        registry.replay(conn.as_ref());

        let methods: Vec<String> = hub
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::On { method, .. } => Some(method),
                _ => None,
            })
            .collect();
        assert_eq!(methods, ["b", "b", "a"]);
        assert_eq!(registry.methods().collect::<Vec<_>>(), ["b", "a"]);
    }

    #[test]
    fn test_remove_detaches_from_live() {
        let hub = MemoryHub::new();
        let conn = connection(&hub);
        let mut registry = SubscriptionRegistry::new();
        let first = Handler::new(|_| {});
        let second = Handler::new(|_| {});

        registry.add("tick", first.clone(), Some(conn.as_ref())).unwrap();
        registry.add("tick", second.clone(), Some(conn.as_ref())).unwrap();
        registry.add("news", Handler::new(|_| {}), Some(conn.as_ref())).unwrap();
        assert_eq!(hub.handlers("tick"), 2);

        registry.remove(&Unsubscribe::Handler("tick".into(), first), Some(conn.as_ref()));
        assert_eq!(hub.handlers("tick"), 1);
        assert!(registry.contains("tick"));

        registry.remove(&Unsubscribe::Handler("tick".into(), second), Some(conn.as_ref()));
        assert!(!registry.contains("tick"));

        registry.remove(&Unsubscribe::All, Some(conn.as_ref()));
        assert!(registry.is_empty());
        assert_eq!(hub.handlers("news"), 0);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        registry.add("tick", Handler::new(|_| {}), None).unwrap();
        registry.remove(&Unsubscribe::Method("other".into()), None);
        registry.remove(&Unsubscribe::Handler("tick".into(), Handler::new(|_| {})), None);
        assert_eq!(registry.len(), 1);
    }
}
