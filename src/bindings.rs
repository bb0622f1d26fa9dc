// Copyright (c) 2025, The Newsroom Authors
// MIT License
// All rights reserved.

//! # Binding Table
//!
//! The immutable table mapping a topic name to the handler that processes its
//! events, built once at startup. The empty topic `""` is reserved for a
//! catch-all binding that matches any event whose topic has no entry of its
//! own, useful for debugging taps.

use crate::events::Handler;
use std::sync::Arc;

/// One topic-to-handler entry.
#[derive(Clone)]
pub struct Binding {
    pub topic: String,
    pub handler: Arc<dyn Handler>,
}

/// The ordered binding table. Resolution scans for an exact topic match first
/// and falls back to the catch-all entry, if one was registered.
#[derive(Clone, Default)]
pub struct Bindings {
    entries: Vec<Binding>,
}

impl Bindings {
    pub fn new() -> Bindings {
        Bindings { entries: vec![] }
    }

    /// Registers a handler for a topic. `""` registers the catch-all.
    pub fn bind(mut self, topic: &str, handler: Arc<dyn Handler>) -> Self {
        self.entries.push(Binding {
            topic: topic.to_owned(),
            handler,
        });
        self
    }

    /// Resolves the handler for a topic, first entry wins.
    pub fn resolve(&self, topic: &str) -> Option<Arc<dyn Handler>> {
        self.entries
            .iter()
            .find(|binding| binding.topic == topic)
            .or_else(|| self.entries.iter().find(|binding| binding.topic.is_empty()))
            .map(|binding| Arc::clone(&binding.handler))
    }

    /// The distinct non-empty topics, the set the consumer queue is bound to.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = vec![];
        for binding in &self.entries {
            if !binding.topic.is_empty() && !topics.contains(&binding.topic) {
                topics.push(binding.topic.clone());
            }
        }
        topics
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MockHandler;

    fn handler() -> Arc<dyn Handler> {
        Arc::new(MockHandler::new())
    }

    #[test]
    fn resolves_the_exact_topic_first() {
        let bindings = Bindings::new()
            .bind("feed", handler())
            .bind("", handler())
            .bind("feed", handler());

        assert!(bindings.resolve("feed").is_some());
    }

    #[test]
    fn falls_back_to_the_catch_all() {
        let bindings = Bindings::new().bind("feed", handler()).bind("", handler());

        assert!(bindings.resolve("scraps").is_some());
    }

    #[test]
    fn resolves_nothing_without_a_match_or_catch_all() {
        let bindings = Bindings::new().bind("feed", handler());

        assert!(bindings.resolve("scraps").is_none());
    }

    #[test]
    fn topics_are_distinct_and_skip_the_catch_all() {
        let bindings = Bindings::new()
            .bind("feed", handler())
            .bind("scraps", handler())
            .bind("feed", handler())
            .bind("", handler());

        assert_eq!(bindings.topics(), vec!["feed".to_owned(), "scraps".to_owned()]);
    }
}
