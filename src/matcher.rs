//! Interaction dispatch matching
//!
//! The command/button/select-menu/modal glue registers handlers against a
//! custom-id pattern and an interaction kind; one evaluation function
//! replaces per-kind matching code.

use serde::{Deserialize, Serialize};

/// How a handler's custom-id pattern is compared against an incoming id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomIdMatcher {
    Exact(String),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
}

impl CustomIdMatcher {
    #[must_use]
    pub fn matches(&self, custom_id: &str) -> bool {
        match self {
            Self::Exact(pattern) => custom_id == pattern,
            Self::StartsWith(pattern) => custom_id.starts_with(pattern),
            Self::EndsWith(pattern) => custom_id.ends_with(pattern),
            Self::Contains(pattern) => custom_id.contains(pattern),
        }
    }
}

/// The interaction surfaces handlers can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    Command,
    Button,
    SelectMenu,
    Modal,
}

/// Handlers keyed by interaction kind and custom-id pattern. First
/// registration wins when several patterns match the same id.
pub struct DispatchRegistry<H> {
    entries: Vec<(InteractionKind, CustomIdMatcher, H)>,
}

impl<H> Default for DispatchRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> DispatchRegistry<H> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, kind: InteractionKind, matcher: CustomIdMatcher, handler: H) {
        self.entries.push((kind, matcher, handler));
    }

    /// The first handler registered for this kind whose pattern matches
    #[must_use]
    pub fn find(&self, kind: InteractionKind, custom_id: &str) -> Option<&H> {
        self.entries
            .iter()
            .find(|(entry_kind, matcher, _)| *entry_kind == kind && matcher.matches(custom_id))
            .map(|(_, _, handler)| handler)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
