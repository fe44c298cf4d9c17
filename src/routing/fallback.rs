use super::{Selector, SelectorItem, SelectorKind};
use crate::{Error, Result};
use std::sync::Arc;

/// Strict priority selection: the first enabled item in registration order.
///
/// Holds no mutable selection state, so concurrent callers never contend here.
pub struct Fallback<T: ?Sized> {
    component: String,
    items: Vec<Arc<T>>,
}

impl<T: SelectorItem + ?Sized> Fallback<T> {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            items: Vec::new(),
        }
    }

    pub fn with_items(component: impl Into<String>, items: Vec<Arc<T>>) -> Self {
        let mut selector = Self::new(component);
        for item in items {
            selector.add_item(item);
        }
        selector
    }

    /// Items are tried in the order they are added.
    pub fn add_item(&mut self, item: Arc<T>) {
        tracing::info!(
            component = %self.component,
            backend = item.name(),
            position = self.items.len(),
            "added fallback item"
        );
        self.items.push(item);
    }
}

impl<T: SelectorItem + ?Sized> Selector<T> for Fallback<T> {
    fn select(&self) -> Result<Arc<T>> {
        if self.items.is_empty() {
            tracing::debug!(component = %self.component, "fallback selector has no items");
            return Err(Error::SelectionExhausted {
                component: self.component.clone(),
                message: "all backends disabled".to_string(),
            });
        }

        for item in &self.items {
            if !item.is_disabled() {
                tracing::debug!(component = %self.component, backend = item.name(), "selected backend");
                return Ok(Arc::clone(item));
            }
            tracing::debug!(
                component = %self.component,
                backend = item.name(),
                "backend disabled, trying next"
            );
        }

        tracing::warn!(component = %self.component, "all configured backends are disabled");
        Err(Error::SelectionExhausted {
            component: self.component.clone(),
            message: "all backends disabled".to_string(),
        })
    }

    fn items(&self) -> &[Arc<T>] {
        &self.items
    }

    fn total_config_weight(&self) -> u64 {
        0
    }

    fn kind(&self) -> SelectorKind {
        SelectorKind::Fallback
    }
}

impl<T: ?Sized> std::fmt::Debug for Fallback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fallback")
            .field("component", &self.component)
            .field("items", &self.items.len())
            .finish()
    }
}
