use super::{Selector, SelectorKind, WeightedItem};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Smooth weighted round-robin (the nginx variant).
///
/// Every eligible item gains its configured weight, the heaviest wins (the
/// earliest registered on ties), and the winner then loses the total configured
/// weight of the whole registry. Disabled items still count toward that total.
pub struct WeightedRoundRobin<T: ?Sized> {
    component: String,
    items: Vec<Arc<T>>,
    total_config_weight: u64,
    current: Mutex<Vec<i64>>,
}

impl<T: WeightedItem + ?Sized> WeightedRoundRobin<T> {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            items: Vec::new(),
            total_config_weight: 0,
            current: Mutex::new(Vec::new()),
        }
    }

    pub fn with_items(component: impl Into<String>, items: Vec<Arc<T>>) -> Self {
        let mut selector = Self::new(component);
        for item in items {
            selector.add_item(item);
        }
        selector
    }

    /// Register an item. Only possible while the selector is still exclusively owned.
    pub fn add_item(&mut self, item: Arc<T>) {
        self.total_config_weight += u64::from(item.config_weight());
        tracing::info!(
            component = %self.component,
            backend = item.name(),
            weight = item.config_weight(),
            "added weighted round-robin item"
        );
        self.items.push(item);
        self.current
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .push(0);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<i64>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current weights by item name, for diagnostics.
    pub fn current_weights(&self) -> Vec<(String, i64)> {
        let current = self.lock();
        self.items
            .iter()
            .zip(current.iter())
            .map(|(item, w)| (item.name().to_string(), *w))
            .collect()
    }

    fn weight_table(&self, current: &[i64]) -> String {
        let table: BTreeMap<&str, i64> = self
            .items
            .iter()
            .zip(current.iter())
            .map(|(item, w)| (item.name(), *w))
            .collect();
        serde_json::to_string(&table).unwrap_or_default()
    }
}

impl<T: WeightedItem + ?Sized> Selector<T> for WeightedRoundRobin<T> {
    fn select(&self) -> Result<Arc<T>> {
        tracing::trace!(component = %self.component, "acquiring wrr lock");
        let mut current = self.lock();

        if self.items.is_empty() {
            return Err(Error::SelectionExhausted {
                component: self.component.clone(),
                message: "no available backend".to_string(),
            });
        }

        let trace_enabled = tracing::enabled!(tracing::Level::TRACE);
        let before = trace_enabled.then(|| self.weight_table(&current));

        let mut selected: Option<usize> = None;
        for (i, item) in self.items.iter().enumerate() {
            if item.is_disabled() {
                continue;
            }
            current[i] += i64::from(item.config_weight());
            match selected {
                Some(best) if current[i] <= current[best] => {}
                _ => selected = Some(i),
            }
        }

        let Some(index) = selected else {
            return Err(Error::SelectionExhausted {
                component: self.component.clone(),
                message: "no available backend".to_string(),
            });
        };

        current[index] -= self.total_config_weight as i64;

        if let Some(before) = before {
            tracing::trace!(component = %self.component, "wrr before: {}", before);
            tracing::trace!(
                component = %self.component,
                "wrr after: {}",
                self.weight_table(&current)
            );
        }

        let item = Arc::clone(&self.items[index]);
        tracing::debug!(component = %self.component, backend = item.name(), "selected backend");
        Ok(item)
    }

    fn items(&self) -> &[Arc<T>] {
        &self.items
    }

    fn total_config_weight(&self) -> u64 {
        self.total_config_weight
    }

    fn kind(&self) -> SelectorKind {
        SelectorKind::WeightedRoundRobin
    }
}

impl<T: ?Sized> std::fmt::Debug for WeightedRoundRobin<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedRoundRobin")
            .field("component", &self.component)
            .field("items", &self.items.len())
            .field("total_config_weight", &self.total_config_weight)
            .finish()
    }
}
