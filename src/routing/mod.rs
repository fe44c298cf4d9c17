//! Backend selection strategies.
//!
//! Both strategies work over a registry that is fixed once built. Reloading
//! configuration builds a new registry instead of editing the old one.
//!
//! - [`WeightedRoundRobin`]: smooth weighted round-robin, picks proportional to weight
//! - [`Fallback`]: strict priority, first enabled backend in registration order

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub mod fallback;
pub mod weighted;

pub use fallback::Fallback;
pub use weighted::WeightedRoundRobin;

/// Anything a selector can choose.
pub trait SelectorItem: Send + Sync {
    fn name(&self) -> &str;
    fn is_disabled(&self) -> bool;
}

/// Items that carry a static weight for [`WeightedRoundRobin`].
pub trait WeightedItem: SelectorItem {
    fn config_weight(&self) -> u32;
}

/// A selection strategy over a fixed registry.
pub trait Selector<T: ?Sized>: Send + Sync {
    /// Choose one item, or fail when none is eligible.
    fn select(&self) -> Result<Arc<T>>;

    /// Registered items, in registration order.
    fn items(&self) -> &[Arc<T>];

    /// Sum of configured weights of every registered item (0 for strategies without weights).
    fn total_config_weight(&self) -> u64;

    fn kind(&self) -> SelectorKind;
}

/// Strategy chosen by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorKind {
    #[serde(rename = "weighted-round-robin", alias = "wrr")]
    WeightedRoundRobin,
    #[serde(rename = "fallback")]
    Fallback,
}

impl Default for SelectorKind {
    fn default() -> Self {
        SelectorKind::WeightedRoundRobin
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorKind::WeightedRoundRobin => f.write_str("weighted-round-robin"),
            SelectorKind::Fallback => f.write_str("fallback"),
        }
    }
}

impl FromStr for SelectorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted-round-robin" | "wrr" => Ok(SelectorKind::WeightedRoundRobin),
            "fallback" => Ok(SelectorKind::Fallback),
            other => Err(Error::configuration(format!(
                "unrecognized selector: {}",
                other
            ))),
        }
    }
}

impl SelectorKind {
    /// Build a selector of this kind over `items`.
    ///
    /// `component` labels log lines and errors (e.g. "translator").
    pub fn build<T>(self, component: &str, items: Vec<Arc<T>>) -> Box<dyn Selector<T>>
    where
        T: WeightedItem + ?Sized + 'static,
    {
        match self {
            SelectorKind::WeightedRoundRobin => {
                Box::new(WeightedRoundRobin::with_items(component, items))
            }
            SelectorKind::Fallback => Box::new(Fallback::with_items(component, items)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::TestItem;
    use super::*;

    #[test]
    fn test_selector_kind_parse() {
        assert_eq!(
            "wrr".parse::<SelectorKind>().unwrap(),
            SelectorKind::WeightedRoundRobin
        );
        assert_eq!(
            "Weighted-Round-Robin".parse::<SelectorKind>().unwrap(),
            SelectorKind::WeightedRoundRobin
        );
        assert_eq!(
            "fallback".parse::<SelectorKind>().unwrap(),
            SelectorKind::Fallback
        );
        assert!("random".parse::<SelectorKind>().is_err());
    }

    #[test]
    fn test_selector_kind_yaml() {
        let kind: SelectorKind = serde_yaml::from_str("wrr").unwrap();
        assert_eq!(kind, SelectorKind::WeightedRoundRobin);
        let kind: SelectorKind = serde_yaml::from_str("fallback").unwrap();
        assert_eq!(kind, SelectorKind::Fallback);
    }

    #[test]
    fn test_build_dispatches_on_kind() {
        let items = vec![Arc::new(TestItem::new("a", 2)), Arc::new(TestItem::new("b", 3))];
        let wrr = SelectorKind::WeightedRoundRobin.build("test", items.clone());
        assert_eq!(wrr.kind(), SelectorKind::WeightedRoundRobin);
        assert_eq!(wrr.total_config_weight(), 5);

        let fb = SelectorKind::Fallback.build("test", items);
        assert_eq!(fb.kind(), SelectorKind::Fallback);
        assert_eq!(fb.total_config_weight(), 0);
        assert_eq!(fb.select().unwrap().name(), "a");
    }
}
