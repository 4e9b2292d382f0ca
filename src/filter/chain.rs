//! Filter-Kette: höchstens ein Eintrag pro [`FilterType`]

use super::types::{FilterConfig, FilterType};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct FilterEntry {
    pub config: FilterConfig,
    pub enabled: bool,
}

/// Nach Typ sortierte Kette; Iteration liefert die Verarbeitungsreihenfolge
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    entries: BTreeMap<FilterType, FilterEntry>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Setzt bzw. ersetzt den Filter seines Typs (aktiviert)
    pub fn insert(&mut self, config: FilterConfig) -> Option<FilterEntry> {
        self.entries.insert(
            config.filter_type(),
            FilterEntry {
                config,
                enabled: true,
            },
        )
    }

    pub fn remove(&mut self, filter_type: FilterType) -> Option<FilterEntry> {
        self.entries.remove(&filter_type)
    }

    pub fn get(&self, filter_type: FilterType) -> Option<&FilterEntry> {
        self.entries.get(&filter_type)
    }

    /// Setzt das Enabled-Flag, gibt `None` zurück wenn der Typ fehlt
    pub fn set_enabled(&mut self, filter_type: FilterType, enabled: bool) -> Option<()> {
        self.entries.get_mut(&filter_type).map(|e| e.enabled = enabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterEntry> {
        self.entries.values()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &FilterConfig> {
        self.entries
            .values()
            .filter(|e| e.enabled)
            .map(|e| &e.config)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::types::{BeautyParams, ColorParams, CustomFilter};

    #[test]
    fn test_same_type_replaces() {
        let mut chain = FilterChain::new();
        chain.insert(FilterConfig::Beauty(BeautyParams::default()));
        let old = chain.insert(FilterConfig::Beauty(BeautyParams {
            intensity: 0.9,
            brighten: 0.0,
        }));

        assert!(old.is_some());
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_iteration_in_processing_order() {
        let mut chain = FilterChain::new();
        chain.insert(FilterConfig::Custom(CustomFilter::new("noop", Some)));
        chain.insert(FilterConfig::Color(ColorParams::default()));
        chain.insert(FilterConfig::Beauty(BeautyParams::default()));

        let order: Vec<FilterType> = chain.iter().map(|e| e.config.filter_type()).collect();
        assert_eq!(
            order,
            vec![FilterType::Beauty, FilterType::Color, FilterType::Custom]
        );
    }

    #[test]
    fn test_disabled_skipped() {
        let mut chain = FilterChain::new();
        chain.insert(FilterConfig::Color(ColorParams::default()));
        chain.set_enabled(FilterType::Color, false);

        assert_eq!(chain.enabled().count(), 0);
        assert_eq!(chain.len(), 1);
        assert!(chain.set_enabled(FilterType::Ar, true).is_none());
    }
}
