//! Type taxonomy index
//!
//! Builds id → item and id → category lookups from a [`TaxonomyConfig`]. Items
//! are denormalized with their parent's category id, label and color so that
//! callers never need a second lookup. Category order is the config order.

use crate::config::TaxonomyConfig;
use std::collections::HashMap;

/// Icon used when a type has no icon of its own or is unknown
pub const GENERIC_ICON: &str = "icons/undefined.svg";

const DEFAULT_COLOR: &str = "gray";

/// A taxonomy item with its category's metadata attached
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaxonomyItem {
    pub id: String,
    pub label: String,
    pub icon: Option<String>,
    pub category_id: String,
    pub category_label: String,
    pub color: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryMeta {
    pub label: String,
    pub color: String,
    pub default_expanded: bool,
}

/// Lookup structures over the active taxonomy
#[derive(Clone, Debug, Default)]
pub struct Taxonomy {
    items: HashMap<String, TaxonomyItem>,
    categories: HashMap<String, CategoryMeta>,
    /// Category ids in config order
    category_order: Vec<String>,
    /// Item ids per category, in config order
    category_items: HashMap<String, Vec<String>>,
}

impl Taxonomy {
    pub fn new(config: &TaxonomyConfig) -> Self {
        let mut taxonomy = Self::default();
        taxonomy.rebuild(config);
        taxonomy
    }

    /// Discard the current index and rebuild it from `config`
    pub fn rebuild(&mut self, config: &TaxonomyConfig) {
        self.items.clear();
        self.categories.clear();
        self.category_order.clear();
        self.category_items.clear();

        for category in &config.categories {
            let color = category
                .color
                .clone()
                .unwrap_or_else(|| DEFAULT_COLOR.to_string());

            if !self.categories.contains_key(&category.id) {
                self.category_order.push(category.id.clone());
            }
            self.categories.insert(
                category.id.clone(),
                CategoryMeta {
                    label: category.label.clone(),
                    color: color.clone(),
                    default_expanded: category.default_expanded,
                },
            );

            let ids = self.category_items.entry(category.id.clone()).or_default();
            for item in &category.items {
                if self.items.contains_key(&item.id) {
                    tracing::warn!("Ignoring duplicate taxonomy item id {}", item.id);
                    continue;
                }
                ids.push(item.id.clone());
                self.items.insert(
                    item.id.clone(),
                    TaxonomyItem {
                        id: item.id.clone(),
                        label: item.label.clone(),
                        icon: item.icon.clone().filter(|icon| !icon.is_empty()),
                        category_id: category.id.clone(),
                        category_label: category.label.clone(),
                        color: color.clone(),
                    },
                );
            }
        }

        tracing::debug!(
            "Indexed {} taxonomy items in {} categories",
            self.items.len(),
            self.category_order.len()
        );
    }

    #[inline]
    pub fn item(&self, id: &str) -> Option<&TaxonomyItem> {
        self.items.get(id)
    }

    #[inline]
    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    #[inline]
    pub fn category(&self, id: &str) -> Option<&CategoryMeta> {
        self.categories.get(id)
    }

    /// Category ids in display order
    #[inline]
    pub fn category_order(&self) -> &[String] {
        &self.category_order
    }

    /// Items of a category in config order
    pub fn items_in(&self, category_id: &str) -> impl Iterator<Item = &TaxonomyItem> {
        self.category_items
            .get(category_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.items.get(id))
    }

    /// Items of a category sorted by label, case-insensitively
    pub fn items_sorted_by_label(&self, category_id: &str) -> Vec<&TaxonomyItem> {
        let mut items: Vec<_> = self.items_in(category_id).collect();
        items.sort_by_key(|item| item.label.to_lowercase());
        items
    }

    /// Icon of a known type, if it has one
    pub fn icon(&self, id: &str) -> Option<&str> {
        self.items.get(id).and_then(|item| item.icon.as_deref())
    }

    /// Icon for a symbol read from a document: exact id first, then the
    /// trimmed lower-cased form, then the generic icon.
    pub fn icon_or_generic(&self, symbol: &str) -> &str {
        self.icon(symbol)
            .or_else(|| self.icon(&symbol.trim().to_lowercase()))
            .unwrap_or(GENERIC_ICON)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_taxonomy() -> Taxonomy {
        let config = TaxonomyConfig::from_json(
            r#"{"categories": [
                {"id": "food", "label": "Food", "color": "orange",
                 "items": [
                    {"id": "restaurant", "label": "restaurant", "icon": "icons/restaurant.svg"},
                    {"id": "cafe", "label": "Coffee", "icon": "icons/cafe.svg"},
                    {"id": "bakery", "label": "Bakery", "icon": ""}
                 ]},
                {"id": "water", "label": "Water", "defaultExpanded": true,
                 "items": [{"id": "drinking_water", "label": "Drinking water", "icon": "icons/water.svg"}]}
            ]}"#,
        )
        .unwrap();
        Taxonomy::new(&config)
    }

    #[test]
    fn test_denormalized_items() {
        let taxonomy = create_test_taxonomy();
        let cafe = taxonomy.item("cafe").unwrap();
        assert_eq!(cafe.category_id, "food");
        assert_eq!(cafe.category_label, "Food");
        assert_eq!(cafe.color, "orange");

        let water = taxonomy.item("drinking_water").unwrap();
        assert_eq!(water.color, "gray");
        assert!(taxonomy.category("water").unwrap().default_expanded);
    }

    #[test]
    fn test_category_order_is_config_order() {
        let taxonomy = create_test_taxonomy();
        assert_eq!(taxonomy.category_order(), &["food", "water"]);
        let ids: Vec<_> = taxonomy.items_in("food").map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["restaurant", "cafe", "bakery"]);
    }

    #[test]
    fn test_items_sorted_by_label() {
        let taxonomy = create_test_taxonomy();
        let labels: Vec<_> = taxonomy
            .items_sorted_by_label("food")
            .into_iter()
            .map(|i| i.label.as_str())
            .collect();
        assert_eq!(labels, vec!["Bakery", "Coffee", "restaurant"]);
    }

    #[test]
    fn test_unknown_lookup_is_none() {
        let taxonomy = create_test_taxonomy();
        assert!(taxonomy.item("helipad").is_none());
        assert!(taxonomy.category("nope").is_none());
        assert_eq!(taxonomy.items_in("nope").count(), 0);
    }

    #[test]
    fn test_icons() {
        let taxonomy = create_test_taxonomy();
        assert_eq!(taxonomy.icon("cafe"), Some("icons/cafe.svg"));
        // Empty icon strings are treated as missing
        assert_eq!(taxonomy.icon("bakery"), None);
        assert_eq!(taxonomy.icon_or_generic("  CAFE "), "icons/cafe.svg");
        assert_eq!(taxonomy.icon_or_generic("bakery"), GENERIC_ICON);
        assert_eq!(taxonomy.icon_or_generic(""), GENERIC_ICON);
    }

    #[test]
    fn test_rebuild_discards_previous_index() {
        let mut taxonomy = create_test_taxonomy();
        let config = TaxonomyConfig::from_json(
            r#"{"categories": [{"id": "bike", "label": "Bike",
                "items": [{"id": "bicycle_shop", "label": "Bike shop"}]}]}"#,
        )
        .unwrap();
        taxonomy.rebuild(&config);
        taxonomy.rebuild(&config);
        assert_eq!(taxonomy.len(), 1);
        assert!(!taxonomy.contains("cafe"));
        assert_eq!(taxonomy.category_order(), &["bike"]);
    }
}
