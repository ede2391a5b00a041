use std::collections::BTreeMap;

use serde::Serialize;

use crate::metrics::WalletMetrics;
use crate::traits::bucket::bucket;
use crate::traits::catalog::{LayerSource, TraitCatalog, TraitLayer, TraitPick};
use crate::traits::rules::{background_for, gender_from_birth_month};

/// One resolved layer. `pick` is `None` when the chosen name has no entry in
/// the catalog; the name is still reported so metadata stays complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerEntry {
    pub layer: String,
    pub name: String,
    pub pick: Option<TraitPick>,
}

/// Selected traits for one wallet, in catalog layer order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerResult {
    pub style: String,
    entries: Vec<LayerEntry>,
}

impl LayerResult {
    pub fn entries(&self) -> &[LayerEntry] {
        &self.entries
    }

    pub fn entry(&self, layer: &str) -> Option<&LayerEntry> {
        self.entries.iter().find(|entry| entry.layer == layer)
    }

    pub fn get(&self, layer: &str) -> Option<&TraitPick> {
        self.entry(layer)?.pick.as_ref()
    }

    pub fn name(&self, layer: &str) -> Option<&str> {
        self.entry(layer).map(|entry| entry.name.as_str())
    }

    pub fn names(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|entry| (entry.layer.clone(), entry.name.clone()))
            .collect()
    }

    pub fn picks(&self) -> BTreeMap<String, Option<TraitPick>> {
        self.entries
            .iter()
            .map(|entry| (entry.layer.clone(), entry.pick.clone()))
            .collect()
    }

    /// Rebuilds a result from previously chosen names, e.g. names echoed back
    /// by a client. Layers the catalog does not know are dropped; names it
    /// does not know resolve to an empty pick.
    pub fn from_names(catalog: &TraitCatalog, names: &BTreeMap<String, String>) -> Self {
        let entries = catalog
            .layers
            .iter()
            .filter_map(|layer| {
                let name = names.get(&layer.name)?;
                Some(resolve(layer, name.clone()))
            })
            .collect();
        LayerResult {
            style: catalog.style.clone(),
            entries,
        }
    }
}

fn resolve(layer: &TraitLayer, name: String) -> LayerEntry {
    LayerEntry {
        layer: layer.name.clone(),
        pick: layer.find(&name).cloned(),
        name,
    }
}

/// Maps wallet metrics onto one trait per layer. Pure: identical metrics and
/// catalog always give an identical result, signature included.
pub fn select_traits(catalog: &TraitCatalog, metrics: &WalletMetrics) -> LayerResult {
    let mut selected: Vec<(usize, LayerEntry)> = Vec::with_capacity(catalog.layers.len());
    let mut top_tiers = 0usize;

    for (index, layer) in catalog.layers.iter().enumerate() {
        let name = match &layer.source {
            LayerSource::Metric { metric, order } => {
                let tier = bucket(metrics.value(*metric), &layer.stops, *order);
                layer.at_tier(tier).map(|pick| pick.name.clone())
            }
            LayerSource::BirthMonth => Some(
                gender_from_birth_month(metrics.wallet_birth_month)
                    .label()
                    .to_string(),
            ),
            LayerSource::NftHoldings => Some(
                background_for(metrics.holds_base_builder, metrics.holds_base_introduced)
                    .label()
                    .to_string(),
            ),
            LayerSource::Fixed => layer.traits.first().map(|pick| pick.name.clone()),
            LayerSource::Signature { .. } => None,
        };
        let Some(name) = name else {
            continue;
        };
        if layer.top_tier().is_some_and(|top| top.name == name) {
            top_tiers += 1;
        }
        selected.push((index, resolve(layer, name)));
    }

    for (index, layer) in catalog.layers.iter().enumerate() {
        let LayerSource::Signature { tiers } = &layer.source else {
            continue;
        };
        // Tiers are sorted by descending `min_top` at load.
        if let Some(tier) = tiers.iter().find(|tier| top_tiers >= tier.min_top) {
            selected.push((index, resolve(layer, tier.trait_name.clone())));
        }
    }

    selected.sort_by_key(|(index, _)| *index);
    LayerResult {
        style: catalog.style.clone(),
        entries: selected.into_iter().map(|(_, entry)| entry).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::catalog::TraitRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn anime() -> Arc<TraitCatalog> {
        TraitRegistry::bundled("anime-cyberpunk")
            .unwrap()
            .get(None)
            .unwrap()
    }

    fn lite() -> Arc<TraitCatalog> {
        TraitRegistry::bundled("anime-cyberpunk")
            .unwrap()
            .get(Some("minimal-lite"))
            .unwrap()
    }

    #[test]
    fn zero_metrics_pick_lowest_tiers() {
        let result = select_traits(&anime(), &WalletMetrics::default());
        assert_eq!(result.name("Body"), Some("Male"));
        assert_eq!(result.name("Background"), Some("Simple Blue"));
        assert_eq!(result.name("Headwear"), Some("Rookie Hair"));
        assert_eq!(result.name("Eyes"), Some("Bare Eyes"));
        assert_eq!(result.name("Clothing"), Some("Linen Tee"));
        assert_eq!(result.name("Accessory"), Some("Mono Stripe Pin"));
        assert_eq!(result.name("Emblem"), Some("Null Band"));
        assert_eq!(result.name("Aura"), Some("Genesis Spark"));
        assert!(result.entry("Signature").is_none());
    }

    #[test]
    fn maxed_metrics_clamp_to_top_tiers_and_earn_prime_signature() {
        let metrics = WalletMetrics {
            unique_contracts: 5000.0,
            active_days: 5000.0,
            total_txs: 5000.0,
            distinct_tokens: 5000.0,
            volume_eth: 100.0,
            holds_base_builder: true,
            holds_base_introduced: true,
            ..WalletMetrics::default()
        };
        let result = select_traits(&anime(), &metrics);
        assert_eq!(result.name("Background"), Some("Dual Core"));
        assert_eq!(result.name("Headwear"), Some("Omni Headdress"));
        assert_eq!(result.name("Eyes"), Some("Full AR Visor"));
        assert_eq!(result.name("Clothing"), Some("Mythic Plate"));
        assert_eq!(result.name("Accessory"), Some("Spectrum Ornaments"));
        assert_eq!(result.name("Emblem"), Some("Platinum Halo"));
        assert_eq!(result.name("Signature"), Some("Prime Forge"));
        assert!(result.get("Signature").is_some());
    }

    #[test]
    fn three_top_tiers_earn_foundry_seal() {
        let metrics = WalletMetrics {
            unique_contracts: 500.0,
            active_days: 250.0,
            total_txs: 1000.0,
            wallet_birth_month: Some(4.0),
            ..WalletMetrics::default()
        };
        let result = select_traits(&anime(), &metrics);
        assert_eq!(result.name("Signature"), Some("Foundry Seal"));
        assert_eq!(result.name("Body"), Some("Female"));
        assert_eq!(
            result.entries().last().map(|entry| entry.layer.as_str()),
            Some("Signature")
        );
    }

    #[test]
    fn selection_is_pure() {
        let metrics = WalletMetrics {
            unique_contracts: 120.0,
            active_days: 31.0,
            total_txs: 640.0,
            volume_eth: 0.75,
            wallet_age_days: Some(420.0),
            holds_base_builder: true,
            ..WalletMetrics::default()
        };
        let catalog = anime();
        assert_eq!(select_traits(&catalog, &metrics), select_traits(&catalog, &metrics));
    }

    #[test]
    fn lite_style_ranks_lower_as_better() {
        let catalog = lite();
        let unranked = select_traits(&catalog, &WalletMetrics::default());
        assert_eq!(unranked.name("Emblem"), Some("Null Band+"));
        assert_eq!(unranked.name("Background"), Some("Solid Pastel"));
        assert_eq!(unranked.name("Accent"), Some("No Accent"));

        let ranked = WalletMetrics {
            rank_monthly: Some(1000.0),
            balance_eth: 2.0,
            ..WalletMetrics::default()
        };
        let result = select_traits(&catalog, &ranked);
        assert_eq!(result.name("Emblem"), Some("Platinum Halo"));
        assert_eq!(result.name("Accent"), Some("Gold Edge"));

        let beyond = WalletMetrics {
            rank_monthly: Some(900_000.0),
            ..WalletMetrics::default()
        };
        assert_eq!(select_traits(&catalog, &beyond).name("Emblem"), Some("Null Band++"));
    }

    #[test]
    fn missing_trait_names_resolve_to_empty_picks() {
        let document = json!({
            "style": "drifted",
            "prompt": { "mode": "template", "template": "{body}" },
            "layers": [{
                "name": "Body",
                "source": { "kind": "birth_month" },
                "buckets": [{ "trait": { "name": "Male", "prompt": "male" } }]
            }]
        });
        let catalog = TraitCatalog::from_json("inline", &document.to_string()).unwrap();
        let metrics = WalletMetrics {
            wallet_birth_month: Some(2.0),
            ..WalletMetrics::default()
        };
        let result = select_traits(&catalog, &metrics);
        assert_eq!(result.name("Body"), Some("Female"));
        assert!(result.get("Body").is_none());
    }

    #[test]
    fn rebuilds_from_names() {
        let catalog = anime();
        let names = BTreeMap::from([
            ("Headwear".to_string(), "Pro Visor".to_string()),
            ("Eyes".to_string(), "Monocle".to_string()),
            ("Tail".to_string(), "Fluffy".to_string()),
        ]);
        let result = LayerResult::from_names(&catalog, &names);
        assert_eq!(result.entries().len(), 2);
        assert!(result.get("Headwear").is_some());
        assert!(result.get("Eyes").is_none());
        assert!(result.entry("Tail").is_none());
    }
}
