//! Turns a trait selection into the single-line prompt sent to image providers.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::traits::catalog::{PromptStyle, TraitCatalog};
use crate::traits::rules::Species;
use crate::traits::select::LayerResult;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(\w+)\}").expect("valid placeholder regex"));
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

const SIGNATURE_LAYER: &str = "Signature";
const GENERIC_SUBJECT_CUE: &str = "anthropomorphic Base-themed character with consistent base body";

/// Builds the prompt for `traits` using the catalog's prompt mode. `species`
/// only matters for locked styles that carry a species cue.
pub fn build_prompt(catalog: &TraitCatalog, traits: &LayerResult, species: Option<Species>) -> String {
    let raw = match &catalog.prompt {
        PromptStyle::Template { template } => fill_template(template, traits),
        PromptStyle::Locked {
            order,
            lead,
            tail,
            species_cue,
        } => {
            let cue = species_cue.then(|| {
                species
                    .map(Species::cue)
                    .unwrap_or_else(|| GENERIC_SUBJECT_CUE.to_string())
            });
            join_locked(order, lead, tail, cue, traits)
        }
    };
    single_line(&raw)
}

fn fill_template(template: &str, traits: &LayerResult) -> String {
    let mut values: HashMap<String, String> = traits
        .entries()
        .iter()
        .map(|entry| {
            let fragment = entry
                .pick
                .as_ref()
                .map(|pick| pick.prompt.clone())
                .unwrap_or_default();
            (entry.layer.to_lowercase(), fragment)
        })
        .collect();
    let signature_clause = traits
        .get(SIGNATURE_LAYER)
        .map(|pick| format!(", {}", pick.prompt))
        .unwrap_or_default();
    values.insert("signature_clause".to_string(), signature_clause);

    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

fn join_locked(
    order: &[String],
    lead: &[String],
    tail: &[String],
    cue: Option<String>,
    traits: &LayerResult,
) -> String {
    let fragments = order
        .iter()
        .filter_map(|layer| traits.get(layer))
        .map(|pick| pick.prompt.trim().to_string())
        .filter(|fragment| !fragment.is_empty());

    lead.iter()
        .cloned()
        .chain(cue)
        .chain(fragments)
        .chain(tail.iter().cloned())
        .collect::<Vec<_>>()
        .join(", ")
}

fn single_line(text: &str) -> String {
    WHITESPACE_RE.replace_all(text, " ").trim().to_string()
}
