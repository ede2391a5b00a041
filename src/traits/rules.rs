use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn label(self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }
}

/// Odd birth months map to Male and even months to Female. A missing, zero or
/// non-finite month defaults to Male.
pub fn gender_from_birth_month(month: Option<f64>) -> Gender {
    let Some(month) = month.filter(|value| value.is_finite() && *value != 0.0) else {
        return Gender::Male;
    };
    if month.rem_euclid(2.0) == 1.0 {
        Gender::Male
    } else {
        Gender::Female
    }
}

/// Backdrop chosen from the two Base NFT holdings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackgroundName {
    #[serde(rename = "Simple Blue")]
    SimpleBlue,
    #[serde(rename = "Builder Grid")]
    BuilderGrid,
    #[serde(rename = "Dual Core")]
    DualCore,
}

impl BackgroundName {
    pub const ALL: [BackgroundName; 3] = [
        BackgroundName::SimpleBlue,
        BackgroundName::BuilderGrid,
        BackgroundName::DualCore,
    ];

    pub fn label(self) -> &'static str {
        match self {
            BackgroundName::SimpleBlue => "Simple Blue",
            BackgroundName::BuilderGrid => "Builder Grid",
            BackgroundName::DualCore => "Dual Core",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let wanted = label.trim();
        Self::ALL
            .into_iter()
            .find(|name| name.label().eq_ignore_ascii_case(wanted))
    }

    /// Solid colour painted when the background asset cannot be read.
    pub fn fallback_rgb(self) -> [u8; 3] {
        match self {
            BackgroundName::SimpleBlue => [50, 100, 200],
            BackgroundName::BuilderGrid => [0, 60, 150],
            BackgroundName::DualCore => [0, 30, 80],
        }
    }
}

impl fmt::Display for BackgroundName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn background_for(holds_builder: bool, holds_introduced: bool) -> BackgroundName {
    match (holds_builder, holds_introduced) {
        (true, true) => BackgroundName::DualCore,
        (true, false) | (false, true) => BackgroundName::BuilderGrid,
        (false, false) => BackgroundName::SimpleBlue,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Species {
    Owl,
    Fox,
    Dolphin,
    Panda,
    Tiger,
    Wolf,
    Cat,
    Whale,
}

const SPECIES: [Species; 8] = [
    Species::Owl,
    Species::Fox,
    Species::Dolphin,
    Species::Panda,
    Species::Tiger,
    Species::Wolf,
    Species::Cat,
    Species::Whale,
];

impl Species {
    pub fn label(self) -> &'static str {
        match self {
            Species::Owl => "owl",
            Species::Fox => "fox",
            Species::Dolphin => "dolphin",
            Species::Panda => "panda",
            Species::Tiger => "tiger",
            Species::Wolf => "wolf",
            Species::Cat => "cat",
            Species::Whale => "whale",
        }
    }

    pub fn cue(self) -> String {
        format!(
            "anthropomorphic {} character with consistent base body",
            self.label()
        )
    }
}

/// `0x` followed by exactly 40 hex digits.
pub fn is_wallet_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Species keyed on the last hex nibble of a wallet address; anything that is
/// not a well-formed address gets the owl.
pub fn species_for_address(address: &str) -> Species {
    if !is_wallet_address(address) {
        return Species::Owl;
    }
    let nibble = address
        .chars()
        .last()
        .and_then(|c| c.to_digit(16))
        .unwrap_or(0) as usize;
    SPECIES[nibble % SPECIES.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn birth_month_parity_picks_gender() {
        assert_eq!(gender_from_birth_month(Some(1.0)), Gender::Male);
        assert_eq!(gender_from_birth_month(Some(2.0)), Gender::Female);
        assert_eq!(gender_from_birth_month(Some(11.0)), Gender::Male);
        assert_eq!(gender_from_birth_month(Some(12.0)), Gender::Female);
        assert_eq!(gender_from_birth_month(None), Gender::Male);
        assert_eq!(gender_from_birth_month(Some(f64::NAN)), Gender::Male);
        assert_eq!(gender_from_birth_month(Some(0.0)), Gender::Male);
    }

    #[test]
    fn nft_holdings_pick_background() {
        assert_eq!(background_for(true, true), BackgroundName::DualCore);
        assert_eq!(background_for(true, false), BackgroundName::BuilderGrid);
        assert_eq!(background_for(false, true), BackgroundName::BuilderGrid);
        assert_eq!(background_for(false, false), BackgroundName::SimpleBlue);
    }

    #[test]
    fn background_labels_round_trip() {
        for name in BackgroundName::ALL {
            assert_eq!(BackgroundName::from_label(name.label()), Some(name));
        }
        assert_eq!(
            BackgroundName::from_label("dual core"),
            Some(BackgroundName::DualCore)
        );
        assert_eq!(BackgroundName::from_label("Neon"), None);
    }

    #[test]
    fn species_follows_last_nibble() {
        let address = "0x00000000000000000000000000000000000000a9";
        assert_eq!(species_for_address(address), Species::Fox);
        let address = "0x000000000000000000000000000000000000000f";
        assert_eq!(species_for_address(address), Species::Whale);
        assert_eq!(species_for_address("not-an-address"), Species::Owl);
    }
}
