//! Threshold bucketing: maps a metric onto a tier index given ascending cutoffs.

use serde::{Deserialize, Serialize};

/// Which direction of a metric counts as "better".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierOrder {
    /// Tier = number of stops the value has reached (inclusive).
    #[default]
    Ascending,
    /// Tier = position of the first ceiling the value fits under, e.g. a rank
    /// where 1 is best. Values beyond every ceiling land past the end.
    LowerIsBetter,
}

/// Returns a tier in `0..=stops.len()`. Undefined and NaN inputs yield 0;
/// a value exactly on a stop counts as having reached it.
pub fn bucket(value: Option<f64>, stops: &[f64], order: TierOrder) -> usize {
    let Some(value) = value.filter(|value| !value.is_nan()) else {
        return 0;
    };
    match order {
        TierOrder::Ascending => stops.iter().take_while(|stop| value >= **stop).count(),
        TierOrder::LowerIsBetter => stops
            .iter()
            .position(|ceiling| value <= *ceiling)
            .unwrap_or(stops.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADWEAR: [f64; 6] = [10.0, 50.0, 100.0, 200.0, 500.0, 1000.0];

    #[test]
    fn counts_reached_stops_inclusively() {
        assert_eq!(bucket(Some(0.0), &HEADWEAR, TierOrder::Ascending), 0);
        assert_eq!(bucket(Some(9.99), &HEADWEAR, TierOrder::Ascending), 0);
        assert_eq!(bucket(Some(10.0), &HEADWEAR, TierOrder::Ascending), 1);
        assert_eq!(bucket(Some(499.0), &HEADWEAR, TierOrder::Ascending), 4);
        assert_eq!(bucket(Some(1000.0), &HEADWEAR, TierOrder::Ascending), 6);
        assert_eq!(bucket(Some(f64::INFINITY), &HEADWEAR, TierOrder::Ascending), 6);
    }

    #[test]
    fn undefined_and_nan_map_to_zero() {
        for order in [TierOrder::Ascending, TierOrder::LowerIsBetter] {
            assert_eq!(bucket(None, &HEADWEAR, order), 0);
            assert_eq!(bucket(Some(f64::NAN), &HEADWEAR, order), 0);
        }
    }

    #[test]
    fn ascending_is_monotonic_and_bounded() {
        let mut previous = 0;
        let mut value = -5.0;
        while value < 1500.0 {
            let tier = bucket(Some(value), &HEADWEAR, TierOrder::Ascending);
            assert!(tier >= previous, "tier dropped at {value}");
            assert!(tier <= HEADWEAR.len());
            previous = tier;
            value += 0.5;
        }
    }

    #[test]
    fn lower_is_better_picks_first_ceiling_not_exceeded() {
        let ceilings = [1000.0, 5000.0, 25000.0];
        assert_eq!(bucket(Some(1.0), &ceilings, TierOrder::LowerIsBetter), 0);
        assert_eq!(bucket(Some(1000.0), &ceilings, TierOrder::LowerIsBetter), 0);
        assert_eq!(bucket(Some(1001.0), &ceilings, TierOrder::LowerIsBetter), 1);
        assert_eq!(bucket(Some(25000.0), &ceilings, TierOrder::LowerIsBetter), 2);
        assert_eq!(bucket(Some(600000.0), &ceilings, TierOrder::LowerIsBetter), 3);
    }

    #[test]
    fn empty_table_always_yields_zero() {
        assert_eq!(bucket(Some(42.0), &[], TierOrder::Ascending), 0);
        assert_eq!(bucket(Some(42.0), &[], TierOrder::LowerIsBetter), 0);
    }
}
