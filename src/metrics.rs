use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Monthly rank assumed when a wallet has none on record.
pub const UNRANKED_MONTHLY: f64 = 500_000.0;

/// On-chain facts about one address, produced by the indexer and consumed
/// read-only. Missing or malformed numbers read as zero and missing flags as
/// false, so a sparse record never fails to parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletMetrics {
    #[serde(alias = "uniqueContracts", deserialize_with = "lenient_f64")]
    pub unique_contracts: f64,
    #[serde(alias = "activeDays", deserialize_with = "lenient_f64")]
    pub active_days: f64,
    #[serde(
        alias = "totalTxs",
        alias = "txCount",
        deserialize_with = "lenient_f64"
    )]
    pub total_txs: f64,
    #[serde(alias = "distinctTokens", deserialize_with = "lenient_f64")]
    pub distinct_tokens: f64,
    #[serde(alias = "volumeETH", alias = "volumeEth", deserialize_with = "lenient_f64")]
    pub volume_eth: f64,
    #[serde(alias = "gasEth", deserialize_with = "lenient_f64")]
    pub gas_eth: f64,
    #[serde(alias = "balanceEth", deserialize_with = "lenient_f64")]
    pub balance_eth: f64,
    #[serde(alias = "nftCount", alias = "nft_mints", deserialize_with = "lenient_f64")]
    pub nft_count: f64,
    #[serde(
        alias = "monthlyRank",
        alias = "monthly_rank",
        alias = "rankMonthly",
        deserialize_with = "lenient_opt_f64"
    )]
    pub rank_monthly: Option<f64>,
    #[serde(
        alias = "holds_builder",
        alias = "baseBuilderHolder",
        deserialize_with = "lenient_bool"
    )]
    pub holds_base_builder: bool,
    #[serde(
        alias = "holds_introduced",
        alias = "baseIntroducedHolder",
        deserialize_with = "lenient_bool"
    )]
    pub holds_base_introduced: bool,
    #[serde(alias = "walletBirthMonth", deserialize_with = "lenient_opt_f64")]
    pub wallet_birth_month: Option<f64>,
    #[serde(alias = "walletAgeDays", deserialize_with = "lenient_opt_f64")]
    pub wallet_age_days: Option<f64>,
}

/// The numeric inputs a trait layer can be keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    UniqueContracts,
    ActiveDays,
    TotalTxs,
    DistinctTokens,
    VolumeEth,
    GasEth,
    BalanceEth,
    NftCount,
    RankMonthly,
    WalletAgeDays,
}

impl WalletMetrics {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::UniqueContracts => Some(self.unique_contracts),
            Metric::ActiveDays => Some(self.active_days),
            Metric::TotalTxs => Some(self.total_txs),
            Metric::DistinctTokens => Some(self.distinct_tokens),
            Metric::VolumeEth => Some(self.volume_eth),
            Metric::GasEth => Some(self.gas_eth),
            Metric::BalanceEth => Some(self.balance_eth),
            Metric::NftCount => Some(self.nft_count),
            Metric::RankMonthly => Some(self.rank_monthly.unwrap_or(UNRANKED_MONTHLY)),
            Metric::WalletAgeDays => self.wallet_age_days,
        }
    }
}

fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value).unwrap_or(0.0))
}

fn lenient_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(number_from_value(&value))
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(flag) => flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(text) => matches!(text.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    })
}
