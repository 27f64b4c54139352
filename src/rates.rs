//! Currency conversion into the group's unit of account.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::schemas::{Expense, ExpenseId};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RateError {
    #[error("no rate for {0}")]
    UnknownCurrency(String),

    #[error("rate provider unavailable: {0}")]
    Unavailable(String),
}

/// Returns the factor that turns one unit of `currency` into the reference
/// unit of account at time `at`.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn rate(&self, currency: &str, at: DateTime<Utc>) -> Result<f64, RateError>;
}

/// Fixed table of factors, configured at startup.
#[derive(Clone, Debug, Default)]
pub struct StaticRates {
    rates: HashMap<String, f64>,
}

impl StaticRates {
    pub fn new(rates: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            rates: rates
                .into_iter()
                .map(|(code, factor)| (code.to_uppercase(), factor))
                .collect(),
        }
    }

    /// Parses `EUR=1.08,GBP=1.27`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut rates = Vec::new();
        for pair in spec.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
            let (code, factor) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected CODE=factor, got {pair:?}"))?;
            let factor: f64 = factor
                .trim()
                .parse()
                .map_err(|_| format!("invalid factor in {pair:?}"))?;
            if !factor.is_finite() || factor <= 0.0 {
                return Err(format!("factor must be positive in {pair:?}"));
            }
            rates.push((code.trim().to_string(), factor));
        }
        Ok(Self::new(rates))
    }
}

#[async_trait]
impl RateProvider for StaticRates {
    async fn rate(&self, currency: &str, _at: DateTime<Utc>) -> Result<f64, RateError> {
        self.rates
            .get(&currency.to_uppercase())
            .copied()
            .ok_or_else(|| RateError::UnknownCurrency(currency.to_string()))
    }
}

/// Rewrites every expense into `reference` minor units. Amounts already in the
/// reference currency are left untouched; converted amounts are rounded to the
/// nearest minor unit. A reversal is converted at the rate of the expense it
/// reverses so the pair still cancels exactly.
pub async fn normalize(
    expenses: Vec<Expense>,
    reference: &str,
    rates: &dyn RateProvider,
) -> Result<Vec<Expense>, RateError> {
    let created: HashMap<ExpenseId, DateTime<Utc>> = expenses
        .iter()
        .filter(|expense| !expense.is_reversal())
        .map(|expense| (expense.id.clone(), expense.created_at))
        .collect();

    let mut normalized = Vec::with_capacity(expenses.len());
    for mut expense in expenses {
        if !expense.currency.eq_ignore_ascii_case(reference) {
            let at = expense
                .reverses
                .as_ref()
                .and_then(|original| created.get(original))
                .copied()
                .unwrap_or(expense.created_at);
            let factor = rates.rate(&expense.currency, at).await?;
            expense.amount = (expense.amount as f64 * factor).round() as i64;
            expense.currency = reference.to_string();
        }
        normalized.push(expense);
    }
    Ok(normalized)
}
