//! `pro_bar`: unified bar data with optional price adjustment.
//!
//! Routes by `asset` and `freq` to the matching bar API. For stocks with
//! `adj=qfq` (forward) or `adj=hfq` (backward) it also fetches
//! `adj_factor` over the same range and rescales the price columns.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::registry::ProviderFunction;
use super::Provider;
use crate::engine::result_set::{display_value, ResultSet};
use crate::error::ProviderError;

const PRICE_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "pre_close"];

/// Parameters consumed by `pro_bar` itself; everything else is passed on.
const OWN_PARAMS: [&str; 5] = ["asset", "freq", "adj", "adjfactor", "ma"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjustment {
    Forward,
    Backward,
}

pub struct ProBar;

/// Underlying API for an asset class and bar frequency.
fn route(asset: &str, freq: &str) -> Option<&'static str> {
    match (asset, freq) {
        ("E", "D") => Some("daily"),
        ("E", "W") => Some("weekly"),
        ("E", "M") => Some("monthly"),
        ("I", "D") => Some("index_daily"),
        ("I", "W") => Some("index_weekly"),
        ("I", "M") => Some("index_monthly"),
        ("FD", "D") => Some("fund_daily"),
        ("FT", "D") => Some("fut_daily"),
        ("O", "D") => Some("opt_daily"),
        ("CB", "D") => Some("cb_daily"),
        _ => None,
    }
}

fn text_param(params: &Map<String, Value>, key: &str, default: &str) -> String {
    params
        .get(key)
        .filter(|v| !v.is_null())
        .map(display_value)
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn adjustment(params: &Map<String, Value>) -> Result<Option<Adjustment>, ProviderError> {
    match params.get("adj").filter(|v| !v.is_null()).map(display_value) {
        None => Ok(None),
        Some(adj) => match adj.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(None),
            "qfq" => Ok(Some(Adjustment::Forward)),
            "hfq" => Ok(Some(Adjustment::Backward)),
            other => Err(ProviderError::UnknownFunction(format!("pro_bar adj={}", other))),
        },
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rescale price columns by each row's adjustment factor.
///
/// Rows whose trade date has no factor take the factor of the nearest
/// older row that has one; rows with no factor at all are left as is.
fn apply_adjustment(
    mut bars: ResultSet,
    factors: &ResultSet,
    adjustment: Adjustment,
    keep_factor: bool,
) -> ResultSet {
    let by_date: HashMap<String, f64> = factors
        .rows()
        .iter()
        .filter_map(|row| {
            let date = display_value(row.get("trade_date")?);
            let factor = row.get("adj_factor")?.as_f64()?;
            Some((date, factor))
        })
        .collect();

    let latest = factors
        .rows()
        .iter()
        .filter_map(|row| Some((display_value(row.get("trade_date")?), row.get("adj_factor")?.as_f64()?)))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, f)| f);

    // Bars arrive newest first; walk oldest to newest to carry factors up.
    let mut carried: Option<f64> = None;
    let mut row_factors = vec![None; bars.len()];
    for (i, row) in bars.rows().iter().enumerate().rev() {
        let own = row
            .get("trade_date")
            .map(display_value)
            .and_then(|d| by_date.get(&d).copied());
        if own.is_some() {
            carried = own;
        }
        row_factors[i] = carried;
    }

    for (row, factor) in bars.rows_mut().iter_mut().zip(row_factors) {
        let Some(factor) = factor else { continue };
        let scale = match adjustment {
            Adjustment::Backward => factor,
            Adjustment::Forward => match latest {
                Some(latest) if latest != 0.0 => factor / latest,
                _ => continue,
            },
        };
        for column in PRICE_COLUMNS {
            if let Some(price) = row.get(column).and_then(Value::as_f64) {
                row.insert(column.to_string(), Value::from(round2(price * scale)));
            }
        }
        if keep_factor {
            row.insert("adj_factor".to_string(), Value::from(factor));
        }
    }

    if keep_factor {
        let mut rows = bars.into_rows();
        for row in rows.iter_mut() {
            row.entry("adj_factor".to_string()).or_insert(Value::Null);
        }
        return ResultSet::from_rows(rows);
    }
    bars
}

#[async_trait]
impl ProviderFunction for ProBar {
    fn name(&self) -> &'static str {
        "pro_bar"
    }

    async fn call(&self, pro: &dyn Provider, params: &Map<String, Value>) -> Result<ResultSet, ProviderError> {
        let asset = text_param(params, "asset", "E");
        let freq = text_param(params, "freq", "D");
        let api = route(&asset, &freq).ok_or_else(|| {
            ProviderError::UnknownFunction(format!("pro_bar asset={} freq={}", asset, freq))
        })?;
        let adjustment = adjustment(params)?;
        if params.get("ma").is_some_and(|v| !v.is_null()) {
            tracing::warn!("pro_bar moving averages are not computed, ignoring ma");
        }

        let forwarded: Map<String, Value> = params
            .iter()
            .filter(|(k, _)| !OWN_PARAMS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let bars = pro.call(api, &forwarded).await?;
        let Some(adjustment) = adjustment else {
            return Ok(bars);
        };
        if asset != "E" {
            tracing::warn!(asset = %asset, "Price adjustment only applies to stocks, returning raw bars");
            return Ok(bars);
        }
        if bars.is_empty() {
            return Ok(bars);
        }

        let factor_params: Map<String, Value> = ["ts_code", "start_date", "end_date"]
            .iter()
            .filter_map(|k| forwarded.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect();
        let factors = pro.call("adj_factor", &factor_params).await?;

        Ok(apply_adjustment(bars, &factors, adjustment, truthy(params.get("adjfactor"))))
    }
}
