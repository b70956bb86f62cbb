//! Restock recommendations derived from the demand forecast.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use siprems_core::{DailyObservation, ProductId, ProductStockSnapshot};

use crate::config::RecommendationConfig;
use crate::features::EventLookup;
use crate::predictor::ForecastPoint;
use crate::stats::mean;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestockRecommendation {
    pub product_id: ProductId,
    pub product_name: String,
    pub category: Option<String>,
    pub current_stock: i64,
    pub predicted_demand: i64,
    pub recommended_restock: i64,
    pub urgency: Urgency,
}

/// Events falling on a forecast date, for chart annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventAnnotation {
    pub date: NaiveDate,
    pub titles: Vec<String>,
    pub types: Vec<String>,
}

/// Demand the store can actually serve on a forecast day.
pub fn effective_demand(point: &ForecastPoint) -> f64 {
    if point.store_closed {
        0.0
    } else {
        point.yhat.max(0.0)
    }
}

/// Ratio of forecast demand to recent historical demand, clamped.
pub fn growth_factor(
    forecast: &[ForecastPoint],
    history: &[DailyObservation],
    config: &RecommendationConfig,
) -> f64 {
    let effective: Vec<f64> = forecast.iter().map(effective_demand).collect();
    let avg_predicted = mean(&effective).max(0.01);

    let mut demand: Vec<(NaiveDate, f64)> = history.iter().map(|o| (o.date, o.demand)).collect();
    demand.sort_by_key(|(d, _)| *d);
    let recent: Vec<f64> = demand
        .iter()
        .skip(demand.len().saturating_sub(config.history_window_days))
        .map(|(_, v)| *v)
        .collect();
    let avg_historical = mean(&recent);

    let raw = if avg_historical > 0.0 {
        avg_predicted / avg_historical
    } else {
        config.growth_fallback
    };
    raw.clamp(config.growth_min, config.growth_max)
}

/// Urgency of restocking `restock` units onto `stock` on hand.
pub fn urgency(stock: i64, restock: i64, config: &RecommendationConfig) -> Urgency {
    if stock > 0 {
        let (stock, restock) = (stock as f64, restock as f64);
        if restock > stock * config.high_urgency_ratio {
            Urgency::High
        } else if restock > stock * config.medium_urgency_ratio {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    } else if restock > 0 {
        Urgency::High
    } else {
        Urgency::Low
    }
}

/// Top `top_n` products by recent sales (ties broken by name), each with a
/// growth-adjusted demand estimate.
pub fn recommend(
    products: &[ProductStockSnapshot],
    growth: f64,
    top_n: usize,
    config: &RecommendationConfig,
) -> Vec<RestockRecommendation> {
    let mut ranked: Vec<&ProductStockSnapshot> = products.iter().collect();
    ranked.sort_by(|a, b| {
        b.recent_sold_units
            .total_cmp(&a.recent_sold_units)
            .then_with(|| a.name.cmp(&b.name))
    });

    ranked
        .into_iter()
        .take(top_n)
        .map(|p| {
            let base = p.recent_sold_units.max(1.0);
            let predicted = (base * growth).round() as i64;
            let restock = (predicted - p.current_stock).max(0);
            RestockRecommendation {
                product_id: p.product_id.clone(),
                product_name: p.name.clone(),
                category: p.category.clone(),
                current_stock: p.current_stock,
                predicted_demand: predicted,
                recommended_restock: restock,
                urgency: urgency(p.current_stock, restock, config),
            }
        })
        .collect()
}

/// Annotations for forecast dates that carry titled events.
pub fn annotations(forecast: &[ForecastPoint], lookup: &EventLookup) -> Vec<EventAnnotation> {
    forecast
        .iter()
        .filter_map(|p| {
            let day = lookup.day(p.date)?;
            if day.titles.is_empty() {
                return None;
            }
            Some(EventAnnotation {
                date: p.date,
                titles: day.titles.iter().cloned().collect(),
                types: day.kinds.iter().cloned().collect(),
            })
        })
        .collect()
}
