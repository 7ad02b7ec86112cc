// src/domain/valuation.rs

//! Annual cost model and return projections for for-sale listings.

use crate::domain::listing::Listing;
use crate::domain::market_report::{Bucket, MarketReport, Statistic};
use crate::domain::normalize::decimals;
use serde::{Deserialize, Serialize};
use tracing::debug;

const MONTHS_IN_YEAR: f64 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuationRates {
    /// Yearly property tax as a fraction of price.
    pub tax: f64,
    pub maintenance: f64,
    pub insurance: f64,
}

impl Default for ValuationRates {
    fn default() -> Self {
        Self {
            tax: 0.02,
            maintenance: 0.01,
            insurance: 0.0057,
        }
    }
}

/// What to do when the report has no bucket for a property's bedroom count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketFallback {
    /// Try these bedroom counts in order, preferring ones below the
    /// property's own count.
    Nearest(Vec<u32>),
    /// Leave the property out.
    Drop,
}

impl Default for BucketFallback {
    fn default() -> Self {
        BucketFallback::Nearest(vec![4, 3, 2])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub tax: f64,
    pub maintenance: f64,
    pub insurance: f64,
    pub hoa: f64,
    pub total: f64,
}

/// Yearly figures for one assumed monthly rent.
///
/// `break_even_years` is infinite when the property never nets a return.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnProjection {
    /// Yearly rent income.
    pub net: f64,
    /// Yearly rent income minus yearly costs.
    pub gross: f64,
    pub roi: f64,
    pub cap_rate: f64,
    pub cash_flow: f64,
    pub monthly_cash_flow: f64,
    pub break_even_years: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Returns {
    pub avg: ReturnProjection,
    pub median: ReturnProjection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoratedProperty {
    #[serde(flatten)]
    pub listing: Listing,
    pub costs: CostBreakdown,
    pub returns: Returns,
    /// The report bucket the returns were derived from.
    pub rent_bucket: Bucket,
}

#[derive(Debug, Clone, Default)]
pub struct ValuationDecorator {
    rates: ValuationRates,
    fallback: BucketFallback,
}

impl ValuationDecorator {
    pub fn new(rates: ValuationRates, fallback: BucketFallback) -> Self {
        Self { rates, fallback }
    }

    /// Attaches costs and return projections to every property that has a
    /// price and a usable report bucket. Pure: the same inputs always give
    /// the same output.
    pub fn decorate(&self, properties: &[Listing], report: &MarketReport) -> Vec<DecoratedProperty> {
        properties
            .iter()
            .filter_map(|property| {
                let decorated = self.decorate_one(property, report);
                if decorated.is_none() {
                    debug!(id = %property.id, beds = ?property.beds, "no rent bucket for property");
                }
                decorated
            })
            .collect()
    }

    fn decorate_one(&self, property: &Listing, report: &MarketReport) -> Option<DecoratedProperty> {
        let price = property.price.filter(|p| *p > 0)? as f64;
        let stat = self.bucket_for(property.beds?, report)?;
        let costs = self.costs(price, property.hoa);

        Some(DecoratedProperty {
            listing: property.clone(),
            costs,
            returns: Returns {
                avg: project(stat.avg_rent, price, costs.total),
                median: project(stat.median_rent, price, costs.total),
            },
            rent_bucket: stat.beds,
        })
    }

    fn bucket_for<'a>(&self, beds: u32, report: &'a MarketReport) -> Option<&'a Statistic> {
        if let Some(stat) = report.beds(beds) {
            return Some(stat);
        }
        match &self.fallback {
            BucketFallback::Drop => None,
            BucketFallback::Nearest(order) => order
                .iter()
                .filter(|candidate| **candidate < beds)
                .chain(order.iter())
                .find_map(|candidate| report.beds(*candidate)),
        }
    }

    pub fn costs(&self, price: f64, monthly_hoa: Option<f64>) -> CostBreakdown {
        let tax = price * self.rates.tax;
        let maintenance = price * self.rates.maintenance;
        let insurance = price * self.rates.insurance;
        let hoa = monthly_hoa.filter(|h| h.is_finite()).unwrap_or(0.0) * MONTHS_IN_YEAR;
        CostBreakdown {
            tax: decimals(tax, 2),
            maintenance: decimals(maintenance, 2),
            insurance: decimals(insurance, 2),
            hoa: decimals(hoa, 2),
            total: decimals(tax + maintenance + insurance + hoa, 2),
        }
    }
}

fn project(monthly_rent: f64, price: f64, yearly_costs: f64) -> ReturnProjection {
    let net = monthly_rent * MONTHS_IN_YEAR;
    let gross = net - yearly_costs;
    let ratio = gross / price;
    let break_even_years = if gross == 0.0 {
        f64::INFINITY
    } else {
        price / gross
    };

    ReturnProjection {
        net: decimals(net, 2),
        gross: decimals(gross, 2),
        roi: decimals(ratio, 4),
        cap_rate: decimals(ratio, 4),
        cash_flow: decimals(gross, 2),
        monthly_cash_flow: decimals(gross / MONTHS_IN_YEAR, 2),
        break_even_years: decimals(break_even_years, 2),
    }
}
