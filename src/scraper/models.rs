// src/scraper/models.rs

//! Raw upstream payload shapes and their conversion into [`Listing`]s.
//!
//! Only the fields the pipeline reads are typed. The untouched upstream
//! object is kept on each listing under its source name.

use crate::domain::normalize::to_number;
use crate::domain::{LatLong, Listing};
use crate::scraper::{Feed, FeedKind, ScraperError, Source};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

// Redfin for-sale search (stingray/api/gis)
//
// response
//  └── payload
//       └── homes[]
//            ├── streetLine.value
//            ├── city, state, zip
//            ├── latLong.value
//            │    ├── latitude
//            │    └── longitude
//            ├── price.value
//            ├── hoa.value
//            ├── sqFt.value
//            ├── beds, baths
//            ├── timeOnRedfin.value   (milliseconds)
//            ├── listingRemarks
//            └── url                  (site-relative)

#[derive(Debug, Deserialize)]
struct ValueOf<T> {
    value: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl From<Coordinates> for LatLong {
    fn from(c: Coordinates) -> Self {
        LatLong {
            lat: c.latitude,
            lon: c.longitude,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GisResponse {
    payload: Option<GisPayload>,
}

#[derive(Debug, Deserialize)]
struct GisPayload {
    #[serde(default)]
    homes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedfinHome {
    street_line: Option<ValueOf<String>>,
    city: Option<String>,
    state: Option<String>,
    zip: Option<String>,
    lat_long: Option<ValueOf<Coordinates>>,
    price: Option<ValueOf<f64>>,
    hoa: Option<ValueOf<f64>>,
    sq_ft: Option<ValueOf<f64>>,
    beds: Option<f64>,
    baths: Option<f64>,
    time_on_redfin: Option<ValueOf<i64>>,
    listing_remarks: Option<String>,
    url: Option<String>,
}

// Redfin rental search (stingray/api/v1/search/rentals)
//
// response
//  └── homes[]
//       ├── homeData
//       │    ├── addressInfo
//       │    │    ├── formattedStreetLine
//       │    │    ├── city, state, zip
//       │    │    └── centroid
//       │    │         ├── latitude
//       │    │         └── longitude
//       │    └── url
//       └── rentalExtension
//            ├── bedRange     { min, max }
//            ├── bathRange    { min, max }
//            ├── sqftRange    { min, max }
//            ├── rentPriceRange { min, max }
//            ├── description
//            └── lastUpdated

#[derive(Debug, Deserialize)]
struct RentalsResponse {
    #[serde(default)]
    homes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RentalHome {
    home_data: Option<HomeData>,
    rental_extension: Option<RentalExtension>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HomeData {
    address_info: Option<AddressInfo>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressInfo {
    formatted_street_line: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip: Option<String>,
    centroid: Option<Coordinates>,
}

#[derive(Debug, Deserialize)]
struct Range {
    min: Option<f64>,
    max: Option<f64>,
}

impl Range {
    /// Only an exact range yields a value.
    fn exact(range: &Option<Range>) -> Option<f64> {
        match range {
            Some(Range {
                min: Some(min),
                max: Some(max),
            }) if min == max => Some(*min),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RentalExtension {
    bed_range: Option<Range>,
    bath_range: Option<Range>,
    sqft_range: Option<Range>,
    rent_price_range: Option<Range>,
    description: Option<String>,
    last_updated: Option<DateTime<Utc>>,
}

// Zillow search page state (async-create-search-page-state)
//
// response
//  └── cat1
//       └── searchResults
//            └── mapResults[]
//                 ├── zpid
//                 ├── address
//                 ├── detailUrl
//                 ├── unformattedPrice
//                 ├── price          ("$1,850/mo")
//                 ├── beds, baths, area
//                 ├── latLong
//                 │    ├── latitude
//                 │    └── longitude
//                 └── hdpData
//                      └── homeInfo
//                           ├── price
//                           ├── bedrooms, bathrooms, livingArea
//                           ├── monthlyHoaFee
//                           └── daysOnZillow

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZillowResponse {
    cat1: Option<ZillowCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZillowCategory {
    search_results: Option<ZillowSearchResults>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZillowSearchResults {
    #[serde(default)]
    map_results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZillowResult {
    address: Option<String>,
    detail_url: Option<String>,
    unformatted_price: Option<f64>,
    price: Option<Value>,
    beds: Option<f64>,
    baths: Option<f64>,
    area: Option<f64>,
    lat_long: Option<Coordinates>,
    hdp_data: Option<HdpData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HdpData {
    home_info: Option<HomeInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HomeInfo {
    price: Option<f64>,
    bedrooms: Option<f64>,
    bathrooms: Option<f64>,
    living_area: Option<f64>,
    monthly_hoa_fee: Option<f64>,
    days_on_zillow: Option<i64>,
}

fn join_address(parts: &[Option<&str>]) -> Option<String> {
    let street = parts.first().copied().flatten()?.trim();
    if street.is_empty() {
        return None;
    }
    let rest = parts[1..].iter().flatten().map(|p| p.trim()).filter(|p| !p.is_empty());
    Some(std::iter::once(street).chain(rest).collect::<Vec<_>>().join(", "))
}

fn absolute_url(base: &str, path: Option<String>) -> Option<String> {
    path.map(|p| {
        if p.starts_with("http") {
            p
        } else {
            format!("{base}{p}")
        }
    })
}

fn whole_beds(beds: Option<f64>) -> Option<u32> {
    beds.filter(|b| b.is_finite() && *b >= 0.0).map(|b| b as u32)
}

fn whole_price(price: Option<f64>) -> Option<i64> {
    price.filter(|p| p.is_finite() && *p > 0.0).map(|p| p.round() as i64)
}

fn stamp(mut listing: Listing, source: Source, raw: Value, now: DateTime<Utc>) -> Listing {
    listing.source = Some(source.as_str().to_string());
    listing.first_seen = Some(now);
    listing.last_seen = Some(now);
    listing.extra.insert(source.as_str().to_string(), raw);
    listing
}

fn redfin_home(raw: Value, now: DateTime<Utc>) -> Result<Option<Listing>, ScraperError> {
    let home: RedfinHome = serde_json::from_value(raw.clone())?;
    let street = home.street_line.and_then(|s| s.value);
    let Some(address) = join_address(&[
        street.as_deref(),
        home.city.as_deref(),
        home.state.as_deref(),
        home.zip.as_deref(),
    ]) else {
        return Ok(None);
    };

    let mut listing = Listing::from_address(address);
    listing.beds = whole_beds(home.beds);
    listing.baths = home.baths;
    listing.area = home.sq_ft.and_then(|v| v.value);
    listing.price = whole_price(home.price.and_then(|v| v.value));
    listing.hoa = home.hoa.and_then(|v| v.value);
    listing.lat_long = home.lat_long.and_then(|v| v.value).map(LatLong::from);
    listing.url = absolute_url("https://www.redfin.com", home.url);
    listing.description = home.listing_remarks;
    let on_market = home.time_on_redfin.and_then(|v| v.value).unwrap_or(0);
    listing.first_listed = Some(now - Duration::milliseconds(on_market));
    Ok(Some(stamp(listing, Source::Redfin, raw, now)))
}

fn redfin_rental(raw: Value, now: DateTime<Utc>) -> Result<Option<Listing>, ScraperError> {
    let home: RentalHome = serde_json::from_value(raw.clone())?;
    let data = home.home_data;
    let info = data.as_ref().and_then(|d| d.address_info.as_ref());
    let Some(address) = info.and_then(|i| {
        join_address(&[
            i.formatted_street_line.as_deref(),
            i.city.as_deref(),
            i.state.as_deref(),
            i.zip.as_deref(),
        ])
    }) else {
        return Ok(None);
    };

    let mut listing = Listing::from_address(address);
    listing.lat_long = info
        .and_then(|i| i.centroid.as_ref())
        .map(|c| LatLong {
            lat: c.latitude,
            lon: c.longitude,
        });
    listing.url = absolute_url("https://www.redfin.com", data.and_then(|d| d.url));
    if let Some(ext) = home.rental_extension {
        listing.beds = whole_beds(Range::exact(&ext.bed_range));
        listing.baths = Range::exact(&ext.bath_range);
        listing.area = Range::exact(&ext.sqft_range);
        listing.price = whole_price(Range::exact(&ext.rent_price_range));
        listing.description = ext.description;
        listing.first_listed = ext.last_updated;
    }
    Ok(Some(stamp(listing, Source::Redfin, raw, now)))
}

fn zillow_result(raw: Value, now: DateTime<Utc>) -> Result<Option<Listing>, ScraperError> {
    let result: ZillowResult = serde_json::from_value(raw.clone())?;
    let Some(address) = join_address(&[result.address.as_deref()]) else {
        return Ok(None);
    };
    let info = result.hdp_data.and_then(|h| h.home_info);

    let mut listing = Listing::from_address(address);
    let price = result
        .unformatted_price
        .or_else(|| result.price.as_ref().and_then(to_number))
        .or_else(|| info.as_ref().and_then(|i| i.price));
    listing.price = whole_price(price);
    listing.beds = whole_beds(result.beds.or_else(|| info.as_ref().and_then(|i| i.bedrooms)));
    listing.baths = result.baths.or_else(|| info.as_ref().and_then(|i| i.bathrooms));
    listing.area = result.area.or_else(|| info.as_ref().and_then(|i| i.living_area));
    listing.hoa = info.as_ref().and_then(|i| i.monthly_hoa_fee);
    listing.lat_long = result.lat_long.map(LatLong::from);
    listing.url = absolute_url("https://www.zillow.com", result.detail_url);
    listing.first_listed = info
        .and_then(|i| i.days_on_zillow)
        .map(|days| now - Duration::days(days));
    Ok(Some(stamp(listing, Source::Zillow, raw, now)))
}

/// Converts one feed's parsed response body into listings.
///
/// Entries without a usable address are skipped; they cannot be
/// fingerprinted.
pub fn transform(feed: Feed, body: Value, now: DateTime<Utc>) -> Result<Vec<Listing>, ScraperError> {
    type Convert = fn(Value, DateTime<Utc>) -> Result<Option<Listing>, ScraperError>;

    let (entries, convert): (Vec<Value>, Convert) = match (feed.source, feed.kind) {
        (Source::Redfin, FeedKind::Properties) => {
            let resp: GisResponse = serde_json::from_value(body)?;
            let homes = resp
                .payload
                .ok_or_else(|| ScraperError::UnexpectedShape("redfin payload missing".into()))?
                .homes;
            (homes, redfin_home as Convert)
        }
        (Source::Redfin, FeedKind::Rentals) => {
            let resp: RentalsResponse = serde_json::from_value(body)?;
            (resp.homes, redfin_rental as Convert)
        }
        (Source::Zillow, _) => {
            let resp: ZillowResponse = serde_json::from_value(body)?;
            let results = resp
                .cat1
                .and_then(|c| c.search_results)
                .ok_or_else(|| ScraperError::UnexpectedShape("zillow searchResults missing".into()))?
                .map_results;
            (results, zillow_result as Convert)
        }
    };

    let total = entries.len();
    let mut listings = Vec::with_capacity(total);
    for entry in entries {
        match convert(entry, now) {
            Ok(Some(listing)) => listings.push(listing),
            Ok(None) => debug!(%feed, "skipping entry without address"),
            Err(e) => warn!(%feed, error = %e, "skipping malformed entry"),
        }
    }
    debug!(%feed, total, kept = listings.len(), "transformed feed");
    Ok(listings)
}
