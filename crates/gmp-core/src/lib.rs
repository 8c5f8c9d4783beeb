//! Core domain model for grey market premium reconciliation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod normalize;
pub mod parse;
pub mod pricing;
pub mod status;

pub use normalize::normalize_name;
pub use parse::{parse_amount, parse_date_range, parse_date_range_in_year};
pub use pricing::{listing_gain_percent, upper_price};
pub use status::LifecycleStatus;

pub const CRATE_NAME: &str = "gmp-core";

/// Closed set of upstream sources a candidate can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    IpoWatch,
    InvestorGain,
    Chittorgarh,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::IpoWatch, Source::InvestorGain, Source::Chittorgarh];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::IpoWatch => "ipowatch",
            Source::InvestorGain => "investorgain",
            Source::Chittorgarh => "chittorgarh",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown source id `{0}`")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OfferingClass {
    #[default]
    Mainboard,
    #[serde(rename = "SME")]
    Sme,
}

impl OfferingClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferingClass::Mainboard => "Mainboard",
            OfferingClass::Sme => "SME",
        }
    }

    /// Upstream tables flag small-enterprise listings with a literal "SME" marker.
    pub fn from_marker(text: &str) -> Self {
        if text.contains("SME") {
            OfferingClass::Sme
        } else {
            OfferingClass::Mainboard
        }
    }
}

/// One source's observation of one offering in one collection run.
///
/// Fields are private so a record cannot be edited after a collector builds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    name: String,
    offering_class: OfferingClass,
    price_band: Option<String>,
    open_date: Option<NaiveDate>,
    close_date: Option<NaiveDate>,
    listing_date: Option<NaiveDate>,
    lot_size: u32,
    issue_size: Option<String>,
    quote_value: Option<f64>,
    source: Source,
    observed_at: DateTime<Utc>,
}

impl CandidateRecord {
    pub fn builder(
        source: Source,
        name: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> CandidateBuilder {
        CandidateBuilder {
            record: CandidateRecord {
                name: name.into(),
                offering_class: OfferingClass::Mainboard,
                price_band: None,
                open_date: None,
                close_date: None,
                listing_date: None,
                lot_size: 0,
                issue_size: None,
                quote_value: None,
                source,
                observed_at,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offering_class(&self) -> OfferingClass {
        self.offering_class
    }

    pub fn price_band(&self) -> Option<&str> {
        self.price_band.as_deref()
    }

    pub fn open_date(&self) -> Option<NaiveDate> {
        self.open_date
    }

    pub fn close_date(&self) -> Option<NaiveDate> {
        self.close_date
    }

    pub fn listing_date(&self) -> Option<NaiveDate> {
        self.listing_date
    }

    pub fn lot_size(&self) -> u32 {
        self.lot_size
    }

    pub fn issue_size(&self) -> Option<&str> {
        self.issue_size.as_deref()
    }

    pub fn quote_value(&self) -> Option<f64> {
        self.quote_value
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

/// Consuming builder; `build` is the only way to obtain a [`CandidateRecord`].
#[derive(Debug, Clone)]
pub struct CandidateBuilder {
    record: CandidateRecord,
}

impl CandidateBuilder {
    pub fn offering_class(mut self, class: OfferingClass) -> Self {
        self.record.offering_class = class;
        self
    }

    pub fn price_band(mut self, band: Option<String>) -> Self {
        self.record.price_band = band.and_then(non_blank);
        self
    }

    pub fn dates(mut self, open: Option<NaiveDate>, close: Option<NaiveDate>) -> Self {
        self.record.open_date = open;
        self.record.close_date = close;
        self
    }

    pub fn listing_date(mut self, date: Option<NaiveDate>) -> Self {
        self.record.listing_date = date;
        self
    }

    pub fn lot_size(mut self, lot_size: u32) -> Self {
        self.record.lot_size = lot_size;
        self
    }

    pub fn issue_size(mut self, size: Option<String>) -> Self {
        self.record.issue_size = size.and_then(non_blank);
        self
    }

    pub fn quote_value(mut self, quote: Option<f64>) -> Self {
        self.record.quote_value = quote;
        self
    }

    pub fn build(self) -> CandidateRecord {
        self.record
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// The single reconciled entity per real-world offering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub identity_key: String,
    pub name: String,
    pub offering_class: OfferingClass,
    pub price_band: Option<String>,
    pub open_date: Option<NaiveDate>,
    pub close_date: Option<NaiveDate>,
    pub listing_date: Option<NaiveDate>,
    pub lot_size: u32,
    pub issue_size: Option<String>,
    pub status: LifecycleStatus,
}

/// One row of an offering's append-only quote history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuoteEntry {
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}
