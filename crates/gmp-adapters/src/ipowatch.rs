use chrono::Datelike;
use gmp_core::{parse_amount, parse_date_range_in_year, CandidateRecord, OfferingClass, Source};

use crate::{extract_tables, Collector, CollectorError, PageOrigin, RawPage};

/// Columns: name, GMP, price, gain, date range, type.
const MIN_CELLS: usize = 5;

/// Grey-market premium table from ipowatch.
#[derive(Debug, Clone)]
pub struct IpoWatchCollector {
    origin: PageOrigin,
}

impl IpoWatchCollector {
    pub fn new(origin: PageOrigin) -> Self {
        Self { origin }
    }
}

fn is_header_row(name: &str) -> bool {
    name.starts_with("Stock") || name.starts_with("IPO")
}

impl Collector for IpoWatchCollector {
    fn source(&self) -> Source {
        Source::IpoWatch
    }

    fn origin(&self) -> &PageOrigin {
        &self.origin
    }

    fn parse_page(&self, page: &RawPage) -> Result<Vec<CandidateRecord>, CollectorError> {
        let year = page.fetched_at.year();
        let mut out = Vec::new();
        for table in extract_tables(&page.html)? {
            for row in &table.rows {
                if row.len() < MIN_CELLS {
                    continue;
                }
                let name = row[0].text.as_str();
                if name.is_empty() || is_header_row(name) {
                    continue;
                }
                let (open, close) = parse_date_range_in_year(&row[4].text, year);
                let marker = row.get(5).map(|cell| cell.text.as_str()).unwrap_or(name);
                out.push(
                    CandidateRecord::builder(Source::IpoWatch, name, page.fetched_at)
                        .offering_class(OfferingClass::from_marker(marker))
                        .price_band(Some(row[2].text.clone()))
                        .dates(open, close)
                        .quote_value(Some(parse_amount(&row[1].text)))
                        .build(),
                );
            }
        }
        Ok(out)
    }
}
