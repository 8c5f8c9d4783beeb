use chrono::{Datelike, NaiveDate};
use gmp_core::{parse_amount, parse_date_range_in_year, CandidateRecord, OfferingClass, Source};

use crate::{extract_tables, Collector, CollectorError, HtmlCell, PageOrigin, RawPage};

/// Pages carry small ticker tables ahead of the GMP table.
const MIN_TABLE_ROWS: usize = 6;
/// Columns: name, price, GMP, kostak, subject, open, close, listing.
const MIN_CELLS: usize = 5;

/// Live GMP report from investorgain.
#[derive(Debug, Clone)]
pub struct InvestorGainCollector {
    origin: PageOrigin,
}

impl InvestorGainCollector {
    pub fn new(origin: PageOrigin) -> Self {
        Self { origin }
    }
}

/// `"38 (4.22%)"` -> 38; the bracketed percentage is ignored.
fn premium(cell: &HtmlCell) -> f64 {
    let amount = cell.text.split('(').next().unwrap_or_default();
    parse_amount(amount)
}

/// Header rows repeated inside the body and "IPO GMP" banner rows.
fn is_banner(row: &[HtmlCell]) -> bool {
    row[0].text.contains("IPO") || row[2].text.contains("GMP")
}

/// Date cells are `DD-Mon` without a year.
fn day_month(cell: Option<&HtmlCell>, year: i32) -> Option<NaiveDate> {
    let cell = cell.filter(|cell| !cell.is_placeholder())?;
    parse_date_range_in_year(&cell.text, year)
        .0
        .or_else(|| parse_date_range_in_year(&format!("{}-{year}", cell.text), year).0)
}

impl Collector for InvestorGainCollector {
    fn source(&self) -> Source {
        Source::InvestorGain
    }

    fn origin(&self) -> &PageOrigin {
        &self.origin
    }

    fn parse_page(&self, page: &RawPage) -> Result<Vec<CandidateRecord>, CollectorError> {
        let year = page.fetched_at.year();
        let tables = extract_tables(&page.html)?;
        let Some(table) = tables.iter().find(|t| t.row_count >= MIN_TABLE_ROWS) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for row in &table.rows {
            if row.len() < MIN_CELLS || is_banner(row) {
                continue;
            }
            let name = row[0].anchor_text.as_deref().unwrap_or(&row[0].text);
            if name.is_empty() {
                continue;
            }
            out.push(
                CandidateRecord::builder(Source::InvestorGain, name, page.fetched_at)
                    .offering_class(OfferingClass::from_marker(name))
                    .price_band(Some(row[1].text.clone()))
                    .dates(day_month(row.get(5), year), day_month(row.get(6), year))
                    .listing_date(day_month(row.get(7), year))
                    .quote_value(Some(premium(&row[2])))
                    .build(),
            );
        }
        Ok(out)
    }
}
