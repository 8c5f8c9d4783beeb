use chrono::{Datelike, NaiveDate};
use gmp_core::{parse_amount, parse_date_range_in_year, CandidateRecord, OfferingClass, Source};

use crate::{extract_tables, Collector, CollectorError, HtmlCell, PageOrigin, RawPage};

/// IPO calendar from chittorgarh. Carries structural fields but no quotes.
#[derive(Debug, Clone)]
pub struct ChittorgarhCollector {
    origin: PageOrigin,
}

impl ChittorgarhCollector {
    pub fn new(origin: PageOrigin) -> Self {
        Self { origin }
    }
}

/// Column positions resolved from the calendar's header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ColumnLayout {
    name: usize,
    exchange: Option<usize>,
    open: Option<usize>,
    close: Option<usize>,
    listing: Option<usize>,
    price: Option<usize>,
    lot: Option<usize>,
    issue_size: Option<usize>,
}

impl ColumnLayout {
    /// Later headers win when several match the same column.
    fn from_headers(headers: &[String]) -> Self {
        let mut layout = Self::default();
        for (idx, header) in headers.iter().enumerate() {
            if header.contains("company") {
                layout.name = idx;
            } else if header.contains("exchange") {
                layout.exchange = Some(idx);
            } else if header.contains("open") {
                layout.open = Some(idx);
            } else if header.contains("clos") {
                layout.close = Some(idx);
            } else if header.contains("listing") {
                layout.listing = Some(idx);
            } else if header.contains("price") {
                layout.price = Some(idx);
            } else if header.contains("lot") {
                layout.lot = Some(idx);
            } else if header.contains("issue") && header.contains("size") {
                layout.issue_size = Some(idx);
            }
        }
        layout
    }
}

fn cell_at(row: &[HtmlCell], idx: Option<usize>) -> Option<&HtmlCell> {
    row.get(idx?).filter(|cell| !cell.is_placeholder())
}

fn date_at(row: &[HtmlCell], idx: Option<usize>, year: i32) -> Option<NaiveDate> {
    parse_date_range_in_year(&cell_at(row, idx)?.text, year).0
}

fn text_at(row: &[HtmlCell], idx: Option<usize>) -> Option<String> {
    cell_at(row, idx).map(|cell| cell.text.clone())
}

impl Collector for ChittorgarhCollector {
    fn source(&self) -> Source {
        Source::Chittorgarh
    }

    fn origin(&self) -> &PageOrigin {
        &self.origin
    }

    fn parse_page(&self, page: &RawPage) -> Result<Vec<CandidateRecord>, CollectorError> {
        let year = page.fetched_at.year();
        let tables = extract_tables(&page.html)?;
        let Some(table) = tables.first() else {
            return Ok(Vec::new());
        };
        let layout = ColumnLayout::from_headers(&table.headers);

        let mut out = Vec::new();
        for row in &table.rows {
            let Some(name_cell) = row.get(layout.name) else {
                continue;
            };
            let name = name_cell.anchor_text.as_deref().unwrap_or(&name_cell.text);
            if name.is_empty() {
                continue;
            }

            let exchange = text_at(row, layout.exchange).unwrap_or_default();
            let offering_class = match OfferingClass::from_marker(name) {
                OfferingClass::Sme => OfferingClass::Sme,
                OfferingClass::Mainboard => OfferingClass::from_marker(&exchange),
            };
            let lot_size = cell_at(row, layout.lot)
                .map(|cell| parse_amount(&cell.text).max(0.0) as u32)
                .unwrap_or(0);

            out.push(
                CandidateRecord::builder(Source::Chittorgarh, name, page.fetched_at)
                    .offering_class(offering_class)
                    .price_band(text_at(row, layout.price))
                    .dates(date_at(row, layout.open, year), date_at(row, layout.close, year))
                    .listing_date(date_at(row, layout.listing, year))
                    .lot_size(lot_size)
                    .issue_size(text_at(row, layout.issue_size))
                    .build(),
            );
        }
        Ok(out)
    }
}
