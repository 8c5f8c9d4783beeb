//! Generic HTML table extraction shared by the collectors.

use scraper::{ElementRef, Html, Selector};

use crate::CollectorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlCell {
    /// Cell text with whitespace collapsed.
    pub text: String,
    /// Text of the first link in the cell, when there is one.
    pub anchor_text: Option<String>,
}

impl HtmlCell {
    pub fn is_placeholder(&self) -> bool {
        self.text.is_empty() || self.text == "--"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlTable {
    /// Lower-cased `<thead>` header texts.
    pub headers: Vec<String>,
    /// Body rows; header rows are not included.
    pub rows: Vec<Vec<HtmlCell>>,
    /// Every `<tr>` in the table, header rows included.
    pub row_count: usize,
}

fn selector(raw: &str) -> Result<Selector, CollectorError> {
    Selector::parse(raw).map_err(|e| CollectorError::Message(format!("selector `{raw}`: {e}")))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Every table on the page, in document order.
pub fn extract_tables(html: &str) -> Result<Vec<HtmlTable>, CollectorError> {
    let document = Html::parse_document(html);
    let table_sel = selector("table")?;
    let header_sel = selector("thead th")?;
    let body_row_sel = selector("tbody > tr")?;
    let any_row_sel = selector("tr")?;
    let cell_sel = selector("td")?;
    let anchor_sel = selector("a")?;

    let mut tables = Vec::new();
    for table in document.select(&table_sel) {
        let headers = table
            .select(&header_sel)
            .map(|th| element_text(th).to_lowercase())
            .collect();
        let rows = table
            .select(&body_row_sel)
            .map(|tr| {
                tr.select(&cell_sel)
                    .map(|td| HtmlCell {
                        text: element_text(td),
                        anchor_text: td
                            .select(&anchor_sel)
                            .next()
                            .map(element_text)
                            .filter(|text| !text.is_empty()),
                    })
                    .collect()
            })
            .collect();
        tables.push(HtmlTable {
            headers,
            rows,
            row_count: table.select(&any_row_sel).count(),
        });
    }
    Ok(tables)
}
