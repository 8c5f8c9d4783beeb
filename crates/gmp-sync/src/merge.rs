//! Source-priority merge of one group into a canonical record and a quote.

use chrono::NaiveDate;
use gmp_core::{CandidateRecord, CanonicalRecord, LifecycleStatus, Source};
use serde::Serialize;

use crate::grouping::Group;

/// Ranking of sources for one concern. Unlisted sources rank after every
/// listed one and keep their relative order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePriority {
    order: Vec<Source>,
}

impl SourcePriority {
    pub fn new(order: Vec<Source>) -> Self {
        Self { order }
    }

    pub fn sources(&self) -> &[Source] {
        &self.order
    }

    pub fn rank(&self, source: Source) -> usize {
        self.order
            .iter()
            .position(|s| *s == source)
            .unwrap_or(self.order.len())
    }

    /// Stable sort of `members` by rank.
    pub fn arrange<'a>(&self, members: &'a [CandidateRecord]) -> Vec<&'a CandidateRecord> {
        let mut ordered: Vec<&CandidateRecord> = members.iter().collect();
        ordered.sort_by_key(|member| self.rank(member.source()));
        ordered
    }
}

/// What the merger decided for one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeOutcome {
    pub record: CanonicalRecord,
    /// `0.0` when no source supplied a usable quote.
    pub quote: f64,
    pub quote_source: Option<Source>,
    /// Member sources in pooling order.
    pub contributors: Vec<Source>,
}

#[derive(Debug, Clone)]
pub struct Merger {
    field_priority: SourcePriority,
    quote_priority: SourcePriority,
}

fn is_usable_quote(value: f64) -> bool {
    value != 0.0 && value.is_finite()
}

impl Merger {
    pub fn new(field_priority: SourcePriority, quote_priority: SourcePriority) -> Self {
        Self {
            field_priority,
            quote_priority,
        }
    }

    pub fn merge(&self, group: &Group, today: NaiveDate) -> MergeOutcome {
        let ordered = self.field_priority.arrange(group.members());
        let mut record = CanonicalRecord {
            identity_key: group.identity_key().to_string(),
            name: String::new(),
            offering_class: Default::default(),
            price_band: None,
            open_date: None,
            close_date: None,
            listing_date: None,
            lot_size: 0,
            issue_size: None,
            status: LifecycleStatus::Upcoming,
        };
        if let Some(primary) = ordered.first() {
            record.name = primary.name().to_string();
            record.offering_class = primary.offering_class();
        }

        // First write wins: a field once filled is never overwritten.
        for member in &ordered {
            if record.price_band.is_none() {
                record.price_band = member.price_band().map(str::to_string);
            }
            if record.open_date.is_none() {
                record.open_date = member.open_date();
            }
            if record.close_date.is_none() {
                record.close_date = member.close_date();
            }
            if record.listing_date.is_none() {
                record.listing_date = member.listing_date();
            }
            if record.lot_size == 0 {
                record.lot_size = member.lot_size();
            }
            if record.issue_size.is_none() {
                record.issue_size = member.issue_size().map(str::to_string);
            }
        }
        record.status = LifecycleStatus::derive(record.open_date, record.close_date, today);

        let (quote, quote_source) = self.resolve_quote(group.members());
        MergeOutcome {
            record,
            quote,
            quote_source,
            contributors: group.members().iter().map(CandidateRecord::source).collect(),
        }
    }

    /// Walk the quote ranking; zero and missing quotes fall through.
    fn resolve_quote(&self, members: &[CandidateRecord]) -> (f64, Option<Source>) {
        for source in self.quote_priority.sources() {
            let found = members
                .iter()
                .filter(|m| m.source() == *source)
                .find_map(|m| m.quote_value().filter(|v| is_usable_quote(*v)));
            if let Some(value) = found {
                return (value, Some(*source));
            }
        }
        (0.0, None)
    }
}
