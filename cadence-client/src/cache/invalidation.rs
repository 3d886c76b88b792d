//! Event-to-query invalidation table.

use super::query_cache::QueryCache;
use crate::config::InvalidationRule;
use cadence_core::resources::*;
use cadence_core::{EventKind, KeyPattern, Product};
use std::collections::HashMap;
use tracing::trace;

const SHARED_ROWS: &[(EventKind, &[&str])] = &[
    (EventKind::Notification, &[NOTIFICATIONS, UNREAD_COUNT]),
    (EventKind::InvoicePaid, &[INVOICES, DASHBOARD]),
    (EventKind::DocumentProcessed, &[DOCUMENTS]),
];

const PRACTICE_ROWS: &[(EventKind, &[&str])] = &[
    (EventKind::Message, &[MESSAGES, UNREAD_COUNT]),
    (EventKind::WorkflowUpdate, &[WORKFLOWS, TASKS]),
    (EventKind::TaskAssigned, &[TASKS, DASHBOARD]),
    (EventKind::InvoiceCreated, &[INVOICES, DASHBOARD]),
    (EventKind::ClientUpdated, &[CLIENTS]),
];

const TALENT_ROWS: &[(EventKind, &[&str])] = &[
    (EventKind::CandidateApplied, &[CANDIDATES, PIPELINE, DASHBOARD]),
    (EventKind::CandidateStageChanged, &[CANDIDATES, PIPELINE]),
    (EventKind::InterviewScheduled, &[INTERVIEWS, DASHBOARD]),
    (EventKind::OfferUpdated, &[OFFERS, CANDIDATES]),
];

/// Which cached queries each event kind makes stale.
///
/// Pure data: adding a row never requires touching the dispatch code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationTable {
    rows: HashMap<EventKind, Vec<KeyPattern>>,
}

impl InvalidationTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Shared rows plus the product's own.
    pub fn for_product(product: Product) -> Self {
        let product_rows = match product {
            Product::Practice => PRACTICE_ROWS,
            Product::Talent => TALENT_ROWS,
        };
        let mut table = Self::empty();
        for (kind, resources) in SHARED_ROWS.iter().chain(product_rows) {
            for resource in resources.iter() {
                table = table.with_rule(*kind, KeyPattern::resource(*resource));
            }
        }
        table
    }

    /// Append a pattern to `kind`'s row, ignoring duplicates.
    pub fn with_rule(mut self, kind: EventKind, pattern: KeyPattern) -> Self {
        let row = self.rows.entry(kind).or_default();
        if !row.contains(&pattern) {
            row.push(pattern);
        }
        self
    }

    /// Append rows from configuration.
    pub fn extend_from(mut self, rules: &[InvalidationRule]) -> Self {
        for rule in rules {
            for resource in &rule.resources {
                self = self.with_rule(rule.event, KeyPattern::resource(resource.as_str()));
            }
        }
        self
    }

    pub fn patterns_for(&self, kind: EventKind) -> &[KeyPattern] {
        self.rows.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Invalidate every entry in `kind`'s row; returns entries marked stale.
    pub fn apply(&self, kind: EventKind, cache: &QueryCache) -> usize {
        let patterns = self.patterns_for(kind);
        let count = patterns
            .iter()
            .map(|pattern| cache.invalidate(pattern))
            .sum();
        trace!(%kind, patterns = patterns.len(), count, "Applied invalidation row");
        count
    }
}
