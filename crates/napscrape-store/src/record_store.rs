//! In-memory record store: document order plus a slug index.

use std::collections::HashMap;

use napscrape_core::{NapRecord, RunSummary};
use tracing::{debug, warn};

/// Ordered collection of [`NapRecord`]s keyed by slug.
///
/// Order is first-seen document order and never changes; records are only
/// appended, never removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordStore {
    records: Vec<NapRecord>,
    index: HashMap<String, usize>,
}

/// What [`RecordStore::upsert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted(usize),
    Updated(usize),
}

/// Outcome of merging a fresh scrape into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub updated: usize,
    /// Existing records whose PDF link changed and whose progress was reset.
    pub reset: usize,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records in order. A repeated slug keeps the first
    /// position and the last record's contents.
    pub fn from_records(records: Vec<NapRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            if let Upsert::Updated(idx) = store.upsert(record) {
                warn!(idx, "duplicate slug in record list, later entry wins");
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&NapRecord> {
        self.records.get(idx)
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<&NapRecord> {
        self.position(slug).map(|idx| &self.records[idx])
    }

    pub fn position(&self, slug: &str) -> Option<usize> {
        self.index.get(slug).copied()
    }

    /// Find a record by country name, case-insensitively.
    pub fn find_country(&self, name: &str) -> Option<&NapRecord> {
        let needle = name.trim();
        self.records
            .iter()
            .find(|r| r.country_name.eq_ignore_ascii_case(needle))
    }

    pub fn iter(&self) -> impl Iterator<Item = &NapRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[NapRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<NapRecord> {
        self.records
    }

    /// Indices of records matching `pred`, in store order.
    pub fn indices_where(&self, pred: impl Fn(&NapRecord) -> bool) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| pred(r))
            .map(|(i, _)| i)
            .collect()
    }

    /// Insert a new record at the end, or replace the one with the same slug in place.
    pub fn upsert(&mut self, record: NapRecord) -> Upsert {
        match self.index.get(&record.slug) {
            Some(&idx) => {
                self.records[idx] = record;
                Upsert::Updated(idx)
            }
            None => {
                let idx = self.records.len();
                self.index.insert(record.slug.clone(), idx);
                self.records.push(record);
                Upsert::Inserted(idx)
            }
        }
    }

    /// Mutate the record at `idx` in place. Returns `false` if `idx` is out of range.
    ///
    /// A slug change is rejected and rolled back, since the slug is the key.
    pub fn update(&mut self, idx: usize, f: impl FnOnce(&mut NapRecord)) -> bool {
        let Some(record) = self.records.get_mut(idx) else {
            return false;
        };
        let slug = record.slug.clone();
        f(record);
        if record.slug != slug {
            warn!(from = %slug, to = %record.slug, "slug change rejected in update");
            record.slug = slug;
        }
        true
    }

    /// Merge a freshly scraped table into the store.
    ///
    /// Metadata is taken from the scrape. PDF progress is kept unless the
    /// selected link changed. Records missing from the scrape are kept.
    pub fn merge_scraped(&mut self, scraped: Vec<NapRecord>) -> MergeReport {
        let mut report = MergeReport::default();
        for fresh in scraped {
            let Some(idx) = self.position(&fresh.slug) else {
                debug!(country = %fresh.country_name, "new record");
                self.upsert(fresh);
                report.added += 1;
                continue;
            };

            let existing = &mut self.records[idx];
            let link_changed = existing.pdf_link != fresh.pdf_link;
            existing.nap_id = fresh.nap_id;
            existing.country_name = fresh.country_name;
            existing.region = fresh.region;
            existing.ldc_sids_marker = fresh.ldc_sids_marker;
            existing.language_options = fresh.language_options;
            existing.language_links = fresh.language_links;
            existing.date_posted = fresh.date_posted;
            if link_changed {
                debug!(
                    country = %existing.country_name,
                    old = ?existing.pdf_link,
                    new = ?fresh.pdf_link,
                    "PDF link changed, resetting progress"
                );
                existing.pdf_link = fresh.pdf_link;
                existing.reset();
                report.reset += 1;
            }
            report.updated += 1;
        }
        report
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_records(&self.records)
    }
}
