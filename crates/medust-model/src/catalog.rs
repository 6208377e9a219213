//! Append-only per-run catalogs of pipeline records.
//!
//! A catalog only grows during a run. Records are never updated in place;
//! [`Catalog::sorted`] gives a deterministic order for writing regardless of
//! the order in which parallel workers appended them.

use crate::{CloudAnomaly, DustEvent, EventKey, PersistenceMetric};

/// A record that can be stored in a [`Catalog`].
pub trait CatalogRecord {
    /// Sort key of the record.
    type Key: Ord;

    /// The record's key.
    fn catalog_key(&self) -> Self::Key;
}

impl CatalogRecord for DustEvent {
    type Key = EventKey;

    fn catalog_key(&self) -> Self::Key {
        self.key()
    }
}

impl CatalogRecord for CloudAnomaly {
    type Key = (EventKey, String, u32);

    fn catalog_key(&self) -> Self::Key {
        (self.event.clone(), self.property.as_str().to_string(), self.day_offset)
    }
}

impl CatalogRecord for PersistenceMetric {
    type Key = (EventKey, String);

    fn catalog_key(&self) -> Self::Key {
        (self.event.clone(), self.property.as_str().to_string())
    }
}

/// Append-only list of records.
#[derive(Debug, Clone)]
pub struct Catalog<T> {
    records: Vec<T>,
}

impl<T> Default for Catalog<T> {
    fn default() -> Self {
        Self { records: Vec::new() }
    }
}

impl<T: CatalogRecord> Catalog<T> {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record.
    pub fn append(&mut self, record: T) {
        self.records.push(record);
    }

    /// Append many records.
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, records: I) {
        self.records.extend(records);
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.records.iter()
    }

    /// Records ordered by their catalog key.
    pub fn sorted(&self) -> Vec<&T> {
        let mut refs: Vec<&T> = self.records.iter().collect();
        refs.sort_by_key(|r| r.catalog_key());
        refs
    }
}

impl<'a, T> IntoIterator for &'a Catalog<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Dust events of one run, keyed by (region, start).
pub type EventCatalog = Catalog<DustEvent>;
/// Cloud anomalies of one run, keyed by (event, property, day offset).
pub type AnomalyCatalog = Catalog<CloudAnomaly>;
/// Persistence metrics of one run, keyed by (event, property).
pub type PersistenceCatalog = Catalog<PersistenceMetric>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn event(region: &str, day: u32) -> DustEvent {
        let start = NaiveDate::from_ymd_opt(2020, 6, day).unwrap();
        DustEvent {
            region: region.to_string(),
            start,
            end: start,
            peak_aod: 0.7,
            confidence: 0.5,
            valid_days: 1,
        }
    }

    #[test]
    fn test_sorted_by_key_regardless_of_insertion() {
        let mut catalog = EventCatalog::new();
        catalog.append(event("west", 10));
        catalog.extend([event("east", 12), event("east", 3)]);

        let keys: Vec<String> = catalog.sorted().iter().map(|e| e.key().to_string()).collect();
        assert_eq!(keys, vec!["east@2020-06-03", "east@2020-06-12", "west@2020-06-10"]);
        assert_eq!(catalog.len(), 3);
        // Insertion order is preserved for plain iteration.
        assert_eq!(catalog.iter().next().unwrap().region, "west");
    }
}
