//! Funding table and its single-writer tracker

use super::types::FundingUpdate;
use crate::market::FundingInfo;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::watch;

/// Latest funding state for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct FundingEntry {
    pub symbol: String,
    pub funding_rate: Decimal,
    pub mark_price: Decimal,
    /// Funding interval in hours, unknown until the interval lookup succeeds
    pub interval_hours: Option<u32>,
    pub next_funding_time: Option<DateTime<Utc>>,
    /// Event time of the last update
    pub updated_at: DateTime<Utc>,
}

/// Funding rates keyed by symbol, at most one entry per symbol
#[derive(Debug, Clone, Default)]
pub struct FundingTable {
    entries: BTreeMap<String, FundingEntry>,
    listed_intervals: HashMap<String, u32>,
    fallback_interval: Option<u32>,
}

impl FundingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for the update's symbol
    pub fn apply(&mut self, update: &FundingUpdate) {
        let interval_hours = self.interval_for(&update.symbol);
        match self.entries.get_mut(&update.symbol) {
            Some(entry) => {
                entry.funding_rate = update.funding_rate;
                entry.mark_price = update.mark_price;
                entry.next_funding_time = update.next_funding_time;
                entry.updated_at = update.event_time;
                if interval_hours.is_some() {
                    entry.interval_hours = interval_hours;
                }
            }
            None => {
                self.entries.insert(
                    update.symbol.clone(),
                    FundingEntry {
                        symbol: update.symbol.clone(),
                        funding_rate: update.funding_rate,
                        mark_price: update.mark_price,
                        interval_hours,
                        next_funding_time: update.next_funding_time,
                        updated_at: update.event_time,
                    },
                );
            }
        }
    }

    /// Replace the interval lookup result
    ///
    /// Symbols absent from `listed` take `fallback`, including symbols that
    /// first appear after this call.
    pub fn apply_intervals(&mut self, listed: &[FundingInfo], fallback: Option<u32>) {
        self.listed_intervals = listed
            .iter()
            .map(|info| (info.symbol.clone(), info.interval_hours))
            .collect();
        self.fallback_interval = fallback;

        for entry in self.entries.values_mut() {
            entry.interval_hours = self
                .listed_intervals
                .get(&entry.symbol)
                .copied()
                .or(self.fallback_interval);
        }
    }

    /// Set one symbol's interval directly
    pub fn set_interval(&mut self, symbol: &str, hours: u32) {
        self.listed_intervals.insert(symbol.to_string(), hours);
        if let Some(entry) = self.entries.get_mut(symbol) {
            entry.interval_hours = Some(hours);
        }
    }

    fn interval_for(&self, symbol: &str) -> Option<u32> {
        self.listed_intervals
            .get(symbol)
            .copied()
            .or(self.fallback_interval)
    }

    pub fn get(&self, symbol: &str) -> Option<&FundingEntry> {
        self.entries.get(symbol)
    }

    /// Entries in ascending symbol order
    pub fn iter(&self) -> impl Iterator<Item = &FundingEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries funding strictly below `threshold`, most negative first
    pub fn below(&self, threshold: Decimal) -> Vec<&FundingEntry> {
        let mut entries: Vec<&FundingEntry> = self
            .entries
            .values()
            .filter(|e| e.funding_rate < threshold)
            .collect();
        entries.sort_by(|a, b| {
            a.funding_rate
                .cmp(&b.funding_rate)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        entries
    }
}

/// Owns the funding table; the only path through which it is mutated
///
/// Readers obtain a [`watch::Receiver`] and are notified on every change.
pub struct FundingTracker {
    table: watch::Sender<FundingTable>,
}

impl FundingTracker {
    pub fn new() -> Self {
        let (table, _) = watch::channel(FundingTable::new());
        Self { table }
    }

    /// Register for change notifications
    pub fn subscribe(&self) -> watch::Receiver<FundingTable> {
        self.table.subscribe()
    }

    /// Apply a batch of funding pushes; returns the number applied
    pub fn apply_batch(&self, updates: &[FundingUpdate]) -> usize {
        if updates.is_empty() {
            return 0;
        }
        self.table.send_modify(|table| {
            for update in updates {
                table.apply(update);
            }
        });
        updates.len()
    }

    /// Apply a funding interval lookup result
    pub fn apply_intervals(&self, listed: &[FundingInfo], fallback: Option<u32>) {
        self.table
            .send_modify(|table| table.apply_intervals(listed, fallback));
    }

    /// Borrow the current table
    ///
    /// Do not hold the guard across an await point.
    pub fn table(&self) -> watch::Ref<'_, FundingTable> {
        self.table.borrow()
    }

    pub fn snapshot(&self) -> FundingTable {
        self.table.borrow().clone()
    }
}

impl Default for FundingTracker {
    fn default() -> Self {
        Self::new()
    }
}
