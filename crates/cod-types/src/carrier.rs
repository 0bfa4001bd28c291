//! Carrier (shipping company) settings relevant to batching

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::CarrierId;

/// A shipping carrier that collects COD cash on the merchant's behalf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Carrier {
    pub id: CarrierId,
    /// Short code used in batch names
    pub code: String,
    pub name: String,
    /// Weekdays on which the carrier hands collected cash over
    pub collection_days: Vec<Weekday>,
    /// Whether the scheduled scan creates batches for this carrier
    pub auto_create_batch: bool,
}

impl Carrier {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: CarrierId::new(),
            code: code.into(),
            name: name.into(),
            collection_days: Vec::new(),
            auto_create_batch: false,
        }
    }

    /// Enable scheduled batching on the given weekdays
    pub fn with_schedule(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.collection_days = days.into_iter().collect();
        self.auto_create_batch = true;
        self
    }

    pub fn is_collection_day(&self, date: NaiveDate) -> bool {
        self.collection_days.contains(&date.weekday())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_day() {
        let carrier = Carrier::new("ARX", "Aramex").with_schedule([Weekday::Mon, Weekday::Thu]);
        let monday = NaiveDate::from_ymd_opt(2026, 10, 12).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2026, 10, 13).unwrap();
        assert!(carrier.auto_create_batch);
        assert!(carrier.is_collection_day(monday));
        assert!(!carrier.is_collection_day(tuesday));
    }
}
