//! Day/counter state owned by the parser.

use std::fs;
use std::path::Path;

/// Current day and number of batches processed on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCounter {
    current_day: String,
    count_times_day: u32,
}

impl DayCounter {
    #[must_use]
    pub fn new(day: impl Into<String>) -> Self {
        Self {
            current_day: day.into(),
            count_times_day: 0,
        }
    }

    /// Start on `day`, continuing after the batch directories that already
    /// exist under `image_root/<day>/` so a restart never overwrites them.
    #[must_use]
    pub fn seeded(image_root: &Path, day: &str) -> Self {
        let existing = fs::read_dir(image_root.join(day))
            .map(|entries| entries.filter_map(std::result::Result::ok).count())
            .unwrap_or(0);
        Self {
            current_day: day.to_string(),
            count_times_day: u32::try_from(existing).unwrap_or(u32::MAX),
        }
    }

    #[must_use]
    pub fn day(&self) -> &str {
        &self.current_day
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count_times_day
    }

    /// Switch to `today` if it differs from the current day.
    ///
    /// Returns the previous day and its batch count when a rollover happened.
    pub fn roll_to(&mut self, today: &str) -> Option<(String, u32)> {
        if self.current_day == today {
            return None;
        }
        let previous = std::mem::replace(&mut self.current_day, today.to_string());
        let batches = std::mem::replace(&mut self.count_times_day, 0);
        Some((previous, batches))
    }

    /// Claim the next batch number for the current day.
    pub fn next_batch(&mut self) -> u32 {
        self.count_times_day = self.count_times_day.saturating_add(1);
        self.count_times_day
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollover_resets_before_next_batch() {
        let mut counter = DayCounter::new("20240309");
        counter.next_batch();
        counter.next_batch();
        assert_eq!(counter.count(), 2);

        assert_eq!(counter.roll_to("20240309"), None);
        assert_eq!(
            counter.roll_to("20240310"),
            Some(("20240309".to_string(), 2))
        );
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.next_batch(), 1);
        assert_eq!(counter.day(), "20240310");
    }

    #[test]
    fn seeded_counts_existing_batch_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        for batch in ["1", "2", "3"] {
            fs::create_dir_all(tmp.path().join("20240309").join(batch)).unwrap();
        }

        let counter = DayCounter::seeded(tmp.path(), "20240309");
        assert_eq!(counter.count(), 3);

        let fresh = DayCounter::seeded(tmp.path(), "20240310");
        assert_eq!(fresh.count(), 0);
    }
}
