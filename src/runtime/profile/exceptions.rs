//! Exception history: classifies raised exceptions by category and finds hot
//! exception paths.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::runtime::value::Exception;

#[derive(Debug, Default)]
struct History {
    /// First category seen; cleared to generic once a second one shows up
    first_category: Option<String>,
    polymorphic: bool,
    counts: HashMap<String, u64>,
}

/// Observed exception categories and their repeat counts
#[derive(Debug)]
pub struct ExceptionProfile {
    history: Mutex<History>,
    hot_threshold: u64,
}

/// What classifying one exception told us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionObservation {
    /// Occurrences of this category so far, including this one
    pub count: u64,
    /// This occurrence made the category hot
    pub became_hot: bool,
}

impl ExceptionProfile {
    pub fn new(hot_threshold: u32) -> Self {
        Self {
            history: Mutex::new(History::default()),
            hot_threshold: hot_threshold.max(1) as u64,
        }
    }

    pub fn record(&self, exception: &Exception) -> ExceptionObservation {
        let mut history = self.history.lock();
        let category = exception.category();

        match &history.first_category {
            None if !history.polymorphic => {
                history.first_category = Some(category.to_string());
            }
            Some(first) if first != category => {
                history.first_category = None;
                history.polymorphic = true;
            }
            _ => {}
        }

        let count = history.counts.entry(category.to_string()).or_insert(0);
        *count += 1;
        ExceptionObservation {
            count: *count,
            became_hot: *count == self.hot_threshold,
        }
    }

    /// The single category seen so far, if only one has been seen
    pub fn monomorphic_category(&self) -> Option<String> {
        let history = self.history.lock();
        if history.polymorphic {
            None
        } else {
            history.first_category.clone()
        }
    }

    pub fn count(&self, category: &str) -> u64 {
        self.history.lock().counts.get(category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.history.lock().counts.values().sum()
    }

    /// Categories that reached the hot threshold, sorted
    pub fn hot_categories(&self) -> Vec<String> {
        let history = self.history.lock();
        let mut hot: Vec<String> = history
            .counts
            .iter()
            .filter(|(_, count)| **count >= self.hot_threshold)
            .map(|(category, _)| category.clone())
            .collect();
        hot.sort();
        hot
    }

    /// All categories with their counts, sorted by category
    pub fn categories(&self) -> Vec<(String, u64)> {
        let history = self.history.lock();
        let mut all: Vec<(String, u64)> = history
            .counts
            .iter()
            .map(|(category, count)| (category.clone(), *count))
            .collect();
        all.sort();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_and_hotness() {
        let profile = ExceptionProfile::new(3);
        let type_error = Exception::new("TypeError", "x");

        assert!(!profile.record(&type_error).became_hot);
        assert!(!profile.record(&type_error).became_hot);
        let third = profile.record(&type_error);
        assert_eq!(third.count, 3);
        assert!(third.became_hot);
        assert!(!profile.record(&type_error).became_hot);

        assert_eq!(profile.monomorphic_category().as_deref(), Some("TypeError"));
        assert_eq!(profile.hot_categories(), vec!["TypeError".to_string()]);
    }

    #[test]
    fn test_second_category_goes_polymorphic() {
        let profile = ExceptionProfile::new(10);
        profile.record(&Exception::new("TypeError", "x"));
        profile.record(&Exception::new("RangeError", "y"));
        profile.record(&Exception::new("TypeError", "z"));

        assert_eq!(profile.monomorphic_category(), None);
        assert_eq!(profile.count("TypeError"), 2);
        assert_eq!(profile.total(), 3);
        assert!(profile.hot_categories().is_empty());
    }
}
