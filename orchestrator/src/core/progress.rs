//! Block-production verdict from two height samples.

/// Which of the two samples could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    First,
    Second,
}

impl Sample {
    fn label(self) -> &'static str {
        match self {
            Sample::First => "first",
            Sample::Second => "second",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressVerdict {
    /// Heights differ. Any difference counts, including a decrease.
    Changed { from: u64, to: u64 },
    Unchanged { height: u64 },
    Missing(Sample),
}

impl ProgressVerdict {
    pub fn is_progress(&self) -> bool {
        matches!(self, ProgressVerdict::Changed { .. })
    }

    /// True when the chain reported a lower height on the second sample.
    pub fn is_regression(&self) -> bool {
        matches!(self, ProgressVerdict::Changed { from, to } if to < from)
    }

    pub fn detail(&self) -> String {
        match self {
            ProgressVerdict::Changed { from, to } if to < from => {
                format!("Block height changed {from} -> {to} (decreased)")
            }
            ProgressVerdict::Changed { from, to } => format!("Block height {from} -> {to}"),
            ProgressVerdict::Unchanged { height } => {
                format!("No new blocks produced (height stuck at {height})")
            }
            ProgressVerdict::Missing(sample) => {
                format!("Could not read block height ({} sample)", sample.label())
            }
        }
    }
}

/// Classify two samples taken a settle interval apart.
pub fn classify_progress(first: Option<u64>, second: Option<u64>) -> ProgressVerdict {
    match (first, second) {
        (None, _) => ProgressVerdict::Missing(Sample::First),
        (Some(_), None) => ProgressVerdict::Missing(Sample::Second),
        (Some(from), Some(to)) if from != to => ProgressVerdict::Changed { from, to },
        (Some(height), Some(_)) => ProgressVerdict::Unchanged { height },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_heights_are_progress() {
        let verdict = classify_progress(Some(3), Some(7));
        assert!(verdict.is_progress());
        assert!(!verdict.is_regression());
        assert_eq!(verdict.detail(), "Block height 3 -> 7");
    }

    #[test]
    fn equal_heights_are_not_progress() {
        let verdict = classify_progress(Some(5), Some(5));
        assert_eq!(verdict, ProgressVerdict::Unchanged { height: 5 });
        assert!(!verdict.is_progress());
        assert!(verdict.detail().contains("No new blocks"));
    }

    #[test]
    fn decrease_still_counts_but_is_flagged() {
        let verdict = classify_progress(Some(9), Some(2));
        assert!(verdict.is_progress());
        assert!(verdict.is_regression());
        assert!(verdict.detail().contains("decreased"));
    }

    #[test]
    fn missing_samples_have_distinct_diagnostics() {
        let first = classify_progress(None, Some(1));
        let second = classify_progress(Some(1), None);
        assert_eq!(first, ProgressVerdict::Missing(Sample::First));
        assert_eq!(second, ProgressVerdict::Missing(Sample::Second));
        assert!(!first.is_progress());
        assert_ne!(first.detail(), second.detail());
        assert!(second.detail().contains("Could not read block height"));
    }
}
