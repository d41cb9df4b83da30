//! Refresh-to-refresh profit change detection.

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use crate::feed::MatchGroup;

/// Profit moves of this size or smaller (percentage points) are noise.
pub const PROFIT_EPSILON: Decimal = dec!(0.01);

/// How long consumers keep a change highlighted.
pub const CHANGE_DISPLAY_WINDOW: Duration = Duration::from_secs(3);

/// Kind of change between two refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
    /// First time this id was seen.
    Added,
    /// Profit went up by more than the epsilon.
    ProfitIncrease,
    /// Profit went down by more than the epsilon.
    ProfitDecrease,
}

/// One detected change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityChange {
    pub id: String,
    pub kind: ChangeKind,
    /// Absent for `Added`.
    pub old_profit: Option<Decimal>,
    pub new_profit: Decimal,
}

/// An opportunity id with its currently selected profit percentage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfitSample {
    pub id: String,
    pub profit_percentage: Decimal,
}

impl ProfitSample {
    pub fn new(id: impl Into<String>, profit_percentage: Decimal) -> Self {
        Self {
            id: id.into(),
            profit_percentage,
        }
    }

    /// Samples for every opportunity of every group, in order.
    pub fn from_groups(groups: &[MatchGroup]) -> Vec<Self> {
        groups
            .iter()
            .flat_map(|group| group.opportunities.iter())
            .map(|opp| Self::new(opp.unique_id.clone(), opp.profit_percentage()))
            .collect()
    }
}

fn profit_move(sample: &ProfitSample, old: Decimal) -> Option<OpportunityChange> {
    let delta = sample.profit_percentage.saturating_sub(old);
    if delta.abs() <= PROFIT_EPSILON {
        return None;
    }
    let kind = if delta > Decimal::ZERO {
        ChangeKind::ProfitIncrease
    } else {
        ChangeKind::ProfitDecrease
    };
    Some(OpportunityChange {
        id: sample.id.clone(),
        kind,
        old_profit: Some(old),
        new_profit: sample.profit_percentage,
    })
}

/// Profit moves of ids present in both lists. Never reports `Added`.
pub fn profit_moves(previous: &[ProfitSample], current: &[ProfitSample]) -> Vec<OpportunityChange> {
    current
        .iter()
        .filter_map(|sample| {
            previous
                .iter()
                .find(|p| p.id == sample.id)
                .and_then(|p| profit_move(sample, p.profit_percentage))
        })
        .collect()
}

/// Identifies a registered change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ChangeListener = Box<dyn Fn(&[OpportunityChange]) + Send + Sync>;

/// Remembers the previous refresh and reports what moved.
#[derive(Default)]
pub struct ChangeTracker {
    previous: HashMap<String, Decimal>,
    listeners: Vec<(ListenerId, ChangeListener)>,
    next_listener: u64,
}

impl std::fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("previous", &self.previous.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `current` with the previous call and remember `current`.
    ///
    /// Ids missing from `current` are forgotten without being reported.
    /// Listeners are notified with every batch, including empty ones.
    pub fn diff(&mut self, current: &[ProfitSample]) -> Vec<OpportunityChange> {
        let mut changes = Vec::new();

        for sample in current {
            match self.previous.get(&sample.id) {
                None => changes.push(OpportunityChange {
                    id: sample.id.clone(),
                    kind: ChangeKind::Added,
                    old_profit: None,
                    new_profit: sample.profit_percentage,
                }),
                Some(&old) => changes.extend(profit_move(sample, old)),
            }
        }

        self.previous = current
            .iter()
            .map(|sample| (sample.id.clone(), sample.profit_percentage))
            .collect();

        debug!(
            tracked = self.previous.len(),
            changes = changes.len(),
            "Diffed opportunity profits"
        );

        for (_, listener) in &self.listeners {
            listener(&changes);
        }

        changes
    }

    /// Register a listener called with every change batch.
    pub fn on_changes<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&[OpportunityChange]) + Send + Sync + 'static,
    {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Forget the previous snapshot; the next diff reports everything as added.
    pub fn reset(&mut self) {
        self.previous.clear();
    }

    /// Number of ids remembered from the last diff.
    pub fn tracked(&self) -> usize {
        self.previous.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    fn sample(id: &str, profit: Decimal) -> ProfitSample {
        ProfitSample::new(id, profit)
    }

    #[test]
    fn first_diff_reports_everything_added() {
        let mut tracker = ChangeTracker::new();
        let changes = tracker.diff(&[sample("a", dec!(1.5)), sample("b", dec!(2))]);

        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.kind == ChangeKind::Added));
        assert_eq!(changes[0].old_profit, None);
    }

    #[test]
    fn epsilon_is_exclusive() {
        let mut tracker = ChangeTracker::new();
        tracker.diff(&[sample("a", dec!(1.00)), sample("b", dec!(1.00))]);

        let changes = tracker.diff(&[sample("a", dec!(1.01)), sample("b", dec!(1.011))]);

        assert_eq!(
            changes,
            vec![OpportunityChange {
                id: "b".to_string(),
                kind: ChangeKind::ProfitIncrease,
                old_profit: Some(dec!(1.00)),
                new_profit: dec!(1.011),
            }]
        );
    }

    #[test]
    fn decreases_are_classified() {
        let mut tracker = ChangeTracker::new();
        tracker.diff(&[sample("a", dec!(3))]);
        let changes = tracker.diff(&[sample("a", dec!(2.5))]);
        assert_eq!(changes[0].kind, ChangeKind::ProfitDecrease);
    }

    #[test]
    fn absent_ids_are_dropped_silently_and_re_added_later() {
        let mut tracker = ChangeTracker::new();
        tracker.diff(&[sample("a", dec!(1)), sample("b", dec!(1))]);

        assert!(tracker.diff(&[sample("a", dec!(1))]).is_empty());
        assert_eq!(tracker.tracked(), 1);

        let changes = tracker.diff(&[sample("a", dec!(1)), sample("b", dec!(1))]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Added);
    }

    #[test]
    fn listeners_see_every_batch() {
        let mut tracker = ChangeTracker::new();
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let id = tracker.on_changes(move |changes| sink.lock().unwrap().push(changes.len()));

        tracker.diff(&[sample("a", dec!(1))]);
        tracker.diff(&[sample("a", dec!(1))]);
        assert_eq!(*batches.lock().unwrap(), vec![1, 0]);

        assert!(tracker.remove_listener(id));
        tracker.diff(&[]);
        assert_eq!(batches.lock().unwrap().len(), 2);
    }

    #[test]
    fn reset_forgets_previous_snapshot() {
        let mut tracker = ChangeTracker::new();
        tracker.diff(&[sample("a", dec!(1))]);
        tracker.reset();
        assert_eq!(tracker.diff(&[sample("a", dec!(1))])[0].kind, ChangeKind::Added);
    }

    #[test]
    fn profit_moves_ignore_new_and_missing_ids() {
        let previous = [sample("a", dec!(1)), sample("gone", dec!(4))];
        let current = [sample("a", dec!(0.5)), sample("fresh", dec!(9))];

        let moves = profit_moves(&previous, &current);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].id, "a");
        assert_eq!(moves[0].kind, ChangeKind::ProfitDecrease);
        assert_eq!(moves[0].old_profit, Some(dec!(1)));
    }

    #[test]
    fn change_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ChangeKind::ProfitIncrease).unwrap(),
            "\"profit_increase\""
        );
        assert_eq!(ChangeKind::ProfitDecrease.to_string(), "profit_decrease");
    }
}
