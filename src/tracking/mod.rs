//! Cross-refresh opportunity bookkeeping.
//!
//! - Live "active for" durations per opportunity
//! - Profit change detection between refreshes

pub mod changes;
pub mod clock;
pub mod duration;

pub use changes::{
    profit_moves, ChangeKind, ChangeTracker, ListenerId, OpportunityChange, ProfitSample,
    CHANGE_DISPLAY_WINDOW, PROFIT_EPSILON,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use duration::{
    format_elapsed, parse_reported_duration, DurationSnapshot, DurationTracker, Subscription,
    SubscriptionId, TrackerStats, NEW_THRESHOLD_MS,
};
