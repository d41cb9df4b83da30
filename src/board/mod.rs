//! The opportunity board.
//!
//! - [`aggregator`]: fetch slices, filter, sort and paginate
//! - [`session`]: the live dashboard state shared by every view
//! - [`preferences`]: persisted user choices

pub mod aggregator;
pub mod preferences;
pub mod session;

pub use aggregator::{
    available_dates, available_sources, collect_groups, paginate, resolve_link, select_entries,
    sort_entries, BoardEntry, BoardQuery, CollectedGroups, Page, SortBy, SortOrder, ALL,
    EXCLUDED_SOURCES, PAGE_SIZE,
};
pub use preferences::{
    PreferenceStore, Preferences, SharedPreferences, DEFAULT_DETAIL_REFRESH_DELAY_MS,
    DEFAULT_REFRESH_DELAY_MS,
};
pub use session::{
    BoardEntryView, BoardView, ChangeHighlights, DashboardSession, DetailOpportunity,
    GroupDetail, GroupDetailView, GroupRefresh, OutcomeLink, RefreshHandle, RefreshOutcome,
    SessionStatus, Snapshot,
};
