//! Arbitrage dashboard entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use arb_dashboard::api::{create_router, AppState};
use arb_dashboard::arbitrage::StakeSheet;
use arb_dashboard::board::{
    BoardQuery, BoardView, DashboardSession, GroupDetail, GroupRefresh, PreferenceStore,
    RefreshOutcome, SharedPreferences, SortBy, SortOrder,
};
use arb_dashboard::config::{Config, MIN_REFRESH_DELAY_MS};
use arb_dashboard::feed::{BestOdds, FeedClient, FeedSource, LocalFeed, Mode, Opportunity};
use arb_dashboard::metrics;
use arb_dashboard::utils::{parse_odds_pair, shutdown_signal};

/// Sports-betting arbitrage dashboard.
#[derive(Parser, Debug)]
#[command(name = "arb-dashboard")]
#[command(about = "Browse arbitrage opportunities, track how long they last and size stakes")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API and keep the board refreshed (default).
    Serve {
        /// HTTP server port.
        #[arg(short, long)]
        port: Option<u16>,

        /// Refresh the board every N milliseconds, overriding stored preferences.
        #[arg(long)]
        refresh_delay_ms: Option<u64>,
    },

    /// Print the board to the terminal, refreshing periodically.
    Watch {
        /// Print once and exit.
        #[arg(long)]
        once: bool,

        /// Feed mode.
        #[arg(long)]
        mode: Option<Mode>,

        /// Restrict to one sport.
        #[arg(long)]
        sport: Option<String>,

        /// Comma separated sources to filter by.
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,

        /// Sort key.
        #[arg(long)]
        sort_by: Option<SortBy>,

        /// Sort direction.
        #[arg(long)]
        sort_order: Option<SortOrder>,
    },

    /// Show one match group, optionally following it as it refreshes.
    Detail {
        /// Group id as shown on the board.
        group_id: String,

        /// Keep refreshing until the group disappears or Ctrl+C.
        #[arg(long)]
        follow: bool,

        /// Feed mode; defaults to the stored preference.
        #[arg(long)]
        mode: Option<Mode>,
    },

    /// Split a stake across outcomes given as KEY=ODDS.
    Calc {
        /// Outcome odds, e.g. 1_odd=2.10 draw_odd=3.40 2_odd=3.60.
        #[arg(required = true, value_parser = parse_odds_pair)]
        legs: Vec<(String, Decimal)>,

        /// Total stake.
        #[arg(short, long)]
        stake: Option<Decimal>,

        /// Rounding granularity (1, 5, 10, 20, 50, 100).
        #[arg(short, long)]
        rounding: Option<u32>,

        /// Keep one leg at a stake and rebalance the rest, as KEY=STAKE.
        #[arg(long, value_parser = parse_odds_pair)]
        fix: Option<(String, Decimal)>,
    },

    /// Print discovered sports and countries.
    Countries,

    /// Check configuration validity.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("arb_dashboard=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // The recorder must exist before metrics are described.
    let prometheus = match &args.command {
        Some(Command::Serve { .. }) | None => Some(PrometheusBuilder::new().install_recorder()?),
        _ => None,
    };
    metrics::init_metrics();

    match args.command {
        Some(Command::Serve {
            port,
            refresh_delay_ms,
        }) => cmd_serve(port, refresh_delay_ms, prometheus).await,
        Some(Command::Watch {
            once,
            mode,
            sport,
            sources,
            sort_by,
            sort_order,
        }) => {
            let query = BoardQuery {
                mode: mode.unwrap_or_default(),
                sport: sport.unwrap_or_else(|| "all".to_string()),
                sources,
                sort_by: sort_by.unwrap_or_default(),
                sort_order: sort_order.unwrap_or_default(),
                ..BoardQuery::default()
            };
            cmd_watch(query, once).await
        }
        Some(Command::Detail {
            group_id,
            follow,
            mode,
        }) => cmd_detail(group_id, follow, mode).await,
        Some(Command::Calc {
            legs,
            stake,
            rounding,
            fix,
        }) => cmd_calc(legs, stake, rounding, fix),
        Some(Command::Countries) => cmd_countries().await,
        Some(Command::CheckConfig) => cmd_check_config().await,
        None => cmd_serve(None, None, prometheus).await,
    }
}

fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }
    Ok(config)
}

fn build_source(config: &Config) -> anyhow::Result<Arc<dyn FeedSource>> {
    match &config.feed_url {
        Some(url) => {
            info!("Using remote feed at {}", url);
            let client = FeedClient::new(url, Duration::from_millis(config.http_timeout_ms))?;
            Ok(Arc::new(client))
        }
        None => {
            info!("Using local data tree at {}", config.data_dir.display());
            let mut feed = LocalFeed::new(&config.data_dir);
            if let Some(path) = &config.labels_path {
                feed = feed.with_labels_path(path);
            }
            Ok(Arc::new(feed))
        }
    }
}

async fn open_session(config: &Config) -> anyhow::Result<Arc<DashboardSession>> {
    let session = Arc::new(DashboardSession::new(build_source(config)?));
    let countries = session.initialize().await?;
    info!(
        live_sports = countries.live.len(),
        prematch_sports = countries.prematch.len(),
        "Discovered feed structure"
    );
    Ok(session)
}

/// Serve the HTTP API with the board refreshing in the background.
async fn cmd_serve(
    port: Option<u16>,
    refresh_delay_ms: Option<u64>,
    prometheus: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    let mut config = load_config()?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(delay) = refresh_delay_ms {
        if delay < MIN_REFRESH_DELAY_MS {
            return Err(anyhow::anyhow!(
                "--refresh-delay-ms must be at least {}",
                MIN_REFRESH_DELAY_MS
            ));
        }
    }

    let preferences =
        Arc::new(SharedPreferences::load(PreferenceStore::new(&config.preferences_path)).await);
    let mut prefs = preferences.get().await;
    if let Some(delay) = refresh_delay_ms {
        prefs.auto_refresh = true;
        prefs.refresh_delay_ms = delay;
    }
    let query = prefs.query();

    let session = open_session(&config).await?;
    let mut app_state = AppState::new(Arc::clone(&session)).with_preferences(preferences);
    if let Some(handle) = prometheus {
        app_state = app_state.with_prometheus(handle);
    }

    match session.refresh(query.clone()).await {
        Ok(_) => app_state.set_ready(true),
        Err(e) => warn!("Initial refresh failed: {}. Serving until the next refresh", e),
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(app_state.clone());
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    app_state.apply_auto_refresh(&prefs).await;

    info!("========================================");
    info!("ARB DASHBOARD STARTED");
    if prefs.auto_refresh {
        info!("Auto-refresh every {}ms", prefs.refresh_delay().as_millis());
    } else {
        info!("Auto-refresh off");
    }
    info!("========================================");

    server.await??;

    app_state.stop_auto_refresh().await;
    session.teardown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Print the board, optionally refreshing until interrupted.
async fn cmd_watch(query: BoardQuery, once: bool) -> anyhow::Result<()> {
    let config = load_config()?;
    let session = open_session(&config).await?;
    let delay = Duration::from_millis(config.refresh_delay_ms);

    loop {
        match session.refresh(query.clone()).await {
            Ok(RefreshOutcome::Applied { changes, .. }) => {
                print_board(&session.view(&query).await);
                for change in &changes {
                    println!("  * {} {}", change.kind, change.id);
                }
            }
            Ok(RefreshOutcome::Stale { .. }) => {}
            Err(e) if once => return Err(e.into()),
            Err(e) => warn!("Refresh failed: {}", e),
        }

        if once {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_signal() => break,
        }
    }

    session.teardown().await;
    Ok(())
}

fn print_board(view: &BoardView) {
    println!("======================================================================");
    println!(
        "BOARD #{} ({}) - page {}/{}, {} matches, {} of {} slices failed",
        view.generation,
        view.mode,
        view.page.page,
        view.page.total_pages,
        view.page.total_items,
        view.failed_slices,
        view.attempted_slices,
    );
    println!("======================================================================");

    if view.page.items.is_empty() {
        println!("No opportunities");
    }
    for entry in &view.page.items {
        println!(
            "{:>6}%  {}  [{} {}]  {}",
            entry.profit_percentage.round_dp(2),
            entry.title,
            entry.date,
            entry.time,
            entry.duration.label,
        );
        println!("         {} - {}", entry.tournament, entry.complementary_set);
        for outcome in &entry.outcomes {
            println!(
                "         {:<24} {:>7} @ {}",
                outcome.label, outcome.odds, outcome.source
            );
        }
    }
}

/// Print one group, then follow it while detail auto-refresh is on.
async fn cmd_detail(group_id: String, follow: bool, mode: Option<Mode>) -> anyhow::Result<()> {
    let config = load_config()?;
    let prefs = PreferenceStore::new(&config.preferences_path).load().await;
    let mut query = prefs.query();
    if let Some(mode) = mode {
        query.mode = mode;
    }

    let session = open_session(&config).await?;
    session.refresh(query).await?;
    let detail = session.locate_group(&group_id).await;
    print_detail(&detail);

    if detail.is_available() && (follow || prefs.detail_auto_refresh) {
        let GroupRefresh {
            handle,
            mut updates,
        } = session.start_group_refresh(&group_id, prefs.detail_refresh_delay());
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let Some(detail) = updates.borrow_and_update().clone() else {
                        continue;
                    };
                    print_detail(&detail);
                    if !detail.is_available() {
                        break;
                    }
                }
                _ = shutdown_signal() => break,
            }
        }
        handle.stop();
    }

    session.teardown().await;
    Ok(())
}

fn print_detail(detail: &GroupDetail) {
    let view = match detail {
        GroupDetail::Available(view) => view,
        GroupDetail::NoLongerAvailable { group_id } => {
            println!("Group {} is no longer available", group_id);
            return;
        }
    };

    println!("======================================================================");
    println!(
        "{} vs {} - {} [{} {}]",
        view.group.home_team, view.group.away_team, view.tournament, view.group.date, view.group.time,
    );
    if !view.exact {
        println!("(now listed as {})", view.group.group_id);
    }
    println!("======================================================================");
    for opportunity in &view.opportunities {
        println!(
            "{:>6}%  {}  {}",
            opportunity.profit_percentage.round_dp(2),
            opportunity.complementary_set,
            opportunity.duration.label,
        );
        for outcome in &opportunity.outcomes {
            println!(
                "         {:<24} {:>7} @ {}",
                outcome.label, outcome.odds, outcome.source
            );
        }
    }
    for change in &view.changes {
        println!("  * {} {}", change.kind, change.id);
    }
}

/// Compute and print a stake split.
fn cmd_calc(
    legs: Vec<(String, Decimal)>,
    stake: Option<Decimal>,
    rounding: Option<u32>,
    fix: Option<(String, Decimal)>,
) -> anyhow::Result<()> {
    let odds = BestOdds::from_entries(legs.into_iter().map(|(key, odds)| (key, odds, "")));
    let opportunity = Opportunity::ad_hoc("cli", odds);

    let mut sheet = StakeSheet::default();
    if let Some(rounding) = rounding {
        sheet.set_rounding_preference(rounding)?;
    }
    if let Some(stake) = stake {
        sheet.set_total_stake(stake)?;
    }
    sheet.select(&opportunity)?;
    if let Some((key, stake)) = fix {
        sheet.fix_leg(&key, stake)?;
    }

    let view = sheet.view();
    let Some(calculation) = view.calculation else {
        return Err(anyhow::anyhow!("Nothing to calculate"));
    };

    println!("======================================================================");
    println!(
        "STAKE SPLIT ({} mode, rounding {})",
        view.mode, view.active_rounding
    );
    println!("======================================================================");
    for outcome in &calculation.outcomes {
        println!(
            "  {:<16} odds {:>7}  stake {:>10}  returns {:>10}  net {:>10}",
            outcome.description,
            outcome.odds,
            outcome.stake.round_dp(2),
            outcome.winnings.round_dp(2),
            outcome.net_result.round_dp(2),
        );
    }
    println!("----------------------------------------------------------------------");
    println!("  Total stake:         {}", calculation.total_stake.round_dp(2));
    println!("  Guaranteed profit:   {}", calculation.profit.round_dp(2));
    println!("  Profit percentage:   {}%", calculation.profit_percentage.round_dp(2));
    println!(
        "  Implied probability: {}",
        calculation.implied_probability.round_dp(4)
    );
    if !calculation.is_arbitrage() {
        println!("  WARNING: these odds do not form an arbitrage");
    }
    println!("======================================================================");
    Ok(())
}

/// Print the discovery contract.
async fn cmd_countries() -> anyhow::Result<()> {
    let config = load_config()?;
    let source = build_source(&config)?;
    let countries = source.discover().await?;
    println!("{}", serde_json::to_string_pretty(&countries)?);
    Ok(())
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("ARB DASHBOARD - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    print!("Discovering feed structure... ");
    let source = build_source(&config)?;
    match source.discover().await {
        Ok(countries) if countries.is_empty() => {
            println!("EMPTY");
            println!("  WARNING: no sports found; the board will stay empty");
        }
        Ok(countries) => {
            println!("OK");
            println!("  Sports: {}", countries.sports().join(", "));
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Feed discovery failed"));
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    match &config.feed_url {
        Some(url) => println!("  Feed: remote ({})", url),
        None => println!("  Feed: local ({})", config.data_dir.display()),
    }
    if let Some(path) = &config.labels_path {
        println!("  Labels: {}", path.display());
    }
    println!("  Preferences: {}", config.preferences_path.display());
    println!("  Watch Refresh Delay: {}ms", config.refresh_delay_ms);
    println!("  HTTP Timeout: {}ms", config.http_timeout_ms);
    println!("  Port: {}", config.port);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}
