//! Funding Fee Sniper - Main Entry Point
//!
//! Paper trading by default; set `LIVE_TRADING=true` to place real orders.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use funding_fee_sniper::config::Config;
use funding_fee_sniper::exchange::{
    BybitClient, MockExchange, PaperExchange, RateSource, RequestThrottle, Throttled,
};
use funding_fee_sniper::monitor::{cancel_on_shutdown_signals, MonitorLoop, Reporter};
use funding_fee_sniper::notify::{LogNotifier, Notifier, TelegramNotifier};
use funding_fee_sniper::persistence::{read_status, JsonFilePublisher, TradeJournal};
use funding_fee_sniper::utils::to_percent;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Funding Fee Sniper CLI
#[derive(Parser)]
#[command(name = "funding-fee-sniper")]
#[command(version, about = "Funding payment capture on Bybit linear perpetuals")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor loop (default)
    Run,

    /// Show the persisted bot status and closed-trade summary
    Status {
        /// Path to the status file written by the monitor loop
        #[arg(short, long, default_value = "bot_status.json")]
        status_file: String,

        /// Path to the SQLite trade journal
        #[arg(short, long, default_value = "data/trades.db")]
        journal: String,

        /// Show open positions and recent trades
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Trading mode: Live (real money) or Paper (simulated fills on live prices).
#[derive(Debug, Clone, Copy, PartialEq)]
enum TradingMode {
    Live,
    Paper,
}

impl TradingMode {
    fn from_env() -> Self {
        if std::env::var("LIVE_TRADING").unwrap_or_default() == "true" {
            TradingMode::Live
        } else {
            TradingMode::Paper
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TradingMode::Live => "live",
            TradingMode::Paper => "paper",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Status {
            status_file,
            journal,
            verbose,
        }) => show_status(&status_file, &journal, verbose),
        Some(Commands::Run) | None => {
            init_logging()?;
            run().await
        }
    }
}

async fn run() -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║          Funding Fee Sniper v{} - Bybit Perpetuals        ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let trading_mode = TradingMode::from_env();
    match trading_mode {
        TradingMode::Live => warn!("⚠️  LIVE TRADING MODE - Real money at risk!"),
        TradingMode::Paper => info!("📝 PAPER TRADING MODE - Simulated fills on live prices"),
    }

    let config = Config::load()?;
    if trading_mode == TradingMode::Live {
        if let Err(e) = config.require_credentials() {
            error!("❌ {}", e);
            return Err(e.into());
        }
    }
    log_config(&config);

    let client = BybitClient::new(&config.bybit)?;
    if config.bybit.api_key.is_empty() {
        info!("⚠️  No API keys provided. Market data only.");
    }

    let throttle = Arc::new(RequestThrottle::new(config.monitor.min_request_interval()));
    let timeout = config.monitor.request_timeout();

    let mut paper = None;
    let source: Arc<dyn RateSource> = match trading_mode {
        TradingMode::Live => Arc::new(Throttled::new(client, throttle, timeout)),
        TradingMode::Paper => {
            let exchange = Arc::new(Throttled::new(
                PaperExchange::new(client, MockExchange::new(dec!(10000))),
                throttle,
                timeout,
            ));
            paper = Some(exchange.clone());
            exchange
        }
    };

    let notifier: Arc<dyn Notifier> = if config.telegram.is_enabled() {
        info!("📨 Telegram notifications enabled");
        Arc::new(TelegramNotifier::new(&config.telegram)?)
    } else {
        info!("📨 Telegram not configured, notifications go to the log");
        Arc::new(LogNotifier)
    };

    let publisher = Arc::new(JsonFilePublisher::new(
        &config.output.status_path,
        &config.output.schedule_path,
    ));

    let mut reporter = Reporter::new(notifier, publisher, config.strategy.clone(), Utc::now());
    match TradeJournal::open(&config.output.journal_path) {
        Ok(journal) => reporter = reporter.with_journal(journal),
        Err(e) => warn!(error = %e, "⚠️  Trade journal unavailable, closed trades will not be recorded"),
    }

    let mut monitor = MonitorLoop::new(source, &config.strategy, config.monitor.clone(), reporter);

    cancel_on_shutdown_signals(&monitor.cancellation_token())?;

    let emergency = monitor.run(trading_mode.label()).await;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("🏁 Final Statistics:");
    let stats = monitor.ledger().statistics();
    info!("   Cycles:           {}", monitor.cycles());
    info!("   Total Trades:     {}", stats.total_trades);
    info!(
        "   Successful:       {} ({:.1}%)",
        stats.successful_trades,
        stats.success_rate()
    );
    info!("   Total PnL:        ${:.4}", stats.total_pnl);
    info!(
        "   Emergency Close:  {} closed, {} failed",
        emergency.succeeded, emergency.failed
    );
    if let Some(exchange) = paper {
        let state = exchange.inner().broker().get_state().await;
        info!("   Paper Balance:    ${:.2}", state.balance);
        info!("   Funding Received: ${:.4}", state.total_funding_received);
        info!("   Trading Fees:     ${:.4}", state.total_trading_fees);
        info!("   Orders:           {}", state.order_count);
    }

    info!("👋 Funding Fee Sniper shutdown complete");
    Ok(())
}

/// Initialize logging to stdout and an hourly-rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "funding-sniper.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("funding_fee_sniper=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let strategy = &config.strategy;
    info!("📋 Configuration:");
    info!(
        "   Min Funding Rate: {:.4}%",
        to_percent(strategy.min_abs_rate)
    );
    info!("   Trade Size: ${}", strategy.trade_notional);
    info!(
        "   Entry Window: {}s before funding",
        strategy.entry_window_secs
    );
    info!(
        "   Exit: {}s after funding",
        strategy.hold_after_funding_secs
    );
    info!(
        "   Selection: {} top {}",
        strategy.selection_mode, strategy.top_n
    );
    info!(
        "   Poll Interval: {}s (backoff {}s)",
        config.monitor.poll_interval_secs, config.monitor.error_backoff_secs
    );
    info!(
        "   Min Request Interval: {}ms",
        config.monitor.min_request_interval_ms
    );
    info!("   Testnet: {}", config.bybit.testnet);
}

/// Print the persisted status and journal summary.
fn show_status(status_path: &str, journal_path: &str, verbose: bool) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              FUNDING SNIPER STATUS                         ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(status_path).exists() {
        println!("\n❌ Status file not found: {}", status_path);
        println!("   The sniper has not been started yet, or the path is incorrect.");
        return Ok(());
    }

    let status = read_status(status_path)?;
    let uptime = status.timestamp - status.trading_bot.start_time;

    println!("\n🤖 Bot");
    println!(
        "   ├─ Running:          {}",
        if status.trading_bot.running { "yes" } else { "no" }
    );
    println!(
        "   ├─ Started:          {}",
        status.trading_bot.start_time.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("   ├─ Uptime:           {}h {}m", uptime.num_hours(), uptime.num_minutes() % 60);
    println!(
        "   └─ Last Updated:     {}",
        status.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );

    println!("\n💰 Account");
    println!("   └─ Balance:          ${:.2}", status.balance);

    println!("\n📈 Statistics");
    println!("   ├─ Total Trades:     {}", status.statistics.total_trades);
    println!(
        "   ├─ Successful:       {} ({:.1}%)",
        status.statistics.successful_trades, status.statistics.success_rate
    );
    println!("   ├─ Total PnL:        ${:.4}", status.statistics.total_pnl);
    println!("   └─ Open Positions:   {}", status.active_trades.len());

    if verbose && !status.active_trades.is_empty() {
        println!("\n🔓 Open Positions");
        for trade in &status.active_trades {
            println!("   ┌─ {} ({:?})", trade.symbol, trade.side);
            println!("   ├─ Size:             {} @ ${}", trade.size, trade.entry_price);
            println!("   ├─ Funding Rate:     {:.4}%", trade.funding_rate * 100.0);
            println!("   ├─ Expected Funding: ${:.6}", trade.expected_funding_profit);
            println!(
                "   └─ Payout:           {}",
                trade.funding_time.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    if !Path::new(journal_path).exists() {
        return Ok(());
    }

    let journal = TradeJournal::open(journal_path)?;
    let summary = journal.summary()?;
    println!("\n📒 Journal");
    println!("   ├─ Trades:           {}", summary.trades);
    println!("   ├─ Winners:          {}", summary.winners);
    println!("   ├─ Funding PnL:      ${:.4}", summary.funding_pnl);
    println!("   ├─ Total PnL:        ${:.4}", summary.total_pnl);
    if let (Some(best), Some(worst)) = (summary.best, summary.worst) {
        println!("   ├─ Best Trade:       ${:.4}", best);
        println!("   └─ Worst Trade:      ${:.4}", worst);
    } else {
        println!("   └─ No closed trades yet");
    }

    if verbose {
        let recent = journal.recent(10)?;
        if !recent.is_empty() {
            println!("\n🧾 Recent Trades");
            for entry in &recent {
                println!(
                    "   ├─ {} {} {} -> {}: ${:.4} (funding ${:.4}) at {}",
                    entry.exit_time.format("%Y-%m-%d %H:%M"),
                    entry.side,
                    entry.symbol,
                    entry.exit_price,
                    entry.total_pnl,
                    entry.funding_pnl,
                    entry.entry_time.format("%H:%M:%S"),
                );
            }
        }
    }

    Ok(())
}
