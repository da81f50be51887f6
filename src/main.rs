use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use fastrack_lib::{
    fasting::{whole_hours, MILLIS_PER_HOUR},
    init_logging,
    notifications::LogNotifier,
    settings::{UserSettings, WidgetUpdateFrequency},
    timer::SystemClock,
    widget::{LogSurface, TapOutcome, WidgetAction},
    AppConfig, CompletedFast, FastingApp, TimerSnapshot,
};

#[derive(Parser)]
#[command(name = "fastrack", version, about = "Intermittent fasting timer")]
struct Cli {
    /// Directory holding the timer database and settings
    #[arg(long, env = "FASTRACK_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "FASTRACK_DEBUG", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current fast
    Status,
    /// Start a fast
    Start,
    /// Pause the running fast
    Stop,
    /// Start or pause
    Toggle,
    /// End the fast and zero the timer
    Reset {
        /// Do not keep the session in the history
        #[arg(long)]
        discard: bool,
    },
    /// Move the start time; positive minutes move it earlier
    Adjust {
        #[arg(long, allow_hyphen_values = true)]
        minutes: i64,
    },
    /// Completed fasts
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Deliver a widget tap, as a home-screen surface would
    WidgetTap {
        /// toggle, reset-confirmed, adjust-time or refresh
        action: WidgetAction,
        /// Adjustment to apply after adjust-time
        #[arg(long, allow_hyphen_values = true)]
        minutes: Option<i64>,
    },
    /// User preferences
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Keep ticking in the foreground with a log-backed widget until Ctrl-C
    Run,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List fasts, most recent first
    List,
    /// Set or clear the note on a fast
    Note { id: String, text: Option<String> },
    /// Delete one fast
    Delete { id: String },
    /// Delete every fast
    Clear,
    /// Aggregate statistics
    Summary,
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    /// How often widgets refresh
    Frequency { value: FrequencyArg },
    /// Turn state-change notifications on or off
    Notifications {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FrequencyArg {
    High,
    Normal,
    BatterySaver,
}

impl From<FrequencyArg> for WidgetUpdateFrequency {
    fn from(value: FrequencyArg) -> Self {
        match value {
            FrequencyArg::High => WidgetUpdateFrequency::High,
            FrequencyArg::Normal => WidgetUpdateFrequency::Normal,
            FrequencyArg::BatterySaver => WidgetUpdateFrequency::BatterySaver,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = AppConfig::new(cli.data_dir, cli.verbose);
    init_logging(config.log_level());

    if let Err(e) = run(config, cli.command).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig, command: Commands) -> Result<()> {
    let app = FastingApp::open(config, Arc::new(SystemClock), Arc::new(LogNotifier)).await?;
    let result = dispatch(&app, command).await;
    app.shutdown().await;
    result
}

async fn dispatch(app: &FastingApp, command: Commands) -> Result<()> {
    let settings = app.settings().get();
    let timer = app.timer();

    match command {
        Commands::Status => print_status(&timer.snapshot().await, &settings),
        Commands::Start => {
            if !timer.start().await {
                println!("A fast is already running.");
            }
            print_status(&timer.snapshot().await, &settings);
        }
        Commands::Stop => {
            if !timer.stop().await {
                println!("No fast is running.");
            }
            print_status(&timer.snapshot().await, &settings);
        }
        Commands::Toggle => {
            timer.toggle().await;
            print_status(&timer.snapshot().await, &settings);
        }
        Commands::Reset { discard } => {
            let completed = if discard {
                timer.reset().await
            } else {
                app.complete_fast().await?
            };
            match completed {
                Some(fast) => {
                    let verb = if discard { "Discarded" } else { "Saved" };
                    println!("{verb} fast:");
                    print_fast(&fast, &settings);
                }
                None => println!("Nothing to reset."),
            }
        }
        Commands::Adjust { minutes } => {
            timer.adjust_start_time(minutes_to_millis(minutes)?).await?;
            print_status(&timer.snapshot().await, &settings);
        }
        Commands::History { action } => history(app, action, &settings).await?,
        Commands::WidgetTap { action, minutes } => {
            let widgets = app.widgets();
            match (widgets.handle_action(action).await, minutes) {
                (TapOutcome::AdjustmentRequested, Some(minutes)) => {
                    match widgets.apply_adjustment(minutes_to_millis(minutes)?).await {
                        TapOutcome::AdjustRejected(rejection) => bail!(rejection),
                        outcome => println!("{outcome:?}"),
                    }
                }
                (TapOutcome::AdjustmentRequested, None) => {
                    bail!("adjust-time needs --minutes")
                }
                (outcome, _) => println!("{outcome:?}"),
            }
            print_status(&timer.snapshot().await, &settings);
        }
        Commands::Settings { action } => {
            let store = app.settings();
            let updated = match action {
                SettingsAction::Show => store.get(),
                SettingsAction::Frequency { value } => {
                    store.update(|s| s.widget_update_frequency = value.into())?
                }
                SettingsAction::Notifications { enabled } => {
                    store.update(|s| s.notifications_enabled = enabled)?
                }
            };
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
        Commands::Run => run_foreground(app).await?,
    }
    Ok(())
}

async fn history(app: &FastingApp, action: HistoryAction, settings: &UserSettings) -> Result<()> {
    let store = app.history();
    match action {
        HistoryAction::List => {
            let fasts = store.all_by_end_desc().await?;
            if fasts.is_empty() {
                println!("No completed fasts.");
            }
            for fast in &fasts {
                print_fast(fast, settings);
            }
        }
        HistoryAction::Note { id, text } => {
            if !store.update_note(&id, text).await? {
                bail!("no fast with id {id}");
            }
        }
        HistoryAction::Delete { id } => store.delete(&id).await?,
        HistoryAction::Clear => store.delete_all().await?,
        HistoryAction::Summary => {
            let summary = store.summary().await?;
            println!("Fasts:    {}", summary.total_fasts);
            println!("Total:    {}", format_duration(summary.total_duration_ms));
            println!("Longest:  {}", format_duration(summary.longest_duration_ms));
            println!("Average:  {}", format_duration(summary.average_duration_ms));
            println!("Deepest:  {}", summary.deepest_state);
        }
    }
    Ok(())
}

async fn run_foreground(app: &FastingApp) -> Result<()> {
    app.on_foreground().await;
    app.widgets().add_surface(Arc::new(LogSurface::new(1))).await;
    info!("Running; press Ctrl-C to exit");

    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    app.widgets().remove_surface(1).await;
    app.on_background().await;
    Ok(())
}

fn print_status(snapshot: &TimerSnapshot, settings: &UserSettings) {
    let running = if snapshot.is_running { "running" } else { "stopped" };
    println!(
        "{} ({running}), {} elapsed, peak {}",
        snapshot.current_state,
        format_duration(snapshot.elapsed_ms),
        snapshot.max_state
    );
    if snapshot.is_running {
        println!(
            "Started {}",
            settings.format_timestamp(snapshot.start_time_ms)
        );
        if let Some(hours) = snapshot.hours_until_next() {
            println!("Next state in {hours}h");
        }
    }
}

fn print_fast(fast: &CompletedFast, settings: &UserSettings) {
    println!(
        "{}  {} -> {}  {}  {}{}",
        fast.id,
        settings.format_timestamp(fast.start_time),
        settings.format_timestamp(fast.end_time),
        format_duration(fast.duration),
        fast.max_fasting_state,
        fast.note
            .as_deref()
            .map(|note| format!("  \"{note}\""))
            .unwrap_or_default()
    );
}

fn minutes_to_millis(minutes: i64) -> Result<i64> {
    match minutes.checked_mul(60_000) {
        Some(ms) => Ok(ms),
        None => bail!("{minutes} minutes is out of range"),
    }
}

fn format_duration(ms: i64) -> String {
    let hours = whole_hours(ms);
    let minutes = (ms - hours * MILLIS_PER_HOUR) / 60_000;
    format!("{hours}h {minutes:02}m")
}
