pub mod cli;
pub mod clock;
pub mod db;
pub mod host;
pub mod models;
pub mod power;
pub mod settings;
pub mod signal;
pub mod timer;
pub mod utils;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;

use cli::{resolve_data_dir, Cli, Command, StartPreset};
use clock::SystemClock;
use db::Database;
use power::PowerCoordinator;
use settings::SettingsStore;
use signal::{CompletionSignaler, CuePreferences, InhibitWakeLock};
use timer::{AppKind, SessionStatus, SessionStore, TimerController};

const DB_FILE: &str = "cadence.sqlite3";
const SETTINGS_FILE: &str = "settings.json";

struct AppState {
    db: Database,
    settings: SettingsStore,
}

impl AppState {
    fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
        let db = Database::new(data_dir.join(DB_FILE))?;
        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
        Ok(Self { db, settings })
    }

    fn controller(&self, app: AppKind) -> TimerController {
        TimerController::new(
            self.settings.plan(app),
            SessionStore::new(self.db.clone(), app),
            CompletionSignaler::for_terminal(
                app,
                self.settings.cues(),
                self.settings.notification_permission(),
            ),
            PowerCoordinator::new(Box::new(InhibitWakeLock::new())),
            Arc::new(SystemClock),
            self.settings.tick_interval(),
        )
    }

    /// Replaces whatever was persisted with a fresh session. The plan and the
    /// notification answer are only remembered once the start succeeded.
    async fn start(&self, preset: &StartPreset) -> Result<TimerController> {
        let app = preset.app();
        let (phases, cycles) = preset.raw_input();
        let plan = self.settings.resolve_plan_input(app, &phases, cycles.as_ref());

        let controller = self.controller(app);
        controller.restore().await;
        controller.reset().await;
        if let Err(err) = controller.start_session(plan.clone()).await {
            controller.shutdown().await;
            return Err(err.into());
        }

        self.settings.remember_plan(app, &plan)?;
        self.settings
            .remember_notification_permission(controller.notification_permission().await)?;
        Ok(controller)
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    utils::init_logging(cli.verbose);

    log::debug!("cadence starting up");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(execute(cli))
}

async fn execute(cli: Cli) -> Result<()> {
    let data_dir = resolve_data_dir(cli.data_dir)?;
    let state = AppState::open(&data_dir)?;
    if let Some(tick_ms) = cli.tick_ms {
        state.settings.update_tick_interval_ms(tick_ms)?;
    }

    match cli.command {
        Command::Start { preset } => {
            let controller = state.start(&preset).await?;
            host::run_interactive(controller).await
        }
        Command::Resume { app } => {
            let controller = state.controller(app);
            let view = controller.restore().await;
            if !matches!(view.status, SessionStatus::Running | SessionStatus::Paused) {
                println!("{}", host::format_view(&view));
                controller.shutdown().await;
                return Ok(());
            }
            host::run_interactive(controller).await
        }
        Command::Status { app } => {
            let controller = state.controller(app);
            let view = controller.restore().await;
            controller.shutdown().await;
            println!("{}", host::format_view(&view));
            Ok(())
        }
        Command::Reset { app } => {
            let controller = state.controller(app);
            controller.restore().await;
            let view = controller.reset().await;
            println!("{}", host::format_view(&view));
            Ok(())
        }
        Command::Cues {
            sound,
            vibration,
            notifications,
        } => {
            let current = state.settings.cues();
            let cues = CuePreferences {
                sound: sound.unwrap_or(current.sound),
                vibration: vibration.unwrap_or(current.vibration),
                notifications: notifications.unwrap_or(current.notifications),
            };
            if cues != current {
                state.settings.update_cues(cues)?;
            }
            println!("{}", host::format_cues(&cues));
            Ok(())
        }
        Command::History { limit } => {
            let sessions = state.db.list_completed_sessions(limit).await?;
            if sessions.is_empty() {
                println!("No completed sessions yet.");
            }
            for session in &sessions {
                println!("{}", host::format_history_row(session));
            }
            Ok(())
        }
    }
}
