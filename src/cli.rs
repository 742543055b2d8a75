use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use crate::timer::{AppKind, BreathingTechnique};

pub const DATA_DIR_ENV: &str = "CADENCE_DATA_DIR";

#[derive(Parser, Debug)]
#[command(name = "cadence", version, about = "Drift-free phase timers: countdown, intervals, pomodoro and breathing")]
pub struct Cli {
    /// Where the database and settings live. Falls back to $CADENCE_DATA_DIR,
    /// then the platform data directory.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Tick period in milliseconds (clamped to 150-250). Saved as the new default.
    #[arg(long, global = true)]
    pub tick_ms: Option<u64>,

    /// Debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new session, replacing whatever was persisted.
    Start {
        #[command(subcommand)]
        preset: StartPreset,
    },
    /// Pick up the persisted session and keep it running.
    Resume { app: AppKind },
    /// Print the persisted session, caught up to now.
    Status { app: AppKind },
    /// Clear the persisted session.
    Reset { app: AppKind },
    /// Show or change which cues fire. Omitted flags keep their value.
    Cues {
        #[arg(long)]
        sound: Option<bool>,
        #[arg(long)]
        vibration: Option<bool>,
        #[arg(long)]
        notifications: Option<bool>,
    },
    /// List completed sessions, newest first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

/// Per-utility durations. Values are taken as typed and validated later, so
/// out-of-range numbers are clamped and garbage falls back to the last
/// accepted value.
#[derive(Subcommand, Debug)]
pub enum StartPreset {
    Countdown {
        /// Length in seconds.
        #[arg(long)]
        seconds: Option<String>,
    },
    Interval {
        /// Work interval in seconds.
        #[arg(long)]
        work: Option<String>,
        /// Rest interval in seconds.
        #[arg(long)]
        rest: Option<String>,
        #[arg(long)]
        rounds: Option<String>,
    },
    Pomodoro {
        /// Focus block in seconds.
        #[arg(long)]
        work: Option<String>,
        /// Break in seconds.
        #[arg(long = "break")]
        break_seconds: Option<String>,
        #[arg(long)]
        cycles: Option<String>,
    },
    Breathing {
        /// Starting pattern; individual phase flags override it.
        #[arg(long, value_enum)]
        technique: Option<BreathingTechnique>,
        #[arg(long)]
        inhale: Option<String>,
        #[arg(long)]
        hold_in: Option<String>,
        #[arg(long)]
        exhale: Option<String>,
        #[arg(long)]
        hold_out: Option<String>,
        #[arg(long)]
        cycles: Option<String>,
    },
}

impl StartPreset {
    pub fn app(&self) -> AppKind {
        match self {
            StartPreset::Countdown { .. } => AppKind::Countdown,
            StartPreset::Interval { .. } => AppKind::Interval,
            StartPreset::Pomodoro { .. } => AppKind::Pomodoro,
            StartPreset::Breathing { .. } => AppKind::Breathing,
        }
    }

    /// Raw phase object keyed by phase key, plus the raw cycle count.
    pub fn raw_input(&self) -> (Value, Option<Value>) {
        let mut phases = Map::new();
        let cycles = match self {
            StartPreset::Countdown { seconds } => {
                insert(&mut phases, "countdown", seconds);
                None
            }
            StartPreset::Interval { work, rest, rounds } => {
                insert(&mut phases, "work", work);
                insert(&mut phases, "rest", rest);
                rounds.clone()
            }
            StartPreset::Pomodoro {
                work,
                break_seconds,
                cycles,
            } => {
                insert(&mut phases, "work", work);
                insert(&mut phases, "break", break_seconds);
                cycles.clone()
            }
            StartPreset::Breathing {
                technique,
                inhale,
                hold_in,
                exhale,
                hold_out,
                cycles,
            } => {
                if let Some(Value::Object(base)) = (*technique).map(BreathingTechnique::raw_phases) {
                    phases.extend(base);
                }
                insert(&mut phases, "inhale", inhale);
                insert(&mut phases, "holdIn", hold_in);
                insert(&mut phases, "exhale", exhale);
                insert(&mut phases, "holdOut", hold_out);
                cycles.clone()
            }
        };

        (Value::Object(phases), cycles.map(Value::String))
    }
}

fn insert(phases: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        phases.insert(key.to_string(), Value::String(value.clone()));
    }
}

/// `--data-dir`, then `$CADENCE_DATA_DIR`, then `<platform data dir>/cadence`.
pub fn resolve_data_dir(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("cadence"))
        .ok_or_else(|| anyhow!("no platform data directory; pass --data-dir"))
}
