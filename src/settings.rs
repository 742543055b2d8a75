use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::signal::{CuePreferences, Permission};
use crate::timer::{AppKind, PhasePlan};

pub const MIN_TICK_MS: u64 = 150;
pub const MAX_TICK_MS: u64 = 250;
const DEFAULT_TICK_MS: u64 = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
struct UserSettings {
    /// Last known good plan per utility, keyed by `AppKind::settings_key`.
    plans: BTreeMap<String, PhasePlan>,
    cues: CuePreferences,
    /// Last answer to the notification prompt, carried across runs.
    notification_permission: Permission,
    tick_interval_ms: u64,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            plans: BTreeMap::new(),
            cues: CuePreferences::default(),
            notification_permission: Permission::Default,
            tick_interval_ms: DEFAULT_TICK_MS,
        }
    }
}

/// `settings.json` in the data directory. Unreadable content falls back to
/// defaults; the file is rewritten on the next update.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The stored plan re-validated against the utility's rules, or the
    /// preset defaults when nothing was stored.
    pub fn plan(&self, app: AppKind) -> PhasePlan {
        match self.read().plans.get(app.settings_key()) {
            Some(stored) => app.plan_from_raw(&Value::Null, None, Some(stored)),
            None => app.default_plan(),
        }
    }

    /// Validates raw user input against the last known good plan. Nothing is
    /// stored until the plan has actually started; see `remember_plan`.
    pub fn resolve_plan_input(
        &self,
        app: AppKind,
        raw_phases: &Value,
        raw_cycles: Option<&Value>,
    ) -> PhasePlan {
        let last_good = self.plan(app);
        app.plan_from_raw(raw_phases, raw_cycles, Some(&last_good))
    }

    /// Records a plan that started successfully as the new last known good.
    pub fn remember_plan(&self, app: AppKind, plan: &PhasePlan) -> Result<()> {
        let mut guard = self.write();
        guard.plans.insert(app.settings_key().to_string(), plan.clone());
        self.persist(&guard)
    }

    pub fn cues(&self) -> CuePreferences {
        self.read().cues
    }

    pub fn notification_permission(&self) -> Permission {
        self.read().notification_permission
    }

    /// Writes only when the answer changed.
    pub fn remember_notification_permission(&self, permission: Permission) -> Result<()> {
        let mut guard = self.write();
        if guard.notification_permission == permission {
            return Ok(());
        }
        guard.notification_permission = permission;
        self.persist(&guard)
    }

    pub fn update_cues(&self, cues: CuePreferences) -> Result<()> {
        let mut guard = self.write();
        guard.cues = cues;
        self.persist(&guard)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(clamp_tick_ms(self.read().tick_interval_ms))
    }

    pub fn update_tick_interval_ms(&self, tick_ms: u64) -> Result<()> {
        let mut guard = self.write();
        guard.tick_interval_ms = clamp_tick_ms(tick_ms);
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

pub fn clamp_tick_ms(tick_ms: u64) -> u64 {
    tick_ms.clamp(MIN_TICK_MS, MAX_TICK_MS)
}
