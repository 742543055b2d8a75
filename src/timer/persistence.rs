//! Durable snapshots of a session, one per utility namespace.
//!
//! The store decides *when* to write; the machine decides *what* the state
//! is. Storage failures are logged and swallowed so the in-memory session
//! keeps running; the next successful write brings durable state back in sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::EpochMs;
use crate::db::Database;
use crate::models::CompletedSession;

use super::phase::PhasePlan;
use super::presets::AppKind;
use super::state::{SessionMachine, SessionState, SessionStatus};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Minimum spacing between writes caused by ordinary running ticks.
const TICK_WRITE_INTERVAL_MS: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveReason {
    /// Status change or user action: always written.
    Transition,
    /// Periodic running tick: throttled.
    Tick,
    /// Host is going away or into the background: always written.
    Hidden,
}

/// What lands in storage: the plan that produced the state, plus the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSnapshot {
    pub version: u32,
    pub app: Option<AppKind>,
    pub saved_at: EpochMs,
    pub plan: PhasePlan,
    pub state: SessionState,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            app: None,
            saved_at: 0,
            plan: PhasePlan::default(),
            state: SessionState::default(),
        }
    }
}

impl SessionSnapshot {
    pub fn capture(app: AppKind, machine: &SessionMachine, now: EpochMs) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            app: Some(app),
            saved_at: now,
            plan: machine.plan().clone(),
            state: machine.state().clone(),
        }
    }

    /// Structural and range checks against `app`'s preset. A snapshot that
    /// fails them is treated as missing.
    pub fn validate(&self, app: AppKind) -> Result<(), String> {
        if let Some(saved) = self.app {
            if saved != app {
                return Err(format!("snapshot belongs to {}", saved.label()));
            }
        }
        self.validate_plan(app)?;

        let state = &self.state;
        if !state.is_active() {
            return Ok(());
        }

        if self.plan.active_phase_count() == 0 {
            return Err("plan has no phase with a positive duration".into());
        }
        if state.current_cycle == 0 || state.current_cycle > self.plan.cycle_count {
            return Err(format!(
                "cycle {} outside 1..={}",
                state.current_cycle, self.plan.cycle_count
            ));
        }
        match state.current_phase_index.and_then(|index| self.plan.phase(index)) {
            Some(phase) if phase.is_active() => {}
            Some(phase) => return Err(format!("current phase '{}' has no duration", phase.key)),
            None => return Err("phase index out of range".into()),
        }

        match state.status {
            SessionStatus::Running => match (state.phase_deadline, state.session_deadline) {
                (Some(phase), Some(session)) if phase <= session => Ok(()),
                (Some(_), Some(_)) => Err("phase deadline lies beyond the session deadline".into()),
                _ => Err("running snapshot is missing its deadlines".into()),
            },
            SessionStatus::Paused if state.phase_remaining_ms > state.session_remaining_ms => {
                Err("phase remainder exceeds the session remainder".into())
            }
            _ => Ok(()),
        }
    }

    /// Cycle count and every phase must sit inside the preset's bounds.
    /// Countdowns may run long because extra time grows the phase.
    fn validate_plan(&self, app: AppKind) -> Result<(), String> {
        let cycles = app.cycle_rule();
        if !(cycles.min..=cycles.max).contains(&self.plan.cycle_count) {
            return Err(format!(
                "cycle count {} outside {}..={}",
                self.plan.cycle_count, cycles.min, cycles.max
            ));
        }

        let rules = app.rules();
        if self.plan.phases.len() > rules.len() {
            return Err(format!("{} phases, at most {} expected", self.plan.phases.len(), rules.len()));
        }
        for phase in &self.plan.phases {
            let Some(rule) = rules.iter().find(|rule| rule.key == phase.key) else {
                return Err(format!("unknown phase '{}'", phase.key));
            };
            let max = if app == AppKind::Countdown {
                u32::MAX
            } else {
                rule.max_seconds
            };
            if phase.duration_seconds > max {
                return Err(format!(
                    "phase '{}' lasts {}s, limit {}s",
                    phase.key, phase.duration_seconds, max
                ));
            }
            if phase.is_active() && phase.duration_seconds < rule.min_seconds {
                return Err(format!(
                    "phase '{}' lasts {}s, minimum {}s",
                    phase.key, phase.duration_seconds, rule.min_seconds
                ));
            }
        }
        Ok(())
    }

    /// Running, but the session should have ended more than one full session
    /// length ago. Still restorable: the catch-up tick replays it.
    pub fn is_stale(&self, now: EpochMs) -> bool {
        match (self.state.status, self.state.session_deadline) {
            (SessionStatus::Running, Some(deadline)) => {
                now.saturating_sub(deadline) > self.plan.total_session_ms()
            }
            _ => false,
        }
    }

    pub fn into_machine(self) -> SessionMachine {
        SessionMachine::from_parts(self.plan, self.state)
    }
}

pub struct SessionStore {
    db: Database,
    app: AppKind,
    last_write: Option<EpochMs>,
}

impl SessionStore {
    pub fn new(db: Database, app: AppKind) -> Self {
        Self {
            db,
            app,
            last_write: None,
        }
    }

    pub fn app(&self) -> AppKind {
        self.app
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Writes a snapshot unless `reason` is a tick inside the throttle window.
    /// Returns whether a write actually happened.
    pub async fn save(&mut self, machine: &SessionMachine, now: EpochMs, reason: SaveReason) -> bool {
        if reason == SaveReason::Tick {
            if let Some(last) = self.last_write {
                if now.saturating_sub(last) < TICK_WRITE_INTERVAL_MS {
                    return false;
                }
            }
        }

        let snapshot = SessionSnapshot::capture(self.app, machine, now);
        let payload = match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(err) => {
                log_warn!("Failed to serialize {} snapshot: {err}", self.app.label());
                return false;
            }
        };
        let updated_at = DateTime::from_timestamp_millis(now).unwrap_or_else(Utc::now);

        match self
            .db
            .put_snapshot(self.app.namespace(), payload, updated_at)
            .await
        {
            Ok(()) => {
                self.last_write = Some(now);
                log_debug!(
                    "Persisted {} snapshot ({:?}, {})",
                    self.app.label(),
                    reason,
                    machine.status().as_str()
                );
                true
            }
            Err(err) => {
                log_warn!("Persistence unavailable for {}: {err:#}", self.app.label());
                false
            }
        }
    }

    /// Last snapshot for this utility, or `None` when there is nothing usable.
    pub async fn load(&self, now: EpochMs) -> Option<SessionSnapshot> {
        let payload = match self.db.get_snapshot(self.app.namespace()).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(err) => {
                log_warn!("Failed to read {} snapshot: {err:#}", self.app.label());
                return None;
            }
        };

        let snapshot: SessionSnapshot = match serde_json::from_str(&payload) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log_warn!("Discarding malformed {} snapshot: {err}", self.app.label());
                return None;
            }
        };

        if let Err(reason) = snapshot.validate(self.app) {
            log_warn!("Discarding invalid {} snapshot: {reason}", self.app.label());
            return None;
        }

        if snapshot.is_stale(now) {
            log_info!(
                "{} snapshot deadline passed long ago; replaying missed phases",
                self.app.label()
            );
        }

        Some(snapshot)
    }

    /// Appends a finished session to history. Best effort.
    pub async fn record_completion(&self, machine: &SessionMachine, completed_at: EpochMs) {
        let state = machine.state();
        let (Some(id), Some(started_at)) = (state.session_id.clone(), state.started_at) else {
            return;
        };
        let completed_at = DateTime::from_timestamp_millis(completed_at).unwrap_or_else(Utc::now);

        let record = CompletedSession {
            id,
            app: self.app,
            started_at,
            completed_at,
            planned_ms: machine.plan().total_session_seconds().saturating_mul(1000),
            cycle_count: machine.plan().cycle_count,
            created_at: Utc::now(),
        };

        if let Err(err) = self.db.insert_completed_session(&record).await {
            log_warn!("Failed to record completed session {}: {err:#}", record.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::phase::PhaseSpec;
    use crate::timer::state::TickMode;

    const T0: EpochMs = 1_700_000_000_000;

    fn interval_plan() -> PhasePlan {
        PhasePlan::new(
            vec![PhaseSpec::new("work", 30), PhaseSpec::new("rest", 10)],
            3,
        )
    }

    fn store() -> SessionStore {
        SessionStore::new(Database::in_memory().expect("db"), AppKind::Interval)
    }

    #[tokio::test]
    async fn round_trip_preserves_running_state() {
        let mut store = store();
        let mut machine = SessionMachine::new(interval_plan());
        machine.start(interval_plan(), T0).expect("start");
        machine.tick(T0 + 45_250, TickMode::Audible);

        assert!(store.save(&machine, T0 + 45_250, SaveReason::Transition).await);
        let mut restored = store
            .load(T0 + 45_250)
            .await
            .expect("snapshot")
            .into_machine();
        restored.tick(T0 + 45_250, TickMode::Silent);

        let (a, b) = (machine.state(), restored.state());
        assert_eq!(a.status, b.status);
        assert_eq!(a.current_cycle, b.current_cycle);
        assert_eq!(a.current_phase_index, b.current_phase_index);
        assert!(a.phase_remaining_ms.abs_diff(b.phase_remaining_ms) <= 1);
        assert!(a.session_remaining_ms.abs_diff(b.session_remaining_ms) <= 1);
        assert_eq!(restored.plan(), machine.plan());
    }

    #[tokio::test]
    async fn round_trip_preserves_paused_state() {
        let mut store = store();
        let mut machine = SessionMachine::new(interval_plan());
        machine.start(interval_plan(), T0).expect("start");
        machine.pause(T0 + 12_000);

        store.save(&machine, T0 + 12_000, SaveReason::Transition).await;
        let restored = store.load(T0 + 500_000).await.expect("snapshot").into_machine();

        assert_eq!(restored.state(), machine.state());
    }

    #[tokio::test]
    async fn tick_writes_are_throttled() {
        let mut store = store();
        let mut machine = SessionMachine::new(interval_plan());
        machine.start(interval_plan(), T0).expect("start");

        assert!(store.save(&machine, T0, SaveReason::Transition).await);
        assert!(!store.save(&machine, T0 + 200, SaveReason::Tick).await);
        assert!(!store.save(&machine, T0 + 999, SaveReason::Tick).await);
        assert!(store.save(&machine, T0 + 1_000, SaveReason::Tick).await);
        assert!(store.save(&machine, T0 + 1_001, SaveReason::Hidden).await);
        assert!(store.save(&machine, T0 + 1_002, SaveReason::Transition).await);
    }

    #[tokio::test]
    async fn missing_and_malformed_snapshots_load_as_none() {
        let store = store();
        assert!(store.load(T0).await.is_none());

        store
            .database()
            .put_snapshot(AppKind::Interval.namespace(), "{not json".into(), Utc::now())
            .await
            .expect("write");
        assert!(store.load(T0).await.is_none());
    }

    #[tokio::test]
    async fn structurally_invalid_snapshots_load_as_none() {
        let store = store();
        let payload = serde_json::json!({
            "plan": { "phases": [{ "key": "work", "durationSeconds": 30 }], "cycleCount": 2 },
            "state": { "status": "running", "currentCycle": 7, "currentPhaseIndex": 0,
                       "phaseDeadline": T0, "sessionDeadline": T0 + 1 }
        });
        store
            .database()
            .put_snapshot(AppKind::Interval.namespace(), payload.to_string(), Utc::now())
            .await
            .expect("write");

        assert!(store.load(T0).await.is_none());
    }

    #[tokio::test]
    async fn unknown_fields_and_missing_fields_use_defaults() {
        let store = store();
        let payload = serde_json::json!({
            "futureField": { "nested": true },
            "plan": { "phases": [{ "key": "work", "durationSeconds": 30 }] },
            "state": { "status": "paused", "currentCycle": 1, "currentPhaseIndex": 0,
                       "phaseRemainingMs": 5000, "sessionRemainingMs": 5000, "theme": "dark" }
        });
        store
            .database()
            .put_snapshot(AppKind::Interval.namespace(), payload.to_string(), Utc::now())
            .await
            .expect("write");

        let snapshot = store.load(T0).await.expect("snapshot");
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.plan.cycle_count, 1);
        assert_eq!(snapshot.state.status, SessionStatus::Paused);
        assert_eq!(snapshot.state.phase_deadline, None);
    }

    #[test]
    fn stale_running_snapshots_are_flagged_but_valid() {
        let mut machine = SessionMachine::new(interval_plan());
        machine.start(interval_plan(), T0).expect("start");
        let snapshot = SessionSnapshot::capture(AppKind::Interval, &machine, T0);
        let total = interval_plan().total_session_ms();

        assert!(snapshot.validate(AppKind::Interval).is_ok());
        assert!(!snapshot.is_stale(T0 + total));
        assert!(snapshot.is_stale(T0 + 2 * total + 1));

        let mut replayed = snapshot.into_machine();
        replayed.tick(T0 + 2 * total + 1, TickMode::Silent);
        assert_eq!(replayed.status(), SessionStatus::Completed);
    }

    #[test]
    fn validation_rejects_zero_duration_current_phase() {
        let plan = PhasePlan::new(
            vec![PhaseSpec::new("inhale", 4), PhaseSpec::new("holdIn", 0)],
            1,
        );
        let state = SessionState {
            status: SessionStatus::Paused,
            current_cycle: 1,
            current_phase_index: Some(1),
            phase_remaining_ms: 1_000,
            session_remaining_ms: 1_000,
            ..SessionState::default()
        };
        let snapshot = SessionSnapshot {
            plan,
            state,
            ..SessionSnapshot::default()
        };
        assert!(snapshot.validate(AppKind::Breathing).is_err());
    }

    async fn load_payload(store: &SessionStore, payload: serde_json::Value) -> Option<SessionSnapshot> {
        store
            .database()
            .put_snapshot(store.app().namespace(), payload.to_string(), Utc::now())
            .await
            .expect("write");
        store.load(T0).await
    }

    #[tokio::test]
    async fn out_of_bounds_plans_load_as_none() {
        let store = SessionStore::new(Database::in_memory().expect("db"), AppKind::Breathing);
        let huge_cycles = serde_json::json!({
            "app": "breathing",
            "plan": { "phases": [{ "key": "inhale", "durationSeconds": 1 }], "cycleCount": 4_000_000_000u32 },
            "state": { "status": "running", "currentCycle": 1, "currentPhaseIndex": 0,
                       "phaseDeadline": 1000, "sessionDeadline": 4_000_000_000_000i64 }
        });
        assert!(load_payload(&store, huge_cycles).await.is_none());

        let long_phase = serde_json::json!({
            "plan": { "phases": [{ "key": "inhale", "durationSeconds": 31 }], "cycleCount": 2 },
            "state": { "status": "idle" }
        });
        assert!(load_payload(&store, long_phase).await.is_none());

        let unknown_key = serde_json::json!({
            "plan": { "phases": [{ "key": "work", "durationSeconds": 10 }], "cycleCount": 2 }
        });
        assert!(load_payload(&store, unknown_key).await.is_none());

        let other_app = serde_json::json!({
            "app": "pomodoro",
            "plan": { "phases": [{ "key": "inhale", "durationSeconds": 4 }], "cycleCount": 2 }
        });
        assert!(load_payload(&store, other_app).await.is_none());

        let fine = serde_json::json!({
            "app": "breathing",
            "plan": { "phases": [
                { "key": "inhale", "durationSeconds": 4 },
                { "key": "holdIn", "durationSeconds": 0 }
            ], "cycleCount": 100 }
        });
        assert!(load_payload(&store, fine).await.is_some());
    }

    #[tokio::test]
    async fn extended_countdowns_stay_loadable() {
        let mut store = SessionStore::new(Database::in_memory().expect("db"), AppKind::Countdown);
        let mut machine = SessionMachine::new(PhasePlan::countdown(359_999));
        machine.add_time(3_600, T0).expect("extend");
        let extended = machine.plan().clone();
        machine.start(extended, T0).expect("start");

        assert!(store.save(&machine, T0, SaveReason::Transition).await);
        let snapshot = store.load(T0).await.expect("snapshot");
        assert_eq!(snapshot.plan.phases[0].duration_seconds, 363_599);
    }

    #[tokio::test]
    async fn completions_are_recorded_once() {
        let store = store();
        let mut machine = SessionMachine::new(PhasePlan::countdown(5));
        machine.start(PhasePlan::countdown(5), T0).expect("start");
        machine.tick(T0 + 5_000, TickMode::Audible);

        store.record_completion(&machine, T0 + 5_000).await;
        store.record_completion(&machine, T0 + 5_000).await;

        let history = store
            .database()
            .list_completed_sessions(10)
            .await
            .expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].planned_ms, 5_000);
        assert_eq!(history[0].wall_ms(), 5_000);
    }
}
