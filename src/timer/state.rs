use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::EpochMs;

use super::error::SessionError;
use super::phase::{first_active_phase_index, next_active_phase, PhasePlan, PhaseSpec};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    Completed,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Idle
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "Idle",
            SessionStatus::Running => "Running",
            SessionStatus::Paused => "Paused",
            SessionStatus::Completed => "Completed",
        }
    }
}

/// Whether boundary crossings found by a tick should produce cues.
/// Silent ticks are used to catch up after a suspension or a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    Audible,
    Silent,
}

/// Side effects a transition asks its host to perform, in session order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started {
        session_id: String,
        phase_key: String,
        cycle: u32,
    },
    PhaseCompleted {
        phase_key: String,
        cycle: u32,
        index: usize,
        audible: bool,
    },
    PhaseStarted {
        phase_key: String,
        cycle: u32,
        index: usize,
    },
    Paused,
    Resumed,
    TimeAdded {
        seconds: u32,
    },
    /// `at` is the deadline the session ended on, not the tick that noticed it.
    SessionCompleted {
        at: EpochMs,
    },
    Reset,
}

/// Runtime state of one session.
///
/// While Running the deadlines are authoritative; while Paused the remaining
/// durations are. Idle and Completed use neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    pub status: SessionStatus,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub current_cycle: u32,
    pub current_phase_index: Option<usize>,
    pub phase_deadline: Option<EpochMs>,
    pub session_deadline: Option<EpochMs>,
    pub phase_remaining_ms: u64,
    pub session_remaining_ms: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            status: SessionStatus::Idle,
            session_id: None,
            started_at: None,
            current_cycle: 0,
            current_phase_index: None,
            phase_deadline: None,
            session_deadline: None,
            phase_remaining_ms: 0,
            session_remaining_ms: 0,
        }
    }
}

impl SessionState {
    /// Whole seconds left in the phase, rounded up so "0" only shows at the end.
    pub fn phase_remaining_secs(&self) -> u64 {
        self.phase_remaining_ms.div_ceil(1000)
    }

    pub fn session_remaining_secs(&self) -> u64 {
        self.session_remaining_ms.div_ceil(1000)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, SessionStatus::Running | SessionStatus::Paused)
    }
}

fn remaining_until(deadline: EpochMs, now: EpochMs) -> u64 {
    u64::try_from(deadline.saturating_sub(now)).unwrap_or(0)
}

fn ms_to_i64(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

/// The scheduler: a plan plus the state it produced.
///
/// Every transition is a pure function of `(self, now)`; timers, storage and
/// cues belong to the host, which acts on the returned events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMachine {
    plan: PhasePlan,
    state: SessionState,
}

impl SessionMachine {
    pub fn new(plan: PhasePlan) -> Self {
        Self {
            plan,
            state: SessionState::default(),
        }
    }

    pub fn from_parts(plan: PhasePlan, state: SessionState) -> Self {
        Self { plan, state }
    }

    pub fn plan(&self) -> &PhasePlan {
        &self.plan
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    pub fn current_phase(&self) -> Option<&PhaseSpec> {
        self.state
            .current_phase_index
            .and_then(|index| self.plan.phase(index))
    }

    pub fn start(&mut self, plan: PhasePlan, now: EpochMs) -> Result<Vec<SessionEvent>, SessionError> {
        match self.state.status {
            SessionStatus::Idle => {}
            SessionStatus::Paused => return Ok(self.resume(now)),
            SessionStatus::Running => {
                return Err(SessionError::UnsupportedOperation(
                    "session is already running".into(),
                ))
            }
            SessionStatus::Completed => {
                return Err(SessionError::UnsupportedOperation(
                    "session has completed; reset it before starting again".into(),
                ))
            }
        }

        let Some(first) = first_active_phase_index(&plan.phases) else {
            return Err(SessionError::InvalidConfiguration(
                "no phase has a positive duration".into(),
            ));
        };
        let total_ms = plan.total_session_ms();
        if total_ms <= 0 {
            return Err(SessionError::InvalidConfiguration(
                "total session length is zero".into(),
            ));
        }

        let phase_ms = plan.phases[first].duration_ms();
        let session_id = Uuid::new_v4().to_string();
        let event = SessionEvent::Started {
            session_id: session_id.clone(),
            phase_key: plan.phases[first].key.clone(),
            cycle: 1,
        };

        self.state = SessionState {
            status: SessionStatus::Running,
            session_id: Some(session_id),
            started_at: DateTime::from_timestamp_millis(now),
            current_cycle: 1,
            current_phase_index: Some(first),
            phase_deadline: Some(now.saturating_add(phase_ms)),
            session_deadline: Some(now.saturating_add(total_ms)),
            phase_remaining_ms: phase_ms.unsigned_abs(),
            session_remaining_ms: total_ms.unsigned_abs(),
        };
        self.plan = plan;

        Ok(vec![event])
    }

    /// Freezes a running session. Boundaries already crossed at `now` are
    /// processed first so the frozen remainder belongs to the right phase.
    pub fn pause(&mut self, now: EpochMs) -> Vec<SessionEvent> {
        if self.state.status != SessionStatus::Running {
            return Vec::new();
        }

        let mut events = self.tick(now, TickMode::Audible);
        if self.state.status != SessionStatus::Running {
            return events;
        }

        if let Some(deadline) = self.state.phase_deadline.take() {
            self.state.phase_remaining_ms = remaining_until(deadline, now);
        }
        if let Some(deadline) = self.state.session_deadline.take() {
            self.state.session_remaining_ms = remaining_until(deadline, now);
        }
        self.state.status = SessionStatus::Paused;

        events.push(SessionEvent::Paused);
        events
    }

    pub fn resume(&mut self, now: EpochMs) -> Vec<SessionEvent> {
        if self.state.status != SessionStatus::Paused {
            return Vec::new();
        }

        self.state.phase_deadline = Some(now.saturating_add(ms_to_i64(self.state.phase_remaining_ms)));
        self.state.session_deadline =
            Some(now.saturating_add(ms_to_i64(self.state.session_remaining_ms)));
        self.state.status = SessionStatus::Running;

        vec![SessionEvent::Resumed]
    }

    /// Back to Idle from anywhere. Resetting an idle session does nothing.
    pub fn reset(&mut self) -> Vec<SessionEvent> {
        if self.state.status == SessionStatus::Idle {
            return Vec::new();
        }
        self.state = SessionState::default();
        vec![SessionEvent::Reset]
    }

    /// Advances through every phase boundary at or before `now`.
    ///
    /// Each new deadline is the previous deadline plus the next phase's
    /// duration, so the result does not depend on how often or how late the
    /// host calls this.
    pub fn tick(&mut self, now: EpochMs, mode: TickMode) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.state.status != SessionStatus::Running {
            return events;
        }

        let (Some(mut phase_deadline), Some(session_deadline), Some(mut index)) = (
            self.state.phase_deadline,
            self.state.session_deadline,
            self.state.current_phase_index,
        ) else {
            return events;
        };
        let mut cycle = self.state.current_cycle;

        while now >= phase_deadline {
            let Some(next) = next_active_phase(&self.plan.phases, self.plan.cycle_count, cycle, index)
            else {
                self.state.current_cycle = cycle;
                self.state.current_phase_index = Some(index);
                self.complete();
                events.push(SessionEvent::SessionCompleted { at: phase_deadline });
                return events;
            };

            let finished_key = self
                .plan
                .phase(index)
                .map(|phase| phase.key.clone())
                .unwrap_or_default();
            events.push(SessionEvent::PhaseCompleted {
                phase_key: finished_key,
                cycle,
                index,
                audible: mode == TickMode::Audible,
            });

            cycle = next.cycle;
            index = next.index;
            let entered = &self.plan.phases[index];
            phase_deadline = phase_deadline.saturating_add(entered.duration_ms());
            events.push(SessionEvent::PhaseStarted {
                phase_key: entered.key.clone(),
                cycle,
                index,
            });
        }

        self.state.current_cycle = cycle;
        self.state.current_phase_index = Some(index);
        self.state.phase_deadline = Some(phase_deadline);
        self.state.phase_remaining_ms = remaining_until(phase_deadline, now);
        self.state.session_remaining_ms = remaining_until(session_deadline, now);

        events
    }

    /// Extends a plain countdown by `seconds`. Multi-phase sessions refuse.
    pub fn add_time(&mut self, seconds: u32, now: EpochMs) -> Result<Vec<SessionEvent>, SessionError> {
        if !self.plan.is_plain_countdown() {
            return Err(SessionError::UnsupportedOperation(
                "extra time only applies to single-phase countdowns".into(),
            ));
        }
        if self.state.status == SessionStatus::Completed {
            return Err(SessionError::UnsupportedOperation(
                "session has already completed".into(),
            ));
        }

        let extra_ms = i64::from(seconds) * 1000;
        if let Some(index) = first_active_phase_index(&self.plan.phases) {
            let phase = &mut self.plan.phases[index];
            phase.duration_seconds = phase.duration_seconds.saturating_add(seconds);
        }

        match self.state.status {
            SessionStatus::Running => {
                if let (Some(phase_deadline), Some(session_deadline)) =
                    (self.state.phase_deadline, self.state.session_deadline)
                {
                    let phase_deadline = phase_deadline.saturating_add(extra_ms);
                    let session_deadline = session_deadline.saturating_add(extra_ms);
                    self.state.phase_deadline = Some(phase_deadline);
                    self.state.session_deadline = Some(session_deadline);
                    self.state.phase_remaining_ms = remaining_until(phase_deadline, now);
                    self.state.session_remaining_ms = remaining_until(session_deadline, now);
                }
            }
            SessionStatus::Paused => {
                let extra = extra_ms.unsigned_abs();
                self.state.phase_remaining_ms = self.state.phase_remaining_ms.saturating_add(extra);
                self.state.session_remaining_ms =
                    self.state.session_remaining_ms.saturating_add(extra);
            }
            SessionStatus::Idle | SessionStatus::Completed => {}
        }

        Ok(vec![SessionEvent::TimeAdded { seconds }])
    }

    fn complete(&mut self) {
        self.state.status = SessionStatus::Completed;
        self.state.phase_deadline = None;
        self.state.session_deadline = None;
        self.state.phase_remaining_ms = 0;
        self.state.session_remaining_ms = 0;
    }
}
