use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, EpochMs};
use crate::power::PowerCoordinator;
use crate::signal::{CompletionSignaler, Permission};

use super::{
    persistence::{SaveReason, SessionStore},
    AppKind, PhasePlan, SessionError, SessionEvent, SessionMachine, SessionStatus, TickMode,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const VIEW_CHANNEL_CAPACITY: usize = 64;

/// What a host renders: the session as of the last transition or tick.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub app: AppKind,
    pub status: SessionStatus,
    pub phase_key: Option<String>,
    pub cycle: u32,
    pub cycle_count: u32,
    pub phase_remaining_ms: u64,
    pub session_remaining_ms: u64,
    pub visible: bool,
    pub wake_lock_held: bool,
}

struct Inner {
    app: AppKind,
    machine: SessionMachine,
    store: SessionStore,
    signaler: CompletionSignaler,
    power: PowerCoordinator,
}

impl Inner {
    fn view(&self) -> SessionView {
        let state = self.machine.state();
        SessionView {
            app: self.app,
            status: state.status,
            phase_key: self.machine.current_phase().map(|phase| phase.key.clone()),
            cycle: state.current_cycle,
            cycle_count: self.machine.plan().cycle_count,
            phase_remaining_ms: state.phase_remaining_ms,
            session_remaining_ms: state.session_remaining_ms,
            visible: self.power.is_visible(),
            wake_lock_held: self.power.is_held(),
        }
    }

    fn is_running(&self) -> bool {
        self.machine.status() == SessionStatus::Running
    }

    /// Routes machine events to cues and history, then persists and brings
    /// the wake lock in line with the new status.
    async fn settle(&mut self, events: &[SessionEvent], now: EpochMs, reason: SaveReason) {
        for event in events {
            match event {
                SessionEvent::Started {
                    session_id,
                    phase_key,
                    ..
                } => log_info!("{} session {session_id} started in '{phase_key}'", self.app.label()),
                SessionEvent::PhaseCompleted {
                    phase_key, audible, ..
                } => {
                    if *audible {
                        self.signaler.signal_phase_complete(phase_key);
                    }
                }
                SessionEvent::PhaseStarted {
                    phase_key, cycle, ..
                } => log_debug!("Entered '{phase_key}' (cycle {cycle})"),
                SessionEvent::SessionCompleted { at } => {
                    log_info!("{} session complete", self.app.label());
                    self.signaler.signal_session_complete();
                    self.store.record_completion(&self.machine, *at).await;
                }
                SessionEvent::Paused
                | SessionEvent::Resumed
                | SessionEvent::TimeAdded { .. }
                | SessionEvent::Reset => log_debug!("{:?}", event),
            }
        }

        self.store.save(&self.machine, now, reason).await;
        let running = self.is_running();
        self.power.sync(running);
    }

    async fn advance(&mut self, now: EpochMs, mode: TickMode) {
        let events = self.machine.tick(now, mode);
        let reason = if events.is_empty() {
            SaveReason::Tick
        } else {
            SaveReason::Transition
        };
        self.settle(&events, now, reason).await;
    }
}

struct Ticker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Ticker {
    /// Lets an in-flight tick finish its writes before returning.
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            log_warn!("tick driver ended abnormally: {err}");
        }
    }
}

/// Owns one utility's session: the machine, its tick driver and everything
/// the machine's events fan out to.
#[derive(Clone)]
pub struct TimerController {
    inner: Arc<Mutex<Inner>>,
    ticker: Arc<Mutex<Option<Ticker>>>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    views: broadcast::Sender<SessionView>,
}

impl TimerController {
    pub fn new(
        plan: PhasePlan,
        store: SessionStore,
        signaler: CompletionSignaler,
        power: PowerCoordinator,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
    ) -> Self {
        let (views, _) = broadcast::channel(VIEW_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                app: store.app(),
                machine: SessionMachine::new(plan),
                store,
                signaler,
                power,
            })),
            ticker: Arc::new(Mutex::new(None)),
            clock,
            tick_interval,
            views,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionView> {
        self.views.subscribe()
    }

    pub async fn view(&self) -> SessionView {
        self.inner.lock().await.view()
    }

    pub async fn plan(&self) -> PhasePlan {
        self.inner.lock().await.machine.plan().clone()
    }

    /// Current notification permission, so the host can keep it for later runs.
    pub async fn notification_permission(&self) -> Permission {
        self.inner.lock().await.signaler.notification_permission()
    }

    /// Loads the persisted session, replays any boundaries missed while the
    /// process was gone (silently), and resumes ticking if still running.
    pub async fn restore(&self) -> SessionView {
        let now = self.clock.now_ms();
        let (view, running) = {
            let mut inner = self.inner.lock().await;
            if let Some(snapshot) = inner.store.load(now).await {
                inner.machine = snapshot.into_machine();
                log_info!(
                    "Restored {} session ({})",
                    inner.app.label(),
                    inner.machine.status().as_str()
                );
            }
            inner.advance(now, TickMode::Silent).await;
            (inner.view(), inner.is_running())
        };

        if running {
            self.spawn_ticker().await;
        }
        self.publish(view)
    }

    /// User-initiated start. A finished session is cleared first; a paused
    /// one resumes.
    pub async fn start_session(&self, plan: PhasePlan) -> Result<SessionView, SessionError> {
        let now = self.clock.now_ms();
        let view = {
            let mut inner = self.inner.lock().await;
            if inner.machine.status() == SessionStatus::Completed {
                inner.machine.reset();
            }
            let events = inner.machine.start(plan, now)?;
            inner.signaler.prepare_for_user_start();
            inner.settle(&events, now, SaveReason::Transition).await;
            inner.view()
        };

        self.spawn_ticker().await;
        Ok(self.publish(view))
    }

    pub async fn pause(&self) -> SessionView {
        let now = self.clock.now_ms();
        let view = {
            let mut inner = self.inner.lock().await;
            let events = inner.machine.pause(now);
            if !events.is_empty() {
                inner.settle(&events, now, SaveReason::Transition).await;
            }
            inner.view()
        };

        self.cancel_ticker().await;
        self.publish(view)
    }

    pub async fn resume(&self) -> SessionView {
        let now = self.clock.now_ms();
        let (view, running) = {
            let mut inner = self.inner.lock().await;
            let events = inner.machine.resume(now);
            if !events.is_empty() {
                inner.settle(&events, now, SaveReason::Transition).await;
            }
            (inner.view(), inner.is_running())
        };

        if running {
            self.spawn_ticker().await;
        }
        self.publish(view)
    }

    pub async fn toggle_pause(&self) -> SessionView {
        let status = self.inner.lock().await.machine.status();
        match status {
            SessionStatus::Running => self.pause().await,
            SessionStatus::Paused => self.resume().await,
            SessionStatus::Idle | SessionStatus::Completed => self.view().await,
        }
    }

    /// Stops the tick driver before touching the machine, so no tick can
    /// land after the reset.
    pub async fn reset(&self) -> SessionView {
        self.cancel_ticker().await;

        let now = self.clock.now_ms();
        let view = {
            let mut inner = self.inner.lock().await;
            let events = inner.machine.reset();
            inner.settle(&events, now, SaveReason::Transition).await;
            inner.view()
        };
        self.publish(view)
    }

    pub async fn add_time(&self, seconds: u32) -> Result<SessionView, SessionError> {
        let now = self.clock.now_ms();
        let view = {
            let mut inner = self.inner.lock().await;
            let events = inner.machine.add_time(seconds, now)?;
            inner.settle(&events, now, SaveReason::Transition).await;
            inner.view()
        };
        Ok(self.publish(view))
    }

    /// Host came to the foreground: catch up silently, then take the wake lock.
    pub async fn on_visible(&self) -> SessionView {
        let now = self.clock.now_ms();
        let view = {
            let mut inner = self.inner.lock().await;
            inner.power.set_visible(true);
            if inner.is_running() {
                inner.advance(now, TickMode::Silent).await;
            } else {
                let running = inner.is_running();
                inner.power.sync(running);
            }
            inner.view()
        };
        self.publish(view)
    }

    /// Host is going to the background or away: drop the wake lock and make
    /// sure storage is current.
    pub async fn on_hidden(&self) -> SessionView {
        let now = self.clock.now_ms();
        let view = {
            let mut inner = self.inner.lock().await;
            inner.power.set_visible(false);
            inner.settle(&[], now, SaveReason::Hidden).await;
            inner.view()
        };
        self.publish(view)
    }

    /// One audible tick at the current time.
    pub async fn tick_now(&self) -> SessionView {
        let now = self.clock.now_ms();
        let view = {
            let mut inner = self.inner.lock().await;
            inner.advance(now, TickMode::Audible).await;
            inner.view()
        };
        self.publish(view)
    }

    pub async fn shutdown(&self) {
        self.cancel_ticker().await;
        let mut inner = self.inner.lock().await;
        inner.power.release();
    }

    fn publish(&self, view: SessionView) -> SessionView {
        // No receivers is fine.
        let _ = self.views.send(view.clone());
        view
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(old) = ticker_guard.take() {
            old.stop().await;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            self.inner.clone(),
            self.clock.clone(),
            self.views.clone(),
            self.tick_interval,
            cancel.clone(),
        ));

        *ticker_guard = Some(Ticker { handle, cancel });
    }

    async fn cancel_ticker(&self) {
        let ticker = self.ticker.lock().await.take();
        if let Some(ticker) = ticker {
            ticker.stop().await;
        }
    }
}

async fn tick_loop(
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
    views: broadcast::Sender<SessionView>,
    tick_interval: Duration,
    cancel: CancellationToken,
) {
    let first = tokio::time::Instant::now() + tick_interval;
    let mut ticker = tokio::time::interval_at(first, tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log_debug!("tick driver cancelled");
                break;
            }
            _ = ticker.tick() => {
                let view = {
                    let mut guard = inner.lock().await;
                    if !guard.is_running() {
                        break;
                    }
                    guard.advance(clock.now_ms(), TickMode::Audible).await;
                    guard.view()
                };

                let still_running = view.status == SessionStatus::Running;
                let _ = views.send(view);
                if !still_running {
                    break;
                }
            }
        }
    }
}
