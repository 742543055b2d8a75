//! Audible, haptic and notification cues at phase and session boundaries.
//!
//! Every output goes through a capability trait so hosts can plug in what
//! they have. Cues are fire-and-forget: a missing or failing capability is
//! logged and otherwise ignored, it never reaches the scheduler.

pub mod adapters;
pub mod tone;

use serde::{Deserialize, Serialize};

use crate::timer::AppKind;

pub use adapters::{ConsoleNotifier, InhibitWakeLock, TerminalBell, Unsupported};
pub use tone::{Tone, ToneWave};

#[cfg(feature = "audio")]
pub use tone::ToneEngineHandle;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const PHASE_VIBRATION_MS: [u32; 1] = [120];
const SESSION_VIBRATION_MS: [u32; 5] = [200, 100, 200, 100, 400];

/// Uniform probe shared by every host capability.
pub trait Capability {
    fn is_available(&self) -> bool;
}

pub trait ToneOutput: Capability + Send + Sync {
    fn play(&self, tone: Tone) -> Result<(), String>;
}

pub trait Vibrator: Capability + Send + Sync {
    /// Alternating on/off durations in milliseconds, starting with "on".
    fn vibrate(&self, pattern: &[u32]) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    Default,
    Granted,
    Denied,
}

pub trait Notifier: Capability + Send + Sync {
    fn permission(&self) -> Permission;
    /// Must not block waiting for the user.
    fn request_permission(&self) -> Result<Permission, String>;
    fn notify(&self, title: &str, body: &str) -> Result<(), String>;
}

pub trait WakeLock: Capability + Send + Sync {
    fn acquire(&self) -> Result<(), String>;
    fn release(&self) -> Result<(), String>;
}

/// Which cue channels the user wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CuePreferences {
    pub sound: bool,
    pub vibration: bool,
    pub notifications: bool,
}

impl Default for CuePreferences {
    fn default() -> Self {
        Self {
            sound: true,
            vibration: true,
            notifications: true,
        }
    }
}

pub struct CompletionSignaler {
    app: AppKind,
    prefs: CuePreferences,
    tone: Box<dyn ToneOutput>,
    vibrator: Box<dyn Vibrator>,
    notifier: Box<dyn Notifier>,
    permission_requested: bool,
}

impl CompletionSignaler {
    pub fn new(
        app: AppKind,
        prefs: CuePreferences,
        tone: Box<dyn ToneOutput>,
        vibrator: Box<dyn Vibrator>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            app,
            prefs,
            tone,
            vibrator,
            notifier,
            permission_requested: false,
        }
    }

    /// Adapters available to a terminal process. `permission` is whatever the
    /// user answered in an earlier run.
    pub fn for_terminal(app: AppKind, prefs: CuePreferences, permission: Permission) -> Self {
        #[cfg(feature = "audio")]
        let tone: Box<dyn ToneOutput> = Box::new(ToneEngineHandle::new());
        #[cfg(not(feature = "audio"))]
        let tone: Box<dyn ToneOutput> = Box::new(TerminalBell);

        Self::new(
            app,
            prefs,
            tone,
            Box::new(Unsupported),
            Box::new(ConsoleNotifier::with_permission(permission)),
        )
    }

    pub fn notification_permission(&self) -> Permission {
        self.notifier.permission()
    }

    pub fn signal_phase_complete(&self, phase_key: &str) {
        log_debug!("Phase '{phase_key}' complete ({})", self.app.label());
        if self.prefs.sound {
            self.play(Tone::phase(self.app.phase_tone_hz(phase_key)));
        }
        if self.prefs.vibration {
            self.vibrate(&PHASE_VIBRATION_MS);
        }
    }

    pub fn signal_session_complete(&self) {
        log_debug!("{} session complete", self.app.label());
        if self.prefs.sound {
            for tone in Tone::completion_chime() {
                self.play(tone);
            }
        }
        if self.prefs.vibration {
            self.vibrate(&SESSION_VIBRATION_MS);
        }
        if self.prefs.notifications
            && self.notifier.is_available()
            && self.notifier.permission() == Permission::Granted
        {
            let (title, body) = self.app.completion_message();
            if let Err(err) = self.notifier.notify(title, body) {
                log_warn!("Notification failed: {err}");
            }
        }
    }

    /// Asks for notification permission the first time the user starts a
    /// session. Later calls do nothing, whatever the answer was.
    pub fn prepare_for_user_start(&mut self) {
        if self.permission_requested || !self.prefs.notifications {
            return;
        }
        self.permission_requested = true;

        if !self.notifier.is_available() || self.notifier.permission() != Permission::Default {
            return;
        }
        match self.notifier.request_permission() {
            Ok(permission) => log_debug!("Notification permission: {permission:?}"),
            Err(err) => log_warn!("Notification permission request failed: {err}"),
        }
    }

    fn play(&self, tone: Tone) {
        if !self.tone.is_available() {
            return;
        }
        if let Err(err) = self.tone.play(tone) {
            log_warn!("Tone playback failed: {err}");
        }
    }

    fn vibrate(&self, pattern: &[u32]) {
        if !self.vibrator.is_available() {
            return;
        }
        if let Err(err) = self.vibrator.vibrate(pattern) {
            log_warn!("Vibration failed: {err}");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records every cue so tests can assert on what fired.
    #[derive(Clone, Default)]
    pub struct Recorder {
        pub tones: Arc<Mutex<Vec<Tone>>>,
        pub vibrations: Arc<Mutex<Vec<Vec<u32>>>>,
        pub notifications: Arc<Mutex<Vec<String>>>,
        pub permission_requests: Arc<Mutex<u32>>,
        pub wake_lock_calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Recorder {
        pub fn tone_count(&self) -> usize {
            self.tones.lock().expect("tones").len()
        }

        pub fn notification_count(&self) -> usize {
            self.notifications.lock().expect("notifications").len()
        }

        pub fn wake_lock_calls(&self) -> Vec<&'static str> {
            self.wake_lock_calls.lock().expect("wake lock").clone()
        }
    }

    pub struct FakeTone(pub Recorder);

    impl Capability for FakeTone {
        fn is_available(&self) -> bool {
            true
        }
    }

    impl ToneOutput for FakeTone {
        fn play(&self, tone: Tone) -> Result<(), String> {
            self.0.tones.lock().expect("tones").push(tone);
            Ok(())
        }
    }

    pub struct FakeVibrator(pub Recorder);

    impl Capability for FakeVibrator {
        fn is_available(&self) -> bool {
            true
        }
    }

    impl Vibrator for FakeVibrator {
        fn vibrate(&self, pattern: &[u32]) -> Result<(), String> {
            self.0.vibrations.lock().expect("vibrations").push(pattern.to_vec());
            Ok(())
        }
    }

    pub struct FakeNotifier {
        pub recorder: Recorder,
        pub permission: Mutex<Permission>,
        pub grant: Permission,
    }

    impl Capability for FakeNotifier {
        fn is_available(&self) -> bool {
            true
        }
    }

    impl Notifier for FakeNotifier {
        fn permission(&self) -> Permission {
            *self.permission.lock().expect("permission")
        }

        fn request_permission(&self) -> Result<Permission, String> {
            *self.recorder.permission_requests.lock().expect("requests") += 1;
            let mut guard = self.permission.lock().expect("permission");
            *guard = self.grant;
            Ok(*guard)
        }

        fn notify(&self, title: &str, _body: &str) -> Result<(), String> {
            self.recorder
                .notifications
                .lock()
                .expect("notifications")
                .push(title.to_string());
            Ok(())
        }
    }

    pub struct FakeWakeLock(pub Recorder);

    impl Capability for FakeWakeLock {
        fn is_available(&self) -> bool {
            true
        }
    }

    impl WakeLock for FakeWakeLock {
        fn acquire(&self) -> Result<(), String> {
            self.0.wake_lock_calls.lock().expect("wake lock").push("acquire");
            Ok(())
        }

        fn release(&self) -> Result<(), String> {
            self.0.wake_lock_calls.lock().expect("wake lock").push("release");
            Ok(())
        }
    }

    pub fn signaler(app: AppKind, grant: Permission) -> (CompletionSignaler, Recorder) {
        signaler_with(app, CuePreferences::default(), Permission::Default, grant)
    }

    /// `current` is the permission carried over from an earlier run, `grant`
    /// the answer to a fresh request.
    pub fn signaler_with(
        app: AppKind,
        prefs: CuePreferences,
        current: Permission,
        grant: Permission,
    ) -> (CompletionSignaler, Recorder) {
        let recorder = Recorder::default();
        let signaler = CompletionSignaler::new(
            app,
            prefs,
            Box::new(FakeTone(recorder.clone())),
            Box::new(FakeVibrator(recorder.clone())),
            Box::new(FakeNotifier {
                recorder: recorder.clone(),
                permission: Mutex::new(current),
                grant,
            }),
        );
        (signaler, recorder)
    }
}
