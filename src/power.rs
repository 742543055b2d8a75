//! Wake-lock bookkeeping. The lock should be held exactly while the session is
//! running and the host is visible.

use crate::signal::WakeLock;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

pub struct PowerCoordinator {
    wake_lock: Box<dyn WakeLock>,
    visible: bool,
    held: bool,
}

impl PowerCoordinator {
    pub fn new(wake_lock: Box<dyn WakeLock>) -> Self {
        Self {
            wake_lock,
            visible: true,
            held: false,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Acquires or releases so the lock matches `running && visible`.
    /// Repeated calls with the same inputs do nothing.
    pub fn sync(&mut self, running: bool) {
        if running && self.visible {
            self.acquire();
        } else {
            self.release();
        }
    }

    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        if let Err(err) = self.wake_lock.release() {
            log_warn!("Wake lock release failed: {err}");
        } else {
            log_debug!("Wake lock released");
        }
    }

    fn acquire(&mut self) {
        if self.held || !self.wake_lock.is_available() {
            return;
        }
        match self.wake_lock.acquire() {
            Ok(()) => {
                self.held = true;
                log_debug!("Wake lock acquired");
            }
            Err(err) => log_warn!("Wake lock unavailable: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::testing::{FakeWakeLock, Recorder};
    use crate::signal::Unsupported;

    fn coordinator() -> (PowerCoordinator, Recorder) {
        let recorder = Recorder::default();
        (
            PowerCoordinator::new(Box::new(FakeWakeLock(recorder.clone()))),
            recorder,
        )
    }

    #[test]
    fn duplicate_syncs_do_not_double_acquire() {
        let (mut power, recorder) = coordinator();
        power.sync(true);
        power.sync(true);
        power.set_visible(true);
        power.sync(true);

        assert!(power.is_held());
        assert_eq!(recorder.wake_lock_calls(), vec!["acquire"]);
    }

    #[test]
    fn hidden_or_stopped_releases() {
        let (mut power, recorder) = coordinator();
        power.sync(true);
        power.set_visible(false);
        power.sync(true);
        assert!(!power.is_held());

        power.set_visible(true);
        power.sync(true);
        power.sync(false);
        power.sync(false);

        assert_eq!(
            recorder.wake_lock_calls(),
            vec!["acquire", "release", "acquire", "release"]
        );
    }

    #[test]
    fn missing_capability_is_a_no_op() {
        let mut power = PowerCoordinator::new(Box::new(Unsupported));
        power.sync(true);
        assert!(!power.is_held());
        power.release();
    }
}
