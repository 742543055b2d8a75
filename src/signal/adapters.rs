//! Terminal-host implementations of the cue and power capabilities.

use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use super::{Capability, Notifier, Permission, Tone, ToneOutput, Vibrator, WakeLock};

/// Rings the terminal bell once per tone. Pitch and length are lost.
pub struct TerminalBell;

impl Capability for TerminalBell {
    fn is_available(&self) -> bool {
        std::io::stderr().is_terminal()
    }
}

impl ToneOutput for TerminalBell {
    fn play(&self, _tone: Tone) -> Result<(), String> {
        let mut stderr = std::io::stderr();
        stderr.write_all(b"\x07").map_err(|e| e.to_string())?;
        stderr.flush().map_err(|e| e.to_string())
    }
}

/// Stand-in for a capability the host does not have.
pub struct Unsupported;

impl Capability for Unsupported {
    fn is_available(&self) -> bool {
        false
    }
}

impl ToneOutput for Unsupported {
    fn play(&self, _tone: Tone) -> Result<(), String> {
        Err("tone output unsupported".into())
    }
}

impl Vibrator for Unsupported {
    fn vibrate(&self, _pattern: &[u32]) -> Result<(), String> {
        Err("vibration unsupported".into())
    }
}

impl Notifier for Unsupported {
    fn permission(&self) -> Permission {
        Permission::Denied
    }

    fn request_permission(&self) -> Result<Permission, String> {
        Ok(Permission::Denied)
    }

    fn notify(&self, _title: &str, _body: &str) -> Result<(), String> {
        Err("notifications unsupported".into())
    }
}

impl WakeLock for Unsupported {
    fn acquire(&self) -> Result<(), String> {
        Err("wake lock unsupported".into())
    }

    fn release(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Prints notifications to stderr. Permission is granted on first request.
pub struct ConsoleNotifier {
    permission: Mutex<Permission>,
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::with_permission(Permission::Default)
    }
}

impl ConsoleNotifier {
    pub fn with_permission(permission: Permission) -> Self {
        Self {
            permission: Mutex::new(permission),
        }
    }
}

impl Capability for ConsoleNotifier {
    fn is_available(&self) -> bool {
        true
    }
}

impl Notifier for ConsoleNotifier {
    fn permission(&self) -> Permission {
        self.permission
            .lock()
            .map(|guard| *guard)
            .unwrap_or(Permission::Denied)
    }

    fn request_permission(&self) -> Result<Permission, String> {
        let mut guard = self.permission.lock().map_err(|e| e.to_string())?;
        if *guard == Permission::Default {
            *guard = Permission::Granted;
        }
        Ok(*guard)
    }

    fn notify(&self, title: &str, body: &str) -> Result<(), String> {
        let mut stderr = std::io::stderr();
        writeln!(stderr, "\n[{title}] {body}").map_err(|e| e.to_string())
    }
}

const INHIBIT_BIN: &str = "systemd-inhibit";

/// Keeps the machine awake by holding a `systemd-inhibit` child process.
/// Killing the child drops the inhibitor.
pub struct InhibitWakeLock {
    binary: Option<PathBuf>,
    child: Mutex<Option<Child>>,
}

impl Default for InhibitWakeLock {
    fn default() -> Self {
        Self::new()
    }
}

impl InhibitWakeLock {
    pub fn new() -> Self {
        Self {
            binary: which::which(INHIBIT_BIN).ok(),
            child: Mutex::new(None),
        }
    }
}

impl Capability for InhibitWakeLock {
    fn is_available(&self) -> bool {
        self.binary.is_some()
    }
}

impl WakeLock for InhibitWakeLock {
    fn acquire(&self) -> Result<(), String> {
        let Some(binary) = &self.binary else {
            return Err(format!("{INHIBIT_BIN} not found"));
        };
        let mut guard = self.child.lock().map_err(|e| e.to_string())?;
        if guard.is_some() {
            return Ok(());
        }

        let child = Command::new(binary)
            .args([
                "--what=idle:sleep",
                "--who=cadence",
                "--why=Timer running",
                "--mode=block",
                "sleep",
                "infinity",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("failed to start {INHIBIT_BIN}: {e}"))?;
        *guard = Some(child);
        Ok(())
    }

    fn release(&self) -> Result<(), String> {
        let mut guard = self.child.lock().map_err(|e| e.to_string())?;
        if let Some(mut child) = guard.take() {
            child.kill().map_err(|e| e.to_string())?;
            child.wait().map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

impl Drop for InhibitWakeLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_notifier_grants_once_asked() {
        let notifier = ConsoleNotifier::default();
        assert_eq!(notifier.permission(), Permission::Default);
        assert_eq!(notifier.request_permission(), Ok(Permission::Granted));
        assert_eq!(notifier.permission(), Permission::Granted);

        let denied = ConsoleNotifier::with_permission(Permission::Denied);
        assert_eq!(denied.request_permission(), Ok(Permission::Denied));
    }

    #[test]
    fn unsupported_reports_unavailable() {
        assert!(!Capability::is_available(&Unsupported));
        assert!(ToneOutput::play(&Unsupported, Tone::phase(440.0)).is_err());
        assert!(WakeLock::release(&Unsupported).is_ok());
        assert_eq!(Notifier::permission(&Unsupported), Permission::Denied);
    }

    #[test]
    fn inhibit_availability_follows_path_lookup() {
        let lock = InhibitWakeLock::new();
        assert_eq!(lock.is_available(), which::which(INHIBIT_BIN).is_ok());
        assert_eq!(lock.binary, which::which(INHIBIT_BIN).ok());
    }

    #[test]
    fn missing_inhibit_binary_is_unavailable() {
        let lock = InhibitWakeLock {
            binary: None,
            child: Mutex::new(None),
        };
        assert!(!lock.is_available());
        assert!(lock.acquire().is_err());
        assert!(lock.release().is_ok());
    }
}
