pub mod controller;
pub mod error;
pub mod persistence;
pub mod phase;
pub mod presets;
pub mod state;

pub use controller::{SessionView, TimerController};
pub use error::SessionError;
pub use persistence::{SaveReason, SessionSnapshot, SessionStore};
pub use phase::{
    first_active_phase_index, next_active_phase, validate_cycle_count, validate_durations,
    CycleRule, PhasePlan, PhasePosition, PhaseRule, PhaseSpec,
};
pub use presets::{AppKind, BreathingTechnique};
pub use state::{SessionEvent, SessionMachine, SessionState, SessionStatus, TickMode};
