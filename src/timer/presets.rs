use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::phase::{
    first_active_phase_index, validate_cycle_count, validate_durations, CycleRule, PhasePlan,
    PhaseRule,
};

/// The utilities that share the scheduler. Each one is just a preset: phase
/// rules, cycle bounds, cue tones and its own storage namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum AppKind {
    Countdown,
    Interval,
    Pomodoro,
    Breathing,
}

const COUNTDOWN_RULES: [PhaseRule; 1] = [PhaseRule::new("countdown", 1, 359_999, 300)];

const INTERVAL_RULES: [PhaseRule; 2] = [
    PhaseRule::new("work", 5, 3600, 30),
    PhaseRule::new("rest", 5, 3600, 10),
];

const POMODORO_RULES: [PhaseRule; 2] = [
    PhaseRule::new("work", 60, 7200, 1500),
    PhaseRule::new("break", 60, 3600, 300),
];

const BREATHING_RULES: [PhaseRule; 4] = [
    PhaseRule::new("inhale", 0, 30, 4),
    PhaseRule::new("holdIn", 0, 30, 4),
    PhaseRule::new("exhale", 0, 30, 4),
    PhaseRule::new("holdOut", 0, 30, 4),
];

impl AppKind {
    pub const ALL: [AppKind; 4] = [
        AppKind::Countdown,
        AppKind::Interval,
        AppKind::Pomodoro,
        AppKind::Breathing,
    ];

    /// Storage key for this utility's snapshot. Each utility persists on its own.
    pub fn namespace(self) -> &'static str {
        match self {
            AppKind::Countdown => "cadence.countdown.session",
            AppKind::Interval => "cadence.interval.session",
            AppKind::Pomodoro => "cadence.pomodoro.session",
            AppKind::Breathing => "cadence.breathing.session",
        }
    }

    pub fn settings_key(self) -> &'static str {
        match self {
            AppKind::Countdown => "countdown",
            AppKind::Interval => "interval",
            AppKind::Pomodoro => "pomodoro",
            AppKind::Breathing => "breathing",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AppKind::Countdown => "Timer",
            AppKind::Interval => "Interval",
            AppKind::Pomodoro => "Pomodoro",
            AppKind::Breathing => "Breathing",
        }
    }

    pub fn rules(self) -> &'static [PhaseRule] {
        match self {
            AppKind::Countdown => &COUNTDOWN_RULES,
            AppKind::Interval => &INTERVAL_RULES,
            AppKind::Pomodoro => &POMODORO_RULES,
            AppKind::Breathing => &BREATHING_RULES,
        }
    }

    pub fn cycle_rule(self) -> CycleRule {
        match self {
            AppKind::Countdown => CycleRule { min: 1, max: 1, default: 1 },
            AppKind::Interval => CycleRule { min: 1, max: 99, default: 8 },
            AppKind::Pomodoro => CycleRule { min: 1, max: 12, default: 4 },
            AppKind::Breathing => CycleRule { min: 1, max: 100, default: 10 },
        }
    }

    /// Tone frequency (Hz) for the end of a phase. Breathing rises into the
    /// inhale and falls into the exhale; work/rest alternate high and low.
    pub fn phase_tone_hz(self, phase_key: &str) -> f32 {
        match (self, phase_key) {
            (AppKind::Breathing, "inhale") => 523.25,
            (AppKind::Breathing, "holdIn" | "holdOut") => 440.0,
            (AppKind::Breathing, "exhale") => 392.0,
            (AppKind::Interval | AppKind::Pomodoro, "work") => 880.0,
            (AppKind::Interval, "rest") | (AppKind::Pomodoro, "break") => 660.0,
            _ => 740.0,
        }
    }

    pub fn completion_message(self) -> (&'static str, &'static str) {
        match self {
            AppKind::Countdown => ("Timer finished", "Your countdown is done."),
            AppKind::Interval => ("Intervals complete", "All rounds finished."),
            AppKind::Pomodoro => ("Pomodoro complete", "Every focus cycle is done. Take a long break."),
            AppKind::Breathing => ("Breathing session complete", "Nice work. Notice how you feel."),
        }
    }

    /// Validated plan from raw settings: `phases` is a JSON object keyed by
    /// phase key, `cycles` the raw cycle count.
    ///
    /// The result always has at least one phase with a positive duration. If
    /// the input zeroes every phase, the last good phases are used, then the
    /// preset defaults.
    pub fn plan_from_raw(self, phases: &Value, cycles: Option<&Value>, last_good: Option<&PhasePlan>) -> PhasePlan {
        let mut specs = validate_durations(
            self.rules(),
            phases,
            last_good.map(|plan| plan.phases.as_slice()),
        );
        if first_active_phase_index(&specs).is_none() {
            specs = last_good
                .map(|plan| validate_durations(self.rules(), &Value::Null, Some(&plan.phases)))
                .filter(|specs| first_active_phase_index(specs).is_some())
                .unwrap_or_else(|| validate_durations(self.rules(), &Value::Null, None));
        }
        let cycle_count = validate_cycle_count(
            self.cycle_rule(),
            cycles,
            last_good.map(|plan| plan.cycle_count),
        );
        PhasePlan::new(specs, cycle_count)
    }

    pub fn default_plan(self) -> PhasePlan {
        self.plan_from_raw(&Value::Null, None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum BreathingTechnique {
    /// 4-4-4-4
    Box,
    /// 4-7-8 with no final hold.
    #[value(name = "4-7-8")]
    #[serde(rename = "4-7-8")]
    FourSevenEight,
    /// 5-0-5-0
    Coherent,
}

impl BreathingTechnique {
    pub fn raw_phases(self) -> Value {
        let (inhale, hold_in, exhale, hold_out) = match self {
            BreathingTechnique::Box => (4, 4, 4, 4),
            BreathingTechnique::FourSevenEight => (4, 7, 8, 0),
            BreathingTechnique::Coherent => (5, 0, 5, 0),
        };
        json!({
            "inhale": inhale,
            "holdIn": hold_in,
            "exhale": exhale,
            "holdOut": hold_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::phase::PhaseSpec;

    #[test]
    fn defaults_are_startable() {
        for app in AppKind::ALL {
            let plan = app.default_plan();
            assert!(plan.total_session_seconds() > 0, "{app:?}");
            assert!(plan.active_phase_count() > 0, "{app:?}");
        }
        assert_eq!(AppKind::Pomodoro.default_plan().cycle_count, 4);
        assert!(AppKind::Countdown.default_plan().is_plain_countdown());
    }

    #[test]
    fn namespaces_are_unique() {
        let mut keys: Vec<_> = AppKind::ALL.iter().map(|app| app.namespace()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), AppKind::ALL.len());
    }

    #[test]
    fn four_seven_eight_has_no_final_hold() {
        let plan = AppKind::Breathing.plan_from_raw(
            &BreathingTechnique::FourSevenEight.raw_phases(),
            Some(&json!(3)),
            None,
        );
        assert_eq!(plan.phases[3], PhaseSpec::new("holdOut", 0));
        assert_eq!(plan.total_session_seconds(), 19 * 3);
    }

    #[test]
    fn countdown_cycles_are_pinned_to_one() {
        let plan = AppKind::Countdown.plan_from_raw(&json!({ "countdown": 90 }), Some(&json!(5)), None);
        assert_eq!(plan, PhasePlan::countdown(90));
    }

    #[test]
    fn all_zero_breathing_falls_back_to_a_startable_plan() {
        let zeros = json!({ "inhale": 0, "holdIn": "0", "exhale": 0, "holdOut": 0 });

        let plan = AppKind::Breathing.plan_from_raw(&zeros, None, None);
        assert_eq!(plan, AppKind::Breathing.default_plan());

        let last_good = PhasePlan::new(
            vec![
                PhaseSpec::new("inhale", 5),
                PhaseSpec::new("holdIn", 0),
                PhaseSpec::new("exhale", 5),
                PhaseSpec::new("holdOut", 0),
            ],
            6,
        );
        let plan = AppKind::Breathing.plan_from_raw(&zeros, None, Some(&last_good));
        assert_eq!(plan, last_good);

        let unusable = PhasePlan::new(
            ["inhale", "holdIn", "exhale", "holdOut"]
                .into_iter()
                .map(|key| PhaseSpec::new(key, 0))
                .collect(),
            2,
        );
        let plan = AppKind::Breathing.plan_from_raw(&Value::Null, None, Some(&unusable));
        assert_eq!(plan.phases, AppKind::Breathing.default_plan().phases);
        assert_eq!(plan.cycle_count, 2);
    }

    #[test]
    fn interval_uses_last_good_for_garbage() {
        let last_good = PhasePlan::new(
            vec![PhaseSpec::new("work", 40), PhaseSpec::new("rest", 20)],
            5,
        );
        let plan = AppKind::Interval.plan_from_raw(
            &json!({ "work": "abc", "rest": 1 }),
            Some(&json!("x")),
            Some(&last_good),
        );
        assert_eq!(
            plan,
            PhasePlan::new(vec![PhaseSpec::new("work", 40), PhaseSpec::new("rest", 5)], 5)
        );
    }
}
