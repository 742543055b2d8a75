use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One named segment of a session, e.g. `work` or `inhale`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSpec {
    pub key: String,
    #[serde(default)]
    pub duration_seconds: u32,
}

impl PhaseSpec {
    pub fn new(key: impl Into<String>, duration_seconds: u32) -> Self {
        Self {
            key: key.into(),
            duration_seconds,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        i64::from(self.duration_seconds) * 1000
    }

    /// Zero-duration phases exist in the template but are skipped when sequencing.
    pub fn is_active(&self) -> bool {
        self.duration_seconds > 0
    }
}

fn default_cycle_count() -> u32 {
    1
}

/// Session template: the phase list is traversed `cycle_count` times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhasePlan {
    #[serde(default)]
    pub phases: Vec<PhaseSpec>,
    #[serde(default = "default_cycle_count")]
    pub cycle_count: u32,
}

impl Default for PhasePlan {
    fn default() -> Self {
        Self {
            phases: Vec::new(),
            cycle_count: 1,
        }
    }
}

impl PhasePlan {
    pub fn new(phases: Vec<PhaseSpec>, cycle_count: u32) -> Self {
        Self {
            phases,
            cycle_count: cycle_count.max(1),
        }
    }

    pub fn countdown(seconds: u32) -> Self {
        Self::new(vec![PhaseSpec::new("countdown", seconds)], 1)
    }

    pub fn phase(&self, index: usize) -> Option<&PhaseSpec> {
        self.phases.get(index)
    }

    pub fn cycle_seconds(&self) -> u64 {
        self.phases
            .iter()
            .map(|phase| u64::from(phase.duration_seconds))
            .sum()
    }

    pub fn total_session_seconds(&self) -> u64 {
        self.cycle_seconds()
            .saturating_mul(u64::from(self.cycle_count))
    }

    pub fn total_session_ms(&self) -> i64 {
        i64::try_from(self.total_session_seconds().saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    pub fn active_phase_count(&self) -> usize {
        self.phases.iter().filter(|phase| phase.is_active()).count()
    }

    /// A single active phase run once: the only shape that accepts extra time.
    pub fn is_plain_countdown(&self) -> bool {
        self.cycle_count == 1 && self.active_phase_count() == 1
    }
}

/// Where a running session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePosition {
    pub cycle: u32,
    pub index: usize,
}

pub fn first_active_phase_index(specs: &[PhaseSpec]) -> Option<usize> {
    specs.iter().position(PhaseSpec::is_active)
}

/// Next phase with a positive duration after `(current_cycle, current_index)`,
/// wrapping into the next cycle. `None` once the walk leaves the last cycle.
pub fn next_active_phase(
    specs: &[PhaseSpec],
    cycle_count: u32,
    current_cycle: u32,
    current_index: usize,
) -> Option<PhasePosition> {
    let len = specs.len();
    if len == 0 {
        return None;
    }

    let mut cycle = current_cycle;
    let mut index = current_index;
    for _ in 0..2 * len {
        index += 1;
        if index >= len {
            index = 0;
            cycle += 1;
        }
        if cycle > cycle_count {
            return None;
        }
        if specs[index].is_active() {
            return Some(PhasePosition { cycle, index });
        }
    }

    None
}

/// Accepted range and fallback for one phase of a utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRule {
    pub key: &'static str,
    pub min_seconds: u32,
    pub max_seconds: u32,
    pub default_seconds: u32,
}

impl PhaseRule {
    pub const fn new(key: &'static str, min_seconds: u32, max_seconds: u32, default_seconds: u32) -> Self {
        Self {
            key,
            min_seconds,
            max_seconds,
            default_seconds,
        }
    }

    fn clamp(&self, seconds: u32) -> u32 {
        seconds.clamp(self.min_seconds, self.max_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleRule {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

/// Reads a user-entered number. Accepts JSON numbers and numeric strings;
/// anything else (missing, NaN, text) yields `None`.
fn parse_seconds(raw: Option<&Value>) -> Option<u32> {
    let value = match raw? {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };

    if !value.is_finite() {
        return None;
    }

    Some(value.round().clamp(0.0, f64::from(u32::MAX)) as u32)
}

/// Builds a usable phase list from raw form input keyed by phase key.
///
/// Each value is clamped into its rule's range. Unusable input falls back to
/// the matching phase of `last_good`, then to the rule default.
pub fn validate_durations(
    rules: &[PhaseRule],
    raw: &Value,
    last_good: Option<&[PhaseSpec]>,
) -> Vec<PhaseSpec> {
    rules
        .iter()
        .map(|rule| {
            let seconds = parse_seconds(raw.get(rule.key))
                .or_else(|| {
                    last_good?
                        .iter()
                        .find(|phase| phase.key == rule.key)
                        .map(|phase| phase.duration_seconds)
                })
                .unwrap_or(rule.default_seconds);
            PhaseSpec::new(rule.key, rule.clamp(seconds))
        })
        .collect()
}

pub fn validate_cycle_count(rule: CycleRule, raw: Option<&Value>, last_good: Option<u32>) -> u32 {
    parse_seconds(raw)
        .or(last_good)
        .unwrap_or(rule.default)
        .clamp(rule.min.max(1), rule.max.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn breathing(hold_out: u32) -> Vec<PhaseSpec> {
        vec![
            PhaseSpec::new("inhale", 4),
            PhaseSpec::new("holdIn", 0),
            PhaseSpec::new("exhale", 4),
            PhaseSpec::new("holdOut", hold_out),
        ]
    }

    #[test]
    fn first_active_skips_leading_zero_phases() {
        let specs = vec![PhaseSpec::new("a", 0), PhaseSpec::new("b", 3)];
        assert_eq!(first_active_phase_index(&specs), Some(1));
        assert_eq!(first_active_phase_index(&[PhaseSpec::new("a", 0)]), None);
        assert_eq!(first_active_phase_index(&[]), None);
    }

    #[test]
    fn next_active_skips_zero_duration_phases() {
        let specs = breathing(0);

        assert_eq!(
            next_active_phase(&specs, 2, 1, 0),
            Some(PhasePosition { cycle: 1, index: 2 })
        );
        // exhale → next cycle's inhale, never holdOut
        assert_eq!(
            next_active_phase(&specs, 2, 1, 2),
            Some(PhasePosition { cycle: 2, index: 0 })
        );
        assert_eq!(next_active_phase(&specs, 2, 2, 2), None);
    }

    #[test]
    fn next_active_wraps_single_phase_lists() {
        let specs = vec![PhaseSpec::new("work", 10)];
        assert_eq!(
            next_active_phase(&specs, 3, 1, 0),
            Some(PhasePosition { cycle: 2, index: 0 })
        );
        assert_eq!(next_active_phase(&specs, 3, 3, 0), None);
    }

    #[test]
    fn next_active_gives_up_on_empty_lists() {
        let specs = vec![PhaseSpec::new("a", 0), PhaseSpec::new("b", 0)];
        assert_eq!(next_active_phase(&specs, 100, 1, 0), None);
        assert_eq!(next_active_phase(&[], 1, 1, 0), None);
    }

    #[test]
    fn plan_totals() {
        let plan = PhasePlan::new(breathing(4), 3);
        assert_eq!(plan.cycle_seconds(), 12);
        assert_eq!(plan.total_session_seconds(), 36);
        assert_eq!(plan.total_session_ms(), 36_000);
        assert!(!plan.is_plain_countdown());
        assert!(PhasePlan::countdown(60).is_plain_countdown());
        assert_eq!(PhasePlan::new(vec![], 0).cycle_count, 1);
    }

    #[test]
    fn validate_clamps_and_falls_back() {
        let rules = [
            PhaseRule::new("work", 5, 3600, 30),
            PhaseRule::new("rest", 5, 3600, 10),
        ];
        let last_good = vec![PhaseSpec::new("rest", 45)];

        let specs = validate_durations(&rules, &json!({ "work": 2 }), Some(&last_good));
        assert_eq!(specs, vec![PhaseSpec::new("work", 5), PhaseSpec::new("rest", 45)]);

        let specs = validate_durations(&rules, &json!({ "work": "90", "rest": "soon" }), None);
        assert_eq!(specs, vec![PhaseSpec::new("work", 90), PhaseSpec::new("rest", 10)]);

        let specs = validate_durations(&rules, &json!({ "work": 99999.4, "rest": null }), None);
        assert_eq!(specs[0].duration_seconds, 3600);
        assert_eq!(specs[1].duration_seconds, 10);
    }

    #[test]
    fn validate_accepts_non_object_input() {
        let rules = [PhaseRule::new("inhale", 0, 30, 4)];
        let specs = validate_durations(&rules, &Value::Null, None);
        assert_eq!(specs, vec![PhaseSpec::new("inhale", 4)]);
    }

    #[test]
    fn cycle_count_policy() {
        let rule = CycleRule { min: 1, max: 12, default: 4 };
        assert_eq!(validate_cycle_count(rule, Some(&json!(0)), None), 1);
        assert_eq!(validate_cycle_count(rule, Some(&json!("40")), None), 12);
        assert_eq!(validate_cycle_count(rule, Some(&json!([])), Some(6)), 6);
        assert_eq!(validate_cycle_count(rule, None, None), 4);
    }

    #[test]
    fn plan_deserializes_with_missing_fields() {
        let plan: PhasePlan =
            serde_json::from_value(json!({ "phases": [{ "key": "work" }], "extra": true }))
                .expect("plan");
        assert_eq!(plan.cycle_count, 1);
        assert_eq!(plan.phases[0].duration_seconds, 0);
    }
}
