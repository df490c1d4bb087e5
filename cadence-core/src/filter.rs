//! Rule gates and the field-condition grammar.
//!
//! A condition is one of: a literal (equality), a list (membership), a
//! `"min-max"` range, an `"op N"` comparison, or an expression whose result is
//! compared the same way.

use std::sync::OnceLock;

use regex::Regex;

use cadence_types::{ConfigValue, EventType, MidiMessage, Value};

use crate::eval::Scope;
use crate::ports::name_matches;
use crate::rules::{RuleConfig, RuleSet};

fn range_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*(\d+)\s*-\s*(\d+)\s*$").expect("valid range regex"))
}

fn comparison_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(>=|<=|>|<|==)\s*(-?\d+)\s*$").expect("valid comparison regex")
    })
}

/// `"10-20"` and `">= 64"` style conditions. `None` when `text` is neither.
fn check_pattern(text: &str, actual: i64) -> Option<bool> {
    if let Some(caps) = range_pattern().captures(text) {
        let min: i64 = caps[1].parse().ok()?;
        let max: i64 = caps[2].parse().ok()?;
        return Some(min <= actual && actual <= max);
    }
    let caps = comparison_pattern().captures(text)?;
    let limit: i64 = caps[2].parse().ok()?;
    Some(match &caps[1] {
        ">" => actual > limit,
        ">=" => actual >= limit,
        "<" => actual < limit,
        "<=" => actual <= limit,
        _ => actual == limit,
    })
}

fn check_value(expected: &Value, actual: i64) -> bool {
    let actual_value = Value::Int(actual);
    match expected {
        Value::Int(_) | Value::Float(_) => expected.loose_eq(&actual_value),
        Value::List(items) => items.iter().any(|item| item.loose_eq(&actual_value)),
        Value::Str(text) => check_pattern(text, actual).unwrap_or(false),
        Value::Null => false,
    }
}

/// Tests one field condition. A field the event does not carry never matches.
pub fn check_condition(scope: &Scope<'_>, cond: &ConfigValue, actual: Option<i64>) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    if let ConfigValue::Str(text) = cond {
        if let Some(result) = check_pattern(text, actual) {
            return result;
        }
    }
    check_value(&scope.evaluate(cond), actual)
}

/// True when `event` is named by one of the `event_in` entries.
/// `note` stands for both note events, `cc` and `pc` for their long names.
pub fn event_matches(conditions: &[String], event: EventType) -> bool {
    conditions.iter().any(|cond| match cond.as_str() {
        "note" => event.is_note(),
        "cc" => event == EventType::ControlChange,
        "pc" => event == EventType::ProgramChange,
        other => other == event.name(),
    })
}

pub fn version_admits(rule: &RuleConfig, version: i64) -> bool {
    rule.version.as_ref().map_or(true, |cond| cond.admits(version))
}

/// Live MIDI gate: the rule's input alias must resolve to a substring of the port name.
pub fn device_admits(rule: &RuleConfig, rules: &RuleSet, port: &str) -> bool {
    match rule.device_in() {
        Some(alias) => name_matches(port, rules.resolve_alias(alias)),
        None => false,
    }
}

/// Event-type and field conditions for a live message.
pub fn conditions_hold(rule: &RuleConfig, scope: &Scope<'_>, message: &MidiMessage) -> bool {
    let message = message.normalized();
    if let Some(events) = &rule.event_in {
        if !event_matches(events, message.event_type()) {
            return false;
        }
    }
    let value2 = match message {
        MidiMessage::ProgramChange { .. } => None,
        other => Some(i64::from(other.value2())),
    };
    let checks = [
        (&rule.ch_in, Some(i64::from(message.channel()) + 1)),
        (&rule.value_1_in, Some(i64::from(message.value1()))),
        (&rule.value_2_in, value2),
    ];
    checks.iter().all(|(cond, actual)| match cond {
        Some(cond) => check_condition(scope, cond, *actual),
        None => true,
    })
}
