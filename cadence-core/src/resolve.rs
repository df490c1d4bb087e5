use cadence_types::{ConfigValue, ScaleDirective, ScaleNotesDirective, Value};

use crate::eval::Scope;

impl<'a> Scope<'a> {
    /// Resolves a parameter, applying range scaling and scale quantization
    /// directives. Unresolvable or malformed parameters yield `default`.
    pub fn resolve(&self, cfg: &ConfigValue, default: Value) -> Value {
        match cfg {
            ConfigValue::Null => default,
            ConfigValue::Scale(directive) => self.resolve_scaled(directive).unwrap_or(default),
            ConfigValue::ScaleNotes(directive) => {
                self.resolve_scale_notes(directive).unwrap_or(default)
            }
            other => match self.evaluate(other) {
                Value::Null => default,
                value => value,
            },
        }
    }

    pub fn resolve_opt(&self, cfg: Option<&ConfigValue>, default: Value) -> Value {
        match cfg {
            Some(cfg) => self.resolve(cfg, default),
            None => default,
        }
    }

    /// Like [`Scope::resolve_opt`] but keeps fractional literals.
    pub fn resolve_exact(&self, cfg: Option<&ConfigValue>, default: Value) -> Value {
        match cfg {
            None | Some(ConfigValue::Null) => default,
            Some(cfg @ (ConfigValue::Scale(_) | ConfigValue::ScaleNotes(_))) => {
                self.resolve(cfg, default)
            }
            Some(other) => match self.evaluate_exact(other) {
                Value::Null => default,
                value => value,
            },
        }
    }

    pub fn resolve_int(&self, cfg: Option<&ConfigValue>, default: i64) -> i64 {
        self.resolve_opt(cfg, Value::Int(default))
            .coerce_i64()
            .unwrap_or(default)
    }

    pub fn resolve_float(&self, cfg: Option<&ConfigValue>, default: f64) -> f64 {
        self.resolve_exact(cfg, Value::Float(default))
            .coerce_f64()
            .unwrap_or(default)
    }

    pub fn resolve_bool(&self, cfg: Option<&ConfigValue>, default: bool) -> bool {
        self.resolve_opt(cfg, Value::from(default)).is_truthy()
    }

    fn resolve_scaled(&self, directive: &ScaleDirective) -> Option<Value> {
        let source = self.evaluate(&directive.source);
        if source.is_null() {
            log::warn!(target: "resolve", "[{}] scale_value source {:?} not found", self.source, directive.source);
            return None;
        }
        let Some(input) = source.coerce_i64() else {
            log::warn!(target: "resolve", "[{}] scale_value source resolved to non-number '{}'", self.source, source);
            return None;
        };
        let (Some((min_in, max_in)), Some((min_out, max_out))) = (directive.range_in, directive.range_out)
        else {
            log::warn!(target: "resolve", "[{}] malformed range in scale_value", self.source);
            return None;
        };
        Some(Value::Int(scale_linear(
            input,
            (min_in.trunc() as i64, max_in.trunc() as i64),
            (min_out.trunc() as i64, max_out.trunc() as i64),
        )))
    }

    fn resolve_scale_notes(&self, directive: &ScaleNotesDirective) -> Option<Value> {
        let (Some(value), Some(root), Some(scale_type)) =
            (&directive.value, &directive.root, &directive.scale_type)
        else {
            log::warn!(target: "resolve", "[{}] scale_notes needs scale_value, scale_root and scale_type", self.source);
            return None;
        };
        match (self.evaluate(value), self.evaluate(root), self.evaluate(scale_type)) {
            (Value::Int(note), Value::Int(root), Value::Str(name)) => {
                let quantized = match self.library.scales.get(&name) {
                    Some(intervals) => quantize_to_scale(note, root, intervals),
                    None => note,
                };
                Some(Value::Int(quantized))
            }
            (note, root, name) => {
                log::warn!(
                    target: "resolve",
                    "[{}] invalid scale_notes parameters: value={} root={} type={}",
                    self.source, note, root, name
                );
                None
            }
        }
    }
}

/// Clamp `input` into the input range and map it linearly onto the output range.
pub fn scale_linear(input: i64, (min_in, max_in): (i64, i64), (min_out, max_out): (i64, i64)) -> i64 {
    let normalized = if max_in == min_in {
        if input <= min_in {
            0.0
        } else {
            1.0
        }
    } else {
        let lo = min_in.min(max_in);
        let hi = min_in.max(max_in);
        let clamped = input.clamp(lo, hi);
        (clamped - min_in) as f64 / (max_in - min_in) as f64
    };
    (normalized * (max_out - min_out) as f64 + min_out as f64).round() as i64
}

/// Snap `value` down to the nearest pitch in the scale built on `root`.
///
/// In-scale notes pass through. Otherwise the nearest scale pitch-class below
/// is used; when none exists in this octave the highest pitch-class of the
/// previous octave is taken.
pub fn quantize_to_scale(value: i64, root: i64, intervals: &[i64]) -> i64 {
    if intervals.is_empty() {
        return value;
    }
    let pitch_class = value.rem_euclid(12);
    let octave = value.div_euclid(12);
    let root_class = root.rem_euclid(12);

    let mut classes: Vec<i64> = intervals
        .iter()
        .map(|i| (root_class + i).rem_euclid(12))
        .collect();
    classes.sort_unstable();
    classes.dedup();

    if classes.contains(&pitch_class) {
        return value;
    }
    match classes.iter().rev().find(|pc| **pc < pitch_class) {
        Some(below) => octave * 12 + below,
        None => (octave - 1) * 12 + classes[classes.len() - 1],
    }
}

#[cfg(test)]
mod tests {
    use cadence_types::MusicLibrary;
    use serde_json::json;

    use crate::eval::{EvalContext, NoArrays};
    use crate::rng::Rng;
    use crate::variables::UserVariables;

    use super::*;

    const MAJOR: &[i64] = &[0, 2, 4, 5, 7, 9, 11];

    #[test]
    fn test_quantize_major_root_c() {
        assert_eq!(quantize_to_scale(61, 0, MAJOR), 60);
        assert_eq!(quantize_to_scale(60, 0, MAJOR), 60);
        assert_eq!(quantize_to_scale(66, 0, MAJOR), 65);
    }

    #[test]
    fn test_quantize_wraps_to_previous_octave() {
        // pitch classes {2, 4, 6, 9, 11}: 60 (pc 0) has nothing below it.
        let d_major_pentatonic = &[0, 2, 4, 7, 9];
        assert_eq!(quantize_to_scale(60, 2, d_major_pentatonic), 59);
    }

    #[test]
    fn test_quantize_never_snaps_up() {
        for note in 0..128 {
            assert!(quantize_to_scale(note, 5, MAJOR) <= note);
        }
    }

    #[test]
    fn test_scale_linear() {
        assert_eq!(scale_linear(64, (0, 127), (0, 127)), 64);
        assert_eq!(scale_linear(127, (0, 127), (0, 10)), 10);
        assert_eq!(scale_linear(200, (0, 127), (0, 10)), 10);
        assert_eq!(scale_linear(5, (5, 5), (10, 20)), 10);
        assert_eq!(scale_linear(6, (5, 5), (10, 20)), 20);
    }

    fn resolve_json(ctx: &EvalContext, cfg: serde_json::Value, default: Value) -> Value {
        let vars = UserVariables::default();
        let library = MusicLibrary::default();
        let rng = Rng::default();
        let scope = Scope {
            ctx,
            vars: &vars,
            library: &library,
            arrays: &NoArrays,
            rng: &rng,
            current_sequencer: None,
            source: "test",
        };
        scope.resolve(&ConfigValue::from_json(&cfg), default)
    }

    fn cc_ctx(value: u8) -> EvalContext {
        EvalContext::from_message(&cadence_types::MidiMessage::ControlChange {
            channel: 0,
            control: 1,
            value,
        })
    }

    #[test]
    fn test_resolve_scale_value_directive() {
        let out = resolve_json(
            &cc_ctx(127),
            json!({"scale_value": "value_2", "range_in": [0, 127], "range_out": [40, 80]}),
            Value::Int(-1),
        );
        assert_eq!(out, Value::Int(80));
    }

    #[test]
    fn test_resolve_scale_value_malformed_range_uses_default() {
        let out = resolve_json(
            &cc_ctx(10),
            json!({"scale_value": "value_2", "range_out": ["a", 3]}),
            Value::Int(-1),
        );
        assert_eq!(out, Value::Int(-1));
    }

    #[test]
    fn test_resolve_scale_notes_directive() {
        let ctx = EvalContext::from_message(&cadence_types::MidiMessage::NoteOn {
            channel: 0,
            note: 61,
            velocity: 90,
        });
        let out = resolve_json(
            &ctx,
            json!({"scale_notes": {"scale_value": "value_1", "scale_root": 0, "scale_type": "major"}}),
            Value::Int(-1),
        );
        assert_eq!(out, Value::Int(60));
    }

    #[test]
    fn test_resolve_scale_notes_missing_component() {
        let out = resolve_json(
            &cc_ctx(10),
            json!({"scale_notes": {"scale_value": 60, "scale_type": "major"}}),
            Value::Int(-1),
        );
        assert_eq!(out, Value::Int(-1));
    }

    #[test]
    fn test_resolve_null_falls_back() {
        let out = resolve_json(&cc_ctx(10), json!(null), Value::Int(7));
        assert_eq!(out, Value::Int(7));
    }
}
