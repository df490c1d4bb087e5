use cadence_types::Value;

use super::{EvalError, Scope};

pub(super) fn call(scope: &Scope<'_>, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    match name {
        "random" => {
            let [lo, hi] = exact::<2>(args)?;
            match (lo, hi) {
                (Value::Int(a), Value::Int(b)) => {
                    let (a, b) = if a > b { (b, a) } else { (a, b) };
                    Ok(Value::Int(scope.rng.range_inclusive(a, b)))
                }
                _ => Ok(Value::Null),
            }
        }
        "prob" => {
            let [p] = exact::<1>(args)?;
            let p = p.coerce_f64().ok_or(EvalError::Type("prob() needs a number"))?;
            Ok(Value::from(scope.rng.next_f64() < p))
        }
        "toggle" => {
            let [v] = exact::<1>(args)?;
            Ok(Value::from(v.coerce_i64() == Some(0)))
        }
        "chord" => chord(scope, args),
        "scale_number" => {
            let [index] = exact::<1>(args)?;
            Ok(Value::Str(match index.coerce_i64() {
                Some(i) => scope.library.scale_at(i),
                None => "major".to_string(),
            }))
        }
        "arp_mode_number" => {
            let [index] = exact::<1>(args)?;
            Ok(Value::Str(match index.coerce_i64() {
                Some(i) => scope.library.arp_mode_at(i),
                None => "as_played".to_string(),
            }))
        }
        "duration_index" => {
            let [index] = exact::<1>(args)?;
            Ok(Value::Str(match index.coerce_i64() {
                Some(i) => scope.library.duration_at(i),
                None => "1/16".to_string(),
            }))
        }
        "get_var" => get_var(scope, args),
        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

fn exact<const N: usize>(args: Vec<Value>) -> Result<[Value; N], EvalError> {
    args.try_into()
        .map_err(|_| EvalError::Type("wrong number of arguments"))
}

/// Notes are clamped to 0..=127, so longer chords only repeat the top note.
const MAX_CHORD_NOTES: i64 = 128;

/// `chord(root, n=3, scale='major')`
fn chord(scope: &Scope<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.is_empty() || args.len() > 3 {
        return Err(EvalError::Type("chord() takes 1 to 3 arguments"));
    }
    let mut args = args.into_iter();
    let root = args
        .next()
        .and_then(|v| v.coerce_i64())
        .ok_or(EvalError::Type("chord() root must be a number"))?;
    let count = args
        .next()
        .and_then(|v| v.coerce_i64())
        .unwrap_or(3)
        .clamp(0, MAX_CHORD_NOTES);
    let scale = args.next().unwrap_or_else(|| Value::from("major"));

    let note = |offset: i64| {
        root.checked_add(offset)
            .map(|n| Value::Int(n.clamp(0, 127)))
            .ok_or(EvalError::Overflow)
    };
    match scale {
        Value::List(intervals) => {
            let intervals: Vec<i64> = intervals.iter().filter_map(Value::coerce_i64).collect();
            if intervals.is_empty() {
                return Ok(Value::List(vec![Value::Int(root)]));
            }
            let notes = intervals.iter().map(|i| note(*i)).collect::<Result<_, _>>()?;
            Ok(Value::List(notes))
        }
        Value::Str(name) => match scope.library.scales.get(name.trim()) {
            Some(intervals) if !intervals.is_empty() => {
                let notes = (0..count as usize)
                    .map(|i| {
                        let octave = (i / intervals.len()) as i64;
                        12i64
                            .checked_mul(octave)
                            .and_then(|o| o.checked_add(intervals[i % intervals.len()]))
                            .ok_or(EvalError::Overflow)
                            .and_then(&note)
                    })
                    .collect::<Result<_, _>>()?;
                Ok(Value::List(notes))
            }
            _ => Ok(Value::List(vec![Value::Int(root)])),
        },
        _ => Ok(Value::List(vec![Value::Int(root)])),
    }
}

/// `get_var(name, index[, sequencer])`
///
/// With a sequencer index only that sequencer is read. Otherwise `ch_` names
/// read channel arrays, list-valued user variables are indexed directly, and
/// finally the arrays of the sequencer currently being stepped are tried.
fn get_var(scope: &Scope<'_>, args: Vec<Value>) -> Result<Value, EvalError> {
    if args.len() < 2 || args.len() > 3 {
        return Err(EvalError::Type("get_var() takes 2 or 3 arguments"));
    }
    let Value::Str(name) = &args[0] else {
        return Ok(Value::Int(0));
    };
    let name = name.trim();
    let index = args[1].as_i64().unwrap_or(0);
    if index < 0 {
        return Ok(Value::Int(0));
    }
    let index = index as usize;

    let found = if let Some(Value::Int(seq)) = args.get(2) {
        usize::try_from(*seq)
            .ok()
            .and_then(|seq| scope.arrays.sequencer_value(seq, name, index))
    } else if name.starts_with("ch_") {
        scope.arrays.channel_value(name, index)
    } else if let Some(var) = scope.vars.get(name) {
        var.as_list().and_then(|items| items.get(index).cloned())
    } else {
        scope
            .current_sequencer
            .and_then(|seq| scope.arrays.sequencer_value(seq, name, index))
    };
    Ok(found.unwrap_or(Value::Int(0)))
}

#[cfg(test)]
mod tests {
    use cadence_types::{ConfigValue, MusicLibrary};

    use crate::eval::{ArraySource, EvalContext, Scope};
    use crate::rng::Rng;
    use crate::variables::UserVariables;

    use super::*;

    struct Arrays;

    impl ArraySource for Arrays {
        fn sequencer_value(&self, sequencer: usize, name: &str, index: usize) -> Option<Value> {
            (sequencer == 1 && name == "seq_note").then(|| Value::Int(60 + index as i64))
        }

        fn channel_value(&self, name: &str, index: usize) -> Option<Value> {
            (name == "ch_mode" && index < 16).then_some(Value::Int(9))
        }
    }

    fn eval_with(vars: &UserVariables, current: Option<usize>, src: &str) -> Value {
        let ctx = EvalContext::new();
        let library = MusicLibrary::default();
        let rng = Rng::new(11);
        let scope = Scope {
            ctx: &ctx,
            vars,
            library: &library,
            arrays: &Arrays,
            rng: &rng,
            current_sequencer: current,
            source: "test",
        };
        scope.evaluate(&ConfigValue::Str(src.to_string()))
    }

    fn ints(values: &[i64]) -> Value {
        Value::List(values.iter().map(|v| Value::Int(*v)).collect())
    }

    #[test]
    fn test_chord_from_scale_name() {
        let vars = UserVariables::default();
        assert_eq!(eval_with(&vars, None, "chord(60, 3, 'major')"), ints(&[60, 62, 64]));
        assert_eq!(
            eval_with(&vars, None, "chord(60, 4, 'major_triad')"),
            ints(&[60, 64, 67, 72])
        );
    }

    #[test]
    fn test_chord_from_intervals_ignores_count() {
        let vars = UserVariables::default();
        assert_eq!(eval_with(&vars, None, "chord(120, 1, [0, 4, 12])"), ints(&[120, 124, 127]));
    }

    #[test]
    fn test_chord_overflow_is_an_error() {
        let vars = UserVariables::default();
        let src = "chord(9223372036854775807, 3, 'major')";
        assert_eq!(eval_with(&vars, None, src), Value::from(src));
        let src = "chord(9223372036854775807, 1, [0, 4])";
        assert_eq!(eval_with(&vars, None, src), Value::from(src));
    }

    #[test]
    fn test_chord_note_count_is_capped() {
        let vars = UserVariables::default();
        let Value::List(notes) = eval_with(&vars, None, "chord(60, 1000000000, 'major')") else {
            panic!("chord() should return a list");
        };
        assert_eq!(notes.len(), MAX_CHORD_NOTES as usize);
        assert_eq!(notes.last(), Some(&Value::Int(127)));
    }

    #[test]
    fn test_chord_unknown_scale() {
        let vars = UserVariables::default();
        assert_eq!(eval_with(&vars, None, "chord(60, 3, 'nope')"), ints(&[60]));
    }

    #[test]
    fn test_index_builtins() {
        let vars = UserVariables::default();
        assert_eq!(eval_with(&vars, None, "scale_number(2)"), Value::from("dorian"));
        assert_eq!(eval_with(&vars, None, "arp_mode_number(11)"), Value::from("sorted"));
        assert_eq!(eval_with(&vars, None, "duration_index(3)"), Value::from("1/16"));
    }

    #[test]
    fn test_get_var_priority() {
        let mut vars = UserVariables::default();
        vars.insert("pattern", ints(&[5, 6, 7]));
        assert_eq!(eval_with(&vars, None, "get_var('seq_note', 2, 1)"), Value::Int(62));
        assert_eq!(eval_with(&vars, None, "get_var('seq_note', 2, 0)"), Value::Int(0));
        assert_eq!(eval_with(&vars, None, "get_var('ch_mode', 3)"), Value::Int(9));
        assert_eq!(eval_with(&vars, None, "get_var('pattern', 1)"), Value::Int(6));
        assert_eq!(eval_with(&vars, None, "get_var('pattern', 9)"), Value::Int(0));
        assert_eq!(eval_with(&vars, Some(1), "get_var('seq_note', 0)"), Value::Int(60));
        assert_eq!(eval_with(&vars, None, "get_var('seq_note', 0)"), Value::Int(0));
    }

    #[test]
    fn test_prob_extremes() {
        let vars = UserVariables::default();
        assert_eq!(eval_with(&vars, None, "prob(1.0)"), Value::Int(1));
        assert_eq!(eval_with(&vars, None, "prob(0)"), Value::Int(0));
    }
}
