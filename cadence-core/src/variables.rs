use std::collections::HashMap;

use cadence_types::Value;

pub const CHANNEL_ARRAY_LEN: usize = 16;

/// Process-lifetime named values, written only by assignment actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserVariables {
    values: HashMap<String, Value>,
}

impl UserVariables {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Assigns `value` coerced to the variable's current kind.
    /// Returns true when the stored value changed.
    pub fn assign(&mut self, name: &str, value: Value) -> bool {
        let Some(slot) = self.values.get_mut(name) else {
            return false;
        };
        let coerced = slot.coerce_like(value);
        if *slot == coerced {
            return false;
        }
        *slot = coerced;
        true
    }

    pub fn global_transpose(&self) -> i64 {
        self.get("global_transpose").and_then(Value::as_i64).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 16-slot arrays addressed by channel, created on first write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelArrays {
    arrays: HashMap<String, Vec<Value>>,
}

impl ChannelArrays {
    pub fn get(&self, name: &str, index: usize) -> Option<&Value> {
        self.arrays.get(name).and_then(|a| a.get(index))
    }

    /// Writes in range only; the array is created zero-filled on first use.
    pub fn set(&mut self, name: &str, index: usize, value: Value) -> bool {
        let array = self
            .arrays
            .entry(name.to_string())
            .or_insert_with(|| vec![Value::Int(0); CHANNEL_ARRAY_LEN]);
        match array.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_coerces_to_existing_kind() {
        let mut vars = UserVariables::default();
        vars.insert("octave", Value::Int(0));
        assert!(vars.assign("octave", Value::Float(2.6)));
        assert_eq!(vars.get("octave"), Some(&Value::Int(2)));
        assert!(!vars.assign("octave", Value::Int(2)));
    }

    #[test]
    fn test_assign_unknown_is_ignored() {
        let mut vars = UserVariables::default();
        assert!(!vars.assign("missing", Value::Int(1)));
        assert!(vars.get("missing").is_none());
    }

    #[test]
    fn test_channel_array_bounds() {
        let mut arrays = ChannelArrays::default();
        assert!(arrays.set("ch_program", 3, Value::Int(12)));
        assert!(!arrays.set("ch_program", 16, Value::Int(1)));
        assert_eq!(arrays.get("ch_program", 3), Some(&Value::Int(12)));
        assert_eq!(arrays.get("ch_program", 0), Some(&Value::Int(0)));
    }
}
