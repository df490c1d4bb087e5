use crate::value::Value;

pub const DEFAULT_PPQN: i64 = 24;
pub const DEFAULT_STEP_DURATION: &str = "1/16";

/// Duration names indexed by `duration_index()` when no user list is configured.
pub const DEFAULT_NOTE_DURATIONS: &[&str] = &[
    "1/64", "1/32", "1/16t", "1/16", "1/8t", "1/8", "1/4t", "1/4", "1/2t", "1/2", "1", "1.5", "2",
    "3", "4",
];

/// Arpeggiator mode names indexed by `arp_mode_number()`.
pub const ARP_MODES: &[&str] = &[
    "as_played",
    "sorted",
    "outside_in",
    "random1",
    "random2",
    "first_note_repeat",
    "stutter",
    "stutter4",
    "stutter8",
    "stutter16",
];

pub const BUILTIN_SCALES: &[(&str, &[i64])] = &[
    ("major", &[0, 2, 4, 5, 7, 9, 11]),
    ("ionian", &[0, 2, 4, 5, 7, 9, 11]),
    ("dorian", &[0, 2, 3, 5, 7, 9, 10]),
    ("phrygian", &[0, 1, 3, 5, 7, 8, 10]),
    ("lydian", &[0, 2, 4, 6, 7, 9, 11]),
    ("mixolydian", &[0, 2, 4, 5, 7, 9, 10]),
    ("aeolian", &[0, 2, 3, 5, 7, 8, 10]),
    ("minor_natural", &[0, 2, 3, 5, 7, 8, 10]),
    ("locrian", &[0, 1, 3, 5, 6, 8, 10]),
    ("minor_harmonic", &[0, 2, 3, 5, 7, 8, 11]),
    ("minor_melodic_asc", &[0, 2, 3, 5, 7, 9, 11]),
    ("pentatonic_major", &[0, 2, 4, 7, 9]),
    ("pentatonic_minor", &[0, 3, 5, 7, 10]),
    ("pentatonic_blues", &[0, 3, 5, 6, 7, 10]),
    ("pentatonic_neutral", &[0, 2, 5, 7, 10]),
    ("chromatic", &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]),
    ("whole_tone", &[0, 2, 4, 6, 8, 10]),
    ("diminished_hw", &[0, 1, 3, 4, 6, 7, 9, 10]),
    ("diminished_wh", &[0, 2, 3, 5, 6, 8, 9, 11]),
    ("bebop_major", &[0, 2, 4, 5, 7, 8, 9, 11]),
    ("bebop_dorian", &[0, 2, 3, 5, 7, 9, 10, 11]),
    ("bebop_dominant", &[0, 2, 4, 5, 7, 9, 10, 11]),
    ("spanish_gypsy", &[0, 1, 4, 5, 7, 8, 11]),
    ("phrygian_dominant", &[0, 1, 4, 5, 7, 8, 10]),
    ("hungarian_minor", &[0, 2, 3, 6, 7, 8, 11]),
    ("double_harmonic", &[0, 1, 4, 5, 7, 8, 11]),
    ("hirajoshi", &[0, 2, 3, 7, 8]),
    ("in-sen", &[0, 1, 5, 7, 10]),
    ("iwato", &[0, 1, 5, 6, 10]),
    ("kumoi", &[0, 2, 3, 7, 9]),
    ("major_triad", &[0, 4, 7]),
    ("minor_triad", &[0, 3, 7]),
    ("dim_triad", &[0, 3, 6]),
    ("aug_triad", &[0, 4, 8]),
    ("dom7_chord", &[0, 4, 7, 10]),
    ("maj7_chord", &[0, 4, 7, 11]),
    ("min7_chord", &[0, 3, 7, 10]),
];

/// Ordered scale name → interval table. User scales override or extend the built-ins.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleTable {
    entries: Vec<(String, Vec<i64>)>,
}

impl Default for ScaleTable {
    fn default() -> Self {
        Self {
            entries: BUILTIN_SCALES
                .iter()
                .map(|(name, intervals)| (name.to_string(), intervals.to_vec()))
                .collect(),
        }
    }
}

impl ScaleTable {
    pub fn insert(&mut self, name: &str, intervals: Vec<i64>) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = intervals,
            None => self.entries.push((name.to_string(), intervals)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[i64]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, intervals)| intervals.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Scale table plus the user-ordered name lists used by the index builtins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MusicLibrary {
    pub scales: ScaleTable,
    pub scale_list: Vec<String>,
    pub duration_list: Vec<String>,
}

impl MusicLibrary {
    /// `scale_number(i)`: user list first, all known scales otherwise.
    pub fn scale_at(&self, index: i64) -> String {
        if !self.scale_list.is_empty() {
            return self.scale_list[wrap_index(index, self.scale_list.len())].clone();
        }
        self.scales
            .names()
            .nth(wrap_index(index, self.scales.len().max(1)))
            .unwrap_or("major")
            .to_string()
    }

    pub fn arp_mode_at(&self, index: i64) -> String {
        ARP_MODES[wrap_index(index, ARP_MODES.len())].to_string()
    }

    pub fn duration_at(&self, index: i64) -> String {
        if !self.duration_list.is_empty() {
            return self.duration_list[wrap_index(index, self.duration_list.len())].clone();
        }
        DEFAULT_NOTE_DURATIONS[wrap_index(index, DEFAULT_NOTE_DURATIONS.len())].to_string()
    }
}

/// Python-style modulo into `0..len`.
pub fn wrap_index(index: i64, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    index.rem_euclid(len as i64) as usize
}

/// Converts a step duration into ticks.
///
/// Integers are already ticks. Floats are multiples of a whole note (`4 * ppqn`).
/// Strings accept `"N/D"` fractions of a whole note, decimal whole-note multiples,
/// and a trailing `t` for triplets (x2/3). Anything else falls back to `ppqn / 4`.
pub fn parse_step_duration(input: &Value, ppqn: i64) -> i64 {
    let fallback = ppqn / 4;
    let whole = (ppqn * 4) as f64;
    match input {
        Value::Int(ticks) => *ticks,
        Value::Float(f) => (whole * f).round() as i64,
        Value::Str(s) => {
            let mut text = s.trim().to_lowercase();
            let mut multiplier = 1.0;
            if let Some(stripped) = text.strip_suffix('t') {
                multiplier = 2.0 / 3.0;
                text = stripped.to_string();
            }
            if let Some((num, den)) = parse_fraction(&text) {
                if den == 0 {
                    return fallback;
                }
                return ((whole / den as f64) * num as f64 * multiplier).round() as i64;
            }
            match text.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => (whole * v * multiplier).round() as i64,
                _ => fallback,
            }
        }
        _ => fallback,
    }
}

fn parse_fraction(text: &str) -> Option<(u64, u64)> {
    let (num, rest) = text.split_once('/')?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    Some((num.trim().parse().ok()?, digits.parse().ok()?))
}

/// Arpeggiator note-ordering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArpMode {
    AsPlayed,
    #[default]
    Sorted,
    OutsideIn,
    Random1,
    Random2,
    FirstNoteRepeat,
    Stutter(usize),
}

impl ArpMode {
    /// Unknown names fall back to `Sorted`.
    pub fn parse(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        if let Some(count) = name.strip_prefix("stutter") {
            let digits: String = count.chars().take_while(|c| c.is_ascii_digit()).collect();
            return ArpMode::Stutter(digits.parse().ok().filter(|n| *n > 0).unwrap_or(2));
        }
        match name.as_str() {
            "as_played" => ArpMode::AsPlayed,
            "outside_in" => ArpMode::OutsideIn,
            "random1" => ArpMode::Random1,
            "random2" => ArpMode::Random2,
            "first_note_repeat" => ArpMode::FirstNoteRepeat,
            _ => ArpMode::Sorted,
        }
    }

    pub fn uses_played_order(&self) -> bool {
        matches!(self, ArpMode::AsPlayed)
    }
}

/// Direction in which the arpeggiator walks its base notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArpDirection {
    #[default]
    Up,
    Down,
    UpDown,
    UpDownInclusive,
    RandomWalk,
    RandomJump,
}

impl ArpDirection {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "down" => ArpDirection::Down,
            "updown" => ArpDirection::UpDown,
            "updown_inclusive" => ArpDirection::UpDownInclusive,
            "random_walk" => ArpDirection::RandomWalk,
            "random_jump" => ArpDirection::RandomJump,
            _ => ArpDirection::Up,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArpDirection::Up => "up",
            ArpDirection::Down => "down",
            ArpDirection::UpDown => "updown",
            ArpDirection::UpDownInclusive => "updown_inclusive",
            ArpDirection::RandomWalk => "random_walk",
            ArpDirection::RandomJump => "random_jump",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OctaveMode {
    #[default]
    Up,
    Alternate,
}

impl OctaveMode {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "alternate" => OctaveMode::Alternate,
            _ => OctaveMode::Up,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dur(s: &str, ppqn: i64) -> i64 {
        parse_step_duration(&Value::Str(s.to_string()), ppqn)
    }

    #[test]
    fn test_fraction_durations() {
        assert_eq!(dur("1/16", 24), 6);
        assert_eq!(dur("1/4", 24), 24);
        assert_eq!(dur("1/16", 96), 24);
        assert_eq!(dur("3/8", 24), 36);
    }

    #[test]
    fn test_triplet_duration() {
        assert_eq!(dur("1/8t", 24), 8);
        assert_eq!(dur("1/4T", 24), 16);
    }

    #[test]
    fn test_numeric_durations() {
        assert_eq!(parse_step_duration(&Value::Int(12), 24), 12);
        assert_eq!(parse_step_duration(&Value::Float(0.25), 24), 24);
        assert_eq!(dur("1.5", 24), 144);
    }

    #[test]
    fn test_duration_fallbacks() {
        assert_eq!(dur("1/0", 24), 6);
        assert_eq!(dur("garbage", 24), 6);
        assert_eq!(parse_step_duration(&Value::Null, 96), 24);
    }

    #[test]
    fn test_scale_table_user_override() {
        let mut table = ScaleTable::default();
        let before = table.len();
        table.insert("major", vec![0, 4, 7]);
        table.insert("custom", vec![0, 1]);
        assert_eq!(table.get("major"), Some(&[0, 4, 7][..]));
        assert_eq!(table.len(), before + 1);
        assert_eq!(table.names().last(), Some("custom"));
    }

    #[test]
    fn test_library_index_lookups_wrap() {
        let mut lib = MusicLibrary::default();
        assert_eq!(lib.scale_at(0), "major");
        assert_eq!(lib.arp_mode_at(-1), "stutter16");
        assert_eq!(lib.duration_at(15), "1/64");
        lib.scale_list = vec!["dorian".into(), "lydian".into()];
        assert_eq!(lib.scale_at(3), "lydian");
    }

    #[test]
    fn test_arp_mode_parse() {
        assert_eq!(ArpMode::parse("stutter"), ArpMode::Stutter(2));
        assert_eq!(ArpMode::parse("stutter8"), ArpMode::Stutter(8));
        assert_eq!(ArpMode::parse("as_played"), ArpMode::AsPlayed);
        assert_eq!(ArpMode::parse("whatever"), ArpMode::Sorted);
    }
}
