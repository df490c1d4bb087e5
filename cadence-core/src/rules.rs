//! Rule file decoding.
//!
//! A rule file is one JSON document. Every parameter leaf is decoded into a
//! [`ConfigValue`] here, once; the engine never looks at raw JSON again.
//! Malformed entries are skipped with a warning so one typo does not take the
//! whole file down.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value as Json};

use cadence_types::{ConfigValue, EventType, MusicLibrary, Value};

#[derive(Debug)]
pub enum RuleError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleError::Io(e) => write!(f, "could not read rule file: {}", e),
            RuleError::Json(e) => write!(f, "rule file is not valid JSON: {}", e),
            RuleError::Invalid(msg) => write!(f, "invalid rule file: {}", msg),
        }
    }
}

impl std::error::Error for RuleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuleError::Io(e) => Some(e),
            RuleError::Json(e) => Some(e),
            RuleError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for RuleError {
    fn from(e: std::io::Error) -> Self {
        RuleError::Io(e)
    }
}

impl From<serde_json::Error> for RuleError {
    fn from(e: serde_json::Error) -> Self {
        RuleError::Json(e)
    }
}

/// `note(expr)`, `cc(expr)`, ... keys on filters and output blocks.
fn shortcut_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(note|note_on|note_off|cc|pc)\s*\((.+)\)\s*$").expect("valid shortcut regex")
    })
}

/// Splits a shortcut key into its event type and value expression.
pub fn parse_shortcut(key: &str) -> Option<(EventType, String)> {
    let caps = shortcut_pattern().captures(key)?;
    let event = EventType::parse(caps.get(1)?.as_str())?;
    Some((event, caps.get(2)?.as_str().trim().to_string()))
}

/// Which version(s) a filter is active in.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionCondition {
    One(i64),
    Any(Vec<i64>),
}

impl VersionCondition {
    fn from_json(json: &Json) -> Option<Self> {
        match json {
            Json::Number(n) => n.as_i64().map(VersionCondition::One),
            Json::Array(items) => Some(VersionCondition::Any(
                items.iter().filter_map(Json::as_i64).collect(),
            )),
            _ => None,
        }
    }

    pub fn admits(&self, version: i64) -> bool {
        match self {
            VersionCondition::One(v) => *v == version,
            VersionCondition::Any(vs) => vs.contains(&version),
        }
    }

    fn versions(&self) -> Vec<i64> {
        match self {
            VersionCondition::One(v) => vec![*v],
            VersionCondition::Any(vs) => vs.clone(),
        }
    }
}

/// Control-change input interpretation for a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CcInputMode {
    #[default]
    Abs,
    RelativeSigned,
    RelativeTwosComplement,
    AbsRelative,
    AbsCatchup,
}

impl CcInputMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "abs" => Some(CcInputMode::Abs),
            "relative_signed" => Some(CcInputMode::RelativeSigned),
            "relative_2c" => Some(CcInputMode::RelativeTwosComplement),
            "abs_relative" => Some(CcInputMode::AbsRelative),
            "abs_catchup" => Some(CcInputMode::AbsCatchup),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CcInputMode::Abs => "abs",
            CcInputMode::RelativeSigned => "relative_signed",
            CcInputMode::RelativeTwosComplement => "relative_2c",
            CcInputMode::AbsRelative => "abs_relative",
            CcInputMode::AbsCatchup => "abs_catchup",
        }
    }
}

/// One `set_var` element.
#[derive(Debug, Clone, PartialEq)]
pub struct SetVarEntry {
    pub name: String,
    pub index: ConfigValue,
    pub value: ConfigValue,
    pub sequencer_index: Option<ConfigValue>,
}

/// `send_osc: {target, address?, args?}`.
#[derive(Debug, Clone, PartialEq)]
pub struct OscSend {
    pub target: String,
    pub address: Option<String>,
    pub args: Vec<ConfigValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleAction {
    Silence,
    StartModule,
}

/// `note(expr): value` inside an output block.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputShortcut {
    pub event: EventType,
    pub value1: ConfigValue,
    pub value2: ConfigValue,
}

const MIDI_ACTION_KEYS: &[&str] = &[
    "event_out",
    "value_1_out",
    "value_2_out",
    "channel_out",
    "device_out",
    "action",
    "set_var",
    "arp_id",
    "sysex_data",
];

/// One action entry inside a rule's `output` list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputBlock {
    /// Every plain key in declaration order. Used by the assignment and
    /// arpeggiator-parameter passes.
    pub entries: Vec<(String, ConfigValue)>,
    pub guard: Option<ConfigValue>,
    pub send_osc: Option<OscSend>,
    pub action: Option<ModuleAction>,
    pub target_arp_id: Option<ConfigValue>,
    pub target_seq_index: Option<ConfigValue>,
    pub set_var: Vec<SetVarEntry>,
    pub arp_id: Option<ConfigValue>,
    pub shortcut: Option<OutputShortcut>,
    pub seq_out_id: Option<ConfigValue>,
    pub has_midi_action: bool,
}

impl OutputBlock {
    pub fn from_json(map: &Map<String, Json>, source: &str) -> Self {
        let mut block = OutputBlock::default();
        for (key, json) in map {
            if key.starts_with('_') {
                continue;
            }
            if MIDI_ACTION_KEYS.contains(&key.as_str()) {
                block.has_midi_action = true;
            }
            match key.as_str() {
                "if" => block.guard = Some(ConfigValue::from_json(json)),
                "send_osc" => block.send_osc = decode_osc_send(json, source),
                "action" => {
                    block.action = match json.as_str().map(str::trim) {
                        Some("silence") => Some(ModuleAction::Silence),
                        Some("start_module") => Some(ModuleAction::StartModule),
                        other => {
                            log::warn!(target: "rules", "[{}] unknown action {:?}", source, other);
                            None
                        }
                    }
                }
                "target_arp_id" => block.target_arp_id = Some(ConfigValue::from_json(json)),
                "target_seq_index" => block.target_seq_index = Some(ConfigValue::from_json(json)),
                "set_var" => block.set_var = decode_set_var(json, source),
                "arp_id" => block.arp_id = Some(ConfigValue::from_json(json)),
                "seq_out_id" => block.seq_out_id = Some(ConfigValue::from_json(json)),
                _ => match parse_shortcut(key) {
                    Some((event, expr)) => {
                        block.has_midi_action = true;
                        if block.shortcut.is_none() {
                            block.shortcut = Some(OutputShortcut {
                                event,
                                value1: ConfigValue::Str(expr),
                                value2: ConfigValue::from_json(json),
                            });
                        }
                    }
                    None => block.entries.push((key.clone(), ConfigValue::from_json(json))),
                },
            }
        }
        block
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// The block `{"event_out": "note"}` used by sequencers without outputs.
    pub fn default_note() -> Self {
        OutputBlock {
            entries: vec![("event_out".to_string(), ConfigValue::from("note"))],
            has_midi_action: true,
            ..OutputBlock::default()
        }
    }
}

fn decode_osc_send(json: &Json, source: &str) -> Option<OscSend> {
    let Some(target) = json.get("target").and_then(Json::as_str) else {
        log::warn!(target: "rules", "[{}] send_osc without a target", source);
        return None;
    };
    Some(OscSend {
        target: target.to_string(),
        address: json.get("address").and_then(Json::as_str).map(str::to_string),
        args: json
            .get("args")
            .and_then(Json::as_array)
            .map(|args| args.iter().map(ConfigValue::from_json).collect())
            .unwrap_or_default(),
    })
}

fn decode_set_var(json: &Json, source: &str) -> Vec<SetVarEntry> {
    let Some(items) = json.as_array() else {
        log::warn!(target: "rules", "[{}] set_var must be a list", source);
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name").and_then(Json::as_str)?;
            let index = item.get("index").filter(|v| !v.is_null())?;
            let value = item.get("value").filter(|v| !v.is_null())?;
            Some(SetVarEntry {
                name: name.trim().to_string(),
                index: ConfigValue::from_json(index),
                value: ConfigValue::from_json(value),
                sequencer_index: item.get("sequencer_index").map(ConfigValue::from_json),
            })
        })
        .collect()
}

fn decode_outputs(json: Option<&Json>, source: &str) -> Vec<OutputBlock> {
    match json {
        Some(Json::Array(items)) => items
            .iter()
            .filter_map(|item| match item.as_object() {
                Some(map) => Some(OutputBlock::from_json(map, source)),
                None => {
                    log::warn!(target: "rules", "[{}] skipping non-object output block", source);
                    None
                }
            })
            .collect(),
        Some(Json::Object(map)) => vec![OutputBlock::from_json(map, source)],
        _ => Vec::new(),
    }
}

fn json_str(json: Option<&Json>) -> Option<String> {
    json.and_then(Json::as_str).map(str::to_string)
}

/// How a rule is triggered.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Live MIDI from a port whose name contains the alias-resolved device.
    /// `None` means the rule only runs on version activation.
    Midi { device_in: Option<String> },
    /// OSC messages with exactly this address.
    Osc { address: String },
}

const FILTER_KEYS: &[&str] = &[
    "device_in",
    "version",
    "ch_in",
    "event_in",
    "value_1_in",
    "value_2_in",
    "cc_type_in",
    "threshold",
    "abs2rel_factor",
    "set_version",
    "channel_out",
    "device_out",
    "output",
    "address",
    "if",
];

/// One `midi_filter` or `osc_filter` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleConfig {
    pub id: String,
    pub trigger: Trigger,
    pub version: Option<VersionCondition>,
    /// Lower-cased event names as written; `note`, `cc` and `pc` expand at match time.
    pub event_in: Option<Vec<String>>,
    pub ch_in: Option<ConfigValue>,
    pub value_1_in: Option<ConfigValue>,
    pub value_2_in: Option<ConfigValue>,
    pub cc_mode: CcInputMode,
    pub threshold: i64,
    pub set_version: Option<ConfigValue>,
    pub channel_out: Option<ConfigValue>,
    pub device_out: Option<String>,
    pub guard: Option<ConfigValue>,
    /// Keys the filter does not consume; the ones naming user variables are assignments.
    pub extra: Vec<(String, ConfigValue)>,
    pub outputs: Vec<OutputBlock>,
}

impl RuleConfig {
    pub fn midi_from_json(id: String, map: &Map<String, Json>) -> Self {
        let map = expand_filter_shortcut(map);
        let trigger = Trigger::Midi {
            device_in: json_str(map.get("device_in")),
        };
        Self::decode(id, trigger, &map)
    }

    pub fn osc_from_json(id: String, map: &Map<String, Json>) -> Option<Self> {
        let Some(address) = json_str(map.get("address")) else {
            log::warn!(target: "rules", "[{}] osc filter without an address", id);
            return None;
        };
        Some(Self::decode(id, Trigger::Osc { address }, map))
    }

    fn decode(id: String, trigger: Trigger, map: &Map<String, Json>) -> Self {
        let version = map.get("version").map(|json| {
            VersionCondition::from_json(json).unwrap_or_else(|| {
                log::warn!(target: "rules", "[{}] version must be an integer or a list", id);
                VersionCondition::Any(Vec::new())
            })
        });
        let event_in = map.get("event_in").map(|json| match json {
            Json::Array(items) => items.iter().map(event_name).collect(),
            other => vec![event_name(other)],
        });
        let cc_mode = match map.get("cc_type_in").and_then(Json::as_str) {
            Some(name) => CcInputMode::parse(name).unwrap_or_else(|| {
                log::warn!(target: "rules", "[{}] unknown cc_type_in '{}', using abs", id, name);
                CcInputMode::Abs
            }),
            None => CcInputMode::Abs,
        };
        if map.contains_key("abs2rel_factor") {
            log::warn!(target: "rules", "[{}] abs2rel_factor has no effect; abs_relative re-engages within threshold", id);
        }
        let extra = map
            .iter()
            .filter(|(key, _)| !key.starts_with('_') && !FILTER_KEYS.contains(&key.as_str()))
            .map(|(key, json)| (key.clone(), ConfigValue::from_json(json)))
            .collect();

        RuleConfig {
            trigger,
            version,
            event_in,
            ch_in: map.get("ch_in").map(ConfigValue::from_json),
            value_1_in: map.get("value_1_in").map(ConfigValue::from_json),
            value_2_in: map.get("value_2_in").map(ConfigValue::from_json),
            cc_mode,
            threshold: map.get("threshold").and_then(Json::as_i64).unwrap_or(0).max(0),
            set_version: map.get("set_version").map(ConfigValue::from_json),
            channel_out: map.get("channel_out").map(ConfigValue::from_json),
            device_out: json_str(map.get("device_out")),
            guard: map.get("if").map(ConfigValue::from_json),
            extra,
            outputs: decode_outputs(map.get("output"), &id),
            id,
        }
    }

    pub fn device_in(&self) -> Option<&str> {
        match &self.trigger {
            Trigger::Midi { device_in } => device_in.as_deref(),
            Trigger::Osc { .. } => None,
        }
    }
}

fn event_name(json: &Json) -> String {
    match json {
        Json::String(s) => s.trim().to_lowercase(),
        other => other.to_string(),
    }
}

/// Rewrites `"note(60)": {...}` into `event_in` + `value_1_in`, merging the body.
fn expand_filter_shortcut(map: &Map<String, Json>) -> Map<String, Json> {
    let mut out = map.clone();
    let Some((key, (event, expr))) = map
        .keys()
        .find_map(|key| parse_shortcut(key).map(|parsed| (key.clone(), parsed)))
    else {
        return out;
    };
    if let Some(Json::Object(body)) = out.remove(&key) {
        for (k, v) in body {
            out.insert(k, v);
        }
    }
    out.insert("event_in".into(), Json::String(event.name().to_string()));
    out.insert("value_1_in".into(), Json::String(expr));
    out
}

/// One `sequencer` entry. Parameter keys stay in a map because most of them
/// are per-step arrays whose names are open-ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerConfig {
    pub index: usize,
    pub clock_in: Option<String>,
    /// Grid for quantized starts; `true` in the file means the default grid.
    pub quantize_start: Option<Value>,
    pub channel_out: Option<ConfigValue>,
    pub device_out: Option<String>,
    pub params: BTreeMap<String, ConfigValue>,
    pub outputs: Vec<OutputBlock>,
}

impl SequencerConfig {
    pub fn from_json(index: usize, map: &Map<String, Json>, default_grid: &str) -> Self {
        let source = format!("SEQ{}", index);
        let quantize_start = match map.get("quantize_start") {
            Some(Json::String(grid)) => Some(Value::from(grid.as_str())),
            Some(Json::Bool(true)) => Some(Value::from(default_grid)),
            Some(Json::Number(n)) => n.as_i64().filter(|t| *t > 0).map(Value::Int),
            _ => None,
        };
        let params = map
            .iter()
            .filter(|(key, _)| {
                !key.starts_with('_')
                    && !matches!(
                        key.as_str(),
                        "output"
                            | "clock_in"
                            | "device_in"
                            | "quantize_start"
                            | "channel_out"
                            | "device_out"
                    )
            })
            .map(|(key, json)| (key.clone(), ConfigValue::from_json(json)))
            .collect();
        let mut outputs = decode_outputs(map.get("output"), &source);
        if outputs.is_empty() {
            outputs.push(OutputBlock::default_note());
        }
        SequencerConfig {
            index,
            clock_in: json_str(map.get("device_in")).or_else(|| json_str(map.get("clock_in"))),
            quantize_start,
            channel_out: map.get("channel_out").map(ConfigValue::from_json),
            device_out: json_str(map.get("device_out")),
            params,
            outputs,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.params.get(key)
    }

    /// True when `name` appears in any of the parameters that shape the schedule.
    pub fn schedule_depends_on(&self, name: &str) -> bool {
        ["swing", "step_duration", "step_total", "seq_transpose"]
            .iter()
            .filter_map(|key| self.params.get(*key))
            .any(|cfg| config_mentions(cfg, name))
    }
}

fn config_mentions(cfg: &ConfigValue, name: &str) -> bool {
    match cfg {
        ConfigValue::Str(s) => s.contains(name),
        ConfigValue::List(items) => items.iter().any(|item| config_mentions(item, name)),
        ConfigValue::Scale(d) => config_mentions(&d.source, name),
        ConfigValue::ScaleNotes(d) => [&d.value, &d.root, &d.scale_type]
            .into_iter()
            .flatten()
            .any(|part| config_mentions(part, name)),
        _ => false,
    }
}

/// Arpeggiator parameters keyed by name.
pub type ArpParams = BTreeMap<String, ConfigValue>;

const ARP_DEFAULTS: &[(&str, ArpDefault)] = &[
    ("arp_mode", ArpDefault::Str("sorted")),
    ("arp_step_direction", ArpDefault::Str("up")),
    ("arp_octaves", ArpDefault::Int(1)),
    ("arp_octave_mode", ArpDefault::Str("up")),
    ("arp_latch", ArpDefault::Int(0)),
    ("arp_gate", ArpDefault::Int(1)),
    ("arp_mute", ArpDefault::Int(0)),
    ("arp_velocity", ArpDefault::Int(100)),
    ("arp_probability", ArpDefault::Float(1.0)),
    ("arp_note_length", ArpDefault::Float(0.9)),
];

enum ArpDefault {
    Int(i64),
    Float(f64),
    Str(&'static str),
}

/// `arpeggiator` entry: defaults merged under the file's values.
pub fn arp_template_from_json(map: &Map<String, Json>, ppqn: i64, step_duration: &str) -> ArpParams {
    let mut params: ArpParams = ARP_DEFAULTS
        .iter()
        .map(|(key, default)| {
            let value = match default {
                ArpDefault::Int(i) => ConfigValue::Int(*i),
                ArpDefault::Float(f) => ConfigValue::Float(*f),
                ArpDefault::Str(s) => ConfigValue::from(*s),
            };
            (key.to_string(), value)
        })
        .collect();
    params.insert("ppqn".into(), ConfigValue::Int(ppqn));
    params.insert("step_duration".into(), ConfigValue::from(step_duration));
    for (key, json) in map {
        if !key.starts_with('_') {
            params.insert(key.clone(), ConfigValue::from_json(json));
        }
    }
    if let Some(mode) = params.get("octave_mode").cloned() {
        params.insert("arp_octave_mode".into(), mode);
    }
    params
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OscEndpoint {
    #[serde(default = "default_osc_ip")]
    pub ip: String,
    #[serde(default = "default_osc_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OscTarget {
    #[serde(default = "default_osc_ip")]
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_osc_address")]
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OscSettings {
    #[serde(default)]
    pub receive: Option<OscEndpoint>,
    #[serde(default)]
    pub send: BTreeMap<String, OscTarget>,
}

fn default_osc_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_osc_port() -> u16 {
    9000
}

fn default_osc_address() -> String {
    "/".to_string()
}

/// Everything decoded from one rule document.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub device_aliases: HashMap<String, String>,
    /// Declaration order is kept so log output is stable.
    pub user_variables: Vec<(String, Value)>,
    pub library: MusicLibrary,
    pub midi_filters: Vec<Arc<RuleConfig>>,
    pub osc_filters: Vec<Arc<RuleConfig>>,
    pub sequencers: Vec<Arc<SequencerConfig>>,
    pub arpeggiators: BTreeMap<i64, ArpParams>,
    pub osc: OscSettings,
}

impl RuleSet {
    pub fn load(path: &Path, defaults: &RuleDefaults) -> Result<Self, RuleError> {
        let text = std::fs::read_to_string(path)?;
        let json: Json = serde_json::from_str(&text)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("rules");
        Self::decode(&json, stem, defaults)
    }

    pub fn from_json(json: &Json) -> Result<Self, RuleError> {
        Self::decode(json, "rules", &RuleDefaults::default())
    }

    pub fn decode(json: &Json, source: &str, defaults: &RuleDefaults) -> Result<Self, RuleError> {
        let Some(doc) = json.as_object() else {
            return Err(RuleError::Invalid("top level must be an object".into()));
        };
        let mut rules = RuleSet::default();

        if let Some(aliases) = doc.get("device_alias").and_then(Json::as_object) {
            for (alias, target) in aliases {
                match target.as_str() {
                    Some(t) => {
                        rules.device_aliases.insert(alias.clone(), t.to_string());
                    }
                    None => log::warn!(target: "rules", "device alias '{}' must be a string", alias),
                }
            }
        }

        if let Some(vars) = doc.get("user_variables").and_then(Json::as_object) {
            for (name, json) in vars {
                if json.is_object() || json.is_null() {
                    log::warn!(target: "rules", "user variable '{}' has an unsupported value", name);
                    continue;
                }
                rules.user_variables.push((name.clone(), Value::from_json(json)));
            }
        }

        if let Some(scales) = doc.get("user_scales").and_then(Json::as_object) {
            for (name, json) in scales {
                let intervals: Option<Vec<i64>> = json
                    .as_array()
                    .map(|items| items.iter().map(Json::as_i64).collect::<Option<_>>())
                    .unwrap_or(None);
                match intervals {
                    Some(intervals) => rules.library.scales.insert(name, intervals),
                    None => log::warn!(target: "rules", "user scale '{}' must be a list of integers", name),
                }
            }
        }
        if let Some(names) = doc.get("scale_list").and_then(Json::as_array) {
            for name in names.iter().filter_map(Json::as_str) {
                if rules.library.scales.get(name).is_none() {
                    log::warn!(target: "rules", "scale_list names unknown scale '{}'", name);
                } else if !rules.library.scale_list.iter().any(|n| n == name) {
                    rules.library.scale_list.push(name.to_string());
                }
            }
        }
        if let Some(names) = doc.get("duration_list").and_then(Json::as_array) {
            for name in names.iter().filter_map(Json::as_str) {
                if !rules.library.duration_list.iter().any(|n| n == name) {
                    rules.library.duration_list.push(name.to_string());
                }
            }
        }

        for (i, entry) in list(doc, "midi_filter").enumerate() {
            let id = format!("{}.{}", source, i);
            match entry.as_object() {
                Some(map) => rules.midi_filters.push(Arc::new(RuleConfig::midi_from_json(id, map))),
                None => log::warn!(target: "rules", "[{}] skipping non-object filter", id),
            }
        }
        for (i, entry) in list(doc, "osc_filter").enumerate() {
            let id = format!("{}.osc.{}", source, i);
            match entry.as_object() {
                Some(map) => {
                    if let Some(rule) = RuleConfig::osc_from_json(id, map) {
                        rules.osc_filters.push(Arc::new(rule));
                    }
                }
                None => log::warn!(target: "rules", "[{}] skipping non-object osc filter", id),
            }
        }

        for entry in list(doc, "sequencer") {
            match entry.as_object() {
                Some(map) => {
                    let index = rules.sequencers.len();
                    rules.sequencers.push(Arc::new(SequencerConfig::from_json(
                        index,
                        map,
                        &defaults.step_duration,
                    )));
                }
                None => log::warn!(target: "rules", "skipping non-object sequencer"),
            }
        }

        for (i, entry) in list(doc, "arpeggiator").enumerate() {
            let Some(map) = entry.as_object() else {
                log::warn!(target: "rules", "arpeggiator #{} must be an object", i);
                continue;
            };
            let Some(arp_id) = map.get("arp_id").and_then(Json::as_i64) else {
                log::warn!(target: "rules", "arpeggiator #{} needs an integer arp_id", i);
                continue;
            };
            rules.arpeggiators.insert(
                arp_id,
                arp_template_from_json(map, defaults.ppqn, &defaults.step_duration),
            );
        }

        if let Some(osc) = doc.get("osc_configuration") {
            match OscSettings::deserialize(osc) {
                Ok(settings) => rules.osc = settings,
                Err(e) => log::warn!(target: "rules", "ignoring osc_configuration: {}", e),
            }
        }

        log::info!(
            target: "rules",
            "loaded '{}': {} filters, {} osc filters, {} sequencers, {} arpeggiators",
            source,
            rules.midi_filters.len(),
            rules.osc_filters.len(),
            rules.sequencers.len(),
            rules.arpeggiators.len()
        );
        Ok(rules)
    }

    /// 0 plus every literal version named by `version` or `set_version`, sorted.
    pub fn available_versions(&self) -> Vec<i64> {
        let mut versions = BTreeSet::from([0]);
        for rule in self.midi_filters.iter().chain(&self.osc_filters) {
            if let Some(cond) = &rule.version {
                versions.extend(cond.versions());
            }
            if let Some(ConfigValue::Int(v)) = &rule.set_version {
                versions.insert(*v);
            }
        }
        versions.into_iter().collect()
    }

    /// Maps an alias to its port-name substring; unknown aliases are used as-is.
    pub fn resolve_alias<'a>(&'a self, alias: &'a str) -> &'a str {
        self.device_aliases.get(alias).map(String::as_str).unwrap_or(alias)
    }
}

/// Load-time fallbacks taken from the engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDefaults {
    pub ppqn: i64,
    pub step_duration: String,
}

impl Default for RuleDefaults {
    fn default() -> Self {
        Self {
            ppqn: cadence_types::music::DEFAULT_PPQN,
            step_duration: cadence_types::music::DEFAULT_STEP_DURATION.to_string(),
        }
    }
}

fn list<'a>(doc: &'a Map<String, Json>, key: &str) -> impl Iterator<Item = &'a Json> {
    doc.get(key)
        .and_then(Json::as_array)
        .map(|items| items.iter())
        .into_iter()
        .flatten()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_top_level_must_be_object() {
        match RuleSet::from_json(&json!([1, 2])) {
            Err(RuleError::Invalid(_)) => {}
            other => panic!("Expected invalid error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_filter_ids_and_skipping() {
        let rules = RuleSet::from_json(&json!({
            "midi_filter": [
                {"device_in": "keys", "output": [{"device_out": "synth"}]},
                42,
                {"device_in": "pads"}
            ]
        }))
        .unwrap();
        let ids: Vec<&str> = rules.midi_filters.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rules.0", "rules.2"]);
        assert_eq!(rules.midi_filters[0].device_in(), Some("keys"));
        assert!(rules.midi_filters[0].outputs[0].has_midi_action);
    }

    #[test]
    fn test_filter_shortcut_expands() {
        let rules = RuleSet::from_json(&json!({
            "midi_filter": [{"device_in": "keys", "cc(74)": {"ch_in": 2}}]
        }))
        .unwrap();
        let rule = &rules.midi_filters[0];
        assert_eq!(rule.event_in, Some(vec!["control_change".to_string()]));
        assert_eq!(rule.value_1_in, Some(ConfigValue::from("74")));
        assert_eq!(rule.ch_in, Some(ConfigValue::Int(2)));
        assert!(rule.extra.is_empty());
    }

    #[test]
    fn test_output_shortcut() {
        let map = json!({"note(value_1 + 12)": "value_2", "device_out": "synth"});
        let block = OutputBlock::from_json(map.as_object().unwrap(), "t");
        let shortcut = block.shortcut.as_ref().unwrap();
        assert_eq!(shortcut.event, EventType::NoteOn);
        assert_eq!(shortcut.value1, ConfigValue::from("value_1 + 12"));
        assert_eq!(shortcut.value2, ConfigValue::from("value_2"));
        assert_eq!(block.get("device_out"), Some(&ConfigValue::from("synth")));
    }

    #[test]
    fn test_assignment_only_block_has_no_midi_action() {
        let map = json!({"octave": "octave + 1"});
        let block = OutputBlock::from_json(map.as_object().unwrap(), "t");
        assert!(!block.has_midi_action);
        assert_eq!(block.entries.len(), 1);
    }

    #[test]
    fn test_available_versions() {
        let rules = RuleSet::from_json(&json!({
            "midi_filter": [
                {"device_in": "a", "version": [1, 3]},
                {"device_in": "a", "set_version": 5},
                {"device_in": "a", "set_version": "cycle", "version": 3}
            ]
        }))
        .unwrap();
        assert_eq!(rules.available_versions(), vec![0, 1, 3, 5]);
    }

    #[test]
    fn test_sequencer_defaults() {
        let rules = RuleSet::from_json(&json!({
            "sequencer": [{"clock_in": "clock", "quantize_start": true, "step_total": 8}]
        }))
        .unwrap();
        let seq = &rules.sequencers[0];
        assert_eq!(seq.quantize_start, Some(Value::from("1/16")));
        assert_eq!(seq.get("step_total"), Some(&ConfigValue::Int(8)));
        assert_eq!(seq.outputs, vec![OutputBlock::default_note()]);
    }

    #[test]
    fn test_schedule_dependency() {
        let rules = RuleSet::from_json(&json!({
            "sequencer": [{"swing": "groove / 100", "step_total": 16}]
        }))
        .unwrap();
        assert!(rules.sequencers[0].schedule_depends_on("groove"));
        assert!(!rules.sequencers[0].schedule_depends_on("octave"));
    }

    #[test]
    fn test_arp_template_defaults_and_alias() {
        let rules = RuleSet::from_json(&json!({
            "arpeggiator": [
                {"arp_id": 1, "octave_mode": "alternate", "arp_octaves": 2},
                {"arp_mode": "sorted"}
            ]
        }))
        .unwrap();
        assert_eq!(rules.arpeggiators.len(), 1);
        let template = &rules.arpeggiators[&1];
        assert_eq!(template["arp_octave_mode"], ConfigValue::from("alternate"));
        assert_eq!(template["arp_octaves"], ConfigValue::Int(2));
        assert_eq!(template["arp_mode"], ConfigValue::from("sorted"));
        assert_eq!(template["ppqn"], ConfigValue::Int(24));
    }

    #[test]
    fn test_library_lists() {
        let rules = RuleSet::from_json(&json!({
            "user_scales": {"weird": [0, 1, 6]},
            "scale_list": ["weird", "nope", "major", "weird"],
            "duration_list": ["1/8", "1/8", "1/4"]
        }))
        .unwrap();
        assert_eq!(rules.library.scale_list, vec!["weird", "major"]);
        assert_eq!(rules.library.duration_list, vec!["1/8", "1/4"]);
        assert_eq!(rules.library.scales.get("weird"), Some(&[0, 1, 6][..]));
    }

    #[test]
    fn test_osc_configuration() {
        let rules = RuleSet::from_json(&json!({
            "osc_configuration": {
                "receive": {"port": 9001},
                "send": {"mixer": {"ip": "10.0.0.2", "port": 8000, "address": "/fader"}}
            }
        }))
        .unwrap();
        assert_eq!(rules.osc.receive.as_ref().map(|r| r.port), Some(9001));
        assert_eq!(rules.osc.receive.as_ref().map(|r| r.ip.as_str()), Some("127.0.0.1"));
        assert_eq!(rules.osc.send["mixer"].address, "/fader");
    }

    #[test]
    fn test_osc_filter_requires_address() {
        let rules = RuleSet::from_json(&json!({
            "osc_filter": [{"output": []}, {"address": "/play"}]
        }))
        .unwrap();
        assert_eq!(rules.osc_filters.len(), 1);
        assert_eq!(rules.osc_filters[0].id, "rules.osc.1");
    }

    #[test]
    fn test_resolve_alias() {
        let rules = RuleSet::from_json(&json!({"device_alias": {"synth": "Minilogue"}})).unwrap();
        assert_eq!(rules.resolve_alias("synth"), "Minilogue");
        assert_eq!(rules.resolve_alias("Other"), "Other");
    }
}
