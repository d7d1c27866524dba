//! Variable tables.
//!
//! Two kinds of names live here:
//!
//! - [`InternalVar`]: the fixed, process-wide table of built-in variables
//!   whose values come from the engine or from interpreter bookkeeping.
//! - [`Variables`] / [`TrackVariables`]: user-declared values, keyed by name,
//!   at script, local, track and global scope.

use std::collections::HashMap;

use crate::engine::TrackId;

use super::value::Value;

// ── Internal variables ────────────────────────────────────────────────────────

/// Built-in variables readable from any script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalVar {
    TrackNumber,
    TrackCount,
    LoopFrames,
    LoopFrame,
    CycleFrames,
    CycleCount,
    CycleNumber,
    SubCycleFrames,
    SubCycleNumber,
    Mode,
    IsRecording,
    IsMuted,
    IsPaused,
    SampleRate,
    ScriptName,
    TriggerValue,
    SustainCount,
    ClickCount,
}

impl InternalVar {
    pub const ALL: &'static [InternalVar] = &[
        InternalVar::TrackNumber,
        InternalVar::TrackCount,
        InternalVar::LoopFrames,
        InternalVar::LoopFrame,
        InternalVar::CycleFrames,
        InternalVar::CycleCount,
        InternalVar::CycleNumber,
        InternalVar::SubCycleFrames,
        InternalVar::SubCycleNumber,
        InternalVar::Mode,
        InternalVar::IsRecording,
        InternalVar::IsMuted,
        InternalVar::IsPaused,
        InternalVar::SampleRate,
        InternalVar::ScriptName,
        InternalVar::TriggerValue,
        InternalVar::SustainCount,
        InternalVar::ClickCount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InternalVar::TrackNumber => "trackNumber",
            InternalVar::TrackCount => "trackCount",
            InternalVar::LoopFrames => "loopFrames",
            InternalVar::LoopFrame => "loopFrame",
            InternalVar::CycleFrames => "cycleFrames",
            InternalVar::CycleCount => "cycleCount",
            InternalVar::CycleNumber => "cycleNumber",
            InternalVar::SubCycleFrames => "subCycleFrames",
            InternalVar::SubCycleNumber => "subCycleNumber",
            InternalVar::Mode => "mode",
            InternalVar::IsRecording => "isRecording",
            InternalVar::IsMuted => "isMuted",
            InternalVar::IsPaused => "isPaused",
            InternalVar::SampleRate => "sampleRate",
            InternalVar::ScriptName => "scriptName",
            InternalVar::TriggerValue => "triggerValue",
            InternalVar::SustainCount => "sustainCount",
            InternalVar::ClickCount => "clickCount",
        }
    }

    /// Exact-match lookup.
    pub fn lookup(name: &str) -> Option<InternalVar> {
        InternalVar::ALL.iter().copied().find(|v| v.name() == name)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, InternalVar::SustainCount | InternalVar::ClickCount)
    }
}

/// Variables every interpreter declares implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutoVar {
    /// Set when a wait of this invocation was cancelled from outside.
    Interrupted,
    /// Result code of the most recent background job.
    ReturnCode,
}

impl AutoVar {
    pub fn lookup(name: &str) -> Option<AutoVar> {
        match name {
            "interrupted" => Some(AutoVar::Interrupted),
            "returnCode" => Some(AutoVar::ReturnCode),
            _ => None,
        }
    }
}

/// Storage class of a user-declared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VarScope {
    /// Per invocation; the default at script level.
    #[default]
    Script,
    /// Per call; the default inside a procedure.
    Local,
    /// Per track, shared by every script.
    Track,
    /// Shared by every script.
    Global,
}

impl VarScope {
    pub fn parse(word: &str) -> Option<VarScope> {
        match word.to_ascii_lowercase().as_str() {
            "script" => Some(VarScope::Script),
            "local" => Some(VarScope::Local),
            "track" => Some(VarScope::Track),
            "global" => Some(VarScope::Global),
            _ => None,
        }
    }
}

// ── User variables ────────────────────────────────────────────────────────────

/// A name → value table.
///
/// `clear` keeps the allocation so that pooled call frames can reuse it.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    vars: HashMap<String, Value>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: Value) {
        match self.vars.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.vars.insert(name.to_owned(), value);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Insert `Null` unless the variable already exists.
    pub fn declare(&mut self, name: &str) {
        if !self.vars.contains_key(name) {
            self.vars.insert(name.to_owned(), Value::Null);
        }
    }

    pub fn unset(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Track-scoped variables, one table per track.
#[derive(Debug, Default)]
pub struct TrackVariables {
    tracks: HashMap<TrackId, Variables>,
}

impl TrackVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, track: TrackId, name: &str) -> Option<&Value> {
        self.tracks.get(&track)?.get(name)
    }

    pub fn table(&mut self, track: TrackId) -> &mut Variables {
        self.tracks.entry(track).or_default()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_lookup_is_exact() {
        assert_eq!(InternalVar::lookup("loopFrames"), Some(InternalVar::LoopFrames));
        assert_eq!(InternalVar::lookup("LOOPFRAMES"), None);
        for v in InternalVar::ALL {
            assert_eq!(InternalVar::lookup(v.name()), Some(*v));
        }
    }

    #[test]
    fn only_counters_are_writable() {
        assert!(InternalVar::ClickCount.is_writable());
        assert!(!InternalVar::LoopFrames.is_writable());
    }

    #[test]
    fn declare_keeps_existing_value() {
        let mut vars = Variables::new();
        vars.set("x", Value::Int(3));
        vars.declare("x");
        vars.declare("y");
        assert_eq!(vars.get("x"), Some(&Value::Int(3)));
        assert_eq!(vars.get("y"), Some(&Value::Null));
    }

    #[test]
    fn clear_empties_table() {
        let mut vars = Variables::new();
        vars.set("a", Value::Int(1));
        vars.clear();
        assert!(vars.is_empty());
        assert!(!vars.unset("a"));
    }

    #[test]
    fn track_tables_are_independent() {
        let mut tv = TrackVariables::new();
        tv.table(TrackId(0)).set("level", Value::Int(1));
        tv.table(TrackId(1)).set("level", Value::Int(2));
        assert_eq!(tv.get(TrackId(0), "level"), Some(&Value::Int(1)));
        assert_eq!(tv.get(TrackId(1), "level"), Some(&Value::Int(2)));
        assert_eq!(tv.get(TrackId(2), "level"), None);
    }

    #[test]
    fn scope_words() {
        assert_eq!(VarScope::parse("GLOBAL"), Some(VarScope::Global));
        assert_eq!(VarScope::parse("track"), Some(VarScope::Track));
        assert_eq!(VarScope::parse("x"), None);
    }
}
