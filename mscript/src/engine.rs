//! Contracts consumed from the host looper engine.
//!
//! The script subsystem never processes audio.  Everything it needs to know
//! about tracks, loops, parameters and synchronisation comes through the
//! [`Engine`] trait, and everything it wants done is requested through it.
//! The engine reports back asynchronously with [`EngineNotice`]s, which the
//! host forwards to [`ScriptRuntime::handle`](crate::script::runtime::ScriptRuntime::handle)
//! between audio blocks.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::script::value::Value;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Zero-based track index.  Scripts see tracks numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TrackId(pub u32);

impl TrackId {
    /// The 1-based number shown to script authors.
    pub fn number(self) -> u32 {
        self.0 + 1
    }
}

/// Handle to a pending engine event (a scheduled function or a wait point).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub u64);

/// Handle to a job submitted to the background thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadEventId(pub u64);

/// Trigger direction for sustainable functions and scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Down,
    Up,
}

// ── Track state ───────────────────────────────────────────────────────────────

/// Major loop mode as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Reset,
    Play,
    Record,
    Overdub,
    Multiply,
    Insert,
    Replace,
    Mute,
    Pause,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Reset => "reset",
            Mode::Play => "play",
            Mode::Record => "record",
            Mode::Overdub => "overdub",
            Mode::Multiply => "multiply",
            Mode::Insert => "insert",
            Mode::Replace => "replace",
            Mode::Mute => "mute",
            Mode::Pause => "pause",
        }
    }
}

/// Read-only snapshot of one track, used for decisions inside statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackState {
    pub id: TrackId,
    /// Current playback position within the loop.
    pub frame: u64,
    /// Loop length in frames; 0 for an empty loop.
    pub loop_frames: u64,
    pub cycles: u32,
    /// Subcycles per cycle.
    pub subcycles: u32,
    pub mode: Mode,
    pub muted: bool,
    pub paused: bool,
    pub focused: bool,
    pub group: Option<String>,
}

impl TrackState {
    pub fn cycle_frames(&self) -> u64 {
        if self.cycles == 0 {
            self.loop_frames
        } else {
            self.loop_frames / self.cycles as u64
        }
    }

    pub fn subcycle_frames(&self) -> u64 {
        let subcycles = self.subcycles.max(1) as u64;
        self.cycle_frames() / subcycles
    }

    /// Zero-based cycle containing the current frame.
    pub fn cycle_number(&self) -> u64 {
        match self.cycle_frames() {
            0 => 0,
            n => self.frame / n,
        }
    }

    /// Zero-based subcycle within the current cycle.
    pub fn subcycle_number(&self) -> u64 {
        let cycle = self.cycle_frames();
        let sub = self.subcycle_frames();
        if cycle == 0 || sub == 0 {
            0
        } else {
            (self.frame % cycle) / sub
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.mode, Mode::Record | Mode::Overdub | Mode::Multiply | Mode::Insert)
    }

    pub fn is_playing(&self) -> bool {
        self.loop_frames > 0 && !self.muted && !self.paused && self.mode != Mode::Reset
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// A function invocation requested by a script statement.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall<'a> {
    pub name: &'a str,
    pub direction: Direction,
    pub arg: Option<Value>,
    pub track: TrackId,
}

/// Synchronisation boundaries provided by the engine's sync service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncBoundary {
    Pulse,
    Beat,
    Bar,
    ExternalStart,
    Realign,
}

impl FromStr for SyncBoundary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "pulse" => Ok(SyncBoundary::Pulse),
            "beat" => Ok(SyncBoundary::Beat),
            "bar" => Ok(SyncBoundary::Bar),
            "externalstart" => Ok(SyncBoundary::ExternalStart),
            "realign" => Ok(SyncBoundary::Realign),
            _ => Err(format!("unknown sync boundary {s:?}")),
        }
    }
}

/// Work performed on the background thread on a script's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Load { path: String },
    Save { path: String },
    Diff { left: String, right: String },
    Echo { text: String },
    Prompt { text: String },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::Load { .. } => "load",
            Job::Save { .. } => "save",
            Job::Diff { .. } => "diff",
            Job::Echo { .. } => "echo",
            Job::Prompt { .. } => "prompt",
        }
    }
}

/// Where a parameter value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamScope {
    Global,
    Track(TrackId),
    Setup,
}

/// Asynchronous reports from the engine, delivered between audio blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotice {
    EventCompleted(EventId),
    EventCanceled(EventId),
    EventRescheduled { old: EventId, new: EventId },
    FunctionCompleted { name: String, track: TrackId },
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// The query/command surface of the looper engine.
///
/// All calls are synchronous and must not block: they are made from the
/// audio thread while a script is being advanced.
pub trait Engine {
    fn track_count(&self) -> usize;

    /// The track that receives functions when a script names no other.
    fn active_track(&self) -> TrackId;

    fn track(&self, id: TrackId) -> Option<TrackState>;

    fn sample_rate(&self) -> u32 {
        44_100
    }

    /// Monotonic clock in milliseconds, used for sustain and multi-click timing.
    fn millis(&self) -> u64;

    /// Whether an audio stream is currently running.
    fn has_audio(&self) -> bool {
        true
    }

    /// Invoke a function.  Returns the pending event when the function was
    /// scheduled rather than performed immediately.
    fn invoke(&mut self, call: &FunctionCall<'_>) -> Result<Option<EventId>, String>;

    /// Schedule a wait point `delay_frames` from now on `track`.
    fn schedule_wait(&mut self, track: TrackId, delay_frames: u64, in_pause: bool)
        -> Option<EventId>;

    /// Schedule a wait point on the `count`-th next synchronisation boundary.
    /// `None` when no sync source can provide that boundary.
    fn schedule_sync_wait(&mut self, track: TrackId, boundary: SyncBoundary, count: u32)
        -> Option<EventId>;

    /// Schedule a wait point on the next quantize boundary, if quantization applies.
    fn schedule_quantized(&mut self, _track: TrackId) -> Option<EventId> {
        None
    }

    /// Release a pending event back to its track without performing it.
    fn cancel_event(&mut self, id: EventId);

    /// Queue a job for the background thread.
    fn submit_job(&mut self, job: Job) -> ThreadEventId;

    fn get_parameter(&self, name: &str, scope: ParamScope) -> Option<Value>;

    fn set_parameter(&mut self, name: &str, scope: ParamScope, value: &Value) -> Result<(), String>;

    /// Show a message in the host UI.
    fn message(&mut self, text: &str);
}

// ── Catalog ───────────────────────────────────────────────────────────────────

/// Where an engine parameter is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Global,
    Track,
    Setup,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub sustainable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDef {
    pub name: String,
    pub kind: ParamKind,
}

/// Immutable table of the engine's functions and parameters.
///
/// Built once at startup and passed by reference into the compiler and the
/// reference resolver.  Lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    functions: HashMap<String, FunctionDef>,
    parameters: HashMap<String, ParameterDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The function and parameter set of a typical looper.
    pub fn standard() -> Self {
        let mut c = Catalog::new();
        for name in [
            "Record", "Overdub", "Multiply", "Insert", "Replace", "Mute", "Pause", "Play",
            "Undo", "Redo", "Reset", "GlobalReset", "TrackSelect", "NextTrack", "PrevTrack",
            "NextLoop", "PrevLoop", "Reverse", "Halfspeed", "Realign", "Solo", "Trim",
        ] {
            let sustainable = matches!(name, "Record" | "Overdub" | "Multiply" | "Insert" | "Replace");
            c = c.with_function(name, sustainable);
        }
        for (name, kind) in [
            ("quantize", ParamKind::Track),
            ("subcycles", ParamKind::Track),
            ("input", ParamKind::Track),
            ("output", ParamKind::Track),
            ("feedback", ParamKind::Track),
            ("pan", ParamKind::Track),
            ("syncSource", ParamKind::Setup),
            ("beatsPerBar", ParamKind::Setup),
            ("trackCount", ParamKind::Global),
            ("noiseFloor", ParamKind::Global),
        ] {
            c = c.with_parameter(name, kind);
        }
        c
    }

    pub fn with_function(mut self, name: &str, sustainable: bool) -> Self {
        self.functions.insert(
            name.to_ascii_lowercase(),
            FunctionDef { name: name.to_owned(), sustainable },
        );
        self
    }

    pub fn with_parameter(mut self, name: &str, kind: ParamKind) -> Self {
        self.parameters
            .insert(name.to_ascii_lowercase(), ParameterDef { name: name.to_owned(), kind });
        self
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.get(&name.to_ascii_lowercase())
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.functions.values()
    }
}

impl fmt::Display for ParamScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamScope::Global => write!(f, "global"),
            ParamScope::Track(t) => write!(f, "track {}", t.number()),
            ParamScope::Setup => write!(f, "setup"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn track(frame: u64, loop_frames: u64, cycles: u32, subcycles: u32) -> TrackState {
        TrackState { frame, loop_frames, cycles, subcycles, ..TrackState::default() }
    }

    #[test]
    fn cycle_geometry() {
        let t = track(2500, 4000, 2, 4);
        assert_eq!(t.cycle_frames(), 2000);
        assert_eq!(t.subcycle_frames(), 500);
        assert_eq!(t.cycle_number(), 1);
        assert_eq!(t.subcycle_number(), 1);
    }

    #[test]
    fn empty_loop_geometry() {
        let t = track(0, 0, 1, 4);
        assert_eq!(t.cycle_frames(), 0);
        assert_eq!(t.subcycle_number(), 0);
        assert!(!t.is_playing());
    }

    #[test]
    fn catalog_lookup_is_case_insensitive() {
        let c = Catalog::standard();
        assert_eq!(c.function("mute").map(|f| f.name.as_str()), Some("Mute"));
        assert!(c.function("RECORD").is_some_and(|f| f.sustainable));
        assert_eq!(c.parameter("QUANTIZE").map(|p| p.kind), Some(ParamKind::Track));
        assert!(c.function("Frobnicate").is_none());
    }

    #[test]
    fn sync_boundary_parse() {
        assert_eq!("Bar".parse::<SyncBoundary>(), Ok(SyncBoundary::Bar));
        assert_eq!("externalStart".parse::<SyncBoundary>(), Ok(SyncBoundary::ExternalStart));
        assert!("tick".parse::<SyncBoundary>().is_err());
    }
}
