//! Script runtime: the owner of every live invocation.
//!
//! The host calls [`ScriptRuntime::trigger`] when a binding fires,
//! [`ScriptRuntime::handle`] for each engine notice, and
//! [`ScriptRuntime::run_block`] once per audio block.  Sustain and
//! multi-click timing is driven from `run_block` using the engine clock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::engine::{Catalog, Direction, Engine, EngineNotice, ThreadEventId, TrackId};

use super::compile::{CompileError, Compiler, SourceUnit};
use super::env::Environment;
use super::interp::{ActionTarget, Interpreter, RunContext, RunState, ScriptAction};
use super::stmt::{Notification, Script, ScriptId};
use super::value::Value;
use super::vars::{TrackVariables, Variables};

/// `Start` chains processed per trigger before the rest are dropped.
const MAX_STARTS: usize = 64;

// ── ReloadError ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ReloadError {
    /// The script has a live invocation.
    Running(String),
    /// The new source did not compile; the old version stays installed.
    Compile(Vec<CompileError>),
}

impl fmt::Display for ReloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadError::Running(name) => write!(f, "{name} is running, reload refused"),
            ReloadError::Compile(errors) => match errors.first() {
                Some(first) => write!(f, "reload failed: {first}"),
                None => write!(f, "reload failed"),
            },
        }
    }
}

impl std::error::Error for ReloadError {}

// ── Invocation ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Invocation {
    interp: Interpreter,
    /// The trigger of a sustainable script is still down.
    held: bool,
    /// Engine clock time of the next sustain notification.
    next_sustain: Option<u64>,
    /// End of the multi-click window.
    click_until: Option<u64>,
}

impl Invocation {
    fn is_done(&self) -> bool {
        self.interp.is_finished() && !self.held && self.click_until.is_none()
    }
}

// ── ScriptRuntime ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ScriptRuntime {
    catalog: Catalog,
    env: Environment,
    invocations: Vec<Invocation>,
    globals: Variables,
    track_vars: TrackVariables,
    next_id: u64,
}

impl ScriptRuntime {
    pub fn new(catalog: Catalog, env: Environment) -> Self {
        let mut rt = ScriptRuntime {
            catalog,
            env,
            invocations: Vec::new(),
            globals: Variables::new(),
            track_vars: TrackVariables::new(),
            next_id: 1,
        };
        rt.seed_parameters();
        rt
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn globals(&self) -> &Variables {
        &self.globals
    }

    pub fn track_variables(&self) -> &TrackVariables {
        &self.track_vars
    }

    /// Set a global variable.  User parameters validate the value first.
    pub fn set_global(&mut self, name: &str, value: Value) -> Result<(), String> {
        let value = match self.env.parameter(name) {
            Some(param) => param.accept(&value)?,
            None => value,
        };
        self.globals.set(name, value);
        Ok(())
    }

    pub fn interpreters(&self) -> impl Iterator<Item = &Interpreter> {
        self.invocations.iter().map(|inv| &inv.interp)
    }

    pub fn is_running(&self, script: ScriptId) -> bool {
        self.invocations.iter().any(|inv| inv.interp.script().id == script)
    }

    pub fn is_idle(&self) -> bool {
        self.invocations.is_empty()
    }

    fn seed_parameters(&mut self) {
        for param in self.env.parameters() {
            if !self.globals.contains(&param.name) {
                self.globals.set(&param.name, param.default.clone());
            }
        }
    }

    // ── Triggers ──────────────────────────────────────────────────────────────

    /// A binding for the script `name` fired.
    pub fn trigger(
        &mut self,
        engine: &mut dyn Engine,
        name: &str,
        direction: Direction,
        args: Vec<Value>,
    ) -> Result<(), String> {
        let script = self.env.find(name).cloned().ok_or_else(|| format!("no script named {name}"))?;
        self.trigger_script(engine, script, direction, args)
    }

    pub fn trigger_script(
        &mut self,
        engine: &mut dyn Engine,
        script: Arc<Script>,
        direction: Direction,
        args: Vec<Value>,
    ) -> Result<(), String> {
        if !script.is_triggerable() {
            return Err(format!("{} is a parameter script", script.name));
        }
        match direction {
            Direction::Down => self.press(engine, script, args),
            Direction::Up => {
                self.release(engine, script.id);
                Ok(())
            }
        }
    }

    fn press(&mut self, engine: &mut dyn Engine, script: Arc<Script>, args: Vec<Value>) -> Result<(), String> {
        let now = engine.millis();
        let labels = script.labels;
        let timers = |inv: &mut Invocation| {
            inv.held = labels.sustain.is_some() || labels.end_sustain.is_some();
            inv.next_sustain = labels.sustain.map(|_| now + script.sustain_msecs);
            if labels.click.is_some() || labels.end_click.is_some() {
                inv.click_until = Some(now + script.multiclick_msecs);
            }
        };

        // Re-trigger of a running invocation: click, then reentry.
        if let Some(index) = self.invocations.iter().rposition(|inv| inv.interp.script().id == script.id) {
            let inv = &mut self.invocations[index];
            let in_window = inv.click_until.is_some_and(|until| now <= until);
            let handled = (in_window && inv.interp.notify(Notification::Click))
                || inv.interp.notify(Notification::Reentry);
            if handled {
                timers(inv);
                self.run_one(engine, index, false);
                self.reap();
                return Ok(());
            }
        }

        if !engine.has_audio() && !script.flags.no_audio {
            return Err(format!("{}: no audio stream", script.name));
        }

        let tracks: Vec<Option<TrackId>> = if script.flags.focus_lock {
            let active = engine.active_track();
            let mut tracks: Vec<Option<TrackId>> = (0..engine.track_count() as u32)
                .map(TrackId)
                .filter(|&id| id == active || engine.track(id).is_some_and(|t| t.focused))
                .map(Some)
                .collect();
            if tracks.is_empty() {
                tracks.push(None);
            }
            tracks
        } else {
            vec![None]
        };

        for track in tracks {
            let mut interp = Interpreter::new(self.next_id, Arc::clone(&script)).with_args(args.clone());
            self.next_id += 1;
            if let Some(track) = track {
                interp = interp.with_track(track);
            }
            if script.flags.quantize {
                let target = track.unwrap_or_else(|| engine.active_track());
                if let Some(event) = engine.schedule_quantized(target) {
                    interp.defer_until(event);
                }
            }
            let mut inv = Invocation { interp, held: false, next_sustain: None, click_until: None };
            timers(&mut inv);
            debug!("{}: started invocation {}", script.name, inv.interp.id());
            self.invocations.push(inv);
            self.run_one(engine, self.invocations.len() - 1, false);
        }
        self.reap();
        Ok(())
    }

    fn release(&mut self, engine: &mut dyn Engine, script: ScriptId) {
        for index in 0..self.invocations.len() {
            let inv = &mut self.invocations[index];
            if inv.interp.script().id != script || !inv.held {
                continue;
            }
            inv.held = false;
            inv.next_sustain = None;
            if inv.interp.notify(Notification::EndSustain) {
                self.run_one(engine, index, false);
            }
        }
        self.reap();
    }

    // ── Block processing ──────────────────────────────────────────────────────

    /// Advance every invocation at the start of an audio block.
    pub fn run_block(&mut self, engine: &mut dyn Engine) {
        let now = engine.millis();
        let count = self.invocations.len();
        for index in 0..count {
            let inv = &mut self.invocations[index];
            let period = inv.interp.script().sustain_msecs.max(1);
            // At most one sustain per block; the handler runs before the next.
            if let Some(due) = inv.next_sustain.filter(|&due| inv.held && now >= due) {
                inv.interp.notify(Notification::Sustain);
                inv.next_sustain = Some(due + period);
            }
            if inv.click_until.is_some_and(|until| now > until) {
                inv.click_until = None;
                inv.interp.notify(Notification::EndClick);
            }
            self.run_one(engine, index, true);
        }
        self.reap();
    }

    fn run_one(&mut self, engine: &mut dyn Engine, index: usize, block_boundary: bool) {
        let Some(inv) = self.invocations.get_mut(index) else {
            return;
        };
        let mut ctx = RunContext {
            engine: &mut *engine,
            catalog: &self.catalog,
            env: &self.env,
            globals: &mut self.globals,
            track_vars: &mut self.track_vars,
        };
        if inv.interp.run(&mut ctx, block_boundary) == RunState::Finished {
            debug!("{}: invocation {} ended", inv.interp.script().name, inv.interp.id());
        }
        let from = inv.interp.id();
        let actions = inv.interp.take_actions();
        if !actions.is_empty() {
            self.apply(engine, from, actions);
        }
    }

    fn apply(&mut self, engine: &mut dyn Engine, from: u64, actions: Vec<ScriptAction>) {
        let mut queue: VecDeque<(u64, ScriptAction)> = actions.into_iter().map(|a| (from, a)).collect();
        let mut starts = 0;
        while let Some((from, action)) = queue.pop_front() {
            match action {
                ScriptAction::Start { script, args, track } => {
                    starts += 1;
                    if starts > MAX_STARTS {
                        warn!("too many scripts started at once, dropping the rest");
                        continue;
                    }
                    let Some(script) = self.env.script(script).cloned() else {
                        continue;
                    };
                    let interp = Interpreter::new(self.next_id, script).with_args(args).with_track(track);
                    self.next_id += 1;
                    self.invocations.push(Invocation { interp, held: false, next_sustain: None, click_until: None });
                    let inv = self.invocations.last_mut();
                    if let Some(inv) = inv {
                        let mut ctx = RunContext {
                            engine: &mut *engine,
                            catalog: &self.catalog,
                            env: &self.env,
                            globals: &mut self.globals,
                            track_vars: &mut self.track_vars,
                        };
                        inv.interp.run(&mut ctx, false);
                        let id = inv.interp.id();
                        queue.extend(inv.interp.take_actions().into_iter().map(|a| (id, a)));
                    }
                }
                ScriptAction::Cancel(target) => {
                    for inv in self.invocations.iter_mut().filter(|inv| targets(inv, from, target)) {
                        let mut ctx = RunContext {
                            engine: &mut *engine,
                            catalog: &self.catalog,
                            env: &self.env,
                            globals: &mut self.globals,
                            track_vars: &mut self.track_vars,
                        };
                        inv.interp.finish(&mut ctx);
                        inv.held = false;
                        inv.click_until = None;
                        inv.next_sustain = None;
                    }
                }
                ScriptAction::Interrupt(target) => {
                    for inv in self.invocations.iter_mut().filter(|inv| targets(inv, from, target)) {
                        inv.interp.cancel_wait(&mut *engine);
                    }
                }
            }
        }
    }

    fn reap(&mut self) {
        self.invocations.retain(|inv| !inv.is_done());
    }

    // ── Notices ───────────────────────────────────────────────────────────────

    /// Route an engine notice to the invocations waiting on it.  Affected
    /// invocations resume on the next [`run_block`](Self::run_block).
    pub fn handle(&mut self, notice: &EngineNotice) -> bool {
        let mut hit = false;
        for inv in &mut self.invocations {
            hit |= match notice {
                EngineNotice::EventCompleted(e) => inv.interp.event_completed(*e),
                EngineNotice::EventCanceled(e) => inv.interp.event_canceled(*e),
                EngineNotice::EventRescheduled { old, new } => inv.interp.event_rescheduled(*old, *new),
                EngineNotice::FunctionCompleted { name, .. } => inv.interp.function_completed(name),
            };
        }
        hit
    }

    pub fn thread_event_completed(&mut self, thread: ThreadEventId, code: i64) -> bool {
        let mut hit = false;
        for inv in &mut self.invocations {
            hit |= inv.interp.thread_completed(thread, code);
        }
        hit
    }

    /// Stop everything (global reset).
    pub fn cancel_all(&mut self, engine: &mut dyn Engine) {
        for inv in &mut self.invocations {
            let mut ctx = RunContext {
                engine: &mut *engine,
                catalog: &self.catalog,
                env: &self.env,
                globals: &mut self.globals,
                track_vars: &mut self.track_vars,
            };
            inv.interp.finish(&mut ctx);
        }
        if !self.invocations.is_empty() {
            info!("canceled {} script invocation(s)", self.invocations.len());
        }
        self.invocations.clear();
    }

    // ── Reload ────────────────────────────────────────────────────────────────

    /// Recompile one script in place.  Refused while it is running.
    pub fn reload(&mut self, unit: &SourceUnit) -> Result<Vec<CompileError>, ReloadError> {
        let existing = unit
            .path
            .as_deref()
            .and_then(|p| self.env.find_by_path(p))
            .or_else(|| self.env.find(&unit.name))
            .map(|s| (s.id, s.name.clone()));
        if let Some((id, name)) = existing {
            if self.is_running(id) {
                return Err(ReloadError::Running(name));
            }
        }
        let (env, errors) = Compiler::new(&self.catalog).recompile(&self.env, unit);
        match env {
            Some(env) => {
                self.env = env;
                self.seed_parameters();
                Ok(errors)
            }
            None => Err(ReloadError::Compile(errors)),
        }
    }

    /// Reload every autoload script whose file changed.  Returns how many
    /// were reloaded.
    pub fn reload_changed(&mut self) -> usize {
        let mut reloaded = 0;
        for path in self.env.changed_autoload_scripts() {
            let unit = match SourceUnit::from_file(&path) {
                Ok(unit) => unit,
                Err(e) => {
                    warn!("{}: {e}", path.display());
                    continue;
                }
            };
            match self.reload(&unit) {
                Ok(_) => {
                    info!("reloaded {}", path.display());
                    reloaded += 1;
                }
                Err(e) => warn!("{}: {e}", path.display()),
            }
        }
        reloaded
    }
}

fn targets(inv: &Invocation, from: u64, target: ActionTarget) -> bool {
    inv.interp.id() != from
        && match target {
            ActionTarget::All => true,
            ActionTarget::Script(id) => inv.interp.script().id == id,
        }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
