//! Script interpreter.
//!
//! An [`Interpreter`] is one running invocation of a script.  It never
//! blocks: [`Interpreter::run`] executes statements until the script
//! finishes or a wait frame is pushed, then returns.  The owner (normally
//! [`ScriptRuntime`](super::runtime::ScriptRuntime)) feeds completion
//! callbacks back in and calls `run` again once per audio block.
//!
//! Anything that affects other invocations (`Start`, `Cancel`, `Interrupt`)
//! is queued as a [`ScriptAction`] and drained by the owner after `run`.

use std::sync::Arc;

use log::{debug, error, info, trace, warn};

use crate::engine::{
    Catalog, Direction, Engine, EventId, FunctionCall, Job, ParamKind, ParamScope, ThreadEventId,
    TrackId,
};

use super::env::Environment;
use super::expr::{eval_expr, EvalContext, Expr};
use super::reference::Reference;
use super::stack::{
    CallFrame, CallKind, Cursor, ExecStack, Frame, IterState, IterationFrame, NotificationFrame,
    Resume, WaitFrame,
};
use super::stmt::{
    BlockId, BranchKind, CallStmt, CallTarget, IterKind, IterateStmt, Notification, Piece, Script,
    ScriptId, ScriptTarget, StmtId, StmtKind, Template, TrackSelector,
};
use super::value::Value;
use super::vars::{AutoVar, InternalVar, TrackVariables, VarScope, Variables};
use super::wait::{locate, WaitStmt, WaitTarget};

/// Backward jumps (loop passes, `Jump` to an earlier label, calls into a
/// procedure defined above) allowed in one `run` call before the invocation
/// is judged to be spinning and stopped.  Straight-line code never counts.
pub const MAX_LOOPS: usize = 10_000;

// ── Context ───────────────────────────────────────────────────────────────────

/// Everything outside the interpreter that a statement may touch.
pub struct RunContext<'a> {
    pub engine: &'a mut dyn Engine,
    pub catalog: &'a Catalog,
    pub env: &'a Environment,
    pub globals: &'a mut Variables,
    pub track_vars: &'a mut TrackVariables,
}

/// A request that involves invocations other than the one issuing it.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptAction {
    Start { script: ScriptId, args: Vec<Value>, track: TrackId },
    Cancel(ActionTarget),
    Interrupt(ActionTarget),
}

/// Invocations addressed by `Cancel`/`Interrupt`.  The issuer is never
/// included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTarget {
    All,
    Script(ScriptId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Waiting,
    Finished,
}

/// What a statement asks the run loop to do next.
enum Flow {
    Advance,
    /// Continue here; `None` ends the current block.
    Goto(Option<Cursor>),
    /// A wait frame was pushed.
    Suspend,
    Resume(Resume),
}

// ── Interpreter ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Interpreter {
    id: u64,
    script: Arc<Script>,
    current: Option<Cursor>,
    stack: ExecStack,
    /// Script-scope variables of this invocation.
    vars: Variables,
    /// Arguments passed by the trigger or by `Start`.
    args: Vec<Value>,
    target_track: Option<TrackId>,
    trigger_value: Value,
    sustain_count: i64,
    click_count: i64,
    interrupted: bool,
    return_code: i64,
    last_event: Option<EventId>,
    last_thread: Option<ThreadEventId>,
    /// Parameter values to put back when the invocation ends (`Use`).
    restores: Vec<(String, ParamScope, Value)>,
    actions: Vec<ScriptAction>,
}

impl Interpreter {
    pub fn new(id: u64, script: Arc<Script>) -> Self {
        let current = script.first(BlockId::ROOT).map(|s| Cursor::new(&script, s));
        Interpreter {
            id,
            script,
            current,
            stack: ExecStack::new(),
            vars: Variables::new(),
            args: Vec::new(),
            target_track: None,
            trigger_value: Value::Null,
            sustain_count: 0,
            click_count: 0,
            interrupted: false,
            return_code: 0,
            last_event: None,
            last_thread: None,
            restores: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.trigger_value = args.first().cloned().unwrap_or_default();
        self.args = args;
        self
    }

    /// Direct function statements at `track` instead of the active track.
    pub fn with_track(mut self, track: TrackId) -> Self {
        self.target_track = Some(track);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn script(&self) -> &Arc<Script> {
        &self.script
    }

    pub fn target_track(&self) -> Option<TrackId> {
        self.target_track
    }

    pub fn stack(&self) -> &ExecStack {
        &self.stack
    }

    pub fn is_finished(&self) -> bool {
        self.current.is_none() && self.stack.is_empty()
    }

    /// Suspended on a wait frame that has not cleared.
    pub fn is_waiting(&self) -> bool {
        matches!(self.stack.top(), Some(Frame::Wait(w)) if !w.is_clear())
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn return_code(&self) -> i64 {
        self.return_code
    }

    pub fn variables(&self) -> &Variables {
        &self.vars
    }

    pub fn sustain_count(&self) -> i64 {
        self.sustain_count
    }

    pub fn click_count(&self) -> i64 {
        self.click_count
    }

    pub fn take_actions(&mut self) -> Vec<ScriptAction> {
        std::mem::take(&mut self.actions)
    }

    /// Hold the first statement until `event` completes (quantized start).
    pub fn defer_until(&mut self, event: EventId) {
        self.stack.push(Frame::Wait(WaitFrame { event: Some(event), ..WaitFrame::default() }));
    }

    // ── Run loop ──────────────────────────────────────────────────────────────

    /// Advance until the script finishes or suspends.  `block_boundary`
    /// clears a "wait for the next audio block" condition.
    pub fn run(&mut self, ctx: &mut RunContext<'_>, block_boundary: bool) -> RunState {
        if block_boundary {
            // The innermost wait, even beneath a running notification handler.
            if let Some(w) = self.stack.waits_mut().next() {
                w.block = false;
            }
        }
        let mut loops = 0;
        loop {
            if let Some(Frame::Wait(w)) = self.stack.top() {
                if !w.is_clear() {
                    return RunState::Waiting;
                }
                if let Some(w) = self.stack.pop_wait() {
                    if let Some(stmt) = w.stmt {
                        self.current = stmt.next();
                    }
                }
                continue;
            }
            let Some(cursor) = self.current.take() else {
                let resume = self.stack.unwind();
                if !self.resume(resume) {
                    self.finish(ctx);
                    return RunState::Finished;
                }
                continue;
            };

            match self.step(ctx, &cursor) {
                Ok(Flow::Advance) => self.current = cursor.next(),
                Ok(Flow::Goto(next)) => {
                    let backward = next.as_ref().is_some_and(|n| {
                        n.stmt <= cursor.stmt && Arc::ptr_eq(&n.script, &cursor.script)
                    });
                    if backward {
                        loops += 1;
                        if loops > MAX_LOOPS {
                            error!(
                                "{}:{}: no wait after {MAX_LOOPS} loops, stopping",
                                cursor.script.name,
                                cursor.line()
                            );
                            self.finish(ctx);
                            return RunState::Finished;
                        }
                    }
                    self.current = next;
                }
                Ok(Flow::Suspend) => self.current = None,
                Ok(Flow::Resume(resume)) => {
                    if !self.resume(resume) {
                        self.finish(ctx);
                        return RunState::Finished;
                    }
                }
                Err(msg) => {
                    error!("{}:{}: {msg}", cursor.script.name, cursor.line());
                    self.current = cursor.next();
                }
            }
        }
    }

    /// Apply an unwind result.  `false` when nothing is left to run.
    fn resume(&mut self, resume: Resume) -> bool {
        match resume {
            Resume::At(c) => self.current = Some(c),
            Resume::After(c) => self.current = c.next(),
            Resume::Beneath => {}
            Resume::Finished => return false,
        }
        true
    }

    /// End the invocation: release pending engine events and restore
    /// parameters changed by `Use`.
    pub fn finish(&mut self, ctx: &mut RunContext<'_>) {
        for event in self.stack.clear() {
            ctx.engine.cancel_event(event);
        }
        self.current = None;
        for (name, scope, value) in self.restores.drain(..) {
            if let Err(e) = ctx.engine.set_parameter(&name, scope, &value) {
                warn!("{}: restoring {name}: {e}", self.script.name);
            }
        }
        debug!("{}: finished", self.script.name);
    }

    // ── Callbacks ─────────────────────────────────────────────────────────────

    /// An engine event finished.  Returns whether this invocation tracked it.
    pub fn event_completed(&mut self, event: EventId) -> bool {
        if self.last_event == Some(event) {
            self.last_event = None;
        }
        let mut found = false;
        for w in self.stack.waits_mut().filter(|w| w.event == Some(event)) {
            w.event = None;
            found = true;
        }
        found
    }

    /// The engine dropped an event without performing it.  The wait it
    /// held is released the same way as on completion.
    pub fn event_canceled(&mut self, event: EventId) -> bool {
        self.event_completed(event)
    }

    pub fn event_rescheduled(&mut self, old: EventId, new: EventId) -> bool {
        if self.last_event == Some(old) {
            self.last_event = Some(new);
        }
        let mut found = false;
        for w in self.stack.waits_mut().filter(|w| w.event == Some(old)) {
            w.event = Some(new);
            found = true;
        }
        found
    }

    /// A background job finished with `code`.
    pub fn thread_completed(&mut self, thread: ThreadEventId, code: i64) -> bool {
        let mut found = self.last_thread == Some(thread);
        if found {
            self.last_thread = None;
            self.return_code = code;
        }
        for w in self.stack.waits_mut().filter(|w| w.thread == Some(thread)) {
            w.thread = None;
            found = true;
        }
        if found {
            self.return_code = code;
        }
        found
    }

    pub fn function_completed(&mut self, name: &str) -> bool {
        let mut found = false;
        for w in self.stack.waits_mut() {
            if w.function.as_deref().is_some_and(|f| f.eq_ignore_ascii_case(name)) {
                w.function = None;
                found = true;
            }
        }
        found
    }

    /// Abandon the innermost wait: its engine event goes back to the track
    /// without being performed and `interrupted` is set.
    pub fn cancel_wait(&mut self, engine: &mut dyn Engine) -> bool {
        if let Some(w) = self.stack.pop_wait() {
            if let Some(event) = w.event {
                engine.cancel_event(event);
            }
            if let Some(stmt) = w.stmt {
                self.current = stmt.next();
            }
            self.interrupted = true;
            return true;
        }
        // Buried beneath a notification handler: clear it so it pops when
        // the handler returns.
        let Some(w) = self.stack.waits_mut().next() else {
            return false;
        };
        if let Some(event) = w.event.take() {
            engine.cancel_event(event);
        }
        w.thread = None;
        w.function = None;
        w.block = false;
        self.interrupted = true;
        true
    }

    /// Enter a notification label.  Returns `false` when the script does not
    /// declare one.
    pub fn notify(&mut self, which: Notification) -> bool {
        let Some(label) = self.script.notification_label(which) else {
            return false;
        };
        match which {
            Notification::Sustain => self.sustain_count += 1,
            Notification::Click => self.click_count += 1,
            _ => {}
        }
        trace!("{}: notify {}", self.script.name, which.label());
        let resume = self.current.take();
        self.stack.push(Frame::Notification(NotificationFrame { which, resume }));
        self.current = Some(Cursor::new(&self.script, label));
        true
    }

    // ── References ────────────────────────────────────────────────────────────

    fn current_track(&self, engine: &dyn Engine) -> TrackId {
        self.stack
            .iteration_track()
            .or(self.target_track)
            .unwrap_or_else(|| engine.active_track())
    }

    fn param_scope(&self, kind: ParamKind, engine: &dyn Engine) -> ParamScope {
        match kind {
            ParamKind::Global => ParamScope::Global,
            ParamKind::Track => ParamScope::Track(self.current_track(engine)),
            ParamKind::Setup => ParamScope::Setup,
        }
    }

    /// Script-scope store: the innermost called script's, or our own.
    fn script_vars(&mut self) -> &mut Variables {
        match self.stack.call_of_kind_mut(CallKind::Script) {
            Some(frame) => &mut frame.locals,
            None => &mut self.vars,
        }
    }

    fn script_vars_ref(&self) -> &Variables {
        self.stack
            .iter()
            .find_map(|f| match f {
                Frame::Call(c) if c.kind == CallKind::Script => Some(&c.locals),
                _ => None,
            })
            .unwrap_or(&self.vars)
    }

    /// Locals of the running procedure and the procedures enclosing it,
    /// then the script-scope store.
    fn local_ref(&self, name: &str) -> Option<&Value> {
        self.stack.local(name).or_else(|| self.script_vars_ref().get(name))
    }

    pub fn get(&self, ctx: &RunContext<'_>, reference: &Reference) -> Value {
        match reference {
            Reference::Name(name) => Value::Str(name.clone()),
            Reference::Literal(v) => v.clone(),
            Reference::Arg(i) => {
                let args = self.stack.call().map_or(&self.args, |c| &c.args);
                args.get(*i).cloned().unwrap_or_default()
            }
            Reference::Internal(var) => self.internal(ctx, *var),
            Reference::Variable { name, scope } => {
                let value = match scope {
                    VarScope::Local => self.local_ref(name),
                    VarScope::Script => self.script_vars_ref().get(name),
                    VarScope::Track => ctx.track_vars.get(self.current_track(&*ctx.engine), name),
                    VarScope::Global => ctx.globals.get(name),
                };
                value.cloned().unwrap_or_default()
            }
            Reference::Parameter { name, kind } => {
                let scope = self.param_scope(*kind, &*ctx.engine);
                ctx.engine.get_parameter(name, scope).unwrap_or_default()
            }
            Reference::Auto(AutoVar::Interrupted) => Value::from(self.interrupted),
            Reference::Auto(AutoVar::ReturnCode) => Value::Int(self.return_code),
        }
    }

    pub fn set(&mut self, ctx: &mut RunContext<'_>, reference: &Reference, value: Value)
        -> Result<(), String>
    {
        match reference {
            Reference::Name(name) => Err(format!("{name} is not a variable")),
            Reference::Literal(v) => Err(format!("cannot assign to literal {v}")),
            Reference::Arg(i) => Err(format!("${} is a read-only argument", i + 1)),
            Reference::Internal(InternalVar::SustainCount) => {
                self.sustain_count = value.as_int();
                Ok(())
            }
            Reference::Internal(InternalVar::ClickCount) => {
                self.click_count = value.as_int();
                Ok(())
            }
            Reference::Internal(var) => Err(format!("{} is read-only", var.name())),
            Reference::Variable { name, scope } => {
                match scope {
                    VarScope::Local => match self.stack.local_mut(name) {
                        Some(locals) => locals.set(name, value),
                        None => self.script_vars().set(name, value),
                    },
                    VarScope::Script => self.script_vars().set(name, value),
                    VarScope::Track => {
                        let track = self.current_track(&*ctx.engine);
                        ctx.track_vars.table(track).set(name, value);
                    }
                    VarScope::Global => ctx.globals.set(name, value),
                }
                Ok(())
            }
            Reference::Parameter { name, kind } => {
                let scope = self.param_scope(*kind, &*ctx.engine);
                ctx.engine.set_parameter(name, scope, &value)
            }
            Reference::Auto(AutoVar::Interrupted) => {
                self.interrupted = value.as_bool();
                Ok(())
            }
            Reference::Auto(AutoVar::ReturnCode) => {
                self.return_code = value.as_int();
                Ok(())
            }
        }
    }

    fn internal(&self, ctx: &RunContext<'_>, var: InternalVar) -> Value {
        let engine = &*ctx.engine;
        let id = self.current_track(engine);
        match var {
            InternalVar::TrackCount => return Value::Int(engine.track_count() as i64),
            InternalVar::SampleRate => return Value::Int(engine.sample_rate() as i64),
            InternalVar::ScriptName => return Value::Str(self.script.name.clone()),
            InternalVar::TriggerValue => return self.trigger_value.clone(),
            InternalVar::SustainCount => return Value::Int(self.sustain_count),
            InternalVar::ClickCount => return Value::Int(self.click_count),
            InternalVar::TrackNumber => return Value::Int(id.number() as i64),
            _ => {}
        }
        let Some(t) = engine.track(id) else {
            return Value::Null;
        };
        match var {
            InternalVar::LoopFrames => Value::from(t.loop_frames),
            InternalVar::LoopFrame => Value::from(t.frame),
            InternalVar::CycleFrames => Value::from(t.cycle_frames()),
            InternalVar::CycleCount => Value::Int(t.cycles as i64),
            InternalVar::CycleNumber => Value::from(t.cycle_number()),
            InternalVar::SubCycleFrames => Value::from(t.subcycle_frames()),
            InternalVar::SubCycleNumber => Value::from(t.subcycle_number()),
            InternalVar::Mode => Value::from(t.mode.name()),
            InternalVar::IsRecording => Value::from(t.is_recording()),
            InternalVar::IsMuted => Value::from(t.muted),
            InternalVar::IsPaused => Value::from(t.paused),
            _ => Value::Null,
        }
    }

    fn eval(&mut self, ctx: &mut RunContext<'_>, expr: &Expr) -> Result<Value, String> {
        eval_expr(expr, &mut Scope { it: self, ctx })
    }

    fn render(&mut self, ctx: &mut RunContext<'_>, template: &Template) -> String {
        let mut parts = Vec::with_capacity(template.pieces.len());
        for piece in &template.pieces {
            match piece {
                Piece::Text(t) => parts.push(t.clone()),
                Piece::Ref(r) => parts.push(self.get(ctx, r).as_str()),
            }
        }
        parts.join(" ")
    }

    // ── Statements ────────────────────────────────────────────────────────────

    fn step(&mut self, ctx: &mut RunContext<'_>, cursor: &Cursor) -> Result<Flow, String> {
        let script = Arc::clone(&cursor.script);
        let Some(stmt) = script.stmt(cursor.stmt) else {
            return Ok(Flow::Goto(None));
        };
        trace!("{}:{}: {}", script.name, stmt.line, stmt.kind.keyword());
        match &stmt.kind {
            StmtKind::Function(f) => {
                let arg = match &f.arg {
                    Some(e) => Some(self.eval(ctx, e)?),
                    None => None,
                };
                match &f.target {
                    CallTarget::Engine(name) => self.invoke(ctx, name, f.direction, arg)?,
                    CallTarget::Script(id) => {
                        return self.call_script(ctx, cursor, *id, arg.into_iter().collect());
                    }
                    CallTarget::Proc(_) | CallTarget::Unresolved => {
                        debug!("{}:{}: {} is unresolved, skipped", script.name, stmt.line, f.name);
                    }
                }
                Ok(Flow::Advance)
            }
            StmtKind::Wait(w) => self.wait(ctx, cursor, w),
            StmtKind::Set(s) => {
                let value = self.eval(ctx, &s.value)?;
                if s.restore {
                    if let Reference::Parameter { name, kind } = &s.target {
                        let scope = self.param_scope(*kind, &*ctx.engine);
                        let saved = self.restores.iter().any(|(n, sc, _)| n == name && *sc == scope);
                        if !saved {
                            let old = ctx.engine.get_parameter(name, scope).unwrap_or_default();
                            self.restores.push((name.clone(), scope, old));
                        }
                    }
                }
                self.set(ctx, &s.target, value)?;
                Ok(Flow::Advance)
            }
            StmtKind::Variable(v) => {
                let init = match &v.init {
                    Some(e) => Some(self.eval(ctx, e)?),
                    None => None,
                };
                let table = match v.scope {
                    VarScope::Local => match self.stack.call_mut() {
                        Some(c) => &mut c.locals,
                        None => &mut self.vars,
                    },
                    VarScope::Script => self.script_vars(),
                    VarScope::Track => {
                        let track = self.current_track(&*ctx.engine);
                        ctx.track_vars.table(track)
                    }
                    VarScope::Global => &mut *ctx.globals,
                };
                match init {
                    Some(value) => table.set(&v.name, value),
                    None => table.declare(&v.name),
                }
                Ok(Flow::Advance)
            }
            StmtKind::Branch(b) => {
                if b.kind != BranchKind::If {
                    // Reached by falling out of a taken clause.
                    return Ok(Flow::Goto(after(&script, b.end)));
                }
                let mut clause = Some(cursor.stmt);
                while let Some(id) = clause {
                    let Some(StmtKind::Branch(c)) = script.stmt(id).map(|s| &s.kind) else {
                        break;
                    };
                    let taken = match &c.cond {
                        Some(cond) if c.kind != BranchKind::Else => self.eval(ctx, cond)?.as_bool(),
                        _ => true,
                    };
                    if taken {
                        return Ok(Flow::Goto(after(&script, Some(id))));
                    }
                    clause = c.next_clause;
                }
                Ok(Flow::Goto(after(&script, b.end)))
            }
            StmtKind::EndBranch
            | StmtKind::Label(_)
            | StmtKind::Proc(_)
            | StmtKind::EndProc
            | StmtKind::Param(_)
            | StmtKind::EndParam => Ok(Flow::Advance),
            StmtKind::Jump(j) => {
                if let Some(cond) = &j.cond {
                    if !self.eval(ctx, cond)?.as_bool() {
                        return Ok(Flow::Advance);
                    }
                }
                let target = match (j.target, &j.dynamic) {
                    (Some(target), _) => target,
                    (None, Some(dynamic)) => {
                        let label = self.get(ctx, dynamic).as_str();
                        script
                            .find_label(stmt.block, &label)
                            .ok_or_else(|| format!("Jump: unknown label {label}"))?
                    }
                    (None, None) => return Err(format!("Jump: unknown label {}", j.label)),
                };
                let target = Cursor::new(&script, target);
                self.leave_loops(&target);
                Ok(Flow::Goto(Some(target)))
            }
            StmtKind::Iterate(i) => {
                let state = match &i.kind {
                    IterKind::ForTracks(selector) => {
                        let tracks = self.select_tracks(ctx, selector)?;
                        (!tracks.is_empty()).then_some(IterState::Tracks(tracks))
                    }
                    IterKind::Repeat(count) => {
                        let n = self.eval(ctx, count)?.as_int();
                        (n > 0).then_some(IterState::Count(n))
                    }
                    IterKind::While(cond) => {
                        self.eval(ctx, cond)?.as_bool().then_some(IterState::While)
                    }
                };
                match state {
                    Some(state) => {
                        let start = cursor.clone();
                        self.stack.push(Frame::Iteration(IterationFrame { start, state, index: 0 }));
                        Ok(Flow::Advance)
                    }
                    None => Ok(Flow::Goto(after(&script, i.end))),
                }
            }
            StmtKind::Next { start } => {
                let Some(start) = start.map(|s| Cursor::new(&script, s)) else {
                    return Ok(Flow::Advance);
                };
                let pass = match self.stack.iteration_mut() {
                    Some(it) if it.start.same(&start) => {
                        Some((matches!(it.state, IterState::While), it.has_more()))
                    }
                    _ => None,
                };
                let Some((is_while, mut more)) = pass else {
                    return Err("Next: loop is not running".into());
                };
                if is_while {
                    let cond = match script.stmt(start.stmt).map(|s| &s.kind) {
                        Some(StmtKind::Iterate(IterateStmt { kind: IterKind::While(e), .. })) => e,
                        _ => return Err("Next: loop is not running".into()),
                    };
                    more = match self.eval(ctx, cond) {
                        Ok(v) => v.as_bool(),
                        Err(e) => {
                            self.stack.pop_iteration();
                            return Err(e);
                        }
                    };
                }
                if more {
                    if let Some(it) = self.stack.iteration_mut() {
                        it.index += 1;
                    }
                    Ok(Flow::Goto(start.next()))
                } else {
                    self.stack.pop_iteration();
                    Ok(Flow::Advance)
                }
            }
            StmtKind::Break { start } => {
                let Some(start) = start.map(|s| Cursor::new(&script, s)) else {
                    return Ok(Flow::Advance);
                };
                let running = self.stack.iteration_mut().is_some_and(|it| it.start.same(&start));
                if !running {
                    return Err("Break: loop is not running".into());
                }
                self.stack.pop_iteration();
                let end = match script.stmt(start.stmt).map(|s| &s.kind) {
                    Some(StmtKind::Iterate(i)) => i.end,
                    _ => None,
                };
                Ok(Flow::Goto(after(&script, end)))
            }
            StmtKind::Call(c) => self.call(ctx, cursor, c),
            StmtKind::Start(c) => {
                let args = self.eval_args(ctx, &c.args)?;
                match &c.target {
                    CallTarget::Script(id) => {
                        let track = self.current_track(&*ctx.engine);
                        self.actions.push(ScriptAction::Start { script: *id, args, track });
                    }
                    _ => debug!("{}:{}: Start {} is unresolved, skipped", script.name, stmt.line, c.name),
                }
                Ok(Flow::Advance)
            }
            StmtKind::Echo(t) => {
                let text = self.render(ctx, t);
                info!("{}: {text}", script.name);
                ctx.engine.submit_job(Job::Echo { text });
                Ok(Flow::Advance)
            }
            StmtKind::Message(t) => {
                let text = self.render(ctx, t);
                ctx.engine.message(&text);
                Ok(Flow::Advance)
            }
            StmtKind::Prompt(t) => {
                let text = self.render(ctx, t);
                let thread = ctx.engine.submit_job(Job::Prompt { text });
                self.last_thread = Some(thread);
                self.stack.push(Frame::Wait(WaitFrame {
                    stmt: Some(cursor.clone()),
                    thread: Some(thread),
                    ..WaitFrame::default()
                }));
                Ok(Flow::Suspend)
            }
            StmtKind::Load(t) => {
                let path = self.render(ctx, t);
                self.last_thread = Some(ctx.engine.submit_job(Job::Load { path }));
                Ok(Flow::Advance)
            }
            StmtKind::Save(t) => {
                let path = self.render(ctx, t);
                self.last_thread = Some(ctx.engine.submit_job(Job::Save { path }));
                Ok(Flow::Advance)
            }
            StmtKind::Diff(a, b) => {
                let left = self.render(ctx, a);
                let right = self.render(ctx, b);
                self.last_thread = Some(ctx.engine.submit_job(Job::Diff { left, right }));
                Ok(Flow::Advance)
            }
            StmtKind::End => Ok(Flow::Resume(self.stack.end())),
            StmtKind::Cancel(target) => {
                let target = self.action_target(target)?;
                self.actions.push(ScriptAction::Cancel(target));
                Ok(Flow::Advance)
            }
            StmtKind::Interrupt(target) => {
                let target = self.action_target(target)?;
                self.actions.push(ScriptAction::Interrupt(target));
                Ok(Flow::Advance)
            }
        }
    }

    fn invoke(
        &mut self,
        ctx: &mut RunContext<'_>,
        name: &str,
        direction: Option<Direction>,
        arg: Option<Value>,
    ) -> Result<(), String> {
        let track = self.current_track(&*ctx.engine);
        let sustainable = ctx.catalog.function(name).is_some_and(|f| f.sustainable);
        let directions: &[Direction] = match direction {
            Some(Direction::Down) => &[Direction::Down],
            Some(Direction::Up) => &[Direction::Up],
            None if sustainable => &[Direction::Down, Direction::Up],
            None => &[Direction::Down],
        };
        for &direction in directions {
            let call = FunctionCall { name, direction, arg: arg.clone(), track };
            if let Some(event) = ctx.engine.invoke(&call)? {
                self.last_event = Some(event);
            }
        }
        Ok(())
    }

    fn wait(&mut self, ctx: &mut RunContext<'_>, cursor: &Cursor, w: &WaitStmt) -> Result<Flow, String> {
        let amount = match &w.amount {
            Some(e) => self.eval(ctx, e)?.as_int(),
            None => 1,
        };
        let track = self.current_track(&*ctx.engine);
        let mut frame = WaitFrame {
            stmt: Some(cursor.clone()),
            in_pause: w.in_pause,
            track: Some(track),
            ..WaitFrame::default()
        };
        match &w.target {
            WaitTarget::Relative(_) | WaitTarget::Absolute(_) | WaitTarget::LoopStart | WaitTarget::LoopEnd => {
                let state = ctx.engine.track(track).ok_or_else(|| format!("no track {}", track.number()))?;
                let point = locate(&w.target, amount, &state, ctx.engine.sample_rate())?;
                frame.target_frame = Some(point.frame);
                frame.event = ctx.engine.schedule_wait(track, point.delay, w.in_pause);
                if frame.event.is_none() {
                    return Err("Wait: the engine could not schedule the wait".into());
                }
            }
            WaitTarget::Sync(boundary) => {
                let count = amount.max(1) as u32;
                frame.event = ctx.engine.schedule_sync_wait(track, *boundary, count);
                if frame.event.is_none() {
                    return Err(format!("Wait: no sync source for {boundary:?}"));
                }
            }
            WaitTarget::Last => match self.last_event {
                Some(event) => frame.event = Some(event),
                None => return Ok(Flow::Advance),
            },
            WaitTarget::Thread => match self.last_thread {
                Some(thread) => frame.thread = Some(thread),
                None => return Ok(Flow::Advance),
            },
            WaitTarget::Function(name) => frame.function = Some(name.clone()),
            WaitTarget::Block => frame.block = true,
        }
        self.stack.push(Frame::Wait(frame));
        Ok(Flow::Suspend)
    }

    fn eval_args(&mut self, ctx: &mut RunContext<'_>, exprs: &[Expr]) -> Result<Vec<Value>, String> {
        let mut args = self.stack.pool().values();
        for e in exprs {
            args.push(self.eval(ctx, e)?);
        }
        Ok(args)
    }

    fn call(&mut self, ctx: &mut RunContext<'_>, cursor: &Cursor, c: &CallStmt) -> Result<Flow, String> {
        match &c.target {
            CallTarget::Proc(block) => {
                let args = self.eval_args(ctx, &c.args)?;
                let Some(first) = cursor.script.first(*block) else {
                    return Ok(Flow::Advance);
                };
                let locals = self.stack.pool().vars();
                self.stack.push(Frame::Call(CallFrame {
                    kind: CallKind::Proc,
                    caller: Some(cursor.clone()),
                    block: *block,
                    locals,
                    args,
                }));
                Ok(Flow::Goto(Some(Cursor::new(&cursor.script, first))))
            }
            CallTarget::Script(id) => {
                let args = self.eval_args(ctx, &c.args)?;
                self.call_script(ctx, cursor, *id, args)
            }
            CallTarget::Engine(name) => {
                let arg = match c.args.first() {
                    Some(e) => Some(self.eval(ctx, e)?),
                    None => None,
                };
                self.invoke(ctx, name, None, arg)?;
                Ok(Flow::Advance)
            }
            CallTarget::Unresolved => {
                debug!("{}:{}: Call {} is unresolved, skipped", cursor.script.name, cursor.line(), c.name);
                Ok(Flow::Advance)
            }
        }
    }

    fn call_script(
        &mut self,
        ctx: &mut RunContext<'_>,
        cursor: &Cursor,
        id: ScriptId,
        args: Vec<Value>,
    ) -> Result<Flow, String> {
        let callee = ctx.env.script(id).ok_or_else(|| format!("script {} is not installed", id.0))?;
        let Some(first) = callee.first(BlockId::ROOT) else {
            return Ok(Flow::Advance);
        };
        let locals = self.stack.pool().vars();
        self.stack.push(Frame::Call(CallFrame {
            kind: CallKind::Script,
            caller: Some(cursor.clone()),
            block: BlockId::ROOT,
            locals,
            args,
        }));
        Ok(Flow::Goto(Some(Cursor::new(callee, first))))
    }

    /// Pop the loops of the current call whose body does not contain
    /// `target`.
    fn leave_loops(&mut self, target: &Cursor) {
        while let Some(it) = self.stack.iteration_mut() {
            let start = &it.start;
            let end = match start.script.stmt(start.stmt).map(|s| &s.kind) {
                Some(StmtKind::Iterate(i)) => i.end,
                _ => None,
            };
            let inside = Arc::ptr_eq(&start.script, &target.script)
                && target.stmt > start.stmt
                && end.is_some_and(|end| target.stmt <= end);
            if inside {
                break;
            }
            self.stack.pop_iteration();
        }
    }

    fn select_tracks(&mut self, ctx: &mut RunContext<'_>, selector: &TrackSelector)
        -> Result<Vec<TrackId>, String>
    {
        let mut tracks = self.stack.pool().tracks();
        let count = ctx.engine.track_count() as u32;
        let all = (0..count).map(TrackId);
        match selector {
            TrackSelector::All => tracks.extend(all),
            TrackSelector::Tracks(list) => {
                for e in list {
                    let n = self.eval(ctx, e)?.as_int();
                    if n < 1 || n > count as i64 {
                        warn!("{}: For: no track {n}", self.script.name);
                        continue;
                    }
                    tracks.push(TrackId(n as u32 - 1));
                }
            }
            _ => {
                let engine = &*ctx.engine;
                tracks.extend(all.filter(|&id| {
                    engine.track(id).is_some_and(|t| match selector {
                        TrackSelector::Focused => t.focused,
                        TrackSelector::Muted => t.muted,
                        TrackSelector::Playing => t.is_playing(),
                        TrackSelector::Recording => t.is_recording(),
                        TrackSelector::Group(g) => t.group.as_deref().is_some_and(|tg| tg.eq_ignore_ascii_case(g)),
                        TrackSelector::All | TrackSelector::Tracks(_) => true,
                    })
                }));
            }
        }
        Ok(tracks)
    }

    fn action_target(&self, target: &ScriptTarget) -> Result<ActionTarget, String> {
        match target {
            ScriptTarget::Current => Ok(ActionTarget::Script(self.script.id)),
            ScriptTarget::All => Ok(ActionTarget::All),
            ScriptTarget::Named { script: Some(id), .. } => Ok(ActionTarget::Script(*id)),
            ScriptTarget::Named { name, script: None } => Err(format!("no script named {name}")),
        }
    }
}

/// The statement after `id`; `None` when `id` is absent or last in its block.
fn after(script: &Arc<Script>, id: Option<StmtId>) -> Option<Cursor> {
    id.and_then(|id| Cursor::new(script, id).next())
}

/// Adapter giving the expression evaluator access to references.
struct Scope<'i, 'c, 'e> {
    it: &'i mut Interpreter,
    ctx: &'c mut RunContext<'e>,
}

impl EvalContext for Scope<'_, '_, '_> {
    fn get(&mut self, reference: &Reference) -> Value {
        self.it.get(self.ctx, reference)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
