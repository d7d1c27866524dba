//! Explicit execution stack.
//!
//! Scripts suspend in the middle of a procedure, a loop or a notification
//! handler, so the interpreter cannot use the host call stack.  Each
//! [`Frame`] is exactly one of call, iteration, notification or wait, and
//! its resume rule can be read off the variant alone (see
//! [`ExecStack::unwind`]).
//!
//! Frames own a few heap buffers (local variables, argument lists, track
//! snapshots).  Popped frames hand those buffers back to a [`FramePool`] so
//! that a long-running invocation stops allocating once warmed up.

use std::sync::Arc;

use crate::engine::{EventId, ThreadEventId, TrackId};

use super::stmt::{BlockId, Notification, Script, StmtId};
use super::value::Value;
use super::vars::Variables;

/// A position in some script.
#[derive(Debug, Clone)]
pub struct Cursor {
    pub script: Arc<Script>,
    pub stmt: StmtId,
}

impl Cursor {
    pub fn new(script: &Arc<Script>, stmt: StmtId) -> Self {
        Cursor { script: Arc::clone(script), stmt }
    }

    /// The statement after this one in the same block.
    pub fn next(&self) -> Option<Cursor> {
        let next = self.script.stmt(self.stmt)?.next?;
        Some(Cursor::new(&self.script, next))
    }

    pub fn line(&self) -> usize {
        self.script.line(self.stmt)
    }

    pub fn same(&self, other: &Cursor) -> bool {
        self.stmt == other.stmt && Arc::ptr_eq(&self.script, &other.script)
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Proc,
    Script,
}

/// Entry into a procedure or another script.
#[derive(Debug)]
pub struct CallFrame {
    pub kind: CallKind,
    /// The `Call` statement; execution continues after it on return.
    pub caller: Option<Cursor>,
    /// Procedure body, or the root block of a called script.
    pub block: BlockId,
    /// Procedure locals, or the callee's script-scope variables.
    pub locals: Variables,
    pub args: Vec<Value>,
}

#[derive(Debug)]
pub enum IterState {
    /// Track snapshot taken when the loop started.
    Tracks(Vec<TrackId>),
    /// Repeat bound.
    Count(i64),
    /// Condition re-evaluated at each `Next`.
    While,
}

#[derive(Debug)]
pub struct IterationFrame {
    /// The `For`/`Repeat`/`While` statement.
    pub start: Cursor,
    pub state: IterState,
    /// Zero-based pass number.
    pub index: usize,
}

impl IterationFrame {
    /// Track of the current pass of a for-each-track loop.
    pub fn track(&self) -> Option<TrackId> {
        match &self.state {
            IterState::Tracks(tracks) => tracks.get(self.index).copied(),
            _ => None,
        }
    }

    /// Whether another pass follows the current one (the `While` condition
    /// is checked by the caller).
    pub fn has_more(&self) -> bool {
        match &self.state {
            IterState::Tracks(tracks) => self.index + 1 < tracks.len(),
            IterState::Count(n) => ((self.index + 1) as i64) < *n,
            IterState::While => true,
        }
    }
}

/// Dispatch of a notification label.
#[derive(Debug)]
pub struct NotificationFrame {
    pub which: Notification,
    /// Where to continue when the handler ends; `None` returns to whatever
    /// is beneath (usually a suspended wait).
    pub resume: Option<Cursor>,
}

/// Suspension.  Clears when every tracked condition has cleared.
#[derive(Debug, Default)]
pub struct WaitFrame {
    /// The `Wait` statement; execution continues after it.
    pub stmt: Option<Cursor>,
    pub event: Option<EventId>,
    pub thread: Option<ThreadEventId>,
    /// Completion of any function with this name.
    pub function: Option<String>,
    /// Until the next audio block.
    pub block: bool,
    pub in_pause: bool,
    /// Loop frame the wait ends on, for position waits.
    pub target_frame: Option<u64>,
    pub track: Option<TrackId>,
}

impl WaitFrame {
    pub fn is_clear(&self) -> bool {
        self.event.is_none() && self.thread.is_none() && self.function.is_none() && !self.block
    }
}

#[derive(Debug)]
pub enum Frame {
    Call(CallFrame),
    Iteration(IterationFrame),
    Notification(NotificationFrame),
    Wait(WaitFrame),
}

/// What to do after frames have been popped.
#[derive(Debug)]
pub enum Resume {
    /// Continue at this statement.
    At(Cursor),
    /// Continue after this statement.
    After(Cursor),
    /// Nothing to resume here; look at the new top of stack.
    Beneath,
    /// The stack is empty; the invocation is over.
    Finished,
}

// ── Pool ──────────────────────────────────────────────────────────────────────

/// Recycled frame buffers.
#[derive(Debug, Default)]
pub struct FramePool {
    vars: Vec<Variables>,
    values: Vec<Vec<Value>>,
    tracks: Vec<Vec<TrackId>>,
}

impl FramePool {
    pub fn vars(&mut self) -> Variables {
        self.vars.pop().unwrap_or_default()
    }

    pub fn values(&mut self) -> Vec<Value> {
        self.values.pop().unwrap_or_default()
    }

    pub fn tracks(&mut self) -> Vec<TrackId> {
        self.tracks.pop().unwrap_or_default()
    }

    pub fn recycle(&mut self, frame: Frame) {
        match frame {
            Frame::Call(mut f) => {
                f.locals.clear();
                f.args.clear();
                self.vars.push(f.locals);
                self.values.push(f.args);
            }
            Frame::Iteration(IterationFrame { state: IterState::Tracks(mut t), .. }) => {
                t.clear();
                self.tracks.push(t);
            }
            _ => {}
        }
    }

    /// Buffers currently available for reuse.
    pub fn available(&self) -> usize {
        self.vars.len() + self.values.len() + self.tracks.len()
    }
}

// ── Stack ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ExecStack {
    frames: Vec<Frame>,
    pool: FramePool,
}

impl ExecStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&mut self) -> &mut FramePool {
        &mut self.pool
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// Pop and recycle the top frame.
    pub fn drop_top(&mut self) {
        if let Some(f) = self.frames.pop() {
            self.pool.recycle(f);
        }
    }

    pub fn pop_wait(&mut self) -> Option<WaitFrame> {
        match self.frames.last() {
            Some(Frame::Wait(_)) => match self.frames.pop() {
                Some(Frame::Wait(w)) => Some(w),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Frames from the top down.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().rev()
    }

    pub fn waits_mut(&mut self) -> impl Iterator<Item = &mut WaitFrame> {
        self.frames.iter_mut().rev().filter_map(|f| match f {
            Frame::Wait(w) => Some(w),
            _ => None,
        })
    }

    /// The innermost call frame.
    pub fn call(&self) -> Option<&CallFrame> {
        self.iter().find_map(|f| match f {
            Frame::Call(c) => Some(c),
            _ => None,
        })
    }

    pub fn call_mut(&mut self) -> Option<&mut CallFrame> {
        self.frames.iter_mut().rev().find_map(|f| match f {
            Frame::Call(c) => Some(c),
            _ => None,
        })
    }

    /// Where local `name` lives: the running procedure's call, then the
    /// calls of procedures that lexically enclose it, up to the nearest
    /// script call.
    fn local_frame(&self, name: &str) -> Option<usize> {
        let mut running: Option<(&Arc<Script>, BlockId)> = None;
        for (i, frame) in self.frames.iter().enumerate().rev() {
            let Frame::Call(c) = frame else { continue };
            let Some(caller) = c.caller.as_ref().filter(|_| c.kind == CallKind::Proc) else {
                break;
            };
            let visible = match running {
                None => {
                    running = Some((&caller.script, c.block));
                    true
                }
                Some((script, inner)) => {
                    Arc::ptr_eq(script, &caller.script) && script.encloses(c.block, inner)
                }
            };
            if visible && c.locals.contains(name) {
                return Some(i);
            }
        }
        None
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        match self.frames.get(self.local_frame(name)?) {
            Some(Frame::Call(c)) => c.locals.get(name),
            _ => None,
        }
    }

    pub fn local_mut(&mut self, name: &str) -> Option<&mut Variables> {
        let i = self.local_frame(name)?;
        match self.frames.get_mut(i) {
            Some(Frame::Call(c)) => Some(&mut c.locals),
            _ => None,
        }
    }

    /// The innermost call frame of the given kind.
    pub fn call_of_kind_mut(&mut self, kind: CallKind) -> Option<&mut CallFrame> {
        self.frames.iter_mut().rev().find_map(|f| match f {
            Frame::Call(c) if c.kind == kind => Some(c),
            _ => None,
        })
    }

    /// Track of the innermost for-each-track loop, if any.
    pub fn iteration_track(&self) -> Option<TrackId> {
        self.iter().find_map(|f| match f {
            Frame::Iteration(it) => it.track(),
            _ => None,
        })
    }

    /// The innermost iteration frame, provided no call frame lies above it.
    pub fn iteration_mut(&mut self) -> Option<&mut IterationFrame> {
        for f in self.frames.iter_mut().rev() {
            match f {
                Frame::Iteration(it) => return Some(it),
                Frame::Call(_) | Frame::Notification(_) => return None,
                Frame::Wait(_) => {}
            }
        }
        None
    }

    /// Pop the innermost iteration frame (and anything above it).
    pub fn pop_iteration(&mut self) {
        while let Some(f) = self.frames.pop() {
            let done = matches!(f, Frame::Iteration(_));
            self.pool.recycle(f);
            if done {
                break;
            }
        }
    }

    /// Pop frames until one yields a place to continue.
    ///
    /// - call: continue after the calling statement
    /// - notification: continue at its saved point, or beneath it
    /// - iteration or wait: abandoned (the block that owned it has ended)
    pub fn unwind(&mut self) -> Resume {
        while let Some(frame) = self.frames.pop() {
            let resume = match &frame {
                Frame::Call(c) => c.caller.clone().map(Resume::After),
                Frame::Notification(n) => Some(n.resume.clone().map_or(Resume::Beneath, Resume::At)),
                Frame::Iteration(_) | Frame::Wait(_) => None,
            };
            self.pool.recycle(frame);
            if let Some(r) = resume {
                return r;
            }
        }
        Resume::Finished
    }

    /// `End`: leave the innermost notification handler, or the whole script.
    pub fn end(&mut self) -> Resume {
        while let Some(frame) = self.frames.pop() {
            if let Frame::Notification(n) = &frame {
                let r = n.resume.clone().map_or(Resume::Beneath, Resume::At);
                self.pool.recycle(frame);
                return r;
            }
            self.pool.recycle(frame);
        }
        Resume::Finished
    }

    /// Drop every frame.  Returns the engine events still pending so the
    /// caller can release them.
    pub fn clear(&mut self) -> Vec<EventId> {
        let mut events = Vec::new();
        while let Some(frame) = self.frames.pop() {
            if let Frame::Wait(w) = &frame {
                events.extend(w.event);
            }
            self.pool.recycle(frame);
        }
        events
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn script() -> Arc<Script> {
        let mut s = Script::new("s");
        for i in 0..3u32 {
            s.stmts.push(crate::script::stmt::Statement {
                kind: crate::script::stmt::StmtKind::End,
                block: crate::script::stmt::BlockId::ROOT,
                next: if i < 2 { Some(StmtId(i + 1)) } else { None },
                args: Vec::new(),
                line: i as usize + 1,
            });
        }
        Arc::new(s)
    }

    fn call(caller: Option<Cursor>) -> Frame {
        Frame::Call(CallFrame {
            kind: CallKind::Proc,
            caller,
            block: BlockId::ROOT,
            locals: Variables::new(),
            args: Vec::new(),
        })
    }

    #[test]
    fn cursor_walks_chain() {
        let s = script();
        let c = Cursor::new(&s, StmtId(1));
        assert_eq!(c.next().map(|n| n.stmt), Some(StmtId(2)));
        assert!(Cursor::new(&s, StmtId(2)).next().is_none());
        assert!(c.same(&Cursor::new(&s, StmtId(1))));
        assert!(!c.same(&Cursor::new(&script(), StmtId(1))));
    }

    #[test]
    fn unwind_returns_after_caller() {
        let s = script();
        let mut stack = ExecStack::new();
        stack.push(call(Some(Cursor::new(&s, StmtId(0)))));
        stack.push(Frame::Iteration(IterationFrame {
            start: Cursor::new(&s, StmtId(1)),
            state: IterState::Count(3),
            index: 0,
        }));
        match stack.unwind() {
            Resume::After(c) => assert_eq!(c.stmt, StmtId(0)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(stack.is_empty());
        assert!(matches!(stack.unwind(), Resume::Finished));
        // The call frame's buffers went back to the pool.
        assert_eq!(stack.pool().available(), 2);
    }

    #[test]
    fn notification_resumes_beneath_a_wait() {
        let mut stack = ExecStack::new();
        stack.push(Frame::Wait(WaitFrame { event: Some(EventId(4)), ..WaitFrame::default() }));
        stack.push(Frame::Notification(NotificationFrame { which: Notification::Sustain, resume: None }));
        stack.push(call(None));
        assert!(matches!(stack.end(), Resume::Beneath));
        assert_eq!(stack.len(), 1);
        assert!(matches!(stack.top(), Some(Frame::Wait(w)) if !w.is_clear()));
    }

    #[test]
    fn clear_reports_pending_events() {
        let mut stack = ExecStack::new();
        stack.push(Frame::Wait(WaitFrame { event: Some(EventId(1)), ..WaitFrame::default() }));
        stack.push(Frame::Wait(WaitFrame { block: true, ..WaitFrame::default() }));
        assert_eq!(stack.clear(), vec![EventId(1)]);
        assert!(stack.is_empty());
    }

    #[test]
    fn iteration_lookup_stops_at_calls() {
        let s = script();
        let mut stack = ExecStack::new();
        stack.push(Frame::Iteration(IterationFrame {
            start: Cursor::new(&s, StmtId(0)),
            state: IterState::Tracks(vec![TrackId(2), TrackId(5)]),
            index: 1,
        }));
        assert_eq!(stack.iteration_track(), Some(TrackId(5)));
        assert!(stack.iteration_mut().is_some());
        stack.push(call(None));
        assert!(stack.iteration_mut().is_none());
        // Track context is still inherited by the callee.
        assert_eq!(stack.iteration_track(), Some(TrackId(5)));
    }

    #[test]
    fn locals_follow_lexical_nesting() {
        use crate::script::stmt::{Block, BlockKind};
        let mut s = Script::new("s");
        s.blocks.push(Block::new(BlockKind::Proc, Some("Outer".into()), Some(BlockId::ROOT)));
        s.blocks.push(Block::new(BlockKind::Proc, Some("Inner".into()), Some(BlockId(1))));
        s.blocks.push(Block::new(BlockKind::Proc, Some("Other".into()), Some(BlockId::ROOT)));
        let s = Arc::new(s);
        let frame = |kind, block, local: Option<i64>| {
            let mut locals = Variables::new();
            if let Some(v) = local {
                locals.set("x", Value::Int(v));
            }
            let caller = Some(Cursor::new(&s, StmtId(0)));
            Frame::Call(CallFrame { kind, caller, block: BlockId(block), locals, args: Vec::new() })
        };

        let mut stack = ExecStack::new();
        stack.push(frame(CallKind::Proc, 1, Some(7)));
        stack.push(frame(CallKind::Proc, 2, None));
        assert_eq!(stack.local("x"), Some(&Value::Int(7)));
        if let Some(locals) = stack.local_mut("x") {
            locals.set("x", Value::Int(8));
        }
        assert_eq!(stack.local("x"), Some(&Value::Int(8)));

        // A caller that does not enclose the running procedure is invisible.
        let mut stack = ExecStack::new();
        stack.push(frame(CallKind::Proc, 3, Some(1)));
        stack.push(frame(CallKind::Proc, 2, None));
        assert_eq!(stack.local("x"), None);

        // Nor does lookup cross into another script's call.
        let mut stack = ExecStack::new();
        stack.push(frame(CallKind::Proc, 1, Some(1)));
        stack.push(frame(CallKind::Script, 0, None));
        stack.push(frame(CallKind::Proc, 2, None));
        assert_eq!(stack.local("x"), None);
        assert!(stack.local_mut("x").is_none());
    }

    #[test]
    fn pass_counting() {
        let s = script();
        let mut it = IterationFrame { start: Cursor::new(&s, StmtId(0)), state: IterState::Count(2), index: 0 };
        assert!(it.has_more());
        it.index = 1;
        assert!(!it.has_more());
    }
}
