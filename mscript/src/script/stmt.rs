//! Statement/Block model of a compiled script.
//!
//! A script is a tree of [`Block`]s (the script body, procedure bodies and
//! parameter bodies) stored in one arena, plus a flat arena of
//! [`Statement`]s.  Each block lists its statements in document order and
//! each statement links to its successor within the same block, so the
//! interpreter can walk a block as a chain without consulting the tree.
//!
//! Everything here is built by the parser, patched by the resolve and link
//! phases, and read-only afterwards.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::SystemTime;

use crate::engine::Direction;

use super::expr::Expr;
use super::reference::Reference;
use super::vars::VarScope;
use super::wait::WaitStmt;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Index of a script in its [`Environment`](super::env::Environment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ScriptId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub const ROOT: BlockId = BlockId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(pub u32);

impl StmtId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ── Script ────────────────────────────────────────────────────────────────────

pub const DEFAULT_SUSTAIN_MSECS: u64 = 1000;
pub const DEFAULT_MULTICLICK_MSECS: u64 = 1000;

/// Flags set by `!` directives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptFlags {
    pub autoload: bool,
    pub button: bool,
    pub focus_lock: bool,
    pub quantize: bool,
    pub no_audio: bool,
    pub hide: bool,
    pub parameter: bool,
}

/// Asynchronous entry points a script can declare with specially named labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    Reentry,
    Sustain,
    EndSustain,
    Click,
    EndClick,
}

impl Notification {
    pub const ALL: [Notification; 5] = [
        Notification::Reentry,
        Notification::Sustain,
        Notification::EndSustain,
        Notification::Click,
        Notification::EndClick,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Notification::Reentry => "reentry",
            Notification::Sustain => "sustain",
            Notification::EndSustain => "endSustain",
            Notification::Click => "click",
            Notification::EndClick => "endClick",
        }
    }

    pub fn from_label(name: &str) -> Option<Notification> {
        Notification::ALL.into_iter().find(|n| n.label().eq_ignore_ascii_case(name))
    }
}

/// Cached label statements for each [`Notification`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyLabels {
    pub reentry: Option<StmtId>,
    pub sustain: Option<StmtId>,
    pub end_sustain: Option<StmtId>,
    pub click: Option<StmtId>,
    pub end_click: Option<StmtId>,
}

impl NotifyLabels {
    pub fn get(&self, which: Notification) -> Option<StmtId> {
        match which {
            Notification::Reentry => self.reentry,
            Notification::Sustain => self.sustain,
            Notification::EndSustain => self.end_sustain,
            Notification::Click => self.click,
            Notification::EndClick => self.end_click,
        }
    }

    pub fn slot(&mut self, which: Notification) -> &mut Option<StmtId> {
        match which {
            Notification::Reentry => &mut self.reentry,
            Notification::Sustain => &mut self.sustain,
            Notification::EndSustain => &mut self.end_sustain,
            Notification::Click => &mut self.click,
            Notification::EndClick => &mut self.end_click,
        }
    }
}

/// The invocable face of a script: what binding UIs and other scripts see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFunction {
    pub name: String,
    pub script: ScriptId,
    /// Responds to the up transition (has sustain or click labels).
    pub sustainable: bool,
}

/// A compiled script.
#[derive(Debug, Clone)]
pub struct Script {
    pub id: ScriptId,
    pub name: String,
    pub path: Option<PathBuf>,
    /// Source modification time when compiled; drives autoload.
    pub modified: Option<SystemTime>,
    pub flags: ScriptFlags,
    pub sustain_msecs: u64,
    pub multiclick_msecs: u64,
    /// `blocks[0]` is the script body.
    pub blocks: Vec<Block>,
    pub stmts: Vec<Statement>,
    pub labels: NotifyLabels,
    function: OnceLock<ScriptFunction>,
}

impl Script {
    pub fn new(name: &str) -> Self {
        Script {
            id: ScriptId::default(),
            name: name.to_owned(),
            path: None,
            modified: None,
            flags: ScriptFlags::default(),
            sustain_msecs: DEFAULT_SUSTAIN_MSECS,
            multiclick_msecs: DEFAULT_MULTICLICK_MSECS,
            blocks: vec![Block::new(BlockKind::Script, None, None)],
            stmts: Vec::new(),
            labels: NotifyLabels::default(),
            function: OnceLock::new(),
        }
    }

    pub fn stmt(&self, id: StmtId) -> Option<&Statement> {
        self.stmts.get(id.index())
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    /// First statement of a block's chain.
    pub fn first(&self, block: BlockId) -> Option<StmtId> {
        self.block(block).and_then(|b| b.stmts.first().copied())
    }

    pub fn line(&self, id: StmtId) -> usize {
        self.stmt(id).map_or(0, |s| s.line)
    }

    /// Find a label visible from `block`, searching outward.
    pub fn find_label(&self, block: BlockId, name: &str) -> Option<StmtId> {
        self.ancestors(block).find_map(|b| {
            b.labels.iter().find(|(l, _)| l.eq_ignore_ascii_case(name)).map(|(_, s)| *s)
        })
    }

    /// Find a procedure visible from `block`, searching outward.
    pub fn find_proc(&self, block: BlockId, name: &str) -> Option<BlockId> {
        self.ancestors(block).find_map(|b| {
            b.procs.iter().find(|(p, _)| p.eq_ignore_ascii_case(name)).map(|(_, id)| *id)
        })
    }

    /// Whether `outer` is `inner` or one of its enclosing blocks.
    pub fn encloses(&self, outer: BlockId, inner: BlockId) -> bool {
        std::iter::successors(Some(inner), |b| self.block(*b).and_then(|b| b.parent)).any(|b| b == outer)
    }

    /// `block` followed by each enclosing block up to the root.
    pub fn ancestors(&self, block: BlockId) -> impl Iterator<Item = &Block> + '_ {
        std::iter::successors(self.block(block), move |b| b.parent.and_then(|p| self.block(p)))
    }

    pub fn notification_label(&self, which: Notification) -> Option<StmtId> {
        self.labels.get(which)
    }

    /// Can be triggered directly (parameter scripts cannot).
    pub fn is_triggerable(&self) -> bool {
        !self.flags.parameter
    }

    /// The script wrapped as an invocable function.  Built on first use.
    pub fn function(&self) -> &ScriptFunction {
        self.function.get_or_init(|| ScriptFunction {
            name: self.name.clone(),
            script: self.id,
            sustainable: self.labels.sustain.is_some()
                || self.labels.end_sustain.is_some()
                || self.labels.click.is_some(),
        })
    }
}

// ── Block ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Script,
    Proc,
    Param,
}

/// Free-form `key args...` metadata inside a `Param` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub key: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDecl {
    pub name: String,
    pub scope: VarScope,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub kind: BlockKind,
    pub name: Option<String>,
    pub parent: Option<BlockId>,
    pub stmts: Vec<StmtId>,
    pub declarations: Vec<Declaration>,
    pub variables: Vec<VarDecl>,
    /// Procedures declared directly in this block.
    pub procs: Vec<(String, BlockId)>,
    pub labels: Vec<(String, StmtId)>,
}

impl Block {
    pub fn new(kind: BlockKind, name: Option<String>, parent: Option<BlockId>) -> Self {
        Block {
            kind,
            name,
            parent,
            stmts: Vec::new(),
            declarations: Vec::new(),
            variables: Vec::new(),
            procs: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn declaration(&self, key: &str) -> Option<&Declaration> {
        self.declarations.iter().find(|d| d.key.eq_ignore_ascii_case(key))
    }
}

// ── Statement ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StmtKind,
    pub block: BlockId,
    /// Successor within the same block.
    pub next: Option<StmtId>,
    /// Raw argument tokens as written.
    pub args: Vec<String>,
    pub line: usize,
}

/// What a call or function statement was linked to.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    Unresolved,
    Proc(BlockId),
    Script(ScriptId),
    /// An engine function, by canonical name.
    Engine(String),
}

#[derive(Debug, Clone)]
pub struct FunctionStmt {
    pub name: String,
    /// `None` means a full down-then-up press.
    pub direction: Option<Direction>,
    pub arg: Option<Expr>,
    pub target: CallTarget,
}

#[derive(Debug, Clone)]
pub struct CallStmt {
    pub name: String,
    pub args: Vec<Expr>,
    pub target: CallTarget,
}

#[derive(Debug, Clone)]
pub struct SetStmt {
    pub target: Reference,
    pub value: Expr,
    /// `Use`: restore the previous value when the invocation ends.
    pub restore: bool,
}

#[derive(Debug, Clone)]
pub struct VariableStmt {
    pub name: String,
    pub scope: VarScope,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    If,
    ElseIf,
    Else,
}

#[derive(Debug, Clone)]
pub struct BranchStmt {
    pub kind: BranchKind,
    pub cond: Option<Expr>,
    /// The following `Else If`/`Else` of the same chain.
    pub next_clause: Option<StmtId>,
    /// The closing `Endif`.
    pub end: Option<StmtId>,
}

#[derive(Debug, Clone)]
pub struct JumpStmt {
    pub label: String,
    pub cond: Option<Expr>,
    pub target: Option<StmtId>,
    /// Set when the label did not resolve statically; its value names the
    /// label at run time.
    pub dynamic: Option<Reference>,
}

/// Track set of a `For` statement.
#[derive(Debug, Clone)]
pub enum TrackSelector {
    All,
    /// 1-based track numbers, evaluated when the loop starts.
    Tracks(Vec<Expr>),
    Focused,
    Muted,
    Playing,
    Recording,
    Group(String),
}

#[derive(Debug, Clone)]
pub enum IterKind {
    ForTracks(TrackSelector),
    Repeat(Expr),
    While(Expr),
}

#[derive(Debug, Clone)]
pub struct IterateStmt {
    pub kind: IterKind,
    /// The matching `Next`.
    pub end: Option<StmtId>,
}

/// Which invocations `Cancel` and `Interrupt` address.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptTarget {
    /// Other invocations of the running script.
    Current,
    All,
    Named { name: String, script: Option<ScriptId> },
}

/// One piece of an output template.
#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    Text(String),
    Ref(Reference),
}

/// Argument text for output and file statements; pieces are joined by a space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    pub pieces: Vec<Piece>,
}

impl Template {
    /// Resolve each bare name; names that resolve to a literal stay as the
    /// text the author wrote.
    pub fn bind(&mut self, mut resolve: impl FnMut(&str) -> Reference) {
        for piece in &mut self.pieces {
            if let Piece::Ref(Reference::Name(name)) = piece {
                let resolved = resolve(name);
                *piece = if resolved.is_literal() {
                    Piece::Text(std::mem::take(name))
                } else {
                    Piece::Ref(resolved)
                };
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Function(FunctionStmt),
    Wait(WaitStmt),
    Set(SetStmt),
    Variable(VariableStmt),
    Branch(BranchStmt),
    EndBranch,
    Jump(JumpStmt),
    Label(String),
    Iterate(IterateStmt),
    Next { start: Option<StmtId> },
    Break { start: Option<StmtId> },
    Call(CallStmt),
    Start(CallStmt),
    Proc(BlockId),
    EndProc,
    Param(BlockId),
    EndParam,
    Echo(Template),
    Message(Template),
    Prompt(Template),
    Load(Template),
    Save(Template),
    Diff(Template, Template),
    End,
    Cancel(ScriptTarget),
    Interrupt(ScriptTarget),
}

impl StmtKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            StmtKind::Function(_) => "function",
            StmtKind::Wait(_) => "Wait",
            StmtKind::Set(s) if s.restore => "Use",
            StmtKind::Set(_) => "Set",
            StmtKind::Variable(_) => "Variable",
            StmtKind::Branch(b) => match b.kind {
                BranchKind::If => "If",
                BranchKind::ElseIf => "Else If",
                BranchKind::Else => "Else",
            },
            StmtKind::EndBranch => "Endif",
            StmtKind::Jump(_) => "Jump",
            StmtKind::Label(_) => "Label",
            StmtKind::Iterate(i) => match i.kind {
                IterKind::ForTracks(_) => "For",
                IterKind::Repeat(_) => "Repeat",
                IterKind::While(_) => "While",
            },
            StmtKind::Next { .. } => "Next",
            StmtKind::Break { .. } => "Break",
            StmtKind::Call(_) => "Call",
            StmtKind::Start(_) => "Start",
            StmtKind::Proc(_) => "Proc",
            StmtKind::EndProc => "Endproc",
            StmtKind::Param(_) => "Param",
            StmtKind::EndParam => "Endparam",
            StmtKind::Echo(_) => "Echo",
            StmtKind::Message(_) => "Message",
            StmtKind::Prompt(_) => "Prompt",
            StmtKind::Load(_) => "Load",
            StmtKind::Save(_) => "Save",
            StmtKind::Diff(..) => "Diff",
            StmtKind::End => "End",
            StmtKind::Cancel(_) => "Cancel",
            StmtKind::Interrupt(_) => "Interrupt",
        }
    }

    /// Visit every reference held by this statement, including those inside
    /// expressions.
    pub fn for_each_ref_mut(&mut self, f: &mut dyn FnMut(&mut Reference)) {
        fn expr(e: &mut Expr, f: &mut dyn FnMut(&mut Reference)) {
            e.for_each_ref_mut(f);
        }
        fn template(t: &mut Template, f: &mut dyn FnMut(&mut Reference)) {
            for piece in &mut t.pieces {
                if let Piece::Ref(r) = piece {
                    f(r);
                }
            }
        }
        match self {
            StmtKind::Function(s) => {
                if let Some(e) = &mut s.arg {
                    expr(e, f);
                }
            }
            StmtKind::Wait(w) => {
                if let Some(e) = &mut w.amount {
                    expr(e, f);
                }
            }
            StmtKind::Set(s) => {
                f(&mut s.target);
                expr(&mut s.value, f);
            }
            StmtKind::Variable(v) => {
                if let Some(e) = &mut v.init {
                    expr(e, f);
                }
            }
            StmtKind::Branch(b) => {
                if let Some(e) = &mut b.cond {
                    expr(e, f);
                }
            }
            StmtKind::Jump(j) => {
                if let Some(e) = &mut j.cond {
                    expr(e, f);
                }
            }
            StmtKind::Iterate(i) => match &mut i.kind {
                IterKind::ForTracks(TrackSelector::Tracks(list)) => {
                    for e in list {
                        expr(e, f);
                    }
                }
                IterKind::ForTracks(_) => {}
                IterKind::Repeat(e) | IterKind::While(e) => expr(e, f),
            },
            StmtKind::Call(c) | StmtKind::Start(c) => {
                for e in &mut c.args {
                    expr(e, f);
                }
            }
            StmtKind::Echo(t)
            | StmtKind::Message(t)
            | StmtKind::Prompt(t)
            | StmtKind::Load(t)
            | StmtKind::Save(t) => template(t, f),
            StmtKind::Diff(a, b) => {
                template(a, f);
                template(b, f);
            }
            _ => {}
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
