//! Compiler: parse → resolve → link.
//!
//! - **Parse** builds each script's block tree (see [`parse`](super::parse)).
//! - **Resolve** runs per script: branch chains and iteration pairs are
//!   matched, jump labels and local procedure calls are bound, and every
//!   name in an argument or expression is bound to its store.
//! - **Link** runs once the whole batch is resolved and binds calls that
//!   name another script, falling back to a previously installed
//!   environment during incremental reloads.
//!
//! Errors never abort the batch.  A parse or structure error drops the
//! offending script; resolve and link errors are reported and the affected
//! reference or call degrades to a literal or a no-op.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{error, warn};

use crate::engine::Catalog;

use super::env::Environment;
use super::parse::parse_script;
use super::reference::{Reference, Resolver};
use super::stmt::{
    BlockId, BranchKind, CallTarget, Script, ScriptId, ScriptTarget, StmtId, StmtKind,
};

// ── Diagnostics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Malformed statement or argument list.
    Parse,
    /// Unmatched block opener or terminator.
    Structure,
    /// A name, label or assignment target that could not be bound.
    Resolve,
    /// A call to a script that does not exist.
    Link,
}

impl CompileErrorKind {
    /// Parse and structure errors drop the script.
    pub fn is_fatal(self) -> bool {
        matches!(self, CompileErrorKind::Parse | CompileErrorKind::Structure)
    }
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompileErrorKind::Parse => "parse error",
            CompileErrorKind::Structure => "structure error",
            CompileErrorKind::Resolve => "unresolved reference",
            CompileErrorKind::Link => "link error",
        };
        f.write_str(s)
    }
}

/// A diagnostic produced while compiling one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub script: String,
    /// 1-based source line; 0 when the error concerns the whole file.
    pub line: usize,
    pub message: String,
    pub kind: CompileErrorKind,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}: {}", self.script, self.line, self.kind, self.message)
    }
}

impl std::error::Error for CompileError {}

// ── Source units ──────────────────────────────────────────────────────────────

/// One script's source text and where it came from.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub name: String,
    pub path: Option<PathBuf>,
    pub text: String,
    pub modified: Option<SystemTime>,
}

impl SourceUnit {
    pub fn new(name: &str, text: &str) -> Self {
        SourceUnit { name: name.to_owned(), path: None, text: text.to_owned(), modified: None }
    }

    /// Read a script file; the name defaults to the file stem.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(SourceUnit { name, path: Some(path.to_path_buf()), text, modified })
    }
}

// ── Compiler ──────────────────────────────────────────────────────────────────

pub struct Compiler<'a> {
    catalog: &'a Catalog,
}

impl<'a> Compiler<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Compiler { catalog }
    }

    /// Compile a batch of sources into a fresh environment.
    pub fn compile(&self, units: &[SourceUnit]) -> (Environment, Vec<CompileError>) {
        let mut errors = Vec::new();
        let mut scripts: Vec<Script> =
            units.iter().filter_map(|u| self.prepare(u, &mut errors)).collect();
        for (i, script) in scripts.iter_mut().enumerate() {
            script.id = ScriptId(i as u32);
        }
        self.link(&mut scripts, None, &mut errors);
        report(&errors);
        (Environment::new(scripts), errors)
    }

    /// Recompile one script against an installed environment.  The script
    /// keeps the id of the one it replaces (matched by path, then name), so
    /// other scripts' links stay valid.  Returns `None` when the new source
    /// does not compile; the old environment remains usable.
    pub fn recompile(&self, env: &Environment, unit: &SourceUnit)
        -> (Option<Environment>, Vec<CompileError>)
    {
        let mut errors = Vec::new();
        let Some(mut script) = self.prepare(unit, &mut errors) else {
            report(&errors);
            return (None, errors);
        };
        let existing = unit
            .path
            .as_deref()
            .and_then(|p| env.find_by_path(p))
            .or_else(|| env.find(&script.name))
            .map(|s| s.id);
        script.id = existing.unwrap_or(ScriptId(env.len() as u32));
        let mut batch = vec![script];
        self.link(&mut batch, Some(env), &mut errors);
        report(&errors);
        let mut next = env.clone();
        for script in batch {
            next.install(script);
        }
        (Some(next), errors)
    }

    /// Parse and resolve one unit.  `None` when the script must be dropped.
    pub fn prepare(&self, unit: &SourceUnit, errors: &mut Vec<CompileError>) -> Option<Script> {
        let mut script = match parse_script(&unit.name, &unit.text) {
            Ok(s) => s,
            Err(errs) => {
                errors.extend(errs);
                return None;
            }
        };
        script.path = unit.path.clone();
        script.modified = unit.modified;

        let mut local = Vec::new();
        self.resolve(&mut script, &mut local);
        let fatal = local.iter().any(|e| e.kind.is_fatal());
        errors.extend(local);
        (!fatal).then_some(script)
    }

    // ── Resolve ───────────────────────────────────────────────────────────────

    fn resolve(&self, script: &mut Script, errors: &mut Vec<CompileError>) {
        for b in 0..script.blocks.len() {
            match_structure(script, BlockId(b as u32), errors);
        }
        let resolver = Resolver::new(self.catalog);
        for i in 0..script.stmts.len() {
            self.resolve_stmt(script, StmtId(i as u32), &resolver, errors);
        }
    }

    fn resolve_stmt(
        &self,
        script: &mut Script,
        id: StmtId,
        resolver: &Resolver<'_>,
        errors: &mut Vec<CompileError>,
    ) {
        let Some(stmt) = script.stmts.get_mut(id.index()) else { return };
        let block = stmt.block;
        let line = stmt.line;
        // Take the node out so the block tree can be searched while it is patched.
        let mut kind = std::mem::replace(&mut stmt.kind, StmtKind::End);
        let blocks = &script.blocks;

        match &mut kind {
            StmtKind::Echo(t)
            | StmtKind::Message(t)
            | StmtKind::Prompt(t)
            | StmtKind::Load(t)
            | StmtKind::Save(t) => t.bind(|n| resolver.resolve(n, blocks, block)),
            StmtKind::Diff(a, b) => {
                a.bind(|n| resolver.resolve(n, blocks, block));
                b.bind(|n| resolver.resolve(n, blocks, block));
            }
            _ => {}
        }
        kind.for_each_ref_mut(&mut |r| resolver.bind(r, blocks, block));

        let mut problem = None;
        match &mut kind {
            StmtKind::Set(set) => {
                let assignable = match &set.target {
                    Reference::Internal(v) => v.is_writable(),
                    r => !r.is_literal() && !matches!(r, Reference::Arg(_)),
                };
                if !assignable {
                    problem = Some(format!("cannot assign to {}", set.target.describe()));
                }
            }
            StmtKind::Jump(jump) => {
                jump.target = script.find_label(block, &jump.label);
                if jump.target.is_none() {
                    let dynamic = resolver.resolve(&jump.label, blocks, block);
                    if dynamic.is_literal() {
                        problem = Some(format!("label {} not found", jump.label));
                    } else {
                        jump.dynamic = Some(dynamic);
                    }
                }
            }
            StmtKind::Call(call) => {
                if let Some(proc_block) = script.find_proc(block, &call.name) {
                    call.target = CallTarget::Proc(proc_block);
                }
            }
            StmtKind::Function(f) => {
                if let Some(def) = self.catalog.function(&f.name) {
                    f.target = CallTarget::Engine(def.name.clone());
                }
            }
            _ => {}
        }

        if let Some(message) = problem {
            errors.push(CompileError {
                script: script.name.clone(),
                line,
                message,
                kind: CompileErrorKind::Resolve,
            });
        }
        if let Some(stmt) = script.stmts.get_mut(id.index()) {
            stmt.kind = kind;
        }
    }

    // ── Link ──────────────────────────────────────────────────────────────────

    fn link(&self, batch: &mut [Script], fallback: Option<&Environment>, errors: &mut Vec<CompileError>) {
        let names: Vec<(String, ScriptId)> =
            batch.iter().map(|s| (s.name.to_ascii_lowercase(), s.id)).collect();
        let lookup = |name: &str| -> Option<ScriptId> {
            let lower = name.to_ascii_lowercase();
            names
                .iter()
                .find(|(n, _)| *n == lower)
                .map(|(_, id)| *id)
                .or_else(|| fallback.and_then(|env| env.find(name)).map(|s| s.id))
        };

        for script in batch.iter_mut() {
            for stmt in &mut script.stmts {
                let (name, slot) = match &mut stmt.kind {
                    StmtKind::Call(c) | StmtKind::Start(c) if c.target == CallTarget::Unresolved => {
                        (c.name.clone(), LinkSlot::Call(&mut c.target))
                    }
                    StmtKind::Function(f) if f.target == CallTarget::Unresolved => {
                        (f.name.clone(), LinkSlot::Call(&mut f.target))
                    }
                    StmtKind::Cancel(ScriptTarget::Named { name, script: id })
                    | StmtKind::Interrupt(ScriptTarget::Named { name, script: id })
                        if id.is_none() =>
                    {
                        (name.clone(), LinkSlot::Target(id))
                    }
                    _ => continue,
                };
                match (lookup(&name), slot) {
                    (Some(id), LinkSlot::Call(target)) => *target = CallTarget::Script(id),
                    (Some(id), LinkSlot::Target(target)) => *target = Some(id),
                    (None, _) => errors.push(CompileError {
                        script: script.name.clone(),
                        line: stmt.line,
                        message: format!("no script or function named {name}"),
                        kind: CompileErrorKind::Link,
                    }),
                }
            }
        }
    }
}

enum LinkSlot<'s> {
    Call(&'s mut CallTarget),
    Target(&'s mut Option<ScriptId>),
}

fn report(errors: &[CompileError]) {
    for e in errors {
        if e.kind.is_fatal() {
            error!("{e}");
        } else {
            warn!("{e}");
        }
    }
}

// ── Structure matching ────────────────────────────────────────────────────────

/// Pair up `If`/`Else`/`Endif` chains and `For`/`Repeat`/`While` with `Next`
/// within one block.
fn match_structure(script: &mut Script, block: BlockId, errors: &mut Vec<CompileError>) {
    let ids = match script.block(block) {
        Some(b) => b.stmts.clone(),
        None => return,
    };
    let name = script.name.clone();
    let mut structure_error = |line: usize, message: String| {
        errors.push(CompileError {
            script: name.clone(),
            line,
            message,
            kind: CompileErrorKind::Structure,
        });
    };

    let mut branches: Vec<Vec<StmtId>> = Vec::new();
    let mut loops: Vec<StmtId> = Vec::new();

    for id in ids {
        let line = script.line(id);
        let Some(stmt) = script.stmts.get_mut(id.index()) else { continue };
        match &mut stmt.kind {
            StmtKind::Branch(b) if b.kind == BranchKind::If => branches.push(vec![id]),
            StmtKind::Branch(b) => {
                let kind = b.kind;
                let Some(chain) = branches.last_mut() else {
                    structure_error(line, "Else without If".into());
                    continue;
                };
                let prev = chain.last().copied();
                let after_else = prev.is_some_and(|p| {
                    matches!(&script.stmts[p.index()].kind, StmtKind::Branch(b) if b.kind == BranchKind::Else)
                });
                if after_else {
                    let which = if kind == BranchKind::Else { "Else" } else { "Else If" };
                    structure_error(line, format!("{which} after Else"));
                    continue;
                }
                chain.push(id);
                if let Some(StmtKind::Branch(pb)) = prev.map(|p| &mut script.stmts[p.index()].kind) {
                    pb.next_clause = Some(id);
                }
            }
            StmtKind::EndBranch => {
                let Some(chain) = branches.pop() else {
                    structure_error(line, "Endif without If".into());
                    continue;
                };
                for clause in chain {
                    if let StmtKind::Branch(b) = &mut script.stmts[clause.index()].kind {
                        b.end = Some(id);
                    }
                }
            }
            StmtKind::Iterate(_) => loops.push(id),
            StmtKind::Next { start } => {
                let Some(open) = loops.pop() else {
                    structure_error(line, "Next without For, Repeat or While".into());
                    continue;
                };
                *start = Some(open);
                if let StmtKind::Iterate(it) = &mut script.stmts[open.index()].kind {
                    it.end = Some(id);
                }
            }
            StmtKind::Break { start } => match loops.last() {
                Some(open) => *start = Some(*open),
                None => structure_error(line, "Break outside a loop".into()),
            },
            _ => {}
        }
    }

    for open in branches.iter().filter_map(|c| c.first()) {
        structure_error(script.line(*open), "If without Endif".into());
    }
    for open in loops {
        structure_error(script.line(open), "loop without Next".into());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
