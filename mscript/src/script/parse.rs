//! Parse phase: script source text → [`Script`] block tree.
//!
//! The parser is line oriented.  A line starting with `!` is a directive
//! that sets script flags; `#` starts a comment; anything else is dispatched
//! by its leading keyword through [`Keyword::lookup`].  A word that is not a
//! keyword is taken to be an engine function (or another script) to call.
//!
//! `Proc` and `Param` open a child block that becomes the target for
//! following lines until the matching `Endproc`/`Endparam`.  A block still
//! open at end of file is a structural error; the caller drops the script.

use log::warn;

use crate::engine::Direction;

use super::compile::{CompileError, CompileErrorKind};
use super::expr::{parse_expr, Expr};
use super::reference::Reference;
use super::stmt::{
    BlockId, BlockKind, Block, BranchKind, BranchStmt, CallStmt, CallTarget, Declaration,
    FunctionStmt, IterKind, IterateStmt, JumpStmt, Notification, Piece, Script, ScriptTarget,
    SetStmt, Statement, StmtId, StmtKind, Template, TrackSelector, VarDecl, VariableStmt,
};
use super::value::Value;
use super::vars::VarScope;
use super::wait::WaitStmt;

// ── Keywords ──────────────────────────────────────────────────────────────────

/// Statement keywords.  Anything else is a function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Echo,
    Message,
    Prompt,
    Set,
    Use,
    Variable,
    If,
    Else,
    ElseIf,
    Endif,
    Jump,
    Label,
    For,
    Repeat,
    While,
    Next,
    Break,
    Call,
    Start,
    Proc,
    Endproc,
    Param,
    Endparam,
    Load,
    Save,
    Diff,
    Wait,
    End,
    Cancel,
    Interrupt,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("echo", Keyword::Echo),
    ("message", Keyword::Message),
    ("prompt", Keyword::Prompt),
    ("set", Keyword::Set),
    ("use", Keyword::Use),
    ("variable", Keyword::Variable),
    ("if", Keyword::If),
    ("else", Keyword::Else),
    ("elseif", Keyword::ElseIf),
    ("endif", Keyword::Endif),
    ("jump", Keyword::Jump),
    ("label", Keyword::Label),
    ("for", Keyword::For),
    ("repeat", Keyword::Repeat),
    ("while", Keyword::While),
    ("next", Keyword::Next),
    ("break", Keyword::Break),
    ("call", Keyword::Call),
    ("start", Keyword::Start),
    ("proc", Keyword::Proc),
    ("endproc", Keyword::Endproc),
    ("param", Keyword::Param),
    ("endparam", Keyword::Endparam),
    ("load", Keyword::Load),
    ("save", Keyword::Save),
    ("diff", Keyword::Diff),
    ("wait", Keyword::Wait),
    ("end", Keyword::End),
    ("cancel", Keyword::Cancel),
    ("interrupt", Keyword::Interrupt),
];

impl Keyword {
    /// Case-insensitive keyword lookup.
    pub fn lookup(word: &str) -> Option<Keyword> {
        KEYWORDS.iter().find(|(k, _)| k.eq_ignore_ascii_case(word)).map(|(_, kw)| *kw)
    }
}

// ── Tokens ────────────────────────────────────────────────────────────────────

/// One whitespace-separated argument; quotes group words and are removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    pub text: String,
    pub quoted: bool,
}

/// Split an argument tail into words, honouring double quotes.
pub fn split_args(s: &str) -> Vec<Arg> {
    let mut args = Vec::new();
    let mut chars = s.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(&c) = chars.peek() else { break };
        let mut text = String::new();
        if c == '"' {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '"' {
                    break;
                }
                text.push(ch);
            }
            args.push(Arg { text, quoted: true });
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                text.push(ch);
                chars.next();
            }
            args.push(Arg { text, quoted: false });
        }
    }
    args
}

/// `"keyword rest..."` → `("keyword", "rest...")`.
fn split_keyword(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim()),
        None => (line, ""),
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Parse one script.  On failure, every error found is returned and the
/// script is unusable.
pub fn parse_script(name: &str, text: &str) -> Result<Script, Vec<CompileError>> {
    let mut parser = ScriptParser {
        script: Script::new(name),
        stack: vec![BlockId::ROOT],
        errors: Vec::new(),
    };
    for (i, raw) in text.lines().enumerate() {
        parser.line(i + 1, raw.trim());
    }
    parser.finish()
}

struct ScriptParser {
    script: Script,
    /// Open blocks; the last is the current parse target.
    stack: Vec<BlockId>,
    errors: Vec<CompileError>,
}

impl ScriptParser {
    fn current(&self) -> BlockId {
        self.stack.last().copied().unwrap_or(BlockId::ROOT)
    }

    fn current_kind(&self) -> BlockKind {
        self.script.block(self.current()).map_or(BlockKind::Script, |b| b.kind)
    }

    fn error(&mut self, line: usize, kind: CompileErrorKind, message: impl Into<String>) {
        self.errors.push(CompileError {
            script: self.script.name.clone(),
            line,
            message: message.into(),
            kind,
        });
    }

    fn line(&mut self, lineno: usize, line: &str) {
        if line.is_empty() || line.starts_with('#') {
            return;
        }
        if let Some(directive) = line.strip_prefix('!') {
            self.directive(lineno, directive);
            return;
        }
        let (word, rest) = split_keyword(line);
        let result = match Keyword::lookup(word) {
            Some(kw) => self.statement(lineno, kw, rest),
            None if self.current_kind() == BlockKind::Param => {
                self.declaration(word, rest);
                Ok(())
            }
            None => self.function(word, rest).map(|s| {
                self.push(lineno, StmtKind::Function(s), rest);
            }),
        };
        if let Err(msg) = result {
            self.error(lineno, CompileErrorKind::Parse, format!("{word}: {msg}"));
        }
    }

    fn finish(mut self) -> Result<Script, Vec<CompileError>> {
        while self.stack.len() > 1 {
            let id = self.current();
            let (kind, name) = self
                .script
                .block(id)
                .map(|b| (b.kind, b.name.clone().unwrap_or_default()))
                .unwrap_or((BlockKind::Proc, String::new()));
            let opener = if kind == BlockKind::Param { "Param" } else { "Proc" };
            self.error(0, CompileErrorKind::Structure, format!("{opener} {name} is never closed"));
            self.stack.pop();
        }
        if self.errors.is_empty() {
            Ok(self.script)
        } else {
            Err(self.errors)
        }
    }

    // ── Directives ────────────────────────────────────────────────────────────

    fn directive(&mut self, lineno: usize, text: &str) {
        let (word, rest) = split_keyword(text.trim());
        let flags = &mut self.script.flags;
        match word.to_ascii_lowercase().as_str() {
            "name" if !rest.is_empty() => self.script.name = rest.trim_matches('"').to_owned(),
            "autoload" => flags.autoload = true,
            "button" => flags.button = true,
            "focuslock" => flags.focus_lock = true,
            "quantize" => flags.quantize = true,
            "noaudio" => flags.no_audio = true,
            "hide" => flags.hide = true,
            "parameter" => flags.parameter = true,
            "sustain" | "multiclick" => match rest.parse::<u64>() {
                Ok(ms) if ms > 0 => {
                    if word.eq_ignore_ascii_case("sustain") {
                        self.script.sustain_msecs = ms;
                    } else {
                        self.script.multiclick_msecs = ms;
                    }
                }
                _ => warn!("{}:{lineno}: bad !{word} period {rest:?}", self.script.name),
            },
            _ => warn!("{}:{lineno}: unknown directive !{word}", self.script.name),
        }
    }

    // ── Statements ────────────────────────────────────────────────────────────

    /// Append a statement to the current block and link it into the chain.
    fn push(&mut self, line: usize, kind: StmtKind, rest: &str) -> StmtId {
        self.push_to(self.current(), line, kind, rest)
    }

    fn push_to(&mut self, block: BlockId, line: usize, kind: StmtKind, rest: &str) -> StmtId {
        let id = StmtId(self.script.stmts.len() as u32);
        if let Some(prev) = self.script.block(block).and_then(|b| b.stmts.last().copied()) {
            if let Some(s) = self.script.stmts.get_mut(prev.index()) {
                s.next = Some(id);
            }
        }
        self.script.stmts.push(Statement {
            kind,
            block,
            next: None,
            args: split_args(rest).into_iter().map(|a| a.text).collect(),
            line,
        });
        if let Some(b) = self.script.blocks.get_mut(block.index()) {
            b.stmts.push(id);
        }
        id
    }

    fn statement(&mut self, line: usize, kw: Keyword, rest: &str) -> Result<(), String> {
        let kind = match kw {
            Keyword::Echo => StmtKind::Echo(template(rest)),
            Keyword::Message => StmtKind::Message(template(rest)),
            Keyword::Prompt => StmtKind::Prompt(template(rest)),
            Keyword::Load => StmtKind::Load(required_template(rest)?),
            Keyword::Save => StmtKind::Save(required_template(rest)?),
            Keyword::Diff => {
                let args = split_args(rest);
                match args.as_slice() {
                    [a, b] => StmtKind::Diff(template_of(a), template_of(b)),
                    _ => return Err("expected two file names".into()),
                }
            }
            Keyword::Set | Keyword::Use => StmtKind::Set(assignment(rest, kw == Keyword::Use)?),
            Keyword::Variable => {
                let v = variable(rest, self.current_kind())?;
                let block = self.current();
                if let Some(b) = self.script.blocks.get_mut(block.index()) {
                    b.variables.push(VarDecl { name: v.name.clone(), scope: v.scope });
                }
                StmtKind::Variable(v)
            }
            Keyword::If => branch(BranchKind::If, required_expr(rest)?),
            Keyword::ElseIf => branch(BranchKind::ElseIf, required_expr(rest)?),
            Keyword::Else => {
                let (word, cond) = split_keyword(rest);
                if word.eq_ignore_ascii_case("if") {
                    branch(BranchKind::ElseIf, required_expr(cond)?)
                } else if rest.is_empty() {
                    StmtKind::Branch(BranchStmt {
                        kind: BranchKind::Else,
                        cond: None,
                        next_clause: None,
                        end: None,
                    })
                } else {
                    return Err(format!("unexpected {rest:?}"));
                }
            }
            Keyword::Endif => StmtKind::EndBranch,
            Keyword::Jump => {
                let (label, cond) = split_keyword(rest);
                if label.is_empty() {
                    return Err("missing label".into());
                }
                StmtKind::Jump(JumpStmt {
                    label: label.to_owned(),
                    cond: optional_expr(cond)?,
                    target: None,
                    dynamic: None,
                })
            }
            Keyword::Label => {
                let (name, _) = split_keyword(rest);
                if name.is_empty() {
                    return Err("missing label name".into());
                }
                return self.label(line, name, rest);
            }
            Keyword::For => StmtKind::Iterate(IterateStmt {
                kind: IterKind::ForTracks(selector(rest)?),
                end: None,
            }),
            Keyword::Repeat => StmtKind::Iterate(IterateStmt {
                kind: IterKind::Repeat(required_expr(rest)?),
                end: None,
            }),
            Keyword::While => StmtKind::Iterate(IterateStmt {
                kind: IterKind::While(required_expr(rest)?),
                end: None,
            }),
            Keyword::Next => StmtKind::Next { start: None },
            Keyword::Break => StmtKind::Break { start: None },
            Keyword::Call => StmtKind::Call(call(rest)?),
            Keyword::Start => StmtKind::Start(call(rest)?),
            Keyword::Proc => return self.open_block(line, BlockKind::Proc, rest),
            Keyword::Param => return self.open_block(line, BlockKind::Param, rest),
            Keyword::Endproc => return self.close_block(line, BlockKind::Proc, rest),
            Keyword::Endparam => return self.close_block(line, BlockKind::Param, rest),
            Keyword::Wait => {
                let args: Vec<String> = split_args(rest).into_iter().map(|a| a.text).collect();
                StmtKind::Wait(WaitStmt::parse(&args)?)
            }
            Keyword::End => StmtKind::End,
            Keyword::Cancel => StmtKind::Cancel(script_target(rest, true)),
            Keyword::Interrupt => StmtKind::Interrupt(script_target(rest, false)),
        };
        self.push(line, kind, rest);
        Ok(())
    }

    fn label(&mut self, line: usize, name: &str, rest: &str) -> Result<(), String> {
        let block = self.current();
        let id = self.push(line, StmtKind::Label(name.to_owned()), rest);
        if let Some(b) = self.script.blocks.get_mut(block.index()) {
            b.labels.push((name.to_owned(), id));
        }
        if block == BlockId::ROOT {
            if let Some(which) = Notification::from_label(name) {
                let slot = self.script.labels.slot(which);
                if slot.is_none() {
                    *slot = Some(id);
                }
            }
        }
        Ok(())
    }

    fn open_block(&mut self, line: usize, kind: BlockKind, rest: &str) -> Result<(), String> {
        let (name, _) = split_keyword(rest);
        if name.is_empty() {
            return Err("missing name".into());
        }
        let parent = self.current();
        let id = BlockId(self.script.blocks.len() as u32);
        self.script.blocks.push(Block::new(kind, Some(name.to_owned()), Some(parent)));
        if kind == BlockKind::Proc {
            if let Some(b) = self.script.blocks.get_mut(parent.index()) {
                b.procs.push((name.to_owned(), id));
            }
        }
        let stmt = if kind == BlockKind::Proc { StmtKind::Proc(id) } else { StmtKind::Param(id) };
        self.push(line, stmt, rest);
        self.stack.push(id);
        Ok(())
    }

    fn close_block(&mut self, line: usize, kind: BlockKind, rest: &str) -> Result<(), String> {
        if self.stack.len() < 2 || self.current_kind() != kind {
            let closer = if kind == BlockKind::Param { "Endparam" } else { "Endproc" };
            self.error(line, CompileErrorKind::Structure, format!("{closer} without an open block"));
            return Ok(());
        }
        let stmt = if kind == BlockKind::Proc { StmtKind::EndProc } else { StmtKind::EndParam };
        self.push(line, stmt, rest);
        self.stack.pop();
        Ok(())
    }

    fn declaration(&mut self, key: &str, rest: &str) {
        let block = self.current();
        let args = split_args(rest)
            .into_iter()
            .flat_map(|a| {
                if a.quoted {
                    vec![a.text]
                } else {
                    a.text.split(',').filter(|s| !s.is_empty()).map(str::to_owned).collect()
                }
            })
            .collect();
        if let Some(b) = self.script.blocks.get_mut(block.index()) {
            b.declarations.push(Declaration { key: key.to_owned(), args });
        }
    }

    /// `<Function> [up|down] [expr]`
    fn function(&mut self, name: &str, rest: &str) -> Result<FunctionStmt, String> {
        let (first, tail) = split_keyword(rest);
        let (direction, arg_text) = if first.eq_ignore_ascii_case("down") {
            (Some(Direction::Down), tail)
        } else if first.eq_ignore_ascii_case("up") {
            (Some(Direction::Up), tail)
        } else {
            (None, rest)
        };
        Ok(FunctionStmt {
            name: name.to_owned(),
            direction,
            arg: optional_expr(arg_text)?,
            target: CallTarget::Unresolved,
        })
    }
}

// ── Argument forms ────────────────────────────────────────────────────────────

fn optional_expr(text: &str) -> Result<Option<Expr>, String> {
    if text.trim().is_empty() {
        Ok(None)
    } else {
        parse_expr(text).map(Some)
    }
}

fn required_expr(text: &str) -> Result<Expr, String> {
    optional_expr(text)?.ok_or_else(|| "missing expression".to_owned())
}

fn branch(kind: BranchKind, cond: Expr) -> StmtKind {
    StmtKind::Branch(BranchStmt { kind, cond: Some(cond), next_clause: None, end: None })
}

fn template_of(arg: &Arg) -> Template {
    let piece = if arg.quoted {
        Piece::Text(arg.text.clone())
    } else {
        Piece::Ref(Reference::Name(arg.text.clone()))
    };
    Template { pieces: vec![piece] }
}

fn template(rest: &str) -> Template {
    Template {
        pieces: split_args(rest)
            .iter()
            .flat_map(|a| template_of(a).pieces)
            .collect(),
    }
}

fn required_template(rest: &str) -> Result<Template, String> {
    let t = template(rest);
    if t.pieces.is_empty() {
        Err("missing file name".into())
    } else {
        Ok(t)
    }
}

/// `name [=] expr`, also `name=expr`.
fn assignment(rest: &str, restore: bool) -> Result<SetStmt, String> {
    let end = rest.find(|c: char| c.is_whitespace() || c == '=').unwrap_or(rest.len());
    let (name, tail) = rest.split_at(end);
    if name.is_empty() {
        return Err("missing variable name".into());
    }
    let tail = tail.trim_start();
    let tail = tail.strip_prefix('=').unwrap_or(tail);
    Ok(SetStmt {
        target: Reference::Name(name.to_owned()),
        value: required_expr(tail)?,
        restore,
    })
}

/// `[global|track|script|local] name [[=] expr]`
fn variable(rest: &str, block: BlockKind) -> Result<VariableStmt, String> {
    let (first, tail) = split_keyword(rest);
    let (scope, rest) = match VarScope::parse(first) {
        Some(scope) if !tail.is_empty() => (scope, tail),
        _ if block == BlockKind::Proc => (VarScope::Local, rest),
        _ => (VarScope::Script, rest),
    };
    let end = rest.find(|c: char| c.is_whitespace() || c == '=').unwrap_or(rest.len());
    let (name, tail) = rest.split_at(end);
    if name.is_empty() {
        return Err("missing variable name".into());
    }
    let tail = tail.trim_start();
    let tail = tail.strip_prefix('=').unwrap_or(tail);
    Ok(VariableStmt { name: name.to_owned(), scope, init: optional_expr(tail)? })
}

fn selector(rest: &str) -> Result<TrackSelector, String> {
    let (word, tail) = split_keyword(rest);
    Ok(match word.to_ascii_lowercase().as_str() {
        "" => return Err("missing track selector".into()),
        "*" | "all" => TrackSelector::All,
        "focused" => TrackSelector::Focused,
        "muted" => TrackSelector::Muted,
        "playing" => TrackSelector::Playing,
        "recording" => TrackSelector::Recording,
        "group" if !tail.is_empty() => TrackSelector::Group(tail.to_owned()),
        "group" => return Err("missing group name".into()),
        _ => TrackSelector::Tracks(
            rest.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(parse_expr)
                .collect::<Result<_, _>>()?,
        ),
    })
}

/// `name args...`; each argument is a quoted string or a single-word expression.
fn call(rest: &str) -> Result<CallStmt, String> {
    let mut args = split_args(rest).into_iter();
    let name = args.next().ok_or("missing name")?.text;
    let args = args
        .map(|a| {
            if a.quoted {
                Ok(Expr::Literal(Value::Str(a.text)))
            } else {
                parse_expr(&a.text)
            }
        })
        .collect::<Result<_, _>>()?;
    Ok(CallStmt { name, args, target: CallTarget::Unresolved })
}

fn script_target(rest: &str, allow_all: bool) -> ScriptTarget {
    let name = rest.trim().trim_matches('"');
    if name.is_empty() {
        ScriptTarget::Current
    } else if allow_all && name.eq_ignore_ascii_case("all") {
        ScriptTarget::All
    } else {
        ScriptTarget::Named { name: name.to_owned(), script: None }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::wait::WaitTarget;

    fn parse(src: &str) -> Script {
        match parse_script("test", src) {
            Ok(s) => s,
            Err(errs) => panic!("unexpected errors: {errs:?}"),
        }
    }

    fn kinds(s: &Script, block: BlockId) -> Vec<&'static str> {
        s.blocks[block.index()].stmts.iter().map(|id| s.stmts[id.index()].kind.keyword()).collect()
    }

    #[test]
    fn split_args_quotes() {
        let args = split_args(r#"Echo "hello world" x"#);
        assert_eq!(args.len(), 3);
        assert_eq!(args[1], Arg { text: "hello world".into(), quoted: true });
        assert!(!args[2].quoted);
    }

    #[test]
    fn keyword_table_is_case_insensitive() {
        assert_eq!(Keyword::lookup("ENDPROC"), Some(Keyword::Endproc));
        assert_eq!(Keyword::lookup("Record"), None);
    }

    #[test]
    fn directives_set_flags() {
        let s = parse("!name Fancy Name\n!autoload\n!focuslock\n!sustain 250\n!frobnicate\nRecord\n");
        assert_eq!(s.name, "Fancy Name");
        assert!(s.flags.autoload && s.flags.focus_lock);
        assert_eq!(s.sustain_msecs, 250);
        assert_eq!(s.multiclick_msecs, 1000);
    }

    #[test]
    fn statements_are_chained() {
        let s = parse("# comment\nRecord\n\nWait frame 100\nMute\n");
        assert_eq!(kinds(&s, BlockId::ROOT), vec!["function", "Wait", "function"]);
        assert_eq!(s.stmts[0].next, Some(StmtId(1)));
        assert_eq!(s.stmts[1].next, Some(StmtId(2)));
        assert_eq!(s.stmts[2].next, None);
        assert_eq!(s.stmts[1].line, 4);
        match &s.stmts[1].kind {
            StmtKind::Wait(w) => assert_eq!(w.target, WaitTarget::Absolute(crate::script::wait::WaitUnit::Frame)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_keyword_is_function() {
        let s = parse("Overdub down\nTrackSelect 2\n");
        match &s.stmts[0].kind {
            StmtKind::Function(f) => {
                assert_eq!(f.name, "Overdub");
                assert_eq!(f.direction, Some(Direction::Down));
                assert!(f.arg.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        match &s.stmts[1].kind {
            StmtKind::Function(f) => assert_eq!(f.arg, Some(Expr::Literal(Value::Int(2)))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn procs_open_child_blocks() {
        let s = parse("Call Twice\nProc Twice\n  Record\n  Record\nEndproc\nMute\n");
        assert_eq!(kinds(&s, BlockId::ROOT), vec!["Call", "Proc", "function"]);
        assert_eq!(kinds(&s, BlockId(1)), vec!["function", "function", "Endproc"]);
        assert_eq!(s.blocks[0].procs, vec![("Twice".to_string(), BlockId(1))]);
        assert_eq!(s.blocks[1].parent, Some(BlockId::ROOT));
    }

    #[test]
    fn unclosed_proc_is_structural() {
        let errs = parse_script("bad", "Proc Loose\nRecord\n").expect_err("should fail");
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].kind, CompileErrorKind::Structure);
    }

    #[test]
    fn stray_closer_is_structural() {
        let errs = parse_script("bad", "Record\nEndproc\n").expect_err("should fail");
        assert_eq!(errs[0].kind, CompileErrorKind::Structure);
        assert_eq!(errs[0].line, 2);
    }

    #[test]
    fn malformed_arguments_are_parse_errors() {
        let errs = parse_script("bad", "Set\nIf\nWait until eon 3\n").expect_err("should fail");
        assert_eq!(errs.len(), 3);
        assert!(errs.iter().all(|e| e.kind == CompileErrorKind::Parse));
    }

    #[test]
    fn param_block_declarations() {
        let s = parse("!parameter\nParam Depth\n  type int\n  default 3\n  options a,b,c\nEndparam\n");
        let block = &s.blocks[1];
        assert_eq!(block.kind, BlockKind::Param);
        assert_eq!(block.declaration("DEFAULT").map(|d| d.args.clone()), Some(vec!["3".to_string()]));
        assert_eq!(block.declaration("options").map(|d| d.args.len()), Some(3));
    }

    #[test]
    fn variable_scopes() {
        let s = parse("Variable global total = 0\nVariable count\nProc P\n Variable tmp 1\nEndproc\n");
        assert_eq!(s.blocks[0].variables[0], VarDecl { name: "total".into(), scope: VarScope::Global });
        assert_eq!(s.blocks[0].variables[1], VarDecl { name: "count".into(), scope: VarScope::Script });
        assert_eq!(s.blocks[1].variables[0], VarDecl { name: "tmp".into(), scope: VarScope::Local });
    }

    #[test]
    fn notification_labels_are_cached() {
        let s = parse("Record\nEnd\nLabel sustain\nOverdub\nEnd\nLabel endSustain\nEnd\n");
        assert_eq!(s.labels.sustain, Some(StmtId(2)));
        assert_eq!(s.labels.end_sustain, Some(StmtId(5)));
        assert_eq!(s.labels.click, None);
    }

    #[test]
    fn set_forms() {
        for src in ["Set x 5", "Set x = 5", "Set x=5"] {
            let s = parse(src);
            match &s.stmts[0].kind {
                StmtKind::Set(set) => {
                    assert_eq!(set.target, Reference::Name("x".into()));
                    assert_eq!(set.value, Expr::Literal(Value::Int(5)));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn else_if_spellings() {
        let s = parse("If x\nElse If y\nElseif z\nElse\nEndif\n");
        let kinds = kinds(&s, BlockId::ROOT);
        assert_eq!(kinds, vec!["If", "Else If", "Else If", "Else", "Endif"]);
    }

    #[test]
    fn selectors() {
        assert!(matches!(selector("*"), Ok(TrackSelector::All)));
        assert!(matches!(selector("group drums"), Ok(TrackSelector::Group(g)) if g == "drums"));
        assert!(matches!(selector("1,3"), Ok(TrackSelector::Tracks(v)) if v.len() == 2));
        assert!(selector("").is_err());
    }
}
