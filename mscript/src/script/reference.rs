//! References: textual names bound to their backing store.
//!
//! Resolution happens once, at compile time, and the result is stored on the
//! statement or expression node that used the name.  Reading and writing a
//! resolved reference is the interpreter's job (see
//! [`Interpreter`](super::interp::Interpreter)), since the stores it
//! dispatches to (call arguments, user-variable tables, the engine) only
//! exist at run time.

use crate::engine::{Catalog, ParamKind};

use super::stmt::{Block, BlockId};
use super::value::Value;
use super::vars::{AutoVar, InternalVar, VarScope};

/// A resolved (or not yet resolved) binding of a name.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    /// Straight from the parser; replaced during the resolve phase.
    Name(String),
    /// The name did not resolve and stands for itself.
    Literal(Value),
    /// Zero-based positional argument of the innermost call.
    Arg(usize),
    Internal(InternalVar),
    Variable { name: String, scope: VarScope },
    Parameter { name: String, kind: ParamKind },
    Auto(AutoVar),
}

impl Reference {
    pub fn is_literal(&self) -> bool {
        matches!(self, Reference::Name(_) | Reference::Literal(_))
    }

    /// Text used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Reference::Name(n) => n.clone(),
            Reference::Literal(v) => v.to_string(),
            Reference::Arg(i) => format!("${}", i + 1),
            Reference::Internal(v) => v.name().to_owned(),
            Reference::Variable { name, .. } | Reference::Parameter { name, .. } => name.clone(),
            Reference::Auto(AutoVar::Interrupted) => "interrupted".into(),
            Reference::Auto(AutoVar::ReturnCode) => "returnCode".into(),
        }
    }
}

// ── Resolver ──────────────────────────────────────────────────────────────────

/// Binds names against the engine catalog and a script's block tree.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    catalog: &'a Catalog,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Resolver { catalog }
    }

    /// Resolve `raw` as seen from `block`.  The order is fixed:
    /// positional argument, internal variable, declared variable (innermost
    /// block outward), engine parameter, auto variable, literal.
    pub fn resolve(&self, raw: &str, blocks: &[Block], block: BlockId) -> Reference {
        if let Some(index) = positional(raw) {
            return Reference::Arg(index);
        }
        if let Some(var) = InternalVar::lookup(raw) {
            return Reference::Internal(var);
        }
        if let Some(scope) = find_variable(raw, blocks, block) {
            return Reference::Variable { name: raw.to_owned(), scope };
        }
        if let Some(def) = self.catalog.parameter(raw) {
            return Reference::Parameter { name: def.name.clone(), kind: def.kind };
        }
        if let Some(auto) = AutoVar::lookup(raw) {
            return Reference::Auto(auto);
        }
        Reference::Literal(Value::parse_literal(raw))
    }

    /// Resolve in place when `reference` is still a bare name.
    pub fn bind(&self, reference: &mut Reference, blocks: &[Block], block: BlockId) {
        if let Reference::Name(raw) = reference {
            *reference = self.resolve(raw, blocks, block);
        }
    }
}

/// `$N` with N ≥ 1 → zero-based index.
fn positional(raw: &str) -> Option<usize> {
    let digits = raw.strip_prefix('$')?;
    match digits.parse::<usize>() {
        Ok(n) if n >= 1 => Some(n - 1),
        _ => None,
    }
}

/// Search the declarations of `block` and then each enclosing block.
fn find_variable(name: &str, blocks: &[Block], block: BlockId) -> Option<VarScope> {
    let mut current = blocks.get(block.index());
    while let Some(b) = current {
        if let Some(decl) = b.variables.iter().find(|d| d.name == name) {
            return Some(decl.scope);
        }
        current = b.parent.and_then(|p| blocks.get(p.index()));
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::stmt::{BlockKind, VarDecl};

    fn tree() -> Vec<Block> {
        let mut root = Block::new(BlockKind::Script, None, None);
        root.variables.push(VarDecl { name: "count".into(), scope: VarScope::Script });
        root.variables.push(VarDecl { name: "quantize".into(), scope: VarScope::Global });
        let mut proc_a = Block::new(BlockKind::Proc, Some("A".into()), Some(BlockId::ROOT));
        proc_a.variables.push(VarDecl { name: "tmp".into(), scope: VarScope::Local });
        let proc_b = Block::new(BlockKind::Proc, Some("B".into()), Some(BlockId::ROOT));
        vec![root, proc_a, proc_b]
    }

    #[test]
    fn positional_arguments() {
        let c = Catalog::standard();
        let r = Resolver::new(&c);
        assert_eq!(r.resolve("$1", &tree(), BlockId::ROOT), Reference::Arg(0));
        assert_eq!(r.resolve("$12", &tree(), BlockId::ROOT), Reference::Arg(11));
        // `$0` is not an argument marker.
        assert!(r.resolve("$0", &tree(), BlockId::ROOT).is_literal());
    }

    #[test]
    fn internal_beats_variable() {
        let c = Catalog::standard();
        let mut blocks = tree();
        blocks[0].variables.push(VarDecl { name: "mode".into(), scope: VarScope::Script });
        let r = Resolver::new(&c).resolve("mode", &blocks, BlockId::ROOT);
        assert_eq!(r, Reference::Internal(InternalVar::Mode));
    }

    #[test]
    fn variables_resolve_outward_only() {
        let c = Catalog::standard();
        let r = Resolver::new(&c);
        let blocks = tree();
        let local = Reference::Variable { name: "tmp".into(), scope: VarScope::Local };
        assert_eq!(r.resolve("tmp", &blocks, BlockId(1)), local);
        // Sibling procedure cannot see A's local.
        assert!(r.resolve("tmp", &blocks, BlockId(2)).is_literal());
        // Top level is visible from everywhere.
        assert_eq!(
            r.resolve("count", &blocks, BlockId(2)),
            Reference::Variable { name: "count".into(), scope: VarScope::Script }
        );
    }

    #[test]
    fn declared_variable_shadows_parameter() {
        let c = Catalog::standard();
        let r = Resolver::new(&c).resolve("quantize", &tree(), BlockId::ROOT);
        assert!(matches!(r, Reference::Variable { scope: VarScope::Global, .. }));
    }

    #[test]
    fn parameters_then_autos_then_literals() {
        let c = Catalog::standard();
        let r = Resolver::new(&c);
        let blocks = tree();
        assert_eq!(
            r.resolve("FEEDBACK", &blocks, BlockId::ROOT),
            Reference::Parameter { name: "feedback".into(), kind: ParamKind::Track }
        );
        assert_eq!(r.resolve("interrupted", &blocks, BlockId::ROOT), Reference::Auto(AutoVar::Interrupted));
        assert_eq!(r.resolve("42", &blocks, BlockId::ROOT), Reference::Literal(Value::Int(42)));
        assert_eq!(
            r.resolve("record", &blocks, BlockId::ROOT),
            Reference::Literal(Value::Str("record".into()))
        );
    }

    #[test]
    fn bind_leaves_resolved_alone() {
        let c = Catalog::standard();
        let r = Resolver::new(&c);
        let mut reference = Reference::Arg(3);
        r.bind(&mut reference, &tree(), BlockId::ROOT);
        assert_eq!(reference, Reference::Arg(3));
        let mut name = Reference::Name("loopFrames".into());
        r.bind(&mut name, &tree(), BlockId::ROOT);
        assert_eq!(name, Reference::Internal(InternalVar::LoopFrames));
    }
}
