//! Environment registry: the installed set of compiled scripts.
//!
//! Scripts are shared with running interpreters through `Arc`, so replacing
//! one (a reload) never invalidates an invocation that is still executing
//! the old version.  A [`ScriptId`] is the script's index here and stays
//! stable across recompiles of the same script.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::stmt::{BlockKind, Script, ScriptFunction, ScriptId};
use super::value::Value;

/// A user-defined parameter declared by a `Param` block.
#[derive(Debug, Clone, PartialEq)]
pub struct UserParam {
    pub name: String,
    pub script: ScriptId,
    /// `type` declaration; `string` when absent.
    pub kind: String,
    pub default: Value,
    pub options: Vec<String>,
    pub low: Option<i64>,
    pub high: Option<i64>,
}

impl UserParam {
    /// Clamp or validate a value against the declared range and options.
    pub fn accept(&self, value: &Value) -> Result<Value, String> {
        if !self.options.is_empty() {
            let text = value.as_str();
            return self
                .options
                .iter()
                .find(|o| o.eq_ignore_ascii_case(&text))
                .map(|o| Value::Str(o.clone()))
                .ok_or_else(|| format!("{}: {text:?} is not one of {}", self.name, self.options.join(",")));
        }
        match self.kind.as_str() {
            "int" | "integer" => {
                let mut n = value.as_int();
                if let Some(low) = self.low {
                    n = n.max(low);
                }
                if let Some(high) = self.high {
                    n = n.min(high);
                }
                Ok(Value::Int(n))
            }
            "bool" | "boolean" => Ok(Value::from(value.as_bool())),
            _ => Ok(value.clone()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Environment {
    scripts: Vec<Arc<Script>>,
    params: Vec<UserParam>,
}

impl Environment {
    /// Install a batch whose ids are already their positions.
    pub fn new(scripts: Vec<Script>) -> Self {
        let mut env = Environment::default();
        for script in scripts {
            env.install(script);
        }
        env
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn script(&self, id: ScriptId) -> Option<&Arc<Script>> {
        self.scripts.get(id.0 as usize)
    }

    pub fn scripts(&self) -> impl Iterator<Item = &Arc<Script>> {
        self.scripts.iter()
    }

    /// Case-insensitive lookup by display name.
    pub fn find(&self, name: &str) -> Option<&Arc<Script>> {
        self.scripts.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn find_by_path(&self, path: &Path) -> Option<&Arc<Script>> {
        self.scripts.iter().find(|s| s.path.as_deref() == Some(path))
    }

    /// Add or replace a script.  A script whose id is past the end is
    /// appended and renumbered.
    pub fn install(&mut self, mut script: Script) {
        let index = script.id.0 as usize;
        if index < self.scripts.len() {
            self.scripts[index] = Arc::new(script);
        } else {
            script.id = ScriptId(self.scripts.len() as u32);
            self.scripts.push(Arc::new(script));
        }
        self.params = collect_params(&self.scripts);
    }

    /// Scripts that can be bound to a trigger.
    pub fn functions(&self) -> impl Iterator<Item = &ScriptFunction> {
        self.scripts
            .iter()
            .filter(|s| s.is_triggerable() && !s.flags.hide)
            .map(|s| s.function())
    }

    /// Scripts flagged with `!button`.
    pub fn buttons(&self) -> impl Iterator<Item = &ScriptFunction> {
        self.scripts
            .iter()
            .filter(|s| s.flags.button && s.is_triggerable() && !s.flags.hide)
            .map(|s| s.function())
    }

    pub fn function(&self, name: &str) -> Option<&ScriptFunction> {
        self.find(name).filter(|s| s.is_triggerable()).map(|s| s.function())
    }

    pub fn parameters(&self) -> &[UserParam] {
        &self.params
    }

    pub fn parameter(&self, name: &str) -> Option<&UserParam> {
        self.params.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Source files of `!autoload` scripts that changed on disk since they
    /// were compiled.
    pub fn changed_autoload_scripts(&self) -> Vec<PathBuf> {
        self.scripts
            .iter()
            .filter(|s| s.flags.autoload)
            .filter_map(|s| {
                let path = s.path.as_ref()?;
                let now = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
                match s.modified {
                    Some(then) if now <= then => None,
                    _ => Some(path.clone()),
                }
            })
            .collect()
    }
}

fn collect_params(scripts: &[Arc<Script>]) -> Vec<UserParam> {
    let mut params = Vec::new();
    for script in scripts {
        for block in script.blocks.iter().filter(|b| b.kind == BlockKind::Param) {
            let Some(name) = block.name.clone() else { continue };
            let first = |key: &str| block.declaration(key).and_then(|d| d.args.first().cloned());
            let kind = first("type").unwrap_or_else(|| "string".into()).to_ascii_lowercase();
            let default = first("default").map(|d| Value::parse_literal(&d)).unwrap_or_default();
            params.push(UserParam {
                name,
                script: script.id,
                kind,
                default,
                options: block.declaration("options").map(|d| d.args.clone()).unwrap_or_default(),
                low: first("low").and_then(|v| v.parse().ok()),
                high: first("high").and_then(|v| v.parse().ok()),
            });
        }
    }
    params
}

// ── Tests ─────────────────────────────────────────────────────────────────────
