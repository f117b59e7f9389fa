//! The `ai.<method>(...)` surface reachable from `EXECUTE:` lines.
//!
//! A command is parsed as one expression. Only a method call directly on the
//! `ai` object, naming a whitelisted method, with literal arguments, is
//! accepted. Nothing is evaluated.

use super::{files, ActionError, CommandError, SafeShell};
use crate::cognition::thought_seed::{SeedContext, SeedStore};
use serde_json::Value;
use syn::{Expr, Lit, UnOp};

pub const ALLOWED_OBJECT: &str = "ai";
pub const WHITELIST: &[&str] = &["read", "write", "shell", "seed"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("not a single method call expression")]
    NotACall,
    #[error("calls are only allowed on `{ALLOWED_OBJECT}`")]
    NotOnAllowedObject,
    #[error("method `{0}` is not whitelisted")]
    MethodNotWhitelisted(String),
    #[error("argument is not a literal: {0}")]
    ArgumentNotLiteral(&'static str),
    #[error("bad arguments for `{method}`: {reason}")]
    BadArguments { method: String, reason: String },
}

/// A validated call, ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiCall {
    Read { path: String },
    Write { path: String, content: String },
    Shell { command: String },
    Seed { note: String },
}

/// Rewrite `'...'` strings as `"..."` so single-quoted arguments lex as strings.
fn normalize_quotes(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars();
    let mut in_double = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(n) = chars.next() {
                    out.push(n);
                }
            }
            '"' => {
                in_double = !in_double;
                out.push(c);
            }
            '\'' if !in_double => {
                out.push('"');
                while let Some(n) = chars.next() {
                    match n {
                        '\'' => break,
                        '"' => out.push_str("\\\""),
                        '\\' => {
                            out.push('\\');
                            if let Some(e) = chars.next() {
                                out.push(e);
                            }
                        }
                        _ => out.push(n),
                    }
                }
                out.push('"');
            }
            _ => out.push(c),
        }
    }
    out
}

fn expr_kind(expr: &Expr) -> &'static str {
    match expr {
        Expr::Call(_) => "function call",
        Expr::MethodCall(_) => "method call",
        Expr::Path(_) => "name",
        Expr::Binary(_) => "binary expression",
        Expr::Field(_) => "field access",
        Expr::Macro(_) => "macro",
        Expr::Assign(_) => "assignment",
        Expr::Closure(_) => "closure",
        Expr::Block(_) => "block",
        _ => "expression",
    }
}

/// Convert a literal argument to a JSON value.
fn literal_value(expr: &Expr) -> Result<Value, ExecutionError> {
    match expr {
        Expr::Lit(l) => match &l.lit {
            Lit::Str(s) => Ok(Value::String(s.value())),
            Lit::Char(c) => Ok(Value::String(c.value().to_string())),
            Lit::Bool(b) => Ok(Value::Bool(b.value)),
            Lit::Int(i) => i.base10_parse::<i64>().map(Value::from).map_err(|_| ExecutionError::ArgumentNotLiteral("integer out of range")),
            Lit::Float(f) => f.base10_parse::<f64>().map(Value::from).map_err(|_| ExecutionError::ArgumentNotLiteral("malformed float")),
            _ => Err(ExecutionError::ArgumentNotLiteral("unsupported literal")),
        },
        Expr::Unary(u) if matches!(u.op, UnOp::Neg(_)) => match literal_value(&u.expr)? {
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Ok(Value::from(-i)),
                (None, Some(f)) => Ok(Value::from(-f)),
                _ => Err(ExecutionError::ArgumentNotLiteral("negated value")),
            },
            _ => Err(ExecutionError::ArgumentNotLiteral("negated non-number")),
        },
        Expr::Array(a) => a.elems.iter().map(literal_value).collect::<Result<Vec<_>, _>>().map(Value::Array),
        Expr::Tuple(t) => t.elems.iter().map(literal_value).collect::<Result<Vec<_>, _>>().map(Value::Array),
        Expr::Paren(p) => literal_value(&p.expr),
        other => Err(ExecutionError::ArgumentNotLiteral(expr_kind(other))),
    }
}

fn string_args<const N: usize>(method: &str, args: &[Value], names: [&str; N]) -> Result<[String; N], ExecutionError> {
    if args.len() != N {
        return Err(ExecutionError::BadArguments {
            method: method.to_string(),
            reason: format!("expected {N} argument(s) ({}), got {}", names.join(", "), args.len()),
        });
    }
    let mut out: [String; N] = std::array::from_fn(|_| String::new());
    for (i, (arg, name)) in args.iter().zip(names).enumerate() {
        match arg {
            Value::String(s) => out[i] = s.clone(),
            _ => {
                return Err(ExecutionError::BadArguments {
                    method: method.to_string(),
                    reason: format!("`{name}` must be a string"),
                });
            }
        }
    }
    Ok(out)
}

/// Validate `src` without side effects.
pub fn parse_call(src: &str) -> Result<AiCall, ExecutionError> {
    let normalized = normalize_quotes(src.trim());
    let expr: Expr = syn::parse_str(&normalized).map_err(|_| ExecutionError::NotACall)?;

    let Expr::MethodCall(call) = expr else {
        return Err(ExecutionError::NotACall);
    };
    let on_ai = matches!(
        call.receiver.as_ref(),
        Expr::Path(p) if p.qself.is_none() && p.path.is_ident(ALLOWED_OBJECT)
    );
    if !on_ai {
        return Err(ExecutionError::NotOnAllowedObject);
    }
    let method = call.method.to_string();
    if !WHITELIST.contains(&method.as_str()) {
        return Err(ExecutionError::MethodNotWhitelisted(method));
    }
    if call.turbofish.is_some() {
        return Err(ExecutionError::BadArguments { method, reason: "type arguments are not allowed".into() });
    }

    let args = call.args.iter().map(literal_value).collect::<Result<Vec<_>, _>>()?;
    match method.as_str() {
        "read" => string_args(&method, &args, ["path"]).map(|[path]| AiCall::Read { path }),
        "write" => string_args(&method, &args, ["path", "content"]).map(|[path, content]| AiCall::Write { path, content }),
        "shell" => string_args(&method, &args, ["command"]).map(|[command]| AiCall::Shell { command }),
        "seed" => string_args(&method, &args, ["note"]).map(|[note]| AiCall::Seed { note }),
        _ => Err(ExecutionError::MethodNotWhitelisted(method)),
    }
}

/// Dispatches validated calls to the file, shell and seed primitives.
#[derive(Debug, Clone)]
pub struct SafeExecutor {
    shell: SafeShell,
    seeds: SeedStore,
}

impl SafeExecutor {
    pub fn new(shell: SafeShell, seeds: SeedStore) -> Self {
        Self { shell, seeds }
    }

    pub fn shell(&self) -> &SafeShell {
        &self.shell
    }

    /// Parse then run `src`. Rejection happens before any side effect.
    pub async fn execute(&self, src: &str) -> Result<String, CommandError> {
        let call = parse_call(src)?;
        tracing::debug!(?call, "dispatching safe call");
        let output = match call {
            AiCall::Read { path } => files::read_text(&path).await?,
            AiCall::Write { path, content } => match files::write_with_backup(&path, &content).await? {
                Some(backup) => format!("wrote {} bytes to {path} (backup: {})", content.len(), backup.display()),
                None => format!("wrote {} bytes to {path}", content.len()),
            },
            AiCall::Shell { command } => {
                let out = self.shell.run(&command).await?;
                if !out.success() {
                    return Err(ActionError::Exited(out.summary()).into());
                }
                out.summary()
            }
            AiCall::Seed { note } => {
                let seed = self.seeds.record(&note, &note, SeedContext::default()).await.map_err(ActionError::from)?;
                format!("seed recorded: {}", seed.id)
            }
        };
        Ok(output)
    }
}
