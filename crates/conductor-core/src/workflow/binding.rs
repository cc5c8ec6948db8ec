//! Declarative data movement between scopes.
//!
//! A binding reads `from` (or a literal `value`) out of an input scope and
//! writes it to `name` in an output scope. Init bindings move data from the
//! ambient scope into a stage; Post bindings move results back out.

use conductor_types::workflow::Binding;
use serde_json::Value;

use super::definition::WorkflowError;
use super::scope::{Scope, has_placeholder};

/// Prefix on a binding name that appends to an array instead of replacing.
pub const APPEND_PREFIX: &str = "->";

/// Apply `bindings` in order, reading from `input` and writing to `output`.
///
/// Returns the target names actually written, in order. A binding that
/// resolves to nothing leaves its target untouched unless `required`, in
/// which case the whole application fails.
pub fn apply_bindings(
    bindings: &[Binding],
    input: &Scope,
    output: &Scope,
) -> Result<Vec<String>, WorkflowError> {
    let mut written = Vec::with_capacity(bindings.len());

    for binding in bindings {
        let (target, append) = match binding.name.strip_prefix(APPEND_PREFIX) {
            Some(rest) => (rest.trim(), true),
            None => (binding.name.trim(), false),
        };
        if target.is_empty() {
            return Err(WorkflowError::Binding(format!(
                "binding name must not be empty (from: {:?})",
                binding.from
            )));
        }

        if binding.reset {
            output.remove(target);
        }

        let Some(value) = resolve(binding, input) else {
            if binding.required {
                return Err(WorkflowError::Binding(format!(
                    "required binding '{}' resolved to nothing (from: {})",
                    target,
                    binding.from.as_deref().unwrap_or("<literal>")
                )));
            }
            tracing::debug!(binding = target, "binding unresolved, skipped");
            continue;
        };

        if append {
            output.append(target, value);
        } else {
            output.put(target, value);
        }
        written.push(target.to_string());
    }

    Ok(written)
}

/// Resolve a single binding's value against `input`.
fn resolve(binding: &Binding, input: &Scope) -> Option<Value> {
    if let Some(from) = binding.from.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        let resolved = if is_single_reference(from) || !has_placeholder(from) {
            input.get(from)
        } else {
            // Template text is accepted only once every placeholder resolved.
            match input.expand(from) {
                Value::String(s) if has_placeholder(&s) => None,
                other => Some(other),
            }
        };
        if resolved.is_some() {
            return resolved;
        }
    }

    binding.value.as_ref().map(|v| input.expand_value(v))
}

/// `$name` or `${path}` with nothing around it.
fn is_single_reference(text: &str) -> bool {
    let Some(rest) = text.strip_prefix('$') else {
        return false;
    };
    match rest.strip_prefix('{') {
        Some(inner) => inner.strip_suffix('}').is_some_and(|p| !p.contains('}') && !p.is_empty()),
        None => {
            !rest.is_empty()
                && rest
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        }
    }
}
