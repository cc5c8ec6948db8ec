//! Hierarchical key-value scope with placeholder expansion.
//!
//! `Scope` is the mutable state that flows through a workflow run. Bindings,
//! criteria and action requests all read from it; bindings and action
//! responses write into it. Cloning a `Scope` produces an alias of the same
//! store (used for shared-state nested runs); `fork` produces an independent
//! deep copy (private nested runs and async branches).

use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Shared handle over a JSON object store addressed by dotted paths.
///
/// Paths look like `build.artifact.name`; numeric segments index arrays on
/// reads. A leading `$` or a `${...}` wrapper is accepted and ignored so
/// template references can be passed straight through.
#[derive(Clone, Default)]
pub struct Scope {
    inner: Arc<RwLock<Map<String, Value>>>,
}

impl Scope {
    /// Create an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope seeded with `map`.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Independent deep copy of this scope.
    pub fn fork(&self) -> Self {
        Self::from_map(self.to_map())
    }

    /// Whether both handles point at the same store.
    pub fn is_alias_of(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read the value at `path`.
    pub fn get(&self, path: &str) -> Option<Value> {
        let segs = segments(path);
        if segs.is_empty() {
            return None;
        }
        let map = self.inner.read().expect("scope lock poisoned");
        lookup(&map, &segs).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Write `value` at `path`, creating intermediate objects.
    ///
    /// A non-object intermediate value is replaced by an object.
    pub fn put(&self, path: &str, value: Value) {
        let segs = segments(path);
        if segs.is_empty() {
            return;
        }
        let mut map = self.inner.write().expect("scope lock poisoned");
        insert(&mut map, &segs, value);
    }

    /// Push `value` onto the array at `path`, creating it when absent.
    ///
    /// A scalar already stored at `path` becomes the first array element.
    pub fn append(&self, path: &str, value: Value) {
        let segs = segments(path);
        if segs.is_empty() {
            return;
        }
        let mut map = self.inner.write().expect("scope lock poisoned");
        let next = match lookup(&map, &segs).cloned() {
            Some(Value::Array(mut items)) => {
                items.push(value);
                Value::Array(items)
            }
            Some(Value::Null) | None => Value::Array(vec![value]),
            Some(existing) => Value::Array(vec![existing, value]),
        };
        insert(&mut map, &segs, next);
    }

    /// Remove and return the value at `path`.
    pub fn remove(&self, path: &str) -> Option<Value> {
        let segs = segments(path);
        let mut map = self.inner.write().expect("scope lock poisoned");
        remove_path(&mut map, &segs)
    }

    /// Shallow-merge top-level keys of `other` into this scope.
    pub fn merge(&self, other: Map<String, Value>) {
        let mut map = self.inner.write().expect("scope lock poisoned");
        for (key, value) in other {
            map.insert(key, value);
        }
    }

    /// Top-level keys currently stored.
    pub fn keys(&self) -> Vec<String> {
        let map = self.inner.read().expect("scope lock poisoned");
        map.keys().cloned().collect()
    }

    /// Owned copy of the underlying map.
    pub fn to_map(&self) -> Map<String, Value> {
        self.inner.read().expect("scope lock poisoned").clone()
    }

    /// Owned JSON object snapshot, used as expression context.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.to_map())
    }

    /// Expand `$name` and `${path}` placeholders in `text`.
    ///
    /// When `text` is exactly one placeholder that resolves, the typed value
    /// is returned (so `"$count"` can yield a number). Unresolved
    /// placeholders are left verbatim.
    pub fn expand(&self, text: &str) -> Value {
        let tokens = tokenize(text);
        if let [Token::Placeholder { path, .. }] = tokens.as_slice() {
            return self
                .get(path)
                .unwrap_or_else(|| Value::String(text.to_string()));
        }

        let mut out = String::with_capacity(text.len());
        for token in tokens {
            match token {
                Token::Text(t) => out.push_str(t),
                Token::Placeholder { raw, path } => match self.get(path) {
                    Some(value) => out.push_str(&value_to_string(&value)),
                    None => out.push_str(raw),
                },
            }
        }
        Value::String(out)
    }

    /// Recursively expand every string inside `value`.
    pub fn expand_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.expand(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.expand_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.expand_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Expand every value of a request map.
    pub fn expand_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.expand_value(v)))
            .collect()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope").field("keys", &self.keys()).finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Whether `text` contains at least one placeholder.
pub fn has_placeholder(text: &str) -> bool {
    tokenize(text)
        .iter()
        .any(|t| matches!(t, Token::Placeholder { .. }))
}

/// Convert a JSON value to a display string for template resolution.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // For objects/arrays, return compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

fn segments(path: &str) -> Vec<&str> {
    let trimmed = path.trim();
    let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let trimmed = trimmed
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(trimmed);
    trimmed.split('.').filter(|s| !s.is_empty()).collect()
}

fn lookup<'a>(map: &'a Map<String, Value>, segs: &[&str]) -> Option<&'a Value> {
    let (first, rest) = segs.split_first()?;
    let mut current = map.get(*first)?;
    for seg in rest {
        current = match current {
            Value::Object(obj) => obj.get(*seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn insert(map: &mut Map<String, Value>, segs: &[&str], value: Value) {
    let Some((last, parents)) = segs.split_last() else {
        return;
    };
    let mut current = map;
    for seg in parents {
        let entry = current
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            unreachable!("entry was just made an object");
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

fn remove_path(map: &mut Map<String, Value>, segs: &[&str]) -> Option<Value> {
    let (last, parents) = segs.split_last()?;
    let mut current = map;
    for seg in parents {
        current = current.get_mut(*seg)?.as_object_mut()?;
    }
    current.remove(*last)
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Text(&'a str),
    Placeholder { raw: &'a str, path: &'a str },
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }

        // ${path}
        if bytes.get(i + 1) == Some(&b'{') {
            if let Some(close) = text[i + 2..].find('}') {
                let end = i + 2 + close;
                if end > i + 2 {
                    if start < i {
                        tokens.push(Token::Text(&text[start..i]));
                    }
                    tokens.push(Token::Placeholder {
                        raw: &text[i..=end],
                        path: &text[i + 2..end],
                    });
                    i = end + 1;
                    start = i;
                    continue;
                }
            }
            i += 1;
            continue;
        }

        // $name.with.dots
        let mut j = i + 1;
        while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_' || bytes[j] == b'.') {
            j += 1;
        }
        while j > i + 1 && bytes[j - 1] == b'.' {
            j -= 1;
        }
        if j > i + 1 {
            if start < i {
                tokens.push(Token::Text(&text[start..i]));
            }
            tokens.push(Token::Placeholder {
                raw: &text[i..j],
                path: &text[i + 1..j],
            });
            start = j;
            i = j;
        } else {
            i += 1;
        }
    }

    if start < text.len() {
        tokens.push(Token::Text(&text[start..]));
    }
    tokens
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
