//! Backward-compatibility comparison of an artifact file's old and new content.
//!
//! Each comparison reports every difference it can detect as a [`Breach`]; the
//! validator keeps the ones the role's policy forbids. Old content that cannot
//! be interpreted imposes no constraint.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::manifest::parse_manifest;
use crate::core::policy::Rule;
use crate::core::schema::FileRole;
use crate::core::version::{is_compatible_bump, parse_version};

static DEFAULT_FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"export\s+default\s+(?:async\s+)?function\b[^(]*\(").expect("function regex")
});
static DEFAULT_ARROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"export\s+default\s+(?:async\s+)?\(").expect("arrow regex")
});
static DEFAULT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"export\s+default\s+([A-Za-z_$][\w$]*)\s*;?\s*(?:\n|$)").expect("name regex")
});

/// Synthetic field name for a non-object output schema.
const ROOT_FIELD: &str = "(root)";

/// One detected incompatible difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breach {
    pub rule: Rule,
    pub detail: String,
}

impl Breach {
    fn new(rule: Rule, detail: impl Into<String>) -> Self {
        Self {
            rule,
            detail: detail.into(),
        }
    }
}

/// Compare the old and new content of a file playing `role`.
pub fn check_role(role: FileRole, old: &str, new: &str) -> Vec<Breach> {
    match role {
        FileRole::Main => check_signature(old, new),
        FileRole::InputsSchema => check_inputs(old, new),
        FileRole::OutputsSchema => check_outputs(old, new),
        FileRole::Graph => check_graph(old, new),
        FileRole::Triggers => check_triggers(old, new),
        FileRole::Meta | FileRole::FullSchema | FileRole::Config => Vec::new(),
    }
}

/// Compare two revisions of `package.json`.
///
/// New content that is not a manifest declares nothing, so every old
/// dependency counts as removed.
pub fn check_manifest(old: &str, new: &str) -> Vec<Breach> {
    let Ok(old) = parse_manifest(old) else {
        return Vec::new();
    };
    let new = parse_manifest(new).unwrap_or_default();
    let kept = new.declared();
    old.declared()
        .into_iter()
        .filter(|name| !kept.contains(name))
        .map(|name| Breach::new(Rule::DependencyRemoved, format!("dependency '{name}' removed")))
        .collect()
}

// ---------------------------------------------------------------------------
// main.ts

#[derive(Debug, Clone, PartialEq, Eq)]
struct Signature {
    /// Normalized type annotation per parameter.
    params: Vec<Option<String>>,
    returns: Option<String>,
}

fn check_signature(old: &str, new: &str) -> Vec<Breach> {
    let Some(before) = entry_signature(old) else {
        return Vec::new();
    };
    let Some(after) = entry_signature(new) else {
        return vec![Breach::new(
            Rule::SignatureChanged,
            "exported default entry function not found",
        )];
    };

    let mut breaches = Vec::new();
    if before.params.len() != after.params.len() {
        breaches.push(Breach::new(
            Rule::SignatureChanged,
            format!(
                "parameter count changed from {} to {}",
                before.params.len(),
                after.params.len()
            ),
        ));
    } else {
        for (position, (was, now)) in before.params.iter().zip(&after.params).enumerate() {
            if was != now {
                breaches.push(Breach::new(
                    Rule::SignatureChanged,
                    format!(
                        "parameter {} type changed from {} to {}",
                        position + 1,
                        annotation(was),
                        annotation(now)
                    ),
                ));
            }
        }
    }
    if before.returns != after.returns {
        breaches.push(Breach::new(
            Rule::SignatureChanged,
            format!(
                "return type changed from {} to {}",
                annotation(&before.returns),
                annotation(&after.returns)
            ),
        ));
    }
    breaches
}

fn annotation(ty: &Option<String>) -> &str {
    ty.as_deref().unwrap_or("<none>")
}

/// Signature of the module's default export, if it is a function.
fn entry_signature(source: &str) -> Option<Signature> {
    if let Some(found) = DEFAULT_FUNCTION_RE.find(source) {
        return signature_at(source, found.end(), ReturnEnd::Body);
    }
    if let Some(found) = DEFAULT_ARROW_RE.find(source) {
        return signature_at(source, found.end(), ReturnEnd::Arrow);
    }
    let name = DEFAULT_NAME_RE.captures(source)?.get(1)?.as_str();
    let escaped = regex::escape(name);
    let declared = Regex::new(&format!(r"function\s+{escaped}\s*(?:<[^>]*>)?\s*\(")).ok()?;
    if let Some(found) = declared.find(source) {
        return signature_at(source, found.end(), ReturnEnd::Body);
    }
    let bound = Regex::new(&format!(
        r"(?:const|let|var)\s+{escaped}\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b[^(]*)?\("
    ))
    .ok()?;
    let found = bound.find(source)?;
    let end = if found.as_str().contains("function") {
        ReturnEnd::Body
    } else {
        ReturnEnd::Arrow
    };
    signature_at(source, found.end(), end)
}

#[derive(Clone, Copy)]
enum ReturnEnd {
    Body,
    Arrow,
}

/// Parse parameters starting just after the opening `(` at `start`.
fn signature_at(source: &str, start: usize, end: ReturnEnd) -> Option<Signature> {
    let rest = &source[start..];
    let close = matching_close(rest)?;
    let params = split_top_level(&rest[..close], ',')
        .into_iter()
        .map(str::trim)
        .filter(|param| !param.is_empty())
        .map(param_type)
        .collect();

    let after = rest[close + 1..].trim_start();
    let returns = after
        .strip_prefix(':')
        .and_then(|tail| return_type(tail, end));

    Some(Signature { params, returns })
}

/// Index of the `)` closing an already-open paren.
fn matching_close(text: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (index, ch) in text.char_indices() {
        match ch {
            '(' | '{' | '[' => depth += 1,
            ')' if depth == 0 => return Some(index),
            ')' | '}' | ']' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Split at `separator` outside any bracket pair.
fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut last = 0;
    for (index, ch) in text.char_indices() {
        match ch {
            '(' | '{' | '[' | '<' => depth += 1,
            ')' | '}' | ']' => depth -= 1,
            '>' if index == 0 || !text[..index].ends_with('=') => depth -= 1,
            _ if ch == separator && depth == 0 && !text[index..].starts_with("=>") => {
                parts.push(&text[last..index]);
                last = index + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[last..]);
    parts
}

/// Type annotation of one parameter; the binding (name or pattern) is ignored.
fn param_type(param: &str) -> Option<String> {
    let without_default = split_top_level(param, '=')
        .first()
        .copied()
        .unwrap_or(param);
    let parts = split_top_level(without_default, ':');
    if parts.len() < 2 {
        return None;
    }
    let ty = without_default[parts[0].len() + 1..].trim();
    (!ty.is_empty()).then(|| normalize_type(ty))
}

fn return_type(text: &str, end: ReturnEnd) -> Option<String> {
    let mut depth = 0i32;
    let mut collected = String::new();
    for (index, ch) in text.char_indices() {
        match (end, ch) {
            (ReturnEnd::Body, '{') if depth == 0 && !collected.trim().is_empty() => break,
            (ReturnEnd::Arrow, '=') if depth == 0 && text[index..].starts_with("=>") => break,
            (_, '(' | '{' | '[' | '<') => depth += 1,
            (_, ')' | '}' | ']') => depth -= 1,
            (_, '>') if !collected.ends_with('=') => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return None;
        }
        collected.push(ch);
    }
    let ty = collected.trim();
    (!ty.is_empty()).then(|| normalize_type(ty))
}

fn normalize_type(ty: &str) -> String {
    ty.chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .trim_end_matches(';')
        .replace('"', "'")
}

// ---------------------------------------------------------------------------
// inputs.json / output.json

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    ty: Option<String>,
    required: bool,
}

fn check_inputs(old: &str, new: &str) -> Vec<Breach> {
    let Some(before) = parse_json(old).map(|value| fields(&value, "inputs")) else {
        return Vec::new();
    };
    let Some(after) = parse_json(new).map(|value| fields(&value, "inputs")) else {
        return Vec::new();
    };

    let mut breaches = Vec::new();
    for (name, was) in &before {
        let Some(now) = after.get(name) else {
            breaches.push(Breach::new(
                Rule::InputRemoved,
                format!("input '{name}' removed or renamed"),
            ));
            continue;
        };
        if let (Some(old_ty), Some(new_ty)) = (&was.ty, &now.ty)
            && old_ty != new_ty
        {
            breaches.push(Breach::new(
                Rule::InputRetyped,
                format!("input '{name}' type changed from {old_ty} to {new_ty}"),
            ));
        }
        if !was.required && now.required {
            breaches.push(Breach::new(
                Rule::InputMadeRequired,
                format!("input '{name}' changed from optional to required"),
            ));
        }
    }
    for (name, now) in &after {
        if now.required && !before.contains_key(name) {
            breaches.push(Breach::new(
                Rule::RequiredInputAdded,
                format!("new input '{name}' is required"),
            ));
        }
    }
    breaches
}

fn check_outputs(old: &str, new: &str) -> Vec<Breach> {
    let Some(before) = parse_json(old).map(|value| fields(&value, "outputs")) else {
        return Vec::new();
    };
    let Some(after) = parse_json(new).map(|value| fields(&value, "outputs")) else {
        return Vec::new();
    };

    let mut breaches = Vec::new();
    for (name, was) in &before {
        match after.get(name) {
            None => breaches.push(Breach::new(
                Rule::OutputRemoved,
                format!("output '{name}' removed or renamed"),
            )),
            Some(now) => {
                if let (Some(old_ty), Some(new_ty)) = (&was.ty, &now.ty)
                    && old_ty != new_ty
                {
                    breaches.push(Breach::new(
                        Rule::OutputRetyped,
                        format!("output '{name}' type changed from {old_ty} to {new_ty}"),
                    ));
                }
            }
        }
    }
    breaches
}

fn parse_json(raw: &str) -> Option<Value> {
    serde_json::from_str(raw).ok()
}

/// Declared fields of a schema in any of the accepted shapes:
/// JSON Schema `properties`/`required`, an array of `{name, type, required}`,
/// a `{name: {type, required}}` map, or any of these under an `inputs`/`outputs`
/// key. A bare typed schema becomes one root field.
fn fields(value: &Value, wrapper: &str) -> BTreeMap<String, Field> {
    if let Some(inner) = value.get(wrapper) {
        return fields(inner, wrapper);
    }

    let mut out = BTreeMap::new();
    match value {
        Value::Array(items) => {
            for item in items {
                let name = ["name", "id", "key"]
                    .iter()
                    .find_map(|key| item.get(*key).and_then(Value::as_str));
                if let Some(name) = name {
                    out.insert(name.to_string(), field(item, false));
                }
            }
        }
        Value::Object(map) => {
            if let Some(Value::Object(properties)) = map.get("properties") {
                let required: Vec<&str> = map
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|names| names.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                for (name, property) in properties {
                    out.insert(
                        name.clone(),
                        field(property, required.contains(&name.as_str())),
                    );
                }
            } else if map.contains_key("type") {
                out.insert(ROOT_FIELD.to_string(), field(value, false));
            } else {
                for (name, property) in map {
                    if name.starts_with('$') {
                        continue;
                    }
                    out.insert(name.clone(), field(property, false));
                }
            }
        }
        _ => {}
    }
    out
}

fn field(value: &Value, listed_required: bool) -> Field {
    let ty = match value {
        Value::String(ty) => Some(ty.clone()),
        _ => value.get("type").and_then(type_name),
    };
    let required = listed_required
        || value
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        || value.get("optional").and_then(Value::as_bool) == Some(false);
    Field { ty, required }
}

fn type_name(ty: &Value) -> Option<String> {
    match ty {
        Value::String(name) => Some(name.clone()),
        Value::Array(names) => {
            let mut names: Vec<&str> = names.iter().filter_map(Value::as_str).collect();
            names.sort_unstable();
            (!names.is_empty()).then(|| names.join("|"))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// nodes.json

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    reference: Option<String>,
    version: Option<String>,
}

fn check_graph(old: &str, new: &str) -> Vec<Breach> {
    let Some(before) = parse_json(old).map(|value| steps(&value)) else {
        return Vec::new();
    };
    let Some(after) = parse_json(new).map(|value| steps(&value)) else {
        return Vec::new();
    };

    let mut breaches = Vec::new();
    for (id, was) in &before {
        let Some(now) = after.get(id) else {
            breaches.push(Breach::new(
                Rule::StepRemoved,
                format!("step '{id}' removed or renamed"),
            ));
            continue;
        };
        if let (Some(old_ref), Some(new_ref)) = (&was.reference, &now.reference)
            && old_ref != new_ref
        {
            breaches.push(Breach::new(
                Rule::StepReferenceChanged,
                format!("step '{id}' now references '{new_ref}' instead of '{old_ref}'"),
            ));
        }
        let versions = (
            was.version.as_deref().and_then(parse_version),
            now.version.as_deref().and_then(parse_version),
        );
        if let (Some(old_version), Some(new_version)) = versions
            && !is_compatible_bump(&old_version, &new_version)
        {
            breaches.push(Breach::new(
                Rule::StepVersionIncompatible,
                format!("step '{id}' moved from version {old_version} to {new_version}"),
            ));
        }
    }
    breaches
}

/// Steps keyed by id, flattened across nested step lists.
fn steps(value: &Value) -> BTreeMap<String, Step> {
    let mut out = BTreeMap::new();
    collect_steps(value, None, &mut out);
    out
}

fn collect_steps(value: &Value, key: Option<&str>, out: &mut BTreeMap<String, Step>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_steps(item, None, out);
            }
        }
        Value::Object(map) => {
            let id = ["id", "stepId", "key"]
                .iter()
                .find_map(|field| map.get(*field).and_then(Value::as_str))
                .or(key);
            let reference = ["nodeId", "ref", "uses", "node"]
                .iter()
                .find_map(|field| map.get(*field).and_then(Value::as_str));

            if let (Some(id), Some(_)) = (id, reference) {
                let (reference, inline_version) = split_reference(reference);
                let version = map
                    .get("version")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or(inline_version);
                out.insert(id.to_string(), Step { reference, version });
            }

            let mut nested = false;
            for child in ["nodes", "steps", "children", "branches"] {
                if let Some(inner) = map.get(child) {
                    nested = true;
                    collect_steps(inner, None, out);
                }
            }
            if !nested && id.is_none() && reference.is_none() {
                // `{ "<step-id>": { ... } }` form.
                for (step_id, step) in map {
                    if step.is_object() {
                        collect_steps(step, Some(step_id), out);
                    }
                }
            }
        }
        _ => {}
    }
}

fn split_reference(reference: Option<&str>) -> (Option<String>, Option<String>) {
    match reference {
        Some(raw) => match raw.rsplit_once('@').filter(|(name, _)| !name.is_empty()) {
            Some((name, version)) => (Some(name.to_string()), Some(version.to_string())),
            None => (Some(raw.to_string()), None),
        },
        None => (None, None),
    }
}

// ---------------------------------------------------------------------------
// triggers.json

fn check_triggers(old: &str, new: &str) -> Vec<Breach> {
    let Some(before) = parse_json(old).map(|value| triggers(&value)) else {
        return Vec::new();
    };
    let Some(after) = parse_json(new).map(|value| triggers(&value)) else {
        return Vec::new();
    };

    before
        .iter()
        .filter_map(|(key, was)| {
            let now = after.get(key)?;
            (was != now).then(|| {
                Breach::new(
                    Rule::TriggerKindChanged,
                    format!("trigger '{key}' changed kind from {was} to {now}"),
                )
            })
        })
        .collect()
}

/// Trigger kind keyed by trigger id (or position when unnamed).
fn triggers(value: &Value) -> BTreeMap<String, String> {
    let value = value.get("triggers").unwrap_or(value);
    let mut out = BTreeMap::new();
    match value {
        Value::Array(items) => {
            for (position, item) in items.iter().enumerate() {
                let key = ["id", "name"]
                    .iter()
                    .find_map(|field| item.get(*field).and_then(Value::as_str))
                    .map_or_else(|| format!("#{position}"), str::to_string);
                if let Some(kind) = trigger_kind(item) {
                    out.insert(key, kind);
                }
            }
        }
        Value::Object(map) => {
            if let Some(kind) = trigger_kind(value) {
                out.insert("#0".to_string(), kind);
            } else {
                for (key, item) in map {
                    if let Some(kind) = trigger_kind(item) {
                        out.insert(key.clone(), kind);
                    }
                }
            }
        }
        _ => {}
    }
    out
}

fn trigger_kind(item: &Value) -> Option<String> {
    let raw = ["kind", "type"]
        .iter()
        .find_map(|field| item.get(*field).and_then(Value::as_str))?;
    let kind = raw.trim().to_lowercase();
    let normalized = match kind.as_str() {
        "http" | "https" | "webhook" | "api" | "rest" | "request" => "request",
        "cron" | "schedule" | "scheduled" | "timer" | "interval" => "schedule",
        other => other,
    };
    Some(normalized.to_string())
}
