//! Command compiler: `Command` + `StateSnapshot` → `ChangeSet`.
//!
//! Pure. Never talks to providers or the store; the snapshot is the only
//! view of the world it gets.

use serde_json::{Value, json};
use thiserror::Error;

use sf_protocol::{
    ChangeSet, Command, CommandKind, Operation, Resource, ResourceId, ResourceKind, StateSnapshot,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("command not recognized")]
    UnrecognizedIntent,
}

impl CompileError {
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::InvalidParameters(_) => "invalid_parameters",
            CompileError::Conflict(_) => "conflict",
            CompileError::TargetNotFound(_) => "target_not_found",
            CompileError::UnrecognizedIntent => "unrecognized_intent",
        }
    }
}

/// Compile a command against a snapshot.
pub fn compile(cmd: &Command, snapshot: &StateSnapshot) -> Result<ChangeSet, CompileError> {
    match cmd.kind {
        CommandKind::CreateResource => compile_create(cmd, snapshot),
        CommandKind::ScaleResource => compile_scale(cmd, snapshot),
        CommandKind::DeleteResource => compile_delete(cmd, snapshot),
        CommandKind::QueryStatus => Ok(ChangeSet::new(cmd.id, Vec::new(), query_summary(cmd))),
        CommandKind::Unknown => Err(CompileError::UnrecognizedIntent),
    }
}

fn param_kind(cmd: &Command) -> Result<Option<ResourceKind>, CompileError> {
    match cmd.param_str("kind") {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| CompileError::InvalidParameters(format!("{e}"))),
        None => Ok(None),
    }
}

fn required_str<'a>(cmd: &'a Command, key: &str) -> Result<&'a str, CompileError> {
    cmd.param_str(key)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CompileError::InvalidParameters(format!("'{key}' is required")))
}

/// Integer parameter that must be well-formed when present.
fn optional_u64(cmd: &Command, key: &str) -> Result<Option<u64>, CompileError> {
    if !cmd.has_param(key) {
        return Ok(None);
    }
    cmd.param_u64(key)
        .map(Some)
        .ok_or_else(|| CompileError::InvalidParameters(format!("'{key}' must be a non-negative integer")))
}

fn check_size(kind: ResourceKind, size: u64) -> Result<(), CompileError> {
    if size < kind.min_size() || size > kind.max_size() {
        return Err(CompileError::InvalidParameters(format!(
            "'{}' must be between {} and {}, got {size}",
            kind.scale_field(),
            kind.min_size(),
            kind.max_size()
        )));
    }
    Ok(())
}

/// Resolve the target of a scale/delete command.
///
/// By exact identity when kind and scope are both given, otherwise by name
/// narrowed by whichever of kind/scope is present.
fn resolve_target<'a>(cmd: &Command, snapshot: &'a StateSnapshot) -> Result<&'a Resource, CompileError> {
    let name = required_str(cmd, "target")?;
    let kind = param_kind(cmd)?;
    let scope = cmd.param_str("scope");

    if let (Some(kind), Some(scope)) = (kind, scope) {
        let id = ResourceId::new(kind, scope, name);
        return snapshot
            .get(&id)
            .ok_or_else(|| CompileError::TargetNotFound(id.to_string()));
    }

    let matches: Vec<&Resource> = snapshot
        .find_by_name(name)
        .into_iter()
        .filter(|r| kind.is_none_or(|k| r.id.kind == k))
        .filter(|r| scope.is_none_or(|s| r.id.scope == s))
        .collect();
    match matches.as_slice() {
        [] => Err(CompileError::TargetNotFound(name.to_string())),
        [one] => Ok(one),
        many => {
            let ids: Vec<String> = many.iter().map(|r| r.id.to_string()).collect();
            Err(CompileError::InvalidParameters(format!(
                "'{name}' matches several resources ({}); name the kind or scope",
                ids.join(", ")
            )))
        }
    }
}

fn compile_create(cmd: &Command, snapshot: &StateSnapshot) -> Result<ChangeSet, CompileError> {
    let kind = param_kind(cmd)?
        .ok_or_else(|| CompileError::InvalidParameters("'kind' is required".into()))?;
    let name = required_str(cmd, "name")?;
    let scope = cmd
        .param_str("scope")
        .unwrap_or_else(|| kind.default_scope());
    let id = ResourceId::new(kind, scope, name);

    if snapshot.contains(&id) {
        return Err(CompileError::Conflict(format!("{id} already exists")));
    }

    let spec = create_spec(cmd, kind)?;
    let summary = format!("create {id} with {}", describe_spec(kind, &spec));
    Ok(ChangeSet::new(cmd.id, vec![Operation::create(id, spec)], summary))
}

/// Kind-specific spec document, with defaults for anything not stated.
fn create_spec(cmd: &Command, kind: ResourceKind) -> Result<Value, CompileError> {
    let size = optional_u64(cmd, kind.scale_field())?.unwrap_or(1);
    check_size(kind, size)?;

    let spec = match kind {
        ResourceKind::Deployment => {
            let image = cmd.param_str("image").unwrap_or("nginx:latest");
            json!({"image": image, "replicas": size})
        }
        ResourceKind::CacheCluster => {
            let engine = cmd.param_str("engine").unwrap_or("redis").to_ascii_lowercase();
            if !matches!(engine.as_str(), "redis" | "memcached") {
                return Err(CompileError::InvalidParameters(format!(
                    "unsupported cache engine '{engine}'"
                )));
            }
            json!({"engine": engine, "nodes": size})
        }
        ResourceKind::ComputeInstance => {
            let instance_type = cmd.param_str("instance_type").unwrap_or("t3.medium");
            json!({"instance_type": instance_type, "count": size})
        }
    };
    Ok(spec)
}

fn compile_scale(cmd: &Command, snapshot: &StateSnapshot) -> Result<ChangeSet, CompileError> {
    let target = resolve_target(cmd, snapshot)?;
    let kind = target.id.kind;
    let field = kind.scale_field();

    // `replicas` is the generic size parameter; the kind's own field is accepted too.
    let size = match optional_u64(cmd, "replicas")? {
        Some(size) => size,
        None => optional_u64(cmd, field)?.ok_or_else(|| {
            CompileError::InvalidParameters("'replicas' must be given as an integer".into())
        })?,
    };
    check_size(kind, size)?;

    if target.size() == Some(size) {
        return Ok(ChangeSet::new(
            cmd.id,
            Vec::new(),
            format!("{} already has {size} {field}", target.id),
        ));
    }

    let mut spec = target.spec.clone();
    if !spec.is_object() {
        spec = json!({});
    }
    if let Some(obj) = spec.as_object_mut() {
        obj.insert(field.to_string(), json!(size));
    }
    let summary = match target.size() {
        Some(current) => format!("scale {} {field} {current} → {size}", target.id),
        None => format!("scale {} to {size} {field}", target.id),
    };
    Ok(ChangeSet::new(
        cmd.id,
        vec![Operation::update(target.clone(), spec)],
        summary,
    ))
}

fn compile_delete(cmd: &Command, snapshot: &StateSnapshot) -> Result<ChangeSet, CompileError> {
    let target = resolve_target(cmd, snapshot)?;
    let summary = format!("delete {}", target.id);
    Ok(ChangeSet::new(
        cmd.id,
        vec![Operation::delete(target.clone())],
        summary,
    ))
}

fn query_summary(cmd: &Command) -> String {
    let topic = cmd.param_str("topic").unwrap_or("status");
    match cmd.param_str("target") {
        Some(target) => format!("query {topic} of {target}"),
        None => format!("query {topic}"),
    }
}

fn describe_spec(kind: ResourceKind, spec: &Value) -> String {
    let size = spec.get(kind.scale_field()).and_then(Value::as_u64).unwrap_or(0);
    match kind {
        ResourceKind::Deployment => format!(
            "image {} and {size} replicas",
            spec.get("image").and_then(Value::as_str).unwrap_or("?")
        ),
        ResourceKind::CacheCluster => format!(
            "engine {} and {size} nodes",
            spec.get("engine").and_then(Value::as_str).unwrap_or("?")
        ),
        ResourceKind::ComputeInstance => format!(
            "{size} × {}",
            spec.get("instance_type").and_then(Value::as_str).unwrap_or("?")
        ),
    }
}
