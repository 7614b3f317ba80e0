//! Rule-based classifier: ordered pattern rules with static weights.
//!
//! The first rule whose matcher hits wins, in declaration order. Confidence
//! is the rule's weight; it says how much the rule trusts its own extraction,
//! not how ambiguous the text is.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use sf_protocol::{Command, CommandKind, CommandParams, ResourceKind};

use super::IntentClassifier;

const TIER: &str = "rules";

// ── Matchers ────────────────────────────────────────────────────

static SCALE_WITH_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:scale|resize)\b.*(?:\bto\s+\d+\b|\b\d+\s*(?:replicas?|nodes?|instances?|pods?|copies)\b)",
    )
    .unwrap()
});

static SCALE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(?:scale|resize)\b").unwrap());

static DELETE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:delete|remove|destroy|decommission|terminate|tear\s+down)\b").unwrap()
});

// Word-bounded: "deployment" does not contain the verb "deploy".
static CREATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:create|deploy|provision|launch|spin\s+up)\b").unwrap()
});

static QUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:status|show|list|health|cost|costs)\b").unwrap());

// ── Extractors ──────────────────────────────────────────────────

static SCALE_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:scale|resize)\s+(?:up\s+|down\s+)?(?:the\s+)?(?:(deployment|service|cluster|cache|instance)s?\s+)?([a-z0-9][a-z0-9._-]*)",
    )
    .unwrap()
});

static DELETE_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:delete|remove|destroy|decommission|terminate|tear\s+down)\s+(?:the\s+)?(?:(deployment|service|cluster|cache|instance)s?\s+)?([a-z0-9][a-z0-9._-]*)",
    )
    .unwrap()
});

static QUERY_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:status|health|cost|costs)\s+(?:of|for)\s+(?:the\s+)?([a-z0-9][a-z0-9._-]*)")
        .unwrap()
});

static CREATE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:create|deploy|provision|launch|spin\s+up)\s+(?:(?:a|an|the|new)\s+)*(?:(?:deployment|app|service)\s+(?:of\s+)?)?([a-z][a-z0-9._-]*)",
    )
    .unwrap()
});

static SIZE_TO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bto\s+(\d+)\b").unwrap());

static SIZE_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+)\s*(?:replicas?|nodes?|instances?|pods?|copies|vms?|servers?)\b").unwrap()
});

static DIRECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:scale|resize)\s+(up|down)\b").unwrap());

static SCOPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:namespace|region|ns)\s+([a-z0-9][a-z0-9-]*)").unwrap()
});

static NAMED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:named|called)\s+([a-z0-9][a-z0-9._-]*)").unwrap());

static IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([a-z0-9][a-z0-9./_-]*:[a-z0-9][a-z0-9._-]*)").unwrap()
});

static ENGINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(redis|memcached)\b").unwrap());

static INSTANCE_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([a-z][0-9][a-z]?\.(?:nano|micro|small|medium|large|[0-9]*xlarge))\b").unwrap()
});

static CACHE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:caches?|clusters?|redis|memcached)\b").unwrap());

static INSTANCE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:instances?|vms?|ec2|servers?|machines?)\b").unwrap()
});

static DEPLOYMENT_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:deployments?|apps?|services?|pods?)\b").unwrap());

/// Words that follow a verb but never name a resource.
const NOT_A_NAME: &[&str] = &[
    "a", "an", "the", "to", "up", "down", "by", "it", "all", "everything", "new", "deployment",
    "deployments", "app", "service", "cache", "cluster", "instance", "instances", "resource",
];

/// One classification rule.
struct Rule {
    name: &'static str,
    kind: CommandKind,
    weight: f64,
    matcher: &'static LazyLock<Regex>,
    extract: fn(&str) -> CommandParams,
}

/// Pattern-matching classifier. Deterministic and side-effect free.
pub struct RuleClassifier {
    rules: Vec<Rule>,
}

impl RuleClassifier {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Rule {
                    name: "scale_exact",
                    kind: CommandKind::ScaleResource,
                    weight: 0.92,
                    matcher: &SCALE_WITH_SIZE,
                    extract: extract_scale,
                },
                Rule {
                    name: "scale_relative",
                    kind: CommandKind::ScaleResource,
                    weight: 0.45,
                    matcher: &SCALE,
                    extract: extract_scale,
                },
                Rule {
                    name: "delete",
                    kind: CommandKind::DeleteResource,
                    weight: 0.90,
                    matcher: &DELETE,
                    extract: extract_delete,
                },
                Rule {
                    name: "create",
                    kind: CommandKind::CreateResource,
                    weight: 0.90,
                    matcher: &CREATE,
                    extract: extract_create,
                },
                Rule {
                    name: "query",
                    kind: CommandKind::QueryStatus,
                    weight: 0.85,
                    matcher: &QUERY,
                    extract: extract_query,
                },
            ],
        }
    }

    /// Rule names in evaluation order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Classify text synchronously.
    pub fn classify_text(&self, text: &str) -> Command {
        let lower = text.trim().to_lowercase();
        if lower.is_empty() {
            return Command::unrecognized(text, TIER);
        }

        for rule in &self.rules {
            if rule.matcher.is_match(&lower) {
                tracing::debug!(rule = rule.name, kind = rule.kind.as_str(), "rule matched");
                return Command::new(rule.kind, text, (rule.extract)(&lower), rule.weight, TIER);
            }
        }
        Command::unrecognized(text, TIER)
    }
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntentClassifier for RuleClassifier {
    async fn classify(&self, text: &str) -> Command {
        self.classify_text(text)
    }

    fn tier_name(&self) -> &str {
        TIER
    }
}

// ── Extraction helpers ─────────────────────────────────────────

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)?.get(1).map(|m| m.as_str())
}

fn capture_number(re: &Regex, text: &str) -> Option<u64> {
    capture(re, text)?.parse().ok()
}

fn is_name(word: &str) -> bool {
    !NOT_A_NAME.contains(&word)
}

fn kind_from_noun(noun: &str) -> Option<ResourceKind> {
    match noun {
        "deployment" | "service" => Some(ResourceKind::Deployment),
        "cluster" | "cache" => Some(ResourceKind::CacheCluster),
        "instance" => Some(ResourceKind::ComputeInstance),
        _ => None,
    }
}

/// Resource kind the text talks about, if it names one.
fn mentioned_kind(text: &str) -> Option<ResourceKind> {
    if CACHE_WORD.is_match(text) {
        Some(ResourceKind::CacheCluster)
    } else if INSTANCE_WORD.is_match(text) {
        Some(ResourceKind::ComputeInstance)
    } else if DEPLOYMENT_WORD.is_match(text) {
        Some(ResourceKind::Deployment)
    } else {
        None
    }
}

/// Target name plus the kind noun in front of it ("scale deployment web").
fn target_with_kind(re: &Regex, text: &str, params: &mut CommandParams) {
    let Some(caps) = re.captures(text) else {
        return;
    };
    if let Some(kind) = caps.get(1).and_then(|m| kind_from_noun(m.as_str())) {
        params.insert("kind".into(), json!(kind.as_str()));
    }
    if let Some(target) = caps.get(2).map(|m| m.as_str()).filter(|t| is_name(t)) {
        params.insert("target".into(), json!(target));
    }
}

fn insert_scope(text: &str, params: &mut CommandParams) {
    if let Some(scope) = capture(&SCOPE, text) {
        params.insert("scope".into(), json!(scope));
    }
}

fn extract_scale(text: &str) -> CommandParams {
    let mut params = CommandParams::new();
    target_with_kind(&SCALE_TARGET, text, &mut params);
    if let Some(size) = capture_number(&SIZE_TO, text).or_else(|| capture_number(&SIZE_UNIT, text)) {
        params.insert("replicas".into(), json!(size));
    }
    if let Some(direction) = capture(&DIRECTION, text) {
        params.insert("direction".into(), json!(direction));
    }
    insert_scope(text, &mut params);
    params
}

fn extract_delete(text: &str) -> CommandParams {
    let mut params = CommandParams::new();
    target_with_kind(&DELETE_TARGET, text, &mut params);
    insert_scope(text, &mut params);
    params
}

fn extract_create(text: &str) -> CommandParams {
    let mut params = CommandParams::new();
    let named = capture(&NAMED, text);
    let size = capture_number(&SIZE_UNIT, text);

    let kind = if let Some(engine) = capture(&ENGINE, text) {
        params.insert("engine".into(), json!(engine));
        let name = named.map_or_else(|| format!("{engine}-cache"), str::to_string);
        params.insert("name".into(), json!(name));
        ResourceKind::CacheCluster
    } else if CACHE_WORD.is_match(text) {
        if let Some(name) = named {
            params.insert("name".into(), json!(name));
        }
        ResourceKind::CacheCluster
    } else if INSTANCE_WORD.is_match(text) {
        if let Some(instance_type) = capture(&INSTANCE_TYPE, text) {
            params.insert("instance_type".into(), json!(instance_type));
        }
        if let Some(name) = named {
            params.insert("name".into(), json!(name));
        }
        ResourceKind::ComputeInstance
    } else {
        let image = capture(&IMAGE, text);
        if let Some(image) = image {
            params.insert("image".into(), json!(image));
        }
        let from_image = image
            .and_then(|i| i.split(':').next())
            .and_then(|repo| repo.rsplit('/').next());
        let from_verb = capture(&CREATE_NAME, text).filter(|n| is_name(n));
        if let Some(name) = named.or(from_image).or(from_verb) {
            params.insert("name".into(), json!(name));
        }
        ResourceKind::Deployment
    };

    params.insert("kind".into(), json!(kind.as_str()));
    if let Some(size) = size {
        params.insert(kind.scale_field().into(), json!(size));
    }
    insert_scope(text, &mut params);
    params
}

fn extract_query(text: &str) -> CommandParams {
    let mut params = CommandParams::new();
    if let Some(target) = capture(&QUERY_TARGET, text).filter(|t| is_name(t)) {
        params.insert("target".into(), json!(target));
    }
    if let Some(kind) = mentioned_kind(text) {
        params.insert("kind".into(), json!(kind.as_str()));
    }
    let topic = if text.contains("cost") {
        "cost"
    } else if text.contains("health") {
        "health"
    } else {
        "status"
    };
    params.insert("topic".into(), json!(topic));
    insert_scope(text, &mut params);
    params
}
