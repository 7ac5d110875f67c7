//! Ordered route table.
//!
//! Rules are evaluated top to bottom and the first match wins, so more
//! specific patterns must be declared before general ones. Patterns are
//! globs over the request path: `*` matches one segment, `**` any number of
//! segments, and `{name}` is shorthand for `*` that documents what the
//! segment holds.
//!
//! Public routes are declared explicitly with [`Access::Public`]. A request
//! that matches no rule is a gap in the table; by default it is denied.

use serde::{Deserialize, Serialize};

use crate::permission::Requirement;

/// What a matched route demands of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// No session required.
    Public,
    /// An authenticated caller whose permissions satisfy the requirement.
    Protected(Requirement),
}

/// One entry in the route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteRule {
    /// The pattern as written, for logs.
    pub pattern: String,
    /// The pattern with `{name}` segments rewritten to `*`.
    #[serde(skip)]
    glob: String,
    /// Upper-case HTTP methods this rule applies to. Empty means all.
    pub methods: Vec<String>,
    pub access: Access,
}

impl RouteRule {
    fn new(pattern: &str, access: Access) -> Self {
        Self {
            pattern: pattern.to_owned(),
            glob: compile_pattern(pattern),
            methods: Vec::new(),
            access,
        }
    }

    /// A route anyone may reach.
    #[must_use]
    pub fn public(pattern: &str) -> Self {
        Self::new(pattern, Access::Public)
    }

    /// A route requiring an authenticated caller satisfying `requirement`.
    #[must_use]
    pub fn protected(pattern: &str, requirement: Requirement) -> Self {
        Self::new(pattern, Access::Protected(requirement))
    }

    /// Restrict the rule to the given HTTP methods.
    #[must_use]
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.methods = methods
            .into_iter()
            .map(|m| m.as_ref().to_ascii_uppercase())
            .collect();
        self
    }

    /// Whether this rule applies to `method` on `path`.
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> bool {
        let method_ok = self.methods.is_empty()
            || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method));
        method_ok && glob_match::glob_match(&self.glob, normalize(path))
    }
}

/// Rewrite `{name}` segments to `*`.
fn compile_pattern(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| {
            if segment.starts_with('{') && segment.ends_with('}') {
                "*"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Strip a single trailing slash so `/acme/` matches `/{tenant}`.
fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

/// What to do with requests no rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedRoutes {
    /// Deny and log the gap.
    #[default]
    Deny,
    /// Allow any authenticated caller. Opt-in only.
    Allow,
}

impl std::str::FromStr for UnmatchedRoutes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deny" => Ok(Self::Deny),
            "allow" => Ok(Self::Allow),
            other => Err(format!("unknown unmatched-route policy: {other}")),
        }
    }
}

/// The ordered list of route rules.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
    unmatched: UnmatchedRoutes,
}

impl RouteTable {
    #[must_use]
    pub fn new(unmatched: UnmatchedRoutes) -> Self {
        Self {
            rules: Vec::new(),
            unmatched,
        }
    }

    /// Append a rule. Later rules only apply when no earlier rule matched.
    #[must_use]
    pub fn rule(mut self, rule: RouteRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// First rule matching `method` on `path`.
    #[must_use]
    pub fn find(&self, method: &str, path: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|r| r.matches(method, path))
    }

    #[must_use]
    pub const fn unmatched(&self) -> UnmatchedRoutes {
        self.unmatched
    }

    #[must_use]
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Leading path segments owned by public routes.
    ///
    /// A path starting with one of these never carries a tenant slug, which
    /// also keeps tenants from registering a slug like `health`.
    #[must_use]
    pub fn reserved_prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self
            .rules
            .iter()
            .filter(|r| r.access == Access::Public)
            .filter_map(|r| r.pattern.trim_start_matches('/').split('/').next())
            .filter(|segment| {
                !segment.is_empty() && !segment.contains(['{', '*', '?', '['])
            })
            .map(str::to_owned)
            .collect();
        prefixes.sort();
        prefixes.dedup();
        prefixes
    }
}
