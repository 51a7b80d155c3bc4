//! Access control: path-prefix rules granting a role threshold and a permission level.
//!
//! A request path resolves to the most specific rule whose prefix it starts with (equal
//! prefixes: the earlier rule). This replaces first-match-wins on purpose: a narrow rule
//! such as `/api/db/user` applies even when a broad `/api/db/` rule was added before it,
//! so rule files need no particular order. No match yields a rule with
//! [`Permission::None`], which denies everything.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

/// Privilege tier of a requester, totally ordered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Everyone,
    User,
    Supervisor,
    Manager,
    SuperUser,
}

impl Role {
    /// Role for a stored numeric level; out-of-range levels clamp to the nearest tier.
    pub fn from_level(level: i64) -> Role {
        match level {
            i64::MIN..=0 => Role::Everyone,
            1 => Role::User,
            2 => Role::Supervisor,
            3 => Role::Manager,
            _ => Role::SuperUser,
        }
    }
}

/// What a rule lets its role do, totally ordered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    #[default]
    None,
    Denied,
    ReadOnly,
    ReadWrite,
    ReadWriteDelete,
    All,
}

/// Operation class of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Read,
    Write,
    Delete,
}

impl Verb {
    /// GET/HEAD read, POST/PUT/PATCH write, DELETE delete. Other methods carry no verb.
    pub fn from_method(method: &axum::http::Method) -> Option<Verb> {
        use axum::http::Method;
        match *method {
            Method::GET | Method::HEAD => Some(Verb::Read),
            Method::POST | Method::PUT | Method::PATCH => Some(Verb::Write),
            Method::DELETE => Some(Verb::Delete),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub path: String,
    pub role: Role,
    pub permission: Permission,
}

impl AccessRule {
    pub fn new(path: impl Into<String>, role: Role, permission: Permission) -> Self {
        AccessRule {
            path: path.into(),
            role,
            permission,
        }
    }

    /// Sentinel returned when no rule matches.
    pub fn deny_all(path: &str) -> Self {
        AccessRule::new(path, Role::Everyone, Permission::None)
    }

    /// Reads need `role >= rule.role`.
    pub fn allows_read(&self, role: Role) -> bool {
        self.permission != Permission::None && role >= self.role
    }

    /// Writes need a higher role, or the same role with at least read-write.
    pub fn allows_write(&self, role: Role) -> bool {
        self.permission != Permission::None
            && (role > self.role || (role == self.role && self.permission >= Permission::ReadWrite))
    }

    /// Deletes need a higher role, or the same role with at least read-write-delete.
    pub fn allows_delete(&self, role: Role) -> bool {
        self.permission != Permission::None
            && (role > self.role
                || (role == self.role && self.permission >= Permission::ReadWriteDelete))
    }

    pub fn allows(&self, verb: Verb, role: Role) -> bool {
        match verb {
            Verb::Read => self.allows_read(role),
            Verb::Write => self.allows_write(role),
            Verb::Delete => self.allows_delete(role),
        }
    }
}

/// Ordered rule table, filled at boot.
#[derive(Debug, Default)]
pub struct AccessManager {
    rules: RwLock<Vec<AccessRule>>,
}

impl AccessManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<AccessRule>) -> Self {
        AccessManager {
            rules: RwLock::new(rules),
        }
    }

    pub fn add_rule(&self, rule: AccessRule) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rule);
    }

    pub fn add_rules(&self, rules: impl IntoIterator<Item = AccessRule>) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(rules);
    }

    pub fn rules(&self) -> Vec<AccessRule> {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Rule with the longest prefix of `path`; the earliest wins between equal prefixes.
    pub fn find(&self, path: &str) -> AccessRule {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let mut best: Option<&AccessRule> = None;
        for rule in rules.iter().filter(|r| path.starts_with(r.path.as_str())) {
            if best.map(|b| rule.path.len() > b.path.len()).unwrap_or(true) {
                best = Some(rule);
            }
        }
        best.cloned().unwrap_or_else(|| AccessRule::deny_all(path))
    }

    pub fn has_read_access(&self, path: &str, role: Role) -> bool {
        self.find(path).allows_read(role)
    }

    pub fn has_write_access(&self, path: &str, role: Role) -> bool {
        self.find(path).allows_write(role)
    }

    pub fn has_delete_access(&self, path: &str, role: Role) -> bool {
        self.find(path).allows_delete(role)
    }

    /// Gate one request. Methods without a verb pass once a rule matches.
    pub fn authorize(&self, path: &str, verb: Option<Verb>, role: Role) -> Result<AccessRule, EngineError> {
        let rule = self.find(path);
        if rule.permission == Permission::None {
            tracing::warn!(path, "no access rule matches");
            return Err(EngineError::AccessDenied(path.to_string()));
        }
        if let Some(verb) = verb {
            if !rule.allows(verb, role) {
                tracing::warn!(path, ?verb, ?role, rule = %rule.path, "access denied");
                return Err(EngineError::AccessDenied(path.to_string()));
            }
        }
        Ok(rule)
    }
}
