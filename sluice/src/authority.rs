//! Origin-based authority rules: comma-separated white/black lists matched by
//! exact token equality.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::listen::ListenerSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityStrategy {
    /// Admit only listed origins.
    #[default]
    White,
    /// Reject listed origins.
    Black,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityRule {
    pub resource: String,
    /// Comma-separated origin names.
    pub limit_origin: String,
    pub strategy: AuthorityStrategy,
}

impl AuthorityRule {
    fn validate(&self) -> Result<(), RuleError> {
        if self.resource.is_empty() {
            return Err(RuleError::invalid("", "empty resource name"));
        }
        if self.limit_origin.is_empty() {
            return Err(RuleError::invalid(&self.resource, "empty origin list"));
        }
        Ok(())
    }

    /// Whether `origin` may pass this rule. Empty origins always pass;
    /// list membership is decided by whole-token comparison, never substring.
    pub fn permits(&self, origin: &str) -> bool {
        if origin.is_empty() {
            return true;
        }
        let contained = self.limit_origin.split(',').any(|app| app == origin);
        match self.strategy {
            AuthorityStrategy::White => contained,
            AuthorityStrategy::Black => !contained,
        }
    }
}

type AuthorityRuleMap = HashMap<Arc<str>, Vec<Arc<AuthorityRule>>>;

#[derive(Debug, Default)]
pub struct AuthorityRuleManager {
    rules: ArcSwap<AuthorityRuleMap>,
    listeners: ListenerSet<AuthorityRule>,
}

impl AuthorityRuleManager {
    pub(crate) fn load(&self, rules: Vec<AuthorityRule>) -> Result<(), RuleError> {
        let mut map: AuthorityRuleMap = HashMap::new();
        for rule in rules {
            rule.validate()?;
            let key: Arc<str> = Arc::from(rule.resource.as_str());
            map.entry(key).or_default().push(Arc::new(rule));
        }
        self.rules.store(Arc::new(map));
        self.listeners.notify(&self.rules());
        Ok(())
    }

    pub fn on_change(&self, listener: impl Fn(&[AuthorityRule]) + Send + Sync + 'static) {
        self.listeners.subscribe(listener);
    }

    pub(crate) fn rules_for(&self, resource: &str) -> Option<Vec<Arc<AuthorityRule>>> {
        self.rules.load().get(resource).cloned()
    }

    pub fn rules(&self) -> Vec<AuthorityRule> {
        self.rules
            .load()
            .values()
            .flatten()
            .map(|r| (**r).clone())
            .collect()
    }
}
