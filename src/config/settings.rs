//! Deployment settings and the named-policy registry that turns them into a
//! [`TmConfig`].

use super::{ManagerHook, TmConfig};
use crate::core::{Result, TmError};
use crate::tm::gate::ActivateHook;
use crate::tm::veto::{CommitVeto, default_commit_veto};
use crate::transaction::TransactionManager;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::sync::Arc;

/// Prefix shared by every transaction setting in a flat key/value source.
pub const SETTINGS_PREFIX: &str = "tm.";

/// Parse a boolean setting.
///
/// Accepts `true/false`, `yes/no`, `on/off`, `y/n`, `t/f` and `1/0`,
/// ignoring case and surrounding whitespace.
pub fn as_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "y" | "t" | "1" => Ok(true),
        "false" | "no" | "off" | "n" | "f" | "0" => Ok(false),
        other => Err(TmError::Config(format!(
            "'{}' is not a recognized boolean",
            other
        ))),
    }
}

/// Unresolved transaction settings, as read from deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TmSettings {
    pub attempts: usize,
    pub commit_veto: Option<String>,
    pub activate_hook: Option<String>,
    #[serde(deserialize_with = "deserialize_flag")]
    pub annotate_user: bool,
    pub manager_hook: Option<String>,
}

impl Default for TmSettings {
    fn default() -> Self {
        Self {
            attempts: 1,
            commit_veto: None,
            activate_hook: None,
            annotate_user: true,
            manager_hook: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => as_bool(&text).map_err(serde::de::Error::custom),
    }
}

/// Empty names mean "not configured".
fn name(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl TmSettings {
    /// Read settings from flat `tm.*` pairs. Keys outside the `tm.` prefix
    /// belong to other components and are skipped.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = TmSettings::default();
        for (key, value) in pairs {
            let Some(key) = key.as_ref().strip_prefix(SETTINGS_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match key {
                "attempts" => {
                    settings.attempts = value.trim().parse().map_err(|_| {
                        TmError::Config(format!("tm.attempts: '{}' is not a count", value))
                    })?;
                }
                "commit_veto" => settings.commit_veto = name(value),
                "activate_hook" => settings.activate_hook = name(value),
                "annotate_user" => settings.annotate_user = as_bool(value)?,
                "manager_hook" => settings.manager_hook = name(value),
                other => {
                    return Err(TmError::Config(format!(
                        "unknown setting 'tm.{}'",
                        other
                    )));
                }
            }
        }
        Ok(settings)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TmError::Config(e.to_string()))
    }

    /// Resolve policy names against `registry` into a validated [`TmConfig`].
    pub fn resolve(
        &self,
        registry: &PolicyRegistry,
        manager: Arc<dyn TransactionManager>,
    ) -> Result<TmConfig> {
        let mut config = TmConfig::with_manager(manager)
            .max_attempts(self.attempts)
            .annotate_user(self.annotate_user);

        if let Some(name) = &self.commit_veto {
            config.commit_veto = Some(lookup(&registry.commit_vetoes, "commit_veto", name)?);
        }
        if let Some(name) = &self.activate_hook {
            config.activate_hook =
                Some(lookup(&registry.activate_hooks, "activate_hook", name)?);
        }
        if let Some(name) = &self.manager_hook {
            config.manager_hook = Some(lookup(&registry.manager_hooks, "manager_hook", name)?);
        }

        config.validate()?;
        Ok(config)
    }
}

fn lookup<T: ?Sized>(table: &HashMap<String, Arc<T>>, kind: &str, name: &str) -> Result<Arc<T>> {
    table
        .get(name)
        .cloned()
        .ok_or_else(|| TmError::Config(format!("tm.{}: no policy named '{}'", kind, name)))
}

/// Named policies available to [`TmSettings::resolve`].
pub struct PolicyRegistry {
    commit_vetoes: HashMap<String, Arc<dyn CommitVeto>>,
    activate_hooks: HashMap<String, Arc<dyn ActivateHook>>,
    manager_hooks: HashMap<String, Arc<dyn ManagerHook>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            commit_vetoes: HashMap::new(),
            activate_hooks: HashMap::new(),
            manager_hooks: HashMap::new(),
        };
        registry.register_commit_veto("default_commit_veto", default_commit_veto);
        registry
    }

    pub fn register_commit_veto(&mut self, name: impl Into<String>, veto: impl CommitVeto) -> &mut Self {
        self.commit_vetoes.insert(name.into(), Arc::new(veto));
        self
    }

    pub fn register_activate_hook(
        &mut self,
        name: impl Into<String>,
        hook: impl ActivateHook,
    ) -> &mut Self {
        self.activate_hooks.insert(name.into(), Arc::new(hook));
        self
    }

    pub fn register_manager_hook(
        &mut self,
        name: impl Into<String>,
        hook: impl ManagerHook,
    ) -> &mut Self {
        self.manager_hooks.insert(name.into(), Arc::new(hook));
        self
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::MemoryTransactionManager;
    use http::request::Parts;

    fn manager() -> Arc<dyn TransactionManager> {
        Arc::new(MemoryTransactionManager::new())
    }

    #[test]
    fn test_boolean_spellings() {
        for yes in ["true", "Yes", " on ", "y", "T", "1"] {
            assert!(as_bool(yes).unwrap(), "{yes}");
        }
        for no in ["false", "NO", "off", "n", "f", "0"] {
            assert!(!as_bool(no).unwrap(), "{no}");
        }
        assert!(matches!(as_bool("maybe"), Err(TmError::Config(_))));
    }

    #[test]
    fn test_from_pairs_reads_tm_keys_only() {
        let settings = TmSettings::from_pairs([
            ("tm.attempts", "3"),
            ("tm.commit_veto", "default_commit_veto"),
            ("tm.annotate_user", "off"),
            ("sqlalchemy.url", "sqlite://"),
        ])
        .unwrap();

        assert_eq!(settings.attempts, 3);
        assert_eq!(settings.commit_veto.as_deref(), Some("default_commit_veto"));
        assert!(!settings.annotate_user);
        assert_eq!(settings.activate_hook, None);
    }

    #[test]
    fn test_from_pairs_rejects_bad_values() {
        assert!(TmSettings::from_pairs([("tm.attempts", "many")]).is_err());
        assert!(TmSettings::from_pairs([("tm.annotate_user", "sometimes")]).is_err());
        assert!(TmSettings::from_pairs([("tm.retries", "2")]).is_err());
    }

    #[test]
    fn test_empty_policy_name_is_unset() {
        let settings = TmSettings::from_pairs([("tm.commit_veto", "  ")]).unwrap();
        assert_eq!(settings.commit_veto, None);
    }

    #[test]
    fn test_from_json_accepts_string_flags() {
        let settings =
            TmSettings::from_json(r#"{"attempts": 2, "annotate_user": "no"}"#).unwrap();
        assert_eq!(settings.attempts, 2);
        assert!(!settings.annotate_user);

        let settings = TmSettings::from_json("{}").unwrap();
        assert_eq!(settings, TmSettings::default());

        assert!(TmSettings::from_json(r#"{"attempt": 2}"#).is_err());
    }

    #[test]
    fn test_resolve_named_policies() {
        let mut registry = PolicyRegistry::new();
        registry.register_activate_hook("api_only", |request: &Parts| {
            request.uri.path().starts_with("/api")
        });

        let settings = TmSettings {
            attempts: 3,
            commit_veto: Some("default_commit_veto".into()),
            activate_hook: Some("api_only".into()),
            ..TmSettings::default()
        };
        let config = settings.resolve(&registry, manager()).unwrap();

        assert_eq!(config.max_attempts, 3);
        assert!(config.commit_veto.is_some());
        assert!(config.activate_hook.is_some());
        assert!(config.manager_hook.is_none());
    }

    #[test]
    fn test_resolve_fails_fast() {
        let registry = PolicyRegistry::new();

        let unknown = TmSettings {
            activate_hook: Some("nope".into()),
            ..TmSettings::default()
        };
        assert!(matches!(
            unknown.resolve(&registry, manager()),
            Err(TmError::Config(_))
        ));

        let zero = TmSettings {
            attempts: 0,
            ..TmSettings::default()
        };
        assert!(zero.resolve(&registry, manager()).is_err());
    }
}
