//! The `Environment` abstraction: lets `$VAR`-prefixed string fields in a `MappingConfig` be
//! resolved against the process environment (or a fake environment in tests) instead of
//! being baked into the configuration file verbatim.

use std::collections::BTreeMap;

/// A source of named string values. `ProcessEnvironment` reads `std::env`; tests use
/// `FixedEnvironment` so configuration-resolution tests don't depend on process state.
pub trait Environment: Send + Sync {
    fn read(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn read(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

#[derive(Debug, Default, Clone)]
pub struct FixedEnvironment(BTreeMap<String, String>);

impl FixedEnvironment {
    pub fn new() -> Self {
        FixedEnvironment(BTreeMap::new())
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }
}

impl Environment for FixedEnvironment {
    fn read(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }
}

/// Resolve a configuration string field: if it starts with `$`, look the remainder up in
/// `env`; otherwise return it unchanged. Mirrors the host codebase's `from_env_var` helper.
pub fn resolve(raw: &str, env: &dyn Environment) -> Option<String> {
    raw.strip_prefix('$')
        .map_or_else(|| Some(raw.to_string()), |var_name| env.read(var_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_dollar_prefixed_names() {
        let env = FixedEnvironment::new().with("DATABASE_URL", "postgres://localhost");
        assert_eq!(
            resolve("$DATABASE_URL", &env),
            Some("postgres://localhost".to_string())
        );
    }

    #[test]
    fn passes_through_plain_strings() {
        let env = FixedEnvironment::new();
        assert_eq!(resolve("movies", &env), Some("movies".to_string()));
    }

    #[test]
    fn missing_variable_resolves_to_none() {
        let env = FixedEnvironment::new();
        assert_eq!(resolve("$MISSING", &env), None);
    }
}
