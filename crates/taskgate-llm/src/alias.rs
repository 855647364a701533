//! Semantic alias -> runtime group resolution.

use tracing::warn;

/// Runtime groups the proxy actually routes on.
const KNOWN_RUNTIME_GROUPS: [&str; 3] = ["cheap", "main", "fallback"];

/// Configuration for a single semantic alias.
#[derive(Debug, Clone)]
pub struct AliasConfig {
    /// Semantic name callers use (e.g. `planner`, `router`).
    pub name: &'static str,
    /// Short description of what the alias is for.
    pub description: &'static str,
    /// Runtime group (`cheap` / `main` / `fallback`) this alias resolves to.
    pub runtime_group: &'static str,
}

fn default_aliases() -> Vec<AliasConfig> {
    vec![
        AliasConfig {
            name: "router",
            description: "lightweight routing decisions",
            runtime_group: "cheap",
        },
        AliasConfig {
            name: "extractor",
            description: "lightweight information extraction",
            runtime_group: "cheap",
        },
        AliasConfig {
            name: "summarizer",
            description: "lightweight summarization",
            runtime_group: "cheap",
        },
        AliasConfig {
            name: "planner",
            description: "main reasoning and planning",
            runtime_group: "main",
        },
        AliasConfig {
            name: "executor",
            description: "main generation/execution",
            runtime_group: "main",
        },
        AliasConfig {
            name: "fallback",
            description: "degraded fallback path",
            runtime_group: "fallback",
        },
    ]
}

/// Resolves a caller-supplied semantic alias to the runtime group the
/// primary client should route on. Built once at startup and never mutated
/// afterward.
pub struct AliasRegistry {
    aliases: Vec<AliasConfig>,
}

impl AliasRegistry {
    /// Build the registry from the default alias table.
    pub fn new() -> Self {
        Self {
            aliases: default_aliases(),
        }
    }

    /// Build a registry from an explicit alias list, for tests or
    /// deployments that override the defaults.
    pub fn with_aliases(aliases: Vec<AliasConfig>) -> Self {
        Self { aliases }
    }

    /// Resolve `alias` to a runtime group.
    ///
    /// Known semantic aliases resolve to their configured group; an already
    /// runtime-group name passes through unchanged; anything else falls
    /// back to `main` with a warning.
    pub fn resolve(&self, alias: &str) -> String {
        if let Some(found) = self.aliases.iter().find(|a| a.name == alias) {
            return found.runtime_group.to_string();
        }
        if KNOWN_RUNTIME_GROUPS.contains(&alias) {
            return alias.to_string();
        }
        warn!(alias, "unknown_alias_fallback_to_main");
        "main".to_string()
    }

    /// Look up a single alias's configuration by name.
    pub fn get(&self, alias: &str) -> Option<&AliasConfig> {
        self.aliases.iter().find(|a| a.name == alias)
    }
}

impl Default for AliasRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_alias() {
        let registry = AliasRegistry::new();
        assert_eq!(registry.resolve("planner"), "main");
        assert_eq!(registry.resolve("router"), "cheap");
    }

    #[test]
    fn passes_through_runtime_group() {
        let registry = AliasRegistry::new();
        assert_eq!(registry.resolve("cheap"), "cheap");
    }

    #[test]
    fn unknown_alias_falls_back_to_main() {
        let registry = AliasRegistry::new();
        assert_eq!(registry.resolve("nonsense"), "main");
    }
}
