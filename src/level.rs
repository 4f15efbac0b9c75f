//! Ordered severity levels and the process-wide level registry.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;

/// A named severity with a numeric priority in `[0, 99]`; higher is more
/// severe. Cloning a `Level` is cheap (name is `Arc`-free `String` clone is
/// avoided by keeping `Level` itself `Copy`-free but small).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Level {
    name: String,
    priority: u8,
}

impl Level {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Level {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority.cmp(&other.priority)
    }
}

pub const TRACE: &str = "TRACE";
pub const DEBUG: &str = "DEBUG";
pub const INFO: &str = "INFO";
pub const WARNING: &str = "WARNING";
pub const ERROR: &str = "ERROR";
pub const CRITICAL: &str = "CRITICAL";
pub const AUDIT: &str = "AUDIT";
pub const SECURITY: &str = "SECURITY";

fn standard_levels() -> Vec<(&'static str, u8)> {
    vec![
        (TRACE, 5),
        (DEBUG, 10),
        (INFO, 20),
        (WARNING, 30),
        (ERROR, 40),
        (CRITICAL, 50),
        (AUDIT, 60),
        (SECURITY, 70),
    ]
}

fn default_protected() -> Vec<&'static str> {
    vec![ERROR, CRITICAL, AUDIT, SECURITY]
}

/// Process-wide registry of known levels. Frozen after the first `Logger`
/// is constructed; registration attempts after freeze fail rather than
/// panic.
pub struct LevelRegistry {
    inner: RwLock<Inner>,
}

struct Inner {
    by_name: HashMap<String, Level>,
    protected: std::collections::HashSet<String>,
    frozen: bool,
}

/// Error returned by a registry mutation attempted after freeze, or with a
/// conflicting priority for an existing name.
#[derive(Debug, thiserror::Error)]
pub enum LevelRegistryError {
    #[error("level registry is frozen; cannot register level {0:?}")]
    Frozen(String),
    #[error("priority {given} out of range [0, 99] for level {name:?}")]
    PriorityOutOfRange { name: String, given: u16 },
    #[error("level {name:?} already registered with priority {existing}, cannot re-register with {given}")]
    Conflict {
        name: String,
        existing: u8,
        given: u8,
    },
}

impl LevelRegistry {
    fn new() -> Self {
        let mut by_name = HashMap::new();
        for (name, priority) in standard_levels() {
            by_name.insert(
                name.to_string(),
                Level {
                    name: name.to_string(),
                    priority,
                },
            );
        }
        let protected = default_protected().into_iter().map(String::from).collect();
        LevelRegistry {
            inner: RwLock::new(Inner {
                by_name,
                protected,
                frozen: false,
            }),
        }
    }

    /// Registers a custom level with `priority in [0, 99]`. Idempotent if
    /// called again with an identical priority before freeze.
    pub fn register(&self, name: &str, priority: u16) -> Result<Level, LevelRegistryError> {
        if priority > 99 {
            return Err(LevelRegistryError::PriorityOutOfRange {
                name: name.to_string(),
                given: priority,
            });
        }
        let priority = priority as u8;
        let mut inner = self.inner.write().expect("level registry lock poisoned");
        if let Some(existing) = inner.by_name.get(name) {
            if existing.priority == priority {
                return Ok(existing.clone());
            }
            return Err(LevelRegistryError::Conflict {
                name: name.to_string(),
                existing: existing.priority,
                given: priority,
            });
        }
        if inner.frozen {
            return Err(LevelRegistryError::Frozen(name.to_string()));
        }
        let level = Level {
            name: name.to_string(),
            priority,
        };
        inner.by_name.insert(name.to_string(), level.clone());
        Ok(level)
    }

    /// Freezes the registry; called on first `Logger` construction.
    pub fn freeze(&self) {
        self.inner.write().expect("level registry lock poisoned").frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.read().expect("level registry lock poisoned").frozen
    }

    pub fn get(&self, name: &str) -> Option<Level> {
        self.inner
            .read()
            .expect("level registry lock poisoned")
            .by_name
            .get(name)
            .cloned()
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.inner
            .read()
            .expect("level registry lock poisoned")
            .protected
            .contains(name)
    }

    /// Overrides the protected set; must be called before freeze in
    /// practice (builders call this during construction).
    pub fn set_protected<I: IntoIterator<Item = String>>(&self, names: I) {
        let mut inner = self.inner.write().expect("level registry lock poisoned");
        inner.protected = names.into_iter().collect();
    }
}

/// The process-wide singleton.
pub static LEVEL_REGISTRY: Lazy<LevelRegistry> = Lazy::new(LevelRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_levels_are_ordered_by_priority() {
        let info = LEVEL_REGISTRY.get(INFO).unwrap();
        let error = LEVEL_REGISTRY.get(ERROR).unwrap();
        assert!(info < error);
    }

    #[test]
    fn default_protected_levels_match_spec() {
        assert!(LEVEL_REGISTRY.is_protected(ERROR));
        assert!(LEVEL_REGISTRY.is_protected(CRITICAL));
        assert!(LEVEL_REGISTRY.is_protected(AUDIT));
        assert!(LEVEL_REGISTRY.is_protected(SECURITY));
        assert!(!LEVEL_REGISTRY.is_protected(INFO));
    }

    #[test]
    fn register_rejects_priority_over_99() {
        let registry = LevelRegistry::new();
        let err = registry.register("TOO_HIGH", 100).unwrap_err();
        assert!(matches!(err, LevelRegistryError::PriorityOutOfRange { .. }));
    }

    #[test]
    fn register_is_idempotent_with_identical_priority() {
        let registry = LevelRegistry::new();
        registry.register("NOTICE", 25).unwrap();
        let again = registry.register("NOTICE", 25).unwrap();
        assert_eq!(again.priority(), 25);
    }

    #[test]
    fn register_rejects_conflicting_priority_for_same_name() {
        let registry = LevelRegistry::new();
        registry.register("NOTICE", 25).unwrap();
        let err = registry.register("NOTICE", 26).unwrap_err();
        assert!(matches!(err, LevelRegistryError::Conflict { .. }));
    }

    #[test]
    fn register_fails_after_freeze_for_new_name() {
        let registry = LevelRegistry::new();
        registry.freeze();
        let err = registry.register("NOTICE", 25).unwrap_err();
        assert!(matches!(err, LevelRegistryError::Frozen(_)));
    }
}
