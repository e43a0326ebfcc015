use std::time::Duration;

/// Choice engine settings. Defaults can be overridden from the environment:
///
/// - `KINSPECT_CHOICE_IDLE_MS`: idle period before the cache is cleared (default 180000)
/// - `KINSPECT_CACHE_DISABLED`: `1`/`true` turns caching off for every round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceConfig {
    pub idle_eviction: Duration,
    pub cache_disabled: bool,
}

impl Default for ChoiceConfig {
    fn default() -> Self {
        Self { idle_eviction: Duration::from_millis(180_000), cache_disabled: false }
    }
}

impl ChoiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let idle_eviction = std::env::var("KINSPECT_CHOICE_IDLE_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.idle_eviction);
        let cache_disabled = std::env::var("KINSPECT_CACHE_DISABLED")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self { idle_eviction, cache_disabled }
    }

    pub fn with_idle_eviction(mut self, d: Duration) -> Self {
        self.idle_eviction = d;
        self
    }

    pub fn with_cache_disabled(mut self, disabled: bool) -> Self {
        self.cache_disabled = disabled;
        self
    }
}
