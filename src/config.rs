use std::time::Duration;

use serde::Deserialize;
use smart_default::SmartDefault;

/// Lines scanned backwards from the cursor when binding a variable to a model.
pub const DEFAULT_LOOK_BACK: usize = 100;

/// Raw configuration as sent by the client, every section optional.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
	pub completions: Option<CompletionsConfig>,
	pub resolver: Option<ResolverConfig>,
	pub cache: Option<CacheConfig>,
	pub models: Option<ModelsConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionsConfig {
	pub limit: Option<u32>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResolverConfig {
	pub look_back: Option<u32>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
	pub ttl_ms: Option<u64>,
	pub capacity: Option<usize>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ModelsConfig {
	pub globs: Option<Vec<String>>,
}

/// [Config] with every default filled in.
#[derive(SmartDefault, Debug, Clone, PartialEq)]
pub struct Settings {
	#[default(500)]
	pub completions_limit: usize,
	#[default(DEFAULT_LOOK_BACK)]
	pub look_back: usize,
	#[default(Duration::from_millis(5000))]
	pub cache_ttl: Duration,
	#[default(1000)]
	pub cache_capacity: usize,
	#[default(_code = r#"vec!["**/models.py".to_string(), "**/models/*.py".to_string()]"#)]
	pub model_globs: Vec<String>,
}

impl Settings {
	pub fn merge(&mut self, config: &Config) {
		if let Some(limit) = config.completions.as_ref().and_then(|c| c.limit) {
			self.completions_limit = limit as usize;
		}
		if let Some(look_back) = config.resolver.as_ref().and_then(|r| r.look_back) {
			self.look_back = look_back as usize;
		}
		if let Some(cache) = &config.cache {
			if let Some(ttl) = cache.ttl_ms {
				self.cache_ttl = Duration::from_millis(ttl);
			}
			if let Some(capacity) = cache.capacity {
				self.cache_capacity = capacity;
			}
		}
		if let Some(globs) = config.models.as_ref().and_then(|m| m.globs.clone()) {
			self.model_globs = globs;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn test_merge_partial_config() {
		let config: Config = serde_json::from_value(serde_json::json!({
			"resolver": { "lookBack": 20 },
			"cache": { "ttlMs": 0 },
		}))
		.expect("config");
		let mut settings = Settings::default();
		settings.merge(&config);
		assert_eq!(settings.look_back, 20);
		assert_eq!(settings.cache_ttl, Duration::ZERO);
		assert_eq!(settings.completions_limit, 500);
		assert_eq!(settings.model_globs, ["**/models.py", "**/models/*.py"]);
	}
}
