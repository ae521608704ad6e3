//! Channel → personality resolution
//!
//! Resolution is a fixed priority chain, first match wins:
//! channel override, configured default, builtin `default`.

use super::types::*;
use crate::config::ChatGateConfig;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Loaded personalities plus the mutable channel bindings.
struct Bindings {
    /// Load order, builtin last when synthesized
    personalities: Vec<Arc<PersonalityConfig>>,
    index: HashMap<String, usize>,
    builtin: Arc<PersonalityConfig>,
    default_key: Option<String>,
    overrides: HashMap<String, String>,
}

impl Bindings {
    fn from_config(config: &ChatGateConfig) -> Self {
        let mut personalities: Vec<Arc<PersonalityConfig>> = config
            .personalities
            .iter()
            .cloned()
            .map(Arc::new)
            .collect();

        let builtin = match personalities
            .iter()
            .find(|p| p.key == BUILTIN_DEFAULT_KEY)
        {
            Some(configured) => configured.clone(),
            None => {
                let builtin = Arc::new(PersonalityConfig::builtin_default(
                    config.system_prompt.as_deref(),
                ));
                personalities.push(builtin.clone());
                builtin
            }
        };

        let index = personalities
            .iter()
            .enumerate()
            .map(|(i, p)| (p.key.clone(), i))
            .collect();

        Self {
            personalities,
            index,
            builtin,
            default_key: config.default_personality.clone(),
            overrides: config.channel_overrides.clone(),
        }
    }

    fn lookup(&self, key: &str) -> Option<Arc<PersonalityConfig>> {
        self.index.get(key).map(|&i| self.personalities[i].clone())
    }

    fn resolve(&self, channel_id: &str) -> ResolvedPersonality {
        let chain = [
            (
                self.overrides.get(channel_id),
                PersonalitySource::ChannelOverride,
            ),
            (self.default_key.as_ref(), PersonalitySource::ConfiguredDefault),
        ];

        chain
            .into_iter()
            .find_map(|(key, source)| {
                key.and_then(|k| self.lookup(k))
                    .map(|config| ResolvedPersonality { config, source })
            })
            .unwrap_or_else(|| ResolvedPersonality {
                config: self.builtin.clone(),
                source: PersonalitySource::Builtin,
            })
    }
}

/// Maps conversation channels to personalities.
pub struct PersonalityResolver {
    bindings: RwLock<Bindings>,
}

impl PersonalityResolver {
    /// Build a resolver from configuration.
    pub fn new(config: &ChatGateConfig) -> Self {
        let bindings = Bindings::from_config(config);
        tracing::info!(
            personalities = bindings.personalities.len(),
            overrides = bindings.overrides.len(),
            "Personalities loaded"
        );
        Self {
            bindings: RwLock::new(bindings),
        }
    }

    /// Resolve the active personality for a channel.
    pub async fn resolve(&self, channel_id: &str) -> ResolvedPersonality {
        self.bindings.read().await.resolve(channel_id)
    }

    /// Bind a channel to a personality.
    pub async fn set_override(
        &self,
        channel_id: &str,
        personality_key: &str,
    ) -> Result<Arc<PersonalityConfig>> {
        let mut bindings = self.bindings.write().await;
        let config = bindings
            .lookup(personality_key)
            .ok_or_else(|| Error::NotFound(format!("personality '{}'", personality_key)))?;

        bindings
            .overrides
            .insert(channel_id.to_string(), personality_key.to_string());
        tracing::info!(channel_id = %channel_id, key = %personality_key, "Personality override set");
        Ok(config)
    }

    /// Remove a channel's override. Returns whether one existed.
    pub async fn clear_override(&self, channel_id: &str) -> bool {
        self.bindings
            .write()
            .await
            .overrides
            .remove(channel_id)
            .is_some()
    }

    /// Get a personality by key.
    pub async fn get(&self, key: &str) -> Option<Arc<PersonalityConfig>> {
        self.bindings.read().await.lookup(key)
    }

    /// All personalities in load order.
    pub async fn list_all(&self) -> Vec<Arc<PersonalityConfig>> {
        self.bindings.read().await.personalities.clone()
    }

    /// Replace personalities and bindings with a freshly loaded config.
    ///
    /// Runtime overrides set since the previous load are discarded.
    pub async fn reload(&self, config: &ChatGateConfig) {
        let fresh = Bindings::from_config(config);
        let mut bindings = self.bindings.write().await;
        let dropped = bindings
            .overrides
            .iter()
            .filter(|(channel, key)| fresh.overrides.get(*channel) != Some(*key))
            .count();
        *bindings = fresh;
        tracing::info!(
            personalities = bindings.personalities.len(),
            discarded_overrides = dropped,
            "Personalities reloaded"
        );
    }
}
