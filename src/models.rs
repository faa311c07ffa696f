//! Model allow-list, name resolution, and region selection.
//!
//! Inbound model names may carry a trailing `-YYYYMMDD` date stamp. The
//! allow-list is keyed by the base family name with the stamp removed, and
//! the backend separates its own versions with `@` instead of `-`, so
//! `claude-3-sonnet-20240229` resolves to family `claude-3-sonnet` and
//! backend string `claude-3-sonnet@20240229`.

use std::collections::HashMap;
use std::sync::OnceLock;

use rand::seq::SliceRandom;
use regex::Regex;
use serde::Deserialize;

use crate::error::RelayError;

/// Routing entry for one model family.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelRoute {
    /// Latest backend version string, kept for operator reference.
    pub version: String,
    /// Candidate regions hosting this family. Regional quotas are separate,
    /// so more regions means more combined headroom.
    pub locations: Vec<String>,
}

/// Allow-list of model families, keyed by base name.
#[derive(Debug, Clone)]
pub struct ModelTable {
    routes: HashMap<String, ModelRoute>,
}

/// Outcome of resolving an inbound model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// Base family name used for allow-list and location lookups.
    pub base: String,
    /// Model string sent to the backend.
    pub backend_model: String,
}

fn date_stamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-(\d{8})$").unwrap())
}

impl ModelTable {
    pub fn from_map(routes: HashMap<String, ModelRoute>) -> Self {
        Self { routes }
    }

    /// Built-in allow-list used when configuration supplies none.
    pub fn default_routes() -> Self {
        let mut routes = HashMap::new();
        routes.insert(
            "claude-3-sonnet".to_string(),
            ModelRoute {
                version: "claude-3-sonnet@20240229".to_string(),
                locations: vec![
                    "asia-southeast1".to_string(),
                    "us-central1".to_string(),
                    "us-east5".to_string(),
                ],
            },
        );
        routes.insert(
            "claude-3-5-sonnet".to_string(),
            ModelRoute {
                version: "claude-3-5-sonnet@20240620".to_string(),
                locations: vec!["us-east5".to_string(), "europe-west1".to_string()],
            },
        );
        routes.insert(
            "claude-3-opus".to_string(),
            ModelRoute {
                version: "claude-3-opus@20240229".to_string(),
                locations: vec!["us-east5".to_string()],
            },
        );
        routes.insert(
            "claude-3-haiku".to_string(),
            ModelRoute {
                version: "claude-3-haiku@20240307".to_string(),
                locations: vec![
                    "europe-west1".to_string(),
                    "europe-west4".to_string(),
                    "us-central1".to_string(),
                    "us-east5".to_string(),
                ],
            },
        );
        routes.insert(
            "meta/llama3-405b-instruct-maas".to_string(),
            ModelRoute {
                version: "meta/llama3-405b-instruct-maas".to_string(),
                locations: vec!["us-central1".to_string()],
            },
        );
        Self { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve an inbound model name against the allow-list.
    ///
    /// A name whose base family is not listed is rejected here, before any
    /// account selection or network traffic happens.
    pub fn resolve(&self, requested: &str) -> Result<ResolvedModel, RelayError> {
        let (base, backend_model) = match date_stamp_re().captures(requested) {
            Some(caps) => {
                let stamp = &caps[1];
                let base = requested[..requested.len() - stamp.len() - 1].to_string();
                let backend_model = format!("{}@{}", base, stamp);
                (base, backend_model)
            }
            None => (requested.to_string(), requested.to_string()),
        };

        if !self.routes.contains_key(&base) {
            return Err(RelayError::InvalidModel(requested.to_string()));
        }

        Ok(ResolvedModel {
            base,
            backend_model,
        })
    }

    /// Pick a serving region for a resolved family uniformly at random.
    pub fn choose_location(&self, base: &str) -> Result<String, RelayError> {
        let route = self
            .routes
            .get(base)
            .ok_or_else(|| RelayError::InvalidModel(base.to_string()))?;
        route
            .locations
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| RelayError::InvalidModel(base.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_with_date_stamp() {
        let table = ModelTable::default_routes();
        let resolved = table.resolve("claude-3-sonnet-20240229").unwrap();
        assert_eq!(resolved.base, "claude-3-sonnet");
        assert_eq!(resolved.backend_model, "claude-3-sonnet@20240229");
    }

    #[test]
    fn test_resolve_without_date_stamp() {
        let table = ModelTable::default_routes();
        let resolved = table.resolve("claude-3-haiku").unwrap();
        assert_eq!(resolved.base, "claude-3-haiku");
        assert_eq!(resolved.backend_model, "claude-3-haiku");
    }

    #[test]
    fn test_resolve_meta_family() {
        let table = ModelTable::default_routes();
        let resolved = table.resolve("meta/llama3-405b-instruct-maas").unwrap();
        assert_eq!(resolved.backend_model, "meta/llama3-405b-instruct-maas");
    }

    #[test]
    fn test_resolve_rejects_unknown_model() {
        let table = ModelTable::default_routes();
        let err = table.resolve("unknown-model").unwrap_err();
        assert!(matches!(err, RelayError::InvalidModel(_)));
    }

    #[test]
    fn test_resolve_rejects_unknown_base_with_stamp() {
        let table = ModelTable::default_routes();
        let err = table.resolve("mystery-model-20240101").unwrap_err();
        assert!(matches!(err, RelayError::InvalidModel(_)));
    }

    #[test]
    fn test_short_digit_runs_are_not_stamps() {
        let table = ModelTable::from_map(HashMap::from([(
            "llama-3".to_string(),
            ModelRoute {
                version: "llama-3".to_string(),
                locations: vec!["us-central1".to_string()],
            },
        )]));
        let resolved = table.resolve("llama-3").unwrap();
        assert_eq!(resolved.base, "llama-3");
        assert_eq!(resolved.backend_model, "llama-3");
    }

    #[test]
    fn test_choose_location_single_candidate() {
        let table = ModelTable::default_routes();
        assert_eq!(table.choose_location("claude-3-opus").unwrap(), "us-east5");
    }

    #[test]
    fn test_choose_location_stays_in_candidate_set() {
        let table = ModelTable::default_routes();
        let candidates = ["europe-west1", "europe-west4", "us-central1", "us-east5"];
        for _ in 0..32 {
            let location = table.choose_location("claude-3-haiku").unwrap();
            assert!(candidates.contains(&location.as_str()));
        }
    }

    #[test]
    fn test_choose_location_unknown_family() {
        let table = ModelTable::default_routes();
        assert!(matches!(
            table.choose_location("nope"),
            Err(RelayError::InvalidModel(_))
        ));
    }
}
