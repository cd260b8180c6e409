//! Harvester node configuration.
//!
//! A [`HarvesterConfig`] is an immutable, validated snapshot. Edits go through
//! a [`HarvesterDraft`], which is a plain mutable copy. A draft only becomes a
//! config through [`HarvesterDraft::validate`], so a half-edited configuration
//! can never reach a running harvest.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

// =============================================================================
// Query Scope
// =============================================================================

/// Which records a remote catalog is asked to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryScope {
    /// Only records natively held by the remote catalog.
    #[default]
    Local,
    /// Also records the remote catalog harvested from further catalogs.
    Hierarchy,
}

impl QueryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryScope::Local => "local",
            QueryScope::Hierarchy => "hierarchy",
        }
    }
}

impl fmt::Display for QueryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueryScope {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "hierarchy" => Ok(Self::Hierarchy),
            _ => Err(AppError::ConfigValidation(format!(
                "Unknown query scope: '{}'. Valid options: local, hierarchy",
                s
            ))),
        }
    }
}

// =============================================================================
// Search Criteria
// =============================================================================

/// One saved search against a remote catalog.
///
/// All set fields are combined with AND. A criteria value with every field
/// unset matches the whole catalog. Unknown keys are rejected when the value
/// is deserialized from a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        rename = "abstract",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Smallest accepted scale denominator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_scale: Option<u64>,
    /// Largest accepted scale denominator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scale: Option<u64>,
}

impl SearchCriteria {
    /// Criteria matching on free text only.
    pub fn free_text(text: impl Into<String>) -> Self {
        Self {
            free_text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Returns true if no filter is set.
    pub fn is_unrestricted(&self) -> bool {
        self.text_filters().next().is_none()
            && self.min_scale.is_none()
            && self.max_scale.is_none()
    }

    /// Non-empty text filters as `(queryable, value)` pairs, in a stable order.
    pub fn text_filters(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("AnyText", self.free_text.as_deref()),
            ("Title", self.title.as_deref()),
            ("Abstract", self.abstract_text.as_deref()),
            ("Subject", self.subject.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (name, v))
        })
    }

    fn validate(&self, position: usize) -> Result<(), AppError> {
        match (self.min_scale, self.max_scale) {
            (Some(min), Some(max)) if min > max => Err(AppError::ConfigValidation(format!(
                "search #{}: min_scale ({}) is greater than max_scale ({})",
                position + 1,
                min,
                max
            ))),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Harvester Config
// =============================================================================

/// Immutable, validated configuration of one harvester node.
///
/// Shared between the config store and running harvests as
/// `Arc<HarvesterConfig>`. It is replaced wholesale on update, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvesterConfig {
    /// Node identity, assigned by whoever registers the node.
    pub id: String,
    /// Provenance identity stamped on every harvested record.
    pub source_id: String,
    pub name: String,
    pub icon: Option<String>,
    pub endpoint: Url,
    pub reject_duplicate_resource: bool,
    pub query_scope: QueryScope,
    pub hop_count: u32,
    pub searches: Vec<SearchCriteria>,
    /// Timer interval; `None` harvests on demand only.
    pub every: Option<Duration>,
    /// Incremented on every successful commit, starting at 1.
    pub version: u64,
}

impl HarvesterConfig {
    /// Searches to run, substituting one unrestricted search for an empty list.
    pub fn effective_searches(&self) -> Vec<SearchCriteria> {
        if self.searches.is_empty() {
            vec![SearchCriteria::default()]
        } else {
            self.searches.clone()
        }
    }

    /// Returns true if records pointing at other catalogs should be followed.
    pub fn follows_links(&self) -> bool {
        self.query_scope == QueryScope::Hierarchy && self.hop_count > 0
    }

    /// Returns a mutable copy for editing. The config itself is untouched.
    pub fn to_draft(&self) -> HarvesterDraft {
        HarvesterDraft {
            id: self.id.clone(),
            source_id: Some(self.source_id.clone()),
            name: self.name.clone(),
            icon: self.icon.clone(),
            endpoint: self.endpoint.to_string(),
            reject_duplicate_resource: self.reject_duplicate_resource,
            query_scope: self.query_scope,
            hop_count: i64::from(self.hop_count),
            searches: self.searches.clone(),
            every: self.every,
            base_version: self.version,
        }
    }
}

// =============================================================================
// Harvester Draft
// =============================================================================

/// Mutable, unvalidated harvester configuration.
///
/// Created with [`HarvesterDraft::new`] for a new node or
/// [`HarvesterConfig::to_draft`] for an update. Fields are public so callers
/// can edit freely. Nothing here is visible to harvests until the draft is
/// committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvesterDraft {
    pub id: String,
    /// Set for drafts of existing nodes; generated on create otherwise.
    pub source_id: Option<String>,
    pub name: String,
    pub icon: Option<String>,
    pub endpoint: String,
    pub reject_duplicate_resource: bool,
    pub query_scope: QueryScope,
    /// Signed so an out-of-range value can be rejected instead of wrapped.
    pub hop_count: i64,
    pub searches: Vec<SearchCriteria>,
    pub every: Option<Duration>,
    pub(crate) base_version: u64,
}

impl HarvesterDraft {
    /// Creates a draft for a new node with default policy flags.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: None,
            name: name.into(),
            icon: None,
            endpoint: endpoint.into(),
            reject_duplicate_resource: true,
            query_scope: QueryScope::Local,
            hop_count: 0,
            searches: Vec::new(),
            every: None,
            base_version: 0,
        }
    }

    pub fn with_search(mut self, criteria: SearchCriteria) -> Self {
        self.searches.push(criteria);
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_query_scope(mut self, scope: QueryScope, hop_count: i64) -> Self {
        self.query_scope = scope;
        self.hop_count = hop_count;
        self
    }

    pub fn with_reject_duplicates(mut self, reject: bool) -> Self {
        self.reject_duplicate_resource = reject;
        self
    }

    pub fn with_every(mut self, every: Duration) -> Self {
        self.every = Some(every);
        self
    }

    /// Checks every field and builds the config snapshot.
    ///
    /// The returned config carries `base_version + 1` and the draft's
    /// `source_id`, which must already be set.
    pub fn validate(&self) -> Result<HarvesterConfig, AppError> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(AppError::ConfigValidation(
                "node id must not be empty".to_string(),
            ));
        }
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::ConfigValidation(
                "node name must not be empty".to_string(),
            ));
        }

        let endpoint = Url::parse(self.endpoint.trim()).map_err(|e| {
            AppError::ConfigValidation(format!("endpoint '{}' is invalid: {}", self.endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.host_str().is_none() {
            return Err(AppError::ConfigValidation(format!(
                "endpoint '{}' must be an http(s) URL with a host",
                self.endpoint
            )));
        }

        let hop_count = u32::try_from(self.hop_count).map_err(|_| {
            AppError::ConfigValidation(format!(
                "hop_count must be between 0 and {}, got {}",
                u32::MAX,
                self.hop_count
            ))
        })?;

        for (position, search) in self.searches.iter().enumerate() {
            search.validate(position)?;
        }

        if self.every.is_some_and(|every| every.is_zero()) {
            return Err(AppError::ConfigValidation(
                "schedule interval must be greater than zero".to_string(),
            ));
        }

        let source_id = self
            .source_id
            .clone()
            .ok_or_else(|| AppError::ConfigValidation("source id is not assigned".to_string()))?;

        Ok(HarvesterConfig {
            id: id.to_string(),
            source_id,
            name: name.to_string(),
            icon: self.icon.clone().filter(|i| !i.trim().is_empty()),
            endpoint,
            reject_duplicate_resource: self.reject_duplicate_resource,
            query_scope: self.query_scope,
            hop_count,
            searches: self.searches.clone(),
            every: self.every,
            version: self.base_version + 1,
        })
    }
}
