//! KPI catalog: named markers, correlated KPIs, collected markers and
//! derived KPIs with per-branch thresholds
//!
//! ```toml
//! default_threshold = 10.0
//!
//! [markers.click]
//! apid = "ALD"
//! ctid = "LCAT"
//! pattern = 'Click command handle=(?P<handle>\d+)'
//!
//! [markers.route_done]
//! apid = "NAV"
//! ctid = "RGC"
//! template = 'route calculated handle=${handle}'
//!
//! [[kpi]]
//! name = "click_to_route"
//! start = "click"
//! end = "route_done"
//! threshold = 3.0
//! branch_thresholds = { stable = 2.5 }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use dltkpi_core::CorrelationError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::collector::{CollectSpec, MarkerCollector};
use crate::config::RetryPolicy;
use crate::correlator::{CorrelatorBuilder, EventCorrelator};
use crate::matcher::PatternMatcher;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML catalog: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid YAML catalog: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{owner} references unknown marker '{marker}'")]
    UnknownMarker { owner: String, marker: String },

    #[error("Unknown KPI '{0}'")]
    UnknownKpi(String),

    #[error("Invalid catalog: {0}")]
    Invalid(String),
}

impl From<CatalogError> for CorrelationError {
    fn from(err: CatalogError) -> Self {
        CorrelationError::Configuration(err.to_string())
    }
}

/// Threshold with optional per-branch overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub branch_thresholds: BTreeMap<String, f64>,
}

impl Thresholds {
    /// Branch value, else the plain threshold
    pub fn resolve(&self, branch: Option<&str>) -> Option<f64> {
        branch
            .and_then(|b| self.branch_thresholds.get(b).copied())
            .or(self.threshold)
    }
}

/// A named `(apid, ctid, pattern)` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDef {
    pub apid: String,
    pub ctid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl MarkerDef {
    pub fn matcher(&self, name: &str) -> Result<PatternMatcher, CatalogError> {
        let result = match (&self.pattern, &self.template) {
            (Some(pattern), None) => PatternMatcher::regex(&self.apid, &self.ctid, pattern),
            (None, Some(template)) => PatternMatcher::template(&self.apid, &self.ctid, template),
            _ => {
                return Err(CatalogError::Invalid(format!(
                    "Marker '{}' needs exactly one of 'pattern' or 'template'",
                    name
                )))
            }
        };
        result.map_err(|e| CatalogError::Invalid(format!("Marker '{}': {}", name, e)))
    }

    /// Payload expression for listings
    pub fn expression(&self) -> &str {
        self.pattern
            .as_deref()
            .or(self.template.as_deref())
            .unwrap_or_default()
    }
}

/// KPI measured between a start and an end marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiDef {
    pub name: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub predict_fields: Vec<String>,
    #[serde(flatten)]
    pub thresholds: Thresholds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectKind {
    #[default]
    Timestamp,
    Capture,
}

/// Single-marker KPI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectDef {
    pub name: String,
    pub marker: String,
    #[serde(default)]
    pub value: CollectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<String>,
    #[serde(flatten)]
    pub thresholds: Thresholds,
}

/// Difference of two collected values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedDef {
    pub name: String,
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub thresholds: Thresholds,
}

/// KPI definitions loaded from TOML or YAML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiCatalog {
    /// Fallback when neither a branch nor a KPI threshold is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_threshold: Option<f64>,
    #[serde(default)]
    pub markers: BTreeMap<String, MarkerDef>,
    #[serde(default)]
    pub kpi: Vec<KpiDef>,
    #[serde(default)]
    pub collect: Vec<CollectDef>,
    #[serde(default)]
    pub derived: Vec<DerivedDef>,
}

impl KpiCatalog {
    /// Load a catalog, picking the format from the file extension
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let catalog = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content)?,
            _ => Self::from_toml_str(&content)?,
        };
        debug!(
            path = %path.display(),
            markers = catalog.markers.len(),
            kpis = catalog.kpi.len(),
            "Loaded KPI catalog"
        );
        Ok(catalog)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let catalog: Self = toml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_yaml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check references, patterns and propagated fields
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut matchers = BTreeMap::new();
        for (name, marker) in &self.markers {
            matchers.insert(name.as_str(), marker.matcher(name)?);
        }

        let lookup = |owner: &str, marker: &str| {
            matchers
                .get(marker)
                .ok_or_else(|| CatalogError::UnknownMarker {
                    owner: owner.to_string(),
                    marker: marker.to_string(),
                })
        };

        let mut names = BTreeSet::new();
        let all_names = self
            .kpi
            .iter()
            .map(|k| &k.name)
            .chain(self.collect.iter().map(|c| &c.name))
            .chain(self.derived.iter().map(|d| &d.name));
        for name in all_names {
            if !names.insert(name.as_str()) {
                return Err(CatalogError::Invalid(format!("Duplicate KPI name '{}'", name)));
            }
        }

        for kpi in &self.kpi {
            let owner = format!("KPI '{}'", kpi.name);
            let start = lookup(&owner, &kpi.start)?;
            let end = lookup(&owner, &kpi.end)?;

            if !start.is_bound() {
                return Err(CatalogError::Invalid(format!(
                    "{}: start marker '{}' must not be a template",
                    owner, kpi.start
                )));
            }

            let captured = start.capture_names();
            let propagated: Vec<&String> = if kpi.predict_fields.is_empty() {
                end.required_fields().iter().collect()
            } else {
                kpi.predict_fields.iter().collect()
            };
            if let Some(field) = propagated.iter().find(|f| !captured.contains(**f)) {
                return Err(CatalogError::Invalid(format!(
                    "{}: field '{}' is not a named group of marker '{}'",
                    owner, field, kpi.start
                )));
            }
            if let Some(field) = end
                .required_fields()
                .iter()
                .find(|f| !propagated.contains(f))
            {
                return Err(CatalogError::Invalid(format!(
                    "{}: placeholder '{}' of marker '{}' is not propagated",
                    owner, field, kpi.end
                )));
            }
        }

        for collect in &self.collect {
            let owner = format!("Collected KPI '{}'", collect.name);
            let matcher = lookup(&owner, &collect.marker)?;
            if !matcher.is_bound() {
                return Err(CatalogError::Invalid(format!(
                    "{}: marker '{}' must not be a template",
                    owner, collect.marker
                )));
            }
            if collect.value == CollectKind::Capture {
                let group = collect.capture.as_ref().ok_or_else(|| {
                    CatalogError::Invalid(format!("{}: 'capture' group is required", owner))
                })?;
                if !matcher.capture_names().contains(group) {
                    return Err(CatalogError::Invalid(format!(
                        "{}: marker '{}' has no group '{}'",
                        owner, collect.marker, group
                    )));
                }
            }
        }

        for derived in &self.derived {
            let mut kinds = Vec::with_capacity(2);
            for source in [&derived.from, &derived.to] {
                match self.collect.iter().find(|c| &c.name == source) {
                    Some(collect) => kinds.push(collect.value),
                    None => {
                        return Err(CatalogError::Invalid(format!(
                            "Derived KPI '{}' references unknown collected KPI '{}'",
                            derived.name, source
                        )))
                    }
                }
            }
            // a timestamp in seconds and a captured number share no unit
            if kinds[0] != kinds[1] {
                return Err(CatalogError::Invalid(format!(
                    "Derived KPI '{}' mixes a {:?} value ('{}') with a {:?} value ('{}')",
                    derived.name, kinds[0], derived.from, kinds[1], derived.to
                )));
            }
        }

        Ok(())
    }

    pub fn kpi(&self, name: &str) -> Option<&KpiDef> {
        self.kpi.iter().find(|k| k.name == name)
    }

    pub fn matcher(&self, marker: &str) -> Result<PatternMatcher, CatalogError> {
        self.markers
            .get(marker)
            .ok_or_else(|| CatalogError::UnknownMarker {
                owner: "lookup".to_string(),
                marker: marker.to_string(),
            })?
            .matcher(marker)
    }

    /// Threshold for `branch`, falling back to the catalog default
    pub fn threshold(&self, thresholds: &Thresholds, branch: Option<&str>) -> Option<f64> {
        thresholds.resolve(branch).or(self.default_threshold)
    }

    /// Correlator builder for a catalog KPI
    pub fn correlator(&self, kpi_name: &str) -> Result<CorrelatorBuilder, CatalogError> {
        let kpi = self
            .kpi(kpi_name)
            .ok_or_else(|| CatalogError::UnknownKpi(kpi_name.to_string()))?;

        let mut builder = EventCorrelator::builder(self.matcher(&kpi.start)?, self.matcher(&kpi.end)?)
            .predict_fields(kpi.predict_fields.iter().cloned());
        if let Some(retry) = &kpi.retry {
            builder = builder.retry(retry.clone());
        }
        Ok(builder)
    }

    /// Collector over every `[[collect]]` entry
    pub fn collector(&self, branch: Option<&str>) -> Result<MarkerCollector, CatalogError> {
        let specs = self
            .collect
            .iter()
            .map(|def| {
                let matcher = self.matcher(&def.marker)?;
                let mut spec = match (def.value, &def.capture) {
                    (CollectKind::Capture, Some(group)) => {
                        CollectSpec::capture(&def.name, matcher, group)
                    }
                    _ => CollectSpec::timestamp(&def.name, matcher),
                };
                spec.threshold = self.threshold(&def.thresholds, branch);
                Ok(spec)
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;

        MarkerCollector::new(specs).map_err(|e| CatalogError::Invalid(e.to_string()))
    }
}
