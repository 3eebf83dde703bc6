//! The fixed catalog of pipelines the dashboard can trigger. Pipelines are
//! known at startup and never discovered dynamically; the catalog is pure
//! data.

use std::fmt;

use derive_getters::Getters;
use serde::{Deserialize, Serialize};

/// Identifier of a pipeline, as the server knows it. Doubles as the URL path
/// segment for trigger requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(String);

impl PipelineId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PipelineId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Display metadata for a single pipeline.
#[derive(Getters, Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    id: PipelineId,
    name: String,
    description: String,
}

impl Pipeline {
    pub fn new<S: Into<String>>(id: S, name: S, description: S) -> Self {
        Self {
            id: PipelineId::new(id),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// The set of pipelines shown on the dashboard.
#[derive(Getters, Debug, Clone, Serialize, Deserialize)]
pub struct PipelineCatalog {
    pipelines: Vec<Pipeline>,
}

impl PipelineCatalog {
    pub fn new(pipelines: Vec<Pipeline>) -> Self {
        Self { pipelines }
    }

    pub fn contains(&self, id: &PipelineId) -> bool {
        self.pipelines.iter().any(|pipeline| pipeline.id() == id)
    }

    pub fn get(&self, id: &PipelineId) -> Option<&Pipeline> {
        self.pipelines.iter().find(|pipeline| pipeline.id() == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &PipelineId> {
        self.pipelines.iter().map(Pipeline::id)
    }

    /// Human-facing name for the given id, falling back to the raw id for
    /// pipelines the catalog does not know.
    pub fn display_name<'a>(&'a self, id: &'a PipelineId) -> &'a str {
        self.get(id)
            .map(|pipeline| pipeline.name().as_str())
            .unwrap_or_else(|| id.as_str())
    }
}

impl Default for PipelineCatalog {
    fn default() -> Self {
        Self::new(vec![
            Pipeline::new(
                "apollo",
                "Apollo Lead Generation",
                "Scrape and process leads from Apollo.io with AI-powered filtering",
            ),
            Pipeline::new(
                "googlemaps",
                "Google Maps Scraper",
                "Scrape businesses from Google Maps and qualify leads",
            ),
            Pipeline::new(
                "hubspot",
                "HubSpot Leads",
                "Pull and evaluate contacts from HubSpot CRM",
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::eyre::Result;

    use super::{Pipeline, PipelineCatalog, PipelineId};

    #[test]
    fn default_catalog_has_the_dashboard_pipelines() {
        let catalog = PipelineCatalog::default();
        assert_eq!(3, catalog.pipelines().len());
        assert!(catalog.contains(&PipelineId::new("apollo")));
        assert!(catalog.contains(&PipelineId::new("googlemaps")));
        assert!(catalog.contains(&PipelineId::new("hubspot")));
        assert!(!catalog.contains(&PipelineId::new("linkedin")));
    }

    #[test]
    fn display_name_falls_back_to_the_raw_id() {
        let catalog = PipelineCatalog::default();
        assert_eq!(
            "Apollo Lead Generation",
            catalog.display_name(&PipelineId::new("apollo"))
        );
        let unknown = PipelineId::new("mystery");
        assert_eq!("mystery", catalog.display_name(&unknown));
    }

    #[test]
    fn catalog_round_trips_through_serde() -> Result<()> {
        let catalog = PipelineCatalog::new(vec![Pipeline::new(
            "nightly",
            "Nightly Import",
            "Imports yesterday's leads",
        )]);
        let encoded = serde_json::to_string(&catalog)?;
        let decoded: PipelineCatalog = serde_json::from_str(&encoded)?;
        assert_eq!(1, decoded.pipelines().len());
        assert_eq!("Nightly Import", decoded.pipelines()[0].name());
        Ok(())
    }
}
