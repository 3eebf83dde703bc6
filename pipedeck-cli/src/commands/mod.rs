use std::sync::Arc;

use async_trait::async_trait;
use clap::ArgMatches;
use color_eyre::eyre::Result;
use thiserror::Error;

use pipedeck::catalog::{PipelineCatalog, PipelineId};
use pipedeck::gateway::http::HttpGateway;

pub mod start;
pub mod status;
pub mod watch;

#[derive(Error, Debug)]
pub enum CommandErrors {
    #[error("Unknown pipeline `{0}`. Known pipelines: {1}.")]
    UnknownPipeline(String, String),
    #[error("Required user input `{0}` is missing.")]
    RequiredUserInputMissing(String),
    #[error("Invalid subcommand `{0}`.")]
    InvalidSubcommand(String),
    #[error("No subcommand provided.")]
    NoSubcommandProvided,
}

pub struct CliContext<'a> {
    pub gateway: Arc<HttpGateway>,
    pub catalog: PipelineCatalog,
    pub server: String,
    pub matches: &'a ArgMatches,
}

impl<'a> CliContext<'a> {
    pub fn new(
        gateway: HttpGateway,
        catalog: PipelineCatalog,
        server: String,
        matches: &'a ArgMatches,
    ) -> Self {
        Self {
            gateway: Arc::new(gateway),
            catalog,
            server,
            matches,
        }
    }
}

#[async_trait]
pub trait Command<'a> {
    fn new() -> Self
    where
        Self: Sized;

    async fn run(&self, context: &'a CliContext) -> Result<()>;
}

pub(crate) fn known_ids(catalog: &PipelineCatalog) -> String {
    catalog
        .ids()
        .map(PipelineId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
