use async_trait::async_trait;
use chrono::Utc;
use color_eyre::eyre::Result;

use pipedeck::catalog::{Pipeline, PipelineId};
use pipedeck::gateway::{Gateway, GatewayError};
use pipedeck::monitor::format_elapsed;
use pipedeck::status::{PipelineStatus, StatusStore};

use super::{known_ids, CliContext, CommandErrors};

pub struct StatusCommand;

impl StatusCommand {
    async fn report_all(&self, context: &CliContext<'_>) -> Result<()> {
        let statuses = context.gateway.fetch_all_statuses().await?;
        let snapshot = StatusStore::new().merge(&statuses);
        for pipeline in context.catalog.pipelines() {
            print_status(pipeline, &snapshot.get(pipeline.id()));
        }
        Ok(())
    }

    async fn report_one(&self, context: &CliContext<'_>, raw: &str) -> Result<()> {
        let id = PipelineId::new(raw);
        let pipeline = context.catalog.get(&id).ok_or_else(|| {
            CommandErrors::UnknownPipeline(raw.to_string(), known_ids(&context.catalog))
        })?;

        let status = match context.gateway.fetch_status(&id).await {
            Ok(status) => status,
            // The server answers 404 for pipelines it has not run yet.
            Err(GatewayError::Server { status: 404, .. }) => PipelineStatus::idle(),
            Err(e) => return Err(e.into()),
        };
        print_status(pipeline, &status);
        Ok(())
    }
}

fn print_status(pipeline: &Pipeline, status: &PipelineStatus) {
    let mut line = format!(
        "* {} ({}): {}",
        pipeline.name(),
        pipeline.id(),
        status.state()
    );
    if status.is_running() {
        if let Some(started) = status.started_at() {
            line.push_str(&format!(" for {}", format_elapsed(Utc::now() - *started)));
        }
    }
    println!("{}", line);
    if let Some(started) = status.started_at() {
        println!("    started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(completed) = status.completed_at() {
        println!("    completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(error) = status.error() {
        println!("    error:     {}", error);
    }
}

#[async_trait]
impl<'a> super::Command<'a> for StatusCommand {
    fn new() -> Self
    where
        Self: Sized,
    {
        Self
    }

    async fn run(&self, context: &'a CliContext) -> Result<()> {
        match context.matches.get_one::<String>("pipeline") {
            Some(raw) => self.report_one(context, raw).await,
            None => self.report_all(context).await,
        }
    }
}
