use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::eyre::Result;
use dialoguer::Confirm;

use pipedeck::catalog::PipelineId;
use pipedeck::gateway::{Gateway, TriggerOutcome};
use pipedeck::log::*;
use pipedeck::monitor::{Monitor, PollConfig};
use pipedeck::status::PipelineState;

use super::{known_ids, CliContext, CommandErrors};

pub struct StartCommand;

#[async_trait]
impl<'a> super::Command<'a> for StartCommand {
    fn new() -> Self
    where
        Self: Sized,
    {
        Self
    }

    async fn run(&self, context: &'a CliContext) -> Result<()> {
        let raw = context
            .matches
            .get_one::<String>("pipeline")
            .ok_or_else(|| CommandErrors::RequiredUserInputMissing("pipeline".into()))?;
        let id = PipelineId::new(raw.as_str());
        let pipeline = context.catalog.get(&id).ok_or_else(|| {
            CommandErrors::UnknownPipeline(raw.clone(), known_ids(&context.catalog))
        })?;
        let name = pipeline.name().clone();

        if !context.matches.get_flag("yes") {
            let confirmed = Confirm::new()
                .with_prompt(format!("Start {}?", name))
                .default(true)
                .interact()?;
            if !confirmed {
                println!("* not starting {}", name);
                return Ok(());
            }
        }

        let gateway: Arc<dyn Gateway> = context.gateway.clone();
        let monitor = Monitor::spawn(gateway, context.catalog.clone(), PollConfig::default());

        info!("starting pipeline {}", id);
        let outcome = monitor.start(&id).await?;
        match &outcome {
            TriggerOutcome::Started => println!("* {} started", name),
            TriggerOutcome::AlreadyRunning => println!("* {} is already running", name),
            TriggerOutcome::Failed(reason) => println!("* could not start {}: {}", name, reason),
        }

        if outcome == TriggerOutcome::Started && context.matches.get_flag("follow") {
            follow(&monitor, &name, &id).await?;
        }
        monitor.shutdown();
        Ok(())
    }
}

/// Re-render a one-line progress display until the pipeline leaves Running.
async fn follow(monitor: &Monitor, name: &str, id: &PipelineId) -> Result<()> {
    let mut stdout = std::io::stdout();
    loop {
        let status = monitor.snapshot().get(id);
        match status.state() {
            PipelineState::Idle | PipelineState::Running => {
                if let Some(elapsed) = monitor.elapsed(id) {
                    write!(stdout, "\r  running for {}   ", elapsed)?;
                    stdout.flush()?;
                }
            }
            PipelineState::Completed => {
                writeln!(stdout)?;
                println!("* {} completed", name);
                break;
            }
            PipelineState::Failed => {
                writeln!(stdout)?;
                println!(
                    "* {} failed: {}",
                    name,
                    status.error().as_deref().unwrap_or("unknown error")
                );
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    Ok(())
}
