use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::eyre::Result;

use pipedeck::gateway::Gateway;
use pipedeck::monitor::{Monitor, PollConfig};

use super::CliContext;

pub struct WatchCommand;

#[async_trait]
impl<'a> super::Command<'a> for WatchCommand {
    fn new() -> Self
    where
        Self: Sized,
    {
        Self
    }

    async fn run(&self, context: &'a CliContext) -> Result<()> {
        let gateway: Arc<dyn Gateway> = context.gateway.clone();
        let monitor = Monitor::spawn(gateway, context.catalog.clone(), PollConfig::default());

        // First paint may show the connection failure as a notice; the next
        // successful poll or trigger clears the picture up.
        let _ = monitor.refresh().await;

        let mut updates = monitor.subscribe();
        let mut notices = monitor.subscribe_notices();
        loop {
            render(&monitor, context);
            tokio::select! {
                interrupted = tokio::signal::ctrl_c() => {
                    interrupted?;
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = notices.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        monitor.shutdown();
        println!();
        Ok(())
    }
}

fn render(monitor: &Monitor, context: &CliContext<'_>) {
    // Clear and home, then repaint the whole dashboard.
    print!("\x1b[2J\x1b[H");
    println!("* pipeline dashboard: {}", context.server);
    println!();

    if let Some(notice) = monitor.notice() {
        println!("! {}", notice);
        println!();
    }

    let snapshot = monitor.snapshot();
    for pipeline in context.catalog.pipelines() {
        let status = snapshot.get(pipeline.id());
        let mut line = format!(
            "* {} ({}): {}",
            pipeline.name(),
            pipeline.id(),
            status.state()
        );
        if let Some(elapsed) = monitor.elapsed(pipeline.id()) {
            line.push_str(&format!(" ({})", elapsed));
        }
        println!("{}", line);
        println!("    {}", pipeline.description());
        if let Some(started) = status.started_at() {
            println!("    started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
        }
        if let Some(completed) = status.completed_at() {
            println!("    completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
        }
        if let Some(error) = status.error() {
            println!("    error:     {}", error);
        }
        println!();
    }

    if monitor.is_polling() {
        println!("polling while pipelines run; ctrl-c to quit");
    } else {
        println!("nothing running; ctrl-c to quit");
    }
    let _ = std::io::stdout().flush();
}
