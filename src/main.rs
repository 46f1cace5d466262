mod cli;
mod ui;

use std::time::Duration;

use anyhow::{Context, Result};
use batchrun::{
    Engine, EngineConfig, EngineError, Handler, ItemContext, JobOptions, JobSummary, Permanent,
    Priority, handler_fn,
};
use clap::Parser;
use cli::{Cli, Command};
use tracing::info;
use ui::BatchProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "batchrun=debug" } else { "batchrun=warn" };
    batchrun::logging::init(level, cli.log_format.as_str())?;

    let config = match &cli.config {
        Some(path) => {
            anyhow::ensure!(path.exists(), "config file not found: {}", path.display());
            EngineConfig::load_from(path)
                .with_context(|| format!("failed to load {}", path.display()))?
        }
        None => EngineConfig::load().context("failed to load configuration")?,
    };

    match cli.command {
        Command::Demo {
            jobs,
            items,
            fail_every,
            flaky_every,
            latency_ms,
            cancel_after_ms,
        } => {
            let handler = demo_handler(fail_every, flaky_every, Duration::from_millis(latency_ms));
            run_demo(
                config,
                handler,
                jobs,
                items,
                cancel_after_ms.map(Duration::from_millis),
            )
            .await
        }
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Synthetic workload: squares its input after `latency`.
fn demo_handler(
    fail_every: u32,
    flaky_every: u32,
    latency: Duration,
) -> impl Handler<Input = u32, Output = u64> {
    let nth = |n: u32, every: u32| every > 0 && (n + 1) % every == 0;

    handler_fn(move |ctx: ItemContext, n: u32| async move {
        if nth(n, fail_every) {
            return Err(anyhow::Error::from(Permanent::new(format!("item {n} rejected"))));
        }
        tokio::select! {
            () = ctx.cancellation.cancelled() => anyhow::bail!("item {n} interrupted"),
            () = tokio::time::sleep(latency) => {}
        }
        if nth(n, flaky_every) && ctx.attempt == 1 {
            anyhow::bail!("item {n} timed out on first attempt");
        }
        anyhow::Ok(u64::from(n) * u64::from(n))
    })
}

fn demo_priority(n: &u32) -> Priority {
    match n % 10 {
        0 => Priority::Critical,
        1 | 2 => Priority::High,
        9 => Priority::Low,
        _ => Priority::Normal,
    }
}

async fn run_demo<H>(
    config: EngineConfig,
    handler: H,
    jobs: usize,
    items: usize,
    cancel_after: Option<Duration>,
) -> Result<()>
where
    H: Handler<Input = u32, Output = u64>,
{
    let engine = Engine::new(config, handler)?;
    let ui = BatchProgress::new();

    let inputs: Vec<u32> = (0..items as u32).collect();
    let mut running = Vec::new();
    for index in 1..=jobs {
        let job = engine.create_job(
            inputs.clone(),
            JobOptions::new()
                .name(format!("demo-{index}"))
                .priority_of(demo_priority),
        )?;
        let name = job.name.clone();
        match engine.submit(job) {
            Ok(handle) => {
                let bar = ui.track(&name, handle.progress());
                running.push((handle, bar));
            }
            Err(err @ EngineError::Capacity { .. }) => ui.rejected(&name, &err),
            Err(err) => return Err(err.into()),
        }
    }

    if let (Some(after), Some((first, _))) = (cancel_after, running.first()) {
        let engine = engine.clone();
        let job_id = first.id();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if engine.cancel(job_id) {
                info!(%job_id, "demo cancelled job");
            }
        });
    }

    for (handle, bar) in running {
        let job = handle.wait().await?;
        bar.await.context("progress bar task failed")?;
        ui.print_summary(&JobSummary::from_job(&job));
    }

    ui.print_statistics(&engine.statistics());
    engine.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx(attempt: u32) -> ItemContext {
        ItemContext {
            job_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            attempt,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn demo_handler_squares_input() {
        let handler = demo_handler(0, 0, Duration::from_millis(5));
        assert_eq!(handler.handle(ctx(1), 12).await.unwrap(), 144);
    }

    #[tokio::test(start_paused = true)]
    async fn demo_handler_failures() {
        let handler = demo_handler(3, 2, Duration::ZERO);

        let err = handler.handle(ctx(1), 2).await.unwrap_err();
        assert!(err.is::<Permanent>());

        assert!(handler.handle(ctx(1), 1).await.is_err());
        assert_eq!(handler.handle(ctx(2), 1).await.unwrap(), 1);
    }

    #[test]
    fn demo_priority_spreads_levels() {
        assert_eq!(demo_priority(&10), Priority::Critical);
        assert_eq!(demo_priority(&2), Priority::High);
        assert_eq!(demo_priority(&19), Priority::Low);
        assert_eq!(demo_priority(&5), Priority::Normal);
    }
}
