//! Cycle scheduler.
//!
//! Drives the fetch, build, render and publish pipeline. In one-shot mode a
//! single cycle runs and the first failure aborts the run. In continuous mode
//! an interval timer polls the metadata version and a cycle only runs when
//! the version changed since the last one; a failing template job is logged
//! and the remaining jobs still run. SIGINT and SIGTERM stop the loop.
//! Cycles never overlap: the next tick is not observed until the current
//! cycle finished.

use crate::config::{Settings, TemplateJob};
use crate::graph::GraphBuilder;
use crate::metadata::MetadataSource;
use crate::publish::{self, Outcome};
use crate::render::TemplateEngine;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, instrument, trace, warn};

pub struct Scheduler {
    source: Box<dyn MetadataSource>,
    settings: Settings,
    last_version: Option<String>,
}

impl Scheduler {
    pub fn new(source: Box<dyn MetadataSource>, settings: Settings) -> Self {
        Self {
            source,
            settings,
            last_version: None,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        if self.settings.include_inactive {
            warn!("include-inactive has no effect, stopped containers are always part of the context");
        }

        if self.settings.onetime {
            info!("Running a single cycle");
            return self.run_cycle().await;
        }

        info!(
            interval = self.settings.interval,
            "Polling metadata for changes"
        );

        let mut ticker = tokio::time::interval(Duration::from_secs(self.settings.interval));
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.handle_tick().await,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received interrupt, shutting down");
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Poll the version token and run a cycle when it changed. The token is
    /// committed only after a successful cycle, so a failed cycle is retried
    /// at the next tick even while the version stays the same.
    async fn handle_tick(&mut self) {
        match self.source.get_version().await {
            Ok(version) => {
                if self.last_version.as_deref() == Some(version.as_str()) {
                    trace!(%version, "Metadata version unchanged");
                    return;
                }
                debug!(%version, "Metadata version changed");
                match self.run_cycle().await {
                    Ok(()) => self.last_version = Some(version),
                    Err(e) => warn!("Cycle failed, will retry next tick: {:#}", e),
                }
            }
            Err(e) => warn!("Could not read metadata version: {}", e),
        }
    }

    /// Fetch a fresh metadata snapshot, build the context graph and process
    /// every template job against it.
    #[instrument(skip_all)]
    async fn run_cycle(&self) -> anyhow::Result<()> {
        let (hosts, stacks, services, containers, self_record) = tokio::try_join!(
            self.source.get_hosts(),
            self.source.get_stacks(),
            self.source.get_services(),
            self.source.get_containers(),
            self.source.get_self_container(),
        )
        .context("fetching metadata snapshot")?;

        let graph = GraphBuilder::new()
            .with_self_override(self.settings.self_id.clone())
            .build(hosts, stacks, services, containers, &self_record)
            .context("building context graph")?;

        let engine = TemplateEngine::new(Arc::new(graph));

        for job in &self.settings.templates {
            if let Err(e) = self.process_job(&engine, job) {
                if self.settings.onetime {
                    return Err(e);
                }
                warn!(
                    source = %job.source.display(),
                    "Template job failed: {:#}", e
                );
            }
        }

        Ok(())
    }

    fn process_job(&self, engine: &TemplateEngine, job: &TemplateJob) -> anyhow::Result<()> {
        let content = engine
            .render_file(&job.source)
            .with_context(|| format!("rendering {}", job.source.display()))?;

        let outcome = publish::publish(&content, job)
            .with_context(|| format!("publishing {}", job.source.display()))?;

        match outcome {
            Outcome::Published => {
                info!(source = %job.source.display(), "Template published")
            }
            Outcome::Skipped => {
                debug!(source = %job.source.display(), "Template output unchanged")
            }
            Outcome::Stdout => {}
        }

        // The update command only runs once the job's render and publish
        // went through, even when the output was unchanged.
        if let Some(update) = job.update_cmd.as_deref() {
            debug!(command = %update, "Running update command");
            match publish::run_command(update) {
                Ok(output) if !output.status.success() => {
                    warn!(command = %update, status = %output.status, "Update command failed");
                    publish::log_command_output(update, &output);
                }
                Ok(_) => {}
                Err(e) => warn!(command = %update, "Could not run update command: {}", e),
            }
        }

        Ok(())
    }
}
