//! Migration run phases
//!
//! A [`Migration`] owns the three durable queues of a run and walks them
//! through the phases the CLI exposes:
//!
//! - `plan`: read the export, prepare the mapped channels together and
//!   enqueue creation calls (top-level messages in `parents`, replies in
//!   `children`)
//! - `dispatch`: drain `parents`, then `children`, through the transport
//! - `finish`: take channels, then teams, out of migration mode
//! - `status` and `requeue_failed` for inspection and recovery
//!
//! Every queue and the reference table are registered with the
//! [`ShutdownCoordinator`] so an interrupted run leaves its state on disk.

use crate::config::MigrateConfig;
use crate::convert::Converter;
use crate::dispatch::{DispatchSummary, Dispatcher};
use crate::mappings::{ChannelEntry, IdentityMap};
use crate::metrics;
use crate::queue::{DurableQueue, WorkItem};
use crate::resolve::{prepare, ReferenceTable};
use crate::shutdown::ShutdownCoordinator;
use crate::transport::{
    ClientCredentials, CredentialProvider, GraphApi, RequestSpec, RetryingTransport, StaticToken,
    Transport,
};
use crate::{MigrateError, Result};
use blockkit::Export;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub const PARENTS_QUEUE: &str = "parents";
pub const CHILDREN_QUEUE: &str = "children";
pub const FAILED_QUEUE: &str = "failed";

/// Transport used against the real API
pub type GraphTransport = RetryingTransport<GraphApi, Box<dyn CredentialProvider>>;

/// Build the authenticated, retrying transport described by `config`
///
/// Client credentials are used when a tenant and client id are configured,
/// otherwise a static token is read from the environment.
pub fn connect(config: &MigrateConfig) -> Result<GraphTransport> {
    let api = GraphApi::new(&config.graph.base_url, config.graph.timeout())?;

    let credentials: Box<dyn CredentialProvider> = match (&config.auth.tenant_id, &config.auth.client_id) {
        (Some(tenant), Some(client_id)) => {
            let secret = std::env::var(&config.auth.client_secret_env).map_err(|_| {
                MigrateError::Auth(format!(
                    "{} is not set",
                    config.auth.client_secret_env
                ))
            })?;
            info!(tenant = %tenant, "Using client credentials");
            Box::new(ClientCredentials::new(tenant, client_id.clone(), secret)?)
        }
        _ => {
            info!(env_var = %config.auth.token_env, "Using static bearer token");
            Box::new(StaticToken::from_env(&config.auth.token_env)?)
        }
    };

    Ok(RetryingTransport::new(api, credentials, config.retry_config()))
}

/// Counts from a planning pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanSummary {
    pub channels: usize,
    pub unmapped_channels: usize,
    pub records: usize,
    pub skipped_messages: usize,
    pub restamped: usize,
    pub parents: usize,
    pub children: usize,
}

/// Counts from a finishing pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinishSummary {
    pub channels: usize,
    pub teams: usize,
    pub failed: usize,
}

/// Snapshot of run state for `status`
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    /// (queue name, items waiting)
    pub queues: Vec<(String, usize)>,
    pub references: usize,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, len) in &self.queues {
            writeln!(f, "{:<10} {}", name, len)?;
        }
        write!(f, "{:<10} {}", "references", self.references)
    }
}

/// Queues and references of one run
pub struct Migration {
    config: MigrateConfig,
    parents: DurableQueue<WorkItem>,
    children: DurableQueue<WorkItem>,
    failed: DurableQueue<WorkItem>,
    references: Arc<ReferenceTable>,
}

impl Migration {
    /// Open (or recover) the run state under the configured directories
    pub fn open(config: MigrateConfig) -> Result<Self> {
        let paths = &config.paths;
        let parents = DurableQueue::open(PARENTS_QUEUE, paths.queue_path(PARENTS_QUEUE))?;
        let children = DurableQueue::open(CHILDREN_QUEUE, paths.queue_path(CHILDREN_QUEUE))?;
        let failed = DurableQueue::open(FAILED_QUEUE, paths.queue_path(FAILED_QUEUE))?;
        let references = Arc::new(ReferenceTable::open(paths.references_path())?);

        Ok(Self {
            config,
            parents,
            children,
            failed,
            references,
        })
    }

    /// Register every piece of state for the final flush
    pub fn register(&self, coordinator: &ShutdownCoordinator) {
        coordinator.register(self.parents.clone());
        coordinator.register(self.children.clone());
        coordinator.register(self.failed.clone());
        coordinator.register(self.references.clone());
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    pub fn parents(&self) -> &DurableQueue<WorkItem> {
        &self.parents
    }

    pub fn children(&self) -> &DurableQueue<WorkItem> {
        &self.children
    }

    pub fn failed(&self) -> &DurableQueue<WorkItem> {
        &self.failed
    }

    pub fn references(&self) -> &ReferenceTable {
        &self.references
    }

    /// Convert every mapped channel of `export` into queued work
    ///
    /// Refuses to run while work from an earlier plan is still queued.
    pub fn plan<M: IdentityMap + ?Sized>(&self, export: &Export, map: &M) -> Result<PlanSummary> {
        let queued = self.parents.len() + self.children.len();
        if queued > 0 {
            return Err(MigrateError::Config(format!(
                "{} items from an earlier plan are still queued; dispatch them first",
                queued
            )));
        }

        let options = self.config.prepare_options();
        let retry_budget = self.config.retry.max_retries;
        let converter = Converter::new(map);
        let mut summary = PlanSummary::default();

        let mut gathered = Vec::new();
        for channel in export.channels()? {
            if map.channel(&channel.id).is_none() {
                warn!(channel = %channel.name, id = %channel.id, "Channel has no destination, skipping");
                summary.unmapped_channels += 1;
                continue;
            }
            let messages = export.migratable_messages(&channel)?;
            info!(channel = %channel.name, messages = messages.len(), "Read channel");
            gathered.push((channel.id, messages));
        }
        summary.channels = gathered.len();

        // keys must be unique across the run, not per channel
        let prepared = prepare(
            gathered
                .iter()
                .map(|(id, messages)| (id.as_str(), messages.as_slice())),
            &options,
        )?;
        summary.records = prepared.records.len();
        summary.skipped_messages = prepared.skipped;
        summary.restamped = prepared.restamped;

        for record in &prepared.records {
            let converted = converter.convert(record)?;
            let item = WorkItem::create(&converted, record.key(), retry_budget)?;
            if item.is_reply() {
                self.children.enqueue(item)?;
                summary.children += 1;
            } else {
                self.parents.enqueue(item)?;
                summary.parents += 1;
            }
        }

        self.parents.flush()?;
        self.children.flush()?;

        info!(
            channels = summary.channels,
            parents = summary.parents,
            children = summary.children,
            skipped = summary.skipped_messages,
            restamped = summary.restamped,
            "Plan complete"
        );
        Ok(summary)
    }

    /// Drain `parents`, then `children`
    pub async fn dispatch<T: Transport>(&self, transport: T) -> Result<DispatchSummary> {
        let interval = self.config.queue.flush_interval();
        let _flushers = [
            self.parents.spawn_flusher(interval),
            self.children.spawn_flusher(interval),
            self.failed.spawn_flusher(interval),
        ];

        let dispatcher = Dispatcher::new(
            transport,
            self.references.clone(),
            self.config.dispatch_config(),
        )
        .with_dead_letters(self.failed.clone());

        let summary = dispatcher.run(&[&self.parents, &self.children]).await?;

        if let Some(ref path) = self.config.paths.metrics_file {
            metrics::write_textfile(path)?;
        }
        Ok(summary)
    }

    /// Complete migration mode for every channel, then every team
    ///
    /// Individual failures are logged and counted; they do not stop the pass.
    pub async fn finish<T: Transport>(
        &self,
        transport: T,
        channels: &[ChannelEntry],
    ) -> Result<FinishSummary> {
        let spec = RequestSpec::post_empty().with_max_retries(self.config.retry.max_retries);
        let mut summary = FinishSummary::default();
        let mut teams: Vec<&str> = Vec::new();

        for channel in channels {
            let route = format!(
                "teams/{}/channels/{}/completeMigration",
                urlencoding::encode(&channel.team_id),
                urlencoding::encode(&channel.channel_id)
            );
            match transport.call(&route, &spec).await {
                Ok(_) => {
                    info!(channel = %channel.slack_name, "Channel exited migration mode");
                    summary.channels += 1;
                }
                Err(e) => {
                    warn!(channel = %channel.slack_name, error = %e, "Failed to complete channel migration");
                    summary.failed += 1;
                }
            }
            if !teams.contains(&channel.team_id.as_str()) {
                teams.push(&channel.team_id);
            }
        }

        for team in teams {
            let route = format!("teams/{}/completeMigration", urlencoding::encode(team));
            match transport.call(&route, &spec).await {
                Ok(_) => {
                    info!(team = %team, "Team exited migration mode");
                    summary.teams += 1;
                }
                Err(e) => {
                    warn!(team = %team, error = %e, "Failed to complete team migration");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    pub fn status(&self) -> Status {
        Status {
            queues: [&self.parents, &self.children, &self.failed]
                .iter()
                .map(|q| (q.name().to_string(), q.len()))
                .collect(),
            references: self.references.len(),
        }
    }

    /// Move dead-lettered items back to the queue they came from
    pub fn requeue_failed(&self) -> Result<usize> {
        let items = self.failed.take_all();
        let count = items.len();
        for item in items {
            if item.is_reply() {
                self.children.enqueue(item)?;
            } else {
                self.parents.enqueue(item)?;
            }
        }

        self.parents.flush()?;
        self.children.flush()?;
        self.failed.flush()?;

        info!(items = count, "Requeued failed items");
        Ok(count)
    }
}
