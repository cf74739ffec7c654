//! Service wiring: store, actions, scheduler, control surface and the
//! reconciliation loop.
//!
//! Only a store that cannot be opened is fatal. Everything else degrades:
//! no plugins means the built-in `log` action, no calendar feeds means an
//! empty calendar.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actions::builtins::LogAction;
use crate::actions::{ActionFactory, ActionRegistry};
use crate::calendar::{CalendarSource, MultiCalendar, StaticCalendar};
use crate::config::AlarmConfig;
use crate::error::Result;
use crate::scheduler::{
    ActionDispatch, AlarmScheduler, ControlServer, HttpSchedulerClient, SchedulerControl,
};
use crate::store::EventStore;
use crate::sync::Reconciler;

/// Name of the fallback action registered when discovery finds nothing.
pub const FALLBACK_ACTION: &str = "log";

/// Calendar built from `[sync] feeds`.
pub fn configured_calendar(config: &AlarmConfig) -> Result<Arc<dyn CalendarSource>> {
    let tz = config.tz()?;
    Ok(Arc::new(MultiCalendar::from_feeds(&config.sync.feeds, tz)))
}

/// Discover plugins under the configured directory, falling back to the
/// `log` action when none load.
pub async fn load_actions(config: &AlarmConfig) -> ActionRegistry {
    let mut registry =
        ActionRegistry::new().with_action_timeout(config.scheduler.action_timeout());
    let plugins_dir = config.actions.plugins_path();
    let loaded = registry
        .discover(&plugins_dir, &ActionFactory::with_builtins())
        .await;
    if loaded == 0 {
        warn!(dir = %plugins_dir.display(), "no actions discovered, using log fallback");
        registry
            .register(Box::new(LogAction::new(FALLBACK_ACTION)))
            .await;
    }
    registry
}

/// Reconciler for one-off event operations, such as
/// [`Reconciler::snooze_event`], against a running daemon. It shares the
/// configured store and drives the scheduler at `base_url` over HTTP. It has
/// no calendar and is not meant to run cycles.
pub fn remote_reconciler(config: &AlarmConfig, base_url: &str) -> Result<Reconciler> {
    let tz = config.tz()?;
    let store = Arc::new(EventStore::open(&config.store.db_path(), tz)?);
    let control = Arc::new(HttpSchedulerClient::new(base_url, tz)?);
    Ok(Reconciler::new(
        store,
        control,
        Arc::new(StaticCalendar::default()),
        config.sync.clone(),
    ))
}

/// A running alarm service.
pub struct Service {
    store: Arc<EventStore>,
    registry: Arc<ActionRegistry>,
    scheduler: AlarmScheduler,
    server: ControlServer,
    reconciler: Option<Arc<Reconciler>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Service {
    /// Start everything: dispatch loop, control surface and, when
    /// `[sync] enabled`, the reconciliation loop against `calendar`.
    pub async fn start(config: AlarmConfig, calendar: Arc<dyn CalendarSource>) -> Result<Self> {
        Self::launch(config, Some(calendar)).await
    }

    /// Start the scheduler and its control surface only.
    pub async fn serve(config: AlarmConfig) -> Result<Self> {
        Self::launch(config, None).await
    }

    async fn launch(
        config: AlarmConfig,
        calendar: Option<Arc<dyn CalendarSource>>,
    ) -> Result<Self> {
        config.validate()?;
        let tz = config.tz()?;

        let db_path = config.store.db_path();
        let store = Arc::new(EventStore::open(&db_path, tz)?);
        info!(path = %db_path.display(), timezone = %tz, "event store opened");

        let registry = Arc::new(load_actions(&config).await);
        info!(actions = ?registry.names(), "actions ready");

        let dispatch = ActionDispatch::new(Arc::clone(&registry)).with_store(Arc::clone(&store));
        let scheduler = AlarmScheduler::from_config(&config.scheduler, Arc::new(dispatch));

        let shutdown = CancellationToken::new();
        let mut tasks = vec![scheduler.run(shutdown.child_token())];

        let server = ControlServer::start(
            Arc::new(scheduler.clone()),
            tz,
            config.scheduler.default_snooze(),
            &config.scheduler.host,
            config.scheduler.port,
        )
        .await?;

        let reconciler = match calendar {
            Some(calendar) if config.sync.enabled => {
                let control: Arc<dyn SchedulerControl> = match &config.sync.scheduler_url {
                    Some(url) => {
                        info!(%url, "reconciling against remote scheduler");
                        Arc::new(HttpSchedulerClient::new(url, tz)?)
                    }
                    None => Arc::new(scheduler.clone()),
                };
                let reconciler = Arc::new(
                    Reconciler::new(Arc::clone(&store), control, calendar, config.sync.clone())
                        .with_retention_days(config.store.retention_days),
                );
                tasks.push(Arc::clone(&reconciler).run(shutdown.child_token()));
                Some(reconciler)
            }
            Some(_) => {
                info!("sync disabled, reconciliation loop not started");
                None
            }
            None => None,
        };

        Ok(Self {
            store,
            registry,
            scheduler,
            server,
            reconciler,
            shutdown,
            tasks,
        })
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &AlarmScheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// The reconciliation engine, when one is running.
    pub fn reconciler(&self) -> Option<&Arc<Reconciler>> {
        self.reconciler.as_ref()
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.server.addr()
    }

    pub fn control_url(&self) -> String {
        self.server.base_url()
    }

    /// Stop the loops and the listener, then clean up actions.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.server.shutdown();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        self.registry.cleanup().await;
        info!("alarm service stopped");
    }
}
