//! Dependency initialization and wiring for the search sync service.

use std::sync::Arc;
use std::time::Duration;

use search_sync_repository::{
    IndexNaming, OpenSearchProvider, SearchIndexService, SearchIndexServiceConfig,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::activity_stream::{
    ActivityCursorPagination, ActivityStreamState, HawkAuthenticator, HawkCredentials,
};
use crate::changes::{ChangeIngest, PgChangeListener};
use crate::clock::{Clock, SystemClock};
use crate::config::apps_file::AppsFile;
use crate::config::settings::{ConnectionMode, SyncSettings};
use crate::errors::SyncError;
use crate::migration::{MigrationCoordinator, PostgresAdvisoryLock};
use crate::queue::{JobQueueConfig, TokioJobQueue};
use crate::signals::SignalBus;
use crate::sync::{connect_default_receivers, SearchContext, SyncOptions};

/// Container for all initialized dependencies.
pub struct Dependencies {
    pub settings: SyncSettings,
    pub context: SearchContext,
    /// The queue behind `context.queue`, kept concrete so the binary can run and stop it.
    pub queue: Arc<TokioJobQueue>,
    pub signals: SignalBus,
    /// Publishes row changes onto `signals`.
    pub changes: ChangeIngest,
    /// Source of row changes; consumed when the binary starts it.
    pub change_listener: PgChangeListener,
    pub migrations: MigrationCoordinator,
    pub activity_stream: ActivityStreamState,
}

impl Dependencies {
    /// Initialize all dependencies from environment variables.
    ///
    /// See [`SyncSettings::from_env`] for the variables read.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(SyncError)` - If settings are invalid or a backend is unreachable
    ///   (OpenSearch only in fail-fast mode)
    pub async fn new() -> Result<Self, SyncError> {
        Self::from_settings(SyncSettings::from_env()?).await
    }

    pub async fn from_settings(settings: SyncSettings) -> Result<Self, SyncError> {
        info!(
            opensearch_url = %settings.opensearch_url,
            connection_mode = ?settings.connection_mode,
            retry_interval_secs = settings.retry_interval.as_secs(),
            index_prefix = %settings.index_prefix,
            apps_config = %settings.apps_config.display(),
            "Initializing dependencies"
        );

        let apps_file = AppsFile::load(&settings.apps_config)?;

        let search_provider = Self::connect_to_opensearch(
            &settings.opensearch_url,
            settings.connection_mode,
            settings.retry_interval,
        )
        .await?;
        info!("OpenSearch connection established");

        let pool = Self::connect_to_database(&settings.database_url).await?;
        info!("Database connection established");

        let index = SearchIndexService::with_config(
            Arc::new(search_provider),
            SearchIndexServiceConfig::with_bulk_chunk_size(settings.bulk_chunk_size),
        );
        let registry = apps_file.build_registry(&IndexNaming::new(settings.index_prefix.clone()), &pool)?;
        let relations = apps_file.build_relations(&registry, &pool)?;
        let feeds = apps_file.build_feeds(&registry, &index, &pool)?;

        let queue = Arc::new(TokioJobQueue::with_config(JobQueueConfig {
            concurrency: settings.worker_concurrency,
        }));
        let context = SearchContext::new(
            Arc::new(registry),
            Arc::new(relations),
            index,
            queue.clone(),
        )
        .with_options(SyncOptions {
            batch_size: settings.sync_batch_size,
        });

        let signals = SignalBus::new();
        let receivers = connect_default_receivers(&context, &signals);
        info!(count = receivers.len(), "Connected default signal receivers");
        let changes = ChangeIngest::new(context.clone(), signals.clone());
        let change_listener = PgChangeListener::connect(&pool, &settings.change_channel).await?;

        let migrations =
            MigrationCoordinator::new(context.clone(), Arc::new(PostgresAdvisoryLock::new(pool)));

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let authenticator = HawkAuthenticator::new(
            HawkCredentials::new(
                settings.access_key_id.clone(),
                settings.secret_access_key.clone(),
            ),
            settings.ip_allowlist.clone(),
            clock.clone(),
        );
        let mut activity_stream = ActivityStreamState::new(
            ActivityCursorPagination::new(settings.page_size, settings.visibility_grace),
            Arc::new(authenticator),
            clock,
            settings.public_url.clone(),
        );
        for feed in feeds {
            activity_stream = activity_stream.with_feed(&feed.name, feed.summary, feed.source)?;
        }
        info!(feeds = ?activity_stream.feed_names(), "Activity stream feeds configured");

        Ok(Self {
            settings,
            context,
            queue,
            signals,
            changes,
            change_listener,
            migrations,
            activity_stream,
        })
    }

    /// Connect to OpenSearch with retry logic based on connection mode.
    async fn connect_to_opensearch(
        url: &str,
        mode: ConnectionMode,
        retry_interval: Duration,
    ) -> Result<OpenSearchProvider, SyncError> {
        loop {
            match Self::try_connect_opensearch(url).await {
                Ok(provider) => return Ok(provider),
                Err(e) => match mode {
                    ConnectionMode::FailFast => {
                        return Err(SyncError::config(format!(
                            "Failed to connect to OpenSearch: {}",
                            e
                        )));
                    }
                    ConnectionMode::Retry => {
                        warn!(
                            opensearch_url = %url,
                            error = %e,
                            retry_interval_secs = retry_interval.as_secs(),
                            "Failed to connect to OpenSearch, retrying..."
                        );
                        sleep(retry_interval).await;
                    }
                },
            }
        }
    }

    /// Attempt to connect to OpenSearch.
    async fn try_connect_opensearch(url: &str) -> Result<OpenSearchProvider, SyncError> {
        let search_provider = OpenSearchProvider::new(url).await?;
        search_provider.ping().await?;
        Ok(search_provider)
    }

    async fn connect_to_database(url: &str) -> Result<PgPool, SyncError> {
        PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| SyncError::config(format!("Failed to connect to database: {}", e)))
    }
}
