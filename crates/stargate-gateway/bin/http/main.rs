mod cli;

use crate::cli::{CacheBackendArg, StorageBackendArg, CLI};
use anyhow::Context;
use clap::Parser;
use stargate_cache::{
    BloomExistenceFilter, BloomFilterConfig, CachedLocator, InMemoryVisitorTracker,
    MaxMindLocator, MokaCacheStore, RedisBloomConfig, RedisBloomFilter, RedisCacheStore,
    RedisVisitorTracker,
};
use stargate_core::{
    CacheStore, ExistenceFilter, LinkRepository, QueueBroker, StatsSink, VisitorTracker,
};
use stargate_gateway::{App, AppState};
use stargate_redirector::{Resolver, ResolverSettings};
use stargate_shortener::{LinkService, ShortenerSettings};
use stargate_snowflake::{IdGenerator, Snowflake, SnowflakeSettings};
use stargate_stats::{
    consumer_name, ConsumerSettings, InMemoryBroker, RedisStreamBroker, StatsAggregator,
    StatsConsumer, StatsProducer,
};
use stargate_storage::{
    schema, InMemoryLinkStore, MySqlLinkRepository, MySqlStatsSink, PoolSettings, ShardRouter,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct Storage {
    repository: Arc<dyn LinkRepository>,
    sink: Arc<dyn StatsSink>,
}

struct Caching {
    cache: Arc<dyn CacheStore>,
    filter: Arc<dyn ExistenceFilter>,
    visitors: Arc<dyn VisitorTracker>,
    broker: Arc<dyn QueueBroker>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::try_parse()?;
    stargate_telemetry::init(config.log_format.into())?;

    info!(
        listen_addr = %config.listen_addr,
        domain = %config.domain,
        node_id = config.node_id,
        shards = config.shards,
        storage_backend = %config.storage,
        cache_backend = %config.cache,
        "starting stargate gateway"
    );

    let router = ShardRouter::new(config.shards)?;
    let storage = build_storage(&config, router).await?;
    let caching = build_caching(&config).await?;

    let ids: Arc<dyn IdGenerator> = Arc::new(Snowflake::new(
        SnowflakeSettings::builder().node_id(config.node_id).build(),
    )?);
    let links = Arc::new(LinkService::new(
        Arc::clone(&storage.repository),
        caching.filter,
        Arc::clone(&caching.cache),
        ids,
        ShortenerSettings::builder().domain(config.domain.clone()).build(),
    ));
    match links.rebuild_filter().await {
        Ok(codes) => info!(codes, "existence filter warmed"),
        Err(e) => warn!(error = %e, "existence filter warm-up failed, storage checks stay authoritative"),
    }

    let producer = StatsProducer::new(Arc::clone(&caching.broker));
    let mut resolver = Resolver::new(
        storage.repository,
        Arc::clone(&caching.cache),
        Arc::new(producer),
        ResolverSettings::builder().domain(config.domain.clone()).build(),
    );
    if let Some(path) = &config.geoip_db {
        let maxmind = MaxMindLocator::open(path)?;
        info!(path = %path.display(), "geoip lookups enabled");
        resolver = resolver.with_locator(Arc::new(CachedLocator::new(
            Arc::new(maxmind),
            caching.cache,
        )));
    }
    let resolver = Arc::new(resolver);

    let consumer = StatsConsumer::new(
        caching.broker,
        StatsAggregator::new(storage.sink, caching.visitors),
        ConsumerSettings::builder()
            .consumer(config.consumer_name.clone().unwrap_or_else(consumer_name))
            .build(),
    );

    let shutdown = CancellationToken::new();
    let consumer_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };
    tokio::spawn(watch_signals(shutdown.clone()));

    let app = App::router(AppState::new(resolver, links));
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .await?;

    // the server can also stop on its own; the consumer must follow it
    shutdown.cancel();
    consumer_task.await?;
    info!("stargate gateway stopped");
    Ok(())
}

async fn build_storage(config: &CLI, router: ShardRouter) -> anyhow::Result<Storage> {
    match config.storage {
        StorageBackendArg::InMemory => {
            let store = Arc::new(InMemoryLinkStore::new(router));
            Ok(Storage {
                repository: store.clone(),
                sink: store,
            })
        }
        StorageBackendArg::Mysql => {
            let dsn = config
                .mysql_dsn
                .as_deref()
                .context("mysql dsn is required when storage backend is mysql")?;
            let pool = PoolSettings::default().connect(dsn).await?;
            schema::apply(&pool, router.shard_count()).await?;
            Ok(Storage {
                repository: Arc::new(MySqlLinkRepository::new(pool.clone(), router)),
                sink: Arc::new(MySqlStatsSink::new(pool, router)),
            })
        }
    }
}

async fn build_caching(config: &CLI) -> anyhow::Result<Caching> {
    match config.cache {
        CacheBackendArg::Moka => Ok(Caching {
            cache: Arc::new(MokaCacheStore::default()),
            filter: Arc::new(BloomExistenceFilter::new(BloomFilterConfig::default())?),
            visitors: Arc::new(InMemoryVisitorTracker::new()),
            broker: Arc::new(InMemoryBroker::new()),
        }),
        CacheBackendArg::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .context("redis url is required when cache backend is redis")?;
            let client = redis::Client::open(url)?;
            let conn = client.get_multiplexed_async_connection().await?;
            // blocking stream reads must not queue behind cache traffic
            let reader = client.get_multiplexed_async_connection().await?;
            Ok(Caching {
                cache: Arc::new(RedisCacheStore::new(conn.clone())),
                filter: Arc::new(RedisBloomFilter::new(
                    conn.clone(),
                    RedisBloomConfig::builder().build(),
                )?),
                visitors: Arc::new(RedisVisitorTracker::new(conn.clone())),
                broker: Arc::new(RedisStreamBroker::with_reader(conn, reader)),
            })
        }
    }
}

/// Cancels `shutdown` on Ctrl-C or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
    shutdown.cancel();
}
