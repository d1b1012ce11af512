#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use rand::seq::SliceRandom;
use rand::Rng;
use shardmap::core::{
    Credentials,
    RetryPolicy,
    ShardAllocator,
    ShardMapConfig,
    ShardMapError,
    ShardMapManager,
    ShardMapStatistics,
    ShardRange,
    ShardRouter,
};
use shardmap::sqlite::{
    CountOrders,
    InsertOrder,
    SqliteConnector,
    SqliteProvisioner,
    SqliteRegistry,
    UpsertCustomer,
};

static CUSTOMER_NAMES: &[&str] = &[
    "AdventureWorks Cycles",
    "Contoso Ltd.",
    "Microsoft Corp.",
    "Northwind Traders",
    "ProseWare, Inc.",
    "Lucerne Publishing",
    "Fabrikam, Inc.",
    "Coho Winery",
    "Alpine Ski House",
    "Humongous Insurance",
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args: Args = Args::parse();

    let data_dir = args
        .data_dir
        .unwrap_or_else(|| std::env::temp_dir().join(uuid::Uuid::new_v4().to_string()));
    std::fs::create_dir_all(&data_dir)?;
    let script = shardmap::sqlite::write_init_script(&data_dir)?;
    info!(data_dir = %data_dir.display(), script = %script.display(), "Using data directory");

    let config = ShardMapConfig::default()
        .with_server_name(&args.server)
        .with_map_name(&args.map_name)
        .with_init_script_path(&script)
        .with_command_timeout(Duration::from_secs(args.command_timeout_secs))
        .with_retry_policy(RetryPolicy::new(args.max_attempts));
    debug!(?config, "Loaded config");

    let statistics = ShardMapStatistics::default();
    let registry = SqliteRegistry::open_in_dir(&data_dir, config.server_name()).await?;
    let manager = ShardMapManager::default();
    let (map, status) = manager
        .load_range_shard_map::<i64, _>(config.map_name(), &registry)
        .await?;
    info!(
        map = %map.name(),
        ?status,
        num_shards = map.shard_count(),
        registry = %registry.path().display(),
        "Shard map ready",
    );

    let allocator = ShardAllocator::new(
        map.clone(),
        SqliteProvisioner::new(&data_dir),
        config.clone(),
    )?
    .with_statistics(statistics.clone())
    .with_registry(registry);

    let start = args.low.unwrap_or_else(|| map.max_high().unwrap_or(0));
    for ordinal in 0..args.num_ranges {
        let low = start + ordinal * args.range_size;
        let range = ShardRange::new(low, low + args.range_size)?;

        match allocator.allocate_shard_for_range(range.clone()).await {
            Ok(allocation) => {
                let source = allocation.source().clone();
                let mapping = allocation.into_mapping();
                info!(
                    %range,
                    mapping_id = %mapping.id(),
                    location = %mapping.shard().location(),
                    ?source,
                    "Range allocated",
                );
            },
            Err(ShardMapError::RangeConflict { existing, .. }) => {
                warn!(%range, %existing, "Range already mapped, skipping");
            },
            Err(other) => return Err(other.into()),
        }
    }

    let mappings = map.list_mappings();
    if mappings.is_empty() {
        warn!("No ranges are mapped, nothing to route");
        return Ok(());
    }

    let mut router = ShardRouter::new(map, SqliteConnector::new(&data_dir), &config)?
        .with_statistics(statistics.clone());
    if let Some(user_id) = args.user_id {
        router = router.with_credentials(Credentials::new(
            user_id,
            args.password.unwrap_or_default(),
        ));
    }

    for _ in 0..args.num_queries {
        let (customer_id, name, region_id, product_id) = {
            let mut rng = rand::thread_rng();
            // Ranges may not be contiguous, so keys are drawn from a mapped range.
            let range = mappings
                .choose(&mut rng)
                .map(|mapping| mapping.range().clone())
                .unwrap_or_else(|| mappings[0].range().clone());
            let name = CUSTOMER_NAMES
                .choose(&mut rng)
                .copied()
                .unwrap_or(CUSTOMER_NAMES[0]);
            (
                rng.gen_range(*range.low()..*range.high()),
                name,
                rng.gen_range(0..10),
                rng.gen_range(0..10),
            )
        };

        let location = router.resolve(&customer_id)?.shard().location().clone();
        router
            .resolve_and_run(&customer_id, &UpsertCustomer::new(customer_id, name, region_id))
            .await?;
        router
            .resolve_and_run(&customer_id, &InsertOrder::today(customer_id, product_id))
            .await?;
        let orders = router
            .resolve_and_run(&customer_id, &CountOrders::new(customer_id))
            .await?;

        info!(customer_id, customer = name, %location, orders, "Wrote customer order");
    }

    info!(
        shards_provisioned = statistics.num_shards_provisioned(),
        empty_shards_reused = statistics.num_empty_shards_reused(),
        databases_created = statistics.num_databases_created(),
        mappings_created = statistics.num_mappings_created(),
        requests_routed = statistics.num_requests_routed(),
        attempts = statistics.num_attempts(),
        transient_failures = statistics.num_transient_failures(),
        "Finished",
    );

    Ok(())
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(long)]
    /// The directory the shard databases and the shard map registry are kept in.
    ///
    /// Running the demo again over the same directory loads the existing map.
    ///
    /// Defaults to a new directory under the system temp directory.
    data_dir: Option<PathBuf>,

    #[arg(long, default_value = "localhost")]
    /// The server name shards are provisioned on.
    server: String,

    #[arg(long, default_value = "CustomerIDShardMap")]
    /// The name of the range shard map.
    map_name: String,

    #[arg(long)]
    /// The lower bound of the first new range.
    ///
    /// Defaults to the end of the highest range already mapped, or 0.
    low: Option<i64>,

    #[arg(long, default_value_t = 2)]
    /// The number of new ranges to allocate, each backed by its own shard.
    num_ranges: i64,

    #[arg(long, default_value_t = 100)]
    /// The number of customer IDs covered by each range.
    range_size: i64,

    #[arg(long, default_value_t = 10)]
    /// The number of random customers to write.
    num_queries: usize,

    #[arg(long, default_value_t = 5)]
    /// The maximum number of attempts for each unit of work.
    max_attempts: u32,

    #[arg(long, default_value_t = 60)]
    /// The timeout applied to each attempt in seconds.
    command_timeout_secs: u64,

    #[arg(long)]
    /// The user ID used when opening shard connections.
    user_id: Option<String>,

    #[arg(long)]
    /// The password used when opening shard connections.
    password: Option<String>,
}
