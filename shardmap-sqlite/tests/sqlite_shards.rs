use std::time::Duration;

use async_trait::async_trait;
use shardmap_core::{
    CreateStatus,
    RetryPolicy,
    ShardAllocator,
    ShardMapConfig,
    ShardMapError,
    ShardMapManager,
    ShardRange,
    ShardRouter,
    ShardSource,
    UnitOfWork,
};
use shardmap_sqlite::{
    CountOrders,
    Customer,
    GetCustomer,
    InsertOrder,
    ShardConnection,
    SqliteConnector,
    SqliteProvisioner,
    SqliteRegistry,
    SqliteShardError,
    UpsertCustomer,
};

/// A plain insert, which fails on the second run.
struct InsertCustomer(i64);

#[async_trait]
impl UnitOfWork<SqliteConnector> for InsertCustomer {
    type Output = usize;

    async fn run(&self, conn: &mut ShardConnection) -> Result<usize, SqliteShardError> {
        conn.handle()
            .execute(
                "INSERT INTO customers (customer_id, name, region_id) VALUES (?1, 'dupe', 0);",
                (self.0,),
            )
            .await
    }
}

fn config(script: &std::path::Path) -> ShardMapConfig {
    ShardMapConfig::default()
        .with_init_script_path(script)
        .with_retry_policy(
            RetryPolicy::new(3).with_backoff(Duration::from_millis(1), Duration::from_millis(2)),
        )
}

#[tokio::test]
async fn test_sqlite_allocate_and_route() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = test_helper::temp_dir();
    let script = shardmap_sqlite::write_init_script(&dir)?;
    let data_dir = dir.join("shards");
    let config = config(&script);

    let manager = ShardMapManager::default();
    let (map, _) = manager.get_or_create_range_shard_map::<i64>(config.map_name())?;

    let allocator = ShardAllocator::new(
        map.clone(),
        SqliteProvisioner::new(&data_dir),
        config.clone(),
    )?;
    for (low, high) in [(0, 100), (100, 200)] {
        let allocation = allocator
            .allocate_shard_for_range(ShardRange::new(low, high)?)
            .await?;
        assert!(matches!(
            allocation.source(),
            ShardSource::Provisioned { database_created: true, .. }
        ));
    }
    assert!(data_dir
        .join("localhost")
        .join("ElasticScaleStarterKit_Shard1.db")
        .exists());

    let router = ShardRouter::new(map, SqliteConnector::new(&data_dir), &config)?;

    // Running the upsert again, as a retry would, keeps a single row.
    let upsert = UpsertCustomer::new(150, "Contoso Ltd.", 0);
    router.resolve_and_run(&150, &upsert).await?;
    router.resolve_and_run(&150, &upsert).await?;
    router
        .resolve_and_run(&150, &UpsertCustomer::new(150, "Northwind Traders", 3))
        .await?;

    let customer = router.resolve_and_run(&150, &GetCustomer::new(150)).await?;
    assert_eq!(
        customer,
        Some(Customer {
            customer_id: 150,
            name: "Northwind Traders".to_string(),
            region_id: 3,
        }),
    );

    // The customer only exists in the second shard.
    let location = router.resolve(&150)?.shard().location().clone();
    assert_eq!(location.database(), "ElasticScaleStarterKit_Shard1");
    let missing = router.resolve_and_run(&50, &GetCustomer::new(150)).await?;
    assert!(missing.is_none());

    let first = router.resolve_and_run(&150, &InsertOrder::today(150, 1)).await?;
    let second = router.resolve_and_run(&150, &InsertOrder::today(150, 2)).await?;
    assert!(second > first);
    let orders = router.resolve_and_run(&150, &CountOrders::new(150)).await?;
    assert_eq!(orders, 2);

    let err = router
        .resolve_and_run(&200, &GetCustomer::new(200))
        .await
        .expect_err("Key is not mapped");
    assert!(matches!(err, ShardMapError::KeyNotMapped { .. }));

    Ok(())
}

#[tokio::test]
async fn test_sqlite_constraint_violation_is_permanent() -> anyhow::Result<()> {
    let dir = test_helper::temp_dir();
    let script = shardmap_sqlite::write_init_script(&dir)?;
    let config = config(&script);

    let manager = ShardMapManager::default();
    let (map, _) = manager.get_or_create_range_shard_map::<i64>(config.map_name())?;

    let allocator = ShardAllocator::new(map.clone(), SqliteProvisioner::new(&dir), config.clone())?;
    allocator
        .allocate_shard_for_range(ShardRange::new(0, 100)?)
        .await?;

    let router = ShardRouter::new(map, SqliteConnector::new(&dir), &config)?;
    router.resolve_and_run(&1, &InsertCustomer(1)).await?;

    let err = router
        .resolve_and_run(&1, &InsertCustomer(1))
        .await
        .expect_err("Duplicate insert should fail");
    assert!(matches!(err, ShardMapError::PermanentFailure(_)));
    assert_eq!(router.statistics().num_attempts(), 2, "Constraint violations are not retried.");

    Ok(())
}

#[tokio::test]
async fn test_sqlite_orphaned_database_is_not_reinitialised() -> anyhow::Result<()> {
    let dir = test_helper::temp_dir();
    let script = shardmap_sqlite::write_init_script(&dir)?;
    let config = config(&script);

    // The first map provisions `Shard0`, a new map over the same directory
    // has no record of it.
    let first = ShardMapManager::default();
    let (map, _) = first.get_or_create_range_shard_map::<i64>(config.map_name())?;
    ShardAllocator::new(map, SqliteProvisioner::new(&dir), config.clone())?
        .allocate_shard_for_range(ShardRange::new(0, 100)?)
        .await?;

    let second = ShardMapManager::default();
    let (map, _) = second.get_or_create_range_shard_map::<i64>(config.map_name())?;
    let err = ShardAllocator::new(map.clone(), SqliteProvisioner::new(&dir), config)?
        .allocate_shard_for_range(ShardRange::new(0, 100)?)
        .await
        .expect_err("Initialising an existing shard should fail");
    assert!(matches!(err, ShardMapError::Provisioning { .. }));
    assert_eq!(map.shard_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_sqlite_registry_survives_restart() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = test_helper::temp_dir();
    let script = shardmap_sqlite::write_init_script(&dir)?;
    let config = config(&script);

    let (shards, mappings) = {
        let registry = SqliteRegistry::open_in_dir(&dir, config.server_name()).await?;
        let manager = ShardMapManager::default();
        let (map, status) = manager
            .load_range_shard_map::<i64, _>(config.map_name(), &registry)
            .await?;
        assert_eq!(status, CreateStatus::Created);

        let allocator = ShardAllocator::new(map.clone(), SqliteProvisioner::new(&dir), config.clone())?
            .with_registry(registry);
        allocator.allocate_shard_for_range(ShardRange::new(0, 100)?).await?;
        allocator.allocate_shard_for_range(ShardRange::new(100, 200)?).await?;

        let router = ShardRouter::new(map.clone(), SqliteConnector::new(&dir), &config)?;
        router
            .resolve_and_run(&150, &UpsertCustomer::new(150, "Contoso Ltd.", 0))
            .await?;

        (map.list_shards(), map.list_mappings())
    };

    // A new process over the same directory sees the same map.
    let registry = SqliteRegistry::open_in_dir(&dir, config.server_name()).await?;
    let manager = ShardMapManager::default();
    let (map, status) = manager
        .load_range_shard_map::<i64, _>(config.map_name(), &registry)
        .await?;
    assert_eq!(status, CreateStatus::AlreadyExisted);
    assert_eq!(map.list_mappings(), mappings);
    let mut loaded = map.list_shards();
    loaded.sort_by_key(|shard| shard.id());
    let mut expected = shards;
    expected.sort_by_key(|shard| shard.id());
    assert_eq!(loaded, expected);

    let router = ShardRouter::new(map.clone(), SqliteConnector::new(&dir), &config)?;
    let customer = router.resolve_and_run(&150, &GetCustomer::new(150)).await?;
    assert_eq!(customer.map(|c| c.name).as_deref(), Some("Contoso Ltd."));

    // Existing shards are not provisioned again.
    let allocator = ShardAllocator::new(map.clone(), SqliteProvisioner::new(&dir), config.clone())?
        .with_registry(registry);
    let allocation = allocator
        .allocate_shard_for_range(ShardRange::new(200, 300)?)
        .await?
        .into_mapping();
    assert_eq!(allocation.shard().location().database(), "ElasticScaleStarterKit_Shard2");

    let err = allocator
        .allocate_shard_for_range(ShardRange::new(50, 150)?)
        .await
        .expect_err("Range overlaps a loaded mapping");
    assert!(matches!(err, ShardMapError::RangeConflict { .. }));

    Ok(())
}
