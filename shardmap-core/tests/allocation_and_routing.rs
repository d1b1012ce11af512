use std::sync::Arc;
use std::time::Duration;

use shardmap_core::test_utils::{Get, Insert, Locate, MemConnector, MemError, MemProvisioner, Upsert};
use shardmap_core::{
    CreateStatus,
    RetryPolicy,
    ShardAllocator,
    ShardLocation,
    ShardMapConfig,
    ShardMapError,
    ShardMapManager,
    ShardMapStatistics,
    ShardRange,
    ShardRouter,
    ShardSource,
};

static MAP_NAME: &str = "CustomerIDShardMap";

fn config() -> ShardMapConfig {
    ShardMapConfig::default()
        .with_map_name(MAP_NAME)
        .with_server_name("sql-1")
        .with_shard_name_format("Customers_Shard{}")
        .with_retry_policy(
            RetryPolicy::new(3).with_backoff(Duration::from_millis(1), Duration::from_millis(2)),
        )
}

#[tokio::test]
async fn test_allocate_then_route() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let config = config();
    let manager = ShardMapManager::default();
    let (map, status) = manager.get_or_create_range_shard_map::<i64>(config.map_name())?;
    assert_eq!(status, CreateStatus::Created);

    let statistics = ShardMapStatistics::default();
    let provisioner = MemProvisioner::default();
    let allocator = ShardAllocator::new(map.clone(), provisioner.clone(), config.clone())?
        .with_statistics(statistics.clone());

    for i in 0..3 {
        let allocation = allocator
            .allocate_shard_for_range(ShardRange::new(i * 100, (i + 1) * 100)?)
            .await?;
        assert!(matches!(allocation.source(), ShardSource::Provisioned { .. }));
        assert_eq!(
            allocation.mapping().shard().location(),
            &ShardLocation::new("sql-1", format!("Customers_Shard{i}")),
        );
    }
    assert_eq!(provisioner.database_names("sql-1").len(), 3);
    assert_eq!(map.max_high(), Some(300));

    // A second handle to the same map sees everything the allocator did.
    let (map, status) = manager.get_or_create_range_shard_map::<i64>(config.map_name())?;
    assert_eq!(status, CreateStatus::AlreadyExisted);

    let router = ShardRouter::new(map, MemConnector::default(), &config)?
        .with_statistics(statistics.clone());

    for (key, expected) in [(0, 0), (99, 0), (100, 1), (250, 2), (299, 2)] {
        let location = router.resolve_and_run(&key, &Locate).await?;
        assert_eq!(location.database(), format!("Customers_Shard{expected}"));
    }

    let err = router
        .resolve_and_run(&300, &Locate)
        .await
        .expect_err("Key is beyond the last range");
    assert!(matches!(err, ShardMapError::KeyNotMapped { .. }));

    // Allocating the missing range makes the key routable.
    allocator
        .allocate_shard_for_range(ShardRange::new(300, 400)?)
        .await?;
    let location = router.resolve_and_run(&300, &Locate).await?;
    assert_eq!(location.database(), "Customers_Shard3");

    assert_eq!(statistics.num_mappings_created(), 4);
    assert_eq!(statistics.num_databases_created(), 4);
    assert_eq!(statistics.num_requests_routed(), 6);
    assert_eq!(statistics.num_keys_not_mapped(), 1);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_routing() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let config = config();
    let manager = ShardMapManager::default();
    let (map, _) = manager.get_or_create_range_shard_map::<i64>(config.map_name())?;

    let allocator = ShardAllocator::new(map.clone(), MemProvisioner::default(), config.clone())?;
    allocator
        .allocate_shard_for_range(ShardRange::new(0, 500)?)
        .await?;
    allocator
        .allocate_shard_for_range(ShardRange::new(500, 1000)?)
        .await?;

    let connector = MemConnector::default();
    connector.inject_faults(MemError::Throttled, 2);
    let router = Arc::new(ShardRouter::new(map, connector, &config)?);

    let mut tasks = Vec::new();
    for key in 0..100i64 {
        let router = router.clone();
        tasks.push(tokio::spawn(async move {
            let customer = key * 10;
            router
                .resolve_and_run(&customer, &Upsert::new(customer, format!("customer-{customer}")))
                .await
        }));
    }

    for task in tasks {
        task.await?.expect("Upsert should succeed within the retry budget");
    }

    let first = router
        .connector()
        .rows(&ShardLocation::new("sql-1", "Customers_Shard0"));
    let second = router
        .connector()
        .rows(&ShardLocation::new("sql-1", "Customers_Shard1"));
    assert_eq!(first.len(), 50);
    assert_eq!(second.len(), 50);
    assert!(first.keys().all(|key| *key < 500));
    assert!(second.keys().all(|key| *key >= 500));

    let value = router.resolve_and_run(&990, &Get::new(990)).await?;
    assert_eq!(value.as_deref(), Some("customer-990"));

    Ok(())
}

#[tokio::test]
async fn test_non_idempotent_insert_surfaces_constraint_violation() -> anyhow::Result<()> {
    let config = config();
    let manager = ShardMapManager::default();
    let (map, _) = manager.get_or_create_range_shard_map::<i64>(config.map_name())?;

    let allocator = ShardAllocator::new(map.clone(), MemProvisioner::default(), config.clone())?;
    allocator
        .allocate_shard_for_range(ShardRange::new(0, 100)?)
        .await?;

    let router = ShardRouter::new(map, MemConnector::default(), &config)?;
    router.resolve_and_run(&7, &Insert::new(7, "first")).await?;

    let err = router
        .resolve_and_run(&7, &Insert::new(7, "second"))
        .await
        .expect_err("Duplicate insert should fail");
    assert!(matches!(err, ShardMapError::PermanentFailure(_)));
    assert_eq!(router.statistics().num_attempts(), 2);

    Ok(())
}
