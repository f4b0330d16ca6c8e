//! LayeredStorage integration tests - the virtual filesystem over a stack
//! of disk layers and the listing index.

use anyhow::Result;
use std::sync::Arc;
use tempfile::TempDir;

use stratafs::config::DatabaseConfig;
use stratafs::fs::{LayeredStorage, StoreError};
use stratafs::layer::{DiskLayer, InventoryFilter, Layer, LayerManager};
use stratafs::storage::{DatabasePool, EntryType, ListingOperations, ListingStore};

async fn setup_pool() -> Result<DatabasePool> {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
    };
    let pool = DatabasePool::new(&config).await?;
    pool.run_migrations().await?;
    Ok(pool)
}

/// A store with a single open layer (id 1).
async fn setup_store() -> Result<(DatabasePool, LayerManager, TempDir)> {
    let pool = setup_pool().await?;
    let temp = tempfile::tempdir()?;
    let manager = LayerManager::new();
    let layer = DiskLayer::create(1, temp.path().join("1")).await?;
    manager.add_layer(Arc::new(layer))?;
    Ok((pool, manager, temp))
}

#[tokio::test]
async fn write_then_read_round_trips() -> Result<()> {
    let (pool, manager, _temp) = setup_store().await?;
    let storage = LayeredStorage::new(pool.pool(), &manager);

    storage.write("obj/data.bin", b"payload", Some("application/octet-stream")).await?;

    assert!(storage.file_exists("obj/data.bin").await?);
    assert_eq!(storage.read("obj/data.bin").await?, b"payload");
    Ok(())
}

#[tokio::test]
async fn read_of_unknown_path_fails_with_not_found() -> Result<()> {
    let (pool, manager, _temp) = setup_store().await?;
    let storage = LayeredStorage::new(pool.pool(), &manager);

    let err = storage.read("nothing/here.txt").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn read_falls_back_to_disk_for_files_without_records() -> Result<()> {
    let (pool, manager, _temp) = setup_store().await?;
    let layer = manager.top_layer()?;
    layer.write("ghost.txt", b"legacy").await?;

    let storage = LayeredStorage::new(pool.pool(), &manager);

    assert!(!storage.file_exists("ghost.txt").await?);
    assert_eq!(storage.read("ghost.txt").await?, b"legacy");
    Ok(())
}

#[tokio::test]
async fn read_to_string_rejects_invalid_utf8() -> Result<()> {
    let (pool, manager, _temp) = setup_store().await?;
    let storage = LayeredStorage::new(pool.pool(), &manager);

    storage.write("binary.dat", &[0xff, 0xfe, 0x00], None).await?;

    let err = storage.read_to_string("binary.dat").await.unwrap_err();
    assert!(matches!(err, StoreError::Encoding(_)));
    Ok(())
}

#[tokio::test]
async fn create_directories_materializes_records_and_disk_dirs() -> Result<()> {
    let (pool, manager, temp) = setup_store().await?;
    let storage = LayeredStorage::new(pool.pool(), &manager);

    storage.create_directories("a/b/c").await?;

    let listing = ListingOperations::new(pool.pool());
    assert_eq!(listing.find_layers_containing("a").await?, vec![1]);
    assert_eq!(listing.find_layers_containing("a/b").await?, vec![1]);
    assert_eq!(listing.find_layers_containing("a/b/c").await?, vec![1]);
    assert!(temp.path().join("1/a/b/c").is_dir());
    Ok(())
}

#[tokio::test]
async fn directory_is_empty_follows_the_visible_view() -> Result<()> {
    let (pool, manager, _temp) = setup_store().await?;
    let storage = LayeredStorage::new(pool.pool(), &manager);

    storage.create_directories("lonely").await?;
    assert!(storage.directory_is_empty("lonely").await?);

    storage.write("lonely/file.txt", b"x", None).await?;
    assert!(!storage.directory_is_empty("lonely").await?);
    Ok(())
}

#[tokio::test]
async fn newer_layer_wins_for_overwritten_paths() -> Result<()> {
    let pool = setup_pool().await?;
    let temp = tempfile::tempdir()?;
    let manager = LayerManager::new();
    let layer2 = Arc::new(DiskLayer::create(2, temp.path().join("2")).await?);
    manager.add_layer(layer2.clone())?;

    let storage = LayeredStorage::new(pool.pool(), &manager);
    storage.write("a/b/x", b"alpha", None).await?;

    layer2.seal();
    manager.add_layer(Arc::new(DiskLayer::create(3, temp.path().join("3")).await?))?;

    storage.write("a/b/x", b"beta", None).await?;

    assert_eq!(storage.read("a/b/x").await?, b"beta");

    let listing = ListingOperations::new(pool.pool());
    assert_eq!(listing.find_layers_containing("a/b/x").await?, vec![2, 3]);

    let children = storage.list_directory("a/b").await?;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].path, "a/b/x");
    assert_eq!(children[0].layer_id, 3);
    Ok(())
}

#[tokio::test]
async fn copy_file_into_imports_external_bytes() -> Result<()> {
    let (pool, manager, _temp) = setup_store().await?;
    let storage = LayeredStorage::new(pool.pool(), &manager);

    let external = tempfile::tempdir()?;
    let source = external.path().join("import.txt");
    tokio::fs::write(&source, b"imported").await?;

    storage.copy_file_into(&source, "obj/import.txt", Some("text/plain")).await?;

    assert_eq!(storage.read_to_string("obj/import.txt").await?, "imported");
    // The external source is untouched.
    assert!(source.is_file());
    Ok(())
}

#[tokio::test]
async fn copy_file_internal_reads_through_the_overlay() -> Result<()> {
    let (pool, manager, _temp) = setup_store().await?;
    let storage = LayeredStorage::new(pool.pool(), &manager);

    storage.write("src.txt", b"data", None).await?;
    storage.copy_file_internal("src.txt", "copy.txt").await?;

    assert_eq!(storage.read_to_string("copy.txt").await?, "data");
    assert_eq!(storage.read_to_string("src.txt").await?, "data");
    Ok(())
}

#[tokio::test]
async fn copy_directory_out_of_recreates_the_visible_tree() -> Result<()> {
    let (pool, manager, _temp) = setup_store().await?;
    let storage = LayeredStorage::new(pool.pool(), &manager);

    storage.create_directories("exp/sub").await?;
    storage.write("exp/root.txt", b"r", None).await?;
    storage.write("exp/sub/nested.txt", b"n", None).await?;

    let out = tempfile::tempdir()?;
    storage.copy_directory_out_of("exp", out.path()).await?;

    assert_eq!(std::fs::read_to_string(out.path().join("exp/root.txt"))?, "r");
    assert_eq!(std::fs::read_to_string(out.path().join("exp/sub/nested.txt"))?, "n");
    assert!(out.path().join("exp/sub").is_dir());
    Ok(())
}

#[tokio::test]
async fn move_directory_into_imports_records_and_inlines_inventories() -> Result<()> {
    let (pool, manager, temp) = setup_store().await?;
    let storage =
        LayeredStorage::with_inlining_filter(pool.pool(), &manager, Box::new(InventoryFilter));

    let staging = tempfile::tempdir()?;
    let object = staging.path().join("obj1");
    tokio::fs::create_dir_all(object.join("v1/content")).await?;
    tokio::fs::write(object.join("inventory.json"), b"{\"id\":1}").await?;
    tokio::fs::write(object.join("v1/content/data.txt"), b"payload").await?;

    storage.move_directory_into(&object, "objects/obj1").await?;

    // The staging copy is gone, the layer copy exists.
    assert!(!object.exists());
    assert!(temp.path().join("1/objects/obj1/v1/content/data.txt").is_file());

    assert_eq!(storage.read_to_string("objects/obj1/inventory.json").await?, "{\"id\":1}");
    assert_eq!(storage.read_to_string("objects/obj1/v1/content/data.txt").await?, "payload");

    let listing = ListingOperations::new(pool.pool());
    assert!(listing.is_content_inlined("objects/obj1/inventory.json").await?);
    assert!(!listing.is_content_inlined("objects/obj1/v1/content/data.txt").await?);

    // Directory records were synthesized for the tree and the parent chain.
    let records = listing.list_recursive("objects").await?;
    let mut paths: Vec<_> = records.iter().map(|r| r.path.clone()).collect();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            "objects/obj1",
            "objects/obj1/inventory.json",
            "objects/obj1/v1",
            "objects/obj1/v1/content",
            "objects/obj1/v1/content/data.txt",
        ]
    );
    assert_eq!(listing.find_layers_containing("objects").await?, vec![1]);

    let root_records = listing.get_records_by_path("objects/obj1").await?;
    assert_eq!(root_records[0].entry_type, EntryType::Directory);
    Ok(())
}

#[tokio::test]
async fn move_directory_internal_keeps_the_basename_beneath_the_destination() -> Result<()> {
    let (pool, manager, _temp) = setup_store().await?;
    let storage = LayeredStorage::new(pool.pool(), &manager);

    storage.create_directories("src/sub").await?;
    storage.write("src/sub/file.txt", b"data", None).await?;
    storage.create_directories("dst").await?;

    storage.move_directory_internal("src/sub", "dst").await?;

    assert_eq!(storage.read_to_string("dst/sub/file.txt").await?, "data");
    assert!(!storage.file_exists("src/sub/file.txt").await?);

    let listing = ListingOperations::new(pool.pool());
    assert!(listing.find_layers_containing("src/sub").await?.is_empty());
    assert_eq!(listing.find_layers_containing("dst/sub").await?, vec![1]);
    assert_eq!(listing.find_layers_containing("dst/sub/file.txt").await?, vec![1]);
    Ok(())
}

#[tokio::test]
async fn move_directory_internal_requires_the_source_in_the_top_layer() -> Result<()> {
    let pool = setup_pool().await?;
    let temp = tempfile::tempdir()?;
    let manager = LayerManager::new();
    let layer1 = Arc::new(DiskLayer::create(1, temp.path().join("1")).await?);
    manager.add_layer(layer1.clone())?;

    let storage = LayeredStorage::new(pool.pool(), &manager);
    storage.create_directories("a").await?;
    storage.write("a/file.txt", b"old", None).await?;

    layer1.seal();
    manager.add_layer(Arc::new(DiskLayer::create(2, temp.path().join("2")).await?))?;

    let err = storage.move_directory_internal("a", "b").await.unwrap_err();
    assert!(matches!(err, StoreError::InvariantViolation(_)));
    Ok(())
}

#[tokio::test]
async fn delete_directory_removes_tree_and_records() -> Result<()> {
    let (pool, manager, temp) = setup_store().await?;
    let storage = LayeredStorage::new(pool.pool(), &manager);

    storage.create_directories("gone/deep").await?;
    storage.write("gone/deep/file.txt", b"x", None).await?;

    storage.delete_directory("gone").await?;

    assert!(!temp.path().join("1/gone").exists());
    let listing = ListingOperations::new(pool.pool());
    assert!(listing.find_layers_containing("gone").await?.is_empty());
    assert!(listing.find_layers_containing("gone/deep").await?.is_empty());
    assert!(listing.find_layers_containing("gone/deep/file.txt").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn delete_directory_requires_the_tree_in_the_top_layer() -> Result<()> {
    let pool = setup_pool().await?;
    let temp = tempfile::tempdir()?;
    let manager = LayerManager::new();
    let layer1 = Arc::new(DiskLayer::create(1, temp.path().join("1")).await?);
    manager.add_layer(layer1.clone())?;

    let storage = LayeredStorage::new(pool.pool(), &manager);
    storage.create_directories("old").await?;
    storage.write("old/file.txt", b"x", None).await?;

    layer1.seal();
    manager.add_layer(Arc::new(DiskLayer::create(2, temp.path().join("2")).await?))?;

    let err = storage.delete_directory("old").await.unwrap_err();
    assert!(matches!(err, StoreError::InvariantViolation(_)));
    Ok(())
}

#[tokio::test]
async fn delete_file_purges_every_containing_layer() -> Result<()> {
    let pool = setup_pool().await?;
    let temp = tempfile::tempdir()?;
    let manager = LayerManager::new();
    let layer1 = Arc::new(DiskLayer::create(1, temp.path().join("1")).await?);
    manager.add_layer(layer1.clone())?;

    let storage = LayeredStorage::new(pool.pool(), &manager);
    storage.write("d/f.txt", b"one", None).await?;

    layer1.seal();
    let layer2 = Arc::new(DiskLayer::create(2, temp.path().join("2")).await?);
    manager.add_layer(layer2.clone())?;
    storage.write("d/f.txt", b"two", None).await?;

    storage.delete_file("d/f.txt").await?;

    assert!(!storage.file_exists("d/f.txt").await?);
    assert!(!layer1.file_exists("d/f.txt").await?);
    assert!(!layer2.file_exists("d/f.txt").await?);
    Ok(())
}

#[tokio::test]
async fn delete_empty_dirs_down_sweeps_deepest_first() -> Result<()> {
    let (pool, manager, _temp) = setup_store().await?;
    let storage = LayeredStorage::new(pool.pool(), &manager);

    storage.create_directories("tree/empty1/empty2").await?;
    storage.create_directories("tree/full").await?;
    storage.write("tree/full/keep.txt", b"k", None).await?;

    storage.delete_empty_dirs_down("tree").await?;

    let listing = ListingOperations::new(pool.pool());
    assert!(listing.find_layers_containing("tree/empty1/empty2").await?.is_empty());
    assert!(listing.find_layers_containing("tree/empty1").await?.is_empty());
    assert_eq!(listing.find_layers_containing("tree/full").await?, vec![1]);
    assert!(storage.file_exists("tree/full/keep.txt").await?);
    Ok(())
}

#[tokio::test]
async fn delete_empty_dirs_up_walks_ancestors_leaf_to_root() -> Result<()> {
    let (pool, manager, _temp) = setup_store().await?;
    let storage = LayeredStorage::new(pool.pool(), &manager);

    storage.create_directories("up/a/b").await?;
    storage.write("up/keep.txt", b"k", None).await?;

    storage.delete_empty_dirs_up("up/a/b/ghost.txt").await?;

    let listing = ListingOperations::new(pool.pool());
    assert!(listing.find_layers_containing("up/a/b").await?.is_empty());
    assert!(listing.find_layers_containing("up/a").await?.is_empty());
    assert_eq!(listing.find_layers_containing("up").await?, vec![1]);
    Ok(())
}
