use anyhow::Result;
use madrona_store::{FileStore, JsonMarshaler, MemoryStore};
use madrona_tree::{
    Flow, MadronaTreeError, NodeFormat, Root, SieveNodeCache, Tree, TreeConfig, TreeOptions,
};

mod common;
use common::CountingStore;

#[tokio::test]
async fn a_flushed_tree_reloads_observationally_equal() -> Result<()> {
    let store = MemoryStore::new();
    let mut tree = Tree::<u64, String, _, _>::new(TreeConfig {
        store: store.clone(),
        marshaler: JsonMarshaler,
        cache: None,
    });
    for key in 0..300u64 {
        tree.insert(key, format!("value-{key}")).await?;
    }
    let root = tree.make_root().await?;
    assert!(root.link.is_some());
    assert_eq!(root.size, 300);

    let reloaded = root
        .load(TreeConfig {
            store,
            marshaler: JsonMarshaler,
            cache: Some(SieveNodeCache::shared(256)?),
        })
        .await?;
    assert_eq!(reloaded.size(), 300);
    assert_eq!(reloaded.height(), tree.height());
    for key in 0..300u64 {
        assert_eq!(reloaded.get(&key).await?, Some(format!("value-{key}")));
    }
    assert_eq!(reloaded.get(&300).await?, None);

    let mut count = 0u64;
    reloaded
        .iter(|_, _| {
            count += 1;
            Ok(Flow::Continue)
        })
        .await?;
    assert_eq!(count, 300);
    Ok(())
}

#[tokio::test]
async fn reflushing_a_persisted_tree_stores_nothing_new() -> Result<()> {
    let store = CountingStore::new();
    let mut tree = Tree::<u64, u64, _, _>::new(TreeConfig {
        store: store.clone(),
        marshaler: JsonMarshaler,
        cache: None,
    });
    for key in 0..100u64 {
        tree.insert(key, key).await?;
    }
    let first = tree.make_root().await?;
    let stored = store.stores();

    let second = tree.make_root().await?;
    assert_eq!(first, second);
    assert_eq!(store.stores(), stored);
    Ok(())
}

#[tokio::test]
async fn flushing_identical_content_produces_identical_roots() -> Result<()> {
    let store = MemoryStore::new();
    let mut first = Tree::<u64, u64, _, _>::new(TreeConfig {
        store: store.clone(),
        marshaler: JsonMarshaler,
        cache: None,
    });
    let mut second = Tree::<u64, u64, _, _>::new(TreeConfig {
        store: store.clone(),
        marshaler: JsonMarshaler,
        cache: None,
    });
    for key in 0..64u64 {
        first.insert(key, key).await?;
        second.insert(63 - key, 63 - key).await?;
    }
    assert_eq!(first.make_root().await?.link, second.make_root().await?.link);
    Ok(())
}

#[tokio::test]
async fn the_wrapper_format_round_trips() -> Result<()> {
    let store = MemoryStore::new();
    let mut tree = Tree::<u64, String, _, _>::with_options(
        TreeConfig {
            store: store.clone(),
            marshaler: JsonMarshaler,
            cache: None,
        },
        TreeOptions {
            node_format: NodeFormat::Wrapper,
            ..TreeOptions::default()
        },
    );
    for key in 0..40u64 {
        tree.insert(key, format!("w{key}")).await?;
    }
    let root = tree.make_root().await?;
    assert_eq!(root.node_format, NodeFormat::Wrapper);

    // Roots written before formats were tagged carry an empty tag; they must
    // attach the same way.
    let encoded = serde_json::to_string(&root)?.replace("\"wrapper\"", "\"\"");
    let legacy: Root = serde_json::from_str(&encoded)?;
    assert_eq!(legacy.node_format, NodeFormat::Wrapper);

    let reloaded = legacy
        .load(TreeConfig {
            store,
            marshaler: JsonMarshaler,
            cache: None,
        })
        .await?;
    for key in 0..40u64 {
        assert_eq!(reloaded.get(&key).await?, Some(format!("w{key}")));
    }
    Ok(())
}

#[tokio::test]
async fn trees_persist_through_a_file_store() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = FileStore::new(dir.path()).await?;
    let mut tree = Tree::<String, u64, _, _>::new(TreeConfig {
        store,
        marshaler: JsonMarshaler,
        cache: None,
    });
    for key in 0..50u64 {
        tree.insert(format!("key-{key:03}"), key).await?;
    }
    let root = tree.make_root().await?;

    let reloaded = root
        .load(TreeConfig {
            store: FileStore::new(dir.path()).await?,
            marshaler: JsonMarshaler,
            cache: None,
        })
        .await?;
    assert_eq!(reloaded.size(), 50);
    for key in 0..50u64 {
        assert_eq!(reloaded.get(&format!("key-{key:03}")).await?, Some(key));
    }
    Ok(())
}

#[tokio::test]
async fn a_shared_cache_absorbs_repeat_loads() -> Result<()> {
    let store = CountingStore::new();
    let mut tree = Tree::<u64, u64, _, _>::new(TreeConfig {
        store: store.clone(),
        marshaler: JsonMarshaler,
        cache: None,
    });
    for key in 0..200u64 {
        tree.insert(key, key).await?;
    }
    let root = tree.make_root().await?;

    let reloaded = root
        .load(TreeConfig {
            store: store.clone(),
            marshaler: JsonMarshaler,
            cache: Some(SieveNodeCache::<u64, u64>::shared(1024)?),
        })
        .await?;

    let key = 137u64;
    reloaded.get(&key).await?;
    let loads_after_first = store.loads();
    reloaded.get(&key).await?;
    assert_eq!(store.loads(), loads_after_first);
    Ok(())
}

#[tokio::test]
async fn attaching_with_the_wrong_layer_function_is_rejected() -> Result<()> {
    let store = MemoryStore::new();
    let mut tree = Tree::<u64, u64, _, _>::new(TreeConfig {
        store: store.clone(),
        marshaler: JsonMarshaler,
        cache: None,
    });
    // Seventeen entries spanning a layer-one key force the tree to grow.
    for key in 1..=17u64 {
        tree.insert(key, key).await?;
    }
    assert_eq!(tree.height(), 1);
    let mut root = tree.make_root().await?;

    // A different branch factor implies a different layer function, which
    // cannot have produced this root node.
    root.branch_factor = 7;
    let result = root
        .load(TreeConfig::<u64, u64, _, _> {
            store,
            marshaler: JsonMarshaler,
            cache: None,
        })
        .await;
    assert!(matches!(result, Err(MadronaTreeError::Contract(_))));
    Ok(())
}

#[tokio::test]
async fn a_failing_store_fails_the_flush_but_not_the_tree() -> Result<()> {
    use async_trait::async_trait;
    use madrona_store::{MadronaStoreError, StoreBackend};

    struct BrokenStore;

    #[async_trait]
    impl StoreBackend for BrokenStore {
        async fn store(&self, _name: &str, _bytes: Vec<u8>) -> Result<(), MadronaStoreError> {
            Err(MadronaStoreError::Backend("disk on fire".into()))
        }

        async fn load(&self, name: &str) -> Result<Vec<u8>, MadronaStoreError> {
            Err(MadronaStoreError::NotFound(name.to_owned()))
        }

        fn prefix(&self) -> String {
            "broken".into()
        }
    }

    let mut tree = Tree::<u64, u64, _, _>::new(TreeConfig {
        store: BrokenStore,
        marshaler: JsonMarshaler,
        cache: None,
    });
    for key in 0..10u64 {
        tree.insert(key, key).await?;
    }

    assert!(matches!(
        tree.make_root().await,
        Err(MadronaTreeError::Store(_))
    ));
    // The in-memory tree is still consistent and fully readable.
    assert!(tree.is_dirty());
    assert_eq!(tree.size(), 10);
    for key in 0..10u64 {
        assert_eq!(tree.get(&key).await?, Some(key));
    }
    Ok(())
}
