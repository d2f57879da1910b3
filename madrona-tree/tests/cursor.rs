use anyhow::Result;
use madrona_store::{JsonMarshaler, MemoryStore};
use madrona_tree::{Tree, TreeConfig, TreeOptions};

fn small_branch_tree() -> Tree<u64, u64, JsonMarshaler, MemoryStore> {
    Tree::with_options(
        TreeConfig {
            store: MemoryStore::new(),
            marshaler: JsonMarshaler,
            cache: None,
        },
        TreeOptions {
            branch_factor: 4,
            ..TreeOptions::default()
        },
    )
}

#[tokio::test]
async fn an_empty_tree_has_no_entries_to_visit() -> Result<()> {
    let tree = Tree::<u64, u64, _, _>::in_memory();
    let mut cursor = tree.cursor().await?;
    cursor.min().await?;
    assert_eq!(cursor.get(), None);
    cursor.forward().await?;
    assert_eq!(cursor.get(), None);
    Ok(())
}

#[tokio::test]
async fn forward_visits_every_entry_in_ascending_order() -> Result<()> {
    let mut tree = small_branch_tree();
    for key in 0..50u64 {
        tree.insert(key, key * 10).await?;
    }

    let mut cursor = tree.cursor().await?;
    cursor.min().await?;
    let mut seen = vec![];
    while let Some((key, value)) = cursor.get() {
        assert_eq!(*value, key * 10);
        seen.push(*key);
        cursor.forward().await?;
    }
    assert_eq!(seen, (0..50).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn backward_visits_every_entry_in_descending_order() -> Result<()> {
    let mut tree = small_branch_tree();
    for key in 0..50u64 {
        tree.insert(key, key).await?;
    }

    let mut cursor = tree.cursor().await?;
    cursor.max().await?;
    let mut seen = vec![];
    while let Some((key, _)) = cursor.get() {
        seen.push(*key);
        cursor.backward().await?;
        if seen.len() > 60 {
            break;
        }
    }
    assert_eq!(seen, (0..50).rev().collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn ceil_lands_on_the_key_or_its_successor() -> Result<()> {
    let mut tree = small_branch_tree();
    for key in 0..50u64 {
        tree.insert(key * 2, key).await?;
    }

    let mut cursor = tree.cursor().await?;
    cursor.ceil(&40).await?;
    assert_eq!(cursor.get().map(|(key, _)| *key), Some(40));

    cursor = tree.cursor().await?;
    cursor.ceil(&41).await?;
    assert_eq!(cursor.get().map(|(key, _)| *key), Some(42));

    cursor = tree.cursor().await?;
    cursor.ceil(&0).await?;
    assert_eq!(cursor.get().map(|(key, _)| *key), Some(0));

    cursor = tree.cursor().await?;
    cursor.ceil(&99).await?;
    assert_eq!(cursor.get(), None);
    Ok(())
}

#[tokio::test]
async fn ceil_then_forward_continues_the_walk() -> Result<()> {
    let mut tree = small_branch_tree();
    for key in 0..30u64 {
        tree.insert(key, key).await?;
    }

    let mut cursor = tree.cursor().await?;
    cursor.ceil(&17).await?;
    let mut seen = vec![];
    while let Some((key, _)) = cursor.get() {
        seen.push(*key);
        cursor.forward().await?;
    }
    assert_eq!(seen, (17..30).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn min_and_max_find_the_extremes() -> Result<()> {
    let mut tree = small_branch_tree();
    for key in [33u64, 7, 90, 12, 64, 5, 88] {
        tree.insert(key, key).await?;
    }

    let mut cursor = tree.cursor().await?;
    cursor.min().await?;
    assert_eq!(cursor.get().map(|(key, _)| *key), Some(5));

    let mut cursor = tree.cursor().await?;
    cursor.max().await?;
    assert_eq!(cursor.get().map(|(key, _)| *key), Some(90));
    Ok(())
}

#[tokio::test]
async fn a_cursor_is_unaffected_by_later_mutation() -> Result<()> {
    let mut tree = small_branch_tree();
    for key in 0..20u64 {
        tree.insert(key, key).await?;
    }

    let mut cursor = tree.cursor().await?;
    tree.insert(1000, 1000).await?;
    tree.delete(&7, &7).await?;

    cursor.min().await?;
    let mut seen = vec![];
    while let Some((key, _)) = cursor.get() {
        seen.push(*key);
        cursor.forward().await?;
    }
    assert_eq!(seen, (0..20).collect::<Vec<_>>());
    Ok(())
}
