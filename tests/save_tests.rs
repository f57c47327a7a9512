//! Background save scheduler tests

#![cfg(feature = "server")]

#[cfg(test)]
mod tests {
    use janet_claims::{ClaimsConfig, Coordinate, MemoryStore, Terrain, TerrainIndex};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::runtime::Handle;
    use uuid::Uuid;

    fn make_index(delay_ms: u64) -> (TerrainIndex, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = ClaimsConfig {
            save_delay_ms: delay_ms,
            ..ClaimsConfig::default()
        };
        (TerrainIndex::new(config, store.clone()), store)
    }

    fn make_terrain() -> Arc<Terrain> {
        Arc::new(Terrain::new(
            Coordinate::new(0.0, 0.0, 0.0),
            Coordinate::new(4.0, 4.0, 4.0),
            Uuid::new_v4(),
        ))
    }

    /// Poll `check` for up to two seconds.
    async fn eventually(check: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn dirty_terrains_are_saved_after_delay() {
        let (index, store) = make_index(20);
        index.start(Handle::current());

        let t = make_terrain();
        index.add(Arc::clone(&t));
        assert!(store.get(t.id()).is_none(), "nothing written before the delay");

        assert!(eventually(|| store.get(t.id()).is_some()).await);
        assert!(eventually(|| index.stats().pending_saves == 0).await);
    }

    #[tokio::test]
    async fn changes_during_a_cycle_get_a_follow_up_cycle() {
        let (index, store) = make_index(20);
        index.start(Handle::current());

        let t = make_terrain();
        index.add(Arc::clone(&t));
        assert!(eventually(|| store.get(t.id()).is_some()).await);

        t.set_name("second pass").unwrap();
        assert!(
            eventually(|| {
                store
                    .get(t.id())
                    .and_then(|bytes| janet_claims::TerrainRecord::decode(&bytes).ok())
                    .is_some_and(|record| record.name == "second pass")
            })
            .await
        );
    }

    #[tokio::test]
    async fn removals_are_deleted_in_background() {
        let (index, store) = make_index(20);
        index.start(Handle::current());

        let t = make_terrain();
        index.add(Arc::clone(&t));
        assert!(eventually(|| store.get(t.id()).is_some()).await);

        index.remove(t.id());
        assert!(eventually(|| store.get(t.id()).is_none()).await);
        assert!(eventually(|| index.stats().pending_deletions == 0).await);
    }

    #[tokio::test]
    async fn nothing_is_saved_before_start() {
        let (index, store) = make_index(10);
        index.add(make_terrain());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.is_empty());
        assert_eq!(index.stats().pending_saves, 1);

        index.start(Handle::current());
        assert!(eventually(|| !store.is_empty()).await);
    }

    #[tokio::test]
    async fn shutdown_flushes_synchronously() {
        let (index, store) = make_index(60_000);
        index.start(Handle::current());

        let t = make_terrain();
        index.add(Arc::clone(&t));
        let report = index.shutdown();

        assert_eq!(report.written, 1);
        assert!(store.get(t.id()).is_some());
        assert_eq!(index.stats().pending_saves, 0);
    }
}
