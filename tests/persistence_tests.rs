//! Persistence tests: record schema, stores, load and flush passes

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use janet_claims::flags::{BUILD, EFFECTS, PVP};
    use janet_claims::{
        ClaimsConfig, Coordinate, DirStore, Flag, FlagRegistry, FlagTransformError, FlagType,
        MemoryStore, PersistError, Terrain, TerrainIndex, TerrainRecord, TerrainStore,
    };
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Arc;
    use tokio_test::assert_ok;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Schedule {
        open: u8,
        close: u8,
    }

    fn schedule_flag() -> Flag<Schedule> {
        Flag::new(
            "schedule",
            FlagType::Custom,
            Schedule { open: 0, close: 24 },
            |input: &str| {
                let (open, close) = input
                    .split_once('-')
                    .ok_or_else(|| FlagTransformError::new("use <open>-<close>"))?;
                Ok(Schedule {
                    open: open.trim().parse().map_err(|_| FlagTransformError::new("bad hour"))?,
                    close: close.trim().parse().map_err(|_| FlagTransformError::new("bad hour"))?,
                })
            },
            |s: &Schedule| format!("{}-{}", s.open, s.close),
        )
        .unwrap()
    }

    fn registry() -> Arc<FlagRegistry> {
        let registry = FlagRegistry::new();
        registry.register(schedule_flag()).unwrap();
        Arc::new(registry)
    }

    fn c(x: f64, y: f64, z: f64) -> Coordinate {
        Coordinate::new(x, y, z)
    }

    fn raw_record(id: Uuid, flags: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": id,
            "name": "imported",
            "created": "2024-05-01T12:00:00Z",
            "world": Uuid::new_v4(),
            "priority": 2,
            "min_x": 0.0, "min_y": 0.0, "min_z": 0.0,
            "max_x": 4.0, "max_y": 4.0, "max_z": 4.0,
            "flags": flags,
        }))
        .unwrap()
    }

    /// Store whose writes always fail.
    struct ReadOnlyStore;

    impl TerrainStore for ReadOnlyStore {
        fn list(&self) -> Result<Vec<String>, PersistError> {
            Ok(Vec::new())
        }
        fn read(&self, _key: &str) -> Result<Bytes, PersistError> {
            Err(PersistError::Invalid {
                reason: "empty".into(),
            })
        }
        fn write(&self, _id: Uuid, _data: Bytes) -> Result<(), PersistError> {
            Err(PersistError::Invalid {
                reason: "read-only".into(),
            })
        }
        fn delete(&self, _id: Uuid) -> Result<(), PersistError> {
            Ok(())
        }
        fn quarantine(&self, _key: &str) -> Result<(), PersistError> {
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Round-trip through a directory
    // -----------------------------------------------------------------------

    #[test]
    fn terrain_round_trips_through_dir_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClaimsConfig {
            data_dir: dir.path().to_path_buf(),
            ..ClaimsConfig::default()
        };
        let schedule = schedule_flag();
        let world = Uuid::new_v4();
        let (owner, moderator, member) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let original = {
            let store = Arc::new(DirStore::new(dir.path()));
            let index = TerrainIndex::with_registry(config.clone(), store, registry());
            let t = Arc::new(Terrain::new(c(-3.5, 0.0, 7.0), c(12.0, 64.0, -2.0), world));
            t.set_name("bakery").unwrap();
            t.set_description(Some("fresh bread".into()));
            t.set_priority(6);
            t.set_owner(Some(owner)).unwrap();
            t.add_moderator(moderator);
            t.add_member(member);
            t.flags().put(&BUILD, false).unwrap();
            t.flags().put(&schedule, Schedule { open: 8, close: 18 }).unwrap();
            t.flags().put(&EFFECTS, EFFECTS.transform("speed=1").unwrap()).unwrap();
            t.member_flags(member).put(&PVP, true).unwrap();
            assert!(index.add(Arc::clone(&t)));

            let report = index.shutdown();
            assert_eq!(report.written, 1);
            assert_eq!(report.failed, 0);
            t
        };
        assert!(dir.path().join(format!("{}.json", original.id())).exists());

        let index = TerrainIndex::with_registry(
            config.clone(),
            Arc::new(DirStore::new(dir.path())),
            registry(),
        );
        let report = assert_ok!(index.load());
        assert_eq!(report.loaded, 1);
        assert_eq!(report.quarantined, 0);
        assert_eq!(index.stats().pending_saves, 0);

        let loaded = index.by_id(original.id()).unwrap();
        assert!(loaded.is_managed());
        assert_eq!(loaded.name(), "bakery");
        assert_eq!(loaded.description().as_deref(), Some("fresh bread"));
        assert_eq!(loaded.priority(), 6);
        assert_eq!(loaded.world(), world);
        assert_eq!(loaded.min_diagonal(), original.min_diagonal());
        assert_eq!(loaded.max_diagonal(), original.max_diagonal());
        assert_eq!(loaded.creation_date(), original.creation_date());
        assert_eq!(loaded.owner(), Some(owner));
        assert_eq!(loaded.moderators(), original.moderators());
        assert_eq!(loaded.members(), original.members());
        assert_eq!(loaded.flags().snapshot(), original.flags().snapshot());
        assert_eq!(
            loaded.flags().get_data(&schedule),
            Some(Schedule { open: 8, close: 18 })
        );
        assert_eq!(loaded.member_flags(member).get_data(&PVP), Some(true));
    }

    #[test]
    fn load_of_missing_directory_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("terrains");
        let index = TerrainIndex::open(ClaimsConfig {
            data_dir: data_dir.clone(),
            ..ClaimsConfig::default()
        });
        let report = assert_ok!(index.load());
        assert_eq!(report.loaded, 0);
        assert!(data_dir.is_dir());
    }

    // -----------------------------------------------------------------------
    // Broken records
    // -----------------------------------------------------------------------

    #[test]
    fn undecodable_files_are_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{ not json").unwrap();
        let good = Uuid::new_v4();
        std::fs::write(
            dir.path().join(format!("{good}.json")),
            raw_record(good, json!([])),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let index = TerrainIndex::open(ClaimsConfig {
            data_dir: dir.path().to_path_buf(),
            ..ClaimsConfig::default()
        });
        let report = assert_ok!(index.load());

        assert_eq!(report.loaded, 1);
        assert_eq!(report.quarantined, 1);
        assert!(!dir.path().join("broken.json").exists());
        assert!(dir.path().join("broken.json.invalid").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(index.by_id(good).map(|t| t.priority()), Some(2));
    }

    #[test]
    fn record_missing_bounds_is_quarantined() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw(
            "partial.json",
            serde_json::to_vec(&json!({ "id": Uuid::new_v4(), "name": "x" })).unwrap(),
        );
        let index = TerrainIndex::new(ClaimsConfig::default(), store.clone());
        let report = assert_ok!(index.load());
        assert_eq!(report.quarantined, 1);
        assert_eq!(store.quarantined(), vec!["partial.json".to_string()]);
        assert!(store.is_empty());
    }

    #[test]
    fn ill_typed_flags_are_dropped_unknown_flags_kept() {
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        store.insert_raw(
            MemoryStore::key_of(id),
            raw_record(
                id,
                json!([
                    { "id": "build", "value": "yes" },
                    { "id": "pvp", "value": true },
                    { "id": "from_other_plugin", "value": { "level": 3 } },
                ]),
            ),
        );

        let index = TerrainIndex::new(ClaimsConfig::default(), store);
        let report = assert_ok!(index.load());
        assert_eq!(report.loaded, 1);
        assert_eq!(report.dropped_flags, 1);

        let t = index.by_id(id).unwrap();
        assert!(!t.flags().is_set("build"));
        assert_eq!(t.flags().get_explicit(&PVP), Some(true));
        assert_eq!(
            t.flags().get_raw("from_other_plugin"),
            Some(json!({ "level": 3 }))
        );
    }

    // -----------------------------------------------------------------------
    // Record encoding
    // -----------------------------------------------------------------------

    #[test]
    fn encoding_is_deterministic_and_omits_empty_sections() {
        let t = Terrain::new(c(0.0, 0.0, 0.0), c(1.0, 1.0, 1.0), Uuid::new_v4());
        for _ in 0..8 {
            t.add_member(Uuid::new_v4());
        }
        t.flags().put(&PVP, true).unwrap();
        t.flags().put(&BUILD, false).unwrap();

        let first = TerrainRecord::capture(&t).encode().unwrap();
        let second = TerrainRecord::capture(&t).encode().unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first).unwrap();
        assert!(!text.contains("member_flags"));
        assert!(!text.contains("moderators"));
        assert!(!text.contains("owner"));
        assert!(text.find("\"build\"") < text.find("\"pvp\""));
    }

    #[test]
    fn record_decode_restore_round_trip() {
        let t = Terrain::new(c(0.0, 0.0, 0.0), c(3.0, 3.0, 3.0), Uuid::new_v4());
        t.flags().put(&BUILD, true).unwrap();
        let bytes = TerrainRecord::capture(&t).encode().unwrap();
        let record = TerrainRecord::decode(&bytes).unwrap();
        assert_eq!(record, TerrainRecord::capture(&t));

        let (restored, dropped) = record
            .restore(&FlagRegistry::new(), Default::default())
            .unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(restored.id(), t.id());
        assert!(!restored.is_managed());
        assert_eq!(restored.flags().get_explicit(&BUILD), Some(true));
    }

    #[test]
    fn fractional_bounds_keep_every_bit() {
        let first = c(-9905569.655657787, 0.1 + 0.2, 1.0 / 3.0);
        let second = c(29999999.123456789, 318.00000000000006, -2.0 / 3.0);
        let t = Arc::new(Terrain::new(first, second, Uuid::new_v4()));

        let store = Arc::new(MemoryStore::new());
        let writer = TerrainIndex::new(ClaimsConfig::default(), store.clone());
        writer.add(Arc::clone(&t));
        assert_eq!(writer.flush().written, 1);

        let reader = TerrainIndex::new(ClaimsConfig::default(), store);
        assert_ok!(reader.load());
        let restored = reader.by_id(t.id()).unwrap();

        let bits = |p: Coordinate| [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
        assert_eq!(bits(restored.min_diagonal()), bits(t.min_diagonal()));
        assert_eq!(bits(restored.max_diagonal()), bits(t.max_diagonal()));
    }

    // -----------------------------------------------------------------------
    // Flush pass
    // -----------------------------------------------------------------------

    #[test]
    fn unchanged_records_are_not_rewritten() {
        let store = Arc::new(MemoryStore::new());
        let index = TerrainIndex::new(ClaimsConfig::default(), store.clone());
        let t = Arc::new(Terrain::new(c(0.0, 0.0, 0.0), c(1.0, 1.0, 1.0), Uuid::new_v4()));
        index.add(Arc::clone(&t));
        assert_eq!(index.flush().written, 1);

        let name = t.name();
        t.set_name("temporary").unwrap();
        t.set_name(name).unwrap();
        assert_eq!(index.stats().pending_saves, 1);

        let report = index.flush();
        assert_eq!(report.written, 0);
        assert_eq!(report.unchanged, 1);

        t.set_name("changed").unwrap();
        assert_eq!(index.flush().written, 1);
        let stored = TerrainRecord::decode(&store.get(t.id()).unwrap()).unwrap();
        assert_eq!(stored.name, "changed");
    }

    #[test]
    fn removed_terrains_are_deleted() {
        let store = Arc::new(MemoryStore::new());
        let index = TerrainIndex::new(ClaimsConfig::default(), store.clone());
        let t = Arc::new(Terrain::new(c(0.0, 0.0, 0.0), c(1.0, 1.0, 1.0), Uuid::new_v4()));
        index.add(Arc::clone(&t));
        index.flush();
        assert_eq!(store.len(), 1);

        index.remove(t.id());
        let report = index.flush();
        assert_eq!(report.deleted, 1);
        assert!(store.get(t.id()).is_none());
        assert_eq!(index.stats().pending_deletions, 0);
    }

    #[test]
    fn failed_writes_stay_pending() {
        let index = TerrainIndex::new(ClaimsConfig::default(), Arc::new(ReadOnlyStore));
        index.add(Arc::new(Terrain::new(
            c(0.0, 0.0, 0.0),
            c(1.0, 1.0, 1.0),
            Uuid::new_v4(),
        )));

        let report = index.flush();
        assert_eq!(report.failed, 1);
        assert_eq!(report.written, 0);
        assert_eq!(index.stats().pending_saves, 1);
    }

    #[test]
    fn dir_store_delete_of_missing_record_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path());
        assert_ok!(store.delete(Uuid::new_v4()));
    }
}
