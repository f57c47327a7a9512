//! Terrain unit tests

#[cfg(test)]
mod tests {
    use janet_claims::flags::{BUILD, ENTRY, ENTRY_MESSAGE, MESSAGE_LOCATION};
    use janet_claims::{
        Chunk, Coordinate, Flag, FlagTransformError, FlagType, Relation, Terrain, TerrainError,
        TerrainKind, TerrainLimits, WorldCoordinate,
    };
    use uuid::Uuid;

    fn c(x: f64, y: f64, z: f64) -> Coordinate {
        Coordinate::new(x, y, z)
    }

    fn make_terrain(world: Uuid) -> Terrain {
        Terrain::new(c(0.0, 0.0, 0.0), c(10.0, 10.0, 10.0), world)
    }

    // -----------------------------------------------------------------------
    // Corner normalization
    // -----------------------------------------------------------------------

    #[test]
    fn corners_are_normalized_in_either_order() {
        let world = Uuid::new_v4();
        let pairs = [
            (c(5.0, -3.0, 8.0), c(-2.0, 7.0, 1.0)),
            (c(0.0, 0.0, 0.0), c(0.0, 0.0, 0.0)),
            (c(-10.5, 64.0, 3.25), c(10.5, -64.0, -3.25)),
        ];
        for (a, b) in pairs {
            let forward = Terrain::new(a, b, world);
            let backward = Terrain::new(b, a, world);
            let (min, max) = (forward.min_diagonal(), forward.max_diagonal());
            assert!(min.x <= max.x && min.y <= max.y && min.z <= max.z);
            assert_eq!(min, backward.min_diagonal());
            assert_eq!(max, backward.max_diagonal());
        }
    }

    #[test]
    fn set_diagonals_normalizes() {
        let t = make_terrain(Uuid::new_v4());
        t.set_diagonals(c(20.0, 5.0, 20.0), c(15.0, 0.0, 15.0)).unwrap();
        assert_eq!(t.min_diagonal(), c(15.0, 0.0, 15.0));
        assert_eq!(t.max_diagonal(), c(20.0, 5.0, 20.0));
    }

    // -----------------------------------------------------------------------
    // Containment & overlap
    // -----------------------------------------------------------------------

    #[test]
    fn is_within_is_inclusive() {
        let t = make_terrain(Uuid::new_v4());
        assert!(t.is_within(&c(0.0, 0.0, 0.0)));
        assert!(t.is_within(&c(10.0, 10.0, 10.0)));
        assert!(t.is_within(&c(5.5, 2.0, 9.9)));
    }

    #[test]
    fn is_within_fails_on_any_axis() {
        let t = make_terrain(Uuid::new_v4());
        assert!(!t.is_within(&c(-0.1, 5.0, 5.0)));
        assert!(!t.is_within(&c(5.0, 10.1, 5.0)));
        assert!(!t.is_within(&c(5.0, 5.0, 11.0)));
    }

    #[test]
    fn is_within_world_checks_world() {
        let world = Uuid::new_v4();
        let t = make_terrain(world);
        assert!(t.is_within_world(&WorldCoordinate::at(world, 1.0, 1.0, 1.0)));
        assert!(!t.is_within_world(&WorldCoordinate::at(Uuid::new_v4(), 1.0, 1.0, 1.0)));
    }

    #[test]
    fn overlap_is_symmetric() {
        let world = Uuid::new_v4();
        let a = make_terrain(world);
        let b = Terrain::new(c(10.0, 10.0, 10.0), c(20.0, 20.0, 20.0), world);
        let far = Terrain::new(c(30.0, 0.0, 30.0), c(40.0, 10.0, 40.0), world);

        assert!(a.is_overlapping(&b));
        assert!(b.is_overlapping(&a));
        assert!(!a.is_overlapping(&far));
        assert!(!far.is_overlapping(&a));
    }

    #[test]
    fn no_overlap_across_worlds() {
        let a = make_terrain(Uuid::new_v4());
        let b = make_terrain(Uuid::new_v4());
        assert!(!a.is_overlapping(&b));
        assert!(!b.is_overlapping(&a));
    }

    #[test]
    fn world_wide_never_overlaps_but_contains_everything() {
        let world = Uuid::new_v4();
        let wide = Terrain::world_wide(world);
        let claim = make_terrain(world);

        assert!(!wide.is_overlapping(&claim));
        assert!(!claim.is_overlapping(&wide));
        assert!(wide.is_within(&c(1e12, -1e12, 0.0)));
        assert_eq!(wide.kind(), TerrainKind::WorldWide);
        assert_eq!(wide.priority(), i32::MAX);
        assert!(wide.area().is_infinite());
    }

    // -----------------------------------------------------------------------
    // Derived geometry
    // -----------------------------------------------------------------------

    #[test]
    fn area_counts_blocks_of_the_footprint() {
        let t = Terrain::new(c(0.0, 0.0, 0.0), c(9.0, 50.0, 4.0), Uuid::new_v4());
        assert_eq!(t.area(), 50.0);
    }

    #[test]
    fn borders_trace_the_rim() {
        let t = Terrain::new(c(0.0, 3.0, 0.0), c(2.0, 8.0, 2.0), Uuid::new_v4());
        let borders = t.borders();
        assert_eq!(borders.len(), 8);
        assert!(borders.iter().all(|b| b.y == 3.0));
        assert!(!borders.contains(&c(1.0, 3.0, 1.0)), "centre is not a border");
    }

    #[test]
    fn borders_empty_at_area_cap() {
        let limits = TerrainLimits {
            border_area_cap: 100,
            ..TerrainLimits::default()
        };
        let t = Terrain::with_limits(c(0.0, 0.0, 0.0), c(9.0, 0.0, 9.0), Uuid::new_v4(), limits);
        assert!(t.borders().is_empty());
    }

    #[test]
    fn chunks_cover_the_footprint() {
        let t = Terrain::new(c(0.0, 0.0, 0.0), c(31.0, 10.0, 15.0), Uuid::new_v4());
        let chunks: Vec<Chunk> = t.chunks().into_iter().collect();
        assert_eq!(chunks, vec![Chunk::new(0, 0), Chunk::new(1, 0)]);
    }

    #[test]
    fn chunks_floor_negative_coordinates() {
        let t = Terrain::new(c(-1.0, 0.0, -1.0), c(0.0, 0.0, 0.0), Uuid::new_v4());
        assert_eq!(t.chunks().len(), 4);
        assert!(t.chunks().contains(&Chunk::new(-1, -1)));
        assert_eq!(Chunk::of(-17.0, 16.0), Chunk::new(-2, 1));
    }

    #[test]
    fn chunks_empty_above_chunk_cap() {
        let limits = TerrainLimits {
            chunk_cap: 4,
            ..TerrainLimits::default()
        };
        let t = Terrain::with_limits(c(0.0, 0.0, 0.0), c(47.0, 0.0, 31.0), Uuid::new_v4(), limits);
        assert!(t.chunks().is_empty());
    }

    // -----------------------------------------------------------------------
    // World-wide restrictions
    // -----------------------------------------------------------------------

    #[test]
    fn world_wide_rejects_identity_changes() {
        let wide = Terrain::world_wide(Uuid::new_v4());
        assert!(matches!(
            wide.set_name("spawn"),
            Err(TerrainError::WorldWideImmutable { .. })
        ));
        assert!(matches!(
            wide.set_owner(Some(Uuid::new_v4())),
            Err(TerrainError::WorldWideImmutable { .. })
        ));
        assert!(matches!(
            wide.set_diagonals(c(0.0, 0.0, 0.0), c(1.0, 1.0, 1.0)),
            Err(TerrainError::WorldWideImmutable { .. })
        ));
        assert_eq!(wide.name(), janet_claims::terrain::WORLD_TERRAIN_NAME);
    }

    #[test]
    fn world_wide_accepts_priority_and_description() {
        let wide = Terrain::world_wide(Uuid::new_v4());
        wide.set_description(Some("the overworld".into()));
        wide.set_priority(3);
        assert_eq!(wide.description().as_deref(), Some("the overworld"));
        assert_eq!(wide.priority(), 3);
    }

    // -----------------------------------------------------------------------
    // Relations
    // -----------------------------------------------------------------------

    #[test]
    fn relation_of_reports_strongest_relation() {
        let t = make_terrain(Uuid::new_v4());
        let (owner, moderator, member, stranger) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        t.set_owner(Some(owner)).unwrap();
        assert!(t.add_moderator(moderator));
        assert!(t.add_member(member));
        assert!(t.add_member(owner));

        assert_eq!(t.relation_of(owner), Some(Relation::Owner));
        assert_eq!(t.relation_of(moderator), Some(Relation::Moderator));
        assert_eq!(t.relation_of(member), Some(Relation::Member));
        assert_eq!(t.relation_of(stranger), None);
        assert!(!t.has_any_relation(stranger));
    }

    #[test]
    fn relation_edits_report_changes() {
        let t = make_terrain(Uuid::new_v4());
        let actor = Uuid::new_v4();
        assert!(t.add_member(actor));
        assert!(!t.add_member(actor));
        assert!(t.remove_member(actor));
        assert!(!t.remove_member(actor));
        assert!(!t.remove_moderator(actor));
    }

    // -----------------------------------------------------------------------
    // Flags
    // -----------------------------------------------------------------------

    #[test]
    fn unset_flag_reads_default_on_bounded_terrain() {
        let t = make_terrain(Uuid::new_v4());
        assert_eq!(t.flags().get_data(&BUILD), Some(false));
        assert_eq!(t.flags().get_data(&ENTRY), Some(true));
        assert_eq!(t.flags().get_data(&MESSAGE_LOCATION), Some(1));
        assert_eq!(t.flags().get_explicit(&BUILD), None);
        assert!(!t.flags().is_set("build"));
    }

    #[test]
    fn unset_flag_is_absent_on_world_wide_terrain() {
        let wide = Terrain::world_wide(Uuid::new_v4());
        assert_eq!(wide.flags().get_data(&BUILD), None);
        wide.flags().put(&BUILD, true).unwrap();
        assert_eq!(wide.flags().get_data(&BUILD), Some(true));
    }

    #[test]
    fn put_returns_previous_value() {
        let t = make_terrain(Uuid::new_v4());
        assert_eq!(t.flags().put(&BUILD, true).unwrap(), None);
        assert_eq!(t.flags().put(&BUILD, false).unwrap(), Some(true));
        assert_eq!(t.flags().get_explicit(&BUILD), Some(false));
    }

    #[test]
    fn remove_restores_default() {
        let t = make_terrain(Uuid::new_v4());
        t.flags().put(&ENTRY_MESSAGE, "Welcome".to_string()).unwrap();
        assert_eq!(
            t.flags().remove(&ENTRY_MESSAGE).unwrap().as_deref(),
            Some("Welcome")
        );
        assert_eq!(t.flags().get_data(&ENTRY_MESSAGE), Some(String::new()));
        assert_eq!(t.flags().remove(&ENTRY_MESSAGE).unwrap(), None);
    }

    #[test]
    fn member_flags_never_fall_back_to_default() {
        let t = make_terrain(Uuid::new_v4());
        let member = Uuid::new_v4();
        assert_eq!(t.member_flags(member).get_data(&BUILD), None);

        t.member_flags(member).put(&BUILD, true).unwrap();
        assert_eq!(t.member_flags(member).get_data(&BUILD), Some(true));
        assert_eq!(t.flags().get_explicit(&BUILD), None);
        assert_eq!(t.members_with_flags(), vec![member]);

        t.member_flags(member).remove(&BUILD).unwrap();
        assert!(t.members_with_flags().is_empty());
    }

    #[test]
    fn put_rejects_value_that_encodes_to_something_else() {
        let ratio = Flag::new(
            "ratio",
            FlagType::Custom,
            0.5_f64,
            |input: &str| {
                input
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| FlagTransformError::new("not a number"))
            },
            |v: &f64| v.to_string(),
        )
        .unwrap();
        let t = make_terrain(Uuid::new_v4());

        let result = t.flags().put(&ratio, f64::NAN);
        assert!(matches!(result, Err(TerrainError::Unserializable { .. })));
        assert!(!t.flags().is_set("ratio"));
        assert_eq!(t.flags().get_data(&ratio), Some(0.5));

        assert_eq!(t.flags().put(&ratio, 0.25).unwrap(), None);
        assert_eq!(t.flags().get_explicit(&ratio), Some(0.25));
    }

    #[test]
    fn put_raw_rejects_mismatched_value() {
        let t = make_terrain(Uuid::new_v4());
        let result = t.flags().put_raw(&*BUILD, serde_json::json!("maybe"));
        assert!(matches!(result, Err(TerrainError::Unserializable { .. })));
        assert!(!t.flags().is_set("build"));
    }
}
