use crate::{dirname::parse, record::UNKNOWN_PHASE};
use chrono::NaiveDate;
use proptest::prelude::*;

#[test]
pub fn parse_strict_name() {
    let metadata =
        parse("2024_0315_143022_main_scale100_cluster3_tsbs_query_wal1_replica2_dop8").unwrap();

    assert_eq!(
        metadata.timestamp,
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(14, 30, 22)
            .unwrap()
    );
    assert_eq!(metadata.branch, "main");
    assert_eq!(metadata.scale, 100);
    assert_eq!(metadata.cluster, 3);
    assert_eq!(metadata.phase, "query");
    assert_eq!(metadata.test_type.as_deref(), Some("tsbs"));
    assert_eq!(metadata.wal.as_deref(), Some("wal1"));
    assert_eq!(metadata.replica, Some(2));
    assert_eq!(metadata.dop, 8);
}

#[test]
pub fn parse_branch_with_underscores() {
    let metadata =
        parse("2024_0101_000000_feature_x_y_scale10_cluster1_tsbs_load_wal2_replica1_dop4")
            .unwrap();

    assert_eq!(metadata.branch, "feature_x_y");
    assert_eq!(metadata.phase, "load");
}

#[test]
pub fn parse_fallback_name() {
    let metadata = parse("2024_0315_143022_dev_scale10_cluster1_something-odd_dop4").unwrap();

    assert_eq!(metadata.branch, "dev");
    assert_eq!(metadata.scale, 10);
    assert_eq!(metadata.cluster, 1);
    assert_eq!(metadata.dop, 4);
    assert_eq!(metadata.phase, UNKNOWN_PHASE);
    assert_eq!(metadata.test_type, None);
    assert_eq!(metadata.wal, None);
    assert_eq!(metadata.replica, None);
}

#[test]
pub fn reject_unrelated_names() {
    assert_eq!(parse("random_dir"), None);
    assert_eq!(parse(""), None);
    assert_eq!(parse("2024_0315_143022_main_scale100"), None);
}

#[test]
pub fn names_must_start_with_the_timestamp() {
    assert_eq!(
        parse("backup_of_2025_0601_120000_master_scale100_cluster1_x_dop4"),
        None
    );
    assert_eq!(
        parse("old-2024_0315_143022_main_scale100_cluster3_tsbs_query_wal1_replica2_dop8"),
        None
    );
    assert!(parse("2025_0601_120000_master_scale100_cluster1_x_dop4_copy").is_some());
}

#[test]
pub fn reject_impossible_dates() {
    assert_eq!(
        parse("2024_1345_143022_main_scale100_cluster3_tsbs_query_wal1_replica2_dop8"),
        None
    );
    assert_eq!(
        parse("2023_0229_000000_main_scale100_cluster3_tsbs_query_wal1_replica2_dop8"),
        None
    );
}

#[test]
pub fn reject_oversized_numbers() {
    assert_eq!(
        parse("2024_0315_143022_main_scale99999999999999999999_cluster3_tsbs_query_wal1_replica2_dop8"),
        None
    );
}

proptest! {
    #[test]
    fn parse_recovers_generated_names(
        day in 1u32..=28,
        month in 1u32..=12,
        hour in 0u32..24,
        branch in "[a-z][a-z0-9]{0,6}",
        scale in 1i64..100_000,
        cluster in 1i64..64,
        test_type in "[a-z]{1,6}[0-9]?",
        phase in "[a-z]{1,6}",
        wal in 0u32..10,
        replica in 0i64..8,
        dop in 1i64..128,
    ) {
        let name = format!(
            "2024_{month:02}{day:02}_{hour:02}0000_{branch}_scale{scale}_cluster{cluster}_{test_type}_{phase}_wal{wal}_replica{replica}_dop{dop}"
        );
        let metadata = parse(&name).unwrap();

        prop_assert_eq!(metadata.branch, branch);
        prop_assert_eq!(metadata.scale, scale);
        prop_assert_eq!(metadata.cluster, cluster);
        prop_assert_eq!(metadata.phase, phase);
        prop_assert_eq!(metadata.test_type, Some(test_type));
        prop_assert_eq!(metadata.replica, Some(replica));
        prop_assert_eq!(metadata.dop, dop);
        prop_assert_eq!(metadata.timestamp.date(), NaiveDate::from_ymd_opt(2024, month, day).unwrap());
    }

    #[test]
    fn parse_never_panics(name in "\\PC{0,80}") {
        let _ = parse(&name);
    }
}
