#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};
use tsbs_report_ingest::{CacheConfig, LayoutConfig, LoaderConfig, WatchConfig};

pub const RUN_A: &str = "2024_0315_143022_main_scale100_cluster3_tsbs_query_wal1_replica2_dop8";
pub const RUN_B: &str = "2024_0316_090000_dev_scale100_cluster3_tsbs_query_wal1_replica2_dop8";

pub const RESULT_CSV: &str = "query_type,min_ms,mean_ms,max_ms,med_ms,worker\n\
                              cpu-max,1,2,3,2,8\n\
                              lastpoint,1,5,9,5,8\n";

pub fn write_run(base: &Path, name: &str, csv: &str) -> PathBuf {
    let run_dir = base.join(name);
    fs::create_dir_all(run_dir.join("query_result")).unwrap();
    fs::write(run_dir.join("query_result/TSBS_TEST_RESULT.csv"), csv).unwrap();
    fs::create_dir_all(run_dir.join("load_result")).unwrap();
    fs::write(
        run_dir.join("load_result/load.log"),
        "actually rate 1500000.00 rows/sec without ddl time\n",
    )
    .unwrap();

    run_dir
}

pub fn config(base: &Path, cache: Option<&Path>) -> LoaderConfig {
    LoaderConfig {
        layout: LayoutConfig {
            path: base.to_path_buf(),
            ..LayoutConfig::default()
        },
        watch: WatchConfig {
            enabled: true,
            create_settle_ms: 100,
            modify_settle_ms: 100,
        },
        cache: CacheConfig {
            enabled: cache.is_some(),
            path: cache.map(Path::to_path_buf).unwrap_or_default(),
            ..CacheConfig::default()
        },
        retention_days: None,
    }
}

/// poll until the condition holds or ten seconds passed
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);

    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }

    condition()
}
