use crate::{baseline::MetricBaseline, convert::parse_baseline_csv};

#[test]
pub fn tabular_upload() {
    let csv = "Scale,Cluster,Execution Type,Workers,Import Speed (rows/s),cpu-max-all-1,Double Groupby_All\n\
               100,3,query,8,1500000,12.5,\n\
               1000,1,insert,4,900000,20,33\n";

    let document = parse_baseline_csv(csv).unwrap();

    assert_eq!(document.len(), 2);
    let entry = &document["100_3_query_8"];
    assert_eq!(entry.import_speed, Some(1_500_000.0));
    assert_eq!(entry.metrics["cpu-max-all-1"], MetricBaseline::Legacy(12.5));
    assert!(!entry.metrics.contains_key("double-groupby-all"));
    assert_eq!(
        document["1000_1_insert_4"].metrics["double-groupby-all"],
        MetricBaseline::Legacy(33.0)
    );
}

#[test]
pub fn transposed_upload() {
    let csv = "metric,a,b\n\
               query,query,insert\n\
               3,3,1\n\
               100,100,1000\n\
               8,8,4\n\
               import_speed,1500000,900000\n\
               cpu-max-all-1,12.5,20\n";

    let document = parse_baseline_csv(csv).unwrap();

    assert_eq!(document.len(), 2);
    assert_eq!(document["100_3_query_8"].import_speed, Some(1_500_000.0));
    assert_eq!(
        document["1000_1_insert_4"].metrics["cpu-max-all-1"],
        MetricBaseline::Legacy(20.0)
    );
}

#[test]
pub fn labelled_transposed_upload() {
    let csv = "Execution Type,query\n\
               Cluster,3\n\
               Scale,100\n\
               Workers,8\n\
               lastpoint,4.5\n";

    let document = parse_baseline_csv(csv).unwrap();

    assert_eq!(
        document["100_3_query_8"].metrics["lastpoint"],
        MetricBaseline::Legacy(4.5)
    );
}

#[test]
pub fn broken_uploads() {
    assert!(parse_baseline_csv("").is_err());
    assert!(parse_baseline_csv("Scale,Cluster,Execution Type,Workers\nx,3,query,8\n").is_err());
    assert!(parse_baseline_csv("Scale,Cluster,Execution Type\n100,3,query\n").is_err());
}
