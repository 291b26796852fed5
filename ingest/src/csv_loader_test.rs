use crate::csv_loader::{load, repaired, sniff_delimiter, strict};

#[test]
pub fn strict_reads_plain_csv() {
    let (strategy, table) = load(b"query_type,mean_ms\ncpu-max,12.5\ncpu-all,3\n").unwrap();

    assert_eq!(strategy, "strict");
    assert_eq!(table.headers, vec!["query_type", "mean_ms"]);
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[1], vec!["cpu-all", "3"]);
}

#[test]
pub fn strict_skips_blank_lines() {
    let table = strict(b"a,b\n1,2\n\n3,4\n").unwrap();

    assert_eq!(table.rows.len(), 2);
}

#[test]
pub fn semicolons_are_sniffed() {
    let (strategy, table) = load(b"query_type;mean_ms;min_ms\ncpu-max;12.5;1\n").unwrap();

    assert_eq!(strategy, "sniffed");
    assert_eq!(table.headers.len(), 3);
    assert_eq!(table.rows[0][1], "12.5");
}

#[test]
pub fn sniffing_prefers_comma_on_ties() {
    assert_eq!(sniff_delimiter("a,b;c\n"), b',');
    assert_eq!(sniff_delimiter("a\tb\tc\n"), b'\t');
    assert_eq!(sniff_delimiter("abc\n"), b',');
}

#[test]
pub fn latin1_is_reencoded() {
    let (strategy, table) = load(b"query_type,comment\ncpu-max,caf\xe9\n").unwrap();

    assert_eq!(strategy, "reencoded");
    assert_eq!(table.rows[0][1], "caf\u{e9}");
}

#[test]
pub fn long_rows_are_repaired() {
    let (strategy, table) = load(b"query_type,mean_ms\ncpu-max,1,extra\ncpu-all\n").unwrap();

    assert_eq!(strategy, "repaired");
    assert_eq!(table.rows[0], vec!["cpu-max", "1"]);
    assert_eq!(table.rows[1], vec!["cpu-all", ""]);
}

#[test]
pub fn header_only_is_no_table() {
    assert_eq!(load(b"query_type,mean_ms\n"), None);
    assert_eq!(load(b""), None);
    assert!(repaired(b"").is_none());
}
