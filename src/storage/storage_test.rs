use super::*;
use crate::proto::LogId;
use crate::test_utils::build_entries;

fn log_terms(log: &MemRaftLog) -> Vec<u64> {
    log.get_entries_range(1..=log.last_entry_id())
        .unwrap()
        .iter()
        .map(|e| e.term)
        .collect()
}

/// # Case 1: plain append after a matched prev_log_index
#[test]
fn test_filter_out_conflicts_and_append_case1() {
    let log = MemRaftLog::new();
    log.append(build_entries(1..=2, 1)).unwrap();

    let last = log.filter_out_conflicts_and_append(2, build_entries(3..=4, 1)).unwrap();

    assert_eq!(last, 4);
    assert_eq!(log.last_log_id(), LogId::new(1, 4));
}

/// # Case 2: duplicated entries are skipped, nothing is truncated
#[test]
fn test_filter_out_conflicts_and_append_case2() {
    let log = MemRaftLog::new();
    log.append(build_entries(1..=5, 1)).unwrap();

    let last = log.filter_out_conflicts_and_append(1, build_entries(2..=3, 1)).unwrap();

    // A stale, shorter request must not cut the longer local log
    assert_eq!(last, 3);
    assert_eq!(log.last_entry_id(), 5);
}

/// # Case 3: follower holds a divergent suffix from an old leader
///
/// ## Setup:
/// follower log terms: [1, 1, 2, 2, 2]
/// leader sends prev=2 with entries of term 3 at 3..=4
///
/// ## Criterias:
/// 1. indices 3..=5 of term 2 are removed
/// 2. log becomes [1, 1, 3, 3]
#[test]
fn test_filter_out_conflicts_and_append_case3() {
    let log = MemRaftLog::new();
    log.append(build_entries(1..=2, 1)).unwrap();
    log.append(build_entries(3..=5, 2)).unwrap();

    let last = log.filter_out_conflicts_and_append(2, build_entries(3..=4, 3)).unwrap();

    assert_eq!(last, 4);
    assert_eq!(log_terms(&log), vec![1, 1, 3, 3]);
}

/// # Case 4: heartbeat with no entries returns prev_log_index
#[test]
fn test_filter_out_conflicts_and_append_case4() {
    let log = MemRaftLog::new();
    log.append(build_entries(1..=3, 1)).unwrap();

    let last = log.filter_out_conflicts_and_append(2, vec![]).unwrap();

    assert_eq!(last, 2);
    assert_eq!(log.last_entry_id(), 3);
}

/// # Case 5: entries already covered by the snapshot are ignored
#[test]
fn test_filter_out_conflicts_and_append_case5() {
    let log = MemRaftLog::new();
    log.append(build_entries(1..=4, 1)).unwrap();
    log.truncate_prefix(LogId::new(1, 3)).unwrap();

    let last = log.filter_out_conflicts_and_append(1, build_entries(2..=5, 1)).unwrap();

    assert_eq!(last, 5);
    assert_eq!(log.first_entry_id(), 4);
    assert_eq!(log.last_entry_id(), 5);
}
