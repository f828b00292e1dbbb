use std::ops::RangeInclusive;

use crate::proto::Entry;
use crate::proto::EntryPayload;

/// Command entry whose payload is `cmd-{index}`
pub fn command_entry(
    index: u64,
    term: u64,
) -> Entry {
    Entry::new(index, term, EntryPayload::command(format!("cmd-{}", index)))
}

pub fn build_entries(
    range: RangeInclusive<u64>,
    term: u64,
) -> Vec<Entry> {
    range.map(|index| command_entry(index, term)).collect()
}
