use std::collections::BTreeSet;

use crate::types::{Event, Snapshot};

/// Compare the schedule key-sets of the previous and current snapshots and
/// emit discovery/removal events. Run after every successful fetch; on the
/// first fetch every schedule counts as newly discovered.
pub(crate) fn schedule_changes(previous: Option<&Snapshot>, current: &Snapshot) -> Vec<Event> {
    let previous_keys: BTreeSet<&str> = previous
        .and_then(|s| s.schedules())
        .map(|m| m.keys().map(String::as_str).collect())
        .unwrap_or_default();
    let current_keys: BTreeSet<&str> = current
        .schedules()
        .map(|m| m.keys().map(String::as_str).collect())
        .unwrap_or_default();

    let mut events = Vec::new();
    for key in current_keys.difference(&previous_keys) {
        events.push(Event::ScheduleAdded {
            key: (*key).to_string(),
        });
    }
    for key in previous_keys.difference(&current_keys) {
        events.push(Event::ScheduleRemoved {
            key: (*key).to_string(),
        });
    }
    events
}
