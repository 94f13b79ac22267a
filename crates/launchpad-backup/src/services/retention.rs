use chrono::{Duration, NaiveDateTime};
use launchpad_core::{BackupRecord, RetentionPolicy};

/// Backups that `policy` no longer keeps at `now`, oldest first.
///
/// With no policy nothing expires. Records whose name does not carry a readable timestamp
/// are never selected.
pub fn expired(
    records: &[BackupRecord],
    policy: Option<RetentionPolicy>,
    now: NaiveDateTime,
) -> Vec<BackupRecord> {
    let Some(policy) = policy else {
        return Vec::new();
    };

    let mut dated: Vec<(NaiveDateTime, &BackupRecord)> = records
        .iter()
        .filter_map(|r| r.created_at().map(|at| (at, r)))
        .collect();
    // Newest first
    dated.sort_by(|a, b| b.0.cmp(&a.0));
    dated.dedup_by(|a, b| a.1.timestamp_id == b.1.timestamp_id);

    let mut doomed: Vec<BackupRecord> = match policy {
        RetentionPolicy::Count(keep) => dated
            .into_iter()
            .skip(keep)
            .map(|(_, r)| r.clone())
            .collect(),
        RetentionPolicy::MaxAgeDays(days) => {
            // A window reaching past the calendar's range expires nothing
            let Some(cutoff) = now.checked_sub_signed(Duration::days(days as i64)) else {
                return Vec::new();
            };
            dated
                .into_iter()
                .filter(|(at, _)| *at < cutoff)
                .map(|(_, r)| r.clone())
                .collect()
        }
    };
    doomed.reverse();
    doomed
}
