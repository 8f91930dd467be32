use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use duet_backend::{Backend, BackendExt, Collection};
use duet_types::Message;
use duet_types::api::{Query, format_datetime};

use crate::error::Result;

/// Messages older than this are removed when a chat is opened.
pub const RETENTION: Duration = Duration::hours(24);

const SWEEP_PAGE: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub deleted: usize,
    pub failed: usize,
}

pub fn cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - RETENTION
}

/// Delete every message of the relationship created before `now - 24h`,
/// together with its stored attachment. Deletes run one at a time; a failed
/// delete is logged and counted, never retried.
///
/// Only the initial listing can fail the sweep.
pub async fn sweep<B>(backend: &B, relationship_id: &str, now: DateTime<Utc>) -> Result<SweepReport>
where
    B: Backend + ?Sized,
{
    let expired = list_expired(backend, relationship_id, cutoff(now)).await?;
    let mut report = SweepReport {
        examined: expired.len(),
        ..SweepReport::default()
    };

    for message in &expired {
        if let Some(file_id) = message.stored_file_id() {
            if let Err(e) = backend.delete_file(&file_id).await {
                warn!("Retention: could not delete file {} of message {}: {}", file_id, message.id, e);
            }
        }

        match backend.delete_document(Collection::Messages, &message.id).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!("Retention: could not delete message {}: {}", message.id, e);
                report.failed += 1;
            }
        }
    }

    if report.examined > 0 {
        info!(
            "Retention: removed {} of {} expired messages ({} failed)",
            report.deleted, report.examined, report.failed
        );
    }
    Ok(report)
}

async fn list_expired<B>(backend: &B, relationship_id: &str, cutoff: DateTime<Utc>) -> Result<Vec<Message>>
where
    B: Backend + ?Sized,
{
    let cutoff = format_datetime(cutoff);
    let mut expired: Vec<Message> = Vec::new();

    loop {
        let mut queries = vec![
            Query::equal("relationshipId", relationship_id),
            Query::less_than("$createdAt", cutoff.as_str()),
            Query::order_asc("$createdAt"),
            Query::limit(SWEEP_PAGE),
        ];
        if let Some(last) = expired.last() {
            queries.push(Query::cursor_after(&last.id));
        }

        let page: Vec<Message> = backend.list_as(Collection::Messages, &queries).await?;
        let done = page.len() < SWEEP_PAGE as usize;
        debug!("Retention: fetched {} expired messages", page.len());
        expired.extend(page);
        if done {
            return Ok(expired);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn cutoff_is_a_day_back() {
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        assert_eq!(cutoff(now), Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
    }
}
