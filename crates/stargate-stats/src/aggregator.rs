use crate::error::StatsError;
use jiff::civil::Date;
use jiff::Timestamp;
use stargate_core::stats::stats_date;
use stargate_core::{FirstVisit, StatsEvent, StatsSink, VisitorTracker};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Folds click events into the aggregate tables.
#[derive(Clone)]
pub struct StatsAggregator {
    sink: Arc<dyn StatsSink>,
    visitors: Arc<dyn VisitorTracker>,
}

impl StatsAggregator {
    pub fn new(sink: Arc<dyn StatsSink>, visitors: Arc<dyn VisitorTracker>) -> Self {
        Self { sink, visitors }
    }

    /// Applies one event, bucketing the daily rollup by the current UTC day.
    pub async fn process(&self, event: &StatsEvent) -> Result<(), StatsError> {
        self.process_on(event, stats_date(Timestamp::now())).await
    }

    /// Applies one event as if `today` were the current day.
    ///
    /// The link totals, dimension rows and access log are always written.
    /// The `(link, date)` rollup only counts events from `today`.
    pub async fn process_on(&self, event: &StatsEvent, today: Date) -> Result<(), StatsError> {
        let first_visit = self.first_visit(event).await;
        let url = &event.full_short_url;

        let matched = self
            .sink
            .increment_link_totals(&event.gid, url, first_visit)
            .await?;
        if !matched {
            debug!(full_short_url = %url, gid = %event.gid, "no live link for stats event");
        }

        let date = event.date();
        if date == today {
            self.sink.upsert_today(url, date, first_visit).await?;
        } else {
            trace!(full_short_url = %url, %date, %today, "event is not from today, skipping rollup");
        }

        for row in event.dimension_rows() {
            self.sink.upsert_dimension(&row).await?;
        }
        self.sink.append_access_log(event).await?;
        Ok(())
    }

    /// A visit is first when the producer flagged it or the tracker has
    /// never seen the visitor. Tracker failures fall back to the flag.
    async fn first_visit(&self, event: &StatsEvent) -> FirstVisit {
        let url = &event.full_short_url;
        let mut first = event.first_visit;

        if !first.by_visitor && !event.visitor_id.is_empty() {
            match self.visitors.record_visitor(url, &event.visitor_id).await {
                Ok(seen_first) => first.by_visitor = seen_first,
                Err(err) => warn!(error = %err, full_short_url = %url, "visitor tracking failed"),
            }
        }
        if !first.by_ip && !event.ip.is_empty() {
            match self.visitors.record_ip(url, &event.ip).await {
                Ok(seen_first) => first.by_ip = seen_first,
                Err(err) => warn!(error = %err, full_short_url = %url, "ip tracking failed"),
            }
        }
        first
    }
}
