//! Screen-facing services that combine the API client, the TTL cache and
//! the clock.

use std::collections::BTreeMap;
use std::sync::Arc;

use campus_engine::aggregate::{
    buckets_from_stats, local_midnight, recent_window, resolve_daily_hours, stats_from_raw,
    total_hours,
};
use campus_engine::slots::quarter_hour_boundaries;
use campus_engine::{
    intervals_from_records, merge_slots, Clock, DailyBucket, DisplaySlot, HoursSource,
    LocationRecord, TtlCache,
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::http::ApiClient;
use crate::models::{raw_stats, slot_records, CreateSlotRequest, NewSlot, SlotDto, UserDto};

/// Cache key for the current user's merged slots.
pub const MY_SLOTS_KEY: &str = "slots:me";
/// Cache key for the authenticated user.
pub const ME_KEY: &str = "user:me";

/// Per-day hours for one user, with the path that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyHours {
    pub buckets: Vec<DailyBucket>,
    pub source: HoursSource,
}

impl DailyHours {
    pub fn total(&self) -> f64 {
        total_hours(&self.buckets)
    }
}

/// Daily logtime for a user, preferring server-side statistics.
pub struct HoursService {
    client: Arc<ApiClient>,
    cache: Arc<TtlCache>,
    clock: Arc<dyn Clock>,
}

impl HoursService {
    pub fn new(client: Arc<ApiClient>, cache: Arc<TtlCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            cache,
            clock,
        }
    }

    /// Hours per day over the last `days` days, today included.
    ///
    /// Served from the cache while fresh. Otherwise the stats endpoint is
    /// tried first; when it fails or reports no time, raw locations are
    /// fetched and aggregated.
    pub async fn daily_hours(&self, login: &str, days: u32) -> Result<DailyHours> {
        let tz = self.clock.time_zone();
        let (start, end) = recent_window(self.clock.today(), days);
        let key = format!("hours:{login}:{start}:{end}:{}", tz.name());

        if let Some(cached) = self.cache.get::<DailyHours>(&key).await {
            return Ok(cached);
        }

        let stats = self.fetch_stats(login, start, end).await?;
        // Only days inside the window count; the server may return others.
        let stats_total = stats
            .as_ref()
            .map_or(0.0, |s| total_hours(&buckets_from_stats(s, start, end)));

        let records = if stats_total > 0.0 {
            Vec::new()
        } else {
            self.fetch_locations(login, start, end).await?
        };
        let intervals = intervals_from_records(&records);
        let (buckets, source) = resolve_daily_hours(stats.as_ref(), &intervals, start, end, tz);
        debug!(login, ?source, days = buckets.len(), "daily hours resolved");

        let hours = DailyHours { buckets, source };
        if let Err(e) = self
            .cache
            .set(&key, &hours, self.client.config().cache_ttl())
            .await
        {
            warn!(error = %e, "could not cache daily hours");
        }
        Ok(hours)
    }

    /// `None` when the stats endpoint is unavailable. Authorization failures
    /// still propagate, since the raw path would fail the same way.
    async fn fetch_stats(
        &self,
        login: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<BTreeMap<NaiveDate, f64>>> {
        let path = format!("/v2/users/{login}/locations_stats");
        let query = vec![
            ("begin_at".to_string(), start.to_string()),
            ("end_at".to_string(), end.to_string()),
        ];
        match self.client.get::<serde_json::Value>(&path, &query).await {
            Ok(body) => Ok(Some(stats_from_raw(&raw_stats(&body)))),
            Err(ApiError::Unauthorized) => Err(ApiError::Unauthorized),
            Err(e) => {
                warn!(login, error = %e, "stats unavailable, falling back to locations");
                Ok(None)
            }
        }
    }

    /// Sessions that began between the day before the window and its end,
    /// plus any still-open session regardless of when it began. The two
    /// lists may overlap; [`intervals_from_records`] drops repeated ids.
    async fn fetch_locations(
        &self,
        login: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<LocationRecord>> {
        let tz = self.clock.time_zone();
        let from = local_midnight(tz, start) - chrono::Duration::days(1);
        let to = local_midnight(tz, end);
        let path = format!("/v2/users/{login}/locations");

        let range = vec![(
            "range[begin_at]".to_string(),
            format!("{},{}", rfc3339(from), rfc3339(to)),
        )];
        let mut records: Vec<LocationRecord> = self.client.get_all_pages(&path, &range).await?;

        let active = vec![("filter[active]".to_string(), "true".to_string())];
        let open: Vec<LocationRecord> = self.client.get_all_pages(&path, &active).await?;
        debug!(login, closed = records.len(), open = open.len(), "locations fetched");
        records.extend(open);
        Ok(records)
    }
}

/// The current user's evaluation slots.
pub struct SlotService {
    client: Arc<ApiClient>,
    cache: Arc<TtlCache>,
}

impl SlotService {
    pub fn new(client: Arc<ApiClient>, cache: Arc<TtlCache>) -> Self {
        Self { client, cache }
    }

    /// The authenticated user, cached.
    pub async fn me(&self) -> Result<UserDto> {
        if let Some(user) = self.cache.get::<UserDto>(ME_KEY).await {
            return Ok(user);
        }
        let user: UserDto = self.client.get("/v2/me", &[]).await?;
        if let Err(e) = self
            .cache
            .set(ME_KEY, &user, self.client.config().cache_ttl())
            .await
        {
            warn!(error = %e, "could not cache current user");
        }
        Ok(user)
    }

    /// Merged display runs for every slot the user has offered.
    pub async fn my_slots(&self) -> Result<Vec<DisplaySlot>> {
        if let Some(cached) = self.cache.get::<Vec<DisplaySlot>>(MY_SLOTS_KEY).await {
            return Ok(cached);
        }

        let dtos: Vec<SlotDto> = self.client.get_all_pages("/v2/me/slots", &[]).await?;
        let merged = merge_slots(&slot_records(&dtos));
        debug!(records = dtos.len(), runs = merged.len(), "slots merged");

        if let Err(e) = self
            .cache
            .set(MY_SLOTS_KEY, &merged, self.client.config().cache_ttl())
            .await
        {
            warn!(error = %e, "could not cache slots");
        }
        Ok(merged)
    }

    /// Offer the range `[begin, end)`, widened to the 15-minute grid.
    ///
    /// Sent once; a failure is returned for the user to retry explicitly.
    pub async fn create_slots(
        &self,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DisplaySlot>> {
        let grid = quarter_hour_boundaries(begin, end);
        let (Some(first), Some(last)) = (grid.first(), grid.last()) else {
            return Err(ApiError::InvalidInput(
                "slot range must end after it begins".to_string(),
            ));
        };

        let user = self.me().await?;
        let request = CreateSlotRequest {
            slot: NewSlot {
                user_id: user.id,
                begin_at: rfc3339(*first),
                end_at: rfc3339(*last),
            },
        };
        let created = self.client.post("/v2/slots", &request).await?;
        self.cache.remove(MY_SLOTS_KEY).await?;

        // The API answers with the list of 15-minute records it created.
        let dtos: Vec<SlotDto> = if created.is_array() {
            serde_json::from_value(created)?
        } else if created.is_object() {
            vec![serde_json::from_value(created)?]
        } else {
            Vec::new()
        };
        Ok(merge_slots(&slot_records(&dtos)))
    }

    /// Withdraw every record of a display run.
    pub async fn delete_slot(&self, slot: &DisplaySlot) -> Result<()> {
        if slot.is_reserved {
            return Err(ApiError::InvalidInput(
                "a booked slot cannot be withdrawn".to_string(),
            ));
        }
        let outcome = self.delete_ids(&slot.ids).await;
        // Some ids may be gone even if a later one failed.
        self.cache.remove(MY_SLOTS_KEY).await?;
        outcome
    }

    async fn delete_ids(&self, ids: &[i64]) -> Result<()> {
        for id in ids {
            self.client.delete(&format!("/v2/slots/{id}")).await?;
        }
        Ok(())
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
