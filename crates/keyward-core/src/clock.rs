//! Single source of "now", in both UTC and the configured civil zone.
//!
//! Every bug class this domain has seen in the wild comes from mixing naive
//! civil-zone values with aware UTC values — comparisons inside the store
//! happen in UTC, every human-facing computation (offsets, cron triggers,
//! "days until finish") happens in the civil zone. This module is the only
//! place allowed to convert between the two.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// The wall-clock zone every rule offset, cron trigger and day-count is
/// computed in. Fixed to Europe/Moscow for this system; never read from
/// configuration, since changing it would silently reinterpret every
/// `time_of_day` already stored on a notification rule.
pub const CIVIL_ZONE: Tz = chrono_tz::Europe::Moscow;

/// The authoritative notion of "now", available in both representations.
#[derive(Debug, Clone, Copy)]
pub struct Clock;

impl Clock {
    /// Current instant, in UTC. All store comparisons use this.
    pub fn now_utc() -> DateTime<Utc> {
        Utc::now()
    }

    /// Current instant, in the civil zone. All scheduling arithmetic and
    /// human-facing rendering uses this.
    pub fn now_civil() -> DateTime<Tz> {
        Utc::now().with_timezone(&CIVIL_ZONE)
    }

    /// Convert an aware instant to the value the store persists (always UTC
    /// — see `NotificationSchedule.planned_at` / `sent_at` in the data model).
    pub fn to_store(dt: DateTime<Tz>) -> DateTime<Utc> {
        dt.with_timezone(&Utc)
    }

    /// Upgrade a naive value that is *known* to already be expressed in the
    /// civil zone (e.g. a `time_of_day` read back from a rule row) into an
    /// aware civil-zone value.
    pub fn to_civil(naive: NaiveDateTime) -> DateTime<Tz> {
        CIVIL_ZONE
            .from_local_datetime(&naive)
            .single()
            .unwrap_or_else(|| CIVIL_ZONE.from_utc_datetime(&naive))
    }

    /// Upgrade a UTC instant to its civil-zone representation.
    pub fn utc_to_civil(dt: DateTime<Utc>) -> DateTime<Tz> {
        dt.with_timezone(&CIVIL_ZONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_and_civil_agree_on_the_same_instant() {
        let utc = Clock::now_utc();
        let civil = Clock::utc_to_civil(utc);
        assert_eq!(Clock::to_store(civil), utc);
    }

    #[test]
    fn to_civil_round_trips_through_store() {
        let civil = Clock::now_civil();
        let stored = Clock::to_store(civil);
        let back = Clock::utc_to_civil(stored);
        assert_eq!(civil.timestamp(), back.timestamp());
    }
}
