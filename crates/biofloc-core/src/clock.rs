// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Biofloc Monitor.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Time handling.
//!
//! Storage instants are always UTC. The configured [`LocalOffset`] is applied only
//! at the edges: when a source hands us an offset-free wall-clock string, and when
//! an instant is shown to an operator. Every "now" comes from a [`Clock`], so
//! connectivity checks never mix naive and offset-aware values.

use crate::error::{CoreError, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeDelta, Utc};
use parking_lot::RwLock;
use std::fmt;

/// Source of the current instant
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.write();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Fixed wall-clock offset of the monitored site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalOffset(FixedOffset);

impl Default for LocalOffset {
    fn default() -> Self {
        Self::utc()
    }
}

impl LocalOffset {
    pub fn utc() -> Self {
        Self(Utc.fix())
    }

    /// Offset east of UTC in minutes (Chile standard time is -180)
    pub fn from_minutes(minutes: i32) -> Result<Self> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(Self)
            .ok_or(CoreError::InvalidOffset { minutes })
    }

    pub fn offset(&self) -> FixedOffset {
        self.0
    }

    pub fn minutes(&self) -> i32 {
        self.0.local_minus_utc() / 60
    }

    /// Wall-clock reading of a storage instant
    pub fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.0).naive_local()
    }

    /// Storage instant of a wall-clock reading taken at this offset
    pub fn local_to_utc(&self, wall_clock: NaiveDateTime) -> DateTime<Utc> {
        let shifted = wall_clock - TimeDelta::seconds(i64::from(self.0.local_minus_utc()));
        shifted.and_utc()
    }

    /// Current wall-clock time at this offset
    pub fn now_local(&self, clock: &dyn Clock) -> NaiveDateTime {
        self.to_local(clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn wall(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_offset_round_trip() {
        let chile = LocalOffset::from_minutes(-180).unwrap();
        let instant = chile.local_to_utc(wall(9, 30));
        assert_eq!(instant, Utc.with_ymd_and_hms(2025, 3, 10, 12, 30, 0).unwrap());
        assert_eq!(chile.to_local(instant), wall(9, 30));
        assert_eq!(chile.minutes(), -180);
    }

    #[test]
    fn test_invalid_offset_rejected() {
        assert!(matches!(
            LocalOffset::from_minutes(24 * 60),
            Err(CoreError::InvalidOffset { .. })
        ));
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(TimeDelta::seconds(90));
        assert_eq!(clock.now(), start + TimeDelta::seconds(90));

        let utc = LocalOffset::utc();
        assert_eq!(utc.now_local(&clock), clock.now().naive_utc());
    }
}
