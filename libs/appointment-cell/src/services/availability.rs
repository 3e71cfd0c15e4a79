// libs/appointment-cell/src/services/availability.rs
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};
use tracing::debug;

use shared_config::SchedulingConfig;
use shared_database::{DocumentStore, Filter};

use crate::models::{Appointment, AppointmentError, SlotWindow, APPOINTMENTS};

/// The clinic's slot grid: slot size, opening hours in local time and the
/// booking horizon. Every "is this a slot" decision goes through here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClinicCalendar {
    slot_seconds: i64,
    opening_seconds: i64,
    closing_seconds: i64,
    offset: FixedOffset,
    horizon: Duration,
}

impl ClinicCalendar {
    /// Inconsistent configs (zero-length slots, inverted hours) are
    /// replaced by the clinic defaults.
    pub fn new(config: &SchedulingConfig) -> Self {
        let config = config.checked();
        Self {
            slot_seconds: i64::from(config.slot_minutes) * 60,
            opening_seconds: i64::from(config.opening_hour) * 3600,
            closing_seconds: i64::from(config.closing_hour) * 3600,
            offset: FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix()),
            horizon: Duration::days(i64::from(config.booking_horizon_days)),
        }
    }

    pub fn slot_length(&self) -> Duration {
        Duration::seconds(self.slot_seconds)
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    fn local_seconds_of_day(&self, t: DateTime<Utc>) -> i64 {
        i64::from(t.with_timezone(&self.offset).num_seconds_from_midnight())
    }

    pub fn is_on_grid(&self, t: DateTime<Utc>) -> bool {
        t.nanosecond() == 0 && self.local_seconds_of_day(t) % self.slot_seconds == 0
    }

    /// The whole slot starting at `t` fits inside opening hours.
    pub fn is_within_hours(&self, t: DateTime<Utc>) -> bool {
        let start = self.local_seconds_of_day(t);
        start >= self.opening_seconds && start + self.slot_seconds <= self.closing_seconds
    }

    pub fn is_bookable_slot(&self, t: DateTime<Utc>) -> bool {
        self.is_on_grid(t) && self.is_within_hours(t)
    }

    pub fn is_within_horizon(&self, t: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        t >= now && t <= now + self.horizon
    }

    /// Earliest grid instant at or after `t`.
    pub fn align_up(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let truncated = t - Duration::nanoseconds(i64::from(t.nanosecond()));
        let remainder = self.local_seconds_of_day(truncated) % self.slot_seconds;
        if remainder == 0 && truncated == t {
            t
        } else {
            truncated + Duration::seconds(self.slot_seconds - remainder)
        }
    }
}

/// Lazy sequence of candidate slot starts inside a window. Cloning it
/// restarts from the clone point.
#[derive(Debug, Clone)]
pub struct SlotIter {
    calendar: ClinicCalendar,
    next: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Iterator for SlotIter {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next <= self.end {
            let candidate = self.next;
            self.next = candidate + self.calendar.slot_length();
            if self.calendar.is_within_hours(candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AvailabilityCalculator {
    calendar: ClinicCalendar,
}

impl AvailabilityCalculator {
    pub fn new(calendar: ClinicCalendar) -> Self {
        Self { calendar }
    }

    pub fn calendar(&self) -> &ClinicCalendar {
        &self.calendar
    }

    pub fn generate_slots(&self, window: SlotWindow) -> SlotIter {
        SlotIter {
            calendar: self.calendar,
            next: self.calendar.align_up(window.from),
            end: window.to,
        }
    }

    /// Grid for a doctor's calendar. The grid itself is the same for every
    /// doctor; the id only scopes the request.
    pub fn generate_slots_for(&self, doctor_id: &str, window: SlotWindow) -> SlotIter {
        debug!("Generating slots for doctor {} from {} to {}", doctor_id, window.from, window.to);
        self.generate_slots(window)
    }
}

/// Slot-picker view: free grid slots for a doctor inside the booking horizon.
/// Uses unguarded reads, so the result is advisory until `book` re-checks it.
pub struct AvailabilityService {
    store: Arc<dyn DocumentStore>,
    calculator: AvailabilityCalculator,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn DocumentStore>, config: &SchedulingConfig) -> Self {
        Self {
            store,
            calculator: AvailabilityCalculator::new(ClinicCalendar::new(config)),
        }
    }

    pub async fn available_slots(
        &self,
        doctor_id: &str,
        window: SlotWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, AppointmentError> {
        let calendar = self.calculator.calendar();
        let clamped = SlotWindow {
            from: window.from.max(now),
            to: window.to.min(now + calendar.horizon()),
        };
        if clamped.from > clamped.to {
            return Ok(Vec::new());
        }

        let booked: HashSet<DateTime<Utc>> = self
            .store
            .query(APPOINTMENTS, &[Filter::eq("doctor_id", doctor_id)])
            .await?
            .into_iter()
            .map(|doc| doc.decode::<Appointment>().map(|a| a.start))
            .collect::<Result<_, _>>()?;

        let free: Vec<DateTime<Utc>> = self
            .calculator
            .generate_slots_for(doctor_id, clamped)
            .filter(|slot| !booked.contains(slot))
            .collect();

        debug!("Doctor {} has {} free slots ({} booked)", doctor_id, free.len(), booked.len());
        Ok(free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn calculator() -> AvailabilityCalculator {
        AvailabilityCalculator::new(ClinicCalendar::new(&SchedulingConfig::default()))
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_single_day_grid() {
        let window = SlotWindow {
            from: at(2024, 6, 3, 0, 0),
            to: at(2024, 6, 3, 23, 59),
        };
        let slots: Vec<_> = calculator().generate_slots(window).collect();

        assert_eq!(slots.first(), Some(&at(2024, 6, 3, 8, 0)));
        assert_eq!(slots.last(), Some(&at(2024, 6, 3, 16, 30)));
        assert_eq!(slots.len(), 18);
        assert!(!slots.contains(&at(2024, 6, 3, 7, 30)));
        assert!(!slots.contains(&at(2024, 6, 3, 17, 0)));
    }

    #[test]
    fn test_every_slot_on_grid_and_in_hours() {
        let window = SlotWindow {
            from: at(2024, 6, 1, 5, 17),
            to: at(2024, 6, 8, 5, 17),
        };
        let slots: Vec<_> = calculator().generate_slots(window).collect();

        assert_eq!(slots.len(), 7 * 18);
        for slot in slots {
            assert!(slot.minute() == 0 || slot.minute() == 30);
            assert_eq!(slot.second(), 0);
            assert!(slot.hour() >= 8 && slot.hour() < 17);
        }
    }

    #[test]
    fn test_window_starting_mid_slot_aligns_up() {
        let window = SlotWindow {
            from: at(2024, 6, 3, 9, 10) + Duration::milliseconds(250),
            to: at(2024, 6, 3, 10, 30),
        };
        let slots: Vec<_> = calculator().generate_slots(window).collect();

        assert_eq!(
            slots,
            vec![at(2024, 6, 3, 9, 30), at(2024, 6, 3, 10, 0), at(2024, 6, 3, 10, 30)]
        );
    }

    #[test]
    fn test_empty_and_inverted_windows() {
        let instant = at(2024, 6, 3, 9, 15);
        let empty = SlotWindow { from: instant, to: instant };
        assert_eq!(calculator().generate_slots(empty).count(), 0);

        let inverted = SlotWindow {
            from: at(2024, 6, 3, 12, 0),
            to: at(2024, 6, 3, 9, 0),
        };
        assert_eq!(calculator().generate_slots(inverted).count(), 0);
    }

    #[test]
    fn test_zero_length_slots_fall_back_to_default_grid() {
        let calendar = ClinicCalendar::new(&SchedulingConfig {
            slot_minutes: 0,
            ..SchedulingConfig::default()
        });
        let window = SlotWindow {
            from: at(2024, 6, 3, 0, 0),
            to: at(2024, 6, 3, 23, 59),
        };

        assert_eq!(calendar.slot_length(), Duration::minutes(30));
        assert!(calendar.is_on_grid(at(2024, 6, 3, 9, 30)));
        assert_eq!(AvailabilityCalculator::new(calendar).generate_slots(window).count(), 18);
    }

    #[test]
    fn test_iterator_is_restartable() {
        let window = SlotWindow {
            from: at(2024, 6, 3, 0, 0),
            to: at(2024, 6, 4, 0, 0),
        };
        let mut slots = calculator().generate_slots(window);
        slots.next();
        let checkpoint = slots.clone();

        assert_eq!(slots.collect::<Vec<_>>(), checkpoint.collect::<Vec<_>>());
    }

    #[test]
    fn test_hours_follow_clinic_offset() {
        let config = SchedulingConfig {
            utc_offset_minutes: 60,
            ..SchedulingConfig::default()
        };
        let calendar = ClinicCalendar::new(&config);

        // 07:00 UTC is 08:00 at the clinic.
        assert!(calendar.is_bookable_slot(at(2024, 6, 3, 7, 0)));
        assert!(calendar.is_bookable_slot(at(2024, 6, 3, 15, 30)));
        assert!(!calendar.is_bookable_slot(at(2024, 6, 3, 16, 0)));
    }

    #[test]
    fn test_off_grid_instants_rejected() {
        let calendar = ClinicCalendar::new(&SchedulingConfig::default());

        assert!(calendar.is_bookable_slot(at(2024, 6, 3, 9, 0)));
        assert!(!calendar.is_bookable_slot(at(2024, 6, 3, 9, 15)));
        assert!(!calendar.is_bookable_slot(at(2024, 6, 3, 9, 0) + Duration::seconds(1)));
        assert!(!calendar.is_bookable_slot(at(2024, 6, 3, 7, 30)));
        assert!(!calendar.is_bookable_slot(at(2024, 6, 3, 17, 0)));
    }

    #[test]
    fn test_horizon_bounds() {
        let calendar = ClinicCalendar::new(&SchedulingConfig::default());
        let now = at(2024, 6, 1, 10, 0);

        assert!(calendar.is_within_horizon(now, now));
        assert!(calendar.is_within_horizon(now + Duration::days(7), now));
        assert!(!calendar.is_within_horizon(now + Duration::days(8), now));
        assert!(!calendar.is_within_horizon(now - Duration::minutes(30), now));
    }
}
