//! Off-peak window rules and start-time advice.
//!
//! Two pure functions drive the panel: the window message for the current
//! weekday, and whether the appliance should start now or be programmed to
//! start in N hours. Both are total over `hour` in 0..=23 and `weekday` in
//! 0..=6 and never fail.

use std::fmt;
use std::str::FromStr;

use crate::clock::LocalClock;

pub const DEFAULT_OFF_PEAK_START_HOUR: u32 = 22;
pub const DEFAULT_OFF_PEAK_END_HOUR: u32 = 7;
pub const DEFAULT_MAX_CYCLE_DURATION_HOURS: u32 = 4;

/// Shape of the off-peak window on a given weekday
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayWindow {
    /// From the start hour until the end hour the next morning
    Overnight,
    /// From the start hour, running into a full off-peak day
    EveningOnward,
    /// Off-peak all day
    AllDay,
}

/// Weekly tariff: Monday-Thursday overnight, Friday from the evening, weekend all day
pub const STANDARD_WEEK: [DayWindow; 7] = [
    DayWindow::Overnight,
    DayWindow::Overnight,
    DayWindow::Overnight,
    DayWindow::Overnight,
    DayWindow::EveningOnward,
    DayWindow::AllDay,
    DayWindow::AllDay,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub off_peak_start_hour: u32,
    pub off_peak_end_hour: u32,
    /// Longest appliance cycle; a cycle started at or before
    /// `off_peak_end_hour - max_cycle_duration_hours` still ends off-peak
    pub max_cycle_duration_hours: u32,
    pub week: [DayWindow; 7],
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            off_peak_start_hour: DEFAULT_OFF_PEAK_START_HOUR,
            off_peak_end_hour: DEFAULT_OFF_PEAK_END_HOUR,
            max_cycle_duration_hours: DEFAULT_MAX_CYCLE_DURATION_HOURS,
            week: STANDARD_WEEK,
        }
    }
}

/// Start advice for the current hour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAdvice {
    Now,
    /// Program a delayed start of this many hours
    InHours(u32),
}

impl ScheduleConfig {
    pub fn day_window(&self, weekday: u32) -> DayWindow {
        self.week[(weekday % 7) as usize]
    }

    /// Latest morning hour a cycle may start and still end off-peak.
    /// Negative when the cycle is longer than the morning window.
    pub fn latest_morning_start(&self) -> i64 {
        i64::from(self.off_peak_end_hour) - i64::from(self.max_cycle_duration_hours)
    }

    /// Longest delay `start_advice` can give, reached at the first hour
    /// after the morning threshold. Zero when no hour waits.
    pub fn longest_delay(&self) -> i64 {
        let first_waiting_hour = (self.latest_morning_start() + 1).max(0);
        let start = i64::from(self.off_peak_start_hour);
        if first_waiting_hour >= start {
            return 0;
        }
        start + i64::from(self.max_cycle_duration_hours) - first_waiting_hour
    }

    pub fn start_advice(&self, hour: u32, weekday: u32) -> StartAdvice {
        if hour >= self.off_peak_start_hour
            || i64::from(hour) <= self.latest_morning_start()
            || self.day_window(weekday) == DayWindow::AllDay
        {
            StartAdvice::Now
        } else {
            // hour < off_peak_start_hour here, so the count is at least 1
            StartAdvice::InHours(self.off_peak_start_hour + self.max_cycle_duration_hours - hour)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Fr,
}

impl Locale {
    pub fn phrasebook(self) -> &'static Phrasebook {
        match self {
            Locale::En => &ENGLISH,
            Locale::Fr => &FRENCH,
        }
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Locale::En),
            "fr" | "french" | "francais" | "français" => Ok(Locale::Fr),
            other => Err(format!("unsupported locale '{}' (expected en or fr)", other)),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locale::En => write!(f, "en"),
            Locale::Fr => write!(f, "fr"),
        }
    }
}

/// Every user-visible string, per locale
#[derive(Debug)]
pub struct Phrasebook {
    pub weekdays: [&'static str; 7],
    pub months: [&'static str; 12],
    pub after: &'static str,
    pub before: &'static str,
    pub all_day: &'static str,
    pub now: &'static str,
    pub start_in: &'static str,
    pub hour: &'static str,
    pub hours: &'static str,
    pub start_label: &'static str,
    pub schedule_label: &'static str,
}

pub static ENGLISH: Phrasebook = Phrasebook {
    weekdays: [
        "Monday",
        "Tuesday",
        "Wednesday",
        "Thursday",
        "Friday",
        "Saturday",
        "Sunday",
    ],
    months: [
        "January",
        "February",
        "March",
        "April",
        "May",
        "June",
        "July",
        "August",
        "September",
        "October",
        "November",
        "December",
    ],
    after: "after",
    before: "before",
    all_day: "all day",
    now: "now",
    start_in: "start in",
    hour: "hour",
    hours: "hours",
    start_label: "start",
    schedule_label: "schedule",
};

pub static FRENCH: Phrasebook = Phrasebook {
    weekdays: [
        "Lundi", "Mardi", "Mercredi", "Jeudi", "Vendredi", "Samedi", "Dimanche",
    ],
    months: [
        "janvier",
        "février",
        "mars",
        "avril",
        "mai",
        "juin",
        "juillet",
        "août",
        "septembre",
        "octobre",
        "novembre",
        "décembre",
    ],
    after: "après",
    before: "avant",
    all_day: "toute la journée",
    now: "maintenant",
    start_in: "dans",
    hour: "heure",
    hours: "heures",
    start_label: "démarrer",
    schedule_label: "programmer",
};

impl Phrasebook {
    pub fn window_message(&self, schedule: &ScheduleConfig, window: DayWindow) -> String {
        match window {
            DayWindow::Overnight => format!(
                "{} {}h, {} {}h",
                self.after, schedule.off_peak_start_hour, self.before, schedule.off_peak_end_hour
            ),
            DayWindow::EveningOnward => {
                format!("{} {}h", self.after, schedule.off_peak_start_hour)
            }
            DayWindow::AllDay => self.all_day.to_string(),
        }
    }

    pub fn start_message(&self, advice: StartAdvice) -> String {
        match advice {
            StartAdvice::Now => self.now.to_string(),
            StartAdvice::InHours(n) => {
                let unit = if n > 1 { self.hours } else { self.hour };
                format!("{} {} {}", self.start_in, n, unit)
            }
        }
    }

    /// Short verb shown above the start message
    pub fn imperative_label(&self, start_message: &str) -> &'static str {
        if start_message == self.now {
            self.start_label
        } else {
            self.schedule_label
        }
    }

    pub fn weekday_name(&self, weekday: u32) -> &'static str {
        self.weekdays[(weekday % 7) as usize]
    }

    /// `month` is 1-based
    pub fn month_name(&self, month: u32) -> &'static str {
        self.months[(month.clamp(1, 12) - 1) as usize]
    }
}

/// What the panel shows and what the notifier pushes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recommendation {
    pub window_message: String,
    pub start_message: String,
}

/// Schedule rules bound to a phrasebook
#[derive(Debug, Clone, Copy)]
pub struct SuggestionEngine {
    schedule: ScheduleConfig,
    phrasebook: &'static Phrasebook,
}

impl SuggestionEngine {
    pub fn new(schedule: ScheduleConfig, locale: Locale) -> Self {
        Self {
            schedule,
            phrasebook: locale.phrasebook(),
        }
    }

    pub fn schedule(&self) -> &ScheduleConfig {
        &self.schedule
    }

    pub fn phrasebook(&self) -> &'static Phrasebook {
        self.phrasebook
    }

    pub fn window_message(&self, weekday: u32) -> String {
        self.phrasebook
            .window_message(&self.schedule, self.schedule.day_window(weekday))
    }

    pub fn start_recommendation(&self, hour: u32, weekday: u32) -> String {
        self.phrasebook
            .start_message(self.schedule.start_advice(hour, weekday))
    }

    pub fn recommend(&self, clock: &LocalClock) -> Recommendation {
        Recommendation {
            window_message: self.window_message(clock.weekday),
            start_message: self.start_recommendation(clock.hour, clock.weekday),
        }
    }
}

impl Default for SuggestionEngine {
    fn default() -> Self {
        Self::new(ScheduleConfig::default(), Locale::En)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn schedule_strategy() -> impl Strategy<Value = ScheduleConfig> {
        (0u32..24, 1u32..24).prop_flat_map(|(start, max)| {
            (max..24).prop_map(move |end| ScheduleConfig {
                off_peak_start_hour: start,
                off_peak_end_hour: end,
                max_cycle_duration_hours: max,
                week: STANDARD_WEEK,
            })
        })
    }

    /// Schedules that pass configuration validation
    fn accepted_schedule_strategy() -> impl Strategy<Value = ScheduleConfig> {
        schedule_strategy().prop_filter("delay longer than a day", |s| s.longest_delay() <= 23)
    }

    proptest! {
        /// The advice is total and any delay is between 1 and 23 hours
        #[test]
        fn advice_total(schedule in accepted_schedule_strategy(), hour in 0u32..24, weekday in 0u32..7) {
            match schedule.start_advice(hour, weekday) {
                StartAdvice::Now => {}
                StartAdvice::InHours(n) => prop_assert!((1..=23).contains(&n), "delay {}", n),
            }
        }

        /// No hour waits longer than the advertised bound
        #[test]
        fn longest_delay_is_an_upper_bound(schedule in schedule_strategy(), hour in 0u32..24, weekday in 0u32..7) {
            if let StartAdvice::InHours(n) = schedule.start_advice(hour, weekday) {
                prop_assert!(i64::from(n) <= schedule.longest_delay());
            }
        }

        /// Weekend days always start now
        #[test]
        fn weekend_is_now(schedule in schedule_strategy(), hour in 0u32..24, weekday in 5u32..7) {
            prop_assert_eq!(schedule.start_advice(hour, weekday), StartAdvice::Now);
        }

        /// Hours at or past the off-peak start always start now
        #[test]
        fn evening_is_now(hour in 22u32..24, weekday in 0u32..7) {
            prop_assert_eq!(ScheduleConfig::default().start_advice(hour, weekday), StartAdvice::Now);
        }

        /// The message is one of the two sentinel shapes
        #[test]
        fn message_shape(hour in 0u32..24, weekday in 0u32..7) {
            let message = SuggestionEngine::default().start_recommendation(hour, weekday);
            prop_assert!(message == "now" || (message.starts_with("start in ") && message.contains("hour")));
        }

        /// Same inputs, same output
        #[test]
        fn recommendation_is_pure(hour in 0u32..24, weekday in 0u32..7) {
            let engine = SuggestionEngine::default();
            prop_assert_eq!(
                engine.start_recommendation(hour, weekday),
                engine.start_recommendation(hour, weekday)
            );
        }
    }
}

/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn default_advice_bounded() {
        let hour: u32 = kani::any();
        kani::assume(hour < 24);
        let weekday: u32 = kani::any();
        kani::assume(weekday < 7);

        if let StartAdvice::InHours(n) = ScheduleConfig::default().start_advice(hour, weekday) {
            kani::assert(n >= 1 && n <= 23, "delay must be between 1 and 23 hours");
        }
    }

    #[kani::proof]
    fn advice_never_overflows() {
        let start: u32 = kani::any();
        kani::assume(start < 24);
        let end: u32 = kani::any();
        kani::assume(end < 24);
        let max: u32 = kani::any();
        kani::assume(max >= 1 && max < 24);
        let hour: u32 = kani::any();
        kani::assume(hour < 24);
        let weekday: u32 = kani::any();
        kani::assume(weekday < 7);

        let schedule = ScheduleConfig {
            off_peak_start_hour: start,
            off_peak_end_hour: end,
            max_cycle_duration_hours: max,
            week: STANDARD_WEEK,
        };
        let _ = schedule.start_advice(hour, weekday);
    }
}
