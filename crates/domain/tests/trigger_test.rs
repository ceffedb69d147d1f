use chrono::{Duration, TimeZone, Utc};

use scheduler_core::models::{CronDialect, ScheduleOption};
use scheduler_domain::trigger::next_trigger;

#[test]
fn test_fixed_rate_advances_by_exactly_one_interval() {
    let interval = Duration::milliseconds(1500);
    let option = ScheduleOption::fixed_rate(interval);
    let mut last = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    for step in 0..50 {
        // 当前时间随意变化，结果只由上次触发时间决定
        let now = last + Duration::seconds(step * 37);
        let next = next_trigger(&option, Some(last), None, now).unwrap();
        assert_eq!(next - last, interval);
        assert!(next >= last);
        last = next;
    }
}

#[test]
fn test_fixed_rate_catches_up_after_downtime() {
    let option = ScheduleOption::fixed_rate(Duration::seconds(10));
    let last = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let now = last + Duration::hours(1);

    let next = next_trigger(&option, Some(last), None, now).unwrap();
    assert!(next < now);
}

#[test]
fn test_fixed_delay_absorbs_runtime() {
    let option = ScheduleOption::fixed_delay(Duration::milliseconds(1000));
    let fired = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let completed = fired + Duration::milliseconds(2000);

    let next = next_trigger(&option, Some(fired), Some(completed), completed).unwrap();
    assert_eq!(next, fired + Duration::milliseconds(3000));
}

#[test]
fn test_cron_sequence_is_increasing() {
    let option = ScheduleOption::cron("0 */15 * * * *", CronDialect::Quartz);
    let mut last = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let now = last;

    for _ in 0..8 {
        let next = next_trigger(&option, Some(last), None, now).unwrap();
        assert_eq!(next - last, Duration::minutes(15));
        last = next;
    }
}
