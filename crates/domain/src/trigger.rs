//! 触发时间计算
//!
//! 纯函数：根据调度配置和历史触发/反馈时间计算下一次触发时刻。
//! 各调度类型的计算器通过 [`ScheduleKind`] 查表获得，不做隐式默认。

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use tracing::debug;

use scheduler_core::models::{CronDialect, ScheduleKind, ScheduleOption};
use scheduler_core::{SchedulerError, SchedulerResult};

/// 永不触发时返回的时刻
pub const NEVER_TRIGGER_AT: DateTime<Utc> = DateTime::<Utc>::MAX_UTC;

/// 下一次触发时间计算器
pub trait TriggerCalculator: Send + Sync {
    fn kind(&self) -> ScheduleKind;

    fn next_trigger(
        &self,
        option: &ScheduleOption,
        last_trigger_at: Option<DateTime<Utc>>,
        last_feedback_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<DateTime<Utc>>;
}

/// 首次触发时刻：开始时间（缺省为当前时间）加初始延迟
fn first_trigger(option: &ScheduleOption, now: DateTime<Utc>) -> DateTime<Utc> {
    after_or_never(option.start_time().unwrap_or(now), option.delay())
}

/// 超出可表示的时间范围时视为永不触发
fn after_or_never(base: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    base.checked_add_signed(delta).unwrap_or(NEVER_TRIGGER_AT)
}

pub struct NeverTrigger;

impl TriggerCalculator for NeverTrigger {
    fn kind(&self) -> ScheduleKind {
        ScheduleKind::Never
    }

    fn next_trigger(
        &self,
        _option: &ScheduleOption,
        _last_trigger_at: Option<DateTime<Utc>>,
        _last_feedback_at: Option<DateTime<Utc>>,
        _now: DateTime<Utc>,
    ) -> SchedulerResult<DateTime<Utc>> {
        Ok(NEVER_TRIGGER_AT)
    }
}

/// 固定频率：只依赖上次触发时间，不考虑执行耗时
///
/// 进程长时间停机后会连续补触发，不做合并。
pub struct FixedRateTrigger;

impl TriggerCalculator for FixedRateTrigger {
    fn kind(&self) -> ScheduleKind {
        ScheduleKind::FixedRate
    }

    fn next_trigger(
        &self,
        option: &ScheduleOption,
        last_trigger_at: Option<DateTime<Utc>>,
        _last_feedback_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<DateTime<Utc>> {
        Ok(match last_trigger_at {
            Some(last) => after_or_never(last, option.interval()),
            None => first_trigger(option, now),
        })
    }
}

/// 固定延迟：从上次执行完成（反馈）开始计算间隔
pub struct FixedDelayTrigger;

impl TriggerCalculator for FixedDelayTrigger {
    fn kind(&self) -> ScheduleKind {
        ScheduleKind::FixedDelay
    }

    fn next_trigger(
        &self,
        option: &ScheduleOption,
        last_trigger_at: Option<DateTime<Utc>>,
        last_feedback_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<DateTime<Utc>> {
        Ok(match (last_feedback_at, last_trigger_at) {
            (Some(feedback), _) => after_or_never(feedback, option.interval()),
            (None, Some(last)) => after_or_never(last, option.interval()),
            (None, None) => first_trigger(option, now),
        })
    }
}

pub struct CronTrigger;

impl TriggerCalculator for CronTrigger {
    fn kind(&self) -> ScheduleKind {
        ScheduleKind::Cron
    }

    fn next_trigger(
        &self,
        option: &ScheduleOption,
        last_trigger_at: Option<DateTime<Utc>>,
        _last_feedback_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<DateTime<Utc>> {
        let expr = option
            .cron_expression()
            .ok_or_else(|| SchedulerError::schedule_config("CRON调度缺少表达式"))?;
        let schedule = parse_cron(expr, option.cron_dialect())?;

        let mut base = last_trigger_at.map_or(now, |last| last.max(now));
        if let Some(start) = option.start_time() {
            // 开始时间本身也可以命中
            let before_start = start
                .checked_sub_signed(Duration::milliseconds(1))
                .unwrap_or(start);
            if before_start > base {
                base = before_start;
            }
        }

        let next = schedule.after(&base).next().unwrap_or(NEVER_TRIGGER_AT);
        debug!("CRON表达式 {} 在 {} 之后的下一次触发时间: {}", expr, base, next);
        Ok(next)
    }
}

static CALCULATORS: LazyLock<HashMap<ScheduleKind, Box<dyn TriggerCalculator>>> =
    LazyLock::new(|| {
        let calculators: Vec<Box<dyn TriggerCalculator>> = vec![
            Box::new(NeverTrigger),
            Box::new(FixedRateTrigger),
            Box::new(FixedDelayTrigger),
            Box::new(CronTrigger),
        ];
        calculators.into_iter().map(|c| (c.kind(), c)).collect()
    });

/// 查找调度类型对应的计算器
pub fn calculator_for(kind: ScheduleKind) -> SchedulerResult<&'static dyn TriggerCalculator> {
    CALCULATORS
        .get(&kind)
        .map(|c| c.as_ref())
        .ok_or_else(|| SchedulerError::InvalidScheduleKind(kind.to_string()))
}

/// 计算下一次触发时刻
pub fn next_trigger(
    option: &ScheduleOption,
    last_trigger_at: Option<DateTime<Utc>>,
    last_feedback_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SchedulerResult<DateTime<Utc>> {
    calculator_for(option.kind())?.next_trigger(option, last_trigger_at, last_feedback_at, now)
}

/// 按字符串类型名计算，未知类型直接报错
pub fn next_trigger_for_kind(
    kind: &str,
    option: &ScheduleOption,
    last_trigger_at: Option<DateTime<Utc>>,
    last_feedback_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SchedulerResult<DateTime<Utc>> {
    let kind = ScheduleKind::from_str(kind)?;
    if kind != option.kind() {
        return Err(SchedulerError::InvalidScheduleKind(format!(
            "{} 与配置类型 {} 不一致",
            kind,
            option.kind()
        )));
    }
    next_trigger(option, last_trigger_at, last_feedback_at, now)
}

/// 发布前校验调度配置，CRON表达式在此处解析
pub fn validate_option(option: &ScheduleOption) -> SchedulerResult<()> {
    option.validate()?;
    if let (ScheduleKind::Cron, Some(expr)) = (option.kind(), option.cron_expression()) {
        parse_cron(expr, option.cron_dialect())
            .map_err(|e| SchedulerError::schedule_config(e.to_string()))?;
    }
    Ok(())
}

/// 解析CRON表达式，统一转换为秒级（6/7段）格式
pub fn parse_cron(expr: &str, dialect: CronDialect) -> SchedulerResult<CronSchedule> {
    let normalized = normalize_cron(expr, dialect)?;
    CronSchedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        message: e.to_string(),
    })
}

const UNIX_WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn normalize_cron(expr: &str, dialect: CronDialect) -> SchedulerResult<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let invalid = |message: &str| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        message: message.to_string(),
    };

    let fields: Vec<String> = match dialect {
        CronDialect::Unix => {
            if fields.len() != 5 {
                return Err(invalid("UNIX方言需要5个字段"));
            }
            let mut normalized = vec!["0".to_string()];
            normalized.extend(fields[..4].iter().map(|f| f.to_string()));
            normalized.push(unix_weekday_field(fields[4]).ok_or_else(|| invalid("周字段无效"))?);
            normalized
        }
        CronDialect::Quartz => {
            if fields.len() != 6 && fields.len() != 7 {
                return Err(invalid("QUARTZ方言需要6或7个字段"));
            }
            fields.iter().map(|f| f.to_string()).collect()
        }
    };

    Ok(fields
        .into_iter()
        .map(|f| if f == "?" { "*".to_string() } else { f })
        .collect::<Vec<_>>()
        .join(" "))
}

/// UNIX周字段的数字（0-7）换成英文缩写，步长保持数字
fn unix_weekday_field(field: &str) -> Option<String> {
    let mut out = String::with_capacity(field.len() * 2);
    let mut digits = String::new();
    let mut after_step = false;

    for c in field.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        flush_weekday(&mut digits, after_step, &mut out)?;
        after_step = c == '/';
        out.push(c);
    }
    flush_weekday(&mut digits, after_step, &mut out)?;
    Some(out)
}

fn flush_weekday(digits: &mut String, after_step: bool, out: &mut String) -> Option<()> {
    if digits.is_empty() {
        return Some(());
    }
    if after_step {
        out.push_str(digits);
    } else {
        let day: usize = digits.parse().ok()?;
        out.push_str(UNIX_WEEKDAYS.get(day)?);
    }
    digits.clear();
    Some(())
}
