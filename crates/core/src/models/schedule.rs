use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SchedulerError};
use crate::hashing::{bucket_of, content_hash};

/// 调度类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleKind {
    FixedRate,
    FixedDelay,
    Cron,
    Never,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::FixedRate => "FIXED_RATE",
            ScheduleKind::FixedDelay => "FIXED_DELAY",
            ScheduleKind::Cron => "CRON",
            ScheduleKind::Never => "NEVER",
        }
    }

    /// 是否在执行任务体之前重新装载下一次定时器
    pub fn rearm_before_execute(&self) -> bool {
        matches!(self, ScheduleKind::FixedRate | ScheduleKind::Cron)
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIXED_RATE" => Ok(ScheduleKind::FixedRate),
            "FIXED_DELAY" => Ok(ScheduleKind::FixedDelay),
            "CRON" => Ok(ScheduleKind::Cron),
            "NEVER" => Ok(ScheduleKind::Never),
            _ => Err(SchedulerError::InvalidScheduleKind(s.to_string())),
        }
    }
}

/// CRON表达式方言
///
/// - `Unix`: 5段（分 时 日 月 周），周取值 0-7，0 和 7 都表示周日
/// - `Quartz`: 6或7段（秒 分 时 日 月 周 [年]），周取值 1-7，1 表示周日
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CronDialect {
    Unix,
    #[default]
    Quartz,
}

impl FromStr for CronDialect {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNIX" => Ok(CronDialect::Unix),
            "QUARTZ" => Ok(CronDialect::Quartz),
            _ => Err(SchedulerError::schedule_config(format!(
                "不支持的CRON方言: {s}"
            ))),
        }
    }
}

/// 初始延迟和间隔的上限：100年
pub const MAX_DURATION_MS: i64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// 调度配置（值对象，构造后不可变）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleOption {
    kind: ScheduleKind,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    delay_ms: i64,
    interval_ms: i64,
    cron: Option<String>,
    cron_dialect: CronDialect,
}

impl ScheduleOption {
    pub fn fixed_rate(interval: Duration) -> Self {
        Self::new(ScheduleKind::FixedRate, interval.num_milliseconds(), None)
    }

    pub fn fixed_delay(interval: Duration) -> Self {
        Self::new(ScheduleKind::FixedDelay, interval.num_milliseconds(), None)
    }

    pub fn cron(expr: impl Into<String>, dialect: CronDialect) -> Self {
        let mut option = Self::new(ScheduleKind::Cron, 0, Some(expr.into()));
        option.cron_dialect = dialect;
        option
    }

    pub fn never() -> Self {
        Self::new(ScheduleKind::Never, 0, None)
    }

    fn new(kind: ScheduleKind, interval_ms: i64, cron: Option<String>) -> Self {
        Self {
            kind,
            start_time: None,
            end_time: None,
            delay_ms: 0,
            interval_ms,
            cron,
            cron_dialect: CronDialect::default(),
        }
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.num_milliseconds();
        self
    }

    pub fn kind(&self) -> ScheduleKind {
        self.kind
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn delay(&self) -> Duration {
        Duration::milliseconds(self.delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::milliseconds(self.interval_ms)
    }

    pub fn cron_expression(&self) -> Option<&str> {
        self.cron.as_deref()
    }

    pub fn cron_dialect(&self) -> CronDialect {
        self.cron_dialect
    }

    /// 校验配置的结构完整性（CRON语法由触发时间计算器负责解析）
    pub fn validate(&self) -> Result<()> {
        if self.delay_ms < 0 {
            return Err(SchedulerError::schedule_config("初始延迟不能为负数"));
        }
        if self.delay_ms > MAX_DURATION_MS || self.interval_ms > MAX_DURATION_MS {
            return Err(SchedulerError::schedule_config(format!(
                "初始延迟和间隔不能超过 {MAX_DURATION_MS} 毫秒"
            )));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(SchedulerError::schedule_config(format!(
                    "开始时间 {start} 晚于结束时间 {end}"
                )));
            }
        }
        match self.kind {
            ScheduleKind::FixedRate | ScheduleKind::FixedDelay if self.interval_ms <= 0 => {
                Err(SchedulerError::schedule_config(format!(
                    "{} 调度的间隔必须大于0",
                    self.kind
                )))
            }
            ScheduleKind::Cron
                if self
                    .cron
                    .as_deref()
                    .map(|c| c.trim().is_empty())
                    .unwrap_or(true) =>
            {
                Err(SchedulerError::schedule_config("CRON调度缺少表达式"))
            }
            _ => Ok(()),
        }
    }

    /// 给定时刻是否落在 [start_time, end_time] 窗口内
    pub fn window_contains(&self, at: DateTime<Utc>) -> bool {
        self.start_time.map_or(true, |start| at >= start)
            && self.end_time.map_or(true, |end| at <= end)
    }

    /// 给定时刻是否已超过结束时间
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.end_time.map_or(false, |end| at > end)
    }

    /// 配置内容哈希，用作调度计划的版本号
    pub fn content_hash(&self) -> String {
        content_hash(&serde_json::to_vec(self).unwrap_or_default())
    }
}

/// 调度计划
///
/// 发布触发器定义时创建；每次触发更新触发/反馈时间，Broker变更或配置变更时更新归属和版本。
/// 只做逻辑删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub job_id: i64,
    pub option: ScheduleOption,
    pub broker_id: Option<String>,
    pub last_trigger_at: Option<DateTime<Utc>>,
    pub last_feedback_at: Option<DateTime<Utc>>,
    pub next_trigger_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub deleted: bool,
    pub version: String,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(id: i64, job_id: i64, option: ScheduleOption) -> Self {
        let version = option.content_hash();
        Self {
            id,
            job_id,
            option,
            broker_id: None,
            last_trigger_at: None,
            last_feedback_at: None,
            next_trigger_at: None,
            enabled: true,
            deleted: false,
            version,
            updated_at: Utc::now(),
        }
    }

    /// 替换调度配置，返回版本号是否发生变化
    pub fn replace_option(&mut self, option: ScheduleOption) -> bool {
        let version = option.content_hash();
        if version == self.version {
            return false;
        }
        self.option = option;
        self.version = version;
        self.next_trigger_at = None;
        self.updated_at = Utc::now();
        true
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.deleted
    }

    pub fn bucket(&self, bucket_count: u32) -> u32 {
        bucket_of(self.id, bucket_count)
    }
}
