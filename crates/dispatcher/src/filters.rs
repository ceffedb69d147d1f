//! Worker过滤链
//!
//! 按顺序缩小候选Worker列表，多个过滤器之间是交集关系。

use regex::Regex;
use tracing::debug;

use scheduler_core::models::{ResourceRequirement, TagCondition, TagFilter, Worker};
use scheduler_core::{SchedulerError, SchedulerResult};

pub trait WorkerFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn filter(&self, workers: Vec<Worker>) -> Vec<Worker>;
}

/// 只保留已启用且存活的Worker
pub struct AvailabilityFilter;

impl WorkerFilter for AvailabilityFilter {
    fn name(&self) -> &'static str {
        "availability"
    }

    fn filter(&self, workers: Vec<Worker>) -> Vec<Worker> {
        workers
            .into_iter()
            .filter(|w| w.enabled && w.is_alive())
            .collect()
    }
}

/// 执行器能力过滤
pub struct CapabilityFilter {
    executor: String,
}

impl CapabilityFilter {
    pub fn new(executor: impl Into<String>) -> Self {
        Self {
            executor: executor.into(),
        }
    }
}

impl WorkerFilter for CapabilityFilter {
    fn name(&self) -> &'static str {
        "capability"
    }

    fn filter(&self, workers: Vec<Worker>) -> Vec<Worker> {
        workers
            .into_iter()
            .filter(|w| w.supports(&self.executor))
            .collect()
    }
}

enum TagRule {
    Exists(String),
    NotExists(String),
    MustMatch(String, String),
    MustNotMatch(String, String),
    Regex(String, Regex),
}

impl TagRule {
    fn matches(&self, worker: &Worker) -> bool {
        match self {
            TagRule::Exists(name) => worker.tags.contains_key(name),
            TagRule::NotExists(name) => !worker.tags.contains_key(name),
            TagRule::MustMatch(name, value) => worker
                .tags
                .get(name)
                .is_some_and(|values| values.contains(value)),
            TagRule::MustNotMatch(name, value) => !worker
                .tags
                .get(name)
                .is_some_and(|values| values.contains(value)),
            TagRule::Regex(name, pattern) => worker
                .tags
                .get(name)
                .is_some_and(|values| values.iter().any(|v| pattern.is_match(v))),
        }
    }
}

/// 标签过滤，正则在构建时编译
pub struct TagsFilter {
    rules: Vec<TagRule>,
}

impl TagsFilter {
    pub fn new(filters: &[TagFilter]) -> SchedulerResult<Self> {
        let rules = filters
            .iter()
            .map(|f| {
                let name = f.tag_name.clone();
                Ok(match f.condition {
                    TagCondition::Exists => TagRule::Exists(name),
                    TagCondition::NotExists => TagRule::NotExists(name),
                    TagCondition::MustMatchValue => TagRule::MustMatch(name, f.value.clone()),
                    TagCondition::MustNotMatchValue => {
                        TagRule::MustNotMatch(name, f.value.clone())
                    }
                    TagCondition::MustMatchValueRegex => {
                        let pattern = Regex::new(&f.value).map_err(|e| {
                            SchedulerError::InvalidTagCondition(format!(
                                "标签 {} 的正则表达式无效: {}",
                                f.tag_name, e
                            ))
                        })?;
                        TagRule::Regex(name, pattern)
                    }
                })
            })
            .collect::<SchedulerResult<Vec<_>>>()?;
        Ok(Self { rules })
    }
}

impl WorkerFilter for TagsFilter {
    fn name(&self) -> &'static str {
        "tags"
    }

    fn filter(&self, workers: Vec<Worker>) -> Vec<Worker> {
        if self.rules.is_empty() {
            return workers;
        }
        workers
            .into_iter()
            .filter(|w| self.rules.iter().all(|rule| rule.matches(w)))
            .collect()
    }
}

/// 资源过滤：队列已满的Worker总是被剔除
pub struct ResourceFilter {
    requirement: ResourceRequirement,
}

impl ResourceFilter {
    pub fn new(requirement: ResourceRequirement) -> Self {
        Self { requirement }
    }

    fn satisfies(&self, worker: &Worker) -> bool {
        let metrics = &worker.metrics;
        if metrics.queue_available <= 0 {
            return false;
        }
        if self.requirement.cpu > 0.0 && metrics.cpu_available < self.requirement.cpu {
            return false;
        }
        if self.requirement.memory_mb > 0
            && (metrics.free_memory_mb as i64) < self.requirement.memory_mb
        {
            return false;
        }
        true
    }
}

impl WorkerFilter for ResourceFilter {
    fn name(&self) -> &'static str {
        "resource"
    }

    fn filter(&self, workers: Vec<Worker>) -> Vec<Worker> {
        workers.into_iter().filter(|w| self.satisfies(w)).collect()
    }
}

/// 依次执行过滤器，候选为空时提前结束
pub fn apply_filters(filters: &[Box<dyn WorkerFilter>], mut workers: Vec<Worker>) -> Vec<Worker> {
    for filter in filters {
        if workers.is_empty() {
            break;
        }
        let before = workers.len();
        workers = filter.filter(workers);
        debug!("过滤器 {}: {} -> {}", filter.name(), before, workers.len());
    }
    workers
}
