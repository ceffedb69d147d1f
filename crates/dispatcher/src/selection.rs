//! Worker选择流水线：过滤链 + 负载均衡

use std::sync::Arc;

use tracing::debug;

use scheduler_core::models::{DispatchPolicy, Worker};
use scheduler_core::traits::WorkerRegistry;
use scheduler_core::SchedulerResult;

use crate::filters::{
    apply_filters, AvailabilityFilter, CapabilityFilter, ResourceFilter, TagsFilter, WorkerFilter,
};
use crate::strategies::{LoadBalancers, SelectionContext};

pub struct WorkerSelector {
    registry: Arc<dyn WorkerRegistry>,
    balancers: LoadBalancers,
}

impl WorkerSelector {
    pub fn new(registry: Arc<dyn WorkerRegistry>, balancers: LoadBalancers) -> Self {
        Self {
            registry,
            balancers,
        }
    }

    /// 经过所有过滤器后仍然可用的Worker
    pub async fn eligible(
        &self,
        app_id: &str,
        executor: &str,
        policy: &DispatchPolicy,
    ) -> SchedulerResult<Vec<Worker>> {
        let filters: Vec<Box<dyn WorkerFilter>> = vec![
            Box::new(AvailabilityFilter),
            Box::new(CapabilityFilter::new(executor)),
            Box::new(TagsFilter::new(&policy.tag_filters)?),
            Box::new(ResourceFilter::new(policy.resource)),
        ];
        let workers = self.registry.all_by_app(app_id).await?;
        Ok(apply_filters(&filters, workers))
    }

    /// 选出一个Worker，没有合适的Worker时返回 `None`
    pub async fn select(
        &self,
        app_id: &str,
        executor: &str,
        policy: &DispatchPolicy,
        invocation_key: &str,
    ) -> SchedulerResult<Option<Worker>> {
        let candidates = self.eligible(app_id, executor, policy).await?;
        if candidates.is_empty() {
            debug!("应用 {} 没有可以执行 {} 的Worker", app_id, executor);
            return Ok(None);
        }

        let strategy = self.balancers.get(policy.load_balance)?;
        let context = SelectionContext::new(invocation_key)
            .with_appoint_server(policy.appoint_server.clone());
        strategy.select(&context, &candidates).await
    }
}
