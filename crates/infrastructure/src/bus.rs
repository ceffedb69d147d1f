//! 进程内的命令 / 查询 / 事件总线

use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::events::{DomainEvent, EventListener, EventPublisher, SchedulerEvent};
use scheduler_domain::messaging::{Command, CommandHandler, Query, QueryHandler};

type ErasedHandler = Box<dyn Any + Send + Sync>;

/// 按消息具体类型路由到处理器
#[derive(Default)]
pub struct CommandBus {
    command_handlers: DashMap<TypeId, ErasedHandler>,
    query_handlers: DashMap<TypeId, ErasedHandler>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同一命令类型重复注册时后者覆盖前者
    pub fn register_command<C: Command>(&self, handler: Arc<dyn CommandHandler<C>>) {
        debug!("注册命令处理器: {}", type_name::<C>());
        self.command_handlers
            .insert(TypeId::of::<C>(), Box::new(handler));
    }

    pub fn register_query<Q: Query>(&self, handler: Arc<dyn QueryHandler<Q>>) {
        debug!("注册查询处理器: {}", type_name::<Q>());
        self.query_handlers.insert(TypeId::of::<Q>(), Box::new(handler));
    }

    pub async fn send<C: Command>(&self, command: C) -> SchedulerResult<C::Output> {
        let handler = self
            .command_handlers
            .get(&TypeId::of::<C>())
            .and_then(|h| h.downcast_ref::<Arc<dyn CommandHandler<C>>>().cloned())
            .ok_or_else(|| SchedulerError::NoCommandHandler(type_name::<C>().to_string()))?;
        handler.handle(command).await
    }

    pub async fn query<Q: Query>(&self, query: Q) -> SchedulerResult<Q::Output> {
        let handler = self
            .query_handlers
            .get(&TypeId::of::<Q>())
            .and_then(|h| h.downcast_ref::<Arc<dyn QueryHandler<Q>>>().cloned())
            .ok_or_else(|| SchedulerError::NoCommandHandler(type_name::<Q>().to_string()))?;
        handler.handle(query).await
    }
}

/// 事件广播给所有监听者，单个监听者失败只记录日志
#[derive(Default)]
pub struct InProcessEventBus {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl InProcessEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().await.push(listener);
    }
}

#[async_trait]
impl EventPublisher for InProcessEventBus {
    async fn publish(&self, event: SchedulerEvent) -> SchedulerResult<()> {
        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            if let Err(e) = listener.on_event(&event).await {
                warn!("事件 {} 处理失败: {}", event.event_type(), e);
            }
        }
        Ok(())
    }
}
