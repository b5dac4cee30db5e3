use super::bus::{SubscriptionHandle, SubscriptionId};
use super::handler::EventHandler;
use crate::domain_event::Event;
use crate::error::{DomainError, DomainResult as Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// 一条订阅：处理器与其专属投递队列的发送端
#[derive(Clone)]
pub(crate) struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) event_type: String,
    pub(crate) handler: Arc<dyn EventHandler>,
    pub(crate) sender: mpsc::UnboundedSender<Arc<Event>>,
}

impl Subscription {
    pub(crate) fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle::new(self.id, self.event_type.clone(), self.handler.handler_name())
    }
}

/// 订阅表：总线内唯一的共享可变状态，读多写少
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    table: RwLock<Table>,
    next_id: AtomicU64,
}

/// `closed` 与订阅列表受同一把锁保护，`clear` 之后不再接受登记
#[derive(Default)]
struct Table {
    by_type: HashMap<String, Vec<Subscription>>,
    closed: bool,
}

impl SubscriptionRegistry {
    pub(crate) fn next_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn insert(&self, subscription: Subscription) -> Result<()> {
        let mut table = self.table.write().map_err(|_| DomainError::RegistryPoisoned)?;
        if table.closed {
            return Err(DomainError::event_bus("event bus is closed"));
        }
        table
            .by_type
            .entry(subscription.event_type.clone())
            .or_default()
            .push(subscription);
        Ok(())
    }

    pub(crate) fn remove(&self, handle: &SubscriptionHandle) -> Result<Option<Subscription>> {
        let mut table = self.table.write().map_err(|_| DomainError::RegistryPoisoned)?;
        let by_type = &mut table.by_type;
        let Some(list) = by_type.get_mut(handle.event_type()) else {
            return Ok(None);
        };
        let removed = list
            .iter()
            .position(|s| s.id == handle.id())
            .map(|idx| list.remove(idx));
        if list.is_empty() {
            by_type.remove(handle.event_type());
        }
        Ok(removed)
    }

    /// 发布时刻订阅了该类型的处理器（按注册顺序）
    pub(crate) fn matching(&self, event_type: &str) -> Result<Vec<Subscription>> {
        let table = self.table.read().map_err(|_| DomainError::RegistryPoisoned)?;
        Ok(table.by_type.get(event_type).cloned().unwrap_or_default())
    }

    pub(crate) fn find(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let table = self.table.read().map_err(|_| DomainError::RegistryPoisoned)?;
        Ok(table
            .by_type
            .values()
            .flat_map(|list| list.iter())
            .find(|s| s.id == id)
            .cloned())
    }

    pub(crate) fn count(&self, event_type: &str) -> Result<usize> {
        let table = self.table.read().map_err(|_| DomainError::RegistryPoisoned)?;
        Ok(table.by_type.get(event_type).map_or(0, Vec::len))
    }

    /// 清空并关闭订阅表，释放全部发送端
    pub(crate) fn clear(&self) -> Result<usize> {
        let mut table = self.table.write().map_err(|_| DomainError::RegistryPoisoned)?;
        table.closed = true;
        let n = table.by_type.values().map(Vec::len).sum();
        table.by_type.clear();
        Ok(n)
    }
}
