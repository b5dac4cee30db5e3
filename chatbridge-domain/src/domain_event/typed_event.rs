use serde::Serialize;
use serde::de::DeserializeOwned;

/// 强类型事件载荷：每个载荷类型对应一个固定的 `event_type`
pub trait TypedEvent: Serialize + DeserializeOwned + Send + Sync {
    /// 事件类型标识（总线按此路由）
    const EVENT_TYPE: &'static str;
}
