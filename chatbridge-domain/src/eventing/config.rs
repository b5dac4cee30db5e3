//! 事件总线配置
//!
//! 字段名与外部配置键保持一致（毫秒单位），可从 JSON/TOML 等反序列化，
//! 也可通过 `CHATBRIDGE_BUS_*` 环境变量覆盖默认值。
//!
use super::delivery::RetryPolicy;
use crate::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_MAX_RETRIES: &str = "CHATBRIDGE_BUS_MAX_RETRIES";
pub const ENV_BASE_BACKOFF_MS: &str = "CHATBRIDGE_BUS_BASE_BACKOFF_MS";
pub const ENV_HANDLER_TIMEOUT_MS: &str = "CHATBRIDGE_BUS_HANDLER_TIMEOUT_MS";
pub const ENV_JITTER_RATIO: &str = "CHATBRIDGE_BUS_JITTER_RATIO";

/// 事件总线配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// 单个 (事件, 处理器) 的总尝试次数上限
    pub max_retries: u32,
    /// 退避基数：第 n 次失败后等待 base × 2^(n-1)
    pub base_backoff_ms: u64,
    /// 单次处理器调用的超时，超时计为一次失败
    pub handler_timeout_ms: u64,
    /// 抖动比例，实际等待在 [delay, delay × (1 + ratio)] 之间
    pub jitter_ratio: f64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 200,
            handler_timeout_ms: 5000,
            jitter_ratio: 0.1,
        }
    }
}

impl EventBusConfig {
    /// 读取进程环境变量，缺省项使用默认值
    pub fn from_env() -> DomainResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 通过任意键值来源构建配置（便于测试与自定义配置源）
    pub fn from_lookup<F>(lookup: F) -> DomainResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, ENV_MAX_RETRIES)? {
            config.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_BASE_BACKOFF_MS)? {
            config.base_backoff_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_HANDLER_TIMEOUT_MS)? {
            config.handler_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_JITTER_RATIO)? {
            config.jitter_ratio = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.max_retries == 0 {
            return Err(config_err("max_retries", "must be at least 1"));
        }
        if self.handler_timeout_ms == 0 {
            return Err(config_err("handler_timeout_ms", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(config_err("jitter_ratio", "must be within [0, 1]"));
        }
        Ok(())
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.base_backoff(), self.jitter_ratio)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> DomainResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| config_err(key, e.to_string())),
    }
}

fn config_err(key: &str, reason: impl Into<String>) -> DomainError {
    DomainError::Config {
        key: key.to_string(),
        reason: reason.into(),
    }
}
