//! 投递尝试（DeliveryAttempt）状态机与重试策略
//!
//! 一条 (事件, 处理器) 的投递记录仅在重试未决期间存在：
//! `Pending → Running → {Succeeded | RetryScheduled | DeadLettered}`，
//! `RetryScheduled → Running` 于退避到期后发生。
//!
use super::bus::SubscriptionId;
use super::dead_letter::DeadLetterRecord;
use crate::domain_event::Event;
use crate::error::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// 退避指数上限，避免 2^n 溢出
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// 单次失败记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub error: String,
}

/// 重试策略：总尝试次数与指数退避（带抖动）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration, jitter_ratio: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            // NaN 会穿过 clamp，随机区间随之失效
            jitter_ratio: if jitter_ratio.is_finite() {
                jitter_ratio.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 第 `attempt` 次（从 1 计）失败后的基础退避：base × 2^(attempt-1)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_backoff.saturating_mul(1u32 << exp)
    }

    /// 基础退避叠加 [0, ratio] 比例的随机抖动
    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter_ratio <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(0.0..=self.jitter_ratio);
        delay + delay.mul_f64(factor)
    }
}

/// 投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Running,
    RetryScheduled { delay: Duration },
    Succeeded,
    DeadLettered,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Succeeded | DeliveryState::DeadLettered)
    }
}

/// 失败后的状态转换结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 仍有预算，等待 `delay` 后重试
    Retry { delay: Duration },
    /// 预算耗尽，需转入死信
    Exhausted,
}

/// 一条 (事件, 处理器) 的投递记录
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    event: Arc<Event>,
    handler: String,
    attempts: u32,
    failures: Vec<FailureRecord>,
    next_retry_at: Option<DateTime<Utc>>,
    state: DeliveryState,
}

impl DeliveryAttempt {
    pub fn new(event: Arc<Event>, handler: impl Into<String>) -> Self {
        Self {
            event,
            handler: handler.into(),
            attempts: 0,
            failures: Vec::new(),
            next_retry_at: None,
            state: DeliveryState::Pending,
        }
    }

    /// 进入 Running，返回本次尝试序号（从 1 计）
    pub fn begin(&mut self) -> DomainResult<u32> {
        match self.state {
            DeliveryState::Pending | DeliveryState::RetryScheduled { .. } => {
                self.attempts += 1;
                self.next_retry_at = None;
                self.state = DeliveryState::Running;
                Ok(self.attempts)
            }
            other => Err(self.invalid_transition(other, "Running")),
        }
    }

    pub fn succeed(&mut self) -> DomainResult<()> {
        match self.state {
            DeliveryState::Running => {
                self.state = DeliveryState::Succeeded;
                Ok(())
            }
            other => Err(self.invalid_transition(other, "Succeeded")),
        }
    }

    /// 记录一次失败并依据策略决定重试或转入死信
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        policy: &RetryPolicy,
    ) -> DomainResult<Transition> {
        if self.state != DeliveryState::Running {
            return Err(self.invalid_transition(self.state, "failed"));
        }

        let now = Utc::now();
        self.failures.push(FailureRecord {
            at: now,
            error: error.into(),
        });

        if self.attempts < policy.max_attempts() {
            let delay = policy.backoff_with_jitter(self.attempts);
            self.next_retry_at = chrono::Duration::from_std(delay).ok().map(|d| now + d);
            self.state = DeliveryState::RetryScheduled { delay };
            Ok(Transition::Retry { delay })
        } else {
            self.state = DeliveryState::DeadLettered;
            Ok(Transition::Exhausted)
        }
    }

    /// 生成死信记录，仅在 DeadLettered 状态下可用
    pub fn into_dead_letter(self, subscription_id: SubscriptionId) -> DomainResult<DeadLetterRecord> {
        if self.state != DeliveryState::DeadLettered {
            return Err(self.invalid_transition(self.state, "dead letter record"));
        }
        let final_timestamp = self.failures.last().map(|f| f.at).unwrap_or_else(Utc::now);
        Ok(DeadLetterRecord {
            event: Arc::unwrap_or_clone(self.event),
            handler: self.handler,
            subscription_id,
            failure_history: self.failures,
            final_timestamp,
        })
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.next_retry_at
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    fn invalid_transition(&self, from: DeliveryState, to: &str) -> DomainError {
        DomainError::EventHandler {
            handler: self.handler.clone(),
            reason: format!("invalid delivery transition: {from:?} -> {to}"),
        }
    }
}
