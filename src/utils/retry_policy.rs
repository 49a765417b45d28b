// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

/// 重试策略配置
///
/// 主管的消息延迟重投使用固定延迟形态；指数退避形态留给
/// 需要逐步拉开间隔的网络连接场景
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 初始退避时间
    pub initial_backoff: Duration,
    /// 最大退避时间
    pub max_backoff: Duration,
    /// 退避乘数
    pub backoff_multiplier: f64,
    /// 抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
    /// 是否启用指数退避
    pub exponential_backoff: bool,
    /// 是否启用抖动
    pub enable_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            exponential_backoff: true,
            enable_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// 创建标准重试策略
    pub fn standard() -> Self {
        Self::default()
    }

    /// 固定延迟策略（主管延迟重投使用，参考值5秒）
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_retries: u32::MAX,
            initial_backoff: delay,
            max_backoff: delay,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
            exponential_backoff: false,
            enable_jitter: false,
        }
    }

    /// 计算下次重试的退避时间
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        if !self.exponential_backoff {
            return self.initial_backoff;
        }

        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped_backoff = backoff_secs.min(self.max_backoff.as_secs_f64());

        let final_backoff = if self.enable_jitter {
            let jitter_range = capped_backoff * self.jitter_factor;
            let jitter = rand::random_range(-jitter_range..jitter_range);
            (capped_backoff + jitter).max(0.0)
        } else {
            capped_backoff
        };

        Duration::from_secs_f64(final_backoff)
    }

    /// 是否应该重试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles_per_attempt() {
        let mut policy = RetryPolicy::standard();
        policy.enable_jitter = false; // 禁用抖动以获得精确值

        assert_eq!(policy.calculate_backoff(1), Duration::from_secs(1));
        assert_eq!(policy.calculate_backoff(2), Duration::from_secs(2));
        assert_eq!(policy.calculate_backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_is_capped_at_max() {
        let mut policy = RetryPolicy::standard();
        policy.max_backoff = Duration::from_secs(5);
        policy.enable_jitter = false;

        assert_eq!(policy.calculate_backoff(10), Duration::from_secs(5));
    }

    #[test]
    fn test_fixed_policy_is_constant() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5));

        assert_eq!(policy.calculate_backoff(1), Duration::from_secs(5));
        assert_eq!(policy.calculate_backoff(10), Duration::from_secs(5));
        assert!(policy.should_retry(1_000_000));
    }

    #[test]
    fn test_should_retry_respects_limit() {
        let policy = RetryPolicy::standard();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3)); // max_retries = 3
    }
}
