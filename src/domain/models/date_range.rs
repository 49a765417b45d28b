// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 日期范围错误类型
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DateRangeError {
    /// 起始日期晚于结束日期
    #[error("Invalid range: start {0} is after end {1}")]
    StartAfterEnd(NaiveDate, NaiveDate),

    /// 无法解析日期
    #[error("Unparseable date: {0}")]
    Unparseable(String),
}

/// 日期范围
///
/// 表示一个以自然日为粒度的闭区间，不变量为 `start <= end`。
/// 所有相邻/前后日运算都在日粒度上进行，带时间部分的时间戳
/// 截断为日期。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// 创建新的日期范围
    ///
    /// # 参数
    ///
    /// * `start` - 起始日期（含）
    /// * `end` - 结束日期（含）
    ///
    /// # 返回值
    ///
    /// * `Ok(DateRange)` - 合法范围
    /// * `Err(DateRangeError)` - start 晚于 end
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::StartAfterEnd(start, end));
        }
        Ok(Self { start, end })
    }

    /// 从字符串解析日期范围，带时间部分的输入截断为日期
    pub fn parse(start: &str, end: &str) -> Result<Self, DateRangeError> {
        let start = parse_day(start).ok_or_else(|| DateRangeError::Unparseable(start.into()))?;
        let end = parse_day(end).ok_or_else(|| DateRangeError::Unparseable(end.into()))?;
        Self::new(start, end)
    }

    /// 单日范围
    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// 范围包含的天数
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// 两个范围是否相交
    pub fn intersects(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// 计算与另一范围的交集
    pub fn intersection(&self, other: &DateRange) -> Option<DateRange> {
        if !self.intersects(other) {
            return None;
        }
        Some(Self {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// 另一范围是否与本范围重叠或在日粒度上相邻
    ///
    /// 相邻规则：`other.start <= self.end + 1天`
    pub fn touches(&self, other: &DateRange) -> bool {
        match self.end.succ_opt() {
            Some(next_day) => other.start <= next_day && self.start <= other.end,
            // 日历上限，保守视为接触
            None => self.start <= other.end,
        }
    }

    /// 扩展本范围以并入另一范围
    pub fn extend(&mut self, other: &DateRange) {
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// 将任意日期输入归一化为自然日
///
/// 支持 ISO 日期、带时间的 ISO 时间戳（含时区或不含）以及
/// 推特旧式 `created_at` 格式，时间部分一律截断。
pub fn parse_day(value: &str) -> Option<NaiveDate> {
    let value = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    // Twitter legacy format: "Wed Oct 10 20:19:24 +0000 2018"
    if let Ok(dt) = DateTime::parse_from_str(value, "%a %b %d %H:%M:%S %z %Y") {
        return Some(dt.date_naive());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_new_rejects_inverted_range() {
        let result = DateRange::new(day("2024-01-10"), day("2024-01-01"));
        assert!(matches!(result, Err(DateRangeError::StartAfterEnd(_, _))));
    }

    #[test]
    fn test_parse_truncates_time_of_day() {
        let range = DateRange::parse("2024-01-01T12:34:56Z", "2024-01-10").unwrap();
        assert_eq!(range.start(), day("2024-01-01"));
        assert_eq!(range.end(), day("2024-01-10"));
    }

    #[test]
    fn test_parse_day_twitter_format() {
        assert_eq!(
            parse_day("Wed Oct 10 20:19:24 +0000 2018"),
            Some(day("2018-10-10"))
        );
    }

    #[test]
    fn test_parse_day_rejects_garbage() {
        assert_eq!(parse_day("not-a-date"), None);
    }

    #[test]
    fn test_intersection() {
        let a = DateRange::parse("2024-01-01", "2024-01-05").unwrap();
        let b = DateRange::parse("2024-01-04", "2024-01-10").unwrap();

        let both = a.intersection(&b).unwrap();
        assert_eq!(both.start(), day("2024-01-04"));
        assert_eq!(both.end(), day("2024-01-05"));

        let c = DateRange::parse("2024-02-01", "2024-02-02").unwrap();
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn test_touches_includes_adjacency() {
        let a = DateRange::parse("2024-01-01", "2024-01-02").unwrap();
        let adjacent = DateRange::parse("2024-01-03", "2024-01-05").unwrap();
        let separated = DateRange::parse("2024-01-05", "2024-01-06").unwrap();

        assert!(a.touches(&adjacent));
        assert!(!a.touches(&separated));
    }

    #[test]
    fn test_days() {
        let range = DateRange::parse("2024-01-01", "2024-01-10").unwrap();
        assert_eq!(range.days(), 10);
        assert_eq!(DateRange::single(day("2024-01-01")).days(), 1);
    }

    #[test]
    fn test_serde_roundtrip_uses_iso_dates() {
        let range = DateRange::parse("2024-01-01", "2024-01-10").unwrap();
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, r#"{"start":"2024-01-01","end":"2024-01-10"}"#);

        let back: DateRange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, range);
    }
}
