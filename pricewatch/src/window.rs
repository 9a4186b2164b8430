//! 时间窗口适配层。
//!
//! 从规则描述文本中识别窗口关键词并解析 `[HH:mm-HH:mm, ...]` 形式的三段窗口，
//! 失败时回退到默认窗口。解析器通过 `WindowSpecParser` 注入，评估核心只依赖
//! 解析结果 `WindowPolicy`。

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::constant::Const;

const ANNOTATION_HEADER: &str = "已启用时间窗口监控，时间窗口设置为：";

/// 一天内的墙钟时间段，分钟精度，两端闭区间。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(rename = "startTime", with = "hhmm")]
    pub start: NaiveTime,
    #[serde(rename = "endTime", with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start: truncate_to_minute(start),
            end: truncate_to_minute(end),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (start, end) = value.split_once('-')?;
        Some(Self::new(parse_hhmm(start.trim())?, parse_hhmm(end.trim())?))
    }

    /// `start > end` is read as a window spanning midnight.
    pub fn contains(&self, time: NaiveTime) -> bool {
        let time = truncate_to_minute(time);
        if self.start <= self.end {
            self.start <= time && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPolicy {
    pub windows: [TimeWindow; Const::WINDOW_COUNT],
}

impl WindowPolicy {
    pub fn new(windows: [TimeWindow; Const::WINDOW_COUNT]) -> Self {
        Self { windows }
    }

    /// 三个窗口同时包含该时刻才算命中（交集语义）。
    pub fn admits(&self, timestamp_ms: i64, offset: FixedOffset) -> bool {
        let Some(utc) = DateTime::<Utc>::from_timestamp_millis(timestamp_ms) else {
            return false;
        };
        let local = utc.with_timezone(&offset).time();
        self.windows.iter().all(|window| window.contains(local))
    }

    /// 以注册时刻为基准，分别在 +1/+2/+3 分钟开始、各持续一小时。
    pub fn default_from(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let window_at = |minutes: i64| {
            let start = (now + Duration::minutes(minutes)).with_timezone(&offset);
            let end = start + Duration::hours(1);
            TimeWindow::new(start.time(), end.time())
        };
        Self::new([window_at(1), window_at(2), window_at(3)])
    }

    pub fn annotate(&self, description: &str) -> String {
        let lines = self
            .windows
            .iter()
            .map(|window| format!("- {window}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{description}\n\n{ANNOTATION_HEADER}\n{lines}")
    }
}

pub trait WindowSpecParser: Send + Sync {
    fn mentions_windows(&self, description: &str) -> bool;
    fn parse(&self, description: &str) -> Option<[TimeWindow; Const::WINDOW_COUNT]>;
}

/// 关键词 + `marker[HH:mm-HH:mm, HH:mm-HH:mm, HH:mm-HH:mm]` 解析器。
#[derive(Debug, Clone)]
pub struct BracketWindowParser {
    keywords: Vec<String>,
    markers: Vec<String>,
}

impl Default for BracketWindowParser {
    fn default() -> Self {
        Self {
            keywords: ["时间窗口", "重叠区域", "时间段", "time window", "overlap"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            markers: ["时间窗口", "time window"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl WindowSpecParser for BracketWindowParser {
    fn mentions_windows(&self, description: &str) -> bool {
        let lowered = description.to_lowercase();
        self.keywords.iter().any(|keyword| lowered.contains(keyword.as_str()))
    }

    fn parse(&self, description: &str) -> Option<[TimeWindow; Const::WINDOW_COUNT]> {
        let lowered = description.to_lowercase();
        self.markers
            .iter()
            .find_map(|marker| parse_after_marker(&lowered, marker))
    }
}

fn parse_after_marker(text: &str, marker: &str) -> Option<[TimeWindow; Const::WINDOW_COUNT]> {
    let pattern = format!("{marker}[");
    let start = text.find(&pattern)? + pattern.len();
    let end = start + text[start..].find(']')?;

    let windows = text[start..end]
        .split(',')
        .map(|part| TimeWindow::parse(part.trim()))
        .collect::<Option<Vec<_>>>()?;
    windows.try_into().ok()
}

fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let bytes = value.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return None;
    }
    if !bytes[..2].iter().chain(&bytes[3..]).all(u8::is_ascii_digit) {
        return None;
    }
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    time.with_second(0)
        .and_then(|x| x.with_nanosecond(0))
        .unwrap_or(time)
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_hhmm(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid HH:mm value: {raw}")))
    }
}
