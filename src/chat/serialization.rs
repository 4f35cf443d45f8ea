use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::warn;

/// 服务端 `createdAt` 的几种可能形态
///
/// - ISO 字符串，不带时区（`LocalDateTime` 默认输出）
/// - 带时区偏移的 RFC 3339 字符串
/// - Jackson 未关闭 WRITE_DATES_AS_TIMESTAMPS 时的数组形式 `[y, M, d, H, m, s, nanos]`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Parts(Vec<i64>),
    Other(serde_json::Value),
}

/// `createdAt` 反序列化函数（支持 null 值，统一转换为本地时间）
///
/// 无法识别的时间不让整条消息失败，记录日志后按缺失处理。
pub fn deserialize_created_at<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<RawTimestamp> = Deserialize::deserialize(deserializer)?;
    let parsed = match &raw {
        None => return Ok(None),
        Some(RawTimestamp::Text(s)) if s.is_empty() => return Ok(None),
        Some(RawTimestamp::Text(s)) => parse_timestamp(s),
        Some(RawTimestamp::Parts(parts)) => timestamp_from_parts(parts),
        Some(RawTimestamp::Other(_)) => None,
    };
    if parsed.is_none() {
        match raw {
            Some(RawTimestamp::Text(s)) => warn!("[Chat] 无法解析时间: {}", s),
            Some(RawTimestamp::Parts(parts)) => warn!("[Chat] 无法解析时间数组: {:?}", parts),
            Some(RawTimestamp::Other(value)) => warn!("[Chat] 无法识别的时间格式: {}", value),
            None => {}
        }
    }
    Ok(parsed)
}

/// 解析时间字符串；带偏移的时间转换到本地时区，不带偏移的按本地时间处理
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn timestamp_from_parts(parts: &[i64]) -> Option<NaiveDateTime> {
    let get = |i: usize| parts.get(i).copied().unwrap_or(0);
    if parts.len() < 3 {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(
        i32::try_from(get(0)).ok()?,
        u32::try_from(get(1)).ok()?,
        u32::try_from(get(2)).ok()?,
    )?;
    date.and_hms_nano_opt(
        u32::try_from(get(3)).ok()?,
        u32::try_from(get(4)).ok()?,
        u32::try_from(get(5)).ok()?,
        u32::try_from(get(6)).ok()?,
    )
}

/// 格式化为 `YYYY-MM-DD HH:MM`（零填充），缺失时间返回空字符串
pub fn format_local_time(created_at: Option<NaiveDateTime>) -> String {
    created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(default, deserialize_with = "deserialize_created_at")]
        created_at: Option<NaiveDateTime>,
    }

    fn parse(json: &str) -> Option<NaiveDateTime> {
        serde_json::from_str::<Wrapper>(json).unwrap().created_at
    }

    #[test]
    fn naive_iso_string_is_local_time() {
        let t = parse(r#"{"created_at":"2024-03-05T07:08:09.123456"}"#).unwrap();
        assert_eq!(format_local_time(Some(t)), "2024-03-05 07:08");
    }

    #[test]
    fn array_form_is_accepted() {
        let t = parse(r#"{"created_at":[2023,1,2,3,4,5,600000000]}"#).unwrap();
        assert_eq!(format_local_time(Some(t)), "2023-01-02 03:04");
    }

    #[test]
    fn offset_string_converts_to_local() {
        let t = parse(r#"{"created_at":"2024-06-01T12:00:00Z"}"#).unwrap();
        let expected = chrono::Utc
            .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .unwrap()
            .with_timezone(&Local)
            .naive_local();
        assert_eq!(t, expected);
    }

    #[test]
    fn null_and_missing_are_none() {
        assert_eq!(parse(r#"{"created_at":null}"#), None);
        assert_eq!(parse(r#"{}"#), None);
        assert_eq!(format_local_time(None), "");
    }

    #[test]
    fn unreadable_time_becomes_none() {
        assert_eq!(parse(r#"{"created_at":"yesterday"}"#), None);
        assert_eq!(parse(r#"{"created_at":[2024,13,40]}"#), None);
        assert_eq!(parse(r#"{"created_at":12.5}"#), None);
    }
}
