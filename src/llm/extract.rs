//! 模型输出的 JSON 提取边界
//!
//! 所有结构化阶段的模型输出都经过这里转成类型化记录：剥离 ```json 围栏、截取最外层
//! 大括号、转义字符串内部的裸控制字符，再交给 serde 反序列化。下游阶段不接触原始文本。

use serde::de::DeserializeOwned;
use serde_json::Value;

/// 从模型输出中提取并解析 JSON 对象
pub fn extract_json(text: &str) -> Result<Value, String> {
    let candidate = candidate_json(text)
        .ok_or_else(|| "no JSON object found in model output".to_string())?;
    let sanitized = sanitize(candidate);
    serde_json::from_str(&sanitized).map_err(|e| format!("{}: {}", e, truncate(&sanitized, 200)))
}

/// 提取并反序列化为目标类型
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let value = extract_json(text)?;
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// 定位候选 JSON：优先 ```json 围栏内，否则取首个 '{' 到末个 '}' 的切片
fn candidate_json(text: &str) -> Option<&str> {
    let text = text.trim();

    let fenced = if let Some(start) = text.find("```json") {
        Some(&text[start + 7..])
    } else if let Some(start) = text.find("```") {
        Some(&text[start + 3..])
    } else {
        None
    };
    let scope = match fenced {
        Some(rest) => match rest.find("```") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        },
        None => text,
    };

    let start = scope.find('{')?;
    let end = scope.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&scope[start..=end])
}

/// 字符串字面量内的裸换行/制表符转义为 \n \r \t，其余控制字符丢弃；结构部分原样保留
fn sanitize(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in json.chars() {
        if in_string {
            if escaped {
                out.push(c);
                escaped = false;
                continue;
            }
            match c {
                '\\' => {
                    out.push(c);
                    escaped = true;
                }
                '"' => {
                    out.push(c);
                    in_string = false;
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => {}
                c => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_plain_json() {
        let s: Sample = decode(r#"{"name": "a", "count": 2}"#).unwrap();
        assert_eq!(s.name, "a");
        assert_eq!(s.count, 2);
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here is the plan:\n```json\n{\"name\": \"b\", \"count\": 3}\n```\nDone.";
        let s: Sample = decode(text).unwrap();
        assert_eq!(s.name, "b");
    }

    #[test]
    fn test_prefixed_prose() {
        let text = "Sure! {\"name\": \"c\", \"count\": 1} hope this helps";
        let s: Sample = decode(text).unwrap();
        assert_eq!(s.name, "c");
    }

    #[test]
    fn test_raw_newline_inside_string() {
        let text = "{\"name\": \"line1\nline2\", \"count\": 4}";
        let s: Sample = decode(text).unwrap();
        assert_eq!(s.name, "line1\nline2");
    }

    #[test]
    fn test_control_char_dropped() {
        let text = "{\"name\": \"a\u{0008}b\", \"count\": 5}";
        let s: Sample = decode(text).unwrap();
        assert_eq!(s.name, "ab");
    }

    #[test]
    fn test_no_json_is_error() {
        assert!(extract_json("no braces here").is_err());
    }

    #[test]
    fn test_escaped_quote_keeps_string_state() {
        let text = r#"{"name": "say \"hi\"", "count": 6}"#;
        let s: Sample = decode(text).unwrap();
        assert_eq!(s.name, "say \"hi\"");
    }
}
