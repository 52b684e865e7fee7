//! Canonical attribute forms
//!
//! Configured and observed values pass through the same normalization
//! before they are compared or stored: sizes in megabytes, durations in
//! seconds, booleans as JSON booleans, sets sorted.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalize {
    #[default]
    None,
    /// `512M`, `1G`, `1024` → megabytes
    MemoryMb,
    /// `90`, `90s`, `5m`, `1h` → seconds
    DurationSecs,
    /// `"true"`, `"1"`, `"yes"` → `true`
    Bool,
    Trim,
    Lower,
    /// Sorted, without duplicates
    SortedSet,
}

impl Normalize {
    pub fn apply(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            Normalize::None => Ok(value.clone()),
            Normalize::MemoryMb => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => memory_mb(s)
                    .map(Value::from)
                    .ok_or_else(|| format!("invalid size {:?}", s)),
                other => Err(format!("invalid size {}", other)),
            },
            Normalize::DurationSecs => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => duration_secs(s)
                    .map(Value::from)
                    .ok_or_else(|| format!("invalid duration {:?}", s)),
                other => Err(format!("invalid duration {}", other)),
            },
            Normalize::Bool => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                    "false" | "0" | "no" | "off" | "" => Ok(Value::Bool(false)),
                    _ => Err(format!("invalid boolean {:?}", s)),
                },
                Value::Number(n) => Ok(Value::Bool(n.as_i64() != Some(0))),
                other => Err(format!("invalid boolean {}", other)),
            },
            Normalize::Trim => Ok(match value {
                Value::String(s) => Value::String(s.trim().to_string()),
                other => other.clone(),
            }),
            Normalize::Lower => Ok(match value {
                Value::String(s) => Value::String(s.trim().to_ascii_lowercase()),
                other => other.clone(),
            }),
            Normalize::SortedSet => Ok(sorted_set(value)),
        }
    }
}

/// Sort an array by its JSON text and drop duplicates.
pub fn sorted_set(value: &Value) -> Value {
    let Value::Array(items) = value else {
        return value.clone();
    };
    let mut keyed: Vec<(String, Value)> = items.iter().map(|v| (v.to_string(), v.clone())).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);
    Value::Array(keyed.into_iter().map(|(_, v)| v).collect())
}

/// Size in megabytes. Bare numbers are megabytes already.
pub fn memory_mb(raw: &str) -> Option<i64> {
    let s = raw.trim().to_ascii_uppercase();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    let digits_end = s.find(|c: char| !c.is_ascii_digit())?;
    let (number, unit) = s.split_at(digits_end);
    let number: i64 = number.parse().ok()?;
    let factor = match unit.trim_end_matches('B') {
        "M" => 1,
        "G" => 1024,
        "T" => 1024 * 1024,
        _ => return None,
    };
    number.checked_mul(factor)
}

/// Duration in seconds. Bare numbers are seconds already.
pub fn duration_secs(raw: &str) -> Option<i64> {
    let s = raw.trim().to_ascii_lowercase();
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    let digits_end = s.find(|c: char| !c.is_ascii_digit())?;
    let (number, unit) = s.split_at(digits_end);
    let number: i64 = number.parse().ok()?;
    let factor = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return None,
    };
    number.checked_mul(factor)
}
