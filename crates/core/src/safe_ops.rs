//! 安全的路径读写与深度合并
//!
//! 所有写操作都返回新值，调用方持有的原始值不会被修改。
//! 写路径中出现保留键（`__proto__`、`constructor`、`prototype`）时操作直接作废，
//! 这些配置往往会被转发给 JavaScript 等动态语言的消费者，保留键在那里可以改写对象模型。

use serde_json::{Map, Value};
use tracing::warn;

use crate::path::ConfigPath;

/// 禁止写入的保留键
pub const RESERVED_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// 数组越界写入时最多补齐的 `null` 个数
const MAX_ARRAY_PADDING: usize = 1024;

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// 路径中任一段为保留键时返回 true
pub fn contains_reserved(path: &ConfigPath) -> bool {
    path.segments().iter().any(|segment| is_reserved_key(segment))
}

/// 读取路径上的值，键不存在或中间节点不可遍历时返回 None
///
/// `0`、`""`、`null`、`false` 都是存在的值，原样返回。
pub fn get<'a>(root: &'a Value, path: impl Into<ConfigPath>) -> Option<&'a Value> {
    let path = path.into();
    let mut current = root;
    for segment in path.segments() {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// 读取路径上的值，缺失时返回 `default`
pub fn get_or(root: &Value, path: impl Into<ConfigPath>, default: Value) -> Value {
    get(root, path).cloned().unwrap_or(default)
}

pub fn has(root: &Value, path: impl Into<ConfigPath>) -> bool {
    get(root, path).is_some()
}

/// 在路径上写入值并返回新的根
///
/// 缺失的中间节点以空映射补齐，标量中间节点被映射替换。
/// 数组下标越界时用 `null` 补齐到该下标；数组遇到非数字段或过远的下标时原样返回。
/// 路径含保留键或为空时原样返回。
pub fn set(root: &Value, path: impl Into<ConfigPath>, value: Value) -> Value {
    let path = path.into();
    if path.is_root() {
        return root.clone();
    }
    if contains_reserved(&path) {
        warn!(path = %path, "拒绝写入保留键路径");
        return root.clone();
    }
    set_in(root, path.segments(), value)
}

fn set_in(node: &Value, segments: &[String], value: Value) -> Value {
    let Some((head, rest)) = segments.split_first() else {
        return value;
    };

    match node {
        Value::Object(map) => {
            let mut next = map.clone();
            let child = map.get(head).cloned().unwrap_or(Value::Null);
            next.insert(head.clone(), set_in(&child, rest, value));
            Value::Object(next)
        }
        Value::Array(items) => match head.parse::<usize>() {
            Ok(index) if index.saturating_sub(items.len()) <= MAX_ARRAY_PADDING => {
                let mut next = items.clone();
                if index >= next.len() {
                    next.resize(index + 1, Value::Null);
                }
                next[index] = set_in(&items.get(index).cloned().unwrap_or(Value::Null), rest, value);
                Value::Array(next)
            }
            _ => {
                warn!(segment = %head, len = items.len(), "数组下标无效或越界过远，写入被忽略");
                node.clone()
            }
        },
        _ => fresh_branch(head, rest, value),
    }
}

fn fresh_branch(head: &str, rest: &[String], value: Value) -> Value {
    let mut map = Map::new();
    map.insert(head.to_string(), set_in(&Value::Null, rest, value));
    Value::Object(map)
}

/// 删除路径上的叶子并返回新的根；路径不存在或含保留键时原样返回
pub fn delete(root: &Value, path: impl Into<ConfigPath>) -> Value {
    let path = path.into();
    if path.is_root() || contains_reserved(&path) || get(root, &path).is_none() {
        return root.clone();
    }
    delete_in(root, path.segments())
}

fn delete_in(node: &Value, segments: &[String]) -> Value {
    let Some((head, rest)) = segments.split_first() else {
        return node.clone();
    };

    match node {
        Value::Object(map) => {
            let mut next = map.clone();
            if rest.is_empty() {
                next.shift_remove(head.as_str());
            } else if let Some(child) = map.get(head) {
                next.insert(head.clone(), delete_in(child, rest));
            }
            Value::Object(next)
        }
        Value::Array(items) => {
            let mut next = items.clone();
            if let Ok(index) = head.parse::<usize>() {
                if rest.is_empty() {
                    if index < next.len() {
                        next.remove(index);
                    }
                } else if let Some(child) = items.get(index) {
                    next[index] = delete_in(child, rest);
                }
            }
            Value::Array(next)
        }
        other => other.clone(),
    }
}

/// 从左到右依次把 `sources` 合并到 `target` 上
///
/// 双方都是映射时递归合并，其余情况（包括数组）由来源整体替换。
/// 保留键被跳过。不修改任何入参。
pub fn merge_deep(target: &Value, sources: &[&Value]) -> Value {
    sources
        .iter()
        .fold(target.clone(), |acc, source| merge_into(acc, source))
}

fn merge_into(base: Value, source: &Value) -> Value {
    match (base, source) {
        (Value::Object(mut base_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                if is_reserved_key(key) {
                    warn!(key = %key, "合并时跳过保留键");
                    continue;
                }
                let merged = match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && source_value.is_object() => {
                        merge_into(existing.take(), source_value)
                    }
                    _ => source_value.clone(),
                };
                base_map.insert(key.clone(), merged);
            }
            Value::Object(base_map)
        }
        (_, source) => source.clone(),
    }
}
