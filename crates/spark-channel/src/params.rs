//! # params 模块说明
//!
//! ## 角色定位（Why）
//! - 通道参数是一张有序的键值表，服务端在派生子通道时整体复制一份给子通道，
//!   之后两者互不影响；
//! - 接受超时、自动读取等核心行为从这里读取配置。
//!
//! ## 实现策略（How）
//! - 以 `parking_lot::RwLock<BTreeMap>` 存储，遍历顺序即键的字典序，
//!   复制时直接克隆快照。

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use parking_lot::RwLock;

/// 参数键，使用静态名称以便常量化定义。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamKey(&'static str);

impl ParamKey {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// 子通道注册超时（毫秒整数或 `Duration`）。
pub const ACCEPT_TIMEOUT: ParamKey = ParamKey::new("accept_timeout");

/// 是否在激活后自动驱动读循环，覆盖传输自身的偏好。
pub const AUTO_READ: ParamKey = ParamKey::new("auto_read");

/// [`ACCEPT_TIMEOUT`] 未配置时的默认值。
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_millis(5000);

/// 参数值。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    Boolean(bool),
    Integer(i64),
    Duration(Duration),
    Text(Arc<str>),
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<Duration> for ParamValue {
    fn from(value: Duration) -> Self {
        Self::Duration(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(Arc::from(value))
    }
}

/// 并发安全的有序参数表。
#[derive(Debug, Default)]
pub struct Params {
    entries: RwLock<BTreeMap<ParamKey, ParamValue>>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_snapshot(entries: BTreeMap<ParamKey, ParamValue>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn set(&self, key: ParamKey, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.entries.write().insert(key, value.into())
    }

    pub fn get(&self, key: ParamKey) -> Option<ParamValue> {
        self.entries.read().get(&key).cloned()
    }

    pub fn remove(&self, key: ParamKey) -> Option<ParamValue> {
        self.entries.write().remove(&key)
    }

    pub fn contains(&self, key: ParamKey) -> bool {
        self.entries.read().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// 读取布尔参数；类型不符时视为未配置。
    pub fn bool(&self, key: ParamKey) -> Option<bool> {
        match self.get(key)? {
            ParamValue::Boolean(value) => Some(value),
            _ => None,
        }
    }

    /// 读取时长参数：整数按毫秒解释，负数视为零。
    pub fn duration_or(&self, key: ParamKey, default: Duration) -> Duration {
        match self.get(key) {
            Some(ParamValue::Duration(value)) => value,
            Some(ParamValue::Integer(ms)) => Duration::from_millis(ms.max(0).unsigned_abs()),
            _ => default,
        }
    }

    /// 当前内容的有序快照。
    pub fn snapshot(&self) -> BTreeMap<ParamKey, ParamValue> {
        self.entries.read().clone()
    }

    /// 把 `other` 的全部条目写入自身（同名覆盖）。
    pub fn copy_from(&self, other: &Params) {
        let source = other.snapshot();
        self.entries.write().extend(source);
    }

    /// 子通道的接受超时。
    pub fn accept_timeout(&self) -> Duration {
        self.duration_or(ACCEPT_TIMEOUT, DEFAULT_ACCEPT_TIMEOUT)
    }
}

impl Clone for Params {
    fn clone(&self) -> Self {
        Self::from_snapshot(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_timeout_accepts_millis_or_duration() {
        let params = Params::new();
        assert_eq!(params.accept_timeout(), DEFAULT_ACCEPT_TIMEOUT);

        params.set(ACCEPT_TIMEOUT, 250_i64);
        assert_eq!(params.accept_timeout(), Duration::from_millis(250));

        params.set(ACCEPT_TIMEOUT, Duration::from_secs(2));
        assert_eq!(params.accept_timeout(), Duration::from_secs(2));

        params.set(ACCEPT_TIMEOUT, -5_i64);
        assert_eq!(params.accept_timeout(), Duration::ZERO);

        params.set(ACCEPT_TIMEOUT, "soon");
        assert_eq!(params.accept_timeout(), DEFAULT_ACCEPT_TIMEOUT);
    }

    #[test]
    fn copies_are_detached() {
        let origin = Params::new();
        origin.set(AUTO_READ, true);
        let copy = Params::new();
        copy.copy_from(&origin);

        origin.set(AUTO_READ, false);
        assert_eq!(copy.bool(AUTO_READ), Some(true));
        assert_eq!(origin.bool(AUTO_READ), Some(false));
    }

    #[test]
    fn snapshot_is_ordered_by_key() {
        let params = Params::new();
        params.set(ParamKey::new("zeta"), 1_i64);
        params.set(ParamKey::new("alpha"), 2_i64);
        let names: Vec<_> = params.snapshot().keys().map(|k| k.name()).collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }
}
