//! # 凭据存储
//!
//! `app_key -> CredentialRecord` 的并发映射。记录以 `Arc` 整体替换，
//! 读者不会观察到写了一半的记录。

use dashmap::DashMap;
use std::sync::Arc;

use super::CredentialRecord;
use crate::config::CredentialConfig;

/// 并发凭据存储
#[derive(Debug, Default)]
pub struct CredentialStore {
    records: DashMap<String, Arc<CredentialRecord>>,
}

impl CredentialStore {
    /// 创建空存储
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 从配置批量创建；重复的 key 以后出现者为准
    #[must_use]
    pub fn from_configs(configs: &[CredentialConfig]) -> Self {
        let store = Self::new();
        for config in configs {
            store.upsert(CredentialRecord::from(config));
        }
        store
    }

    /// 查找记录
    #[must_use]
    pub fn lookup(&self, app_key: &str) -> Option<Arc<CredentialRecord>> {
        self.records.get(app_key).map(|entry| Arc::clone(entry.value()))
    }

    /// 插入或整体替换记录
    pub fn upsert(&self, record: CredentialRecord) {
        self.records
            .insert(record.app_key().to_string(), Arc::new(record));
    }

    /// 记录数量
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// 是否为空
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 所有已注册的 key（排序后）
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }
}
