//! 인메모리 백킹 스토어
//!
//! 프로세스 수명 동안만 유지됩니다. 같은 `MemoryStore`(clone 포함)로 같은 네임스페이스를
//! 다시 열면 같은 데이터를 봅니다. open/read/write 실패를 주입할 수 있습니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{validate_namespace, SecureBackingStore, StoreHandle};
use crate::error::StoreError;

type Namespace = Arc<Mutex<HashMap<String, String>>>;

#[derive(Default)]
struct MemoryState {
    namespaces: Mutex<HashMap<String, Namespace>>,
    open_calls: AtomicUsize,
    failing_opens: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

/// 인메모리 백킹 스토어
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 `count`번의 open을 실패시킴
    pub fn fail_next_opens(&self, count: usize) {
        self.state.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 지금까지의 open 호출 횟수 (실패 포함)
    pub fn open_calls(&self) -> usize {
        self.state.open_calls.load(Ordering::SeqCst)
    }

    /// 네임스페이스에 저장된 원본 값 (핸들 없이 확인)
    pub fn peek(&self, namespace: &str, key: &str) -> Option<String> {
        let namespaces = self
            .state
            .namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let data = namespaces.get(namespace)?;
        let data = data.lock().unwrap_or_else(PoisonError::into_inner);
        data.get(key).cloned()
    }
}

impl SecureBackingStore for MemoryStore {
    fn open(&self, namespace: &str) -> Result<Box<dyn StoreHandle>, StoreError> {
        self.state.open_calls.fetch_add(1, Ordering::SeqCst);
        validate_namespace(namespace)?;

        let injected = self
            .state
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Init("Injected open failure".to_string()));
        }

        let mut namespaces = self
            .state
            .namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let data = namespaces
            .entry(namespace.to_string())
            .or_insert_with(Namespace::default)
            .clone();

        Ok(Box::new(MemoryHandle {
            state: self.state.clone(),
            data,
        }))
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

struct MemoryHandle {
    state: Arc<MemoryState>,
    data: Namespace,
}

impl StoreHandle for MemoryHandle {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.state.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read("Injected read failure".to_string()));
        }
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write("Injected write failure".to_string()));
        }
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reopen_shares_namespace() {
        let store = MemoryStore::new();
        store.open("ns").unwrap().write("k", "v").unwrap();

        let handle = store.open("ns").unwrap();
        assert_eq!(handle.read("k").unwrap(), Some("v".to_string()));
        assert_eq!(store.open("other").unwrap().read("k").unwrap(), None);
        assert_eq!(store.open_calls(), 3);
    }

    #[test]
    fn test_injected_open_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_opens(2);

        assert!(store.open("ns").is_err());
        assert!(store.open("ns").is_err());
        assert!(store.open("ns").is_ok());
    }

    #[test]
    fn test_injected_write_failure_keeps_value() {
        let store = MemoryStore::new();
        let handle = store.open("ns").unwrap();
        handle.write("k", "first").unwrap();

        store.set_fail_writes(true);
        assert!(handle.write("k", "second").is_err());
        assert_eq!(store.peek("ns", "k"), Some("first".to_string()));
    }
}
