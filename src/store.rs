use std::collections::BTreeMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::StoreError;

/// Key-value store shared by all sidecars.
pub trait Store: Send + Sync + 'static {
	/// Fails with `StoreError::Nil` when the key does not exist.
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<String, StoreError>>;

	fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

	fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

	/// Atomically replaces the value of `key` with `desired` iff it currently
	/// equals `expected`. `None` stands for an absent key on both sides.
	fn compare_and_set<'a>(
		&'a self,
		key: &'a str,
		expected: Option<&'a str>,
		desired: Option<&'a str>,
	) -> BoxFuture<'a, Result<bool, StoreError>>;

	/// Keys matching `pattern`; a trailing `*` matches any suffix.
	fn keys<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<Vec<String>, StoreError>>;
}

/// Store held in process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
	entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn cas(&self, key: &str, expected: Option<&str>, desired: Option<&str>) -> bool {
		let mut entries = self.entries.lock();
		if entries.get(key).map(String::as_str) != expected {
			return false;
		}
		match desired {
			Some(value) => {
				entries.insert(key.to_string(), value.to_string());
			}
			None => {
				entries.remove(key);
			}
		}
		true
	}

	fn matching(&self, pattern: &str) -> Vec<String> {
		let entries = self.entries.lock();
		match pattern.strip_suffix('*') {
			Some(prefix) => entries
				.range(prefix.to_string()..)
				.take_while(|(key, _)| key.starts_with(prefix))
				.map(|(key, _)| key.clone())
				.collect(),
			None => entries.get_key_value(pattern).map(|(key, _)| key.clone()).into_iter().collect(),
		}
	}
}

impl Store for MemoryStore {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<String, StoreError>> {
		let value = self.entries.lock().get(key).cloned().ok_or(StoreError::Nil);
		futures::future::ready(value).boxed()
	}

	fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
		self.entries.lock().insert(key.to_string(), value.to_string());
		futures::future::ready(Ok(())).boxed()
	}

	fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
		self.entries.lock().remove(key);
		futures::future::ready(Ok(())).boxed()
	}

	fn compare_and_set<'a>(
		&'a self,
		key: &'a str,
		expected: Option<&'a str>,
		desired: Option<&'a str>,
	) -> BoxFuture<'a, Result<bool, StoreError>> {
		futures::future::ready(Ok(self.cas(key, expected, desired))).boxed()
	}

	fn keys<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
		futures::future::ready(Ok(self.matching(pattern))).boxed()
	}
}
