use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::StoreError;
use crate::error::StoreResultExt as _;
use crate::store::Store;

pub const SEPARATOR: &str = "/";

const NAMESPACE: &str = "pubsub";

fn placement_key_prefix(actor_type: &str) -> String {
	[NAMESPACE, "placement", actor_type].join(SEPARATOR)
}

fn placement_key(actor_type: &str, id: &str) -> String {
	[NAMESPACE, "placement", actor_type, id].join(SEPARATOR)
}

fn sidecar_key(sidecar: &str) -> String {
	[NAMESPACE, "sidecar", sidecar].join(SEPARATOR)
}

/// Actor type to the ids of its placed instances.
pub type Instances = BTreeMap<String, BTreeSet<String>>;

/// Which sidecar owns which actor instance.
///
/// Holds no state of its own: every placement change goes through the
/// store's compare-and-set, so two sidecars racing for the same instance
/// cannot both win.
#[derive(Clone)]
pub struct PlacementDirectory {
	store: Arc<dyn Store>,
}

impl PlacementDirectory {
	pub fn new(store: Arc<dyn Store>) -> Self {
		Self { store }
	}

	/// The sidecar currently owning the instance, if any.
	pub async fn get(&self, actor_type: &str, id: &str) -> Result<Option<String>, StoreError> {
		self.store.get(&placement_key(actor_type, id)).await.optional()
	}

	/// Moves the owner of the instance from `expected` to `desired`.
	///
	/// `expected = None` claims an unplaced instance, `desired = None`
	/// releases it. Returns `false` when the stored owner was not `expected`.
	/// Empty segments and segments containing [`SEPARATOR`] are rejected.
	pub async fn compare_and_set(
		&self,
		actor_type: &str,
		id: &str,
		expected: Option<&str>,
		desired: Option<&str>,
	) -> Result<bool, StoreError> {
		// listings split keys on the separator
		for segment in [actor_type, id] {
			if segment.is_empty() || segment.contains(SEPARATOR) {
				return Err(StoreError::InvalidKey(segment.to_string()));
			}
		}

		let key = placement_key(actor_type, id);
		let swapped = self.store.compare_and_set(&key, expected, desired).await?;
		tracing::debug!(
			actor_type,
			id,
			?expected,
			?desired,
			swapped,
			"Placement compare-and-set"
		);
		Ok(swapped)
	}

	pub async fn claim(&self, actor_type: &str, id: &str, sidecar: &str) -> Result<bool, StoreError> {
		self.compare_and_set(actor_type, id, None, Some(sidecar)).await
	}

	pub async fn release(&self, actor_type: &str, id: &str, sidecar: &str) -> Result<bool, StoreError> {
		self.compare_and_set(actor_type, id, Some(sidecar), None).await
	}

	/// Every placed instance whose actor type starts with `actor_type_prefix`.
	pub async fn all_instances(&self, actor_type_prefix: &str) -> Result<Instances, StoreError> {
		let pattern = format!("{}*", placement_key_prefix(actor_type_prefix));
		let keys = self.store.keys(&pattern).await?;

		let mut instances = Instances::new();
		for key in keys {
			match parse_placement_key(&key) {
				Some((actor_type, id)) => {
					instances
						.entry(actor_type.to_string())
						.or_default()
						.insert(id.to_string());
				}
				None => tracing::warn!(key, "Skipping malformed placement key"),
			}
		}
		Ok(instances)
	}

	/// The instances currently owned by `sidecar`.
	pub async fn instances_owned_by(&self, sidecar: &str) -> Result<Instances, StoreError> {
		let mut owned = Instances::new();
		for (actor_type, ids) in self.all_instances("").await? {
			for id in ids {
				// released between the scan and the lookup
				let Some(owner) = self.get(&actor_type, &id).await? else {
					continue;
				};
				if owner == sidecar {
					owned.entry(actor_type.clone()).or_default().insert(id);
				}
			}
		}
		Ok(owned)
	}

	pub async fn register_sidecar(&self, sidecar: &str, service: &str) -> Result<(), StoreError> {
		self.store.set(&sidecar_key(sidecar), service).await
	}

	pub async fn deregister_sidecar(&self, sidecar: &str) -> Result<(), StoreError> {
		self.store.del(&sidecar_key(sidecar)).await
	}

	/// Live sidecars mapped to the service they front.
	pub async fn sidecars(&self) -> Result<BTreeMap<String, String>, StoreError> {
		let prefix = sidecar_key("");
		let mut sidecars = BTreeMap::new();
		for key in self.store.keys(&format!("{prefix}*")).await? {
			let Some(service) = self.store.get(&key).await.optional()? else {
				continue;
			};
			if let Some(sidecar) = key.strip_prefix(&prefix) {
				sidecars.insert(sidecar.to_string(), service);
			}
		}
		Ok(sidecars)
	}
}

fn parse_placement_key(key: &str) -> Option<(&str, &str)> {
	let mut parts = key.split(SEPARATOR);
	match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
		(Some(NAMESPACE), Some("placement"), Some(actor_type), Some(id), None) => Some((actor_type, id)),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys_follow_namespace_scheme() {
		assert_eq!(placement_key("cart", "c1"), "pubsub/placement/cart/c1");
		assert_eq!(
			parse_placement_key("pubsub/placement/cart/c1"),
			Some(("cart", "c1"))
		);
		assert_eq!(parse_placement_key("pubsub/placement/cart"), None);
		assert_eq!(parse_placement_key("pubsub/placement/cart/c1/x"), None);
	}
}
