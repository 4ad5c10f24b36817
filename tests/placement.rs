use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use kar_sidecar::MemoryStore;
use kar_sidecar::PlacementDirectory;
use kar_sidecar::Store;
use kar_sidecar::StoreError;

fn directory() -> PlacementDirectory {
	PlacementDirectory::new(Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn claim_succeeds_once() {
	let placement = directory();

	assert!(placement.compare_and_set("cart", "c1", None, Some("sidecar-A")).await.unwrap());
	assert!(!placement.compare_and_set("cart", "c1", None, Some("sidecar-B")).await.unwrap());
	assert_eq!(
		placement.get("cart", "c1").await.unwrap().as_deref(),
		Some("sidecar-A")
	);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_claims_have_one_winner() {
	let placement = directory();

	for round in 0..50 {
		let id = format!("c{round}");
		let claims: Vec<_> = ["sidecar-A", "sidecar-B", "sidecar-C"]
			.into_iter()
			.map(|sidecar| {
				let placement = placement.clone();
				let id = id.clone();
				tokio::spawn(async move { placement.claim("cart", &id, sidecar).await.unwrap() })
			})
			.collect();

		let mut winners = 0;
		for claim in claims {
			if claim.await.unwrap() {
				winners += 1;
			}
		}
		assert_eq!(winners, 1, "round {round}");
		assert!(placement.get("cart", &id).await.unwrap().is_some());
	}
}

#[tokio::test]
async fn ids_with_separator_are_rejected() {
	let placement = directory();

	assert!(matches!(
		placement.claim("cart", "c1/extra", "sidecar-A").await,
		Err(StoreError::InvalidKey(_))
	));
	assert!(matches!(
		placement.claim("shop/cart", "c1", "sidecar-A").await,
		Err(StoreError::InvalidKey(_))
	));
	assert!(matches!(
		placement.claim("", "c1", "sidecar-A").await,
		Err(StoreError::InvalidKey(_))
	));
	assert!(placement.all_instances("").await.unwrap().is_empty());

	assert!(placement.claim("cart", "c1", "sidecar-A").await.unwrap());
	assert_eq!(
		placement.instances_owned_by("sidecar-A").await.unwrap()["cart"],
		BTreeSet::from(["c1".to_string()])
	);
}

#[tokio::test]
async fn release_of_absent_placement_fails_quietly() {
	let placement = directory();

	assert!(!placement.release("cart", "c1", "sidecar-A").await.unwrap());
	assert_eq!(placement.get("cart", "c1").await.unwrap(), None);
}

#[tokio::test]
async fn release_requires_current_owner() {
	let placement = directory();
	placement.claim("cart", "c1", "sidecar-A").await.unwrap();

	assert!(!placement.release("cart", "c1", "sidecar-B").await.unwrap());
	assert!(placement.release("cart", "c1", "sidecar-A").await.unwrap());
	assert_eq!(placement.get("cart", "c1").await.unwrap(), None);

	// reassignment is release then claim
	assert!(placement.claim("cart", "c1", "sidecar-B").await.unwrap());
	assert_eq!(
		placement.get("cart", "c1").await.unwrap().as_deref(),
		Some("sidecar-B")
	);
}

#[tokio::test]
async fn all_instances_groups_by_type() {
	let placement = directory();
	placement.claim("cart", "c2", "sidecar-A").await.unwrap();
	placement.claim("cart", "c1", "sidecar-B").await.unwrap();
	placement.claim("cartography", "m1", "sidecar-A").await.unwrap();
	placement.claim("order", "o1", "sidecar-A").await.unwrap();

	let all = placement.all_instances("").await.unwrap();
	assert_eq!(all.len(), 3);
	assert_eq!(
		all["cart"],
		BTreeSet::from(["c1".to_string(), "c2".to_string()])
	);

	let carts = placement.all_instances("cart").await.unwrap();
	assert_eq!(
		carts.keys().map(String::as_str).collect::<Vec<_>>(),
		vec!["cart", "cartography"]
	);

	let owned = placement.instances_owned_by("sidecar-A").await.unwrap();
	assert_eq!(owned["cart"], BTreeSet::from(["c2".to_string()]));
	assert!(owned.contains_key("order"));
	assert!(!placement.instances_owned_by("sidecar-Z").await.unwrap().contains_key("cart"));
}

#[tokio::test]
async fn sidecars_are_listed_until_deregistered() {
	let placement = directory();
	placement.register_sidecar("sidecar-A", "pricing").await.unwrap();
	placement.register_sidecar("sidecar-B", "cart").await.unwrap();

	let sidecars = placement.sidecars().await.unwrap();
	assert_eq!(sidecars["sidecar-A"], "pricing");
	assert_eq!(sidecars.len(), 2);

	placement.deregister_sidecar("sidecar-A").await.unwrap();
	assert!(!placement.sidecars().await.unwrap().contains_key("sidecar-A"));
}

struct BrokenStore;

impl Store for BrokenStore {
	fn get<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<String, StoreError>> {
		futures::future::ready(Err(StoreError::Unavailable("down".into()))).boxed()
	}

	fn set<'a>(&'a self, _: &'a str, _: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
		futures::future::ready(Err(StoreError::Unavailable("down".into()))).boxed()
	}

	fn del<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
		futures::future::ready(Err(StoreError::Unavailable("down".into()))).boxed()
	}

	fn compare_and_set<'a>(
		&'a self,
		_: &'a str,
		_: Option<&'a str>,
		_: Option<&'a str>,
	) -> BoxFuture<'a, Result<bool, StoreError>> {
		futures::future::ready(Err(StoreError::Unavailable("down".into()))).boxed()
	}

	fn keys<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
		futures::future::ready(Err(StoreError::Unavailable("down".into()))).boxed()
	}
}

#[tokio::test]
async fn store_failures_are_errors_not_absence() {
	let placement = PlacementDirectory::new(Arc::new(BrokenStore));

	assert!(matches!(
		placement.get("cart", "c1").await,
		Err(StoreError::Unavailable(_))
	));
	assert!(placement.claim("cart", "c1", "sidecar-A").await.is_err());
	assert!(placement.all_instances("").await.is_err());
}
