// Adapter behavior through the casbin enforcer and against store doubles.
use async_trait::async_trait;
use casbin::{CoreApi, Enforcer, MgmtApi, Model};
use policy_adapter::{AdapterOptions, KvAdapter, POLICY_KEY, PolicyStoreError, rbac_model};
use policy_kv::{InMemoryKv, KvClient, KvError, KvPair, KvResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Barrier;

fn rule(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|field| field.to_string()).collect()
}

fn adapter_over(kv: Arc<dyn KvClient>) -> KvAdapter {
    KvAdapter::new(kv, AdapterOptions::default())
}

/// Holds every reader at a barrier after its read, so concurrent savers all
/// observe the same modification index before any of them writes.
struct GatedKv {
    inner: Arc<InMemoryKv>,
    barrier: Arc<Barrier>,
}

#[async_trait]
impl KvClient for GatedKv {
    async fn get(&self, key: &str) -> KvResult<Option<KvPair>> {
        let pair = self.inner.get(key).await;
        self.barrier.wait().await;
        pair
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<()> {
        self.inner.put(key, value).await
    }

    async fn cas(&self, pair: &KvPair) -> KvResult<bool> {
        self.inner.cas(pair).await
    }

    fn backend_name(&self) -> &'static str {
        "gated"
    }
}

/// Store double whose reads and/or writes fail at the transport level.
#[derive(Default)]
struct FlakyKv {
    inner: InMemoryKv,
    fail_reads: bool,
    fail_writes: bool,
    cas_calls: AtomicUsize,
}

fn unavailable() -> KvError {
    KvError::UnexpectedStatus {
        status: 503,
        body: "No cluster leader".to_string(),
    }
}

#[async_trait]
impl KvClient for FlakyKv {
    async fn get(&self, key: &str) -> KvResult<Option<KvPair>> {
        if self.fail_reads {
            return Err(unavailable());
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> KvResult<()> {
        self.inner.put(key, value).await
    }

    async fn cas(&self, pair: &KvPair) -> KvResult<bool> {
        self.cas_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            return Err(unavailable());
        }
        self.inner.cas(pair).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

async fn model_with(p: &[&[&str]], g: &[&[&str]]) -> casbin::DefaultModel {
    let mut model = rbac_model().await.expect("model");
    for fields in p {
        model.add_policy("p", "p", rule(fields));
    }
    for fields in g {
        model.add_policy("g", "g", rule(fields));
    }
    model
}

#[tokio::test]
async fn enforcer_round_trip_through_store() {
    let kv = Arc::new(InMemoryKv::new());

    let mut writer = Enforcer::new(rbac_model().await.expect("model"), adapter_over(kv.clone()))
        .await
        .expect("writer enforcer");
    writer.enable_auto_save(false);
    writer
        .add_policy(rule(&["admin", "data1", "read"]))
        .await
        .expect("add policy");
    writer
        .add_grouping_policy(rule(&["bob", "admin"]))
        .await
        .expect("add grouping");
    writer.save_policy().await.expect("save");

    let reader = Enforcer::new(rbac_model().await.expect("model"), adapter_over(kv.clone()))
        .await
        .expect("reader enforcer");
    assert!(reader.enforce(("bob", "data1", "read")).expect("enforce"));
    assert!(!reader.enforce(("bob", "data1", "write")).expect("enforce"));
    assert!(!reader.enforce(("carol", "data1", "read")).expect("enforce"));
}

#[tokio::test]
async fn enforcer_auto_save_surfaces_not_implemented() {
    let kv = Arc::new(InMemoryKv::new());
    let mut enforcer = Enforcer::new(rbac_model().await.expect("model"), adapter_over(kv.clone()))
        .await
        .expect("enforcer");

    let err = enforcer
        .add_policy(rule(&["x", "y", "z"]))
        .await
        .expect_err("auto-save add");
    assert!(matches!(
        PolicyStoreError::from_casbin(&err),
        Some(PolicyStoreError::NotImplemented("add_policy"))
    ));
    assert_eq!(kv.get(POLICY_KEY).await.expect("get"), None);
}

#[tokio::test]
async fn save_then_load_alice_example() {
    let kv = Arc::new(InMemoryKv::new());
    let mut model = model_with(&[&["alice", "data1", "read"]], &[&["alice", "admin"]]).await;
    let mut adapter = adapter_over(kv.clone());
    casbin::Adapter::save_policy(&mut adapter, &mut model)
        .await
        .expect("save");

    let mut fresh = rbac_model().await.expect("model");
    let mut loader = adapter_over(kv);
    casbin::Adapter::load_policy(&mut loader, &mut fresh)
        .await
        .expect("load");
    assert_eq!(fresh.get_policy("p", "p"), vec![rule(&["alice", "data1", "read"])]);
    assert_eq!(fresh.get_policy("g", "g"), vec![rule(&["alice", "admin"])]);
}

async fn race_two_saves(inner: Arc<InMemoryKv>) {
    let barrier = Arc::new(Barrier::new(2));
    let mut first = adapter_over(Arc::new(GatedKv {
        inner: inner.clone(),
        barrier: barrier.clone(),
    }));
    let mut second = adapter_over(Arc::new(GatedKv {
        inner: inner.clone(),
        barrier,
    }));
    let mut first_model = model_with(&[&["alice", "data1", "read"]], &[]).await;
    let mut second_model = model_with(&[&["bob", "data2", "write"]], &[]).await;

    let (first_result, second_result) = tokio::join!(
        casbin::Adapter::save_policy(&mut first, &mut first_model),
        casbin::Adapter::save_policy(&mut second, &mut second_model),
    );

    let outcomes = [&first_result, &second_result];
    let winners = outcomes.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1, "exactly one concurrent save must win");

    let (loser, winner_rules) = match (&first_result, &second_result) {
        (Ok(()), Err(err)) => (err, vec![rule(&["alice", "data1", "read"])]),
        (Err(err), Ok(())) => (err, vec![rule(&["bob", "data2", "write"])]),
        _ => unreachable!("one winner asserted above"),
    };
    assert!(matches!(
        PolicyStoreError::from_casbin(loser),
        Some(PolicyStoreError::ConcurrentModification { .. })
    ));

    let stored = adapter_over(inner)
        .read_record()
        .await
        .expect("read")
        .expect("record");
    assert_eq!(stored.rules, winner_rules);
}

#[tokio::test]
async fn concurrent_first_saves_have_one_winner() {
    race_two_saves(Arc::new(InMemoryKv::new())).await;
}

#[tokio::test]
async fn concurrent_saves_over_existing_record_have_one_winner() {
    let inner = Arc::new(InMemoryKv::new());
    inner
        .put(POLICY_KEY, br#"[["seed","admin"]]"#.to_vec())
        .await
        .expect("seed");
    race_two_saves(inner).await;
}

#[tokio::test]
async fn read_failure_is_store_unavailable() {
    let kv = Arc::new(FlakyKv {
        fail_reads: true,
        ..FlakyKv::default()
    });
    let mut adapter = adapter_over(kv.clone());

    let mut model = rbac_model().await.expect("model");
    let err = casbin::Adapter::load_policy(&mut adapter, &mut model)
        .await
        .expect_err("load");
    assert!(matches!(
        PolicyStoreError::from_casbin(&err),
        Some(PolicyStoreError::StoreUnavailable(_))
    ));

    let err = casbin::Adapter::save_policy(&mut adapter, &mut model)
        .await
        .expect_err("save");
    assert!(matches!(
        PolicyStoreError::from_casbin(&err),
        Some(PolicyStoreError::StoreUnavailable(_))
    ));
    assert_eq!(kv.cas_calls.load(Ordering::SeqCst), 0, "no write after failed read");
}

#[tokio::test]
async fn write_failure_is_store_unavailable_and_not_retried() {
    let kv = Arc::new(FlakyKv {
        fail_writes: true,
        ..FlakyKv::default()
    });
    let mut adapter = adapter_over(kv.clone());
    let mut model = model_with(&[&["alice", "data1", "read"]], &[]).await;

    let err = casbin::Adapter::save_policy(&mut adapter, &mut model)
        .await
        .expect_err("save");
    assert!(matches!(
        PolicyStoreError::from_casbin(&err),
        Some(PolicyStoreError::StoreUnavailable(_))
    ));
    assert_eq!(kv.cas_calls.load(Ordering::SeqCst), 1);
    assert_eq!(kv.inner.get(POLICY_KEY).await.expect("get"), None);
}
