//! End-to-end tests for AllowlistService over the in-memory and SQLite stores

use std::sync::Arc;

use allowlist::{open_sqlite, AllowlistConfig, AllowlistService, Error};
use allowlist_core::storage::{AllowlistStore, RootStore, StoreResult, UpsertStats};
use allowlist_core::{
    leaf_hash, normalize, verify_proof, Address, AllowlistEntry, Commitment, Hash, IncomingEntry,
    InputRow, MemoryStore, MergePolicy, RowRejection, Source, SourceFilter, StoreError, TokenId,
};
use pretty_assertions::assert_eq;

fn hex_address(i: u32) -> String {
    format!("0x{:040x}", i)
}

fn address(i: u32) -> Address {
    normalize(&hex_address(i)).unwrap()
}

fn row(i: u32, ids: &[TokenId]) -> InputRow {
    InputRow::new(hex_address(i), ids.to_vec())
}

fn memory_service(config: AllowlistConfig) -> AllowlistService<MemoryStore> {
    AllowlistService::new(MemoryStore::new(), config)
}

#[tokio::test]
async fn mixed_case_rows_merge_into_one_entry() {
    let service = memory_service(AllowlistConfig::default());
    let upper = format!("0x{}", "A".repeat(40));
    let lower = format!("0x{}", "a".repeat(40));

    let report = service
        .ingest(vec![
            InputRow::new(upper, vec![1, 2]),
            InputRow::new(lower.clone(), vec![3]),
        ])
        .await
        .unwrap();

    assert_eq!(report.unique_addresses, 1);
    assert_eq!(report.created, 1);

    let entry = service.store().get(&normalize(&lower).unwrap()).unwrap().unwrap();
    assert_eq!(entry.token_ids, vec![1, 2, 3]);
    assert_eq!(service.store().count().unwrap(), 1);
}

#[tokio::test]
async fn invalid_rows_are_reported_not_fatal() {
    let service = memory_service(AllowlistConfig::default());
    let report = service
        .ingest(vec![
            InputRow::new("0x1234", vec![1]),
            row(1, &[]),
            row(2, &[1]).source("vip"),
            row(3, &[1]),
        ])
        .await
        .unwrap();

    assert_eq!(report.rows, 4);
    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected_count(), 3);
    assert!(matches!(report.rejected[0].reason, RowRejection::InvalidAddress(_)));
    assert!(matches!(report.rejected[1].reason, RowRejection::MissingTokenIds(_)));
    assert!(matches!(report.rejected[2].reason, RowRejection::UnknownSource { .. }));
    assert_eq!(service.store().count().unwrap(), 1);
}

#[tokio::test]
async fn ingestion_is_idempotent() {
    let service = memory_service(AllowlistConfig::default().with_chunk_size(2));
    let batch = || vec![row(1, &[1, 2]), row(2, &[1]).note("n"), row(3, &[2]).source("partner")];

    service.ingest(batch()).await.unwrap();
    let entries: Vec<_> = (1..=3)
        .map(|i| service.store().get(&address(i)).unwrap())
        .collect();
    let roots = (
        service.get_root(1).await.unwrap(),
        service.get_root(2).await.unwrap(),
    );

    let report = service.ingest(batch()).await.unwrap();
    assert_eq!(report.unchanged, 3);
    assert_eq!(report.created + report.updated, 0);

    let again: Vec<_> = (1..=3)
        .map(|i| service.store().get(&address(i)).unwrap())
        .collect();
    assert_eq!(again, entries);
    assert_eq!(
        (
            service.get_root(1).await.unwrap(),
            service.get_root(2).await.unwrap()
        ),
        roots
    );
}

#[tokio::test]
async fn later_batches_only_widen_token_ids() {
    let service = memory_service(AllowlistConfig::default());
    service.ingest(vec![row(1, &[1, 5]), row(2, &[7])]).await.unwrap();
    service.ingest(vec![row(1, &[3])]).await.unwrap();

    let entry = service.store().get(&address(1)).unwrap().unwrap();
    assert_eq!(entry.token_ids, vec![1, 3, 5]);
    let untouched = service.store().get(&address(2)).unwrap().unwrap();
    assert_eq!(untouched.token_ids, vec![7]);
}

#[tokio::test]
async fn first_note_and_source_are_kept_across_batches() {
    let service = memory_service(AllowlistConfig::default());
    service
        .ingest(vec![row(1, &[1]).source("airdrop").note("first")])
        .await
        .unwrap();
    service
        .ingest(vec![row(1, &[2]).source("partner").note("second")])
        .await
        .unwrap();

    let entry = service.store().get(&address(1)).unwrap().unwrap();
    assert_eq!(entry.source, Source::Airdrop);
    assert_eq!(entry.note.as_deref(), Some("first"));
}

#[tokio::test]
async fn every_eligible_address_gets_a_sound_proof() {
    let service = memory_service(AllowlistConfig::default());
    service
        .ingest((1..=11).map(|i| row(i, &[1])))
        .await
        .unwrap();

    let root = service.get_root(1).await.unwrap().unwrap();
    for i in 1..=11 {
        let response = service.get_proof(&hex_address(i), 1).await.unwrap().unwrap();
        let (proof, proof_root) = response.decode().unwrap();
        assert_eq!(proof_root, root);
        assert!(verify_proof(leaf_hash(&address(i)), &proof, &root));
    }
}

#[tokio::test]
async fn ineligible_addresses_get_no_proof() {
    let service = memory_service(AllowlistConfig::default());
    service.ingest(vec![row(1, &[1]), row(2, &[2])]).await.unwrap();

    assert!(service.get_proof(&hex_address(2), 1).await.unwrap().is_none());
    assert!(service.get_proof(&hex_address(99), 1).await.unwrap().is_none());
    assert!(service.get_proof("not an address", 1).await.unwrap().is_none());
    assert!(!service.is_eligible("0xzz", 1).await.unwrap());
}

#[tokio::test]
async fn eligibility_accepts_any_case() {
    let service = memory_service(AllowlistConfig::default());
    let lower = format!("0x{}", "b".repeat(40));
    service.ingest(vec![InputRow::new(lower, vec![9])]).await.unwrap();

    assert!(service.is_eligible(&format!("0x{}", "B".repeat(40)), 9).await.unwrap());
    assert!(service.is_eligible(&"b".repeat(40), 9).await.unwrap());
    assert!(!service.is_eligible(&"b".repeat(40), 8).await.unwrap());
}

#[tokio::test]
async fn source_filter_is_applied_everywhere() {
    let config =
        AllowlistConfig::default().with_allowed_sources(SourceFilter::parse_list("partner"));
    let service = memory_service(config);
    service
        .ingest(vec![
            row(1, &[1]).source("partner"),
            row(2, &[1]).source("airdrop"),
            row(3, &[1]),
        ])
        .await
        .unwrap();

    assert!(service.is_eligible(&hex_address(1), 1).await.unwrap());
    assert!(!service.is_eligible(&hex_address(2), 1).await.unwrap());
    assert!(!service.is_eligible(&hex_address(3), 1).await.unwrap());

    assert!(service.get_proof(&hex_address(2), 1).await.unwrap().is_none());
    assert!(service.get_proof(&hex_address(1), 1).await.unwrap().is_some());

    let root = service.get_root(1).await.unwrap().unwrap();
    assert_eq!(root, leaf_hash(&address(1)));
}

#[tokio::test]
async fn root_does_not_depend_on_ingestion_order() {
    let forward = memory_service(AllowlistConfig::default());
    forward
        .ingest(vec![row(1, &[1]), row(2, &[1]), row(3, &[1])])
        .await
        .unwrap();

    let backward = memory_service(AllowlistConfig::default());
    backward
        .ingest(vec![row(3, &[1]), row(2, &[1]), row(1, &[1])])
        .await
        .unwrap();

    let expected = Commitment::build(vec![address(1), address(2), address(3)])
        .unwrap()
        .root();
    assert_eq!(forward.get_root(1).await.unwrap(), Some(expected));
    assert_eq!(backward.get_root(1).await.unwrap(), Some(expected));
}

#[tokio::test]
async fn ingestion_rebuilds_touched_token_ids() {
    let service = memory_service(AllowlistConfig::default());
    service.ingest(vec![row(1, &[1])]).await.unwrap();
    let before = service.get_root(1).await.unwrap();

    service.ingest(vec![row(2, &[1])]).await.unwrap();
    let after = service.get_root(1).await.unwrap();

    assert_ne!(before, after);
    assert_eq!(service.persisted_root(1).await.unwrap(), after);
    assert!(service.get_proof(&hex_address(2), 1).await.unwrap().is_some());
}

#[tokio::test]
async fn without_rebuild_on_ingest_a_proof_request_rebuilds() {
    let service = memory_service(AllowlistConfig::default().with_rebuild_on_ingest(false));
    service.ingest(vec![row(1, &[1])]).await.unwrap();
    let before = service.get_root(1).await.unwrap();

    service.ingest(vec![row(2, &[1])]).await.unwrap();
    assert_eq!(service.get_root(1).await.unwrap(), before);
    assert_eq!(service.registry().build_count(1), 1);

    // Eligible in the store but not yet committed: the proof rebuilds first
    let proof = service.get_proof(&hex_address(2), 1).await.unwrap().unwrap();
    let after = service.get_root(1).await.unwrap().unwrap();
    assert_ne!(Some(after), before);
    assert_eq!(proof.root, allowlist_core::merkle::to_hex(&after));
    assert_eq!(service.registry().build_count(1), 2);

    // Committed addresses are served from the cache
    service.get_proof(&hex_address(1), 1).await.unwrap().unwrap();
    assert_eq!(service.registry().build_count(1), 2);
}

#[tokio::test]
async fn proofs_cover_entries_written_by_another_writer() {
    let store = Arc::new(MemoryStore::new());
    let service = AllowlistService::with_store(Arc::clone(&store), AllowlistConfig::default());
    service.ingest(vec![row(1, &[1])]).await.unwrap();
    service.get_root(1).await.unwrap().unwrap();

    let mut entry = IncomingEntry::new(address(2));
    entry.token_ids.insert(1);
    store.bulk_upsert(&[entry], &MergePolicy::default()).unwrap();

    assert!(service.is_eligible(&hex_address(2), 1).await.unwrap());
    let (proof, root) = service
        .get_proof(&hex_address(2), 1)
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();
    let commitment = service.registry().peek(1).unwrap();
    assert_eq!(commitment.len(), 2);
    assert_eq!(root, commitment.root());
    assert!(verify_proof(leaf_hash(&address(2)), &proof, &root));
    assert_eq!(service.persisted_root(1).await.unwrap(), Some(commitment.root()));
}

#[tokio::test]
async fn empty_token_id_has_no_root() {
    let service = memory_service(AllowlistConfig::default());
    assert_eq!(service.get_root(5).await.unwrap(), None);
    assert_eq!(service.rebuild(5).await.unwrap(), None);
    assert_eq!(service.persisted_root(5).await.unwrap(), None);
}

#[tokio::test]
async fn removing_last_address_clears_root() {
    let service = memory_service(AllowlistConfig::default());
    service.ingest(vec![row(1, &[3])]).await.unwrap();
    assert!(service.persisted_root(3).await.unwrap().is_some());

    assert!(service.remove(&hex_address(1)).await.unwrap());
    assert!(!service.remove(&hex_address(1)).await.unwrap());
    assert!(!service.remove("bogus").await.unwrap());

    assert_eq!(service.get_root(3).await.unwrap(), None);
    assert_eq!(service.persisted_root(3).await.unwrap(), None);
}

#[tokio::test]
async fn forced_rebuild_observing_no_addresses_clears_root() {
    let store = Arc::new(MemoryStore::new());
    let service = AllowlistService::with_store(
        Arc::clone(&store),
        AllowlistConfig::default().with_rebuild_on_ingest(false),
    );
    service.ingest(vec![row(1, &[2])]).await.unwrap();
    assert!(service.get_root(2).await.unwrap().is_some());

    // Out-of-band delete, then the mandatory rebuild
    store.delete(&address(1)).unwrap();
    assert_eq!(service.rebuild(2).await.unwrap(), None);
    assert_eq!(service.get_root(2).await.unwrap(), None);
    assert_eq!(store.get_persisted_root(2).unwrap(), None);
}

#[tokio::test]
async fn rebuild_all_covers_cached_token_ids() {
    let service = memory_service(AllowlistConfig::default().with_rebuild_on_ingest(false));
    service.ingest(vec![row(1, &[1, 2])]).await.unwrap();
    service.get_root(1).await.unwrap();
    service.get_root(2).await.unwrap();

    service.ingest(vec![row(2, &[1, 2])]).await.unwrap();
    let roots = service.rebuild_all().await.unwrap();

    assert_eq!(roots.len(), 2);
    let expected = Commitment::build(vec![address(1), address(2)]).unwrap().root();
    assert_eq!(roots, vec![(1, Some(expected)), (2, Some(expected))]);
}

#[tokio::test]
async fn json_import() {
    let service = memory_service(AllowlistConfig::default());
    let json = format!(
        r#"[
            {{"address": "{}", "token_ids": [1, 2], "source": "partner", "note": "vip"}},
            {{"address": "{}", "token_ids": [1]}},
            {{"address": 42}}
        ]"#,
        hex_address(1),
        hex_address(2)
    );

    let report = service.ingest_json(&json).await.unwrap();
    assert_eq!(report.accepted, 2);
    assert!(matches!(report.rejected[0].reason, RowRejection::Malformed(_)));
    assert_eq!(report.touched_token_ids, vec![1, 2]);

    let err = service.ingest_json("{\"address\": 1}").await.unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
}

#[tokio::test]
async fn file_import_reads_rows_and_reports_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rows.json");
    std::fs::write(
        &path,
        format!(r#"[{{"address": "{}", "token_ids": [3]}}]"#, hex_address(1)),
    )
    .unwrap();

    let service = memory_service(AllowlistConfig::default());
    let report = service.ingest_file(&path).await.unwrap();
    assert_eq!(report.accepted, 1);
    assert!(service.is_eligible(&hex_address(1), 3).await.unwrap());

    let err = service
        .ingest_file(dir.path().join("missing.json"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn sqlite_service_persists_roots() {
    let dir = tempfile::tempdir().unwrap();
    let config = AllowlistConfig::default().with_database_path(dir.path().join("allowlist.db"));

    let root = {
        let service = open_sqlite(config.clone()).unwrap();
        service
            .ingest(vec![row(1, &[1]), row(2, &[1]), row(3, &[1])])
            .await
            .unwrap();
        service.get_root(1).await.unwrap()
    };
    assert!(root.is_some());

    let reopened = open_sqlite(config).unwrap();
    assert_eq!(reopened.persisted_root(1).await.unwrap(), root);
    assert_eq!(reopened.get_root(1).await.unwrap(), root);
    assert!(reopened.is_eligible(&hex_address(2), 1).await.unwrap());
}

/// Store whose every call fails with a backend error
struct FailingStore;

fn outage<T>() -> StoreResult<T> {
    Err(StoreError::Backend("connection refused".into()))
}

impl AllowlistStore for FailingStore {
    fn bulk_upsert(&self, _: &[IncomingEntry], _: &MergePolicy) -> StoreResult<UpsertStats> {
        outage()
    }
    fn get(&self, _: &Address) -> StoreResult<Option<AllowlistEntry>> {
        outage()
    }
    fn scan(&self, _: TokenId, _: &SourceFilter) -> StoreResult<Vec<Address>> {
        outage()
    }
    fn delete(&self, _: &Address) -> StoreResult<bool> {
        outage()
    }
    fn count(&self) -> StoreResult<usize> {
        outage()
    }
}

impl RootStore for FailingStore {
    fn persist_root(&self, _: TokenId, _: &Hash) -> StoreResult<()> {
        outage()
    }
    fn get_persisted_root(&self, _: TokenId) -> StoreResult<Option<Hash>> {
        outage()
    }
    fn clear_root(&self, _: TokenId) -> StoreResult<bool> {
        outage()
    }
}

#[tokio::test]
async fn storage_failures_are_retryable_errors() {
    let service = AllowlistService::new(FailingStore, AllowlistConfig::default());

    let err = service.ingest(vec![row(1, &[1])]).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, Error::Store(StoreError::Backend(_))));

    assert!(service.is_eligible(&hex_address(1), 1).await.unwrap_err().is_retryable());
    assert!(service.get_root(1).await.unwrap_err().is_retryable());
    assert!(service.registry().peek(1).is_none());

    // Malformed input never reaches the store
    assert!(!service.is_eligible("nope", 1).await.unwrap());
}

/// Memory store whose root writes fail
struct RootOutage(MemoryStore);

impl AllowlistStore for RootOutage {
    fn bulk_upsert(&self, e: &[IncomingEntry], p: &MergePolicy) -> StoreResult<UpsertStats> {
        self.0.bulk_upsert(e, p)
    }
    fn get(&self, a: &Address) -> StoreResult<Option<AllowlistEntry>> {
        self.0.get(a)
    }
    fn scan(&self, t: TokenId, f: &SourceFilter) -> StoreResult<Vec<Address>> {
        self.0.scan(t, f)
    }
    fn delete(&self, a: &Address) -> StoreResult<bool> {
        self.0.delete(a)
    }
    fn count(&self) -> StoreResult<usize> {
        self.0.count()
    }
}

impl RootStore for RootOutage {
    fn persist_root(&self, _: TokenId, _: &Hash) -> StoreResult<()> {
        outage()
    }
    fn get_persisted_root(&self, t: TokenId) -> StoreResult<Option<Hash>> {
        self.0.get_persisted_root(t)
    }
    fn clear_root(&self, t: TokenId) -> StoreResult<bool> {
        self.0.clear_root(t)
    }
}

#[tokio::test]
async fn failed_root_write_leaves_cache_untouched() {
    let service = AllowlistService::new(
        RootOutage(MemoryStore::new()),
        AllowlistConfig::default().with_rebuild_on_ingest(false),
    );
    service.ingest(vec![row(1, &[1])]).await.unwrap();

    assert!(service.get_root(1).await.is_err());
    assert!(service.registry().peek(1).is_none());
    assert_eq!(service.registry().build_count(1), 0);
}
