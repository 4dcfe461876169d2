//! Custody Flow Tests
//!
//! End-to-end checkout, checkin and QA resolution against the in-memory
//! store, with scripted recognition results and an in-memory image store.
//! No network, no disk.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use toolcrib::storage::{
    CatalogSeed, ScanDetailRepository, ScanRepository, ToolSetRecord, TransactionRepository,
    TransactionResolutionRepository,
};
use toolcrib::types::{NewScanDetail, NewTransaction, Role, ScanDetail, ToolType, Transaction, User};
use toolcrib::{
    CustodyError, CustodyService, CustodySettings, ErrorKind, ImageStore, InMemoryStore,
    RecognitionError, RecognitionService, RecognizedTool, Repositories, RequestContext,
    ResolutionReason, ScanDirection, ScanRequest, ScanResult, StoreError, TransactionDirection,
    TransactionStatus, UploadError, UploadedImage,
};

// ============================================================================
// Fakes
// ============================================================================

/// Recognition service replaying scripted results in order.
#[derive(Default)]
struct ScriptedRecognition {
    script: Mutex<VecDeque<Result<ScanResult, RecognitionError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedRecognition {
    fn push(&self, detections: Vec<RecognizedTool>) {
        self.script.lock().unwrap().push_back(Ok(ScanResult {
            detections,
            debug_image_url: Some("mem://debug.jpg".to_string()),
        }));
    }

    fn push_err(&self, err: RecognitionError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionService for ScriptedRecognition {
    async fn scan(&self, _request: &ScanRequest) -> Result<ScanResult, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ScanResult::default()))
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Default)]
struct MemoryImages {
    uploads: AtomicUsize,
}

#[async_trait]
impl ImageStore for MemoryImages {
    async fn upload(&self, data: &[u8], hint: &str) -> Result<UploadedImage, UploadError> {
        if data.is_empty() {
            return Err(UploadError::Empty);
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(UploadedImage {
            key: format!("{hint}/{n}.jpg"),
            url: format!("mem://{hint}/{n}.jpg"),
            content_type: "image/jpeg".to_string(),
            size_bytes: data.len(),
            etag: format!("{n:032x}"),
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Transaction repository whose next `update` can be made to fail.
struct FlakyTransactions {
    inner: Arc<InMemoryStore>,
    fail_next_update: AtomicBool,
}

impl FlakyTransactions {
    fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            fail_next_update: AtomicBool::new(false),
        }
    }

    fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransactionRepository for FlakyTransactions {
    async fn create(&self, new: NewTransaction) -> Result<Transaction, StoreError> {
        TransactionRepository::create(&*self.inner, new).await
    }

    async fn update(&self, transaction: &Transaction) -> Result<Transaction, StoreError> {
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("disk hiccup".into()));
        }
        TransactionRepository::update(&*self.inner, transaction).await
    }

    async fn get_by_id(&self, id: u64) -> Result<Transaction, StoreError> {
        TransactionRepository::get_by_id(&*self.inner, id).await
    }

    async fn get_open_or_escalated_by_user(
        &self,
        user_id: u64,
    ) -> Result<Option<Transaction>, StoreError> {
        TransactionRepository::get_open_or_escalated_by_user(&*self.inner, user_id).await
    }

    async fn get_latest_failed_by_user(
        &self,
        user_id: u64,
    ) -> Result<Option<Transaction>, StoreError> {
        TransactionRepository::get_latest_failed_by_user(&*self.inner, user_id).await
    }

    async fn list(&self, status: Option<TransactionStatus>) -> Result<Vec<Transaction>, StoreError> {
        TransactionRepository::list(&*self.inner, status).await
    }
}

/// Scan detail repository that rejects its first `failures` writes.
struct FlakyScanDetails {
    inner: Arc<InMemoryStore>,
    failures: AtomicUsize,
}

#[async_trait]
impl ScanDetailRepository for FlakyScanDetails {
    async fn create(&self, new: NewScanDetail) -> Result<ScanDetail, StoreError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Backend("disk full".into()));
        }
        ScanDetailRepository::create(&*self.inner, new).await
    }

    async fn list_by_scan(&self, scan_id: u64) -> Result<Vec<ScanDetail>, StoreError> {
        ScanDetailRepository::list_by_scan(&*self.inner, scan_id).await
    }
}

// ============================================================================
// Fixture
// ============================================================================

const ENGINEER: &str = "E-1";
const ENGINEER_NO_DEFAULT: &str = "E-2";
const AUDITOR: &str = "Q-1";
const PHOTO: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3];

const WRENCH: u64 = 1;
const PLIERS: u64 = 2;
const STRANGER: u64 = 99;

fn seed() -> CatalogSeed {
    CatalogSeed {
        roles: vec![
            Role { id: 1, name: "Engineer".into() },
            Role { id: 2, name: "Quality Auditor".into() },
        ],
        users: vec![
            User {
                id: 10,
                employee_id: ENGINEER.into(),
                full_name: "Ivan Petrov".into(),
                role_id: 1,
                default_tool_set_id: Some(1),
            },
            User {
                id: 11,
                employee_id: ENGINEER_NO_DEFAULT.into(),
                full_name: "Anna Sidorova".into(),
                role_id: 1,
                default_tool_set_id: None,
            },
            User {
                id: 20,
                employee_id: AUDITOR.into(),
                full_name: "Olga QA".into(),
                role_id: 2,
                default_tool_set_id: None,
            },
        ],
        tool_types: vec![
            ToolType {
                id: WRENCH,
                part_number: "PN-100".into(),
                name: "Torque wrench".into(),
                reference_embedding: vec![1.0, 0.0],
            },
            ToolType {
                id: PLIERS,
                part_number: "PN-200".into(),
                name: "Safety wire pliers".into(),
                reference_embedding: vec![0.0, 1.0],
            },
        ],
        tool_sets: vec![ToolSetRecord {
            id: 1,
            name: "Line kit".into(),
            tool_type_ids: vec![WRENCH, PLIERS],
        }],
    }
}

struct Harness {
    service: Arc<CustodyService>,
    store: Arc<InMemoryStore>,
    recognition: Arc<ScriptedRecognition>,
    images: Arc<MemoryImages>,
}

fn seeded_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::with_catalog(&seed()).unwrap())
}

fn harness_with(recognition: ScriptedRecognition) -> Harness {
    let store = seeded_store();
    build_harness(store.clone(), Repositories::from_store(store), recognition)
}

/// Harness over `repos`; `store` is the backend the assertions read.
fn build_harness(
    store: Arc<InMemoryStore>,
    repos: Repositories,
    recognition: ScriptedRecognition,
) -> Harness {
    let recognition = Arc::new(recognition);
    let images = Arc::new(MemoryImages::default());
    let service = CustodyService::new(
        repos,
        recognition.clone(),
        images.clone(),
        CustodySettings::default(),
    );
    Harness {
        service: Arc::new(service),
        store,
        recognition,
        images,
    }
}

fn harness() -> Harness {
    harness_with(ScriptedRecognition::default())
}

fn good(id: u64) -> RecognizedTool {
    let embedding = match id {
        WRENCH => vec![1.0, 0.0],
        PLIERS => vec![0.0, 1.0],
        _ => vec![0.5, 0.5],
    };
    RecognizedTool::new(id, 0.99, embedding)
}

/// Right tool, confidence below the acceptance threshold.
fn doubtful(id: u64) -> RecognizedTool {
    RecognizedTool {
        confidence: 0.7,
        ..good(id)
    }
}

fn ctx() -> RequestContext {
    RequestContext::new()
}

impl Harness {
    async fn open_checkout(&self) -> u64 {
        self.recognition.push(vec![good(WRENCH), good(PLIERS)]);
        let response = self
            .service
            .checkout(&ctx(), ENGINEER, PHOTO, None)
            .await
            .unwrap();
        assert_eq!(response.status, TransactionStatus::Open);
        response.transaction_id
    }

    async fn transaction_count(&self) -> usize {
        self.store.list(None).await.unwrap().len()
    }
}

// ============================================================================
// Checkout
// ============================================================================

#[tokio::test]
async fn checkout_with_every_tool_accepted_opens_transaction() {
    let h = harness();
    h.recognition.push(vec![good(WRENCH), good(PLIERS)]);

    let response = h.service.checkout(&ctx(), ENGINEER, PHOTO, None).await.unwrap();

    assert_eq!(response.status, TransactionStatus::Open);
    assert_eq!(response.direction, TransactionDirection::Checkout);
    assert_eq!(response.classification.accepted.len(), 2);
    assert!(response.classification.is_clean());
    assert_eq!(response.count_of_checks, 0);
    assert_eq!(response.attempts_remaining, 3);
    assert_eq!(response.image_url, "mem://checkout/1.jpg");
    assert_eq!(response.debug_image_url.as_deref(), Some("mem://debug.jpg"));

    let scans = h.store.list_by_transaction(response.transaction_id).await.unwrap();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].direction, ScanDirection::Checkout);
    assert_eq!(h.store.list_by_scan(scans[0].id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn checkout_with_unrecognized_tool_fails() {
    let h = harness();
    h.recognition.push(vec![good(WRENCH), good(PLIERS), good(STRANGER)]);

    let response = h.service.checkout(&ctx(), ENGINEER, PHOTO, None).await.unwrap();

    assert_eq!(response.status, TransactionStatus::Failed);
    assert_eq!(response.classification.unrecognized.len(), 1);
    assert_eq!(response.attempts_remaining, 0);
}

#[tokio::test]
async fn failed_checkout_row_is_reused() {
    let h = harness();
    h.recognition.push(vec![good(WRENCH)]);
    let failed = h.service.checkout(&ctx(), ENGINEER, PHOTO, None).await.unwrap();
    assert_eq!(failed.status, TransactionStatus::Failed);
    assert_eq!(failed.classification.missing.len(), 1);

    h.recognition.push(vec![good(WRENCH), good(PLIERS)]);
    let retry = h.service.checkout(&ctx(), ENGINEER, PHOTO, None).await.unwrap();

    assert_eq!(retry.transaction_id, failed.transaction_id);
    assert_eq!(retry.status, TransactionStatus::Open);
    assert_eq!(h.transaction_count().await, 1);
    // Both attempts keep their evidence
    assert_eq!(h.store.list_by_transaction(retry.transaction_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn weak_manual_check_fails_checkout() {
    let h = harness();
    let weak = RecognizedTool {
        confidence: 0.3,
        ..good(PLIERS)
    };
    h.recognition.push(vec![good(WRENCH), weak]);

    let response = h.service.checkout(&ctx(), ENGINEER, PHOTO, None).await.unwrap();

    assert_eq!(response.classification.manual_check.len(), 1);
    assert_eq!(response.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn manual_check_above_floor_still_opens() {
    let h = harness();
    h.recognition.push(vec![good(WRENCH), doubtful(PLIERS)]);

    let response = h.service.checkout(&ctx(), ENGINEER, PHOTO, None).await.unwrap();

    assert_eq!(response.classification.manual_check.len(), 1);
    assert_eq!(response.status, TransactionStatus::Open);
}

#[tokio::test]
async fn second_checkout_while_open_is_refused() {
    let h = harness();
    let first = h.open_checkout().await;
    let calls = h.recognition.calls();

    let err = h.service.checkout(&ctx(), ENGINEER, PHOTO, None).await.unwrap_err();

    assert!(matches!(
        err.root(),
        CustodyError::UnfinishedCheckout { transaction_id } if *transaction_id == first
    ));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.code(), "unfinished_checkout");
    assert_eq!(h.transaction_count().await, 1);
    assert_eq!(h.recognition.calls(), calls);
}

#[tokio::test]
async fn concurrent_checkouts_for_one_user_create_one_transaction() {
    let h = harness();
    h.recognition.push(vec![good(WRENCH), good(PLIERS)]);
    h.recognition.push(vec![good(WRENCH), good(PLIERS)]);

    let (c1, c2) = (ctx(), ctx());
    let (a, b) = tokio::join!(
        h.service.checkout(&c1, ENGINEER, PHOTO, None),
        h.service.checkout(&c2, ENGINEER, PHOTO, None)
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.code() == "unfinished_checkout"));
    assert_eq!(h.transaction_count().await, 1);
}

#[tokio::test]
async fn failed_scan_write_does_not_leave_an_open_loan() {
    let store = seeded_store();
    let mut repos = Repositories::from_store(store.clone());
    repos.scan_details = Arc::new(FlakyScanDetails {
        inner: store.clone(),
        failures: AtomicUsize::new(1),
    });
    let h = build_harness(store, repos, ScriptedRecognition::default());
    h.recognition.push(vec![good(WRENCH), good(PLIERS)]);
    h.recognition.push(vec![good(WRENCH), good(PLIERS)]);

    let err = h.service.checkout(&ctx(), ENGINEER, PHOTO, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Store);
    assert!(h.store.get_open_or_escalated_by_user(10).await.unwrap().is_none());

    let retry = h.service.checkout(&ctx(), ENGINEER, PHOTO, None).await.unwrap();
    assert_eq!(retry.status, TransactionStatus::Open);
    assert_eq!(h.transaction_count().await, 1);
}

#[tokio::test]
async fn explicit_tool_set_must_exist() {
    let h = harness();
    let err = h.service.checkout(&ctx(), ENGINEER, PHOTO, Some(404)).await.unwrap_err();
    assert!(matches!(err.root(), CustodyError::ToolSetNotFound(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.images.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn user_without_any_tool_set_is_refused() {
    let h = harness();
    let err = h
        .service
        .checkout(&ctx(), ENGINEER_NO_DEFAULT, PHOTO, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.root(),
        CustodyError::NoToolSetAssigned { employee_id } if employee_id == ENGINEER_NO_DEFAULT
    ));
    assert_eq!(err.code(), "no_tool_set_assigned");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.recognition.calls(), 0);
}

#[tokio::test]
async fn unknown_user_and_empty_photo() {
    let h = harness();

    let err = h.service.check(&ctx(), "nobody", PHOTO, None).await.unwrap_err();
    assert!(matches!(err.root(), CustodyError::UserNotFound(id) if id == "nobody"));

    let err = h.service.check(&ctx(), ENGINEER, &[], None).await.unwrap_err();
    assert!(matches!(err, CustodyError::EmptyImage));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.recognition.calls(), 0);
}

// ============================================================================
// Checkin
// ============================================================================

#[tokio::test]
async fn clean_checkin_closes() {
    let h = harness();
    let id = h.open_checkout().await;

    h.recognition.push(vec![good(WRENCH), good(PLIERS)]);
    let response = h.service.checkin(&ctx(), ENGINEER, PHOTO).await.unwrap();

    assert_eq!(response.transaction_id, id);
    assert_eq!(response.direction, TransactionDirection::Checkin);
    assert_eq!(response.status, TransactionStatus::Closed);
    assert_eq!(response.count_of_checks, 1);
    assert_eq!(response.image_url, "mem://checkin/2.jpg");
    assert!(h.store.get_open_or_escalated_by_user(10).await.unwrap().is_none());
}

#[tokio::test]
async fn checkin_without_open_transaction_has_nothing_to_return() {
    let h = harness();
    let err = h.service.checkin(&ctx(), ENGINEER, PHOTO).await.unwrap_err();
    assert!(matches!(err.root(), CustodyError::NothingToReturn));
    assert_eq!(h.images.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_limit_is_reported_before_recognition_runs() {
    let h = harness();
    let id = h.open_checkout().await;

    let mut statuses = Vec::new();
    for _ in 0..3 {
        h.recognition.push(vec![good(WRENCH)]);
        let response = h.service.checkin(&ctx(), ENGINEER, PHOTO).await.unwrap();
        statuses.push((response.status, response.count_of_checks, response.attempts_remaining));
    }
    assert_eq!(
        statuses,
        vec![
            (TransactionStatus::Open, 1, 2),
            (TransactionStatus::Open, 2, 1),
            (TransactionStatus::QaVerification, 3, 0),
        ]
    );

    let calls = h.recognition.calls();
    let err = h.service.checkin(&ctx(), ENGINEER, PHOTO).await.unwrap_err();

    assert!(matches!(
        err.root(),
        CustodyError::RetryLimitExceeded { transaction_id, attempts: 3 } if *transaction_id == id
    ));
    assert_eq!(err.code(), "retry_limit_exceeded");
    assert_eq!(h.recognition.calls(), calls);

    let stored = h.store.get_by_id(id).await.unwrap();
    assert_eq!(stored.count_of_checks, 3);
    assert_eq!(stored.status, TransactionStatus::QaVerification);
}

#[tokio::test]
async fn many_problems_escalate_at_once_and_block_further_checkins() {
    let h = harness();
    h.open_checkout().await;

    // two manual checks + two strangers = four problems
    h.recognition.push(vec![doubtful(WRENCH), doubtful(PLIERS), good(STRANGER), good(STRANGER)]);
    let response = h.service.checkin(&ctx(), ENGINEER, PHOTO).await.unwrap();
    assert_eq!(response.status, TransactionStatus::QaVerification);
    assert_eq!(response.count_of_checks, 1);

    let err = h.service.checkin(&ctx(), ENGINEER, PHOTO).await.unwrap_err();
    assert!(matches!(err.root(), CustodyError::AwaitingQa { .. }));
    assert_eq!(err.code(), "awaiting_qa");
}

#[tokio::test]
async fn check_routes_by_held_transaction() {
    let h = harness();
    h.recognition.push(vec![good(WRENCH), good(PLIERS)]);
    h.recognition.push(vec![good(WRENCH), good(PLIERS)]);

    let out = h.service.check(&ctx(), ENGINEER, PHOTO, None).await.unwrap();
    assert_eq!(out.direction, TransactionDirection::Checkout);

    let back = h.service.check(&ctx(), ENGINEER, PHOTO, None).await.unwrap();
    assert_eq!(back.direction, TransactionDirection::Checkin);
    assert_eq!(back.transaction_id, out.transaction_id);
    assert_eq!(back.status, TransactionStatus::Closed);
}

#[tokio::test]
async fn recognition_failure_leaves_storage_untouched() {
    let h = harness();
    h.recognition.push_err(RecognitionError::Unavailable("connection refused".into()));
    let err = h.service.checkout(&ctx(), ENGINEER, PHOTO, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert_eq!(h.transaction_count().await, 0);

    let id = h.open_checkout().await;
    h.recognition.push_err(RecognitionError::Status(502));
    let err = h.service.checkin(&ctx(), ENGINEER, PHOTO).await.unwrap_err();
    assert_eq!(err.code(), "recognition_failed");

    let stored = h.store.get_by_id(id).await.unwrap();
    assert_eq!(stored.count_of_checks, 0);
    assert_eq!(stored.status, TransactionStatus::Open);
    assert_eq!(h.store.list_by_transaction(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cancelled_request_aborts_before_upload() {
    let h = harness();
    let ctx = RequestContext::new();
    ctx.cancel();

    let err = h.service.checkout(&ctx, ENGINEER, PHOTO, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.images.uploads.load(Ordering::SeqCst), 0);
    assert_eq!(h.recognition.calls(), 0);
    assert_eq!(h.transaction_count().await, 0);
}

#[tokio::test]
async fn slow_recognition_times_out_without_writes() {
    let h = harness_with(ScriptedRecognition {
        delay: Some(Duration::from_secs(5)),
        ..ScriptedRecognition::default()
    });
    let ctx = RequestContext::new().with_timeout(Duration::from_millis(50));

    let err = h.service.checkout(&ctx, ENGINEER, PHOTO, None).await.unwrap_err();

    assert_eq!(err.code(), "timeout");
    assert_eq!(h.transaction_count().await, 0);
}

// ============================================================================
// QA
// ============================================================================

async fn escalate(h: &Harness) -> u64 {
    let id = h.open_checkout().await;
    h.recognition.push(vec![doubtful(WRENCH), doubtful(PLIERS), good(STRANGER), good(STRANGER)]);
    let response = h.service.checkin(&ctx(), ENGINEER, PHOTO).await.unwrap();
    assert_eq!(response.status, TransactionStatus::QaVerification);
    id
}

#[tokio::test]
async fn verify_closes_escalated_transaction_once() {
    let h = harness();
    let id = escalate(&h).await;

    let confirmation = h
        .service
        .verify(&ctx(), id, AUDITOR, "HUMAN_ERR", "pliers left in hangar", Some(vec![PLIERS]))
        .await
        .unwrap();

    assert_eq!(confirmation.status, TransactionStatus::Closed);
    assert_eq!(confirmation.reason, ResolutionReason::HumanError);
    assert_eq!(confirmation.qa_employee_id, AUDITOR);
    assert_eq!(confirmation.qa_full_name, "Olga QA");
    assert_eq!(h.store.get_by_id(id).await.unwrap().status, TransactionStatus::Closed);

    let stored = h.store.get_by_transaction(id).await.unwrap().unwrap();
    assert_eq!(stored.tool_type_ids, Some(vec![PLIERS]));

    let err = h
        .service
        .verify(&ctx(), id, AUDITOR, "MODEL_ERR", "", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.root(),
        CustodyError::NotEscalated { status: TransactionStatus::Closed, .. }
    ));
}

#[tokio::test]
async fn verify_after_failed_close_finishes_the_job() {
    let store = seeded_store();
    let transactions = Arc::new(FlakyTransactions::new(store.clone()));
    let mut repos = Repositories::from_store(store.clone());
    repos.transactions = transactions.clone();
    let h = build_harness(store, repos, ScriptedRecognition::default());
    let id = escalate(&h).await;

    transactions.fail_next_update();
    let err = h
        .service
        .verify(&ctx(), id, AUDITOR, "HUMAN_ERR", "wrench missing", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Store);
    assert_eq!(h.store.get_by_id(id).await.unwrap().status, TransactionStatus::QaVerification);
    assert!(h.store.get_by_transaction(id).await.unwrap().is_some());

    let confirmation = h
        .service
        .verify(&ctx(), id, AUDITOR, "HUMAN_ERR", "retry", None)
        .await
        .unwrap();

    assert_eq!(confirmation.status, TransactionStatus::Closed);
    // The first verdict stands
    assert_eq!(confirmation.notes, "wrench missing");
    assert_eq!(h.store.get_by_id(id).await.unwrap().status, TransactionStatus::Closed);
}

#[tokio::test]
async fn verify_waits_for_the_holders_checkin() {
    let h = harness_with(ScriptedRecognition {
        delay: Some(Duration::from_millis(100)),
        ..ScriptedRecognition::default()
    });
    let id = h.open_checkout().await;
    for _ in 0..2 {
        h.recognition.push(vec![good(WRENCH)]);
        h.service.checkin(&ctx(), ENGINEER, PHOTO).await.unwrap();
    }

    // Third failed checkin escalates while verify is already waiting
    h.recognition.push(vec![good(WRENCH)]);
    let service = h.service.clone();
    let checkin = tokio::spawn(async move { service.checkin(&ctx(), ENGINEER, PHOTO).await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let confirmation = h
        .service
        .verify(&ctx(), id, AUDITOR, "MODEL_ERR", "glare", None)
        .await
        .unwrap();

    let escalated = checkin.await.unwrap().unwrap();
    assert_eq!(escalated.status, TransactionStatus::QaVerification);
    assert_eq!(confirmation.status, TransactionStatus::Closed);
}

#[tokio::test]
async fn lock_table_is_empty_between_requests() {
    let h = harness();
    let id = escalate(&h).await;
    h.service
        .verify(&ctx(), id, AUDITOR, "MODEL_ERR", "", None)
        .await
        .unwrap();
    let _ = h.service.checkin(&ctx(), ENGINEER_NO_DEFAULT, PHOTO).await;

    assert_eq!(h.service.lock_entries(), 0);
}

#[tokio::test]
async fn verify_keeps_explicit_empty_tool_list() {
    let h = harness();
    let id = escalate(&h).await;

    h.service
        .verify(&ctx(), id, AUDITOR, "MODEL_ERR", "glare on tray", Some(vec![]))
        .await
        .unwrap();

    let stored = h.store.get_by_transaction(id).await.unwrap().unwrap();
    assert_eq!(stored.tool_type_ids, Some(vec![]));
    assert_eq!(stored.reason, ResolutionReason::ModelError);
}

#[tokio::test]
async fn verify_rejects_bad_input() {
    let h = harness();
    let id = escalate(&h).await;

    let err = h
        .service
        .verify(&ctx(), id, AUDITOR, "BOTH_ERR", "", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_reason");
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h
        .service
        .verify(&ctx(), id, ENGINEER, "MODEL_ERR", "", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_quality_auditor");

    let err = h
        .service
        .verify(&ctx(), 777, AUDITOR, "MODEL_ERR", "", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Nothing was resolved along the way
    assert!(h.store.get_by_transaction(id).await.unwrap().is_none());
    assert_eq!(
        h.store.get_by_id(id).await.unwrap().status,
        TransactionStatus::QaVerification
    );
}

#[tokio::test]
async fn verify_of_open_transaction_is_not_escalated() {
    let h = harness();
    let id = h.open_checkout().await;

    let err = h
        .service
        .verify(&ctx(), id, AUDITOR, "MODEL_ERR", "", None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "not_escalated");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn qa_list_filters_by_status() {
    let h = harness();
    let escalated = escalate(&h).await;

    h.recognition.push(vec![good(WRENCH)]);
    h.service
        .checkout(&ctx(), ENGINEER_NO_DEFAULT, PHOTO, Some(1))
        .await
        .unwrap();

    let all = h.service.list_transactions(None).await.unwrap();
    assert_eq!(all.len(), 2);

    let qa = h
        .service
        .list_transactions(Some(TransactionStatus::QaVerification))
        .await
        .unwrap();
    assert_eq!(qa.len(), 1);
    assert_eq!(qa[0].transaction_id, escalated);
    assert_eq!(qa[0].employee_id, ENGINEER);
    assert_eq!(qa[0].full_name, "Ivan Petrov");
    assert_eq!(qa[0].count_of_checks, 1);
}

#[tokio::test]
async fn qa_view_rebuilds_buckets_from_latest_scan() {
    let h = harness();
    let id = escalate(&h).await;

    let view = h.service.qa_transaction(id).await.unwrap();

    assert_eq!(view.transaction.status, TransactionStatus::QaVerification);
    assert_eq!(view.employee_id, ENGINEER);
    assert_eq!(view.tool_set_name, "Line kit");
    assert_eq!(view.scan.direction, ScanDirection::Checkin);
    assert_eq!(view.classification.manual_check.len(), 2);
    assert_eq!(view.classification.unrecognized.len(), 2);
    assert!(view.classification.missing.is_empty());
    assert!(view.resolution.is_none());

    let err = h.service.qa_transaction(404).await.unwrap_err();
    assert_eq!(err.code(), "transaction_not_found");
}
