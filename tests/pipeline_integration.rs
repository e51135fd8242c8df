//! End-to-end tests for the ingest → clean → export pipeline.
//!
//! Each test assembles a `Pipeline` over an in-memory store with a fake
//! mailbox and a recording delivery channel, then inspects the tables.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use label_relay::channels::{Attachment, SourceMessage};
use label_relay::config::PipelineConfig;
use label_relay::error::{ConfigError, PipelineError};
use label_relay::lock::RunLock;
use label_relay::pipeline::{DispatchStatus, Pipeline};
use label_relay::store::{MemoryTableStore, TableStore};
use label_relay::table::{Cell, METADATA_PREFIX_WIDTH, Table, raw_header};
use label_relay::testing::{FailingStore, FakeScratchDocuments, FakeSource, RecordingDelivery};

const RECIPIENT: &str = "labels@carrier.test";

// ── Helpers ─────────────────────────────────────────────────────────

fn config(dir: &TempDir) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.lock.path = dir.path().join("label-relay.lock");
    config.report.recipient = RECIPIENT.to_string();
    config
}

/// Every configured table, with export columns Sender, Name, Vendor Tier.
fn memory_store(config: &PipelineConfig) -> Arc<MemoryTableStore> {
    let store = MemoryTableStore::with_tables(config.tables.all());
    store.put(
        &config.tables.export_columns,
        Table::new(
            vec!["Sender".into()],
            vec![vec![Cell::text("Name")], vec![Cell::text("Vendor Tier")]],
        ),
    );
    Arc::new(store)
}

/// A message with one CSV attachment, received `minutes_ago`.
fn csv_message(id: &str, sender: &str, minutes_ago: i64, body: &str) -> SourceMessage {
    SourceMessage {
        id: id.to_string(),
        sender: sender.to_string(),
        subject: format!("Orders {id}"),
        received_at: Utc::now() - Duration::minutes(minutes_ago),
        attachments: vec![Attachment::new(
            format!("{id}.csv"),
            "text/csv",
            body.as_bytes().to_vec(),
        )],
    }
}

fn table(store: &MemoryTableStore, name: &str) -> Table {
    store.snapshot(name).expect("table exists")
}

struct Harness {
    _dir: TempDir,
    config: PipelineConfig,
    store: Arc<MemoryTableStore>,
    source: Arc<FakeSource>,
    delivery: Arc<RecordingDelivery>,
}

impl Harness {
    fn new(messages: Vec<SourceMessage>) -> Self {
        Self::with_delivery(messages, RecordingDelivery::new())
    }

    fn with_delivery(messages: Vec<SourceMessage>, delivery: RecordingDelivery) -> Self {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let store = memory_store(&config);
        Self {
            _dir: dir,
            config,
            store,
            source: Arc::new(FakeSource::new(messages)),
            delivery: Arc::new(delivery),
        }
    }

    fn pipeline(&self) -> Pipeline {
        self.pipeline_over(self.store.clone())
    }

    fn pipeline_over(&self, store: Arc<dyn TableStore>) -> Pipeline {
        Pipeline::new(store, self.config.clone())
            .with_source(self.source.clone())
            .with_delivery(self.delivery.clone())
    }

    fn table(&self, name: &str) -> Table {
        table(&self.store, name)
    }
}

// ── Ingest and clean ────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_rows_across_messages_collapse_into_one_clean_row() {
    let h = Harness::new(vec![
        csv_message("m1", "acme@example.com", 30, "Name,Tier\nWidget,TIER 2\n"),
        csv_message("m2", "acme@example.com", 20, "Name,Tier\nWidget,TIER 2\n"),
    ]);
    let pipeline = h.pipeline();

    let ingest = pipeline.ingest().await.unwrap();
    assert_eq!(ingest.messages_fetched, 2);
    assert_eq!(ingest.rows_appended, 2);
    assert_eq!(h.source.marked(), vec!["m1", "m2"]);

    let clean = pipeline.clean().await.unwrap();
    assert_eq!(clean.rows_added, 1);
    assert_eq!(clean.rows_marked_processed, 2);
    assert_eq!(clean.duplicates_dropped, 1);

    let clean_table = h.table(&h.config.tables.clean);
    assert_eq!(clean_table.rows.len(), 1);
    let tier = clean_table.column_index("Vendor Tier").unwrap();
    assert_eq!(clean_table.rows[0][tier], Cell::text("B"));
    assert!(clean_table.rows[0][0].is_empty());

    let raw = h.table(&h.config.tables.raw);
    assert_eq!(raw.header, raw_header(&["Name".into(), "Tier".into()]));
    for row in &raw.rows {
        assert!(row[0].display().starts_with("Processed on "));
    }
}

#[tokio::test]
async fn second_clean_pass_adds_nothing() {
    let h = Harness::new(vec![csv_message(
        "m1",
        "acme@example.com",
        10,
        "Name,Tier\nWidget,TIER 1\nGadget,TIER 2\n",
    )]);
    let pipeline = h.pipeline();
    pipeline.ingest().await.unwrap();

    let first = pipeline.clean().await.unwrap();
    assert_eq!(first.rows_added, 2);

    let second = pipeline.clean().await.unwrap();
    assert_eq!(second.rows_added, 0);
    assert_eq!(second.rows_marked_processed, 0);
    assert_eq!(h.table(&h.config.tables.clean).rows.len(), 2);
}

#[tokio::test]
async fn duplicates_within_one_batch_collapse() {
    let h = Harness::new(vec![csv_message(
        "m1",
        "acme@example.com",
        10,
        "Name,Tier\nWidget,TIER 2\n Widget , TIER 2\nGadget,TIER 2\n",
    )]);
    let pipeline = h.pipeline();
    pipeline.ingest().await.unwrap();

    let report = pipeline.clean().await.unwrap();
    assert_eq!(report.rows_added, 2);
    assert_eq!(report.duplicates_dropped, 1);
    assert_eq!(report.rows_marked_processed, 3);
}

#[tokio::test]
async fn mismatched_header_is_skipped_but_message_is_marked() {
    let h = Harness::new(vec![
        csv_message("m1", "acme@example.com", 30, "Name,Tier\nWidget,TIER 2\n"),
        csv_message("m2", "globex@example.com", 20, "Tier,Name\nTIER 2,Widget\n"),
    ]);

    let report = h.pipeline().ingest().await.unwrap();
    assert_eq!(report.attachments_ingested, 1);
    assert_eq!(report.attachments_skipped, 1);
    assert_eq!(report.rows_appended, 1);
    assert!(h.source.is_marked("m2"));
    assert_eq!(h.table(&h.config.tables.raw).rows.len(), 1);
}

#[tokio::test]
async fn disabled_duplicate_check_keeps_every_row() {
    let mut h = Harness::new(vec![
        csv_message("m1", "acme@example.com", 30, "Name,Tier\nWidget,TIER 2\nWidget,TIER 2\n"),
        csv_message("m2", "acme@example.com", 20, "Name,Tier\nWidget,TIER 2\n"),
    ]);
    h.config.cleaning.duplicate_check = false;
    let pipeline = h.pipeline();
    pipeline.ingest().await.unwrap();

    let report = pipeline.clean().await.unwrap();
    assert_eq!(report.rows_added, 3);
    assert_eq!(report.duplicates_dropped, 0);
    assert_eq!(report.rows_marked_processed, 3);
    assert_eq!(h.table(&h.config.tables.clean).rows.len(), 3);
}

#[tokio::test]
async fn named_duplicate_columns_compare_only_those_columns() {
    let mut h = Harness::new(vec![csv_message(
        "m1",
        "acme@example.com",
        10,
        "Name,Tier\nWidget,TIER 1\nWidget,TIER 4\nGadget,TIER 1\n",
    )]);
    h.config.cleaning.duplicate_check_columns = vec!["Name".into()];
    let pipeline = h.pipeline();
    pipeline.ingest().await.unwrap();

    let report = pipeline.clean().await.unwrap();
    assert_eq!(report.rows_added, 2);
    assert_eq!(report.duplicates_dropped, 1);

    let clean = h.table(&h.config.tables.clean);
    let tier = clean.column_index("Vendor Tier").unwrap();
    assert_eq!(clean.rows[0][tier], Cell::text("A"));
    assert_eq!(clean.rows[1][METADATA_PREFIX_WIDTH], Cell::text("Gadget"));
}

#[tokio::test]
async fn unresolvable_duplicate_columns_treat_every_row_as_unique() {
    let mut h = Harness::new(vec![csv_message(
        "m1",
        "acme@example.com",
        10,
        "Name,Tier\nWidget,TIER 2\nWidget,TIER 2\n",
    )]);
    h.config.cleaning.duplicate_check_columns = vec!["Part Number".into()];
    let pipeline = h.pipeline();
    pipeline.ingest().await.unwrap();

    let report = pipeline.clean().await.unwrap();
    assert_eq!(report.rows_added, 2);
    assert_eq!(report.duplicates_dropped, 0);
}

#[tokio::test]
async fn missing_tier_column_fails_cleaning() {
    let h = Harness::new(vec![csv_message(
        "m1",
        "acme@example.com",
        10,
        "Name,Grade\nWidget,TIER 2\n",
    )]);
    let pipeline = h.pipeline();
    pipeline.ingest().await.unwrap();

    let err = pipeline.clean().await.unwrap_err();
    match err {
        PipelineError::Stage { stage, source } => {
            assert_eq!(stage, "cleaning");
            assert!(matches!(
                *source,
                PipelineError::Config(ConfigError::MissingColumn { ref column, .. }) if column == "Tier"
            ));
        }
        other => panic!("expected stage error, got {other:?}"),
    }
    assert!(!h.table(&h.config.tables.clean).has_data());
}

#[tokio::test]
async fn missing_status_column_fails_cleaning() {
    let h = Harness::new(Vec::new());
    h.store.put(
        &h.config.tables.raw,
        Table::new(
            vec!["Name".into(), "Tier".into()],
            vec![vec![Cell::text("Widget"), Cell::text("TIER 2")]],
        ),
    );

    let err = h.pipeline().clean().await.unwrap_err();
    match err {
        PipelineError::Stage { stage, source } => {
            assert_eq!(stage, "cleaning");
            assert!(matches!(
                *source,
                PipelineError::Config(ConfigError::MissingColumn { ref column, .. }) if column == "Status"
            ));
        }
        other => panic!("expected stage error, got {other:?}"),
    }
}

#[tokio::test]
async fn raw_rows_record_their_provenance() {
    let h = Harness::new(vec![csv_message(
        "m1",
        "acme@example.com",
        10,
        "Name,Tier\nWidget,TIER 2\nGadget,TIER 3\n",
    )]);
    h.pipeline().ingest().await.unwrap();

    let raw = h.table(&h.config.tables.raw);
    let sender = raw.column_index("Sender").unwrap();
    let filename = raw.column_index("Filename").unwrap();
    let original_row = raw.column_index("Original Row").unwrap();
    assert_eq!(raw.rows[0][sender], Cell::text("acme@example.com"));
    assert_eq!(raw.rows[0][filename], Cell::text("m1.csv"));
    assert_eq!(raw.rows[0][original_row], Cell::Number(2.0));
    assert_eq!(raw.rows[1][original_row], Cell::Number(3.0));
    assert_eq!(raw.rows[1][METADATA_PREFIX_WIDTH], Cell::text("Gadget"));
}

#[tokio::test]
async fn pdf_attachments_are_extracted_and_scratch_copies_removed() {
    let mut message = csv_message("m1", "acme@example.com", 10, "Name,Tier\nWidget,TIER 2\n");
    message
        .attachments
        .push(Attachment::new("label.pdf", "application/pdf", b"%PDF-1.4".to_vec()));
    let h = Harness::new(vec![message]);
    let docs = Arc::new(FakeScratchDocuments::with_text("  TRACKING 1Z999  "));

    let report = h
        .pipeline()
        .with_extractor(docs.clone())
        .ingest()
        .await
        .unwrap();
    assert_eq!(report.pdfs_extracted, 1);
    assert_eq!(report.pdf_failures, 0);
    assert_eq!(report.rows_appended, 1);

    let pdf = h.table(&h.config.tables.pdf);
    assert_eq!(pdf.rows.len(), 1);
    assert_eq!(pdf.rows[0][3], Cell::text("label.pdf"));
    assert_eq!(pdf.rows[0][4], Cell::text("TRACKING 1Z999"));
    assert!(docs.live().is_empty());
}

#[tokio::test]
async fn failed_pdf_extraction_stores_a_placeholder() {
    let mut message = csv_message("m1", "acme@example.com", 10, "Name,Tier\nWidget,TIER 2\n");
    message.attachments = vec![Attachment::new("scan.pdf", "application/pdf", b"%PDF".to_vec())];
    let h = Harness::new(vec![message]);

    let report = h
        .pipeline()
        .with_extractor(Arc::new(FakeScratchDocuments::failing_conversion("no text layer")))
        .ingest()
        .await
        .unwrap();
    assert_eq!(report.pdf_failures, 1);
    assert!(h.source.is_marked("m1"));

    let pdf = h.table(&h.config.tables.pdf);
    assert!(
        pdf.rows[0][4]
            .display()
            .starts_with("ERROR: Could not extract text")
    );
}

// ── Export ──────────────────────────────────────────────────────────

#[tokio::test]
async fn full_run_sends_and_logs_one_export_per_sender() {
    let h = Harness::new(vec![
        csv_message(
            "m1",
            "acme@example.com",
            30,
            "Name,Tier\nWidget,TIER 1\nGadget,TIER 2\nGizmo,TIER 3\n",
        ),
        csv_message(
            "m2",
            "globex@example.com",
            20,
            "Name,Tier\nSprocket,TIER 4\nFlange,TIER 6\n",
        ),
    ]);

    let report = h.pipeline().run().await.unwrap();
    assert_eq!(report.ingest.rows_appended, 5);
    assert_eq!(report.clean.rows_added, 5);
    assert_eq!(report.export.delivered(), 2);
    assert_eq!(report.export.failed(), 0);

    let sent = h.delivery.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].recipient, RECIPIENT);
    assert_eq!(sent[0].subject, "Shipping Label for customer: acme@example.com");
    assert!(sent[0].body.contains("Please generate 3 labels"));
    assert!(sent[0].attachment.name.starts_with("acme_example_com_"));
    assert!(sent[0].attachment.name.ends_with(".csv"));

    let csv = String::from_utf8(sent[0].attachment.bytes.clone()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "Sender,Name,Vendor Tier");
    assert!(lines[1].starts_with("acme@example.com,Widget,"));

    let log = h.table(&h.config.tables.mail_log);
    assert_eq!(log.header[0], "Timestamp");
    assert_eq!(log.rows.len(), 2);
    assert_eq!(log.rows[0][1], Cell::text(RECIPIENT));
    assert_eq!(log.rows[0][4], Cell::Number(3.0));
    assert_eq!(log.rows[1][4], Cell::Number(2.0));
}

#[tokio::test]
async fn every_clean_row_with_a_sender_lands_in_exactly_one_group() {
    let h = Harness::new(vec![]);
    let mut header = raw_header(&["Name".into(), "Tier".into()]);
    header.push("Vendor Tier".into());
    let row = |sender: &str, name: &str| {
        let mut row = vec![Cell::Empty; header.len()];
        row[2] = Cell::text(sender);
        row[METADATA_PREFIX_WIDTH] = Cell::text(name);
        row
    };
    h.store.put(
        &h.config.tables.clean,
        Table::new(
            header.clone(),
            vec![
                row("a@example.com", "one"),
                row(" a@example.com ", "two"),
                row("  ", "orphan"),
                row("b@example.com", "three"),
            ],
        ),
    );

    let report = h.pipeline().report().await.unwrap();
    let counts: Vec<(String, usize)> = report
        .groups
        .iter()
        .map(|g| (g.key.clone(), g.row_count))
        .collect();
    assert_eq!(
        counts,
        vec![("a@example.com".to_string(), 2), ("b@example.com".to_string(), 1)]
    );
    assert!(
        h.delivery
            .sent()
            .iter()
            .all(|m| !String::from_utf8_lossy(&m.attachment.bytes).contains("orphan"))
    );
}

#[tokio::test]
async fn failed_group_does_not_stop_the_others() {
    let h = Harness::with_delivery(
        vec![
            csv_message("m1", "acme@example.com", 30, "Name,Tier\nWidget,TIER 1\n"),
            csv_message("m2", "globex@example.com", 20, "Name,Tier\nFlange,TIER 6\n"),
        ],
        RecordingDelivery::failing_for("acme"),
    );

    let report = h.pipeline().run().await.unwrap();
    assert_eq!(report.export.failed(), 1);
    assert_eq!(report.export.delivered(), 1);
    assert!(matches!(
        report.export.groups[0].status,
        DispatchStatus::Failed(_)
    ));

    let sent = h.delivery.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.ends_with("globex@example.com"));

    let log = h.table(&h.config.tables.mail_log);
    assert_eq!(log.rows.len(), 1);
    assert_eq!(log.rows[0][2], Cell::text(sent[0].subject.as_str()));
}

#[tokio::test]
async fn send_without_log_entry_is_reported() {
    let h = Harness::new(vec![csv_message(
        "m1",
        "acme@example.com",
        10,
        "Name,Tier\nWidget,TIER 1\n",
    )]);
    let failing = Arc::new(FailingStore::new(h.store.clone()));
    failing.fail_appends_to(&h.config.tables.mail_log);

    let report = h.pipeline_over(failing).run().await.unwrap();
    assert_eq!(h.delivery.sent().len(), 1);
    assert_eq!(report.export.unlogged(), 1);
    assert!(matches!(
        report.export.groups[0].status,
        DispatchStatus::SentNotLogged(_)
    ));
    assert!(h.table(&h.config.tables.mail_log).rows.is_empty());
}

#[tokio::test]
async fn reporting_without_recipient_is_a_configuration_error() {
    let mut h = Harness::new(vec![csv_message(
        "m1",
        "acme@example.com",
        10,
        "Name,Tier\nWidget,TIER 1\n",
    )]);
    h.config.report.recipient = String::new();

    let err = h.pipeline().run().await.unwrap_err();
    match err {
        PipelineError::Stage { stage, source } => {
            assert_eq!(stage, "reporting");
            assert!(matches!(
                *source,
                PipelineError::Config(ConfigError::InvalidValue { .. })
            ));
        }
        other => panic!("expected stage error, got {other:?}"),
    }
    assert!(h.delivery.sent().is_empty());
}

#[tokio::test]
async fn missing_grouping_column_fails_reporting() {
    let mut h = Harness::new(vec![csv_message(
        "m1",
        "acme@example.com",
        10,
        "Name,Tier\nWidget,TIER 1\n",
    )]);
    h.config.report.grouping_column = "Customer".into();
    let pipeline = h.pipeline();
    pipeline.ingest().await.unwrap();
    pipeline.clean().await.unwrap();

    let err = pipeline.report().await.unwrap_err();
    match err {
        PipelineError::Stage { stage, source } => {
            assert_eq!(stage, "reporting");
            assert!(matches!(
                *source,
                PipelineError::Config(ConfigError::MissingColumn { ref column, .. }) if column == "Customer"
            ));
        }
        other => panic!("expected stage error, got {other:?}"),
    }
    assert!(h.delivery.sent().is_empty());
    assert!(!h.table(&h.config.tables.mail_log).has_data());
}

// ── Orchestration ───────────────────────────────────────────────────

#[tokio::test]
async fn failed_stage_stops_later_stages_and_next_run_recovers() {
    let h = Harness::new(vec![csv_message(
        "m1",
        "acme@example.com",
        10,
        "Name,Tier\nWidget,TIER 1\nGadget,TIER 2\n",
    )]);
    let failing = Arc::new(FailingStore::new(h.store.clone()));
    failing.fail_updates_to(&h.config.tables.raw);
    let pipeline = h.pipeline_over(failing.clone());

    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, PipelineError::Stage { stage: "cleaning", .. }));
    assert!(h.delivery.sent().is_empty());
    // The clean append landed before the status update failed.
    assert_eq!(h.table(&h.config.tables.clean).rows.len(), 2);

    failing.heal();
    let report = pipeline.run().await.unwrap();
    assert_eq!(report.clean.rows_added, 0);
    assert_eq!(report.clean.duplicates_dropped, 2);
    assert_eq!(report.clean.rows_marked_processed, 2);
    assert_eq!(h.table(&h.config.tables.clean).rows.len(), 2);
    assert_eq!(report.export.delivered(), 1);
}

#[tokio::test]
async fn held_lock_rejects_a_second_run() {
    let h = Harness::new(vec![]);
    let held = RunLock::acquire(&h.config.lock.path, StdDuration::from_secs(600)).unwrap();

    let err = h.pipeline().run().await.unwrap_err();
    assert!(matches!(err, PipelineError::Locked { .. }));
    let err = h.pipeline().clean().await.unwrap_err();
    assert!(matches!(err, PipelineError::Locked { .. }));

    drop(held);
    h.pipeline().run().await.unwrap();
    assert!(!h.config.lock.path.exists());
}

#[tokio::test]
async fn missing_source_fails_ingestion() {
    let h = Harness::new(vec![]);
    let pipeline = Pipeline::new(h.store.clone(), h.config.clone());

    let err = pipeline.ingest().await.unwrap_err();
    match err {
        PipelineError::Stage { stage, source } => {
            assert_eq!(stage, "ingestion");
            assert!(matches!(
                *source,
                PipelineError::Config(ConfigError::MissingCollaborator(_))
            ));
        }
        other => panic!("expected stage error, got {other:?}"),
    }
}

#[tokio::test]
async fn dedup_rewrites_table_keeping_first_occurrences() {
    let h = Harness::new(vec![]);
    let header: Vec<String> = ["Id", "Name", "Tier"].iter().map(|s| s.to_string()).collect();
    h.store.put(
        "Archive",
        Table::new(
            header,
            vec![
                vec![Cell::text("1"), Cell::text("Widget"), Cell::text("A")],
                vec![Cell::text("2"), Cell::text(" Widget "), Cell::text("A")],
                vec![Cell::text("3"), Cell::text("Gadget"), Cell::text("B")],
            ],
        ),
    );

    let report = h.pipeline().dedup("Archive", 1).await.unwrap();
    assert_eq!(report.kept, 2);
    assert_eq!(report.removed, 1);

    let archive = h.table("Archive");
    let ids: Vec<String> = archive.rows.iter().map(|r| r[0].display()).collect();
    assert_eq!(ids, vec!["1", "3"]);
}

#[tokio::test]
async fn cleanup_labels_makes_messages_fetchable_again() {
    let h = Harness::new(vec![csv_message(
        "m1",
        "acme@example.com",
        10,
        "Name,Tier\nWidget,TIER 1\n",
    )]);
    let pipeline = h.pipeline();
    pipeline.ingest().await.unwrap();
    assert!(h.source.is_marked("m1"));

    assert_eq!(pipeline.cleanup_labels(10).await.unwrap(), 1);
    assert!(!h.source.is_marked("m1"));
    assert_eq!(pipeline.ingest().await.unwrap().messages_fetched, 1);
}

#[tokio::test]
async fn configuration_check_reports_unreachable_source() {
    let h = Harness::new(vec![]);
    let pipeline = Pipeline::new(h.store.clone(), h.config.clone())
        .with_source(Arc::new(FakeSource::unreachable()));

    let report = pipeline.check_configuration().await;
    assert!(report.table_problems.is_empty());
    assert!(report.source_problem.is_some());
    assert!(!report.is_ok());

    let healthy = h.pipeline().check_configuration().await;
    assert!(healthy.is_ok());
}
