//! In-memory collaborators for tests.
//!
//! Public so integration tests under `tests/` can assemble a full pipeline
//! without a mailbox, an SMTP server, or an OCR tool.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::channels::delivery::{Delivery, OutboundMessage};
use crate::channels::source::{FetchQuery, MessageSource, SourceMessage};
use crate::error::{ChannelError, ExtractError, StoreError};
use crate::extract::ScratchDocuments;
use crate::store::{CellUpdate, MemoryTableStore, TableStore};
use crate::table::{Row, Table};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Source ──────────────────────────────────────────────────────────

/// A mailbox held in memory. Marked messages are hidden from fetches.
#[derive(Default)]
pub struct FakeSource {
    messages: Mutex<Vec<SourceMessage>>,
    marked: Mutex<HashSet<String>>,
    mark_log: Mutex<Vec<String>>,
    unreachable: bool,
}

impl FakeSource {
    pub fn new(messages: Vec<SourceMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
            ..Default::default()
        }
    }

    /// A source whose every call fails.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }

    /// Deliver another message into the mailbox.
    pub fn push(&self, message: SourceMessage) {
        lock(&self.messages).push(message);
    }

    /// Ids passed to `mark_fetched`, in call order.
    pub fn marked(&self) -> Vec<String> {
        lock(&self.mark_log).clone()
    }

    pub fn is_marked(&self, id: &str) -> bool {
        lock(&self.marked).contains(id)
    }

    fn check_reachable(&self) -> Result<(), ChannelError> {
        if self.unreachable {
            return Err(ChannelError::FetchFailed {
                name: "fake".into(),
                reason: "unreachable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_unprocessed(
        &self,
        query: &FetchQuery,
    ) -> Result<Vec<SourceMessage>, ChannelError> {
        self.check_reachable()?;
        let marked = lock(&self.marked).clone();
        let mut found: Vec<SourceMessage> = lock(&self.messages)
            .iter()
            .filter(|m| !marked.contains(&m.id) && m.received_at >= query.since)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.received_at);
        let skip = found.len().saturating_sub(query.max_messages);
        Ok(found.split_off(skip))
    }

    async fn mark_fetched(&self, id: &str, _label: &str) -> Result<(), ChannelError> {
        self.check_reachable()?;
        lock(&self.marked).insert(id.to_string());
        lock(&self.mark_log).push(id.to_string());
        Ok(())
    }

    async fn clear_fetched_marks(&self, _label: &str, max: usize) -> Result<usize, ChannelError> {
        self.check_reachable()?;
        let mut marked = lock(&self.marked);
        let cleared: Vec<String> = marked.iter().take(max).cloned().collect();
        for id in &cleared {
            marked.remove(id);
        }
        Ok(cleared.len())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        if self.unreachable {
            return Err(ChannelError::HealthCheckFailed {
                name: "fake".into(),
            });
        }
        Ok(())
    }
}

// ── Delivery ────────────────────────────────────────────────────────

/// Records every message it is asked to send.
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<OutboundMessage>>,
    fail_when_subject_contains: Option<String>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail sends whose subject contains `needle`.
    pub fn failing_for(needle: impl Into<String>) -> Self {
        Self {
            fail_when_subject_contains: Some(needle.into()),
            ..Default::default()
        }
    }

    /// Successfully sent messages, in order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        if let Some(needle) = &self.fail_when_subject_contains
            && message.subject.contains(needle.as_str())
        {
            return Err(ChannelError::SendFailed {
                name: "recording".into(),
                reason: format!("refusing to send {}", message.attachment.name),
            });
        }
        lock(&self.sent).push(message.clone());
        Ok(())
    }
}

// ── Scratch documents ───────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum FailAt {
    #[default]
    Nowhere,
    Convert,
    Read,
}

/// Scratch store that "OCRs" every PDF into a fixed text.
#[derive(Default)]
pub struct FakeScratchDocuments {
    text: String,
    reason: String,
    fail_at: FailAt,
    fail_delete_prefix: Option<String>,
    counter: AtomicUsize,
    live: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeScratchDocuments {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn failing_conversion(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fail_at: FailAt::Convert,
            ..Default::default()
        }
    }

    pub fn failing_read(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fail_at: FailAt::Read,
            ..Default::default()
        }
    }

    /// Make deletes of ids starting with `prefix` fail.
    pub fn fail_deletes_of(mut self, prefix: impl Into<String>) -> Self {
        self.fail_delete_prefix = Some(prefix.into());
        self
    }

    /// Successfully deleted ids, in order.
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    /// Ids created and not yet deleted.
    pub fn live(&self) -> Vec<String> {
        lock(&self.live).clone()
    }

    fn create(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let id = format!("{prefix}-{n}");
        lock(&self.live).push(id.clone());
        id
    }
}

#[async_trait]
impl ScratchDocuments for FakeScratchDocuments {
    async fn upload_pdf(&self, _name: &str, _bytes: &[u8]) -> Result<String, ExtractError> {
        Ok(self.create("upload"))
    }

    async fn convert_with_ocr(
        &self,
        source_id: &str,
        _language: &str,
    ) -> Result<String, ExtractError> {
        if self.fail_at == FailAt::Convert {
            return Err(ExtractError::Convert {
                name: source_id.to_string(),
                reason: self.reason.clone(),
            });
        }
        Ok(self.create("converted"))
    }

    async fn read_text(&self, converted_id: &str) -> Result<String, ExtractError> {
        if self.fail_at == FailAt::Read {
            return Err(ExtractError::Read {
                id: converted_id.to_string(),
                reason: self.reason.clone(),
            });
        }
        Ok(self.text.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), ExtractError> {
        if self
            .fail_delete_prefix
            .as_deref()
            .is_some_and(|p| id.starts_with(p))
        {
            return Err(ExtractError::Cleanup {
                id: id.to_string(),
                reason: "permission denied".into(),
            });
        }
        lock(&self.live).retain(|live| live != id);
        lock(&self.deleted).push(id.to_string());
        Ok(())
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// A `MemoryTableStore` that can be told to fail writes to chosen tables.
pub struct FailingStore {
    inner: Arc<MemoryTableStore>,
    fail_appends: Mutex<HashSet<String>>,
    fail_updates: Mutex<HashSet<String>>,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryTableStore>) -> Self {
        Self {
            inner,
            fail_appends: Mutex::new(HashSet::new()),
            fail_updates: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_appends_to(&self, table: &str) {
        lock(&self.fail_appends).insert(table.to_string());
    }

    pub fn fail_updates_to(&self, table: &str) {
        lock(&self.fail_updates).insert(table.to_string());
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        lock(&self.fail_appends).clear();
        lock(&self.fail_updates).clear();
    }

    fn injected(table: &str, op: &str) -> StoreError {
        StoreError::Query(format!("{op} on {table}: injected failure"))
    }
}

#[async_trait]
impl TableStore for FailingStore {
    async fn read_table(&self, name: &str) -> Result<Table, StoreError> {
        self.inner.read_table(name).await
    }

    async fn append_rows(
        &self,
        name: &str,
        header: Option<&[String]>,
        rows: &[Row],
    ) -> Result<(), StoreError> {
        if lock(&self.fail_appends).contains(name) {
            return Err(Self::injected(name, "append_rows"));
        }
        self.inner.append_rows(name, header, rows).await
    }

    async fn update_cells(&self, name: &str, updates: &[CellUpdate]) -> Result<(), StoreError> {
        if lock(&self.fail_updates).contains(name) {
            return Err(Self::injected(name, "update_cells"));
        }
        self.inner.update_cells(name, updates).await
    }

    async fn rewrite_table(
        &self,
        name: &str,
        header: &[String],
        rows: &[Row],
    ) -> Result<(), StoreError> {
        self.inner.rewrite_table(name, header, rows).await
    }

    async fn ensure_table(&self, name: &str) -> Result<(), StoreError> {
        self.inner.ensure_table(name).await
    }
}
