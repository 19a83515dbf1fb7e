use crate::config::Config;
use crate::core::message::MessageStatus;
use crate::core::outgoing::{OutgoingProcessor, SendOutcome};
use crate::error::{BitmessageError, Result};
use crate::storage::{Record, RecordStore, Storage};
use crate::utils::describe_duration;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Most records a queue entry refers to.
pub const MAX_REFS: usize = 2;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum QueueTask {
    SendMessage,
    DisseminatePubkey,
    DisseminateGetpubkey,
    SendAck,
}

/// Foreign key into one of the record stores.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum RecordRef {
    Address(u64),
    Message(u64),
    Payload(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct QueueRecord {
    pub id: Option<u64>,
    pub task: QueueTask,
    pub refs: Vec<RecordRef>,
    pub attempts: u32,
    pub created: u64,
    /// Zero until the first attempt.
    pub last_attempt_time: u64,
}

impl QueueRecord {
    pub fn new(task: QueueTask, refs: Vec<RecordRef>, now: u64) -> Result<QueueRecord> {
        if refs.is_empty() || refs.len() > MAX_REFS {
            return Err(BitmessageError::Format(format!(
                "{task:?} needs 1 to {MAX_REFS} record refs, got {}",
                refs.len()
            )));
        }
        Ok(QueueRecord {
            id: None,
            task,
            refs,
            attempts: 0,
            created: now,
            last_attempt_time: 0,
        })
    }

    /// Oldest activity first, then creation order.
    pub fn order_key(&self) -> (u64, u64, u64) {
        (
            self.last_attempt_time.max(self.created),
            self.created,
            self.id.unwrap_or(u64::MAX),
        )
    }

    pub fn is_due(&self, now: u64, retry_interval: u64) -> bool {
        self.attempts == 0 || now >= self.last_attempt_time.saturating_add(retry_interval)
    }

    fn message_ref(&self) -> Result<u64> {
        self.refs
            .iter()
            .find_map(|r| match r {
                RecordRef::Message(id) => Some(*id),
                _ => None,
            })
            .ok_or_else(|| self.missing_ref("message"))
    }

    fn address_ref(&self) -> Result<u64> {
        self.refs
            .iter()
            .find_map(|r| match r {
                RecordRef::Address(id) => Some(*id),
                _ => None,
            })
            .ok_or_else(|| self.missing_ref("address"))
    }

    fn payload_ref(&self) -> Result<u64> {
        self.refs
            .iter()
            .find_map(|r| match r {
                RecordRef::Payload(id) => Some(*id),
                _ => None,
            })
            .ok_or_else(|| self.missing_ref("payload"))
    }

    fn missing_ref(&self, kind: &str) -> BitmessageError {
        BitmessageError::Format(format!("{:?} entry has no {kind} ref", self.task))
    }
}

impl Record for QueueRecord {
    const KIND: &'static str = "queue entry";

    fn id(&self) -> Option<u64> {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }
}

/// Adds a task unless an identical one is already waiting.
pub fn enqueue(
    store: &dyn RecordStore<QueueRecord>,
    task: QueueTask,
    refs: Vec<RecordRef>,
    now: u64,
) -> Result<QueueRecord> {
    let mut record = QueueRecord::new(task, refs, now)?;
    let existing = store.search(&|queued: &QueueRecord| {
        queued.task == record.task && queued.refs == record.refs
    })?;
    if let Some(queued) = existing.into_iter().next() {
        debug!("{task:?} already queued as {:?}", queued.id);
        return Ok(queued);
    }
    store.add(&mut record)?;
    Ok(record)
}

/// Entries whose retry interval has passed, oldest first.
pub fn due_records(
    store: &dyn RecordStore<QueueRecord>,
    now: u64,
    retry_interval: u64,
) -> Result<Vec<QueueRecord>> {
    let mut due = store.search(&|record: &QueueRecord| record.is_due(now, retry_interval))?;
    due.sort_by_key(QueueRecord::order_key);
    Ok(due)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueReport {
    pub completed: usize,
    pub retried: usize,
    pub dropped: usize,
}

enum Attempt {
    Done,
    NotYet,
}

/// Drives queued tasks through the outgoing pipeline. Only transport
/// failures and missing pubkeys are retried; anything else drops the task.
pub struct QueueRunner {
    storage: Arc<dyn Storage>,
    outgoing: OutgoingProcessor,
    max_attempts: u32,
    retry_interval: u64,
}

impl QueueRunner {
    pub fn new(outgoing: OutgoingProcessor, config: &Config) -> QueueRunner {
        QueueRunner {
            storage: outgoing.storage(),
            outgoing,
            max_attempts: config.queue_max_attempts,
            retry_interval: config.queue_retry_interval,
        }
    }

    pub fn run_due(&self, now: u64) -> Result<QueueReport> {
        let mut report = QueueReport::default();
        for mut record in due_records(self.storage.queue(), now, self.retry_interval)? {
            let Some(id) = record.id else {
                continue;
            };
            let result = self.execute(&record);
            match result {
                Ok(Attempt::Done) => {
                    debug!("{:?} entry {id} completed", record.task);
                    self.storage.queue().delete(id)?;
                    report.completed += 1;
                }
                Ok(Attempt::NotYet) => self.record_attempt(&mut record, now, &mut report)?,
                Err(e) if e.is_retryable() => {
                    warn!("{:?} entry {id} failed, will retry: {e}", record.task);
                    self.record_attempt(&mut record, now, &mut report)?;
                }
                Err(e) => {
                    error!("{:?} entry {id} failed permanently: {e}", record.task);
                    self.give_up(&record)?;
                    report.dropped += 1;
                }
            }
        }
        if report != QueueReport::default() {
            info!(
                "Queue pass: {} completed, {} to retry, {} dropped",
                report.completed, report.retried, report.dropped
            );
        }
        Ok(report)
    }

    fn execute(&self, record: &QueueRecord) -> Result<Attempt> {
        match record.task {
            QueueTask::SendMessage => match self.outgoing.send_message(record.message_ref()?)? {
                SendOutcome::Sent(_) => Ok(Attempt::Done),
                SendOutcome::AwaitingPubkey => Ok(Attempt::NotYet),
            },
            QueueTask::DisseminatePubkey => {
                self.outgoing.disseminate_pubkey(record.address_ref()?)?;
                Ok(Attempt::Done)
            }
            QueueTask::DisseminateGetpubkey => {
                let message = self.outgoing.load_message(record.message_ref()?)?;
                self.outgoing.request_pubkey_for(&message.to_address)?;
                Ok(Attempt::Done)
            }
            QueueTask::SendAck => {
                self.outgoing.disseminate_payload(record.payload_ref()?)?;
                Ok(Attempt::Done)
            }
        }
    }

    fn record_attempt(
        &self,
        record: &mut QueueRecord,
        now: u64,
        report: &mut QueueReport,
    ) -> Result<()> {
        record.attempts += 1;
        record.last_attempt_time = now;
        if record.attempts >= self.max_attempts {
            warn!(
                "{:?} entry {:?} gave up after {} attempts over {}",
                record.task,
                record.id,
                record.attempts,
                describe_duration(now.saturating_sub(record.created))
            );
            self.give_up(record)?;
            report.dropped += 1;
        } else {
            self.storage.queue().update(record)?;
            report.retried += 1;
        }
        Ok(())
    }

    fn give_up(&self, record: &QueueRecord) -> Result<()> {
        if record.task == QueueTask::SendMessage {
            if let Ok(id) = record.message_ref() {
                if let Some(mut message) = self.storage.messages().get(id)? {
                    if message.status != MessageStatus::Disseminated {
                        message.status = MessageStatus::Failed;
                        self.storage.messages().update(&message)?;
                    }
                }
            }
        }
        if let Some(id) = record.id {
            self.storage.queue().delete(id)?;
        }
        Ok(())
    }
}
