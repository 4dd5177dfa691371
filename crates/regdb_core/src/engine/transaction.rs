//! Transaction scope of the storage engine.

use super::{EngineState, LogRecord, StorageEngine};
use crate::error::{RegistryError, RegistryResult};
use std::collections::BTreeMap;
use std::thread::{self, ThreadId};
use tracing::{debug, error, trace, warn};

/// The transaction currently owned by one thread.
#[derive(Debug)]
pub(super) struct TxState {
    pub(super) owner: ThreadId,
    /// Number of nested `begin` calls inside the outer one.
    pub(super) depth: usize,
    /// Set by a nested `cancel`; the outer `commit` must then fail.
    pub(super) cancelled: bool,
    /// Staged writes, `None` meaning delete.
    pub(super) writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl TxState {
    fn new(owner: ThreadId) -> Self {
        Self {
            owner,
            depth: 0,
            cancelled: false,
            writes: BTreeMap::new(),
        }
    }
}

impl StorageEngine {
    /// Starts a transaction, or joins the one this thread already owns.
    ///
    /// Blocks while another thread of this process owns a transaction, then
    /// while another process holds the write lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the write lock cannot be taken or pending records
    /// from other processes cannot be replayed.
    pub fn begin(&self) -> RegistryResult<()> {
        let me = thread::current().id();
        let mut slot = self.txn.lock();
        loop {
            match slot.as_mut() {
                Some(tx) if tx.owner == me => {
                    tx.depth += 1;
                    trace!(depth = tx.depth, "joined enclosing transaction");
                    return Ok(());
                }
                Some(_) => self.txn_done.wait(&mut slot),
                None => break,
            }
        }
        *slot = Some(TxState::new(me));
        drop(slot);

        if let Err(e) = self.acquire_writer() {
            *self.txn.lock() = None;
            self.txn_done.notify_all();
            return Err(e);
        }
        Ok(())
    }

    /// Commits the transaction owned by this thread.
    ///
    /// A nested commit only closes its scope. The outer commit writes all
    /// staged records followed by a commit record in one append and
    /// advances the sequence number. A commit with nothing staged writes
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::TransactionAborted`] if a nested scope was
    /// cancelled, [`RegistryError::InvalidOperation`] if this thread owns no
    /// transaction, or the storage error that made the write fail. In every
    /// error case nothing was applied.
    pub fn commit(&self) -> RegistryResult<()> {
        let mut slot = self.txn.lock();
        let tx = Self::owned(&mut slot)?;
        if tx.depth > 0 {
            tx.depth -= 1;
            return Ok(());
        }

        let cancelled = tx.cancelled;
        let writes = std::mem::take(&mut tx.writes);

        let result = if cancelled {
            debug!("discarding transaction cancelled by a nested scope");
            Err(RegistryError::transaction_aborted(
                "a nested scope was cancelled",
            ))
        } else if writes.is_empty() {
            trace!("commit with no writes");
            Ok(())
        } else {
            self.write_batch(writes)
        };

        if let Err(e) = self.release_writer() {
            error!(error = %e, "failed to release write lock after commit");
        }
        *slot = None;
        self.txn_done.notify_all();
        result
    }

    /// Cancels the transaction owned by this thread.
    ///
    /// A nested cancel dooms the outer transaction, whose commit will then
    /// fail. The outer cancel discards all staged writes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidOperation`] if this thread owns no
    /// transaction, or an error if the write lock cannot be released.
    pub fn cancel(&self) -> RegistryResult<()> {
        let mut slot = self.txn.lock();
        let tx = Self::owned(&mut slot)?;
        if tx.depth > 0 {
            tx.depth -= 1;
            tx.cancelled = true;
            return Ok(());
        }

        debug!(staged = tx.writes.len(), "transaction cancelled");
        *slot = None;
        self.txn_done.notify_all();
        drop(slot);
        self.release_writer()
    }

    /// Returns true if this thread owns a transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.with_own_txn(|_| ()).is_some()
    }

    /// Runs `f` inside a transaction.
    ///
    /// Commits when `f` succeeds and cancels when it fails. If the cancel
    /// itself fails the database state is unknown and the process aborts.
    ///
    /// # Errors
    ///
    /// Returns the error of `begin`, of `f`, or of `commit`.
    pub fn transaction<T>(&self, f: impl FnOnce() -> RegistryResult<T>) -> RegistryResult<T> {
        self.begin()?;
        match f() {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(cancel_err) = self.cancel() {
                    error!(
                        error = %cancel_err,
                        cause = %e,
                        "failed to cancel transaction; aborting"
                    );
                    std::process::abort();
                }
                Err(e)
            }
        }
    }

    pub(super) fn with_implicit_txn(
        &self,
        f: impl FnOnce() -> RegistryResult<()>,
    ) -> RegistryResult<()> {
        if self.in_transaction() {
            f()
        } else {
            self.transaction(f)
        }
    }

    pub(super) fn with_own_txn<R>(&self, f: impl FnOnce(&mut TxState) -> R) -> Option<R> {
        let me = thread::current().id();
        let mut slot = self.txn.lock();
        slot.as_mut().filter(|tx| tx.owner == me).map(f)
    }

    /// Returns this thread's staged write for `key`, if any.
    pub(super) fn staged(&self, key: &str) -> Option<Option<Vec<u8>>> {
        self.with_own_txn(|tx| tx.writes.get(key).cloned()).flatten()
    }

    pub(super) fn stage(&self, key: &str, value: Option<Vec<u8>>) {
        let staged = self.with_own_txn(|tx| {
            tx.writes.insert(key.to_string(), value);
        });
        debug_assert!(staged.is_some(), "stage called outside a transaction");
    }

    fn owned(slot: &mut Option<TxState>) -> RegistryResult<&mut TxState> {
        let me = thread::current().id();
        slot.as_mut()
            .filter(|tx| tx.owner == me)
            .ok_or_else(|| RegistryError::invalid_operation("no transaction in progress"))
    }

    fn acquire_writer(&self) -> RegistryResult<()> {
        if let Some(lock) = &self.lock {
            lock.lock_exclusive()?;
        }

        let prepared = {
            let mut state = self.state.lock();
            Self::catch_up(&mut state).and_then(|()| Self::drop_torn_tail(&mut state))
        };

        if let Err(e) = prepared {
            if let Err(unlock_err) = self.release_writer() {
                error!(error = %unlock_err, "failed to release write lock");
            }
            return Err(e);
        }
        Ok(())
    }

    fn release_writer(&self) -> RegistryResult<()> {
        if let Some(lock) = &self.lock {
            lock.unlock_exclusive()?;
        }
        Ok(())
    }

    fn drop_torn_tail(state: &mut EngineState) -> RegistryResult<()> {
        let size = state.backend.size()?;
        if size > state.applied_len {
            warn!(
                offset = state.applied_len,
                bytes = size - state.applied_len,
                "truncating incomplete transaction left by a crashed writer"
            );
            state.backend.truncate(state.applied_len)?;
        }
        Ok(())
    }

    fn append_batch(state: &mut EngineState, buf: &[u8], sync: bool) -> RegistryResult<()> {
        state.backend.append(buf)?;
        state.backend.flush()?;
        if sync {
            state.backend.sync()?;
        }
        Ok(())
    }

    fn write_batch(&self, writes: BTreeMap<String, Option<Vec<u8>>>) -> RegistryResult<()> {
        let mut state = self.state.lock();
        let sequence = state.seqnum.next();

        let mut buf = Vec::new();
        for (key, write) in &writes {
            let record = match write {
                Some(value) => LogRecord::Put {
                    key: key.clone(),
                    value: value.clone(),
                },
                None => LogRecord::Delete { key: key.clone() },
            };
            record.encode_into(&mut buf)?;
        }
        LogRecord::Commit { sequence }.encode_into(&mut buf)?;

        let start = state.applied_len;
        if let Err(e) = Self::append_batch(&mut state, &buf, self.options.sync_on_commit) {
            error!(error = %e, seqnum = sequence.as_u64(), "commit failed");
            if let Err(truncate_err) = state.backend.truncate(start) {
                warn!(error = %truncate_err, "failed to truncate failed commit");
            }
            return Err(e);
        }

        for (key, write) in writes {
            match write {
                Some(value) => {
                    state.index.insert(key, value);
                }
                None => {
                    state.index.remove(&key);
                }
            }
        }
        state.applied_len = start + buf.len() as u64;
        state.seqnum = sequence;

        trace!(seqnum = sequence.as_u64(), bytes = buf.len(), "committed");
        Ok(())
    }
}
