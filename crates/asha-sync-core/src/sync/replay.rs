//! Replay of the pending ledger and owed deletes.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::engine::{Pushed, SyncEngine};
use super::outcome::SyncReport;
use crate::db::Tombstone;
use crate::error::{EngineResult, ErrorCategory};
use crate::ledger::ConfirmMode;

/// Holds the single-pass flag; released on drop, including on early return.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    /// Replay every pending write in enqueue order, then every owed delete.
    ///
    /// Safe to call at any time. Only one pass runs at once; a call made
    /// while another is running returns immediately with `already_running`.
    pub async fn force_sync(&self) -> EngineResult<SyncReport> {
        let Some(_pass) = PassGuard::acquire(&self.syncing) else {
            info!("Sync pass already running");
            return Ok(SyncReport {
                already_running: true,
                ..SyncReport::default()
            });
        };

        let pass_id = Uuid::new_v4().to_string();
        let span = info_span!("sync_pass", %pass_id);
        let mut report = self.run_pass().instrument(span).await?;
        report.pass_id = Some(pass_id);
        Ok(report)
    }

    async fn run_pass(&self) -> EngineResult<SyncReport> {
        let mut report = SyncReport::default();
        let pending = self.list_pending()?;
        let tombstones = self.tombstones()?;
        info!(pending = pending.len(), deletes = tombstones.len(), "Sync pass started");

        if !self.is_online() {
            report.offline = true;
            report.skipped = (pending.len() + tombstones.len()) as u32;
            info!("Offline, nothing attempted");
            return Ok(report);
        }

        let mut remaining = pending.len();
        for entry in pending {
            if !self.is_online() {
                report.offline = true;
                break;
            }
            remaining -= 1;

            match self.push(entry.key(), ConfirmMode::Retain).await? {
                Pushed::Synced => report.succeeded += 1,
                Pushed::Gone => report.skipped += 1,
                Pushed::AwaitingParent | Pushed::Stale => report.deferred += 1,
                Pushed::Unbound(_) => report.failed += 1,
                Pushed::Failed(e) => {
                    report.failed += 1;
                    if e.category() == ErrorCategory::Connectivity {
                        warn!(error = %e, "Connection lost, ending pass");
                        report.offline = true;
                        break;
                    }
                }
            }
        }

        if report.offline {
            report.skipped += (remaining + tombstones.len()) as u32;
        } else {
            self.replay_deletes(tombstones, &mut report).await?;
        }

        self.store(|db| db.set_sync_state("last_sync_at", &Utc::now().to_rfc3339()))?;
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            deferred = report.deferred,
            skipped = report.skipped,
            deletes_confirmed = report.deletes_confirmed,
            deletes_failed = report.deletes_failed,
            "Sync pass finished"
        );
        Ok(report)
    }

    async fn replay_deletes(
        &self,
        tombstones: Vec<Tombstone>,
        report: &mut SyncReport,
    ) -> EngineResult<()> {
        for tombstone in tombstones {
            let (kind, server_id) = (tombstone.kind, tombstone.server_id);
            match self.remote().delete(kind, server_id).await {
                Ok(_) => {
                    self.store(|db| db.remove_tombstone(kind, server_id))?;
                    report.deletes_confirmed += 1;
                }
                Err(e) if e.is_not_found() => {
                    self.store(|db| db.remove_tombstone(kind, server_id))?;
                    report.deletes_confirmed += 1;
                }
                Err(e) => {
                    warn!(kind = %kind, server_id, error = %e, "Delete still owed");
                    self.store(|db| db.record_tombstone_failure(kind, server_id, &e.to_string()))?;
                    report.deletes_failed += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let first = PassGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(PassGuard::acquire(&flag).is_none());

        drop(first);
        assert!(PassGuard::acquire(&flag).is_some());
    }
}
