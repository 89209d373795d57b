//! Outbound notification seam.
//!
//! The protocol core only ever *requests* a notification; delivery mechanics
//! (push, email) live behind this trait in an external collaborator. Emits are
//! fire-and-forget: no result flows back into the core, a failed delivery is
//! the implementation's problem to log, and nothing here can roll back an
//! already-committed state transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::verification::VerificationOutcome;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A verification token was issued; tell the subject to confirm before it
    /// expires.
    async fn verification_pending(
        &self,
        subject_id: i64,
        session_id: i64,
        expires_at: DateTime<Utc>,
    );

    /// A confirmation was processed; relay the outcome with a human-readable
    /// message.
    async fn verification_outcome(
        &self,
        subject_id: i64,
        session_id: i64,
        outcome: &VerificationOutcome,
        message: &str,
    );
}

/// Default emitter: writes deliveries to the log and nothing else.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn verification_pending(
        &self,
        subject_id: i64,
        session_id: i64,
        expires_at: DateTime<Utc>,
    ) {
        log::info!(
            "notify subject {subject_id}: verification pending for session {session_id}, expires {expires_at}"
        );
    }

    async fn verification_outcome(
        &self,
        subject_id: i64,
        session_id: i64,
        outcome: &VerificationOutcome,
        message: &str,
    ) {
        log::info!(
            "notify subject {subject_id}: session {session_id} outcome {} ({:.1} m): {message}",
            outcome.reason.as_str(),
            outcome.distance_meters,
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Delivery {
        Pending {
            subject_id: i64,
            session_id: i64,
        },
        Outcome {
            subject_id: i64,
            session_id: i64,
            reason: crate::verification::ConfirmReason,
            message: String,
        },
    }

    /// Test double that records every emit.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub deliveries: Mutex<Vec<Delivery>>,
    }

    impl RecordingNotifier {
        pub fn taken(&self) -> Vec<Delivery> {
            self.deliveries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn verification_pending(
            &self,
            subject_id: i64,
            session_id: i64,
            _expires_at: DateTime<Utc>,
        ) {
            self.deliveries.lock().unwrap().push(Delivery::Pending {
                subject_id,
                session_id,
            });
        }

        async fn verification_outcome(
            &self,
            subject_id: i64,
            session_id: i64,
            outcome: &VerificationOutcome,
            message: &str,
        ) {
            self.deliveries.lock().unwrap().push(Delivery::Outcome {
                subject_id,
                session_id,
                reason: outcome.reason,
                message: message.to_owned(),
            });
        }
    }
}
