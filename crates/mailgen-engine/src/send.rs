use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use mailgen_core::delivery::{DeliveryReceipt, Mailer, OutboundEmail};
use mailgen_core::errors::GatewayError;
use mailgen_core::ids::{DraftId, SentEmailId, UserId};
use mailgen_store::{Database, DraftRepo, SentEmailRepo, StoreError};
use mailgen_telemetry::MetricsRecorder;
use tracing::{error, info, instrument};

use crate::error::EngineError;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Debug)]
pub struct SendRequest {
    pub subject: String,
    pub content: String,
    pub recipients: Vec<String>,
    pub draft_id: Option<DraftId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendReport {
    pub sent_email_id: SentEmailId,
    pub recipient_count: usize,
}

impl SendReport {
    pub fn message(&self) -> String {
        format!(
            "Email sent successfully to {} recipient(s)",
            self.recipient_count
        )
    }
}

#[derive(Debug)]
pub struct RecipientOutcome {
    pub recipient: String,
    pub result: Result<DeliveryReceipt, GatewayError>,
}

/// Settled result of one fan-out, one entry per recipient in request order.
#[derive(Debug)]
pub struct SendOutcome {
    pub recipients: Vec<RecipientOutcome>,
}

impl SendOutcome {
    pub fn total(&self) -> usize {
        self.recipients.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecipientOutcome> {
        self.recipients.iter().filter(|r| r.result.is_err())
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn all_delivered(&self) -> bool {
        self.failed() == 0
    }
}

/// Dispatches one message per recipient and records the send only when
/// every recipient was accepted.
pub struct SendOrchestrator {
    mailer: Option<Arc<dyn Mailer>>,
    drafts: DraftRepo,
    sent: SentEmailRepo,
    from: String,
    timeout: Duration,
    metrics: Arc<MetricsRecorder>,
}

impl SendOrchestrator {
    pub fn new(
        mailer: Option<Arc<dyn Mailer>>,
        db: Database,
        from: impl Into<String>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            mailer,
            drafts: DraftRepo::new(db.clone()),
            sent: SentEmailRepo::new(db),
            from: from.into(),
            timeout: DEFAULT_SEND_TIMEOUT,
            metrics,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.mailer.is_some()
    }

    /// Send to every recipient concurrently and wait for all of them.
    /// Individual failures never cancel the remaining sends.
    pub async fn dispatch(
        &self,
        mailer: &dyn Mailer,
        subject: &str,
        html: &str,
        recipients: &[String],
    ) -> SendOutcome {
        let sends = recipients.iter().map(|recipient| async move {
            let email = OutboundEmail {
                from: self.from.clone(),
                to: recipient.clone(),
                subject: subject.to_string(),
                html: html.to_string(),
            };
            let result = match tokio::time::timeout(self.timeout, mailer.send_one(&email)).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout(self.timeout)),
            };
            RecipientOutcome {
                recipient: recipient.clone(),
                result,
            }
        });

        SendOutcome {
            recipients: join_all(sends).await,
        }
    }

    #[instrument(skip(self, request), fields(user_id = %owner, recipients = request.recipients.len()))]
    pub async fn send(&self, owner: &UserId, request: SendRequest) -> Result<SendReport, EngineError> {
        let mailer = self
            .mailer
            .as_ref()
            .ok_or_else(|| GatewayError::NotConfigured("Email service".into()))?;

        if let Some(draft_id) = &request.draft_id {
            match self.drafts.get(draft_id, owner) {
                Ok(_) => {}
                Err(StoreError::NotFound(_)) => {
                    return Err(EngineError::DraftNotFound(draft_id.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let html = mailgen_mail::text_to_html(&request.content);
        let outcome = self
            .dispatch(mailer.as_ref(), &request.subject, &html, &request.recipients)
            .await;

        for r in &outcome.recipients {
            let status = if r.result.is_ok() { "delivered" } else { "failed" };
            self.metrics
                .counter_inc("send.recipients", &[("status", status)], 1);
        }

        if !outcome.all_delivered() {
            for failure in outcome.failures() {
                if let Err(e) = &failure.result {
                    error!(recipient = %failure.recipient, error = %e, "email send failed");
                }
            }
            self.metrics
                .counter_inc("send.requests", &[("outcome", "partial_failure")], 1);
            return Err(EngineError::PartialSendFailure {
                failed: outcome.failed(),
                total: outcome.total(),
            });
        }

        let record = self.sent.record_send(
            owner,
            &request.subject,
            &request.content,
            &request.recipients,
            request.draft_id.as_ref(),
        )?;

        self.metrics
            .counter_inc("send.requests", &[("outcome", "success")], 1);
        info!(sent_email_id = %record.id, "email sent");

        Ok(SendReport {
            sent_email_id: record.id,
            recipient_count: outcome.total(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailgen_mail::mock::MockMailer;
    use mailgen_store::{DraftStatus, NewDraft, UserRepo};

    struct Harness {
        orchestrator: SendOrchestrator,
        mailer: Arc<MockMailer>,
        db: Database,
        ana: UserId,
        bo: UserId,
        metrics: Arc<MetricsRecorder>,
    }

    fn harness(mailer: MockMailer) -> Harness {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        let ana = users.get_or_create("ana@example.com", None).unwrap().id;
        let bo = users.get_or_create("bo@example.com", None).unwrap().id;
        let mailer = Arc::new(mailer);
        let metrics = Arc::new(MetricsRecorder::new());
        let orchestrator = SendOrchestrator::new(
            Some(mailer.clone() as Arc<dyn Mailer>),
            db.clone(),
            "noreply@localhost.com",
            metrics.clone(),
        );
        Harness {
            orchestrator,
            mailer,
            db,
            ana,
            bo,
            metrics,
        }
    }

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn request(recipients: &[&str], draft_id: Option<DraftId>) -> SendRequest {
        SendRequest {
            subject: "Friday lunch".into(),
            content: "Hi all,\nLunch is Friday.".into(),
            recipients: addrs(recipients),
            draft_id,
        }
    }

    fn make_draft(h: &Harness, owner: &UserId) -> DraftId {
        let recipients = addrs(&["a@example.com"]);
        DraftRepo::new(h.db.clone())
            .create(NewDraft {
                user_id: owner,
                prompt: "lunch",
                subject: "Friday lunch",
                content: "Hi",
                recipients: &recipients,
            })
            .unwrap()
            .id
    }

    fn sent_count(h: &Harness, owner: &UserId) -> u64 {
        SentEmailRepo::new(h.db.clone()).count_for_owner(owner).unwrap()
    }

    #[tokio::test]
    async fn partial_failure_records_nothing() {
        let h = harness(MockMailer::new().fail_for("b@example.com"));
        let err = h
            .orchestrator
            .send(&h.ana, request(&["a@example.com", "b@example.com", "c@example.com"], None))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::PartialSendFailure { failed: 1, total: 3 }
        ));
        let mut delivered: Vec<_> = h.mailer.delivered().into_iter().map(|e| e.to).collect();
        delivered.sort();
        assert_eq!(delivered, addrs(&["a@example.com", "c@example.com"]));
        assert_eq!(sent_count(&h, &h.ana), 0);
        assert_eq!(
            h.metrics.counter_get("send.recipients", &[("status", "failed")]),
            1
        );
    }

    #[tokio::test]
    async fn partial_failure_leaves_draft_unsent() {
        let h = harness(MockMailer::new().fail_for("b@example.com"));
        let draft_id = make_draft(&h, &h.ana);
        h.orchestrator
            .send(&h.ana, request(&["a@example.com", "b@example.com"], Some(draft_id.clone())))
            .await
            .unwrap_err();
        let draft = DraftRepo::new(h.db.clone()).get(&draft_id, &h.ana).unwrap();
        assert_eq!(draft.status, DraftStatus::Draft);
    }

    #[tokio::test]
    async fn full_success_marks_draft_sent() {
        let h = harness(MockMailer::new());
        let draft_id = make_draft(&h, &h.ana);
        let report = h
            .orchestrator
            .send(&h.ana, request(&["a@example.com", "b@example.com"], Some(draft_id.clone())))
            .await
            .unwrap();

        assert_eq!(report.recipient_count, 2);
        assert_eq!(report.message(), "Email sent successfully to 2 recipient(s)");

        let draft = DraftRepo::new(h.db.clone()).get(&draft_id, &h.ana).unwrap();
        assert_eq!(draft.status, DraftStatus::Sent);

        let sent = SentEmailRepo::new(h.db.clone()).list_for_owner(&h.ana, 10).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, report.sent_email_id);
        assert_eq!(sent[0].recipients, addrs(&["a@example.com", "b@example.com"]));
        assert_eq!(sent[0].content, "Hi all,\nLunch is Friday.");
    }

    #[tokio::test]
    async fn html_has_line_breaks_for_every_recipient() {
        let h = harness(MockMailer::new());
        h.orchestrator
            .send(&h.ana, request(&["a@example.com", "b@example.com"], None))
            .await
            .unwrap();
        for email in h.mailer.delivered() {
            assert_eq!(email.html, "Hi all,<br>Lunch is Friday.");
            assert_eq!(email.from, "noreply@localhost.com");
            assert_eq!(email.subject, "Friday lunch");
        }
    }

    #[tokio::test]
    async fn identical_sends_dispatch_twice() {
        let h = harness(MockMailer::new());
        for _ in 0..2 {
            h.orchestrator
                .send(&h.ana, request(&["a@example.com"], None))
                .await
                .unwrap();
        }
        assert_eq!(h.mailer.delivered().len(), 2);
        assert_eq!(sent_count(&h, &h.ana), 2);
    }

    #[tokio::test]
    async fn foreign_draft_rejected_before_dispatch() {
        let h = harness(MockMailer::new());
        let bos_draft = make_draft(&h, &h.bo);
        let err = h
            .orchestrator
            .send(&h.ana, request(&["a@example.com"], Some(bos_draft.clone())))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::DraftNotFound(_)));
        assert!(h.mailer.attempts().is_empty());
        let draft = DraftRepo::new(h.db.clone()).get(&bos_draft, &h.bo).unwrap();
        assert_eq!(draft.status, DraftStatus::Draft);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_recipient_does_not_block_others_and_times_out() {
        let h = harness(MockMailer::new().delay_for("slow@example.com", Duration::from_secs(60)));
        let mailer = h.mailer.clone();
        let outcome = h
            .orchestrator
            .dispatch(
                mailer.as_ref(),
                "s",
                "h",
                &addrs(&["a@example.com", "slow@example.com", "c@example.com"]),
            )
            .await;

        assert_eq!(outcome.total(), 3);
        assert_eq!(outcome.failed(), 1);
        let failed = outcome.failures().next().unwrap();
        assert_eq!(failed.recipient, "slow@example.com");
        assert!(matches!(failed.result, Err(GatewayError::Timeout(_))));
        // Outcomes stay in request order.
        let order: Vec<_> = outcome.recipients.iter().map(|r| r.recipient.as_str()).collect();
        assert_eq!(order, vec!["a@example.com", "slow@example.com", "c@example.com"]);
    }

    /// Accepts every message but removes the draft while the send is in
    /// flight, so the post-delivery status write finds nothing.
    struct DraftRemovingMailer {
        db: Database,
        draft_id: DraftId,
    }

    #[async_trait::async_trait]
    impl Mailer for DraftRemovingMailer {
        fn name(&self) -> &str {
            "draft-removing"
        }

        async fn send_one(&self, _email: &OutboundEmail) -> Result<DeliveryReceipt, GatewayError> {
            let id = self.draft_id.as_str().to_owned();
            self.db
                .with_conn(|conn| {
                    conn.execute("DELETE FROM email_drafts WHERE id = ?1", [id.as_str()])?;
                    Ok(())
                })
                .map_err(|e| GatewayError::NetworkError(e.to_string()))?;
            Ok(DeliveryReceipt::default())
        }
    }

    #[tokio::test]
    async fn failed_draft_update_leaves_no_sent_record() {
        let h = harness(MockMailer::new());
        let draft_id = make_draft(&h, &h.ana);
        let orchestrator = SendOrchestrator::new(
            Some(Arc::new(DraftRemovingMailer {
                db: h.db.clone(),
                draft_id: draft_id.clone(),
            }) as Arc<dyn Mailer>),
            h.db.clone(),
            "noreply@localhost.com",
            h.metrics.clone(),
        );

        let err = orchestrator
            .send(&h.ana, request(&["a@example.com"], Some(draft_id)))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Store(StoreError::NotFound(_))));
        assert_eq!(sent_count(&h, &h.ana), 0);
    }

    #[tokio::test]
    async fn unconfigured_mailer_sends_nothing() {
        let db = Database::in_memory().unwrap();
        let orchestrator =
            SendOrchestrator::new(None, db, "noreply@localhost.com", Arc::new(MetricsRecorder::new()));
        assert!(!orchestrator.is_configured());
        let owner = UserId::from_raw("user_x");
        let err = orchestrator
            .send(&owner, request(&["a@example.com"], None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::UpstreamUnavailable(GatewayError::NotConfigured(_))
        ));
    }
}
