//! Keeps the shared channel's view of each application in step with its
//! lifecycle. One outstanding broadcast per application: created posts it,
//! acceptance and closure edit it, a return replaces it.
//!
//! Every delivery here is best-effort. The state transition has already
//! committed by the time the notifier runs; a failed send is logged and
//! never propagated back into the lifecycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crewdesk_core::access::AccessTokenIssuer;
use crewdesk_core::domain::application::{Application, ApplicationSource, MessageRef};

use crate::messages;
use crate::messenger::{Messenger, OutgoingMessage, SendError};

pub struct DispatchNotifier {
    messenger: Arc<dyn Messenger>,
    channel_id: i64,
    tokens: Arc<AccessTokenIssuer>,
    deep_link_base_url: Option<String>,
}

impl DispatchNotifier {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        channel_id: i64,
        tokens: Arc<AccessTokenIssuer>,
        deep_link_base_url: Option<String>,
    ) -> Self {
        Self { messenger, channel_id, tokens, deep_link_base_url }
    }

    /// Posts the initial broadcast. Returns `None` when the channel is
    /// unreachable; the application stays valid either way.
    pub async fn announce_created(&self, application: &Application) -> Option<MessageRef> {
        match self
            .messenger
            .send_to_channel(self.channel_id, messages::broadcast_pending(application))
            .await
        {
            Ok(message_ref) => Some(message_ref),
            Err(error) => {
                warn!(
                    event_name = "dispatch.broadcast_failed",
                    application_id = %application.id,
                    error = %error,
                    "could not post broadcast for new application"
                );
                None
            }
        }
    }

    /// Reconciles the channel after an acceptance and delivers the full
    /// detail to the claimant, falling back to a deep link when the
    /// claimant has no open private channel.
    pub async fn announce_accepted(&self, application: &Application, now: DateTime<Utc>) {
        self.edit_broadcast(application, messages::broadcast_accepted(application)).await;

        let Some(claimant) = application.claimant_id else {
            return;
        };

        match self.messenger.send_private(claimant, messages::private_detail(application)).await {
            Ok(_) => {}
            Err(SendError::Unreachable(reason)) => {
                warn!(
                    event_name = "dispatch.private_detail_unreachable",
                    application_id = %application.id,
                    claimant_id = %claimant,
                    reason = %reason,
                    "claimant unreachable; issuing deep-link token"
                );
                let token = self.tokens.issue(application.id, claimant, now);
                let fallback = messages::deep_link_fallback(
                    application,
                    self.deep_link_base_url.as_deref(),
                    &token,
                );
                if let Err(error) = self.messenger.send_to_channel(self.channel_id, fallback).await
                {
                    warn!(
                        event_name = "dispatch.fallback_failed",
                        application_id = %application.id,
                        error = %error,
                        "could not post deep-link fallback"
                    );
                }
            }
            Err(error) => {
                warn!(
                    event_name = "dispatch.private_detail_failed",
                    application_id = %application.id,
                    claimant_id = %claimant,
                    error = %error,
                    "could not deliver private detail"
                );
            }
        }

        self.notify_submitter(
            application,
            format!(
                "Your request #{} was taken by {}.",
                application.id,
                application.claimant_name.as_deref().unwrap_or("a crew member")
            ),
        )
        .await;
    }

    /// A returned application gets a fresh broadcast rather than an edit,
    /// so it reappears at the bottom of the channel. Returns the new ref.
    pub async fn announce_released(
        &self,
        application: &Application,
        old_ref: Option<&MessageRef>,
    ) -> Option<MessageRef> {
        if let Some(message_ref) = old_ref {
            match self.messenger.delete_message(message_ref).await {
                Ok(()) | Err(SendError::NotFound(_)) => {}
                Err(error) => {
                    warn!(
                        event_name = "dispatch.stale_broadcast_delete_failed",
                        application_id = %application.id,
                        error = %error,
                        "could not delete stale broadcast"
                    );
                }
            }
        }

        self.notify_submitter(
            application,
            format!("Your request #{} was returned to the queue.", application.id),
        )
        .await;

        self.announce_created(application).await
    }

    pub async fn announce_closed(&self, application: &Application) {
        self.edit_broadcast(application, messages::broadcast_closed(application)).await;
        self.notify_submitter(
            application,
            format!("Your request #{} has been closed.", application.id),
        )
        .await;
    }

    async fn edit_broadcast(&self, application: &Application, message: OutgoingMessage) {
        let Some(message_ref) = application.broadcast_ref.as_ref() else {
            // No broadcast was ever posted (channel down at creation).
            return;
        };

        match self.messenger.edit_message(message_ref, message).await {
            Ok(()) | Err(SendError::NotFound(_)) => {}
            Err(error) => {
                warn!(
                    event_name = "dispatch.broadcast_edit_failed",
                    application_id = %application.id,
                    error = %error,
                    "could not edit broadcast"
                );
            }
        }
    }

    /// Webhook submitters have synthetic ids with no chat account behind
    /// them, so they are never messaged.
    async fn notify_submitter(&self, application: &Application, text: String) {
        if application.source != ApplicationSource::Chat {
            return;
        }
        if let Err(error) = self
            .messenger
            .send_private(application.submitter_id, OutgoingMessage::text(text))
            .await
        {
            warn!(
                event_name = "dispatch.submitter_notice_failed",
                application_id = %application.id,
                submitter_id = %application.submitter_id,
                error = %error,
                "could not notify submitter"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use tokio::sync::Mutex;

    use crewdesk_core::access::AccessTokenIssuer;
    use crewdesk_core::domain::application::{
        ActorId, Application, ApplicationId, ApplicationSource, ApplicationStatus, MessageRef,
    };

    use crate::messenger::{Messenger, OutgoingMessage, SendError};

    use super::DispatchNotifier;

    #[derive(Default)]
    pub(crate) struct RecordingMessenger {
        pub(crate) state: Mutex<RecordingState>,
    }

    #[derive(Default)]
    pub(crate) struct RecordingState {
        pub(crate) channel_posts: Vec<(i64, OutgoingMessage)>,
        pub(crate) private_sends: Vec<(ActorId, OutgoingMessage)>,
        pub(crate) edits: Vec<(MessageRef, OutgoingMessage)>,
        pub(crate) deletes: Vec<MessageRef>,
        pub(crate) unreachable: HashMap<i64, String>,
        next_ref: u64,
    }

    impl RecordingMessenger {
        pub(crate) async fn mark_unreachable(&self, actor: ActorId, reason: &str) {
            self.state.lock().await.unreachable.insert(actor.0, reason.to_string());
        }
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn send_private(
            &self,
            recipient: ActorId,
            message: OutgoingMessage,
        ) -> Result<MessageRef, SendError> {
            let mut state = self.state.lock().await;
            if let Some(reason) = state.unreachable.get(&recipient.0) {
                return Err(SendError::Unreachable(reason.clone()));
            }
            state.next_ref += 1;
            let message_ref = MessageRef(format!("dm:{}", state.next_ref));
            state.private_sends.push((recipient, message));
            Ok(message_ref)
        }

        async fn send_to_channel(
            &self,
            channel_id: i64,
            message: OutgoingMessage,
        ) -> Result<MessageRef, SendError> {
            let mut state = self.state.lock().await;
            state.next_ref += 1;
            let message_ref = MessageRef(format!("chan:{}", state.next_ref));
            state.channel_posts.push((channel_id, message));
            Ok(message_ref)
        }

        async fn edit_message(
            &self,
            message_ref: &MessageRef,
            message: OutgoingMessage,
        ) -> Result<(), SendError> {
            self.state.lock().await.edits.push((message_ref.clone(), message));
            Ok(())
        }

        async fn delete_message(&self, message_ref: &MessageRef) -> Result<(), SendError> {
            self.state.lock().await.deletes.push(message_ref.clone());
            Ok(())
        }
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp")
    }

    fn application(status: ApplicationStatus) -> Application {
        Application {
            id: ApplicationId(7),
            submitter_id: ActorId(100),
            submitter_name: "Pat".to_string(),
            address: "12 Elm St".to_string(),
            phone: "+15551234".to_string(),
            task: "Fix wiring".to_string(),
            comment: None,
            photo_ref: None,
            source: ApplicationSource::Chat,
            status,
            claimant_id: matches!(status, ApplicationStatus::Accepted).then_some(ActorId(200)),
            claimant_name: matches!(status, ApplicationStatus::Accepted)
                .then(|| "Sam".to_string()),
            return_reason: None,
            returned_by_id: None,
            returned_by_name: None,
            close_reason: None,
            closed_by_id: None,
            closed_by_name: None,
            closed_at: None,
            broadcast_ref: Some(MessageRef("chan:1".to_string())),
            created_at: now(),
        }
    }

    fn notifier(messenger: Arc<RecordingMessenger>) -> (DispatchNotifier, Arc<AccessTokenIssuer>) {
        let tokens = Arc::new(AccessTokenIssuer::new(Duration::minutes(10)));
        let notifier = DispatchNotifier::new(
            messenger,
            -1001,
            Arc::clone(&tokens),
            Some("https://chat.example/crewdesk_bot".to_string()),
        );
        (notifier, tokens)
    }

    #[tokio::test]
    async fn created_posts_one_broadcast_with_accept_button() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (notifier, _) = notifier(Arc::clone(&messenger));

        let mut app = application(ApplicationStatus::Pending);
        app.broadcast_ref = None;

        let message_ref = notifier.announce_created(&app).await;
        assert!(message_ref.is_some());

        let state = messenger.state.lock().await;
        assert_eq!(state.channel_posts.len(), 1);
        assert_eq!(state.channel_posts[0].0, -1001);
        assert_eq!(state.channel_posts[0].1.buttons[0].data, "accept:7");
    }

    #[tokio::test]
    async fn accepted_edits_broadcast_and_delivers_detail_privately() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (notifier, tokens) = notifier(Arc::clone(&messenger));

        notifier.announce_accepted(&application(ApplicationStatus::Accepted), now()).await;

        let state = messenger.state.lock().await;
        assert_eq!(state.edits.len(), 1);
        assert!(state.edits[0].1.text.contains("taken by Sam"));

        // Claimant detail plus the submitter notice.
        assert_eq!(state.private_sends.len(), 2);
        assert_eq!(state.private_sends[0].0, ActorId(200));
        assert!(state.private_sends[0].1.text.contains("+15551234"));
        assert_eq!(state.private_sends[1].0, ActorId(100));

        assert_eq!(tokens.outstanding(), 0);
    }

    #[tokio::test]
    async fn unreachable_claimant_gets_a_deep_link_fallback() {
        let messenger = Arc::new(RecordingMessenger::default());
        messenger.mark_unreachable(ActorId(200), "no private chat").await;
        let (notifier, tokens) = notifier(Arc::clone(&messenger));

        let app = application(ApplicationStatus::Accepted);
        notifier.announce_accepted(&app, now()).await;

        let state = messenger.state.lock().await;
        let fallback = state
            .channel_posts
            .iter()
            .find(|(_, message)| message.text.contains("token="))
            .expect("fallback posted to channel");
        assert!(fallback.1.text.contains("Sam"));

        // The issued grant is redeemable by the claimant alone.
        assert_eq!(tokens.outstanding(), 1);
        let token = fallback
            .1
            .text
            .split("token=")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .expect("token in fallback text");
        assert_eq!(tokens.redeem(token, ActorId(200), now()), Ok(app.id));
    }

    #[tokio::test]
    async fn released_replaces_the_broadcast() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (notifier, _) = notifier(Arc::clone(&messenger));

        let mut app = application(ApplicationStatus::Pending);
        app.return_reason = Some("wrong district".to_string());
        app.returned_by_id = Some(ActorId(200));
        app.returned_by_name = Some("Sam".to_string());
        let old_ref = MessageRef("chan:1".to_string());

        let new_ref = notifier.announce_released(&app, Some(&old_ref)).await;
        assert!(new_ref.is_some());
        assert_ne!(new_ref.as_ref(), Some(&old_ref));

        let state = messenger.state.lock().await;
        assert_eq!(state.deletes, vec![old_ref]);
        assert_eq!(state.channel_posts.len(), 1);
        assert!(state.channel_posts[0].1.text.contains("Returned by Sam: wrong district"));
        assert_eq!(state.channel_posts[0].1.buttons[0].data, "accept:7");
    }

    #[tokio::test]
    async fn closed_edits_broadcast_to_a_summary_without_buttons() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (notifier, _) = notifier(Arc::clone(&messenger));

        let mut app = application(ApplicationStatus::Closed);
        app.closed_by_id = Some(ActorId(200));
        app.closed_by_name = Some("Sam".to_string());
        app.closed_at = Some(now());

        notifier.announce_closed(&app).await;

        let state = messenger.state.lock().await;
        assert_eq!(state.edits.len(), 1);
        assert!(state.edits[0].1.text.contains("closed by Sam"));
        assert!(state.edits[0].1.buttons.is_empty());
    }

    #[tokio::test]
    async fn webhook_submitters_are_never_messaged() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (notifier, _) = notifier(Arc::clone(&messenger));

        let mut app = application(ApplicationStatus::Accepted);
        app.source = ApplicationSource::Webhook;
        app.submitter_id = ActorId(-42);

        notifier.announce_accepted(&app, now()).await;

        let state = messenger.state.lock().await;
        // Only the claimant detail; no submitter notice.
        assert_eq!(state.private_sends.len(), 1);
        assert_eq!(state.private_sends[0].0, ActorId(200));
    }
}
