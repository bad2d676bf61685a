use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crewdesk_core::access::{AccessTokenIssuer, RedeemError};
use crewdesk_core::domain::application::{
    ActorId, Application, ApplicationId, ApplicationSource, NewApplication,
};
use crewdesk_core::errors::TransitionError;
use crewdesk_core::intake::{
    classify_input, FormEngine, FormProgress, InputClass, IntakeSubmission,
};
use crewdesk_db::repositories::{ApplicationRepository, RepositoryError};

use crate::commands::{
    parse_action, parse_deep_link_token, parse_text_command, ChatCommand, CommandParseError,
};
use crate::events::{
    ActionTriggeredEvent, AttachmentReceivedEvent, EventContext, EventHandlerError,
    IntakeEventService, TextReceivedEvent,
};
use crate::messages;
use crate::messenger::{Messenger, OutgoingMessage};
use crate::notifier::DispatchNotifier;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Parse(#[from] CommandParseError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReasonKind {
    Release,
    Close,
}

/// A return or close the claimant has started but not yet explained. The
/// transition itself is deferred until the reason text (or a skip) arrives.
#[derive(Clone, Copy, Debug)]
struct PendingReason {
    application_id: ApplicationId,
    kind: ReasonKind,
}

/// Orchestrates the conversational intake flow and the lifecycle actions.
///
/// Replies to the acting user go out through the messenger directly;
/// channel reconciliation and claimant/submitter notices are the
/// notifier's job. Return and close first ask the claimant for a short
/// reason; the guarded repository update runs once the reason arrives.
/// Transition refusals become polite replies, never errors: only storage
/// faults propagate.
pub struct IntakeService {
    forms: FormEngine,
    repository: Arc<dyn ApplicationRepository>,
    notifier: DispatchNotifier,
    messenger: Arc<dyn Messenger>,
    tokens: Arc<AccessTokenIssuer>,
    collect_attachment: bool,
    reasons: Mutex<HashMap<ActorId, PendingReason>>,
}

impl IntakeService {
    pub fn new(
        forms: FormEngine,
        repository: Arc<dyn ApplicationRepository>,
        notifier: DispatchNotifier,
        messenger: Arc<dyn Messenger>,
        tokens: Arc<AccessTokenIssuer>,
        collect_attachment: bool,
    ) -> Self {
        Self {
            forms,
            repository,
            notifier,
            messenger,
            tokens,
            collect_attachment,
            reasons: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle_text(
        &self,
        actor: ActorId,
        actor_name: &str,
        text: &str,
    ) -> Result<(), ServiceError> {
        if let Some(token) = parse_deep_link_token(text) {
            self.redeem_deep_link(actor, token).await?;
            return Ok(());
        }

        // An actor asked for a reason answers with their very next message,
        // so this outranks command parsing; classify_input still lets
        // "/cancel" abort the collection. The guard must drop before the
        // await below.
        let pending = self.lock_reasons().remove(&actor);
        if let Some(pending) = pending {
            return self.finish_reason_collection(actor, actor_name, pending, text).await;
        }

        if let Some(command) = parse_text_command(text) {
            return self.handle_command(actor, actor_name, command).await;
        }

        let progress = self.forms.submit_text(actor, text, Utc::now());
        self.advance(actor, actor_name, progress).await
    }

    pub async fn handle_attachment(
        &self,
        actor: ActorId,
        actor_name: &str,
        attachment_ref: &str,
    ) -> Result<(), ServiceError> {
        let progress = self.forms.submit_attachment(actor, attachment_ref, Utc::now());
        self.advance(actor, actor_name, progress).await
    }

    pub async fn handle_action(
        &self,
        actor: ActorId,
        actor_name: &str,
        data: &str,
    ) -> Result<(), ServiceError> {
        match parse_action(data)? {
            ChatCommand::Accept(id) => {
                match self.repository.accept(id, actor, actor_name).await {
                    Ok(application) => {
                        info!(
                            event_name = "lifecycle.accepted",
                            application_id = %application.id,
                            claimant_id = %actor,
                            "application accepted"
                        );
                        self.notifier.announce_accepted(&application, Utc::now()).await;
                    }
                    Err(error) => self.reply_transition_failure(actor, error).await?,
                }
            }
            ChatCommand::Release(id) => {
                self.begin_reason_collection(actor, id, ReasonKind::Release).await?;
            }
            ChatCommand::Close(id) => {
                self.begin_reason_collection(actor, id, ReasonKind::Close).await?;
            }
            // Buttons never carry the conversational commands.
            _ => {}
        }
        Ok(())
    }

    /// Persists a validated submission and broadcasts it. Shared by the
    /// conversational flow and the webhook gateway.
    pub async fn submit_application(
        &self,
        new: NewApplication,
    ) -> Result<Application, ServiceError> {
        let application = self.repository.create(new, Utc::now()).await?;
        info!(
            event_name = "lifecycle.created",
            application_id = %application.id,
            source = application.source.as_str(),
            "application created"
        );

        // The record is already committed, so a failed ref write must not
        // surface as a submission failure. The broadcast stays reachable;
        // it just cannot be edited in place later.
        let mut application = application;
        if let Some(message_ref) = self.notifier.announce_created(&application).await {
            match self.repository.set_broadcast_ref(application.id, &message_ref).await {
                Ok(()) => application.broadcast_ref = Some(message_ref),
                Err(error) => warn!(
                    event_name = "dispatch.broadcast_ref_store_failed",
                    application_id = %application.id,
                    error = %error,
                    "application stored but broadcast ref was not"
                ),
            }
        }
        Ok(application)
    }

    /// Drops idle forms and tells their owners to start over.
    pub async fn expire_idle_forms(&self) {
        for actor in self.forms.expire_idle(Utc::now()) {
            self.reply(actor, messages::intake_expired()).await;
        }
    }

    async fn handle_command(
        &self,
        actor: ActorId,
        actor_name: &str,
        command: ChatCommand,
    ) -> Result<(), ServiceError> {
        match command {
            ChatCommand::StartIntake => {
                let step = self.forms.begin(actor, actor_name, self.collect_attachment, Utc::now());
                self.reply(actor, messages::intake_started()).await;
                self.reply(actor, messages::form_prompt(step)).await;
            }
            ChatCommand::CancelIntake => {
                let reply = if self.forms.cancel(actor) {
                    messages::intake_cancelled()
                } else {
                    messages::not_collecting()
                };
                self.reply(actor, reply).await;
            }
            ChatCommand::ShowHelp => {
                self.reply(actor, messages::help_text()).await;
            }
            ChatCommand::ListPending => {
                let pending = self.repository.list_pending().await?;
                self.reply(actor, messages::pending_list(&pending)).await;
            }
            // Lifecycle verbs arrive as actions, not typed text.
            _ => {}
        }
        Ok(())
    }

    async fn advance(
        &self,
        actor: ActorId,
        _actor_name: &str,
        progress: FormProgress,
    ) -> Result<(), ServiceError> {
        match progress {
            FormProgress::Prompt(step) => {
                self.reply(actor, messages::form_prompt(step)).await;
            }
            FormProgress::Rejected(step) => {
                self.reply(actor, messages::form_rejected(step)).await;
            }
            FormProgress::Cancelled => {
                self.reply(actor, messages::intake_cancelled()).await;
            }
            FormProgress::Completed(submission) => {
                let application = self.submit_application(submission_to_new(submission)).await?;
                self.reply(actor, messages::intake_completed(&application)).await;
            }
            FormProgress::NotCollecting => {
                self.reply(actor, messages::not_collecting()).await;
            }
        }
        Ok(())
    }

    /// First half of a return or close: remember what the claimant is
    /// doing and ask them why. The transition itself waits for the answer,
    /// and the guarded update still decides the race when it runs.
    async fn begin_reason_collection(
        &self,
        actor: ActorId,
        id: ApplicationId,
        kind: ReasonKind,
    ) -> Result<(), ServiceError> {
        if !self.repository.is_claimant(id, actor).await? {
            return self.reply_not_actionable(actor, id).await;
        }
        self.lock_reasons().insert(actor, PendingReason { application_id: id, kind });
        self.reply(actor, reason_prompt(kind)).await;
        Ok(())
    }

    /// Second half: the next message from the actor is the reason. Cancel
    /// synonyms abort without touching the application, the skip sentinel
    /// proceeds without a reason, blank text re-prompts.
    async fn finish_reason_collection(
        &self,
        actor: ActorId,
        actor_name: &str,
        pending: PendingReason,
        text: &str,
    ) -> Result<(), ServiceError> {
        let reason = match classify_input(text) {
            InputClass::Cancel => {
                self.reply(actor, messages::reason_collection_aborted()).await;
                return Ok(());
            }
            InputClass::NoneSentinel => None,
            InputClass::Value(value) if value.is_empty() => {
                self.lock_reasons().insert(actor, pending);
                self.reply(actor, reason_prompt(pending.kind)).await;
                return Ok(());
            }
            InputClass::Value(value) => Some(value),
        };

        match pending.kind {
            ReasonKind::Release => {
                self.perform_release(actor, actor_name, pending.application_id, reason.as_deref())
                    .await
            }
            ReasonKind::Close => {
                self.perform_close(actor, actor_name, pending.application_id, reason.as_deref())
                    .await
            }
        }
    }

    async fn perform_release(
        &self,
        actor: ActorId,
        actor_name: &str,
        id: ApplicationId,
        reason: Option<&str>,
    ) -> Result<(), ServiceError> {
        match self.repository.release(id, actor, actor_name, reason).await {
            Ok(application) => {
                info!(
                    event_name = "lifecycle.released",
                    application_id = %application.id,
                    returned_by = %actor,
                    "application returned to the pool"
                );
                let old_ref = application.broadcast_ref.clone();
                let new_ref =
                    self.notifier.announce_released(&application, old_ref.as_ref()).await;
                if let Some(new_ref) = new_ref {
                    self.repository.set_broadcast_ref(application.id, &new_ref).await?;
                }
            }
            Err(error) => self.reply_transition_failure(actor, error).await?,
        }
        Ok(())
    }

    async fn perform_close(
        &self,
        actor: ActorId,
        actor_name: &str,
        id: ApplicationId,
        reason: Option<&str>,
    ) -> Result<(), ServiceError> {
        match self.repository.close(id, actor, actor_name, reason, Utc::now()).await {
            Ok(application) => {
                info!(
                    event_name = "lifecycle.closed",
                    application_id = %application.id,
                    closed_by = %actor,
                    "application closed"
                );
                self.notifier.announce_closed(&application).await;
            }
            Err(error) => self.reply_transition_failure(actor, error).await?,
        }
        Ok(())
    }

    /// Explains a refused return/close button press without mutating
    /// anything: the application is gone, closed, or held by someone else.
    async fn reply_not_actionable(
        &self,
        actor: ActorId,
        id: ApplicationId,
    ) -> Result<(), ServiceError> {
        let reply = match self.repository.get(id).await? {
            None => messages::unknown_application(),
            Some(application) => match application.can_release(actor) {
                Err(TransitionError::AlreadyClosed) => messages::already_closed(),
                _ => messages::not_claimant(),
            },
        };
        self.reply(actor, reply).await;
        Ok(())
    }

    fn lock_reasons(&self) -> MutexGuard<'_, HashMap<ActorId, PendingReason>> {
        self.reasons.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn redeem_deep_link(&self, actor: ActorId, token: &str) -> Result<(), ServiceError> {
        match self.tokens.redeem(token, actor, Utc::now()) {
            Ok(application_id) => match self.repository.get(application_id).await? {
                Some(application) => {
                    self.messenger
                        .send_private(actor, messages::private_detail(&application))
                        .await
                        .map_err(|error| {
                            warn!(
                                event_name = "dispatch.deep_link_detail_failed",
                                application_id = %application_id,
                                error = %error,
                                "could not deliver redeemed detail"
                            );
                        })
                        .ok();
                }
                None => self.reply(actor, messages::unknown_application()).await,
            },
            Err(RedeemError::NotFound) => {
                self.reply(actor, "That link is no longer valid.".to_string()).await;
            }
            Err(RedeemError::WrongActor) => {
                self.reply(actor, "That link belongs to someone else.".to_string()).await;
            }
            Err(RedeemError::Expired) => {
                self.reply(actor, "That link has expired.".to_string()).await;
            }
        }
        Ok(())
    }

    async fn reply_transition_failure(
        &self,
        actor: ActorId,
        error: RepositoryError,
    ) -> Result<(), ServiceError> {
        let reply = match &error {
            RepositoryError::Transition(TransitionError::NotPending) => messages::already_taken(),
            RepositoryError::Transition(TransitionError::AlreadyClosed) => {
                messages::already_closed()
            }
            RepositoryError::Transition(TransitionError::NotClaimant) => messages::not_claimant(),
            RepositoryError::NotFound(_) => messages::unknown_application(),
            RepositoryError::Database(_) | RepositoryError::Decode(_) => {
                self.reply(actor, messages::transient_failure()).await;
                return Err(error.into());
            }
        };
        self.reply(actor, reply).await;
        Ok(())
    }

    async fn reply(&self, actor: ActorId, text: String) {
        if let Err(error) = self.messenger.send_private(actor, OutgoingMessage::text(text)).await {
            warn!(
                event_name = "dispatch.reply_failed",
                actor_id = %actor,
                error = %error,
                "could not deliver reply"
            );
        }
    }
}

fn reason_prompt(kind: ReasonKind) -> String {
    match kind {
        ReasonKind::Release => messages::release_reason_prompt(),
        ReasonKind::Close => messages::close_reason_prompt(),
    }
}

fn submission_to_new(submission: IntakeSubmission) -> NewApplication {
    NewApplication {
        submitter_id: submission.submitter_id,
        submitter_name: submission.submitter_name,
        address: submission.address,
        phone: submission.phone,
        task: submission.task,
        comment: submission.comment,
        photo_ref: submission.photo_ref,
        source: ApplicationSource::Chat,
    }
}

#[async_trait]
impl IntakeEventService for IntakeService {
    async fn handle_text(
        &self,
        event: &TextReceivedEvent,
        _ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        IntakeService::handle_text(self, event.actor, &event.actor_name, &event.text)
            .await
            .map_err(|error| EventHandlerError::Service(error.to_string()))
    }

    async fn handle_action(
        &self,
        event: &ActionTriggeredEvent,
        _ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        IntakeService::handle_action(self, event.actor, &event.actor_name, &event.data)
            .await
            .map_err(|error| EventHandlerError::Service(error.to_string()))
    }

    async fn handle_attachment(
        &self,
        event: &AttachmentReceivedEvent,
        _ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        IntakeService::handle_attachment(self, event.actor, &event.actor_name, &event.attachment_ref)
            .await
            .map_err(|error| EventHandlerError::Service(error.to_string()))
    }
}
