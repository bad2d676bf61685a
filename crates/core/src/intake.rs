//! Multi-step intake form collector.
//!
//! One in-flight form per actor. The engine never persists anything itself: on
//! completion it hands the caller an [`IntakeSubmission`] and forgets the
//! session, so a failed persistence attempt can never leave a dangling
//! in-progress state.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::domain::application::ActorId;

/// Exact-match cancel synonyms, compared case-insensitively after trimming.
const CANCEL_SYNONYMS: &[&str] = &["cancel", "/cancel", "отмена", "❌ отмена"];

/// Sentinels meaning "no value" for the optional steps.
const NONE_SENTINELS: &[&str] = &["-", "none", "нет", "no"];

/// Tagged classification of one free-text input, decoupling the state
/// machine from the literal strings the transport delivers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputClass {
    Cancel,
    NoneSentinel,
    Value(String),
}

pub fn classify_input(input: &str) -> InputClass {
    let trimmed = input.trim();
    let normalized = trimmed.to_lowercase();

    if CANCEL_SYNONYMS.contains(&normalized.as_str()) {
        return InputClass::Cancel;
    }
    if NONE_SENTINELS.contains(&normalized.as_str()) {
        return InputClass::NoneSentinel;
    }
    InputClass::Value(trimmed.to_owned())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormStep {
    Address,
    Phone,
    Task,
    Comment,
    Attachment,
}

/// What the caller should do next after feeding one input to the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormProgress {
    /// Ask the actor for the named field.
    Prompt(FormStep),
    /// Input was not usable at this step (blank text, or text where an
    /// attachment is expected); re-prompt for the same field.
    Rejected(FormStep),
    /// The actor cancelled; all collected fields were discarded.
    Cancelled,
    /// All fields collected; the session has already been cleared.
    Completed(IntakeSubmission),
    /// The actor has no form in flight.
    NotCollecting,
}

/// A completed, validated form ready to be persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntakeSubmission {
    pub submitter_id: ActorId,
    pub submitter_name: String,
    pub address: String,
    pub phone: String,
    pub task: String,
    pub comment: Option<String>,
    pub photo_ref: Option<String>,
}

#[derive(Clone, Debug)]
struct FormSession {
    submitter_name: String,
    expect_attachment: bool,
    step: FormStep,
    address: Option<String>,
    phone: Option<String>,
    task: Option<String>,
    comment: Option<String>,
    last_activity: DateTime<Utc>,
}

/// Per-actor form store. All mutations go through one lock, so two
/// near-simultaneous inputs for the same actor cannot both observe the
/// same step and double-advance.
pub struct FormEngine {
    sessions: Mutex<HashMap<ActorId, FormSession>>,
    idle_timeout: Duration,
}

impl FormEngine {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), idle_timeout }
    }

    /// Starts a form for the actor, silently replacing any in-flight one.
    pub fn begin(
        &self,
        actor: ActorId,
        submitter_name: &str,
        expect_attachment: bool,
        now: DateTime<Utc>,
    ) -> FormStep {
        let mut sessions = self.lock();
        sessions.insert(
            actor,
            FormSession {
                submitter_name: submitter_name.to_owned(),
                expect_attachment,
                step: FormStep::Address,
                address: None,
                phone: None,
                task: None,
                comment: None,
                last_activity: now,
            },
        );
        FormStep::Address
    }

    pub fn in_progress(&self, actor: ActorId) -> bool {
        self.lock().contains_key(&actor)
    }

    pub fn submit_text(&self, actor: ActorId, input: &str, now: DateTime<Utc>) -> FormProgress {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(&actor) else {
            return FormProgress::NotCollecting;
        };

        if now.signed_duration_since(session.last_activity) > self.idle_timeout {
            sessions.remove(&actor);
            return FormProgress::NotCollecting;
        }
        session.last_activity = now;

        let classified = classify_input(input);
        if classified == InputClass::Cancel {
            sessions.remove(&actor);
            return FormProgress::Cancelled;
        }

        // The required-field steps take any non-blank text verbatim, so a
        // sentinel there is just a short value.
        let step = session.step;
        match step {
            FormStep::Address | FormStep::Phone | FormStep::Task => {
                let text = input.trim();
                if text.is_empty() {
                    return FormProgress::Rejected(step);
                }
                match step {
                    FormStep::Address => {
                        session.address = Some(text.to_owned());
                        session.step = FormStep::Phone;
                        FormProgress::Prompt(FormStep::Phone)
                    }
                    FormStep::Phone => {
                        session.phone = Some(text.to_owned());
                        session.step = FormStep::Task;
                        FormProgress::Prompt(FormStep::Task)
                    }
                    _ => {
                        session.task = Some(text.to_owned());
                        session.step = FormStep::Comment;
                        FormProgress::Prompt(FormStep::Comment)
                    }
                }
            }
            FormStep::Comment => {
                match classified {
                    InputClass::NoneSentinel => session.comment = None,
                    InputClass::Value(text) if text.is_empty() => {
                        return FormProgress::Rejected(FormStep::Comment)
                    }
                    InputClass::Value(text) => session.comment = Some(text),
                    InputClass::Cancel => unreachable!("cancel handled above"),
                }
                if session.expect_attachment {
                    session.step = FormStep::Attachment;
                    FormProgress::Prompt(FormStep::Attachment)
                } else {
                    Self::complete(&mut sessions, actor, None)
                }
            }
            FormStep::Attachment => match classified {
                InputClass::NoneSentinel => Self::complete(&mut sessions, actor, None),
                _ => FormProgress::Rejected(FormStep::Attachment),
            },
        }
    }

    pub fn submit_attachment(
        &self,
        actor: ActorId,
        photo_ref: &str,
        now: DateTime<Utc>,
    ) -> FormProgress {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(&actor) else {
            return FormProgress::NotCollecting;
        };

        if now.signed_duration_since(session.last_activity) > self.idle_timeout {
            sessions.remove(&actor);
            return FormProgress::NotCollecting;
        }
        session.last_activity = now;

        if session.step != FormStep::Attachment {
            return FormProgress::Rejected(session.step);
        }
        Self::complete(&mut sessions, actor, Some(photo_ref.to_owned()))
    }

    /// Discards the actor's in-flight form. Returns whether one existed.
    pub fn cancel(&self, actor: ActorId) -> bool {
        self.lock().remove(&actor).is_some()
    }

    /// Drops sessions idle past the inactivity window and reports which
    /// actors were returned to idle, so the caller can notify them.
    pub fn expire_idle(&self, now: DateTime<Utc>) -> Vec<ActorId> {
        let mut sessions = self.lock();
        let expired: Vec<ActorId> = sessions
            .iter()
            .filter(|(_, session)| {
                now.signed_duration_since(session.last_activity) > self.idle_timeout
            })
            .map(|(actor, _)| *actor)
            .collect();
        for actor in &expired {
            sessions.remove(actor);
        }
        expired
    }

    fn complete(
        sessions: &mut HashMap<ActorId, FormSession>,
        actor: ActorId,
        photo_ref: Option<String>,
    ) -> FormProgress {
        // Session leaves the store before the caller persists anything, on
        // purpose: persistence failure must not strand the actor mid-form.
        let Some(session) = sessions.remove(&actor) else {
            return FormProgress::NotCollecting;
        };

        match (session.address, session.phone, session.task) {
            (Some(address), Some(phone), Some(task)) => {
                FormProgress::Completed(IntakeSubmission {
                    submitter_id: actor,
                    submitter_name: session.submitter_name,
                    address,
                    phone,
                    task,
                    comment: session.comment,
                    photo_ref,
                })
            }
            // Unreachable through the step sequence; treated as a lost
            // session rather than a partial record.
            _ => FormProgress::NotCollecting,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ActorId, FormSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
