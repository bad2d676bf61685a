//! Text and button composition for every message the bot sends.
//!
//! Kept in one place so the broadcast, private detail, and prompt wording
//! can be reviewed side by side.

use crewdesk_core::domain::application::{Application, ApplicationSource};
use crewdesk_core::intake::FormStep;

use crate::commands::{encode_action, ChatCommand};
use crate::messenger::{ActionButton, OutgoingMessage};

pub fn form_prompt(step: FormStep) -> String {
    match step {
        FormStep::Address => "Step 1 of 4. What is the service address?".to_string(),
        FormStep::Phone => "Step 2 of 4. What phone number can we reach you at?".to_string(),
        FormStep::Task => "Step 3 of 4. Describe the work that needs doing.".to_string(),
        FormStep::Comment => {
            "Step 4 of 4. Any extra details? Send \"-\" to skip.".to_string()
        }
        FormStep::Attachment => {
            "Optionally attach a photo of the problem, or send \"-\" to skip.".to_string()
        }
    }
}

pub fn form_rejected(step: FormStep) -> String {
    let retry = match step {
        FormStep::Attachment => "Please attach a photo or send \"-\" to skip.",
        _ => "That field cannot be empty. Please try again.",
    };
    format!("{retry}\n{}", form_prompt(step))
}

pub fn intake_started() -> String {
    "Let's file a new request. Send \"cancel\" at any point to stop.".to_string()
}

pub fn intake_cancelled() -> String {
    "Request cancelled. Nothing was saved.".to_string()
}

pub fn intake_expired() -> String {
    "Your request form timed out. Send /new to start over.".to_string()
}

pub fn intake_completed(application: &Application) -> String {
    format!(
        "Request #{} filed. The crew has been notified and someone will take it shortly.",
        application.id
    )
}

pub fn help_text() -> String {
    [
        "I collect service requests and dispatch them to the crew.",
        "",
        "/new — file a new request",
        "/cancel — abandon the form you are filling in",
        "/pending — list unclaimed requests",
        "/help — this message",
    ]
    .join("\n")
}

pub fn not_collecting() -> String {
    "Nothing in progress. Send /new to file a request, or /help for commands.".to_string()
}

fn source_label(application: &Application) -> &'static str {
    match application.source {
        ApplicationSource::Chat => "",
        ApplicationSource::Webhook => " (via website)",
    }
}

fn summary_lines(application: &Application) -> String {
    let mut lines = vec![
        format!("Request #{}{}", application.id, source_label(application)),
        format!("Address: {}", application.address),
        format!("Task: {}", application.task),
        format!("From: {}", application.submitter_name),
    ];
    // Webhook submitters cannot be messaged privately, so their comment has
    // nowhere else to surface.
    if application.source == ApplicationSource::Webhook {
        if let Some(comment) = application.comment.as_deref().filter(|text| !text.is_empty()) {
            lines.push(format!("Comment: {comment}"));
        }
    }
    lines.join("\n")
}

/// Shared-channel broadcast for a pending application. Phone and private
/// comments are deliberately absent; they go to the claimant only.
pub fn broadcast_pending(application: &Application) -> OutgoingMessage {
    let mut text = summary_lines(application);
    if let Some(name) = application.returned_by_name.as_deref() {
        match application.return_reason.as_deref() {
            Some(reason) => text.push_str(&format!("\n\nReturned by {name}: {reason}")),
            None => text.push_str(&format!("\n\nReturned by {name}")),
        }
    }
    text.push_str("\n\nStatus: open");

    OutgoingMessage::with_buttons(text, vec![accept_button(application)])
}

pub fn broadcast_accepted(application: &Application) -> OutgoingMessage {
    let claimant = application.claimant_name.as_deref().unwrap_or("a crew member");
    let text = format!("{}\n\nStatus: taken by {claimant}", summary_lines(application));

    OutgoingMessage::with_buttons(
        text,
        vec![release_button(application), close_button(application)],
    )
}

pub fn broadcast_closed(application: &Application) -> OutgoingMessage {
    let closer = application.closed_by_name.as_deref().unwrap_or("a crew member");
    let mut text = format!("{}\n\nStatus: closed by {closer}", summary_lines(application));
    if let Some(reason) = application.close_reason.as_deref() {
        text.push_str(&format!(" ({reason})"));
    }
    OutgoingMessage::text(text)
}

/// Full detail for the claimant, including the fields withheld from the
/// channel.
pub fn private_detail(application: &Application) -> OutgoingMessage {
    let mut lines = vec![
        format!("You took request #{}.", application.id),
        format!("Address: {}", application.address),
        format!("Phone: {}", application.phone),
        format!("Task: {}", application.task),
        format!("From: {}", application.submitter_name),
    ];
    if let Some(comment) = application.comment.as_deref() {
        lines.push(format!("Comment: {comment}"));
    }
    if application.photo_ref.is_some() {
        lines.push("A photo is attached to this request.".to_string());
    }
    OutgoingMessage::text(lines.join("\n"))
}

/// Channel fallback when the claimant cannot be reached privately.
pub fn deep_link_fallback(
    application: &Application,
    base_url: Option<&str>,
    token: &str,
) -> OutgoingMessage {
    let claimant = application.claimant_name.as_deref().unwrap_or("claimant");
    let link = match base_url {
        Some(base) => format!("{}/start?token={token}", base.trim_end_matches('/')),
        None => format!("/start {token}"),
    };
    OutgoingMessage::text(format!(
        "{claimant}: I could not message you directly about request #{}. \
         Open a chat with me and use {link} to get the details.",
        application.id
    ))
}

pub fn pending_list(applications: &[Application]) -> String {
    if applications.is_empty() {
        return "No open requests right now.".to_string();
    }
    let mut lines = vec![format!("Open requests ({}):", applications.len())];
    for application in applications {
        lines.push(format!("#{} — {} — {}", application.id, application.address, application.task));
    }
    lines.join("\n")
}

pub fn release_reason_prompt() -> String {
    "Why are you returning this request? Send \"-\" to skip, or \"cancel\" to keep it."
        .to_string()
}

pub fn close_reason_prompt() -> String {
    "How was it resolved? Send \"-\" to skip, or \"cancel\" to keep the request open."
        .to_string()
}

pub fn reason_collection_aborted() -> String {
    "Okay, the request stays with you.".to_string()
}

pub fn already_taken() -> String {
    "Too late, someone already took that request.".to_string()
}

pub fn already_closed() -> String {
    "That request is already closed.".to_string()
}

pub fn not_claimant() -> String {
    "Only the crew member who took the request can do that.".to_string()
}

pub fn unknown_application() -> String {
    "That request no longer exists.".to_string()
}

pub fn transient_failure() -> String {
    "Something went wrong on my side. Please try again in a moment.".to_string()
}

fn accept_button(application: &Application) -> ActionButton {
    button("Accept", ChatCommand::Accept(application.id))
}

fn release_button(application: &Application) -> ActionButton {
    button("Return", ChatCommand::Release(application.id))
}

fn close_button(application: &Application) -> ActionButton {
    button("Close", ChatCommand::Close(application.id))
}

fn button(label: &str, command: ChatCommand) -> ActionButton {
    // encode_action is total for the three lifecycle verbs used here.
    let data = encode_action(command).unwrap_or_default();
    ActionButton::new(label, data)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crewdesk_core::domain::application::{
        ActorId, Application, ApplicationId, ApplicationSource, ApplicationStatus,
    };

    use super::{broadcast_accepted, broadcast_closed, broadcast_pending, private_detail};

    fn application(source: ApplicationSource) -> Application {
        Application {
            id: ApplicationId(7),
            submitter_id: ActorId(100),
            submitter_name: "Pat".to_string(),
            address: "12 Elm St".to_string(),
            phone: "+15551234".to_string(),
            task: "Fix wiring".to_string(),
            comment: Some("second floor".to_string()),
            photo_ref: None,
            source,
            status: ApplicationStatus::Pending,
            claimant_id: None,
            claimant_name: None,
            return_reason: None,
            returned_by_id: None,
            returned_by_name: None,
            close_reason: None,
            closed_by_id: None,
            closed_by_name: None,
            closed_at: None,
            broadcast_ref: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn broadcast_withholds_phone_and_chat_comment() {
        let message = broadcast_pending(&application(ApplicationSource::Chat));
        assert!(!message.text.contains("+15551234"));
        assert!(!message.text.contains("second floor"));
        assert!(message.text.contains("12 Elm St"));
        assert_eq!(message.buttons.len(), 1);
        assert_eq!(message.buttons[0].data, "accept:7");
    }

    #[test]
    fn webhook_broadcast_carries_source_label_and_comment() {
        let message = broadcast_pending(&application(ApplicationSource::Webhook));
        assert!(message.text.contains("(via website)"));
        assert!(message.text.contains("second floor"));
        assert!(!message.text.contains("+15551234"));
    }

    #[test]
    fn accepted_broadcast_swaps_affordances() {
        let mut app = application(ApplicationSource::Chat);
        app.status = ApplicationStatus::Accepted;
        app.claimant_id = Some(ActorId(200));
        app.claimant_name = Some("Sam".to_string());

        let message = broadcast_accepted(&app);
        assert!(message.text.contains("taken by Sam"));
        let data: Vec<&str> = message.buttons.iter().map(|b| b.data.as_str()).collect();
        assert_eq!(data, vec!["release:7", "close:7"]);
    }

    #[test]
    fn closed_broadcast_has_no_affordances() {
        let mut app = application(ApplicationSource::Chat);
        app.status = ApplicationStatus::Closed;
        app.closed_by_name = Some("Sam".to_string());
        app.close_reason = Some("done".to_string());

        let message = broadcast_closed(&app);
        assert!(message.text.contains("closed by Sam"));
        assert!(message.text.contains("(done)"));
        assert!(message.buttons.is_empty());
    }

    #[test]
    fn private_detail_includes_everything() {
        let message = private_detail(&application(ApplicationSource::Chat));
        assert!(message.text.contains("+15551234"));
        assert!(message.text.contains("second floor"));
    }
}
