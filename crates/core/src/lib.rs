//! Crewdesk core - domain model for chat-based intake and dispatch
//!
//! This crate holds everything that does not touch I/O:
//! - **Domain** (`domain`) - the `Application` record and its lifecycle
//!   (pending → accepted → {pending, closed}) with transition guards
//! - **Intake** (`intake`) - the per-actor multi-step form collector that
//!   turns free-text inputs into a validated submission
//! - **Access** (`access`) - single-use, time-boxed deep-link tokens for
//!   delivering private application detail when a direct message fails
//! - **Config** (`config`) - layered configuration (defaults, file, env,
//!   explicit overrides) validated at startup
//! - **Errors** (`errors`) - the transition error taxonomy shared by the
//!   chat and server crates

pub mod access;
pub mod config;
pub mod domain;
pub mod errors;
pub mod intake;

pub use access::{AccessGrant, AccessTokenIssuer, RedeemError};
pub use domain::application::{
    ActorId, Application, ApplicationId, ApplicationSource, ApplicationStatus, MessageRef,
    NewApplication,
};
pub use errors::TransitionError;
pub use intake::{FormEngine, FormProgress, FormStep, InputClass, IntakeSubmission};

pub use chrono;
