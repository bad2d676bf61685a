//! Deep-link access tokens.
//!
//! When an accepted application's private detail cannot be delivered
//! directly (the claimant never opened a direct channel), the notifier
//! issues a short-lived, single-use token bound to that one actor and
//! application. Redeeming validates recipient and expiry, and consumes the
//! token on first successful use.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;

use crate::domain::application::{ActorId, ApplicationId};

const TOKEN_LENGTH: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessGrant {
    pub application_id: ApplicationId,
    pub authorized_actor: ActorId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RedeemError {
    #[error("access token does not exist or was already used")]
    NotFound,
    #[error("access token is bound to a different actor")]
    WrongActor,
    #[error("access token has expired")]
    Expired,
}

/// In-process token table, owned by whoever constructs it. Never a
/// process-global: tests instantiate isolated issuers.
pub struct AccessTokenIssuer {
    grants: Mutex<HashMap<String, AccessGrant>>,
    ttl: Duration,
}

impl AccessTokenIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self { grants: Mutex::new(HashMap::new()), ttl }
    }

    pub fn issue(
        &self,
        application_id: ApplicationId,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> String {
        let token: String =
            rand::thread_rng().sample_iter(&Alphanumeric).take(TOKEN_LENGTH).map(char::from).collect();

        let mut grants = self.lock();
        grants.retain(|_, grant| grant.expires_at > now);
        grants.insert(
            token.clone(),
            AccessGrant { application_id, authorized_actor: actor, expires_at: now + self.ttl },
        );
        token
    }

    /// Validates and consumes the token. A wrong-actor attempt leaves the
    /// token in place for its rightful holder; expiry removes it.
    pub fn redeem(
        &self,
        token: &str,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Result<ApplicationId, RedeemError> {
        let mut grants = self.lock();
        let Some(grant) = grants.get(token) else {
            return Err(RedeemError::NotFound);
        };

        if grant.expires_at <= now {
            grants.remove(token);
            return Err(RedeemError::Expired);
        }
        if grant.authorized_actor != actor {
            return Err(RedeemError::WrongActor);
        }

        let grant = grants.remove(token).ok_or(RedeemError::NotFound)?;
        Ok(grant.application_id)
    }

    pub fn outstanding(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AccessGrant>> {
        self.grants.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
