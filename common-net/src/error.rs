//! Shared error taxonomy (spec §7), one `thiserror` enum per category so call sites can match
//! on the concrete failure instead of a single catch-all.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("missing authentication")]
    Missing,
    #[error("invalid authentication: {0}")]
    Invalid(String),
}

#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("already in queue")]
    AlreadyQueued,
    #[error("not in queue")]
    NotQueued,
}

#[derive(Error, Debug, Clone)]
pub enum MatchStateError {
    #[error("match {match_id} not found")]
    NotFound { match_id: String },
    #[error("match {match_id} is not in the expected state for this event")]
    WrongState { match_id: String },
    #[error("user {user_id} is not a participant in match {match_id}")]
    NotParticipant { match_id: String, user_id: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage transport failure: {0}")]
    Transport(String),
    #[error("storage returned an unexpected shape: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone)]
#[error("not found")]
pub struct NotFound;
