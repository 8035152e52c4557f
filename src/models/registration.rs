// src/models/registration.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'registrations' table.
/// Issued by the payment flow and consumed exactly once by a session.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Registration {
    pub registration_number: String,
    pub candidate_name: String,
    pub district: String,
    pub exam_id: String,

    /// Set when an exam session has been started with this registration.
    pub used: bool,

    /// Set when that session's answers have been accepted.
    pub submitted: bool,
}

/// What a candidate is shown after a successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub registration_number: String,
    pub candidate_name: String,
    pub district: String,
    pub exam_id: String,
}

impl From<&Registration> for CandidateProfile {
    fn from(reg: &Registration) -> Self {
        Self {
            registration_number: reg.registration_number.clone(),
            candidate_name: reg.candidate_name.clone(),
            district: reg.district.clone(),
            exam_id: reg.exam_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ValidateRegistrationRequest {
    #[validate(length(min = 1, max = 64))]
    pub exam_id: String,
    #[validate(length(min = 1, max = 64))]
    pub registration_number: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateRegistrationResponse {
    pub valid: bool,
    pub used: bool,
    pub candidate_profile: Option<CandidateProfile>,
}

/// DTO for issuing a registration (admin / payment callback).
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateRegistrationRequest {
    #[validate(length(min = 1, max = 64))]
    pub registration_number: String,
    #[validate(length(min = 1, max = 100))]
    pub candidate_name: String,
    #[validate(length(min = 1, max = 100))]
    pub district: String,
    #[validate(length(min = 1, max = 64))]
    pub exam_id: String,
}
