// src/controller/gateway.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use url::Url;
use uuid::Uuid;

use crate::models::{
    registration::{
        CandidateProfile, ValidateRegistrationRequest, ValidateRegistrationResponse,
    },
    results::{ExamResults, WinnerChoice},
    score::ScoreResult,
    session::{AnswerRecord, ExamStart, StartExamRequest, SubmitAnswersRequest},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("not found")]
    NotFound,
    #[error("registration already used")]
    AlreadyUsed,
    #[error("admission window closed")]
    AdmissionClosed,
    #[error("portal unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Worth trying again later without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Unavailable(err.to_string())
    }
}

/// Operations the admission controller needs from the portal backend.
#[async_trait]
pub trait PortalBackend: Send + Sync {
    /// Succeeds only for an unused registration of `exam_id`.
    async fn validate_registration(
        &self,
        exam_id: &str,
        registration_number: &str,
    ) -> Result<CandidateProfile, GatewayError>;

    /// Consumes the registration and returns the exam's questions.
    async fn start_exam(&self, registration_number: &str) -> Result<ExamStart, GatewayError>;

    /// Idempotent per `session_id`. `frozen_at` is when the answers were
    /// frozen on the terminal; ties in the ranking are broken by it.
    async fn submit_exam_answers(
        &self,
        session_id: Uuid,
        answers: &[AnswerRecord],
        frozen_at: DateTime<Utc>,
    ) -> Result<ScoreResult, GatewayError>;

    async fn get_all_exam_results(&self) -> Result<Vec<ExamResults>, GatewayError>;

    async fn save_winner_choice(&self, choice: &WinnerChoice) -> Result<(), GatewayError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`PortalBackend`] over the portal's JSON HTTP API.
#[derive(Debug, Clone)]
pub struct HttpPortal {
    client: Client,
    base: Url,
    admin_token: Option<String>,
}

impl HttpPortal {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client: Client::new(),
            base,
            admin_token: None,
        })
    }

    /// Bearer token used for the results and winner endpoints.
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    /// WebSocket URL of the exam catalog feed.
    pub fn feed_url(&self) -> Result<Url, GatewayError> {
        let mut url = self.endpoint("api/exams/feed")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| GatewayError::Rejected(format!("cannot derive feed url from {}", self.base)))?;
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base
            .join(path)
            .map_err(|e| GatewayError::Rejected(e.to_string()))
    }

    fn admin(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.admin_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    Err(match status {
        StatusCode::NOT_FOUND => GatewayError::NotFound,
        StatusCode::CONFLICT => GatewayError::AlreadyUsed,
        StatusCode::FORBIDDEN => GatewayError::AdmissionClosed,
        s if s.is_server_error() => GatewayError::Unavailable(message),
        _ => GatewayError::Rejected(message),
    })
}

#[async_trait]
impl PortalBackend for HttpPortal {
    async fn validate_registration(
        &self,
        exam_id: &str,
        registration_number: &str,
    ) -> Result<CandidateProfile, GatewayError> {
        let body = ValidateRegistrationRequest {
            exam_id: exam_id.to_string(),
            registration_number: registration_number.to_string(),
        };
        let response = self
            .client
            .post(self.endpoint("api/registrations/validate")?)
            .json(&body)
            .send()
            .await?;
        let outcome: ValidateRegistrationResponse = decode(response).await?;

        if outcome.used {
            return Err(GatewayError::AlreadyUsed);
        }
        match outcome.candidate_profile {
            Some(profile) if outcome.valid => Ok(profile),
            _ => Err(GatewayError::NotFound),
        }
    }

    async fn start_exam(&self, registration_number: &str) -> Result<ExamStart, GatewayError> {
        let body = StartExamRequest {
            registration_number: registration_number.to_string(),
        };
        let response = self
            .client
            .post(self.endpoint("api/sessions")?)
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    async fn submit_exam_answers(
        &self,
        session_id: Uuid,
        answers: &[AnswerRecord],
        frozen_at: DateTime<Utc>,
    ) -> Result<ScoreResult, GatewayError> {
        let body = SubmitAnswersRequest {
            answers: answers.to_vec(),
            submitted_at: Some(frozen_at),
        };
        let response = self
            .client
            .post(self.endpoint(&format!("api/sessions/{session_id}/submit"))?)
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    async fn get_all_exam_results(&self) -> Result<Vec<ExamResults>, GatewayError> {
        let response = self
            .admin(self.client.get(self.endpoint("api/admin/results")?))
            .send()
            .await?;
        decode(response).await
    }

    async fn save_winner_choice(&self, choice: &WinnerChoice) -> Result<(), GatewayError> {
        let url = self.endpoint(&format!("api/admin/results/{}/winners", choice.exam_id))?;
        let response = self.admin(self.client.post(url)).json(choice).send().await?;
        let _: WinnerChoice = decode(response).await?;
        Ok(())
    }
}
