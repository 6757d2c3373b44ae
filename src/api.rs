// Booking API transport: error taxonomy, engine configuration and the HTTP client
// used to talk to the hotel backend.

use crate::booking::BookingSubmission;
use crate::models::{Hotel, RoomRecord, StayWindow};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const SUBMISSION_FAILED_MESSAGE: &str =
    "There was an error processing your booking. Please try again.";
pub const NETWORK_FAILURE_MESSAGE: &str =
    "Unable to connect to the server. Please check your internet connection and try again.";
pub const HOTEL_NOT_FOUND_MESSAGE: &str = "Hotel not found";
pub const HOTEL_LOAD_FAILED_MESSAGE: &str = "Failed to load hotel details";
pub const ROOMS_LOAD_FAILED_MESSAGE: &str = "No rooms available at this time";

// Fields a local precondition can fail on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationField {
    Selection,
    CheckIn,
    CheckOut,
    StayDates,
    FirstName,
    LastName,
    Email,
    Phone,
    City,
    Country,
    PaymentMethod,
    PaymentProof,
    HotelPath,
    HotelId,
    Inventory,
    Payload,
    Phase,
}

impl ValidationField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationField::Selection => "roomSelections",
            ValidationField::CheckIn => "checkIn",
            ValidationField::CheckOut => "checkOut",
            ValidationField::StayDates => "stayDates",
            ValidationField::FirstName => "firstName",
            ValidationField::LastName => "lastName",
            ValidationField::Email => "email",
            ValidationField::Phone => "phone",
            ValidationField::City => "city",
            ValidationField::Country => "country",
            ValidationField::PaymentMethod => "paymentMethod",
            ValidationField::PaymentProof => "paymentProof",
            ValidationField::HotelPath => "hotelPath",
            ValidationField::HotelId => "hotelId",
            ValidationField::Inventory => "inventory",
            ValidationField::Payload => "payload",
            ValidationField::Phase => "phase",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: ValidationField,
    pub message: String,
}

// One entry per offending field, in the order the checks ran
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn single(field: ValidationField, message: impl Into<String>) -> Self {
        Self(vec![FieldError {
            field,
            message: message.into(),
        }])
    }

    pub fn push(&mut self, field: ValidationField, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> Vec<ValidationField> {
        self.0.iter().map(|error| error.field).collect()
    }

    pub fn contains(&self, field: ValidationField) -> bool {
        self.0.iter().any(|error| error.field == field)
    }

    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::ValidationError(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.0.iter().map(|error| error.message.as_str()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

// Every failure the engine reports. Display is the user-facing message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("{message}")]
    NotFound { message: String },

    #[error("{0}")]
    NetworkError(String),

    #[error("{message}")]
    ServerError { status_code: u16, message: String },

    #[error("{0}")]
    ValidationError(ValidationErrors),
}

impl ApiError {
    pub fn validation(field: ValidationField, message: impl Into<String>) -> Self {
        ApiError::ValidationError(ValidationErrors::single(field, message))
    }

    pub fn network() -> Self {
        ApiError::NetworkError(NETWORK_FAILURE_MESSAGE.to_string())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ApiError::ValidationError(_))
    }

    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

// Engine configuration, passed explicitly to every component that needs it
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_base: String,
    pub push_url: String,
    // Hotel used until a hotel record has been loaded by path
    pub fallback_hotel_id: Option<String>,
    pub submission_timeout_ms: u64,
    pub default_payment_method: String,
    pub currency: String,
    pub booking_source: String,
    pub client_environment: String,
    pub placeholder_on_failure: bool,
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:5000/api".to_string(),
            push_url: "ws://localhost:5000/ws".to_string(),
            fallback_hotel_id: None,
            submission_timeout_ms: 30_000,
            default_payment_method: "UPI".to_string(),
            currency: "INR".to_string(),
            booking_source: "web".to_string(),
            client_environment: format!(
                "{}/{} ({})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS
            ),
            placeholder_on_failure: true,
            event_buffer: 64,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ClientError> {
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(ClientError::ConfigError(format!(
                "api_base must be an http(s) URL, got {:?}",
                self.api_base
            )));
        }
        if !(self.push_url.starts_with("ws://") || self.push_url.starts_with("wss://")) {
            return Err(ClientError::ConfigError(format!(
                "push_url must be a ws(s) URL, got {:?}",
                self.push_url
            )));
        }
        if self.submission_timeout_ms == 0 {
            return Err(ClientError::ConfigError(
                "submission_timeout_ms must be positive".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ClientError::ConfigError(
                "event_buffer must be positive".to_string(),
            ));
        }
        if self.default_payment_method.trim().is_empty() {
            return Err(ClientError::ConfigError(
                "default_payment_method must not be empty".to_string(),
            ));
        }
        if let Some(hotel_id) = &self.fallback_hotel_id {
            if hotel_id.trim().is_empty() {
                return Err(ClientError::ConfigError(
                    "fallback_hotel_id must not be blank".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }
}

// Backend operations the engine depends on
#[async_trait]
pub trait BookingApi: Send + Sync + 'static {
    async fn fetch_rooms(
        &self,
        hotel_id: &str,
        window: &StayWindow,
    ) -> Result<Vec<RoomRecord>, ApiError>;

    async fn fetch_hotel(&self, hotel_path: &str) -> Result<Hotel, ApiError>;

    // Returns the raw JSON body of a successful submission
    async fn submit_booking(&self, submission: &BookingSubmission) -> Result<Value, ApiError>;
}

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Rooms,
    Hotel,
    Bookings,
}

impl Endpoint {
    fn fallback_message(&self, status: StatusCode) -> &'static str {
        match (self, status) {
            (Endpoint::Hotel, StatusCode::NOT_FOUND) => HOTEL_NOT_FOUND_MESSAGE,
            (Endpoint::Hotel, _) => HOTEL_LOAD_FAILED_MESSAGE,
            (Endpoint::Rooms, _) => ROOMS_LOAD_FAILED_MESSAGE,
            (Endpoint::Bookings, _) => SUBMISSION_FAILED_MESSAGE,
        }
    }
}

// Picks the `message`, then `error`, field out of an error body
pub fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error"].iter().find_map(|key| {
        value
            .get(*key)
            .and_then(Value::as_str)
            .filter(|message| !message.trim().is_empty())
            .map(str::to_string)
    })
}

pub fn classify_status(status_code: u16, body: &str, fallback: &str) -> ApiError {
    let message = server_message(body).unwrap_or_else(|| fallback.to_string());
    if status_code == StatusCode::NOT_FOUND.as_u16() {
        ApiError::NotFound { message }
    } else {
        ApiError::ServerError {
            status_code,
            message,
        }
    }
}

pub struct HttpBookingApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBookingApi {
    pub fn new(config: &EngineConfig) -> Result<Self, ClientError> {
        config.validate()?;
        // No client-wide timeout: inventory reads are unbounded, submissions are bounded by the flow
        let client = reqwest::Client::builder()
            .user_agent(config.client_environment.clone())
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn transport_error(endpoint: Endpoint, err: reqwest::Error) -> ApiError {
        tracing::warn!(?endpoint, error = %err, "Request did not get a response");
        ApiError::network()
    }

    // Non-2xx becomes a classified error, 2xx hands back the raw body
    async fn read_success(
        endpoint: Endpoint,
        response: reqwest::Response,
    ) -> Result<(StatusCode, Bytes), ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(
                status.as_u16(),
                &body,
                endpoint.fallback_message(status),
            ));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::transport_error(endpoint, e))?;
        Ok((status, body))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        endpoint: Endpoint,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let (status, body) = Self::read_success(endpoint, response).await?;
        serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(?endpoint, status = status.as_u16(), error = %e, "Undecodable response body");
            ApiError::ServerError {
                status_code: status.as_u16(),
                message: endpoint.fallback_message(status).to_string(),
            }
        })
    }

    fn submission_form(submission: &BookingSubmission) -> Result<Form, ApiError> {
        let mut form = Form::new();
        for (name, json) in submission.encoded_parts() {
            form = form.text(*name, json.clone());
        }

        let proof = submission.payment_proof();
        let part = Part::bytes(proof.bytes.to_vec())
            .file_name(proof.file_name.clone())
            .mime_str(&proof.mime_type)
            .map_err(|_| {
                ApiError::validation(
                    ValidationField::PaymentProof,
                    format!("Unsupported payment proof type: {}", proof.mime_type),
                )
            })?;
        Ok(form.part("paymentProof", part))
    }
}

#[async_trait]
impl BookingApi for HttpBookingApi {
    async fn fetch_rooms(
        &self,
        hotel_id: &str,
        window: &StayWindow,
    ) -> Result<Vec<RoomRecord>, ApiError> {
        let url = format!("{}/rooms/hotel/{}", self.base_url, hotel_id);
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(check_in) = window.check_in_param() {
            query.push(("checkIn", check_in));
        }
        if let Some(check_out) = window.check_out_param() {
            query.push(("checkOut", check_out));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| Self::transport_error(Endpoint::Rooms, e))?;
        Self::read_json(Endpoint::Rooms, response).await
    }

    async fn fetch_hotel(&self, hotel_path: &str) -> Result<Hotel, ApiError> {
        let url = format!("{}/hotel/path/{}", self.base_url, hotel_path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::transport_error(Endpoint::Hotel, e))?;
        Self::read_json(Endpoint::Hotel, response).await
    }

    async fn submit_booking(&self, submission: &BookingSubmission) -> Result<Value, ApiError> {
        let form = Self::submission_form(submission)?;
        let url = format!("{}/bookings", self.base_url);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::transport_error(Endpoint::Bookings, e))?;

        // Any 2xx means the booking was accepted, whatever the body looks like
        let (status, body) = Self::read_success(Endpoint::Bookings, response).await?;
        Ok(serde_json::from_slice(&body).unwrap_or_else(|e| {
            tracing::debug!(status = status.as_u16(), error = %e, "Booking accepted without a JSON body");
            Value::Null
        }))
    }
}
