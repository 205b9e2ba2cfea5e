//! AWS error types and formatting

use serde::Serialize;
use thiserror::Error;

/// AWS error codes returned by SecretStack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Request level
    IncompleteSignature,
    InvalidSignature,
    UnknownOperation,
    ValidationException,

    // Secrets Manager specific
    ResourceNotFoundException,
    ResourceExistsException,
    InvalidParameterException,
    InvalidRequestException,
    InvalidNextTokenException,
    MalformedPolicyDocumentException,

    // Server side
    InternalServiceError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncompleteSignature => "IncompleteSignatureException",
            Self::InvalidSignature => "InvalidSignatureException",
            Self::UnknownOperation => "UnknownOperationException",
            Self::ValidationException => "ValidationException",
            Self::ResourceNotFoundException => "ResourceNotFoundException",
            Self::ResourceExistsException => "ResourceExistsException",
            Self::InvalidParameterException => "InvalidParameterException",
            Self::InvalidRequestException => "InvalidRequestException",
            Self::InvalidNextTokenException => "InvalidNextTokenException",
            Self::MalformedPolicyDocumentException => "MalformedPolicyDocumentException",
            Self::InternalServiceError => "InternalServiceError",
        }
    }

    /// Secrets Manager reports every caller mistake as a 400.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InternalServiceError => 500,
            Self::IncompleteSignature
            | Self::InvalidSignature
            | Self::UnknownOperation
            | Self::ValidationException
            | Self::ResourceNotFoundException
            | Self::ResourceExistsException
            | Self::InvalidParameterException
            | Self::InvalidRequestException
            | Self::InvalidNextTokenException
            | Self::MalformedPolicyDocumentException => 400,
        }
    }
}

/// AWS-style error
#[derive(Debug, Error)]
#[error("{}: {message}", .code.as_str())]
pub struct AwsError {
    pub code: ErrorCode,
    pub message: String,
}

impl AwsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalServiceError, message)
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Format as an AWS JSON 1.1 error body
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct JsonError<'a> {
            #[serde(rename = "__type")]
            error_type: &'a str,
            message: &'a str,
        }

        let error = JsonError {
            error_type: self.code.as_str(),
            message: &self.message,
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(r#"{{"__type":"{}","message":""}}"#, self.code.as_str())
        })
    }
}
