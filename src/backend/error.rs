//! Erros que um backend de inferência pode retornar.
//!
//! Cada variante de [`BackendError`] corresponde a exatamente um
//! [`FailureKind`], de modo que o dispatcher nunca precisa inspecionar
//! mensagens para classificar uma falha.

use thiserror::Error;

use crate::outcome::{Failure, FailureKind};

/// Erros que podem ocorrer ao chamar um endpoint de modelo.
#[derive(Debug, Error)]
pub enum BackendError {
    /// O servidor retornou HTTP 429 (rate limit).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Erro retornado pela API (ex.: 404 modelo inexistente, 500 erro interno).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede, timeout do cliente HTTP ou corpo de resposta inválido.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Resposta bem formada, porém sem conteúdo.
    #[error("response carried no content")]
    NoContent,
}

impl BackendError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BackendError::NetworkError(e) if e.is_timeout() => FailureKind::Timeout,
            BackendError::NoContent => FailureKind::EmptyContent,
            BackendError::RateLimited { .. }
            | BackendError::ApiError { .. }
            | BackendError::NetworkError(_) => FailureKind::RequestError,
        }
    }
}

impl From<BackendError> for Failure {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NoContent => Failure::new(FailureKind::EmptyContent, ""),
            other => Failure::new(other.kind(), other.to_string()),
        }
    }
}
