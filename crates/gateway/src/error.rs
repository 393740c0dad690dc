use {
    axum::{
        Json,
        extract::rejection::JsonRejection,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    wagate_channels::ProtocolError,
    wagate_common::{ApiEnvelope, TenantId},
    wagate_tenants::TenantError,
};

/// Control-plane and connectivity failures of the session manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session already active for tenant {0}")]
    AlreadyActive(TenantId),
    #[error("no active session for tenant {0}")]
    NotActive(TenantId),
    #[error("tenant {0} not found")]
    TenantNotFound(TenantId),
    #[error("pairing failed: {0}")]
    PairingFailed(String),
    #[error("timed out connecting to the protocol network")]
    ConnectTimeout,
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("start cancelled before the session connected")]
    Cancelled,
    #[error("tenant store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::PairingFailed(m) | ProtocolError::Rejected(m) => Self::PairingFailed(m),
            ProtocolError::Timeout => Self::ConnectTimeout,
            ProtocolError::ConnectionLost(m) | ProtocolError::Transport(m) => {
                Self::ConnectionLost(m)
            },
            ProtocolError::NotConnected => Self::ConnectionLost("client not connected".into()),
        }
    }
}

impl From<TenantError> for SessionError {
    fn from(e: TenantError) -> Self {
        match e {
            TenantError::NotFound(id) => Self::TenantNotFound(id),
            other => Self::StoreUnavailable(other.to_string()),
        }
    }
}

/// Error returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Store(#[from] TenantError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Session(e) => match e {
                SessionError::AlreadyActive(_) | SessionError::NotActive(_) => {
                    StatusCode::CONFLICT
                },
                SessionError::TenantNotFound(_) => StatusCode::NOT_FOUND,
                SessionError::ConnectTimeout => StatusCode::GATEWAY_TIMEOUT,
                SessionError::Cancelled => StatusCode::CONFLICT,
                SessionError::PairingFailed(_) | SessionError::ConnectionLost(_) => {
                    StatusCode::BAD_GATEWAY
                },
                SessionError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::Protocol(e) => match e {
                ProtocolError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ProtocolError::NotConnected => StatusCode::CONFLICT,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Store(e) => match e {
                TenantError::NotFound(_) => StatusCode::NOT_FOUND,
                TenantError::DuplicateToken => StatusCode::CONFLICT,
                TenantError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(ApiEnvelope::error(status.as_u16(), self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_plane_misuse_is_conflict() {
        assert_eq!(
            ApiError::from(SessionError::AlreadyActive(1)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(SessionError::NotActive(1)).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn protocol_errors_map_into_session_taxonomy() {
        assert_eq!(
            SessionError::from(ProtocolError::Timeout),
            SessionError::ConnectTimeout
        );
        assert_eq!(
            SessionError::from(ProtocolError::PairingFailed("qr expired".into())),
            SessionError::PairingFailed("qr expired".into())
        );
        assert_eq!(
            SessionError::from(TenantError::NotFound(3)),
            SessionError::TenantNotFound(3)
        );
    }
}
