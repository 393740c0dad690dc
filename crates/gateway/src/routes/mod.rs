//! HTTP handlers. Every response uses the `{code, data, success}` envelope.

pub mod admin;
pub mod chat;
pub mod session;
pub mod user;
pub mod webhook;

use {
    axum::{
        Json,
        extract::{FromRequest, FromRequestParts, Request},
        http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    },
    serde::{Serialize, de::DeserializeOwned},
    wagate_common::{ApiEnvelope, TenantId},
};

use crate::{
    auth::{AuthFailure, authenticate_tenant, authorize_admin, token_from_headers},
    error::ApiError,
    server::AppState,
};

pub(crate) type ApiResult = Result<Json<ApiEnvelope>, ApiError>;

pub(crate) fn ok(data: impl Serialize) -> ApiResult {
    let data = serde_json::to_value(data).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(ApiEnvelope::ok(data)))
}

impl From<AuthFailure> for ApiError {
    fn from(f: AuthFailure) -> Self {
        ApiError::Unauthorized(f.reason())
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Tenant resolved from the `token` header.
#[derive(Debug, Clone, Copy)]
pub struct Tenant(pub TenantId);

impl FromRequestParts<AppState> for Tenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(
            header(&parts.headers, "token"),
            header(&parts.headers, AUTHORIZATION.as_str()),
        );
        let gw = &state.gateway;
        let id = authenticate_tenant(&gw.auth_cache, gw.store.as_ref(), token).await?;
        Ok(Self(id))
    }
}

/// Operator authenticated with the admin token in `Authorization`.
#[derive(Debug, Clone, Copy)]
pub struct Admin;

impl FromRequestParts<AppState> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let provided = token_from_headers(None, header(&parts.headers, AUTHORIZATION.as_str()));
        authorize_admin(state.gateway.admin_token(), provided)?;
        Ok(Self)
    }
}

/// JSON request body whose rejections use the error envelope.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Strip formatting from a phone number and reject anything that is not a
/// plausible international number or a full chat id.
pub(crate) fn normalize_recipient(raw: &str) -> Result<String, ApiError> {
    let raw = raw.trim();
    if raw.contains('@') {
        return Ok(raw.to_string());
    }
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-' | '(' | ')'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::bad_request(format!("invalid phone number: {raw:?}")));
    }
    Ok(digits)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use {
        axum::{
            Router,
            body::{Body, to_bytes},
            http::{Method, Request, StatusCode},
        },
        secrecy::Secret,
        serde_json::Value,
        tower::ServiceExt,
        wagate_config::WagateConfig,
        wagate_tenants::{MemoryTenantStore, TenantRecord},
    };

    use crate::{server::build_gateway_app, state::GatewayState, test_support::FakeFactory};

    pub const ADMIN: &str = "admin-secret";

    pub struct Harness {
        pub app: Router,
        pub state: Arc<GatewayState>,
        pub store: Arc<MemoryTenantStore>,
        pub factory: FakeFactory,
    }

    pub async fn harness(tenants: &[(i64, &str)]) -> Harness {
        let store = Arc::new(MemoryTenantStore::new());
        for &(id, token) in tenants {
            store
                .insert(TenantRecord::new(id, format!("t{id}"), token))
                .await;
        }
        let mut config = WagateConfig::default();
        config.auth.admin_token = Some(Secret::new(ADMIN.to_string()));
        let factory = FakeFactory::paired("5511@s.whatsapp.net");
        let state = GatewayState::new(config, store.clone(), Arc::new(factory.clone()));
        Harness {
            app: build_gateway_app(Arc::clone(&state)),
            state,
            store,
            factory,
        }
    }

    impl Harness {
        pub async fn call(
            &self,
            method: Method,
            uri: &str,
            auth: Option<(&str, &str)>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some((name, value)) = auth {
                req = req.header(name, value);
            }
            let req = match body {
                Some(b) => req
                    .header("content-type", "application/json")
                    .body(Body::from(b.to_string())),
                None => req.body(Body::empty()),
            }
            .unwrap();
            let resp = self.app.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }

        pub async fn tenant(&self, method: Method, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
            self.call(method, uri, Some(("token", token)), body).await
        }

        pub async fn admin(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            self.call(method, uri, Some(("authorization", ADMIN)), body)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::{testing::harness, *},
        axum::http::{Method, StatusCode},
    };

    #[test]
    fn recipients_are_normalized() {
        assert_eq!(normalize_recipient("+55 (11) 9999-0000").unwrap(), "551199990000");
        assert_eq!(
            normalize_recipient("120363@g.us").unwrap(),
            "120363@g.us"
        );
        assert!(normalize_recipient("call me").is_err());
        assert!(normalize_recipient("").is_err());
    }

    #[tokio::test]
    async fn malformed_body_gets_error_envelope() {
        use {
            axum::{
                body::{Body, to_bytes},
                http::Request,
            },
            tower::ServiceExt,
        };

        let h = harness(&[(1, "tok1")]).await;
        let req = Request::builder()
            .method(Method::POST)
            .uri("/chat/send/text")
            .header("token", "tok1")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], 400);
        assert_eq!(body["success"], false);

        let (status, body) = h
            .tenant(Method::POST, "/chat/send/text", "tok1", Some(serde_json::json!({ "body": "hi" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("phone"));
    }

    #[tokio::test]
    async fn health_needs_no_auth() {
        let h = harness(&[]).await;
        let (status, body) = h.call(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn tenant_routes_reject_missing_or_bad_token() {
        let h = harness(&[(1, "tok1")]).await;
        let (status, body) = h.call(Method::GET, "/session/status", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        let (status, _) = h.tenant(Method::GET, "/session/status", "wrong", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bearer_token_is_accepted() {
        let h = harness(&[(1, "tok1")]).await;
        let (status, _) = h
            .call(
                Method::GET,
                "/session/status",
                Some(("authorization", "Bearer tok1")),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_routes_need_admin_token() {
        let h = harness(&[(1, "tok1")]).await;
        let (status, _) = h.tenant(Method::GET, "/admin/users", "tok1", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = h.admin(Method::GET, "/admin/users", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
