//! JWT 认证
//!
//! token 可以放在 `Authorization: Bearer` 头里，浏览器的 WebSocket / EventSource
//! 无法设置请求头时也可以用 `?token=` 查询参数。

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, Uri},
    middleware::Next,
    response::Response,
};
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// 认证通过的用户，由中间件放进请求扩展
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, user_id: UserId) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);
        let claims = Claims {
            user_id: user_id.into(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::unauthorized(format!("Token generation failed: {}", err)))
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("Invalid token: {}", err)))
    }

    /// 优先读取请求头，其次是查询参数
    pub fn authenticate(&self, headers: &HeaderMap, uri: &Uri) -> Result<UserId, ApiError> {
        let header_token = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .map(|value| {
                value
                    .strip_prefix("Bearer ")
                    .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))
            })
            .transpose()?;

        let token = match header_token {
            Some(token) => token.to_string(),
            None => query_token(uri)
                .ok_or_else(|| ApiError::unauthorized("Missing authorization token"))?,
        };

        let claims = self.verify_token(&token)?;
        Ok(UserId::from(claims.user_id))
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn query_token(uri: &Uri) -> Option<String> {
    let Query(query) = Query::<TokenQuery>::try_from_uri(uri).ok()?;
    query.token.filter(|token| !token.is_empty())
}

/// 认证中间件：失败返回 401，成功时写入 [`AuthUser`]
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = state
        .jwt_service
        .authenticate(request.headers(), request.uri())?;
    request.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn service() -> JwtService {
        JwtService::new(JwtConfig::default())
    }

    fn uri(query: &str) -> Uri {
        format!("/api/v1/ws?{query}").parse().unwrap()
    }

    #[test]
    fn bearer_header_wins_over_query() {
        let jwt = service();
        let (a, b) = (UserId::generate(), UserId::generate());
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", jwt.generate_token(a).unwrap());
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&value).unwrap(),
        );
        let query = uri(&format!("token={}", jwt.generate_token(b).unwrap()));

        assert_eq!(jwt.authenticate(&headers, &query).unwrap(), a);
        assert_eq!(jwt.authenticate(&HeaderMap::new(), &query).unwrap(), b);
    }

    #[test]
    fn query_token_is_percent_decoded() {
        let jwt = service();
        let user = UserId::generate();
        let encoded = jwt.generate_token(user).unwrap().replace('.', "%2E");
        let query = uri(&format!("since=1&token={encoded}"));

        assert_eq!(jwt.authenticate(&HeaderMap::new(), &query).unwrap(), user);
    }

    #[test]
    fn missing_or_malformed_token_is_rejected() {
        let jwt = service();
        let no_query: Uri = "/api/v1/ws".parse().unwrap();
        assert!(jwt.authenticate(&HeaderMap::new(), &no_query).is_err());
        assert!(jwt.authenticate(&HeaderMap::new(), &uri("token=")).is_err());
        assert!(jwt
            .authenticate(&HeaderMap::new(), &uri("token=not-a-jwt"))
            .is_err());

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic abc"),
        );
        assert!(jwt.authenticate(&headers, &no_query).is_err());
    }
}
