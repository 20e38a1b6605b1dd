//! JWT 认证
//!
//! 令牌由外部身份服务签发（HS256，共享密钥），声明中携带用户资料。
//! 若令牌绑定了来源地址（`origin` 声明），连接来源必须一致。

use application::{AuthFailure, AuthenticationOracle};
use async_trait::async_trait;
use axum::http::HeaderMap;
use config::JwtConfig;
use domain::UserProfile;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

impl From<Claims> for UserProfile {
    fn from(claims: Claims) -> Self {
        UserProfile {
            user_id: claims.user_id,
            username: claims.username,
            display_name: claims.display_name,
            avatar_url: claims.avatar_url,
        }
    }
}

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

    /// 签发令牌；服务本身只校验，签发用于运维工具与测试
    pub fn generate_token(
        &self,
        profile: &UserProfile,
        origin: Option<&str>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);
        let claims = Claims {
            user_id: profile.user_id,
            username: profile.username.clone(),
            display_name: profile.display_name.clone(),
            avatar_url: profile.avatar_url.clone(),
            origin: origin.map(str::to_string),
            exp: exp.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthFailure> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthFailure::Expired,
                _ => AuthFailure::InvalidToken(err.to_string()),
            })
    }
}

#[async_trait]
impl AuthenticationOracle for JwtService {
    async fn verify(&self, token: &str, origin: Option<&str>) -> Result<UserProfile, AuthFailure> {
        let claims = self.verify_token(token)?;
        if let Some(bound) = claims.origin.as_deref() {
            if origin != Some(bound) {
                return Err(AuthFailure::InvalidToken(
                    "token is bound to a different origin".to_string(),
                ));
            }
        }
        Ok(claims.into())
    }
}

/// 取出 `Authorization: Bearer <token>` 中的令牌
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// 客户端来源：优先代理头
pub fn client_origin(headers: &HeaderMap, peer: Option<std::net::SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn service() -> JwtService {
        JwtService::new(JwtConfig {
            secret: "unit-test-secret-key-with-enough-length".to_string(),
            expiration_hours: 1,
        })
    }

    #[tokio::test]
    async fn verifies_tokens_and_bound_origins() {
        let jwt = service();
        let profile = UserProfile::new(Uuid::new_v4(), "alice");

        let open = jwt.generate_token(&profile, None).unwrap();
        let verified = jwt.verify(&open, Some("10.0.0.1")).await.unwrap();
        assert_eq!(verified, profile);

        let bound = jwt.generate_token(&profile, Some("10.0.0.1")).unwrap();
        assert!(jwt.verify(&bound, Some("10.0.0.1")).await.is_ok());
        assert!(matches!(
            jwt.verify(&bound, Some("10.0.0.2")).await,
            Err(AuthFailure::InvalidToken(_))
        ));
        assert!(matches!(
            jwt.verify("garbage", None).await,
            Err(AuthFailure::InvalidToken(_))
        ));
    }

    #[test]
    fn extracts_bearer_and_origin() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 10.0.0.1"));
        assert_eq!(bearer_token(&headers), Some("abc"));
        assert_eq!(client_origin(&headers, None).as_deref(), Some("1.2.3.4"));

        let empty = HeaderMap::new();
        let peer = "127.0.0.1:9000".parse().ok();
        assert_eq!(client_origin(&empty, peer).as_deref(), Some("127.0.0.1"));
    }
}
