use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::router::route::RouteMatch;

/// A filter that runs before a route handler.
///
/// Returning `false` stops dispatch; the middleware is then expected to have
/// written its own response.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, req: &Request, res: &mut Response, params: &RouteMatch) -> bool;
}

struct FnMiddleware<F>(F);

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&Request, &mut Response, &RouteMatch) -> bool + Send + Sync,
{
    async fn handle(&self, req: &Request, res: &mut Response, params: &RouteMatch) -> bool {
        (self.0)(req, res, params)
    }
}

/// Wrap a synchronous closure as middleware.
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(&Request, &mut Response, &RouteMatch) -> bool + Send + Sync + 'static,
{
    Arc::new(FnMiddleware(f))
}

/// Validates bearer tokens (for example JWTs) on behalf of [`BearerAuth`].
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> bool;
}

impl<F> TokenValidator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn validate(&self, token: &str) -> bool {
        self(token)
    }
}

/// Rejects requests without a valid `Authorization: Bearer <token>` header.
pub struct BearerAuth {
    validator: Arc<dyn TokenValidator>,
}

impl BearerAuth {
    pub fn new(validator: impl TokenValidator + 'static) -> Self {
        Self {
            validator: Arc::new(validator),
        }
    }

    pub fn into_middleware(self) -> Arc<dyn Middleware> {
        Arc::new(self)
    }
}

pub fn bearer_token(req: &Request) -> Option<&str> {
    let header = req.header("authorization")?;
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[async_trait]
impl Middleware for BearerAuth {
    async fn handle(&self, req: &Request, res: &mut Response, _params: &RouteMatch) -> bool {
        let Some(token) = bearer_token(req) else {
            debug!(path = %req.path, "missing bearer token");
            res.set_header("www-authenticate", "Bearer");
            res.send_error(StatusCode::Unauthorized, "UNAUTHORIZED", "Missing authorization header");
            return false;
        };

        if !self.validator.validate(token) {
            debug!(path = %req.path, "bearer token rejected");
            res.set_header("www-authenticate", "Bearer error=\"invalid_token\"");
            res.send_error(StatusCode::Unauthorized, "UNAUTHORIZED", "Invalid token");
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::{Method, RequestBuilder};

    fn request(auth: Option<&str>) -> Request {
        let mut builder = RequestBuilder::new().method(Method::GET).path("/secret");
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        builder.build().unwrap()
    }

    #[test]
    fn token_extraction() {
        assert_eq!(bearer_token(&request(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&request(Some("bearer  abc "))), Some("abc"));
        assert_eq!(bearer_token(&request(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&request(None)), None);
    }

    #[tokio::test]
    async fn invalid_token_gets_401() {
        let auth = BearerAuth::new(|t: &str| t == "good");
        let mut res = Response::new();
        let ok = auth.handle(&request(Some("Bearer bad")), &mut res, &RouteMatch::default()).await;
        assert!(!ok);
        assert_eq!(res.status, StatusCode::Unauthorized);

        let mut res = Response::new();
        assert!(auth.handle(&request(Some("Bearer good")), &mut res, &RouteMatch::default()).await);
        assert!(res.is_pristine());
    }
}
