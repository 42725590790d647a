//! Request routing.
//!
//! Routes are registered per method with a path template and an optional list
//! of middleware. For each request the candidates of the request's method are
//! tried in registration order and the first matching pattern wins, so more
//! specific routes must be registered before catch-alls.
//!
//! Dispatch runs global middleware, then the route's middleware, then the
//! handler. Any middleware returning `false` ends dispatch. Authorization is
//! just middleware: a route "requires auth" when it has route middleware.

pub mod middleware;
pub mod route;
pub mod static_files;

pub use middleware::{middleware_fn, BearerAuth, Middleware, TokenValidator};
pub use route::{PathPattern, RouteMatch, CATCH_ALL};
pub use static_files::{DirectoryListing, StaticFiles};

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, trace};

use crate::http::request::{Method, Request};
use crate::http::response::Response;

/// Default bound on waiting for the route table lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid route template {template}: {source}")]
    InvalidTemplate {
        template: String,
        #[source]
        source: regex::Error,
    },

    #[error("route table lock not acquired within {0:?}")]
    LockTimeout(Duration),
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, req: &Request, res: &mut Response, params: &RouteMatch);
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&Request, &mut Response, &RouteMatch) + Send + Sync,
{
    async fn handle(&self, req: &Request, res: &mut Response, params: &RouteMatch) {
        (self.0)(req, res, params)
    }
}

/// Wrap a synchronous closure as a route handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&Request, &mut Response, &RouteMatch) + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

pub struct Route {
    pub method: Method,
    pub template: String,
    pattern: PathPattern,
    handler: Arc<dyn Handler>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Route {
    pub fn requires_auth(&self) -> bool {
        !self.middleware.is_empty()
    }

    pub fn param_names(&self) -> &[String] {
        self.pattern.names()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("template", &self.template)
            .field("pattern", &self.pattern.as_str())
            .field("requires_auth", &self.requires_auth())
            .finish()
    }
}

/// Summary of one registered route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: Method,
    pub template: String,
    pub pattern: String,
    pub requires_auth: bool,
}

#[derive(Default)]
struct RouteTable {
    routes: HashMap<Method, Vec<Arc<Route>>>,
    global: Vec<Arc<dyn Middleware>>,
}

pub struct Router {
    table: RwLock<RouteTable>,
    lock_timeout: Duration,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl Router {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            table: RwLock::new(RouteTable::default()),
            lock_timeout,
        }
    }

    /// Register a route. Registration order is match precedence.
    pub async fn add_route(
        &self,
        method: Method,
        template: &str,
        handler: Arc<dyn Handler>,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> Result<(), RouterError> {
        let pattern = PathPattern::compile(template).map_err(|source| RouterError::InvalidTemplate {
            template: template.to_string(),
            source,
        })?;

        let route = Arc::new(Route {
            method,
            template: template.to_string(),
            pattern,
            handler,
            middleware,
        });

        debug!(%method, template, requires_auth = route.requires_auth(), "route added");

        let mut table = timeout(self.lock_timeout, self.table.write())
            .await
            .map_err(|_| RouterError::LockTimeout(self.lock_timeout))?;
        table.routes.entry(method).or_default().push(route);
        Ok(())
    }

    /// Add middleware that runs before every route.
    pub async fn use_middleware(&self, middleware: Arc<dyn Middleware>) -> Result<(), RouterError> {
        let mut table = timeout(self.lock_timeout, self.table.write())
            .await
            .map_err(|_| RouterError::LockTimeout(self.lock_timeout))?;
        table.global.push(middleware);
        Ok(())
    }

    /// Find the route for `req` and dispatch it.
    ///
    /// Returns `Ok(false)` when no route matches; the caller turns that into
    /// a not-found response. The table lock is released before any middleware
    /// or handler runs. `HEAD` falls back to `GET` routes.
    pub async fn handle_request(&self, req: &Request, res: &mut Response) -> Result<bool, RouterError> {
        let found = {
            let table = timeout(self.lock_timeout, self.table.read())
                .await
                .map_err(|_| RouterError::LockTimeout(self.lock_timeout))?;

            let mut found = Self::find(&table, req.method, &req.path);
            if found.is_none() && req.method == Method::HEAD {
                found = Self::find(&table, Method::GET, &req.path);
            }
            found.map(|(route, params)| (route, params, table.global.clone()))
        };

        let Some((route, params, global)) = found else {
            trace!(method = %req.method, path = %req.path, "no route matched");
            return Ok(false);
        };

        trace!(method = %req.method, template = %route.template, "route matched");

        for mw in global.iter().chain(route.middleware.iter()) {
            if !mw.handle(req, res, &params).await {
                debug!(path = %req.path, status = res.status.as_u16(), "middleware stopped request");
                return Ok(true);
            }
        }

        route.handler.handle(req, res, &params).await;
        Ok(true)
    }

    fn find(table: &RouteTable, method: Method, path: &str) -> Option<(Arc<Route>, RouteMatch)> {
        table
            .routes
            .get(&method)?
            .iter()
            .find_map(|route| route.pattern.matches(path).map(|m| (Arc::clone(route), m)))
    }

    /// Registered routes, grouped by method in registration order.
    pub async fn routes(&self) -> Result<Vec<RouteInfo>, RouterError> {
        let table = timeout(self.lock_timeout, self.table.read())
            .await
            .map_err(|_| RouterError::LockTimeout(self.lock_timeout))?;

        let mut methods: Vec<_> = table.routes.keys().copied().collect();
        methods.sort_by_key(|m| m.as_str());

        Ok(methods
            .into_iter()
            .flat_map(|m| table.routes[&m].iter())
            .map(|r| RouteInfo {
                method: r.method,
                template: r.template.clone(),
                pattern: r.pattern.as_str().to_string(),
                requires_auth: r.requires_auth(),
            })
            .collect())
    }

    /// Log the route table at `info` level.
    pub async fn print_routes(&self) -> Result<(), RouterError> {
        for route in self.routes().await? {
            info!(
                method = %route.method,
                template = %route.template,
                requires_auth = route.requires_auth,
                "route"
            );
        }
        Ok(())
    }

    #[cfg(test)]
    async fn lock_for_test(&self) -> tokio::sync::RwLockWriteGuard<'_, RouteTable> {
        self.table.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestBuilder;

    #[tokio::test]
    async fn lock_timeout_is_reported() {
        let router = Router::new(Duration::from_millis(20));
        let _guard = router.lock_for_test().await;

        let req = RequestBuilder::new().method(Method::GET).path("/").build().unwrap();
        let mut res = Response::new();
        let result = router.handle_request(&req, &mut res).await;
        assert!(matches!(result, Err(RouterError::LockTimeout(_))));

        let result = router.add_route(Method::GET, "/", handler_fn(|_, _, _| {}), vec![]).await;
        assert!(matches!(result, Err(RouterError::LockTimeout(_))));
    }

    #[tokio::test]
    async fn head_falls_back_to_get() {
        let router = Router::default();
        router
            .add_route(Method::GET, "/hello", handler_fn(|_, res, _| {
                res.text("hi");
            }), vec![])
            .await
            .unwrap();

        let req = RequestBuilder::new().method(Method::HEAD).path("/hello").build().unwrap();
        let mut res = Response::new();
        assert!(router.handle_request(&req, &mut res).await.unwrap());
        assert_eq!(res.body.len(), 2);
    }
}
