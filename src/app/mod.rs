//! Demo application: the hello route, a programs REST API, file upload,
//! directory listing and static files, plus a heartbeat controller.

mod heartbeat;
pub mod programs;

pub use heartbeat::HeartbeatController;
pub use programs::{parse_program, Program, ProgramError, ProgramStore, ProgramZone};

use serde_json::json;
use std::sync::Arc;

use crate::events::{Event, EventManager};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::router::{handler_fn, BearerAuth, DirectoryListing, Middleware, RouteMatch, Router, RouterError, StaticFiles};
use crate::storage::Storage;

pub const WELCOME: &str = "Welcome to PicoFramework!";

/// User event posted after an upload is stored; the payload is the
/// [`UploadedFile`](crate::http::multipart::UploadedFile).
pub const UPLOAD_STORED: u8 = 1;

pub struct App {
    storage: Arc<dyn Storage>,
    events: Arc<EventManager>,
    programs: Arc<ProgramStore>,
    api_token: Option<String>,
}

impl App {
    pub fn new(storage: Arc<dyn Storage>, events: Arc<EventManager>, programs_path: &str) -> Self {
        Self {
            programs: Arc::new(ProgramStore::new(Arc::clone(&storage), programs_path)),
            storage,
            events,
            api_token: None,
        }
    }

    /// Require `Authorization: Bearer <token>` on routes that change programs.
    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn programs(&self) -> &Arc<ProgramStore> {
        &self.programs
    }

    fn guard(&self) -> Vec<Arc<dyn Middleware>> {
        match &self.api_token {
            Some(token) => {
                let token = token.clone();
                vec![BearerAuth::new(move |t: &str| t == token).into_middleware()]
            }
            None => Vec::new(),
        }
    }

    /// Register every route; the static-file catch-all goes last.
    pub async fn register(&self, router: &Router) -> Result<(), RouterError> {
        router
            .add_route(Method::GET, "/hello", handler_fn(|_, res, _| {
                res.text(WELCOME);
            }), Vec::new())
            .await?;

        self.register_programs(router).await?;

        let events = Arc::clone(&self.events);
        router
            .add_route(Method::POST, "/api/v1/upload", handler_fn(move |req, res, _| {
                upload(&events, req, res)
            }), Vec::new())
            .await?;

        let listing = Arc::new(DirectoryListing::new(Arc::clone(&self.storage), "/"));
        router.add_route(Method::GET, "/api/v1/ls", listing.clone(), Vec::new()).await?;
        router.add_route(Method::GET, "/api/v1/ls/{dir}", listing, Vec::new()).await?;

        let files = Arc::new(StaticFiles::new(Arc::clone(&self.storage), "/"));
        router.add_route(Method::GET, "/.*", files, Vec::new()).await?;

        Ok(())
    }

    async fn register_programs(&self, router: &Router) -> Result<(), RouterError> {
        let store = Arc::clone(&self.programs);
        router
            .add_route(Method::GET, "/api/v1/programs", handler_fn(move |_, res, _| {
                match store.list() {
                    Ok(programs) => res.send_success(json!(programs), ""),
                    Err(e) => fail(res, &e),
                };
            }), Vec::new())
            .await?;

        let store = Arc::clone(&self.programs);
        router
            .add_route(Method::POST, "/api/v1/programs", handler_fn(move |req, res, _| {
                let result = parse_program(&req.body).and_then(|program| {
                    let data = json!(program);
                    store.create(program).map(|_| data)
                });
                match result {
                    Ok(data) => res.send_created(data, "Program created"),
                    Err(e) => fail(res, &e),
                };
            }), self.guard())
            .await?;

        let store = Arc::clone(&self.programs);
        router
            .add_route(Method::GET, "/api/v1/programs/{name}", handler_fn(move |_, res, params| {
                match store.get(name_param(params)) {
                    Ok(program) => res.send_success(json!(program), ""),
                    Err(e) => fail(res, &e),
                };
            }), Vec::new())
            .await?;

        let store = Arc::clone(&self.programs);
        router
            .add_route(Method::PUT, "/api/v1/programs/{name}", handler_fn(move |req, res, params| {
                let result = parse_program(&req.body).and_then(|program| {
                    if program.name != name_param(params) {
                        return Err(ProgramError::NameMismatch);
                    }
                    let data = json!(program);
                    store.upsert(program).map(|created| (created, data))
                });
                match result {
                    Ok((true, data)) => res.send_created(data, "Program created"),
                    Ok((false, data)) => res.send_success(data, "Program updated"),
                    Err(e) => fail(res, &e),
                };
            }), self.guard())
            .await?;

        let store = Arc::clone(&self.programs);
        router
            .add_route(Method::DELETE, "/api/v1/programs/{name}", handler_fn(move |_, res, params| {
                match store.remove(name_param(params)) {
                    Ok(()) => res.send_no_content(),
                    Err(e) => fail(res, &e),
                };
            }), self.guard())
            .await?;

        Ok(())
    }
}

fn name_param(params: &RouteMatch) -> &str {
    params.get("name").unwrap_or_default()
}

fn fail<'a>(res: &'a mut Response, err: &ProgramError) -> &'a mut Response {
    res.send_error(err.status(), err.code(), &err.to_string())
}

fn upload(events: &EventManager, req: &Request, res: &mut Response) {
    let Some(file) = &req.upload else {
        res.send_error(StatusCode::BadRequest, "NO_UPLOAD", "expected a multipart/form-data file upload");
        return;
    };

    events.post_event(Event::user(UPLOAD_STORED).with_payload(file.clone()));
    res.send_success(
        json!({ "file": file.filename, "path": file.path, "size": file.size }),
        "File uploaded successfully",
    );
}
