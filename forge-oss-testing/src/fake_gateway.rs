//! An in-process stand-in for the authentication service, the storage gateway's signed upload
//! endpoint, and the storage that signed URLs point to.
//!
//! It speaks the same HTTP contract as the real services, so the library under test is exercised
//! all the way down through its `reqwest` transport.  Responses for any route can be scripted to
//! fail, and every request is recorded so tests can assert on exactly what was sent.
use crate::Result;
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// Most parts the real gateway hands out signed URLs for in one request
const MAX_PARTS_PER_REQUEST: u32 = 25;

/// The endpoints the fake serves
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    /// `POST /authentication/v2/token`
    Token,

    /// `GET .../signeds3upload`
    SignedUrls,

    /// `PUT` of a part to a signed URL
    UploadPart,

    /// `POST .../signeds3upload`
    CompleteUpload,
}

/// A request the fake received
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub route: Route,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    /// The value of a query string parameter
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;

        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// An object assembled by a successful complete upload call
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub bucket_key: String,
    pub object_key: String,
    pub upload_key: String,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct Session {
    bucket_key: String,
    object_key: String,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Debug, Default)]
struct GatewayState {
    base_url: Option<Url>,
    next_session: u32,
    next_token: u32,
    sessions: HashMap<String, Session>,
    objects: Vec<StoredObject>,
    failures: HashMap<Route, VecDeque<(StatusCode, String)>>,
    requests: Vec<RecordedRequest>,
}

impl GatewayState {
    fn record(&mut self, route: Route, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) {
        self.requests.push(RecordedRequest {
            route,
            method,
            uri,
            headers,
            body,
        });
    }

    fn take_failure(&mut self, route: Route) -> Option<Response> {
        let (status, body) = self.failures.get_mut(&route)?.pop_front()?;
        debug!(?route, %status, "Returning scripted failure");

        Some((status, body).into_response())
    }
}

type SharedState = Arc<Mutex<GatewayState>>;

/// A running fake gateway.  The server is stopped when this is dropped.
#[derive(Debug)]
pub struct FakeGateway {
    addr: SocketAddr,
    state: SharedState,
    server: JoinHandle<()>,
}

impl FakeGateway {
    /// Start the fake on a random port on the loopback interface.
    ///
    /// Must be called from within a tokio runtime, which the server task is spawned on.
    pub async fn start() -> Result<Self> {
        let state = SharedState::default();

        let app = Router::new()
            .route("/authentication/v2/token", post(token))
            .route(
                "/oss/v2/buckets/{bucket_key}/objects/{object_key}/signeds3upload",
                get(signed_urls).post(complete_upload),
            )
            .route("/storage/{upload_key}/{part_number}", put(upload_part))
            // Parts can be much bigger than axum's default limit
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        state.lock().unwrap().base_url = Some(format!("http://{addr}/").parse()?);

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(err = ?e, "Fake gateway server failed");
            }
        });

        debug!(%addr, "Fake gateway listening");

        Ok(Self {
            addr,
            state,
            server,
        })
    }

    /// The base URL to point an authenticator at
    pub fn base_url(&self) -> Url {
        format!("http://{}/", self.addr)
            .parse()
            .expect("BUG: socket address is a valid URL host")
    }

    /// Make the next request to `route` fail with `status` and `body`.
    ///
    /// Failures queue up; each request to the route consumes one until there are none left.
    pub fn fail_next(&self, route: Route, status: StatusCode, body: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(route)
            .or_default()
            .push_back((status, body.into()));
    }

    /// Make the next `count` requests to `route` fail with `status`
    pub fn fail_times(&self, route: Route, count: usize, status: StatusCode) {
        for _ in 0..count {
            self.fail_next(route, status, format!("scripted failure {status}"));
        }
    }

    /// All requests received so far, in order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Requests received so far for one route, in order
    pub fn requests_for(&self, route: Route) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.route == route)
            .collect()
    }

    /// The most recently completed object with this bucket and key, if any
    pub fn object(&self, bucket_key: &str, object_key: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .rev()
            .find(|object| object.bucket_key == bucket_key && object.object_key == object_key)
            .cloned()
    }

    /// Number of upload sessions that were started
    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn has_bearer_token(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("Bearer ") && value.len() > "Bearer ".len())
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "reason": message.into() }))).into_response()
}

async fn token(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    state.record(Route::Token, method, uri, headers.clone(), body.clone());

    if let Some(response) = state.take_failure(Route::Token) {
        return response;
    }

    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("Basic "));
    if !basic {
        return error(StatusCode::UNAUTHORIZED, "client credentials required");
    }

    let form = url::form_urlencoded::parse(&body)
        .into_owned()
        .collect::<HashMap<String, String>>();
    if form.get("grant_type").map(String::as_str) != Some("client_credentials") {
        return error(StatusCode::BAD_REQUEST, "unsupported grant_type");
    }

    state.next_token += 1;

    Json(json!({
        "access_token": format!("fake-token-{}", state.next_token),
        "token_type": "Bearer",
        "expires_in": 3599,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUrlQuery {
    first_part: u32,
    parts: u32,
    minutes_expiration: Option<u32>,
    upload_key: Option<String>,
}

async fn signed_urls(
    State(state): State<SharedState>,
    Path((bucket_key, object_key)): Path<(String, String)>,
    Query(query): Query<SignedUrlQuery>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let mut state = state.lock().unwrap();
    state.record(Route::SignedUrls, method, uri, headers.clone(), Bytes::new());

    if let Some(response) = state.take_failure(Route::SignedUrls) {
        return response;
    }

    if !has_bearer_token(&headers) {
        return error(StatusCode::UNAUTHORIZED, "bearer token required");
    }
    if query.first_part == 0 || query.parts == 0 || query.parts > MAX_PARTS_PER_REQUEST {
        return error(StatusCode::BAD_REQUEST, "invalid part range");
    }
    if !(1..=60).contains(&query.minutes_expiration.unwrap_or(2)) {
        return error(StatusCode::BAD_REQUEST, "invalid minutesExpiration");
    }

    let upload_key = match query.upload_key {
        Some(upload_key) => match state.sessions.get(&upload_key) {
            Some(session)
                if session.bucket_key == bucket_key && session.object_key == object_key =>
            {
                upload_key
            }
            _ => return error(StatusCode::NOT_FOUND, "unknown uploadKey"),
        },
        None => {
            state.next_session += 1;
            let upload_key = format!("upload-{}", state.next_session);
            state.sessions.insert(
                upload_key.clone(),
                Session {
                    bucket_key,
                    object_key,
                    parts: BTreeMap::new(),
                },
            );
            upload_key
        }
    };

    let base_url = state
        .base_url
        .clone()
        .expect("BUG: base URL is set before the server starts");
    let urls = (query.first_part..query.first_part + query.parts)
        .map(|part_number| {
            let mut url = base_url.clone();
            url.set_path(&format!("storage/{upload_key}/{part_number}"));
            url.set_query(Some("X-Amz-Signature=fake"));
            url.to_string()
        })
        .collect::<Vec<_>>();

    Json(json!({
        "uploadKey": upload_key,
        "uploadExpiration": "2099-01-01T00:00:00Z",
        "urlExpiration": "2099-01-01T00:00:00Z",
        "urls": urls,
    }))
    .into_response()
}

async fn upload_part(
    State(state): State<SharedState>,
    Path((upload_key, part_number)): Path<(String, u32)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    state.record(Route::UploadPart, method, uri, headers, body.clone());

    if let Some(response) = state.take_failure(Route::UploadPart) {
        return response;
    }

    match state.sessions.get_mut(&upload_key) {
        Some(session) => {
            session.parts.insert(part_number, body);
            StatusCode::OK.into_response()
        }
        None => error(StatusCode::NOT_FOUND, "unknown upload"),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteUploadBody {
    upload_key: String,
    size: u64,
}

async fn complete_upload(
    State(state): State<SharedState>,
    Path((bucket_key, object_key)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    state.record(
        Route::CompleteUpload,
        method,
        uri,
        headers.clone(),
        body.clone(),
    );

    if let Some(response) = state.take_failure(Route::CompleteUpload) {
        return response;
    }

    if !has_bearer_token(&headers) {
        return error(StatusCode::UNAUTHORIZED, "bearer token required");
    }

    let request: CompleteUploadBody = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let Some(session) = state.sessions.get(&request.upload_key) else {
        return error(StatusCode::NOT_FOUND, "unknown uploadKey");
    };
    if session.bucket_key != bucket_key || session.object_key != object_key {
        return error(StatusCode::BAD_REQUEST, "uploadKey belongs to another object");
    }

    // Parts must be contiguous from 1
    if let Some((index, (part_number, _))) = session
        .parts
        .iter()
        .enumerate()
        .find(|(index, (part_number, _))| **part_number != *index as u32 + 1)
    {
        return error(
            StatusCode::BAD_REQUEST,
            format!("part {} missing, found part {part_number}", index + 1),
        );
    }

    let data = session
        .parts
        .values()
        .flat_map(|part| part.iter().copied())
        .collect::<Vec<u8>>();
    if data.len() as u64 != request.size {
        return error(
            StatusCode::BAD_REQUEST,
            format!(
                "size {} does not match the {} bytes uploaded",
                request.size,
                data.len()
            ),
        );
    }

    let size = data.len();
    let content_type = headers
        .get("x-ads-meta-content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let location = state
        .base_url
        .as_ref()
        .map(|base| format!("{base}oss/v2/buckets/{bucket_key}/objects/{object_key}"));

    state.objects.push(StoredObject {
        bucket_key: bucket_key.clone(),
        object_key: object_key.clone(),
        upload_key: request.upload_key,
        data,
    });

    Json(json!({
        "bucketKey": bucket_key,
        "objectId": format!("urn:adsk.objects:os.object:{bucket_key}/{object_key}"),
        "objectKey": object_key,
        "size": size,
        "contentType": content_type,
        "location": location,
    }))
    .into_response()
}
