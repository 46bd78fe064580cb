//! Throwaway HTTP server for tests: canned routes on an ephemeral loopback port.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use napscrape_core::FetchConfig;
use tiny_http::{Header, Response, Server};

/// Fetch settings for tests: no politeness delay, 10 ms backoff base, no proxy.
pub fn fast_config(table_url: String) -> FetchConfig {
    FetchConfig {
        table_url,
        request_delay: Duration::ZERO,
        timeout: Duration::from_secs(5),
        base_backoff: Duration::from_millis(10),
        use_system_proxy: false,
        ..FetchConfig::default()
    }
}

/// What the server answers on one path.
#[derive(Clone)]
pub enum Route {
    Body {
        status: u16,
        content_type: &'static str,
        body: Vec<u8>,
    },
    /// Answer with `status` for the first `failures` hits, then with `then`.
    FailFirst {
        failures: usize,
        status: u16,
        then: Box<Route>,
    },
}

impl Route {
    pub fn html(body: &str) -> Self {
        Self::Body {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn pdf(body: Vec<u8>) -> Self {
        Self::Body {
            status: 200,
            content_type: "application/pdf",
            body,
        }
    }

    pub fn status(status: u16) -> Self {
        Self::Body {
            status,
            content_type: "text/plain",
            body: b"error".to_vec(),
        }
    }

    pub fn fail_first(failures: usize, status: u16, then: Route) -> Self {
        Self::FailFirst {
            failures,
            status,
            then: Box::new(then),
        }
    }

    fn respond(&self, hit: usize) -> (u16, &'static str, Vec<u8>) {
        match self {
            Self::Body {
                status,
                content_type,
                body,
            } => (*status, *content_type, body.clone()),
            Self::FailFirst {
                failures,
                status,
                then,
            } => {
                if hit <= *failures {
                    (*status, "text/plain", b"error".to_vec())
                } else {
                    then.respond(hit - failures)
                }
            }
        }
    }
}

/// Local server answering canned routes and counting hits per path.
///
/// Unknown paths get a 404. The server stops when dropped.
pub struct TestServer {
    server: Arc<Server>,
    base: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl TestServer {
    pub fn start(routes: Vec<(&str, Route)>) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind test server"));
        let port = server
            .server_addr()
            .to_ip()
            .expect("test server has an IP address")
            .port();
        let routes: HashMap<String, Route> = routes
            .into_iter()
            .map(|(path, route)| (path.to_string(), route))
            .collect();
        let hits = Arc::new(Mutex::new(HashMap::new()));

        let worker = Arc::clone(&server);
        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for request in worker.incoming_requests() {
                let path = request.url().split('?').next().unwrap_or("").to_string();
                let hit = {
                    let mut hits = counter.lock().expect("hit counter poisoned");
                    let n = hits.entry(path.clone()).or_insert(0);
                    *n += 1;
                    *n
                };
                let (status, content_type, body) = match routes.get(&path) {
                    Some(route) => route.respond(hit),
                    None => (404, "text/plain", b"not found".to_vec()),
                };
                let header = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                    .expect("valid header");
                let response = Response::from_data(body)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            server,
            base: format!("http://127.0.0.1:{port}"),
            hits,
        }
    }

    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits
            .lock()
            .expect("hit counter poisoned")
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().expect("hit counter poisoned").values().sum()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
