use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// Reviews per page served by the stub, kept small so pagination is exercised.
pub const PAGE_SIZE: usize = 2;

#[derive(Debug, Clone)]
pub enum StubApp {
    /// `data` object for appdetails plus `(playtime, text)` reviews.
    Listed {
        data: Value,
        reviews: Vec<(u64, String)>,
    },
    Unlisted,
    RateLimited,
}

pub struct SteamStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SteamStub {
    pub fn spawn(catalog: Vec<(u64, &str)>, apps: BTreeMap<u64, StubApp>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start steam stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let catalog = catalog
            .into_iter()
            .map(|(appid, name)| json!({ "appid": appid, "name": name }))
            .collect::<Vec<_>>();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let raw_url = request.url().to_string();
                seen.lock().expect("lock request log").push(raw_url.clone());

                let url = url::Url::parse(&format!("http://stub{raw_url}")).expect("parse url");
                let query = url
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect::<BTreeMap<_, _>>();

                let (status, body) = route(url.path(), &query, &catalog, &apps);
                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(body.to_string())
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn requests_matching(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .expect("lock request log")
            .iter()
            .filter(|url| url.contains(needle))
            .count()
    }
}

impl Drop for SteamStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn route(
    path: &str,
    query: &BTreeMap<String, String>,
    catalog: &[Value],
    apps: &BTreeMap<u64, StubApp>,
) -> (u16, Value) {
    if path == "/ISteamApps/GetAppList/v2/" {
        return (200, json!({ "applist": { "apps": catalog } }));
    }

    if path == "/api/appdetails" {
        let Some(app_id) = query.get("appids").and_then(|v| v.parse::<u64>().ok()) else {
            return (400, json!({ "error": "missing appids" }));
        };
        return match apps.get(&app_id) {
            Some(StubApp::Listed { data, .. }) => (
                200,
                json!({ app_id.to_string(): { "success": true, "data": data } }),
            ),
            Some(StubApp::RateLimited) => (429, Value::Null),
            Some(StubApp::Unlisted) | None => {
                (200, json!({ app_id.to_string(): { "success": false } }))
            }
        };
    }

    if let Some(app_id) = path
        .strip_prefix("/appreviews/")
        .and_then(|id| id.parse::<u64>().ok())
    {
        let reviews: &[(u64, String)] = match apps.get(&app_id) {
            Some(StubApp::Listed { reviews, .. }) => reviews.as_slice(),
            _ => &[],
        };
        let cursor = query.get("cursor").map(String::as_str).unwrap_or("*");
        let offset = if cursor == "*" {
            0
        } else {
            cursor
                .strip_prefix('c')
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(reviews.len())
        };
        let page = reviews
            .iter()
            .skip(offset)
            .take(PAGE_SIZE)
            .map(|(playtime, text)| {
                json!({
                    "recommendationid": "1",
                    "author": { "playtime_at_review": playtime },
                    "review": text,
                })
            })
            .collect::<Vec<_>>();

        let mut summary = json!({ "num_reviews": page.len() });
        if offset == 0 {
            summary["total_reviews"] = json!(reviews.len());
            summary["total_positive"] = json!(reviews.len());
            summary["total_negative"] = json!(0);
        }
        return (
            200,
            json!({
                "success": 1,
                "query_summary": summary,
                "reviews": page,
                "cursor": format!("c{}", offset + PAGE_SIZE),
            }),
        );
    }

    (404, json!({ "error": "not found" }))
}
