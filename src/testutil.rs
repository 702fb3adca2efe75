//! Test-only doubles: an HTTP stub backend and a scripted browser host.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::{ActionResult, BrowserAction, BrowserHost, PageContext, TabInfo};

/// Minimal one-thread HTTP server answering with canned JSON per request.
/// Records every (path, body) pair so tests can assert call counts and order.
pub(crate) struct StubServer {
    server: Arc<tiny_http::Server>,
    handle: Option<JoinHandle<()>>,
    requests: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl StubServer {
    pub(crate) fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &serde_json::Value) -> (u16, serde_json::Value) + Send + 'static,
    {
        let server = Arc::new(tiny_http::Server::http("127.0.0.1:0").unwrap());
        let requests: Arc<Mutex<Vec<(String, serde_json::Value)>>> =
            Arc::new(Mutex::new(Vec::new()));

        let loop_server = Arc::clone(&server);
        let loop_requests = Arc::clone(&requests);
        let handle = std::thread::spawn(move || {
            for mut request in loop_server.incoming_requests() {
                let mut raw = String::new();
                let _ = std::io::Read::read_to_string(request.as_reader(), &mut raw);
                let body: serde_json::Value =
                    serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null);
                let path = request.url().to_string();
                loop_requests
                    .lock()
                    .unwrap()
                    .push((path.clone(), body.clone()));

                let (status, payload) = handler(&path, &body);
                let response = tiny_http::Response::from_string(payload.to_string())
                    .with_status_code(status)
                    .with_header(
                        tiny_http::Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"application/json"[..],
                        )
                        .unwrap(),
                    );
                let _ = request.respond(response);
            }
        });

        Self {
            server,
            handle: Some(handle),
            requests,
        }
    }

    pub(crate) fn base_url(&self) -> String {
        let addr = self
            .server
            .server_addr()
            .to_ip()
            .expect("stub server bound to an IP address");
        format!("http://{addr}")
    }

    /// Snapshot of all requests received so far.
    pub(crate) fn requests(&self) -> Vec<(String, serde_json::Value)> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Browser host with a preconfigured tab and page context. Actions always
/// succeed; opened URLs are recorded for assertions.
#[derive(Default)]
pub(crate) struct ScriptedHost {
    pub(crate) tab: Option<TabInfo>,
    pub(crate) context: Option<PageContext>,
    pub(crate) opened: Mutex<Vec<String>>,
}

impl ScriptedHost {
    pub(crate) fn with_tab(url: &str, title: &str) -> Self {
        Self {
            tab: Some(TabInfo {
                id: Some(1),
                url: Some(url.to_string()),
                title: Some(title.to_string()),
            }),
            context: Some(PageContext {
                url: url.to_string(),
                title: title.to_string(),
                content: String::new(),
            }),
            opened: Mutex::new(Vec::new()),
        }
    }
}

impl BrowserHost for ScriptedHost {
    fn active_tab(&self) -> Result<Option<TabInfo>, String> {
        Ok(self.tab.clone())
    }

    fn extract_page_context(&self) -> Result<PageContext, String> {
        self.context
            .clone()
            .ok_or_else(|| "no active tab".to_string())
    }

    fn run_actions(&self, actions: &[BrowserAction]) -> Result<Vec<ActionResult>, String> {
        Ok(actions
            .iter()
            .map(|action| ActionResult {
                action: action.clone(),
                success: true,
                error: None,
            })
            .collect())
    }

    fn capture_screenshot(&self) -> Result<Option<String>, String> {
        Ok(None)
    }

    fn open_url(&self, url: &str) -> Result<(), String> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}
