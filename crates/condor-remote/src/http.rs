use crate::{RemoteConfig, RemoteError, RemoteResponse, Session};
use std::time::Duration;

/// [`Session`] over a shared `ureq` agent.
pub struct HttpSession {
    config: RemoteConfig,
    agent: ureq::Agent,
}

impl HttpSession {
    pub fn new(config: RemoteConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();
        Self { config, agent }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }
}

impl Session for HttpSession {
    fn get(&self, url: &str) -> Result<RemoteResponse, RemoteError> {
        tracing::debug!("GET {url}");
        let mut req = self
            .agent
            .get(url)
            .header("User-Agent", &self.config.user_agent);
        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }

        match req.call() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let content_type = resp
                    .headers()
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                Ok(RemoteResponse {
                    status,
                    content_type,
                    body: Box::new(resp.into_body().into_reader()),
                })
            }
            Err(ureq::Error::StatusCode(code)) => {
                tracing::debug!("GET {url}: HTTP {code}");
                Ok(RemoteResponse::empty(code))
            }
            Err(e) => Err(RemoteError::Unavailable {
                url: url.to_owned(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    /// A captured HTTP request for header inspection.
    #[derive(Debug, Clone)]
    struct CapturedRequest {
        path: String,
        headers: HashMap<String, String>,
    }

    /// Serves a fixed path → body table; everything else is 404.
    struct MockServer {
        addr: String,
        _handle: std::thread::JoinHandle<()>,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    impl MockServer {
        fn start(files: &[(&str, &[u8])]) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://{}", listener.local_addr().unwrap());
            let files: Arc<HashMap<String, Vec<u8>>> = Arc::new(
                files
                    .iter()
                    .map(|(p, b)| ((*p).to_owned(), b.to_vec()))
                    .collect(),
            );
            let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));

            let requests_clone = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let files = Arc::clone(&files);
                    let reqs = Arc::clone(&requests_clone);

                    std::thread::spawn(move || {
                        let mut reader = BufReader::new(stream.try_clone().unwrap());
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).is_err() {
                            return;
                        }
                        let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                        if parts.len() < 2 {
                            return;
                        }
                        let path = parts[1].to_owned();

                        let mut headers = HashMap::new();
                        loop {
                            let mut line = String::new();
                            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                                break;
                            }
                            if let Some((k, v)) = line.trim().split_once(": ") {
                                headers.insert(k.to_lowercase(), v.to_owned());
                            }
                        }
                        reqs.lock().unwrap().push(CapturedRequest {
                            path: path.clone(),
                            headers,
                        });

                        let response = match files.get(&path) {
                            Some(body) => {
                                let mut r = format!(
                                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                                    body.len()
                                )
                                .into_bytes();
                                r.extend_from_slice(body);
                                r
                            }
                            None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                                .to_vec(),
                        };
                        let _ = stream.write_all(&response);
                        let _ = stream.flush();
                    });
                }
            });

            MockServer {
                addr,
                _handle: handle,
                requests,
            }
        }

        fn captured_requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn test_session() -> HttpSession {
        HttpSession::new(RemoteConfig::default().with_timeout(5))
    }

    #[test]
    fn get_returns_body_and_content_type() {
        let server = MockServer::start(&[("/channeldata.json", br#"{"subdirs": []}"#)]);
        let resp = test_session()
            .get(&format!("{}/channeldata.json", server.addr))
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type.as_deref(), Some("application/json"));
        assert_eq!(resp.into_bytes().unwrap(), br#"{"subdirs": []}"#);
    }

    #[test]
    fn error_status_is_a_response_not_an_error() {
        let server = MockServer::start(&[]);
        let resp = test_session()
            .get(&format!("{}/missing.json", server.addr))
            .unwrap();
        assert_eq!(resp.status, 404);
        assert!(!resp.is_success());
    }

    #[test]
    fn connection_refused_is_unavailable() {
        let result = test_session().get("http://127.0.0.1:1/channeldata.json");
        match result {
            Err(RemoteError::Unavailable { url, .. }) => {
                assert!(url.contains("127.0.0.1:1"));
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn user_agent_is_sent() {
        let server = MockServer::start(&[("/a", b"a")]);
        test_session().get(&format!("{}/a", server.addr)).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));

        let reqs = server.captured_requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].path, "/a");
        assert!(reqs[0]
            .headers
            .get("user-agent")
            .is_some_and(|ua| ua.starts_with("condor/")));
        assert!(!reqs[0].headers.contains_key("authorization"));
    }

    #[test]
    fn auth_token_sent_as_bearer_header() {
        let server = MockServer::start(&[("/a", b"a")]);
        let session = HttpSession::new(RemoteConfig::default().with_token("secret-token-42"));
        session.get(&format!("{}/a", server.addr)).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));

        let reqs = server.captured_requests();
        assert_eq!(
            reqs[0].headers.get("authorization"),
            Some(&"Bearer secret-token-42".to_owned())
        );
    }

    #[test]
    fn large_body_streams_completely() {
        let large: Vec<u8> = (0..1_000_000).map(|i| (i % 251) as u8).collect();
        let server = MockServer::start(&[("/big.tar.bz2", &large)]);
        let mut resp = test_session()
            .get(&format!("{}/big.tar.bz2", server.addr))
            .unwrap();
        let mut body = Vec::new();
        resp.body.read_to_end(&mut body).unwrap();
        assert_eq!(body, large);
    }
}
