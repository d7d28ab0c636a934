//! smart http carrier
//!
//! every action is its own request: the advertisement is a GET of
//! `info/refs?service=…`, the rest are POSTs whose body is whatever was
//! written before the first read. a 401 asks the credential callback again
//! until it gives up.

use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::error::{Error, Result};
use crate::transport::credential::{Credential, CredentialCallback, CredentialType};

use super::{Service, SmartStream, SmartSubtransport, SubtransportOptions};

#[derive(Default)]
struct Shared {
    client: Option<Client>,
    credentials: Option<CredentialCallback>,
    /// basic auth that last worked; reused by later requests
    auth: Option<(String, String)>,
}

pub struct HttpSubtransport {
    shared: Arc<Mutex<Shared>>,
    user_agent: String,
    connect_timeout: Duration,
    skip_certificate_check: bool,
}

impl Default for HttpSubtransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSubtransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            user_agent: crate::config::TransportConfig::default().user_agent,
            connect_timeout: Duration::from_secs(30),
            skip_certificate_check: false,
        }
    }

    fn ensure_client(&self) -> Result<()> {
        let mut shared = lock(&self.shared)?;
        if shared.client.is_none() {
            let client = Client::builder()
                .user_agent(self.user_agent.clone())
                .connect_timeout(self.connect_timeout)
                .danger_accept_invalid_certs(self.skip_certificate_check)
                .build()?;
            shared.client = Some(client);
        }
        Ok(())
    }
}

impl SmartSubtransport for HttpSubtransport {
    fn configure(&mut self, options: SubtransportOptions) {
        self.user_agent = options.user_agent;
        self.connect_timeout = options.connect_timeout;
        self.skip_certificate_check = options.flags.skip_certificate_check;
        match lock(&self.shared) {
            Ok(mut shared) => {
                shared.credentials = options.credentials;
                // settings changed, build the client again
                shared.client = None;
            }
            Err(e) => tracing::warn!(error = %e, "cannot configure http carrier"),
        }
    }

    fn action(&mut self, url: &str, service: Service) -> Result<Box<dyn SmartStream>> {
        self.ensure_client()?;
        let base = url.trim_end_matches('/');

        if service.is_ls() {
            let endpoint = format!("{}/info/refs?service={}", base, service.program());
            let body = send(&self.shared, url, &endpoint, service, |client| {
                client.get(&endpoint)
            })?;
            return Ok(Box::new(Cursor::new(body)));
        }

        Ok(Box::new(HttpStream {
            shared: self.shared.clone(),
            url: url.to_string(),
            endpoint: format!("{}/{}", base, service.program()),
            service,
            body: Vec::new(),
            response: None,
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_rpc(&self) -> bool {
        true
    }
}

/// one POST: buffered until the first read, then replayed from memory
struct HttpStream {
    shared: Arc<Mutex<Shared>>,
    /// the remote as connected, which credential prompts name
    url: String,
    endpoint: String,
    service: Service,
    body: Vec<u8>,
    response: Option<Cursor<Vec<u8>>>,
}

impl HttpStream {
    fn post(&mut self) -> Result<Vec<u8>> {
        let body = std::mem::take(&mut self.body);
        let program = self.service.program();
        send(&self.shared, &self.url, &self.endpoint, self.service, |client| {
            client
                .post(&self.endpoint)
                .header(CONTENT_TYPE, format!("application/x-{}-request", program))
                .header(ACCEPT, format!("application/x-{}-result", program))
                .body(body.clone())
        })
    }
}

impl Read for HttpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.response.is_none() {
            let answer = self.post().map_err(io::Error::other)?;
            self.response = Some(Cursor::new(answer));
        }
        match &mut self.response {
            Some(response) => response.read(buf),
            None => Ok(0),
        }
    }
}

impl Write for HttpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.response.is_some() {
            return Err(io::Error::other(Error::Protocol(
                "request already sent".to_string(),
            )));
        }
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn lock(shared: &Mutex<Shared>) -> Result<std::sync::MutexGuard<'_, Shared>> {
    shared
        .lock()
        .map_err(|_| Error::transport("http carrier state is poisoned"))
}

/// run a request against `endpoint` of remote `url`, asking for
/// credentials on every 401
fn send(
    shared: &Mutex<Shared>,
    url: &str,
    endpoint: &str,
    service: Service,
    request: impl Fn(&Client) -> RequestBuilder,
) -> Result<Vec<u8>> {
    let mut shared = lock(shared)?;
    let client = shared
        .client
        .clone()
        .ok_or_else(|| Error::transport("http carrier is not configured"))?;

    loop {
        let mut builder = request(&client);
        if let Some((user, password)) = &shared.auth {
            builder = builder.basic_auth(user, Some(password));
        }
        let response = builder.send()?;
        let status = response.status();
        tracing::debug!(endpoint, status = status.as_u16(), "http request");

        if status == StatusCode::UNAUTHORIZED {
            let auth = ask_credentials(&mut shared, url)?;
            shared.auth = Some(auth);
            continue;
        }
        if !status.is_success() {
            return Err(Error::transport(format!("{} returned {}", endpoint, status)));
        }

        let expected = if service.is_ls() {
            format!("application/x-{}-advertisement", service.program())
        } else {
            format!("application/x-{}-result", service.program())
        };
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if content_type != expected {
            return Err(Error::Unsupported(format!(
                "{} is not a smart http server (content type '{}')",
                endpoint, content_type
            )));
        }
        return Ok(response.bytes()?.to_vec());
    }
}

fn ask_credentials(shared: &mut Shared, url: &str) -> Result<(String, String)> {
    let allowed = CredentialType::USERPASS_PLAINTEXT;
    let username = reqwest::Url::parse(url)
        .ok()
        .map(|u| u.username().to_string())
        .filter(|u| !u.is_empty());
    let callback = shared
        .credentials
        .as_mut()
        .ok_or_else(|| Error::Auth(format!("{} requires credentials", url)))?;

    let credential = callback(url, username.as_deref(), allowed)?;
    if !allowed.contains(credential.kind()) {
        return Err(Error::Auth(format!(
            "{:?} credentials are not accepted over http",
            credential.kind()
        )));
    }
    match &credential {
        Credential::UserPassPlaintext { username, password } => {
            Ok((username.clone(), password.clone()))
        }
        other => Err(Error::Auth(format!("unexpected credential {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::Oid;
    use crate::transport::pkt;
    use crate::transport::{ConnectFlags, Direction, SmartTransport, Transport};
    use std::net::TcpListener;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct Reply {
        status: &'static str,
        content_type: &'static str,
        body: Vec<u8>,
    }

    fn unauthorized() -> Reply {
        Reply {
            status: "401 Unauthorized",
            content_type: "text/plain",
            body: Vec::new(),
        }
    }

    fn advertisement() -> Reply {
        let mut body = Vec::new();
        pkt::push_line(&mut body, "# service=git-upload-pack").unwrap();
        pkt::push_flush(&mut body);
        pkt::push_line(
            &mut body,
            &format!("{} refs/heads/main\0side-band-64k", Oid::from_slice(&[7; 20]).unwrap()),
        )
        .unwrap();
        pkt::push_flush(&mut body);
        Reply {
            status: "200 OK",
            content_type: "application/x-git-upload-pack-advertisement",
            body,
        }
    }

    /// answers one request per connection, returning the request heads
    fn serve(replies: Vec<Reply>) -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://127.0.0.1:{}/repo.git", listener.local_addr().unwrap().port());
        let handle = thread::spawn(move || {
            let mut heads = Vec::new();
            for reply in replies {
                let (mut conn, _) = listener.accept().unwrap();
                let mut request = Vec::new();
                let mut byte = [0u8; 1];
                while !request.ends_with(b"\r\n\r\n") {
                    if conn.read(&mut byte).unwrap() == 0 {
                        break;
                    }
                    request.push(byte[0]);
                }
                heads.push(String::from_utf8_lossy(&request).to_lowercase());

                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nWWW-Authenticate: Basic realm=\"git\"\r\nConnection: close\r\n\r\n",
                    reply.status,
                    reply.content_type,
                    reply.body.len()
                );
                conn.write_all(head.as_bytes()).unwrap();
                conn.write_all(&reply.body).unwrap();
            }
            heads
        });
        (url, handle)
    }

    #[test]
    fn test_401_asks_for_credentials_then_retries() {
        let (url, server) = serve(vec![unauthorized(), advertisement()]);
        let calls = Arc::new(AtomicUsize::new(0));
        let asked_for = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let asked = asked_for.clone();
        let callback: CredentialCallback = Box::new(move |remote, _user, allowed| {
            seen.fetch_add(1, Ordering::SeqCst);
            asked.lock().unwrap().push(remote.to_string());
            assert!(allowed.contains(CredentialType::USERPASS_PLAINTEXT));
            Ok(Credential::userpass("alice", "secret"))
        });

        let mut t = SmartTransport::new(Box::new(HttpSubtransport::new()));
        t.connect(&url, Some(callback), Direction::Fetch, ConnectFlags::default())
            .unwrap();
        assert_eq!(t.ls().unwrap().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // the prompt names the remote, not the endpoint being requested
        assert_eq!(*asked_for.lock().unwrap(), vec![url.clone()]);

        let heads = server.join().unwrap();
        assert!(heads[0].starts_with("get /repo.git/info/refs?service=git-upload-pack"));
        assert!(!heads[0].contains("authorization"));
        assert!(heads[1].contains("authorization: basic ywxpy2u6c2vjcmv0"));
    }

    #[test]
    fn test_callback_error_ends_the_loop() {
        let (url, server) = serve(vec![unauthorized(), unauthorized()]);
        let mut attempts = 0;
        let callback: CredentialCallback = Box::new(move |_, _, _| {
            attempts += 1;
            if attempts == 1 {
                Ok(Credential::userpass("alice", "wrong"))
            } else {
                Err(Error::Auth("giving up".into()))
            }
        });

        let mut t = SmartTransport::new(Box::new(HttpSubtransport::new()));
        let err = t
            .connect(&url, Some(callback), Direction::Fetch, ConnectFlags::default())
            .unwrap_err();
        assert!(matches!(err, Error::Auth(ref m) if m == "giving up"));
        assert!(!t.is_connected());
        assert_eq!(server.join().unwrap().len(), 2);
    }

    #[test]
    fn test_disallowed_credential_kind() {
        let (url, server) = serve(vec![unauthorized()]);
        let callback: CredentialCallback = Box::new(|_, _, _| {
            Ok(Credential::SshKey {
                username: "git".into(),
                public_key: None,
                private_key: PathBuf::from("/nonexistent/id_ed25519"),
                passphrase: None,
            })
        });

        let mut t = SmartTransport::new(Box::new(HttpSubtransport::new()));
        let err = t
            .connect(&url, Some(callback), Direction::Fetch, ConnectFlags::default())
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        server.join().unwrap();
    }

    #[test]
    fn test_no_callback_is_an_auth_error() {
        let (url, server) = serve(vec![unauthorized()]);
        let mut t = SmartTransport::new(Box::new(HttpSubtransport::new()));
        let err = t
            .connect(&url, None, Direction::Fetch, ConnectFlags::default())
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        server.join().unwrap();
    }

    #[test]
    fn test_dumb_server_is_unsupported() {
        let (url, server) = serve(vec![Reply {
            status: "200 OK",
            content_type: "text/plain",
            body: b"0123abcd refs/heads/main\n".to_vec(),
        }]);
        let mut t = SmartTransport::new(Box::new(HttpSubtransport::new()));
        let err = t
            .connect(&url, None, Direction::Fetch, ConnectFlags::default())
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        server.join().unwrap();
    }
}
