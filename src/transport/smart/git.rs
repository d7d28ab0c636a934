//! `git://` carrier: one tcp connection per conversation, port 9418

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{pkt, CancelHandle};

use super::{Service, SmartStream, SmartSubtransport, SubtransportOptions};

pub const DEFAULT_PORT: u16 = 9418;

/// how long a read blocks before looking at the cancel flag again
const CANCEL_POLL: Duration = Duration::from_millis(100);

pub struct GitSubtransport {
    conn: Option<TcpStream>,
    connect_timeout: Duration,
    cancel: CancelHandle,
}

impl Default for GitSubtransport {
    fn default() -> Self {
        Self::new()
    }
}

impl GitSubtransport {
    pub fn new() -> Self {
        Self {
            conn: None,
            connect_timeout: Duration::from_secs(30),
            cancel: CancelHandle::default(),
        }
    }

    fn open(&mut self, url: &str, service: Service) -> Result<TcpStream> {
        let target = GitUrl::parse(url)?;
        let addrs = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| Error::transport(format!("resolve {}: {}", target.host, e)))?;

        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let mut stream = stream.ok_or_else(|| {
            Error::transport(match last_err {
                Some(e) => format!("connect {}: {}", target.authority(), e),
                None => format!("no address for {}", target.host),
            })
        })?;
        stream
            .set_read_timeout(Some(CANCEL_POLL))
            .map_err(|e| Error::transport(format!("set read timeout: {}", e)))?;

        let request = format!(
            "{} {}\0host={}\0",
            service.program(),
            target.path,
            target.authority()
        );
        pkt::write_pkt(&mut stream, request.as_bytes())?;
        tracing::debug!(host = %target.authority(), path = %target.path, service = service.program(), "git connection opened");
        Ok(stream)
    }
}

impl SmartSubtransport for GitSubtransport {
    fn configure(&mut self, options: SubtransportOptions) {
        self.connect_timeout = options.connect_timeout;
        self.cancel = options.cancel;
    }

    /// every action is a new conversation, opened by the server's advertisement
    fn action(&mut self, url: &str, service: Service) -> Result<Box<dyn SmartStream>> {
        let stream = self.open(url, service)?;
        let handle = stream
            .try_clone()
            .map_err(|e| Error::transport(format!("clone connection: {}", e)))?;
        self.conn = Some(stream);
        Ok(Box::new(GitStream {
            conn: handle,
            cancel: self.cancel.clone(),
        }))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            // a flush ends the conversation cleanly if the server still listens
            if conn.write_all(pkt::FLUSH).is_err() {
                tracing::trace!("server already hung up");
            }
            if let Err(e) = conn.shutdown(Shutdown::Both) {
                tracing::trace!(error = %e, "shutdown after close");
            }
        }
        Ok(())
    }

    fn is_rpc(&self) -> bool {
        false
    }
}

/// a connection whose reads wake up periodically to honour cancellation
struct GitStream {
    conn: TcpStream,
    cancel: CancelHandle,
}

impl Read for GitStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.conn.read(buf) {
                Err(e) if timed_out(&e) => {
                    if self.cancel.is_cancelled() {
                        return Err(io::Error::other(Error::Cancelled));
                    }
                }
                other => return other,
            }
        }
    }
}

fn timed_out(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

impl Write for GitStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.conn.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.conn.flush()
    }
}

#[derive(Debug, PartialEq, Eq)]
struct GitUrl {
    host: String,
    port: u16,
    path: String,
}

impl GitUrl {
    fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("git://")
            .ok_or_else(|| Error::Unsupported(format!("not a git:// url: {}", url)))?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !port.contains(']') => {
                let port = port
                    .parse()
                    .map_err(|_| Error::transport(format!("bad port in {}", url)))?;
                (host, port)
            }
            _ => (authority, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(Error::transport(format!("no host in {}", url)));
        }
        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// `host` or `host:port` as sent in the request line
    fn authority(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{collect_reachable, object_exists, write_blob, write_commit, write_tree};
    use crate::oid::Oid;
    use crate::refs;
    use crate::repo::Repo;
    use crate::transport::pack::build_pack;
    use crate::transport::pkt::{Pkt, PktReader};
    use crate::transport::{ConnectFlags, Direction, SmartTransport, Transport};
    use crate::types::{Commit, FileMode, Signature, TreeEntry};
    use std::net::TcpListener;
    use std::ops::ControlFlow;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_parse_url() {
        let url = GitUrl::parse("git://example.com/org/repo.git").unwrap();
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, DEFAULT_PORT);
        assert_eq!(url.path, "/org/repo.git");
        assert_eq!(url.authority(), "example.com");

        let url = GitUrl::parse("git://127.0.0.1:9000/r").unwrap();
        assert_eq!(url.port, 9000);
        assert_eq!(url.authority(), "127.0.0.1:9000");

        assert!(GitUrl::parse("http://example.com/r").is_err());
        assert!(GitUrl::parse("git://:9000/r").is_err());
    }

    fn commit_in(repo: &Repo) -> Oid {
        let blob = write_blob(repo, b"served over git://").unwrap();
        let tree = write_tree(repo, &[TreeEntry::new("README", blob, FileMode::Blob)]).unwrap();
        let sig = Signature::with_time("Srv", "srv@example.com", 1_700_000_000, 0);
        let commit = write_commit(repo, &Commit::new(tree, vec![], sig, "init\n")).unwrap();
        refs::update_head(repo, &commit).unwrap();
        commit
    }

    /// a one-shot upload-pack daemon; returns the request line it saw
    fn serve_once(listener: TcpListener, head: Oid, pack: Vec<u8>) -> thread::JoinHandle<String> {
        thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut reader = PktReader::new(conn.try_clone().unwrap());
            let request = match reader.read_pkt().unwrap() {
                Pkt::Data(d) => String::from_utf8(d).unwrap(),
                Pkt::Flush => panic!("flush instead of request"),
            };

            let mut adv = Vec::new();
            pkt::push_line(
                &mut adv,
                &format!("{} HEAD\0side-band-64k ofs-delta symref=HEAD:refs/heads/main", head),
            )
            .unwrap();
            pkt::push_line(&mut adv, &format!("{} refs/heads/main", head)).unwrap();
            pkt::push_flush(&mut adv);
            conn.write_all(&adv).unwrap();

            // wants, flush, haves, done
            loop {
                match reader.read_line().unwrap() {
                    Some(line) if line == b"done" => break,
                    _ => continue,
                }
            }

            let mut reply = Vec::new();
            pkt::push_line(&mut reply, "NAK").unwrap();
            let mut progress = vec![2u8];
            progress.extend_from_slice(b"Enumerating objects: 3\n");
            reply.extend(pkt::encode(&progress).unwrap());
            for chunk in pack.chunks(1000) {
                let mut band = vec![1u8];
                band.extend_from_slice(chunk);
                reply.extend(pkt::encode(&band).unwrap());
            }
            pkt::push_flush(&mut reply);
            conn.write_all(&reply).unwrap();
            request
        })
    }

    #[test]
    fn test_fetch_over_loopback() {
        let dir = tempfile::tempdir().unwrap();
        let server_repo = Repo::init(&dir.path().join("server")).unwrap();
        let local = Repo::init(&dir.path().join("local")).unwrap();
        let head = commit_in(&server_repo);
        let objects = collect_reachable(&server_repo, &[head], &[]).unwrap();
        let pack = build_pack(&server_repo, &objects).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = serve_once(listener, head, pack);

        let url = format!("git://127.0.0.1:{}/repo.git", port);
        let mut t = SmartTransport::new(Box::new(GitSubtransport::new()));
        t.connect(&url, None, Direction::Fetch, ConnectFlags::default())
            .unwrap();
        let heads = t.ls().unwrap().to_vec();
        assert_eq!(heads.len(), 2);
        assert_eq!(heads[0].symref_target.as_deref(), Some("refs/heads/main"));

        t.negotiate_fetch(&local, &heads).unwrap();
        let mut seen = 0;
        let stats = t
            .download_pack(&local, &mut |p| {
                seen = p.received_objects;
                ControlFlow::Continue(())
            })
            .unwrap();
        t.close().unwrap();

        assert_eq!(stats.total_objects, 3);
        assert_eq!(seen, 3);
        assert!(object_exists(&local, &head));
        assert_eq!(
            server.join().unwrap(),
            format!("git-upload-pack /repo.git\0host=127.0.0.1:{}\0", port)
        );
    }

    #[test]
    fn test_cancel_interrupts_stalled_download() {
        let dir = tempfile::tempdir().unwrap();
        let server_repo = Repo::init(&dir.path().join("server")).unwrap();
        let local = Repo::init(&dir.path().join("local")).unwrap();
        let head = commit_in(&server_repo);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (release, stalled) = mpsc::channel::<()>();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut reader = PktReader::new(conn.try_clone().unwrap());
            reader.read_pkt().unwrap();

            let mut adv = Vec::new();
            pkt::push_line(&mut adv, &format!("{} HEAD\0side-band-64k", head)).unwrap();
            pkt::push_flush(&mut adv);
            conn.write_all(&adv).unwrap();
            loop {
                match reader.read_line().unwrap() {
                    Some(line) if line == b"done" => break,
                    _ => continue,
                }
            }

            // acknowledge, then go quiet mid-pack until the client is done
            let mut reply = Vec::new();
            pkt::push_line(&mut reply, "NAK").unwrap();
            reply.extend(pkt::encode(b"\x01PACK").unwrap());
            conn.write_all(&reply).unwrap();
            stalled.recv().ok();
        });

        let url = format!("git://127.0.0.1:{}/repo.git", port);
        let mut t = SmartTransport::new(Box::new(GitSubtransport::new()));
        t.connect(&url, None, Direction::Fetch, ConnectFlags::default())
            .unwrap();
        let heads = t.ls().unwrap().to_vec();
        t.negotiate_fetch(&local, &heads).unwrap();

        let cancel = t.cancel_handle();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            cancel.cancel();
        });
        let started = Instant::now();
        let err = t
            .download_pack(&local, &mut |_| ControlFlow::Continue(()))
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));

        canceller.join().unwrap();
        t.close().unwrap();
        release.send(()).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut sub = GitSubtransport::new();
        let err = sub
            .action(&format!("git://127.0.0.1:{}/r", port), Service::UploadPackLs)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Transport { .. }));
        sub.close().unwrap();
    }
}
