//! RabbitMQ management API client.
//!
//! Depth and consumer counts come from `GET /api/queues/{vhost}/{queue}`. Connecting checks
//! that the vhost exists; after that every query is a single stateless HTTP request, so a
//! "connection" is just a configured client the pool can drop and recreate at will.
use std::sync::Arc;

use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder, Response},
};
use serde::Deserialize;
use tracing::{debug, trace};

use hive_core::{Broker, BrokerError, BrokerSettings, QueueProbe};

use crate::url::{encode_segment, normalize_base_url};

/// Fields of a queue object the supervisor cares about.
///
/// RabbitMQ omits message statistics for a queue that has never seen traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct QueueInfo {
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub consumers: u64,
}

#[derive(Clone)]
struct ManagementHttp {
    client: Client,
    base_url: Arc<str>,
    vhost: Arc<str>,
    user: Arc<str>,
    pass: Arc<str>,
}

impl ManagementHttp {
    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}/api/{path}", self.base_url))
            .basic_auth(&*self.user, Some(&*self.pass))
    }

    fn send(&self, req: RequestBuilder, what: impl FnOnce() -> String) -> Result<Response, BrokerError> {
        let resp = req.send().map_err(transport_error)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        Err(match status {
            StatusCode::NOT_FOUND => BrokerError::NotFound(what()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                BrokerError::Protocol(format!("access denied ({status})"))
            }
            s if s.is_server_error() => {
                BrokerError::ChannelClosed(format!("management api returned {s}"))
            }
            s => BrokerError::Protocol(format!("unexpected status {s}")),
        })
    }

    fn check_vhost(&self) -> Result<(), BrokerError> {
        let path = format!("vhosts/{}", encode_segment(&self.vhost));
        self.send(self.get(&path), || format!("vhost {}", self.vhost))?;
        Ok(())
    }

    fn queue(&self, queue: &str) -> Result<QueueInfo, BrokerError> {
        let path = format!(
            "queues/{}/{}",
            encode_segment(&self.vhost),
            encode_segment(queue)
        );
        let resp = self.send(self.get(&path), || format!("queue {queue}"))?;
        let info: QueueInfo = resp.json().map_err(transport_error)?;
        trace!(target: "hive.broker", queue, messages = info.messages, consumers = info.consumers, "queue info");
        Ok(info)
    }
}

fn transport_error(e: reqwest::Error) -> BrokerError {
    if e.is_timeout() {
        BrokerError::Timeout
    } else if e.is_decode() {
        BrokerError::Protocol(e.to_string())
    } else {
        BrokerError::ChannelClosed(e.to_string())
    }
}

/// [`Broker`] talking to the management plugin over blocking HTTP.
#[derive(Clone)]
pub struct ManagementBroker {
    http: ManagementHttp,
}

impl ManagementBroker {
    pub fn new(settings: &BrokerSettings) -> Result<Self, BrokerError> {
        let timeout = settings
            .timeout()
            .map_err(|e| BrokerError::Protocol(format!("broker settings: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::Protocol(format!("http client: {e}")))?;
        Ok(Self::with_client(settings, client))
    }

    /// Use a preconfigured client; its own timeout applies.
    pub fn with_client(settings: &BrokerSettings, client: Client) -> Self {
        Self {
            http: ManagementHttp {
                client,
                base_url: normalize_base_url(&settings.url).into(),
                vhost: settings.vhost.as_str().into(),
                user: settings.username.as_str().into(),
                pass: settings.password.as_str().into(),
            },
        }
    }

    pub fn base_url(&self) -> &str {
        &self.http.base_url
    }

    pub fn vhost(&self) -> &str {
        &self.http.vhost
    }

    /// Full queue info in one request.
    pub fn queue_info(&self, queue: &str) -> Result<QueueInfo, BrokerError> {
        self.http.queue(queue)
    }
}

impl Broker for ManagementBroker {
    fn connect(&self) -> Result<Box<dyn QueueProbe>, BrokerError> {
        self.http.check_vhost()?;
        debug!(target: "hive.broker", url = %self.http.base_url, vhost = %self.http.vhost, "management api reachable");
        Ok(Box::new(ManagementProbe {
            http: self.http.clone(),
        }))
    }
}

struct ManagementProbe {
    http: ManagementHttp,
}

impl QueueProbe for ManagementProbe {
    fn current_depth(&mut self, queue: &str) -> Result<u64, BrokerError> {
        Ok(self.http.queue(queue)?.messages)
    }

    fn consumer_count(&mut self, queue: &str) -> Result<u64, BrokerError> {
        Ok(self.http.queue(queue)?.consumers)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::{TcpListener, TcpStream},
        sync::mpsc,
        thread,
        time::Duration,
    };

    use super::*;

    fn read_head(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            match stream.read(&mut byte) {
                Ok(1) => buf.push(byte[0]),
                _ => break,
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Answers one request per canned response, closing each connection; yields request heads.
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let head = read_head(&mut stream);
                let _ = tx.send(head);
                let reason = match status {
                    200 => "OK",
                    404 => "Not Found",
                    401 => "Unauthorized",
                    _ => "Error",
                };
                write!(
                    stream,
                    "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                )
                .unwrap();
            }
        });
        (url, rx)
    }

    fn broker(url: &str, timeout: Duration) -> ManagementBroker {
        let settings = BrokerSettings {
            url: url.to_string(),
            ..BrokerSettings::default()
        };
        let client = Client::builder().timeout(timeout).no_proxy().build().unwrap();
        ManagementBroker::with_client(&settings, client)
    }

    #[test]
    fn probe_reports_depth_and_consumers() {
        let (url, requests) = serve(vec![
            (200, r#"{"name":"/"}"#),
            (200, r#"{"name":"images","messages":12,"consumers":2,"state":"running"}"#),
            (200, r#"{"name":"images","messages":12,"consumers":2}"#),
        ]);
        let broker = broker(&url, Duration::from_secs(2));
        assert_eq!(broker.base_url(), url.trim_end_matches('/'));

        let mut probe = broker.connect().unwrap();
        assert_eq!(probe.current_depth("images").unwrap(), 12);
        assert_eq!(probe.consumer_count("images").unwrap(), 2);

        let heads: Vec<String> = requests.iter().take(3).collect();
        assert!(heads[0].starts_with("GET /api/vhosts/%2F HTTP/1.1"));
        assert!(heads[1].starts_with("GET /api/queues/%2F/images HTTP/1.1"));
        assert!(heads[1]
            .to_ascii_lowercase()
            .contains("authorization: basic z3vlc3q6z3vlc3q="));
    }

    #[test]
    fn fresh_queue_without_stats_reads_as_empty() {
        let (url, _requests) = serve(vec![(200, r#"{"name":"images"}"#)]);
        let info = broker(&url, Duration::from_secs(2)).queue_info("images").unwrap();
        assert_eq!(info, QueueInfo::default());
    }

    #[test]
    fn missing_queue_and_vhost_are_not_found() {
        let (url, _requests) = serve(vec![(404, r#"{"error":"Object Not Found"}"#)]);
        let err = broker(&url, Duration::from_secs(2)).connect().err().unwrap();
        assert_eq!(err, BrokerError::NotFound("vhost /".into()));

        let (url, _requests) = serve(vec![(404, r#"{"error":"Object Not Found"}"#)]);
        let err = broker(&url, Duration::from_secs(2)).queue_info("ghost").unwrap_err();
        assert_eq!(err, BrokerError::NotFound("queue ghost".into()));
    }

    #[test]
    fn garbage_body_is_a_protocol_error() {
        let (url, _requests) = serve(vec![(200, "<html>")]);
        let err = broker(&url, Duration::from_secs(2)).queue_info("images").unwrap_err();
        assert!(matches!(err, BrokerError::Protocol(_)));
    }

    #[test]
    fn rejected_credentials_are_a_protocol_error() {
        let (url, _requests) = serve(vec![(401, r#"{"error":"not_authorised"}"#)]);
        let err = broker(&url, Duration::from_secs(2)).connect().err().unwrap();
        assert!(matches!(err, BrokerError::Protocol(msg) if msg.contains("401")));
    }

    #[test]
    fn refused_connection_closes_the_channel() {
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let err = broker(&format!("http://{addr}"), Duration::from_secs(2))
            .connect()
            .err()
            .unwrap();
        assert!(matches!(err, BrokerError::ChannelClosed(_)));
    }

    #[test]
    fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                thread::sleep(Duration::from_secs(2));
                drop(stream);
            }
        });
        let err = broker(&url, Duration::from_millis(200)).queue_info("images").unwrap_err();
        assert_eq!(err, BrokerError::Timeout);
    }

    #[test]
    fn unusable_timeout_fails_construction() {
        let settings = BrokerSettings {
            timeout: f64::INFINITY,
            ..BrokerSettings::default()
        };
        assert!(matches!(
            ManagementBroker::new(&settings),
            Err(BrokerError::Protocol(msg)) if msg.contains("timeout")
        ));
    }
}
