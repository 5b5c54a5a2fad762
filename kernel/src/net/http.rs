//! A one-shot HTTP/1.0 client, the engine behind the `curl` command.
//!
//! `fetch` resolves the host, opens a TCP flow, sends a GET and collects
//! everything the server sends until it closes the connection. For https
//! URLs the TLS handshake is started and observed, but the session can never
//! be completed, so the fetch ends with `HttpError::TlsUnsupported`.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};

use crate::executor::{timeout, timeout_at};
use crate::log::TaggedLogger;
use crate::time::Deadline;

use super::dns::resolve;
use super::error::{HttpError, NetError};
use super::stack::NetEvent;
use super::tcp::{FlowKey, FlowState, TcpFlow};
use super::tls::TlsState;
use super::{run, wait_for, NetHandle};

const LOGGER: TaggedLogger = TaggedLogger::new("HTTP");

pub const USER_AGENT: &str = "ChrysalisOS-curl/0.1";

pub const CONNECT_TIMEOUT_MS: u64 = 5000;
pub const SYN_RETRY_MS: u64 = 1000;
/// How long the server's side of the TLS handshake is followed
pub const TLS_OBSERVE_MS: u64 = 3000;
pub const DOWNLOAD_TIMEOUT_MS: u64 = 10000;

const EPHEMERAL_PORT_BASE: u16 = 40000;
const EPHEMERAL_PORT_COUNT: u32 = 10000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Url {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub tls: bool,
}

/// Split a URL into host, port and path. The scheme is optional and
/// defaults to http; `https://` selects port 443 and TLS.
pub fn parse_url(url: &str) -> Result<Url, HttpError> {
    let (rest, mut port, tls) = if let Some(rest) = url.strip_prefix("http://") {
        (rest, 80, false)
    } else if let Some(rest) = url.strip_prefix("https://") {
        (rest, 443, true)
    } else {
        (url, 80, false)
    };

    let (authority, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, "/"),
    };
    let host = match authority.split_once(':') {
        Some((host, port_str)) => {
            port = port_str.parse().map_err(|_| HttpError::InvalidUrl)?;
            host
        }
        None => authority,
    };
    if host.is_empty() || port == 0 {
        return Err(HttpError::InvalidUrl);
    }

    Ok(Url {
        host: host.to_string(),
        port,
        path: path.to_string(),
        tls,
    })
}

pub fn build_request(url: &Url) -> String {
    alloc::format!(
        "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: {}\r\n\r\n",
        url.path,
        url.host,
        USER_AGENT
    )
}

/// Everything the server sent, split at the end of the headers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    data: Vec<u8>,
    body_start: usize,
}

impl HttpResponse {
    /// A response without a blank line after the headers is treated as all
    /// body.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let body_start = data
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map_or(0, |at| at + 4);
        Self { data, body_start }
    }

    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    pub fn headers(&self) -> &[u8] {
        &self.data[..self.body_start]
    }

    pub fn body(&self) -> &[u8] {
        &self.data[self.body_start..]
    }

    /// The code from an `HTTP/1.x NNN` status line
    pub fn status_code(&self) -> Option<u16> {
        let line_end = self.data.iter().position(|b| *b == b'\r')?;
        let line = core::str::from_utf8(&self.data[..line_end]).ok()?;
        let mut parts = line.split(' ');
        if !parts.next()?.starts_with("HTTP/") {
            return None;
        }
        parts.next()?.parse().ok()
    }
}

/// Fetch `url`, returning the full response
pub fn fetch(net: &NetHandle, url: &str) -> Result<HttpResponse, HttpError> {
    run(net, get(net.clone(), url))
}

pub async fn get(net: NetHandle, url: &str) -> Result<HttpResponse, HttpError> {
    let url = parse_url(url)?;
    let ip = resolve(net.clone(), &url.host).await?;

    let key = {
        let mut stack = net.lock();
        if stack.primary_device().is_none() {
            return Err(NetError::NoNetDevice.into());
        }
        let now = stack.clock().now_ms();
        let rng = stack.rng();
        rng.seed(now as u32);
        let local_port = EPHEMERAL_PORT_BASE + (rng.next_u32() % EPHEMERAL_PORT_COUNT) as u16;
        let initial_seq = rng.next_u32();
        let key = FlowKey {
            local_port,
            remote_ip: ip,
            remote_port: url.port,
        };
        let host = url.tls.then_some(url.host.as_str());
        stack.tcp_register(TcpFlow::connect(key, initial_seq, host))?;
        key
    };
    LOGGER.log(format_args!("Connecting to {}:{}", ip, url.port));

    let result = exchange(&net, &url, key).await;

    let mut stack = net.lock();
    let fin = stack.tcp_flow_mut(&key).and_then(|flow| flow.close());
    if let Some(fin) = fin {
        if let Err(err) = stack.tcp_send_segment(&key, &fin) {
            LOGGER.debug(format_args!("FIN not sent: {}", err));
        }
    }
    stack.tcp_remove(&key);
    result
}

async fn exchange(net: &NetHandle, url: &Url, key: FlowKey) -> Result<HttpResponse, HttpError> {
    connect(net, key).await?;
    let clock = net.lock().clock();

    if url.tls {
        LOGGER.log(format_args!(
            "TLS handshake initiated (will fail due to missing crypto)..."
        ));
        let failed = wait_for(net, NetEvent::TcpSegment(key), move |stack| {
            let state = stack.tcp_flow(&key)?.tls_state();
            (state == TlsState::Error).then_some(())
        });
        let _ = timeout(clock, TLS_OBSERVE_MS, failed).await;
        let state = net
            .lock()
            .tcp_flow(&key)
            .map_or(TlsState::Closed, |flow| flow.tls_state());
        return Err(HttpError::TlsUnsupported(state));
    }

    let request = build_request(url);
    {
        let mut stack = net.lock();
        let segment = stack
            .tcp_flow_mut(&key)
            .map(|flow| flow.send_data(request.as_bytes()))
            .ok_or(NetError::NoSuchFlow)?;
        stack.tcp_send_segment(&key, &segment)?;
    }

    let done = wait_for(net, NetEvent::TcpSegment(key), move |stack| {
        stack.tcp_flow(&key)?.is_complete().then_some(())
    });
    if timeout(clock, DOWNLOAD_TIMEOUT_MS, done).await.is_err() {
        LOGGER.warn(format_args!("Server did not close the connection in time"));
    }

    let data = net
        .lock()
        .tcp_flow_mut(&key)
        .map(|flow| flow.take_received())
        .unwrap_or_default();
    if data.is_empty() {
        return Err(HttpError::NoData);
    }
    LOGGER.debug(format_args!("Received {} bytes", data.len()));
    Ok(HttpResponse::from_bytes(data))
}

/// Send SYNs until the server answers, one per `SYN_RETRY_MS`. An ARP miss
/// on the first attempt is covered by the retries.
async fn connect(net: &NetHandle, key: FlowKey) -> Result<(), HttpError> {
    let clock = net.lock().clock();
    let deadline = Deadline::after(&*clock, CONNECT_TIMEOUT_MS);
    loop {
        {
            let mut stack = net.lock();
            let syn = stack.tcp_flow(&key).map(|flow| flow.syn()).ok_or(NetError::NoSuchFlow)?;
            if let Err(err) = stack.tcp_send_segment(&key, &syn) {
                LOGGER.debug(format_args!("SYN to {} not sent: {}", key.remote_ip, err));
            }
        }

        let retry = Deadline::after(&*clock, SYN_RETRY_MS).min(deadline);
        let answered = wait_for(net, NetEvent::TcpSegment(key), move |stack| {
            let flow = stack.tcp_flow(&key)?;
            (flow.state() != FlowState::SynSent).then(|| flow.was_reset())
        });
        match timeout_at(clock.clone(), retry, answered).await {
            Ok(false) => return Ok(()),
            Ok(true) => return Err(HttpError::ConnectionReset),
            Err(_) if deadline.has_passed(&*clock) => {
                LOGGER.warn(format_args!("Connection to {} timed out", key.remote_ip));
                return Err(HttpError::ConnectTimedOut);
            }
            Err(_) => (),
        }
    }
}
