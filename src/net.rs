//! Moonraker HTTP transport over embassy-net.
//!
//! One transport per task; the TCP client state is shared and sized for
//! both the poller and the command drain to hold a connection at once.

use alloc::vec;
use alloc::vec::Vec;

use defmt::{debug, warn};
use embassy_net::dns::DnsSocket;
use embassy_net::tcp::client::TcpClient;
use embassy_time::{with_timeout, Duration};
use heapless::String;
use reqwless::client::HttpClient;
use reqwless::request::Method;

use toolhead_display::config::{HTTP_RX_BUFFER, HTTP_TIMEOUT_MS};
use toolhead_display::error::{Error, Result};
use toolhead_display::moonraker::HttpTransport;

/// Concurrent connections: poller and command drain.
pub const TCP_SOCKETS: usize = 2;
pub const TCP_BUFFER: usize = 1024;

pub type Tcp = TcpClient<'static, TCP_SOCKETS, TCP_BUFFER, TCP_BUFFER>;

/// Room for response headers on top of the body.
const HEADER_ROOM: usize = 1024;
const URL_MAX: usize = 256;

pub struct MoonrakerHttp {
    tcp: &'static Tcp,
    dns: &'static DnsSocket<'static>,
    base_url: &'static str,
    rx: Vec<u8>,
}

impl MoonrakerHttp {
    pub fn new(tcp: &'static Tcp, dns: &'static DnsSocket<'static>, base_url: &'static str) -> Self {
        Self {
            tcp,
            dns,
            base_url,
            rx: vec![0; HTTP_RX_BUFFER + HEADER_ROOM],
        }
    }

    async fn request(&mut self, method: Method, path: &str, body: &mut [u8]) -> Result<usize> {
        let mut url: String<URL_MAX> = String::new();
        url.push_str(self.base_url)
            .and_then(|_| url.push_str(path))
            .map_err(|_| Error::BufferOverflow)?;

        let exchange = exchange(self.tcp, self.dns, method, &url, &mut self.rx, body);
        match with_timeout(Duration::from_millis(HTTP_TIMEOUT_MS), exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Net: {} timed out", path);
                Err(Error::Transport)
            }
        }
    }
}

async fn exchange(
    tcp: &Tcp,
    dns: &DnsSocket<'static>,
    method: Method,
    url: &str,
    rx: &mut [u8],
    out: &mut [u8],
) -> Result<usize> {
    let mut client = HttpClient::new(tcp, dns);
    let mut request = client.request(method, url).await.map_err(|e| {
        debug!("Net: connect failed ({:?})", e);
        Error::Transport
    })?;
    let response = request.send(rx).await.map_err(|e| {
        debug!("Net: request failed ({:?})", e);
        Error::Transport
    })?;

    let status = response.status;
    if !status.is_successful() {
        return Err(Error::Http(status.0));
    }

    let body = response
        .body()
        .read_to_end()
        .await
        .map_err(|e| match e {
            reqwless::Error::BufferTooSmall => Error::BufferOverflow,
            _ => Error::Transport,
        })?;
    let dst = out.get_mut(..body.len()).ok_or(Error::BufferOverflow)?;
    dst.copy_from_slice(body);
    Ok(body.len())
}

impl HttpTransport for MoonrakerHttp {
    async fn get(&mut self, path: &str, body: &mut [u8]) -> Result<usize> {
        self.request(Method::GET, path, body).await
    }

    async fn post(&mut self, path: &str, body: &mut [u8]) -> Result<usize> {
        self.request(Method::POST, path, body).await
    }
}
