use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::anyhow;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderValue, PROXY_AUTHORIZATION};
use hyper::Uri;
use hyper_proxy::{Intercept, Proxy};
use hyper_tls::HttpsConnector;
use tower::Service;
use tracing::trace;

use crate::config::NetworkProxy;

type Inner = hyper_proxy::ProxyConnector<HttpsConnector<HttpConnector>>;

/// Connects either directly or through an HTTP forward proxy. Plain HTTP requests are sent to the
///  proxy in absolute form, HTTPS connections are tunnelled with CONNECT and TLS is layered on
///  top of the tunnel.
#[derive(Clone)]
pub struct ProxyConnector {
    inner: Inner,
}
impl ProxyConnector {
    pub fn new(connect_timeout: Duration, proxy: Option<&NetworkProxy>) -> anyhow::Result<ProxyConnector> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(connect_timeout));
        let tls = tokio_native_tls::TlsConnector::from(native_tls::TlsConnector::new()?);
        let https = HttpsConnector::from((http, tls));

        let inner = match proxy {
            None => Inner::new(https)?,
            Some(p) => {
                if !p.protocol.eq_ignore_ascii_case("http") {
                    return Err(anyhow!("network proxy {}: unsupported protocol {}", p.id, p.protocol));
                }
                trace!("connecting through proxy {} at {}:{}", p.id, p.host, p.port);
                let mut target = Proxy::new(Intercept::All, Uri::try_from(format!("http://{}:{}", p.host, p.port))?);
                if let Some(credentials) = &p.credentials {
                    target.set_header(PROXY_AUTHORIZATION, HeaderValue::from_str(&credentials.basic_authorization())?);
                }
                Inner::from_proxy(https, target)?
            }
        };
        Ok(ProxyConnector { inner })
    }

    /// Headers a request to `uri` must carry for the proxy. Only requests sent to the proxy in
    ///  absolute form need them, tunnelled requests authenticate during CONNECT.
    pub fn proxy_headers(&self, uri: &Uri) -> Option<&HeaderMap> {
        self.inner.http_headers(uri)
    }
}

impl Service<Uri> for ProxyConnector {
    type Response = <Inner as Service<Uri>>::Response;
    type Error = <Inner as Service<Uri>>::Error;
    type Future = <Inner as Service<Uri>>::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        self.inner.call(dst)
    }
}
