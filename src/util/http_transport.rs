use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;
use hex::FromHex;
use hyper::client::Client;
use hyper::header::{HeaderMap, HeaderValue, AUTHORIZATION, LOCATION, USER_AGENT};
use hyper::{Body, Request, StatusCode, Uri};
use tokio::time::timeout;
use tracing::{debug, trace};
use url::Url;

use crate::config::RemoteEndpoint;
use crate::util::blob::Blob;
use crate::util::proxy_connector::ProxyConnector;

const MAX_REDIRECTS: usize = 5;
const USER_AGENT_VALUE: &str = concat!("arti-vault/", env!("CARGO_PKG_VERSION"));

pub enum RemoteResponse {
    Found(Blob),
    NotFound,
}

/// Retrieves resources relative to a remote endpoint's base location
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// `path` is relative to the endpoint's base location. Ok(NotFound) for a missing resource,
    ///  Err for everything else that prevents retrieval.
    async fn get(&self, endpoint: &RemoteEndpoint, path: &str) -> anyhow::Result<RemoteResponse>;
}

#[derive(Clone)]
struct EndpointClient {
    client: Client<ProxyConnector, Body>,
    connector: ProxyConnector,
}

/// Downloads files over HTTP(S), checking the body's integrity against a hashcode if one is
///  returned in a header.
///
/// Clients are created per endpoint (they are bound to its proxy and timeout) and cached, so
///  keeping an instance alive has performance benefits.
pub struct HttpTransport {
    clients: Mutex<HashMap<String, EndpointClient>>,
}
impl HttpTransport {
    pub fn new() -> HttpTransport {
        HttpTransport {
            clients: Default::default(),
        }
    }

    fn client_for(&self, endpoint: &RemoteEndpoint) -> anyhow::Result<EndpointClient> {
        let key = format!(
            "{}|{}|{}",
            endpoint.id,
            endpoint.network_proxy.as_ref().map(|p| p.id.as_str()).unwrap_or(""),
            endpoint.timeout_seconds,
        );

        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(c) = clients.get(&key) {
            return Ok(c.clone());
        }

        trace!("creating HTTP client for remote {}", endpoint.id);
        let connector = ProxyConnector::new(endpoint.timeout(), endpoint.network_proxy.as_ref())?;
        let client = EndpointClient {
            client: Client::builder().build(connector.clone()),
            connector,
        };
        clients.insert(key, client.clone());
        Ok(client)
    }

    pub fn request_url(endpoint: &RemoteEndpoint, path: &str) -> anyhow::Result<Url> {
        let mut base = endpoint.base_location.clone();
        if !base.ends_with('/') {
            base.push('/');
        }

        let mut url = Url::parse(&base)?.join(path.trim_start_matches('/'))?;
        if !endpoint.extra_query_params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (k, v) in &endpoint.extra_query_params {
                query.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn build_request(endpoint: &RemoteEndpoint, client: &EndpointClient, url: &Url, same_origin: bool) -> anyhow::Result<Request<Body>> {
        let uri = Uri::try_from(url.as_str())?;
        let mut builder = Request::builder()
            .method("GET")
            .header(USER_AGENT, USER_AGENT_VALUE);

        for (name, value) in &endpoint.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if same_origin {
            if let Some(credentials) = &endpoint.credentials {
                builder = builder.header(AUTHORIZATION, HeaderValue::from_str(&credentials.basic_authorization())?);
            }
        }
        if let Some(proxy_headers) = client.connector.proxy_headers(&uri) {
            for (name, value) in proxy_headers {
                builder = builder.header(name, value);
            }
        }

        Ok(builder.uri(uri).body(Body::empty())?)
    }
}
impl Default for HttpTransport {
    fn default() -> Self {
        HttpTransport::new()
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn get(&self, endpoint: &RemoteEndpoint, path: &str) -> anyhow::Result<RemoteResponse> {
        let client = self.client_for(endpoint)?;
        let origin = HttpTransport::request_url(endpoint, "")?.origin();
        let mut url = HttpTransport::request_url(endpoint, path)?;

        for _ in 0..=MAX_REDIRECTS {
            let request = HttpTransport::build_request(endpoint, &client, &url, url.origin() == origin)?;
            trace!("getting {:?}", request);

            let response = timeout(endpoint.timeout(), client.client.request(request))
                .await
                .map_err(|_| anyhow!("no response from {} within {}s", url, endpoint.timeout_seconds))??;

            let status = response.status();
            if is_followed_redirect(status) {
                let location = response.headers().get(LOCATION)
                    .and_then(|l| l.to_str().ok())
                    .ok_or_else(|| anyhow!("redirect without location from {}", url))?;
                url = url.join(location)?;
                debug!("following redirect to {}", url);
                continue;
            }
            if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
                return Ok(RemoteResponse::NotFound);
            }
            if !status.is_success() {
                return Err(anyhow!("upstream request for {} failed: {}", url, status));
            }

            let (sha1, md5) = advertised_checksums(response.headers());
            let data = response.into_body()
                .map(|chunk| chunk.map_err(anyhow::Error::from));
            return Ok(RemoteResponse::Found(Blob {
                data: Box::pin(data),
                md5,
                sha1,
            }));
        }

        Err(anyhow!("too many redirects for {}", path))
    }
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn advertised_checksums(headers: &HeaderMap) -> (Option<[u8; 20]>, Option<[u8; 16]>) {
    let header = |names: &[&str]| names.iter()
        .find_map(|n| headers.get(*n))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string());

    // Nexus sends '{SHA1{<hash>}}' as ETag, some others the quoted hash
    let sha1 = header(&["x-checksum-sha1", "x-goog-meta-checksum-sha1", "etag"])
        .map(|s| s.trim_matches('"').trim_start_matches("{SHA1{").trim_end_matches("}}").to_string())
        .and_then(|s| match <[u8; 20]>::from_hex(&s) {
            Ok(hash) => Some(hash),
            Err(_) => {
                debug!("ignoring advertised SHA1 checksum {:?}", s);
                None
            }
        });

    let md5 = header(&["x-checksum-md5", "x-goog-meta-checksum-md5"])
        .and_then(|s| <[u8; 16]>::from_hex(&s).ok());

    (sha1, md5)
}

#[cfg(test)]
mod test {
    use rstest::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use super::*;
    use crate::config::Credentials;

    async fn drain(response: RemoteResponse) -> Vec<u8> {
        let RemoteResponse::Found(blob) = response else {
            panic!("expected a body");
        };
        let mut body = blob.into_validated();
        let mut result = Vec::new();
        while let Some(chunk) = body.next().await {
            result.extend_from_slice(&chunk.unwrap());
        }
        result
    }

    #[test]
    fn test_request_url() {
        let mut endpoint = RemoteEndpoint::new("central", "https://repo.example.com/maven2");
        endpoint.extra_query_params.insert("token".to_string(), "a b".to_string());

        let url = HttpTransport::request_url(&endpoint, "org/example/proj/1.0/proj-1.0.pom").unwrap();
        assert_eq!(url.as_str(), "https://repo.example.com/maven2/org/example/proj/1.0/proj-1.0.pom?token=a+b");
    }

    #[test]
    fn test_advertised_checksums() {
        let mut headers = HeaderMap::new();
        headers.insert("etag", HeaderValue::from_static("\"{SHA1{aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d}}\""));
        headers.insert("x-checksum-md5", HeaderValue::from_static("5d41402abc4b2a76b9719d911017c592"));
        let (sha1, md5) = advertised_checksums(&headers);
        assert!(sha1.is_some());
        assert!(md5.is_some());

        let mut headers = HeaderMap::new();
        headers.insert("etag", HeaderValue::from_static("\"5d41402abc4b2a76b9719d911017c592\""));
        assert_eq!(advertised_checksums(&headers), (None, None));
    }

    #[tokio::test]
    async fn test_get_sends_headers_credentials_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repo/org/example/proj/1.0/proj-1.0.pom"))
            .and(query_param("token", "secret"))
            .and(header("X-Client", "vault"))
            .and(header("Authorization", "Basic dTpw"))
            .respond_with(ResponseTemplate::new(200)
                .set_body_string("hello")
                .insert_header("x-checksum-sha1", "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"))
            .mount(&server)
            .await;

        let mut endpoint = RemoteEndpoint::new("mock", &format!("{}/repo", server.uri()));
        endpoint.extra_query_params.insert("token".to_string(), "secret".to_string());
        endpoint.extra_headers.insert("X-Client".to_string(), "vault".to_string());
        endpoint.credentials = Some(Credentials { username: "u".to_string(), password: "p".to_string() });

        let transport = HttpTransport::new();
        let response = transport.get(&endpoint, "org/example/proj/1.0/proj-1.0.pom").await.unwrap();
        assert_eq!(drain(response).await, b"hello");
    }

    #[tokio::test]
    async fn test_get_not_found_and_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken.jar"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let endpoint = RemoteEndpoint::new("mock", &server.uri());
        let transport = HttpTransport::new();

        assert!(matches!(transport.get(&endpoint, "missing.jar").await.unwrap(), RemoteResponse::NotFound));
        assert!(transport.get(&endpoint, "broken.jar").await.is_err());
    }

    #[tokio::test]
    async fn test_get_follows_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old/a.txt"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new/a.txt"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new/a.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let endpoint = RemoteEndpoint::new("mock", &server.uri());
        let response = HttpTransport::new().get(&endpoint, "old/a.txt").await.unwrap();
        assert_eq!(drain(response).await, b"moved");
    }

    #[rstest]
    #[case(301, true)]
    #[case(302, true)]
    #[case(303, true)]
    #[case(307, true)]
    #[case(308, true)]
    #[case(300, false)]
    #[case(304, false)]
    #[case(200, false)]
    fn test_is_followed_redirect(#[case] status: u16, #[case] expected: bool) {
        assert_eq!(is_followed_redirect(StatusCode::from_u16(status).unwrap()), expected);
    }

    #[tokio::test]
    async fn test_get_does_not_follow_multiple_choices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old/a.txt"))
            .respond_with(ResponseTemplate::new(300).insert_header("Location", "/new/a.txt"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new/a.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .expect(0)
            .mount(&server)
            .await;

        let endpoint = RemoteEndpoint::new("mock", &server.uri());
        assert!(HttpTransport::new().get(&endpoint, "old/a.txt").await.is_err());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mismatching_advertised_checksum_fails_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200)
                .set_body_string("hello")
                .insert_header("x-checksum-md5", "00000000000000000000000000000000"))
            .mount(&server)
            .await;

        let endpoint = RemoteEndpoint::new("mock", &server.uri());
        let RemoteResponse::Found(blob) = HttpTransport::new().get(&endpoint, "a.txt").await.unwrap() else {
            panic!("expected a body");
        };
        let mut body = blob.into_validated();
        let mut failed = false;
        while let Some(chunk) = body.next().await {
            if chunk.is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
    }
}
