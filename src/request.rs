use crate::response::Response;
use crate::types::Headers;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

static REQUEST_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, derive_more::Display)]
pub enum Method {
    #[display(fmt = "GET")]
    Get,
    #[display(fmt = "POST")]
    Post,
    #[display(fmt = "PUT")]
    Put,
    #[display(fmt = "DELETE")]
    Delete,
    #[display(fmt = "HEAD")]
    Head,
    #[display(fmt = "PATCH")]
    Patch,
    #[display(fmt = "OPTIONS")]
    Options,
    #[display(fmt = "{}", _0)]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct Request {
    pub id: usize,
    pub url: Url,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, url: Url, headers: Option<Headers>, body: impl Into<Bytes>) -> Self {
        let mut full_headers = vec![
            (":method".to_owned(), method.to_string()),
            (":scheme".to_owned(), url.scheme().to_owned()),
            (":path".to_owned(), url.path().to_owned()),
            (
                ":authority".to_owned(),
                if let Some(port) = url.port() {
                    format!("{}:{}", url.host_str().expect("URL cannot be a base"), port)
                } else {
                    url.host_str().expect("URL cannot be a base").to_owned()
                },
            ),
        ];
        if let Some(headers) = headers {
            full_headers.extend(headers);
        }
        Self {
            id: REQUEST_ID.fetch_add(1, Ordering::SeqCst),
            url,
            headers: full_headers,
            body: body.into(),
        }
    }

    #[inline]
    pub fn get(url: Url, headers: Option<Headers>) -> Self {
        Self::new(Method::Get, url, headers, Bytes::new())
    }

    #[inline]
    pub fn post(url: Url, headers: Option<Headers>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::Post, url, headers, body)
    }

    /// A POST whose body is `value` serialized as JSON, with `content-type`
    /// set accordingly.
    #[cfg(feature = "json")]
    pub fn post_json<T: serde::Serialize>(url: Url, headers: Option<Headers>, value: &T) -> anyhow::Result<Self> {
        let body = serde_json::to_vec(value)?;
        let mut full_headers = headers.unwrap_or_default();
        full_headers.push(("content-type".to_owned(), "application/json".to_owned()));
        Ok(Self::new(Method::Post, url, Some(full_headers), body))
    }

    /// Builds the follow-up GET for a 3xx `response`'s `location` header,
    /// resolved against this request's URL (RFC 7231 §7.1.2 relative-reference
    /// resolution). Callers are responsible for any redirect-count limit.
    pub fn redirect(&self, response: &Response) -> anyhow::Result<Self> {
        let location = response
            .header("location")
            .ok_or_else(|| anyhow::anyhow!("redirect response carried no location header"))?;
        let url = self.url.join(location)?;
        Ok(Self::get(url, None))
    }
}
