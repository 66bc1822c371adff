use crate::types::Headers;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: usize,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn header(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    pub fn status(&self) -> u8 {
        self.header(":status")
            .expect("no status in response")
            .parse()
            .expect("non-number status")
    }

    /// The body decoded as UTF-8, replacing invalid sequences (mirrors
    /// `String::from_utf8_lossy` rather than failing outright, since bodies
    /// served as e.g. `text/html; charset=iso-8859-1` are common in the wild).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The body decoded as JSON.
    #[cfg(feature = "json")]
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
