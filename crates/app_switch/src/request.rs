//! Outbound request model handed to the dispatch layer.

use masking::{Maskable, StrongSecret};
use serde::{Deserialize, Serialize};

use crate::consts;

/// Header set; values may be individually masked.
pub type Headers = std::collections::HashSet<(String, Maskable<String>)>;

/// HTTP method of an outbound gateway call.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// Headers present on every gateway call: the fixed client identifier plus
/// `Accept-Language` from the runtime locale.
fn default_request_headers() -> [(String, Maskable<String>); 2] {
    [
        (
            consts::CLIENT_IDENTIFIER_HEADER.to_string(),
            consts::CLIENT_IDENTIFIER.into(),
        ),
        (
            http::header::ACCEPT_LANGUAGE.to_string(),
            runtime_locale().into(),
        ),
    ]
}

/// Best-effort BCP 47 tag from the process locale, e.g. `en_US.UTF-8`
/// becomes `en-US`.
fn runtime_locale() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|lang| {
            let tag = lang.split('.').next()?.replace('_', "-");
            (!tag.is_empty() && tag != "C" && tag != "POSIX").then_some(tag)
        })
        .unwrap_or_else(|| consts::DEFAULT_LOCALE.to_string())
}

/// One outbound gateway call.
///
/// The body is key/secret material in flight; it lives in a
/// [`StrongSecret`] so dropping the request wipes it, which the retrying
/// client does once the attempt sequence terminates.
#[derive(Debug)]
pub struct Request {
    pub url: String,
    pub headers: Headers,
    pub method: Method,
    pub body: Option<StrongSecret<String>>,
    pub content_type: Option<mime::Mime>,
}

/// Builder for [`Request`].
#[derive(Debug)]
pub struct RequestBuilder {
    url: String,
    headers: Headers,
    method: Method,
    body: Option<StrongSecret<String>>,
    content_type: Option<mime::Mime>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: Method::Get,
            url: String::with_capacity(256),
            headers: std::collections::HashSet::new(),
            body: None,
            content_type: None,
        }
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = url.into();
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Extend with the always-present gateway headers.
    pub fn attach_default_headers(mut self) -> Self {
        self.headers.extend(default_request_headers());
        self
    }

    pub fn header(mut self, header: &str, value: Maskable<String>) -> Self {
        self.headers.insert((header.into(), value));
        self
    }

    pub fn content_type(mut self, content_type: mime::Mime) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn set_body(mut self, body: StrongSecret<String>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn build(self) -> Request {
        Request {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            content_type: self.content_type,
        }
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
