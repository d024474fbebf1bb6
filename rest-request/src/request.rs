use std::fmt;

use bytes::Bytes;
use tracing::{debug, instrument};
use url::Url;

use crate::{
    http::ReqwestTransport,
    payload::{encode_form, RequestBody},
    response::{Completion, ResponseBody, ResponseFormat, ResponseInfo},
    transport::{Call, Credentials, Handle, Transport, Upload, REQUEST_TIMEOUT},
    verb::Verb,
    InvalidInput, Result,
};

pub const DEFAULT_ACCEPT_TYPE: &str = "application/json";

/// A reusable description of one outbound HTTP call and, once executed,
/// its result.
///
/// Non-2xx responses are returned as ordinary completions. Callers decide
/// what a status means by inspecting [`HttpRequest::response_info`].
pub struct HttpRequest<T = ReqwestTransport> {
    transport: T,
    url: Option<String>,
    verb: Verb,
    request_body: Option<RequestBody>,
    request_length: u64,
    username: Option<String>,
    password: Option<String>,
    accept_type: String,
    completion: Option<Completion>,
}

impl<T> fmt::Debug for HttpRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("url", &self.url)
            .field("verb", &self.verb)
            .field("request_body", &self.request_body)
            .field("request_length", &self.request_length)
            .field("username", &self.username)
            .field("accept_type", &self.accept_type)
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new(None, Verb::Get, None)
    }
}

impl HttpRequest {
    /// Raw form bodies are encoded right away, whatever the verb.
    pub fn new(url: Option<String>, verb: Verb, body: Option<RequestBody>) -> Self {
        Self::with_transport(ReqwestTransport, url, verb, body)
    }
}

impl<T: Transport> HttpRequest<T> {
    pub fn with_transport(
        transport: T,
        url: Option<String>,
        verb: Verb,
        body: Option<RequestBody>,
    ) -> Self {
        Self {
            transport,
            url,
            verb,
            request_body: body.map(|body| RequestBody::Encoded(body.encode())),
            request_length: 0,
            username: None,
            password: None,
            accept_type: DEFAULT_ACCEPT_TYPE.to_string(),
            completion: None,
        }
    }

    /// Sends the request and stores the result.
    ///
    /// Only invalid configuration is an error. Transport failures and
    /// non-2xx statuses produce a [`Completion`].
    #[instrument(skip(self), fields(verb = %self.verb, url = ?self.url))]
    pub fn execute(&mut self) -> Result<&Completion> {
        let mut handle = self.transport.open();
        let outcome = self.prepare().map(|call| handle.perform(&call));
        handle.close();
        let completion = outcome?;
        debug!(
            status = ?completion.info.status,
            elapsed = ?completion.info.total_time,
            "execute finished"
        );
        Ok(&*self.completion.insert(completion))
    }

    fn prepare(&mut self) -> Result<Call> {
        let url = self.url.as_deref().ok_or(InvalidInput::MissingUrl)?;
        let url = Url::parse(url)
            .map_err(|e| InvalidInput::InvalidUrl(format!("{} for {}", e, url)))?;
        let upload = match self.verb {
            Verb::Get | Verb::Delete => Upload::None,
            Verb::Post => Upload::Form(self.encoded_body()?),
            Verb::Put => {
                let body = self.encoded_body()?;
                self.request_length = body.len() as u64;
                Upload::Sized {
                    body,
                    length: self.request_length,
                }
            }
        };
        debug!(upload = upload.len(), "prepared call");
        Ok(Call {
            verb: self.verb,
            url,
            timeout: REQUEST_TIMEOUT,
            accept: self.accept_type.clone(),
            credentials: self.credentials(),
            upload,
        })
    }

    fn encoded_body(&mut self) -> Result<Bytes> {
        if let Some(RequestBody::Encoded(body)) = &self.request_body {
            return Ok(Bytes::from(body.clone()));
        }
        self.build_post_body(None)?;
        self.encoded_body()
    }

    /// Encodes `data`, or the current body when `data` is `None`, and stores
    /// the result as the request body. Only raw form data is accepted.
    pub fn build_post_body(&mut self, data: Option<RequestBody>) -> Result<()> {
        let encoded = match data.as_ref().or(self.request_body.as_ref()) {
            Some(RequestBody::Raw(data)) => encode_form(data),
            _ => Err(InvalidInput::ArrayExpected)?,
        };
        self.request_body = Some(RequestBody::Encoded(encoded));
        Ok(())
    }

    /// Restores the body, verb and response state to their defaults.
    /// The url, credentials and accept type are kept.
    pub fn flush(&mut self) {
        self.request_body = None;
        self.request_length = 0;
        self.verb = Verb::Get;
        self.completion = None;
    }

    /// Digest credentials, present only when both halves are set.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Parses `verb` case-insensitively. Unknown verbs leave the request
    /// unchanged.
    pub fn set_verb(&mut self, verb: &str) -> Result<()> {
        self.verb = verb.parse()?;
        Ok(())
    }

    pub fn set_verb_as(&mut self, verb: Verb) {
        self.verb = verb;
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = Some(username.into());
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
    }

    pub fn accept_type(&self) -> &str {
        &self.accept_type
    }

    pub fn set_accept_type(&mut self, accept_type: impl Into<String>) {
        self.accept_type = accept_type.into();
    }

    pub fn request_body(&self) -> Option<&RequestBody> {
        self.request_body.as_ref()
    }

    pub fn set_request_body(&mut self, body: impl Into<RequestBody>) {
        self.request_body = Some(body.into());
    }

    /// Byte length of the body sent by the last PUT.
    pub fn request_length(&self) -> u64 {
        self.request_length
    }

    pub fn completion(&self) -> Option<&Completion> {
        self.completion.as_ref()
    }

    pub fn response_info(&self) -> Option<&ResponseInfo> {
        self.completion.as_ref().map(|completion| &completion.info)
    }

    pub fn response_text(&self) -> Option<&str> {
        self.completion
            .as_ref()
            .and_then(|completion| completion.body.as_deref())
    }

    /// The stored response parsed as JSON, `Value::Null` when it is not JSON.
    pub fn response_json(&self) -> serde_json::Value {
        self.completion
            .as_ref()
            .map(Completion::json)
            .unwrap_or_default()
    }

    pub fn response_body(&self, format: ResponseFormat) -> Option<ResponseBody<'_>> {
        match format {
            ResponseFormat::Raw => self.response_text().map(ResponseBody::Raw),
            ResponseFormat::Json => Some(ResponseBody::Json(self.response_json())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::{form, tests::MockTransport, Error, FormData};

    const URL: &str = "http://api.example.com/items";

    fn mock_request(
        transport: &MockTransport,
        verb: Verb,
        body: Option<RequestBody>,
    ) -> HttpRequest<MockTransport> {
        HttpRequest::with_transport(transport.clone(), Some(URL.to_string()), verb, body)
    }

    #[test]
    fn test_construction_defaults() {
        let request: HttpRequest = HttpRequest::default();
        assert_eq!(request.url(), None);
        assert_eq!(request.verb(), Verb::Get);
        assert_eq!(request.request_body(), None);
        assert_eq!(request.request_length(), 0);
        assert_eq!(request.accept_type(), DEFAULT_ACCEPT_TYPE);
        assert!(request.completion().is_none());
        assert!(request.response_info().is_none());
        assert_eq!(request.response_text(), None);
    }

    #[test]
    fn test_construction_encodes_body() {
        let transport = MockTransport::replying(200, "");
        let request = mock_request(
            &transport,
            Verb::Get,
            Some(form!["a" => "1", "b" => "2"].into()),
        );
        assert_eq!(
            request.request_body(),
            Some(&RequestBody::Encoded("a=1&b=2".to_string()))
        );

        let request = HttpRequest::with_transport(
            transport,
            None,
            Verb::Post,
            Some("already=encoded".into()),
        );
        assert_eq!(
            request.request_body(),
            Some(&RequestBody::Encoded("already=encoded".to_string()))
        );
    }

    #[test]
    fn test_build_post_body() {
        let transport = MockTransport::replying(200, "");
        let mut request = mock_request(&transport, Verb::Post, None);

        request.set_request_body(form!["a" => "1", "b" => "2"]);
        request.build_post_body(None).unwrap();
        assert_eq!(
            request.request_body(),
            Some(&RequestBody::Encoded("a=1&b=2".to_string()))
        );

        request
            .build_post_body(Some(form!["k" => vec!["x", "y"]].into()))
            .unwrap();
        assert_eq!(
            request.request_body().and_then(RequestBody::as_encoded),
            Some("k%5B0%5D=x&k%5B1%5D=y")
        );

        // the stored body is a string now, not a mapping
        assert!(matches!(
            request.build_post_body(None),
            Err(Error::InvalidInput(InvalidInput::ArrayExpected))
        ));
        assert!(matches!(
            request.build_post_body(Some("not a mapping".into())),
            Err(Error::InvalidInput(InvalidInput::ArrayExpected))
        ));
        assert_eq!(
            request.request_body().and_then(RequestBody::as_encoded),
            Some("k%5B0%5D=x&k%5B1%5D=y")
        );

        request.flush();
        assert!(matches!(
            request.build_post_body(None),
            Err(Error::InvalidInput(InvalidInput::ArrayExpected))
        ));
    }

    #[test]
    fn test_every_verb_closes_handle_once() {
        for (round, verb) in [Verb::Get, Verb::Post, Verb::Put, Verb::Delete]
            .into_iter()
            .enumerate()
        {
            let transport = MockTransport::replying(200, "ok");
            let mut request = mock_request(&transport, verb, Some(form!["a" => "1"].into()));
            let completion = request.execute().unwrap();
            assert_eq!(completion.body.as_deref(), Some("ok"), "round {}", round);

            let log = transport.log.borrow();
            assert_eq!(log.opened, 1);
            assert_eq!(log.closed, 1);
            assert_eq!(log.calls.len(), 1);
            assert_eq!(log.calls[0].verb, verb);
        }
    }

    #[test]
    fn test_invalid_input_closes_handle_without_io() {
        let transport = MockTransport::replying(200, "ok");
        let mut request =
            HttpRequest::with_transport(transport.clone(), None, Verb::Get, None);
        assert!(matches!(
            request.execute(),
            Err(Error::InvalidInput(InvalidInput::MissingUrl))
        ));

        request.set_url("not a url");
        assert!(matches!(
            request.execute(),
            Err(Error::InvalidInput(InvalidInput::InvalidUrl(_)))
        ));

        request.set_url(URL);
        request.set_verb_as(Verb::Post);
        assert!(matches!(
            request.execute(),
            Err(Error::InvalidInput(InvalidInput::ArrayExpected))
        ));

        let log = transport.log.borrow();
        assert_eq!(log.opened, 3);
        assert_eq!(log.closed, 3);
        assert!(log.calls.is_empty());
        assert!(request.completion().is_none());
    }

    #[test]
    fn test_invalid_verb_rejected() {
        let transport = MockTransport::replying(200, "ok");
        let mut request = mock_request(&transport, Verb::Put, None);
        assert!(matches!(
            request.set_verb("PATCH"),
            Err(Error::InvalidInput(InvalidInput::InvalidVerb(ref verb))) if verb == "PATCH"
        ));
        assert_eq!(request.verb(), Verb::Put);
        assert_eq!(transport.log.borrow().opened, 0);

        request.set_verb("delete").unwrap();
        assert_eq!(request.verb(), Verb::Delete);
    }

    #[test]
    fn test_post_encodes_raw_body() {
        let transport = MockTransport::replying(201, "");
        let mut request = mock_request(&transport, Verb::Post, None);
        request.set_request_body(form!["a" => "1", "b" => "2"]);
        request.execute().unwrap();

        assert_eq!(
            transport.log.borrow().calls[0].upload,
            Upload::Form(Bytes::from_static(b"a=1&b=2"))
        );
        assert_eq!(
            request.request_body(),
            Some(&RequestBody::Encoded("a=1&b=2".to_string()))
        );
        assert_eq!(request.request_length(), 0);
    }

    #[test]
    fn test_put_sends_sized_body() {
        let transport = MockTransport::replying(200, "");
        let mut request = mock_request(&transport, Verb::Put, None);
        request.set_request_body(form!["k" => "v"]);
        let completion = request.execute().unwrap();
        assert_eq!(completion.info.size_upload, 3);

        assert_eq!(request.request_length(), 3);
        assert_eq!(
            transport.log.borrow().calls[0].upload,
            Upload::Sized {
                body: Bytes::from_static(b"k=v"),
                length: 3,
            }
        );
    }

    #[test]
    fn test_get_and_delete_never_encode() {
        for verb in [Verb::Get, Verb::Delete] {
            let transport = MockTransport::replying(200, "");
            let mut request = mock_request(&transport, verb, None);
            request.set_request_body(form!["a" => "1"]);
            request.execute().unwrap();

            assert_eq!(transport.log.borrow().calls[0].upload, Upload::None);
            assert_eq!(
                request.request_body(),
                Some(&RequestBody::Raw(form!["a" => "1"]))
            );
        }
    }

    #[test]
    fn test_common_call_configuration() {
        let transport = MockTransport::replying(200, "");
        let mut request = mock_request(&transport, Verb::Get, None);
        request.set_accept_type("text/xml");
        request.execute().unwrap();

        let log = transport.log.borrow();
        let call = &log.calls[0];
        assert_eq!(call.url.as_str(), URL);
        assert_eq!(call.accept, "text/xml");
        assert_eq!(call.timeout, Duration::from_secs(10));
        assert_eq!(call.credentials, None);
    }

    #[test]
    fn test_credentials_require_both_halves() {
        let transport = MockTransport::replying(200, "");
        let mut request = mock_request(&transport, Verb::Get, None);
        request.set_username("alice");
        request.execute().unwrap();
        assert_eq!(transport.log.borrow().calls[0].credentials, None);

        let mut request = HttpRequest::with_transport(
            transport.clone(),
            Some(URL.to_string()),
            Verb::Get,
            None,
        );
        request.set_password("secret");
        request.execute().unwrap();
        assert_eq!(transport.log.borrow().calls[1].credentials, None);

        request.set_username("alice");
        request.execute().unwrap();
        assert_eq!(
            transport.log.borrow().calls[2].credentials,
            Some(Credentials {
                username: "alice".to_string(),
                password: "secret".to_string(),
            })
        );
    }

    #[test]
    fn test_execute_is_repeatable() {
        let transport = MockTransport::replying(200, "ok");
        let mut request = mock_request(&transport, Verb::Put, Some(form!["k" => "v"].into()));
        request.execute().unwrap();
        request.execute().unwrap();

        let log = transport.log.borrow();
        assert_eq!(log.calls.len(), 2);
        assert_eq!(log.calls[0], log.calls[1]);
        assert_eq!(log.closed, 2);
    }

    #[test]
    fn test_flush_keeps_url_and_credentials() {
        let transport = MockTransport::replying(200, r#"{"x":1}"#);
        let mut request = mock_request(&transport, Verb::Post, Some(form!["a" => "1"].into()));
        request.set_username("alice");
        request.set_password("secret");
        request.set_accept_type("text/plain");
        request.execute().unwrap();
        assert!(request.response_info().is_some());

        request.flush();
        assert_eq!(request.verb(), Verb::Get);
        assert_eq!(request.request_body(), None);
        assert_eq!(request.request_length(), 0);
        assert!(request.completion().is_none());
        assert!(request.response_info().is_none());
        assert_eq!(request.response_text(), None);
        assert_eq!(request.url(), Some(URL));
        assert_eq!(request.username(), Some("alice"));
        assert_eq!(request.password(), Some("secret"));
        assert_eq!(request.accept_type(), "text/plain");
    }

    #[test]
    fn test_response_body_formats() {
        let transport = MockTransport::replying(200, r#"{"x":1}"#);
        let mut request = mock_request(&transport, Verb::Get, None);
        assert_eq!(request.response_body(ResponseFormat::Raw), None);
        request.execute().unwrap();

        assert_eq!(
            request.response_body(ResponseFormat::Raw),
            Some(ResponseBody::Raw(r#"{"x":1}"#))
        );
        assert_eq!(
            request.response_body("json".parse().unwrap()),
            Some(ResponseBody::Json(json!({"x": 1})))
        );
        assert_eq!(request.response_info().and_then(|info| info.status), Some(200));

        let transport = MockTransport::replying(500, "{oops");
        let mut request = mock_request(&transport, Verb::Get, None);
        request.execute().unwrap();
        assert_eq!(request.response_json(), serde_json::Value::Null);
        assert_eq!(request.response_info().and_then(|info| info.status), Some(500));
    }

    #[test]
    fn test_json_body_conversion() {
        let transport = MockTransport::replying(200, "");
        let data = FormData::try_from(json!({"name": "bob", "age": 3})).unwrap();
        let mut request = mock_request(&transport, Verb::Post, Some(data.into()));
        request.execute().unwrap();
        assert_eq!(
            transport.log.borrow().calls[0].upload,
            Upload::Form(Bytes::from_static(b"age=3&name=bob"))
        );
    }
}
