use std::{
    collections::HashMap,
    io::Cursor,
    time::{Duration, Instant},
};

use digest_auth::{AuthContext, HttpMethod};
use reqwest::{
    blocking::{Body, Client, RequestBuilder, Response},
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE},
    StatusCode,
};
use tracing::{debug, instrument, warn};
use url::Position;

use crate::{
    response::{Completion, ResponseInfo},
    transport::{Call, Credentials, Handle, Transport, Upload},
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Blocking transport backed by `reqwest`. Every handle builds its own
/// client, so nothing is shared between executions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestTransport;

impl Transport for ReqwestTransport {
    type Handle = ReqwestHandle;

    fn open(&self) -> ReqwestHandle {
        ReqwestHandle {
            client: Client::builder().build(),
        }
    }
}

#[derive(Debug)]
pub struct ReqwestHandle {
    client: reqwest::Result<Client>,
}

/// The call timeout spans every request of one call, including the
/// answer to a Digest challenge.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    started: Instant,
    timeout: Duration,
}

impl Deadline {
    fn remaining(&self) -> Option<Duration> {
        self.timeout
            .checked_sub(self.started.elapsed())
            .filter(|remaining| !remaining.is_zero())
    }
}

fn send(client: &Client, call: &Call, deadline: Deadline) -> Result<Response, String> {
    let response = send_within(build_request(client, call), deadline)?;
    if response.status() != StatusCode::UNAUTHORIZED {
        return Ok(response);
    }
    let Some(credentials) = &call.credentials else {
        return Ok(response);
    };
    match digest_authorization(&response, call, credentials) {
        Some(authorization) => {
            debug!("answering digest challenge");
            send_within(
                build_request(client, call).header(AUTHORIZATION, authorization),
                deadline,
            )
        }
        None => Ok(response),
    }
}

fn send_within(builder: RequestBuilder, deadline: Deadline) -> Result<Response, String> {
    let remaining = deadline.remaining().ok_or_else(|| {
        format!(
            "operation timed out after {} milliseconds",
            deadline.timeout.as_millis()
        )
    })?;
    builder
        .timeout(remaining)
        .send()
        .map_err(|error| error.to_string())
}

impl Handle for ReqwestHandle {
    #[instrument(skip_all, fields(verb = %call.verb, url = %call.url))]
    fn perform(&mut self, call: &Call) -> Completion {
        let deadline = Deadline {
            started: Instant::now(),
            timeout: call.timeout,
        };
        let outcome = match &self.client {
            Ok(client) => send(client, call, deadline).and_then(|response| {
                complete(response, call, deadline.started).map_err(|error| error.to_string())
            }),
            Err(error) => Err(error.to_string()),
        };
        match outcome {
            Ok(completion) => {
                debug!(status = ?completion.info.status, "request completed");
                completion
            }
            Err(error) => {
                warn!(%error, "transport failure");
                Completion::failed(call.url.as_str(), error, deadline.started.elapsed())
            }
        }
    }

    fn close(self) {
        drop(self.client);
    }
}

fn build_request(client: &Client, call: &Call) -> RequestBuilder {
    let builder = client
        .request(call.verb.into_method(), call.url.clone())
        .header(ACCEPT, call.accept.as_str());
    match &call.upload {
        Upload::None => builder,
        Upload::Form(body) => builder
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body.to_vec()),
        Upload::Sized { body, length } => {
            builder.body(Body::sized(Cursor::new(body.clone()), *length))
        }
    }
}

fn digest_authorization(
    response: &Response,
    call: &Call,
    credentials: &Credentials,
) -> Option<String> {
    let challenge = response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| {
            value
                .trim_start()
                .get(..6)
                .is_some_and(|scheme| scheme.eq_ignore_ascii_case("digest"))
        })?;
    let mut prompt = match digest_auth::parse(challenge) {
        Ok(prompt) => prompt,
        Err(error) => {
            warn!(%error, "unusable digest challenge");
            return None;
        }
    };
    let context = AuthContext::new_with_method(
        credentials.username.as_str(),
        credentials.password.as_str(),
        &call.url[Position::BeforePath..],
        call.upload.body().map(|body| &body[..]),
        HttpMethod::from(call.verb.as_str()),
    );
    match prompt.respond(&context) {
        Ok(answer) => Some(answer.to_header_string()),
        Err(error) => {
            warn!(%error, "digest response failed");
            None
        }
    }
}

fn complete(response: Response, call: &Call, started: Instant) -> reqwest::Result<Completion> {
    let url = response.url().to_string();
    let status = response.status().as_u16();
    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in response.headers() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        headers
            .entry(name.as_str().to_string())
            .or_default()
            .push(value.to_string());
    }
    let content_type = headers
        .get(CONTENT_TYPE.as_str())
        .and_then(|values| values.first())
        .cloned();
    let raw = response.bytes()?;
    let size_download = raw.len() as u64;
    Ok(Completion {
        body: Some(String::from_utf8_lossy(&raw).into_owned()),
        raw,
        info: ResponseInfo {
            url,
            status: Some(status),
            content_type,
            headers,
            total_time: started.elapsed(),
            size_upload: call.upload.len(),
            size_download,
            error: None,
        },
    })
}
