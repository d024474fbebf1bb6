//! The seam between [`HttpRequest`](crate::HttpRequest) and the network.
//!
//! A [`Transport`] opens one [`Handle`] per execution. The handle performs at
//! most one [`Call`] and is consumed by [`Handle::close`], so it can never be
//! released twice.

use std::{fmt, time::Duration};

use bytes::Bytes;
use url::Url;

use crate::{response::Completion, verb::Verb};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Upload {
    #[default]
    None,
    /// `application/x-www-form-urlencoded` POST fields.
    Form(Bytes),
    /// A body streamed with an explicit `Content-Length`.
    Sized { body: Bytes, length: u64 },
}

impl Upload {
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Upload::None => None,
            Upload::Form(body) | Upload::Sized { body, .. } => Some(body),
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            Upload::None => 0,
            Upload::Form(body) => body.len() as u64,
            Upload::Sized { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a handle needs to perform one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub url: Url,
    pub timeout: Duration,
    pub accept: String,
    pub credentials: Option<Credentials>,
    pub upload: Upload,
}

pub trait Transport {
    type Handle: Handle;

    fn open(&self) -> Self::Handle;
}

pub trait Handle {
    /// Performs the call. Transport failures are reported inside the
    /// returned [`Completion`], never as an error.
    fn perform(&mut self, call: &Call) -> Completion;

    fn close(self);
}
