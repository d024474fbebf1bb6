mod error;

pub mod http;
pub mod payload;
pub mod request;
pub mod response;
pub mod transport;
pub mod verb;

pub use error::*;
pub use payload::{FormData, FormValue, RequestBody};
pub use request::HttpRequest;
pub use response::{Completion, ResponseBody, ResponseFormat, ResponseInfo};
pub use verb::Verb;
