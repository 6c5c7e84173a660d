//! HTTP plumbing: per-attempt parameters, responses and the transport seam.

mod params;
mod response;
mod transport;

pub(crate) use params::params_for_attempt;
pub use params::{CURRENT_ATTEMPT_KEY, RequestOptions, RequestParams, TraceContext, Urls};
pub use response::Response;
#[cfg(test)]
pub use transport::{MockRequestTracer, MockTransport};
pub use transport::{ReqwestTransport, RequestTracer, Transport};
