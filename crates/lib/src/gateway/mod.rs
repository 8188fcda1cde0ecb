//! Gateway: HTTP surface over the relay.
//!
//! `POST /search` and `POST /click` run one relay cycle each; `GET /health` is a
//! liveness probe; `POST /telegram/webhook` feeds bridge updates in webhook mode.

mod protocol;
mod server;

pub use protocol::{ClickRequest, ErrorBody, RelayResponse, SearchRequest};
pub use server::{router, run_gateway, GatewayState};
