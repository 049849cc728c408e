//! ConsumerApp integration tests against the in-memory broker.

mod support;
mod handlers;
mod end_to_end;
mod filter;
mod cancellation;
mod failures;
