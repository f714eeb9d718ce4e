//! Integration tests: full sessions through the public API.

mod mock_adapter;
mod session;
