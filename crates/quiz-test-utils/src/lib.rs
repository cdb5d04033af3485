//! Shared test utilities: a thin WS client for driving a live `quiz-server`
//! instance end to end in integration tests.

pub mod mock_ws_client;

pub use mock_ws_client::MockWsClient;
