//! L2 Event Log Backtest Library
//!
//! Two-stage pipeline over exchange L2 incremental book feeds:
//!
//! 1. **Compile** (`ingest` + `evlog`): CSV rows are validated, quantized to
//!    integer ticks/lots, grouped into receive-time batches and written to a
//!    hashed binary event log with an index and a manifest.
//! 2. **Replay** (`evlog` + `replay`): the log is streamed back, the order
//!    book is reconstructed batch by batch, a strategy is consulted, market
//!    orders are filled against top-of-book and an equity curve is recorded.
//!
//! Both stages are single-threaded and deterministic.

pub mod common;
pub mod evlog;
pub mod ingest;
pub mod replay;
