//! Batch engine
//!
//! Ingests newline-delimited JSON jobs, fans the lines out through the same
//! data-plane pipeline interactive requests use (same credentials context,
//! same guardrails, same budgets), assembles output and error files, and
//! walks the batch through its forward-only state machine. A progress
//! cursor and partial-output sidecars make a crashed engine resumable from
//! the first undispatched line.

pub mod ingest;
pub mod runner;

pub use ingest::{ parse_input_lines, BatchLine };
pub use runner::{ run_expiry_sweeper, BatchEngine };

use serde::Serialize;

/// One line of a batch output file
#[ derive( Debug, Clone, Serialize ) ]
pub struct OutputLine< 'a >
{
  pub id: String,
  pub custom_id: &'a str,
  pub response: OutputResponse< 'a >,
}

/// The `response` object inside an output line
#[ derive( Debug, Clone, Serialize ) ]
pub struct OutputResponse< 'a >
{
  pub status_code: u16,
  pub request_id: &'a str,
  pub body: &'a serde_json::Value,
}

/// One line of a batch error file
#[ derive( Debug, Clone, Serialize ) ]
pub struct ErrorLine< 'a >
{
  pub id: String,
  pub custom_id: &'a str,
  pub error: ErrorBody< 'a >,
}

/// The `error` object inside an error line
#[ derive( Debug, Clone, Serialize ) ]
pub struct ErrorBody< 'a >
{
  pub code: &'a str,
  pub message: &'a str,
}
