/// Scoring service client
///
/// `POST /upload` sends a corrected region as a multipart form and returns the
/// game it shows; `GET /game?gameId=<id>` refreshes a game while it is tracked.
pub mod client;
pub mod multipart;

pub use client::{encode_jpeg, HttpScoreService, ScoreService};
pub use multipart::{unique_filename, MultipartForm};
