//! Show-watch bot: periodically observes a members-only ticket site, diffs
//! the listings against a persisted baseline and fans notifications about
//! newly-appeared items out to Telegram subscribers, honoring per-subscriber
//! suppression lists.

pub mod actions;
pub mod collector;
pub mod config;
pub mod db;
pub mod diff;
pub mod fanout;
pub mod handlers;
pub mod messenger;
pub mod model;
pub mod watch;
