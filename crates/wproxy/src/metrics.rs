//! Metric names recorded by sessions and relay loops.
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the embedding application installs a recorder.

/// Sessions started (counter).
pub const SESSIONS_TOTAL: &str = "wproxy_sessions_total";
/// Sessions currently relaying or in setup (gauge).
pub const SESSIONS_ACTIVE: &str = "wproxy_sessions_active";
/// Session duration seconds, setup included (histogram).
pub const SESSION_DURATION_SECONDS: &str = "wproxy_session_duration_seconds";
/// Setup failures (counter, labels: stage).
pub const SETUP_FAILURES_TOTAL: &str = "wproxy_setup_failures_total";
/// Messages written to the opposite connection (counter, labels: direction).
pub const MESSAGES_RELAYED_TOTAL: &str = "wproxy_messages_relayed_total";
/// Messages dropped by a failing stage (counter, labels: direction, stage).
pub const MESSAGES_DROPPED_TOTAL: &str = "wproxy_messages_dropped_total";
/// Ping-tagged client messages echoed back (counter).
pub const PING_REPLIES_TOTAL: &str = "wproxy_ping_replies_total";
