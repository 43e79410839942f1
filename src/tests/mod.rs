//! Integration testing module
//!
//! End-to-end tests for the transcoding engine:
//! - Track statuses and validator decisions
//! - Compressing pipelines with staggered output formats
//! - Pass-through, forced end of stream and cancellation
//! - Teardown failures and listener ordering
