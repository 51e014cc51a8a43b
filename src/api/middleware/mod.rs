//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. CORS: the mobile client calls from any origin
//! 2. Access logger: method, path, status, latency

pub mod audit;
