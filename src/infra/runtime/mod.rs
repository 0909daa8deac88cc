pub mod circuit_breaker;
pub mod executor;
pub mod limits;
pub mod retry;
pub mod timeout;
