pub mod defect_analysis;
pub mod embedding_service;
pub mod optimizer;
pub mod orchestrator;
pub mod rate_limiter;
pub mod safety_guard;
pub mod validator;
