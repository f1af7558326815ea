pub mod artifact;
pub mod defect;
pub mod error;
pub mod job;
pub mod llm_config;
pub mod recon;
pub mod safety;
pub mod validation;
