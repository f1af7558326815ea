pub mod connection;
pub mod jobs;
pub mod test_cases;
