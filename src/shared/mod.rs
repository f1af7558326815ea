pub mod hashing;
pub mod py_ast;
pub mod ttl_cache;
