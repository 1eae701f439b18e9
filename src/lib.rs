pub mod db;
pub mod infer;
pub mod wire;
