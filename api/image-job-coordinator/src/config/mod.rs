pub mod db;
pub mod environment;
pub mod worker;
