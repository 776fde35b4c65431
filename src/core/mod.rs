pub mod csrf;
pub mod db;
pub mod errors;
pub mod flash;
pub mod forms;
pub mod helpers;
pub mod query_params;
pub mod session;
