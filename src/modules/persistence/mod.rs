pub mod request_db;
