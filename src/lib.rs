pub mod api;
pub mod blob;
pub mod bucketconfig;
pub mod config;
pub mod error;
pub mod filereq;
pub mod kv;
pub mod metadata;
pub mod models;
pub mod pathresolver;
pub mod principal;
pub mod quota;
pub mod readpath;
pub mod s3;
pub mod server;
pub mod sigv4;
pub mod stats;
pub mod transform;
pub mod upload;
