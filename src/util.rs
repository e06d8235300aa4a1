pub mod blob;
pub mod checksum;
pub mod http_transport;
pub mod path_locks;
pub mod proxy_connector;
pub mod validating_body;
