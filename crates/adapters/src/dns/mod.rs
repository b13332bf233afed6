pub mod upstream_client;
