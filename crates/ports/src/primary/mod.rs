pub mod fqdn_policy_port;
