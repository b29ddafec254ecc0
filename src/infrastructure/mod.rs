pub mod mexc_client;
