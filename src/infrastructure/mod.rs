pub mod alert_backends;
pub mod gateway_ws;
pub mod http;
pub mod llm;
pub mod memory;
pub mod mode_file;
pub mod persistence;
pub mod redis;
pub mod simulation;
