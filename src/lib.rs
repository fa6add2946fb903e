pub mod acquisition;
pub mod commands;
pub mod connection;
pub mod mapping;
pub mod modbus;
pub mod output;
pub mod readings;
