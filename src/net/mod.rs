pub mod protocol;
pub mod receiver;
pub mod sender;
