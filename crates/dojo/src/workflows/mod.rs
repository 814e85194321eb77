pub mod access;
pub mod billing;
pub mod ids;
pub mod notify;
pub mod promotion;
pub mod roster;
pub mod storage;
