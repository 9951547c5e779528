#![forbid(unsafe_code)]

pub mod bridge;
pub mod bus;
pub mod delivery;
pub mod demo;
pub mod directory;
pub mod health;
pub mod manager;
pub mod procedures;
pub mod session;

#[cfg(test)]
mod bus_tests;


#[cfg(test)]
mod manager_tests;

#[cfg(test)]
mod test_support;
