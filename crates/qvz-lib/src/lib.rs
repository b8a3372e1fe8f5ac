pub mod cli;
pub mod compression;
pub mod io;
