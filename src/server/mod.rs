mod frames;
mod handlers;
mod server;
#[cfg(test)]
mod tests;

pub use frames::FrameLibrary;
pub use server::{ServerState, StreamServer, StreamServerBuilder};
